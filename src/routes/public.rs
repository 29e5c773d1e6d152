use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;

use crate::config::Config;
use crate::error::AppError;
use crate::helper::{article_helpers, feed_helpers};
use crate::middleware::AuthenticatedUser;
use crate::models::audience::AudienceKind;
use crate::models::{ArticleListFilter, ArticleSort, ContextQuery};
use crate::DbPool;

#[derive(Deserialize)]
pub struct PageQuery {
    page: Option<u32>,
    per_page: Option<u32>,
}

#[derive(Deserialize)]
pub struct ListQuery {
    is_published: Option<bool>,
    is_for_staff: Option<bool>,
    is_actual: Option<bool>,
    search: Option<String>,
    category_id: Option<i64>,
    category_group_id: Option<i64>,
    view: Option<String>,
    #[serde(default)]
    sort: ArticleSort,
}

pub async fn is_server_active() -> impl Responder {
    HttpResponse::Ok().body("active")
}

/// GET /api/articles
pub async fn list_articles(
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    viewer: Option<AuthenticatedUser>,
    paging: web::Query<PageQuery>,
    query: web::Query<ListQuery>,
    context: web::Query<ContextQuery>,
) -> Result<HttpResponse, AppError> {
    let (page, per_page) = config.page_window(paging.page, paging.per_page);
    let query = query.into_inner();

    let view = query
        .view
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(AudienceKind::parse)
        .transpose()?;

    let filter = ArticleListFilter {
        is_published: query.is_published,
        is_for_staff: query.is_for_staff,
        is_actual: query.is_actual,
        search: query.search,
        category_id: query.category_id,
        category_group_id: query.category_group_id,
        sort: query.sort,
    };
    let filter = feed_helpers::restrict_for_viewer(filter, viewer.as_ref().map(AuthenticatedUser::actor));

    let page = web::block(move || feed_helpers::list_articles(&pool, &filter, &context, view, page, per_page))
        .await??;
    Ok(HttpResponse::Ok().json(page))
}

/// GET /api/articles/{id}
pub async fn get_article(
    pool: web::Data<DbPool>,
    viewer: Option<AuthenticatedUser>,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let article_id = path.into_inner();
    let detail = web::block(move || {
        article_helpers::read_article_detail(&pool, viewer.as_ref().map(AuthenticatedUser::actor), article_id)
    })
    .await??;
    Ok(HttpResponse::Ok().json(detail))
}

/// GET /api/articles/student-feed
pub async fn student_feed(
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    paging: web::Query<PageQuery>,
    context: web::Query<ContextQuery>,
) -> Result<HttpResponse, AppError> {
    let (page, per_page) = config.page_window(paging.page, paging.per_page);
    let page = web::block(move || feed_helpers::resolve_feed(&pool, &context, page, per_page))
        .await??;
    Ok(HttpResponse::Ok().json(page))
}

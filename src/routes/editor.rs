use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::error::AppError;
use crate::helper::article_helpers::{self, ArticlePayload, ArticleUpdate, BulkPayload};
use crate::middleware::AuthenticatedUser;
use crate::DbPool;

/// POST /api/articles
pub async fn create_article(
    pool: web::Data<DbPool>,
    user: AuthenticatedUser,
    payload: web::Json<ArticlePayload>,
) -> Result<HttpResponse, AppError> {
    let payload = payload.into_inner();
    let created = web::block(move || article_helpers::create_articles(&pool, user.actor(), payload)).await??;
    Ok(HttpResponse::Created().json(created))
}

/// POST /api/articles/bulk
pub async fn bulk_create_articles(
    pool: web::Data<DbPool>,
    user: AuthenticatedUser,
    payload: web::Json<BulkPayload>,
) -> Result<HttpResponse, AppError> {
    let payload = payload.into_inner();
    let created = web::block(move || article_helpers::bulk_create(&pool, user.actor(), payload)).await??;
    Ok(HttpResponse::Created().json(created))
}

/// PUT /api/articles/{id}
pub async fn update_article(
    pool: web::Data<DbPool>,
    user: AuthenticatedUser,
    path: web::Path<i64>,
    payload: web::Json<ArticleUpdate>,
) -> Result<HttpResponse, AppError> {
    let article_id = path.into_inner();
    let update = payload.into_inner();
    let updated =
        web::block(move || article_helpers::update_article(&pool, user.actor(), article_id, update)).await??;
    Ok(HttpResponse::Ok().json(updated))
}

/// DELETE /api/articles/{id}
pub async fn delete_article(
    pool: web::Data<DbPool>,
    user: AuthenticatedUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let article_id = path.into_inner();
    web::block(move || article_helpers::delete_article(&pool, user.actor(), article_id)).await??;
    Ok(HttpResponse::Ok().json(json!({ "message": "Article deleted successfully." })))
}

async fn set_publication(
    pool: web::Data<DbPool>,
    user: AuthenticatedUser,
    article_id: i64,
    published: bool,
) -> Result<HttpResponse, AppError> {
    let article =
        web::block(move || article_helpers::set_publication(&pool, user.actor(), article_id, published)).await??;
    Ok(HttpResponse::Ok().json(article))
}

/// POST /api/articles/{id}/publish
pub async fn publish_article(
    pool: web::Data<DbPool>,
    user: AuthenticatedUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    set_publication(pool, user, path.into_inner(), true).await
}

/// POST /api/articles/{id}/unpublish
pub async fn unpublish_article(
    pool: web::Data<DbPool>,
    user: AuthenticatedUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    set_publication(pool, user, path.into_inner(), false).await
}

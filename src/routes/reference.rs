use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::helper::reference_helpers;
use crate::middleware::AuthenticatedUser;
use crate::models::{GroupFilter, NewGroup};
use crate::DbPool;

#[derive(Deserialize)]
pub struct CoursesQuery {
    max: Option<i64>,
}

#[derive(Deserialize)]
pub struct NewCity {
    name: String,
}

pub fn config_api(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/reference")
            .route("/courses", web::get().to(get_courses))
            .route("/base-classes", web::get().to(get_base_classes))
            .route("/cities", web::post().to(create_city))
            .route("/groups", web::get().to(list_groups))
            .route("/groups", web::post().to(create_group))
            .route("/groups/{id}", web::get().to(get_group))
            .route("/groups/{id}", web::delete().to(delete_group))
            .route("/{table}", web::get().to(list_reference)),
    );
}

async fn get_courses(query: web::Query<CoursesQuery>) -> HttpResponse {
    HttpResponse::Ok().json(reference_helpers::course_options(query.max))
}

async fn get_base_classes() -> HttpResponse {
    HttpResponse::Ok().json(reference_helpers::base_class_options())
}

async fn list_reference(pool: web::Data<DbPool>, path: web::Path<String>) -> Result<HttpResponse, AppError> {
    let slug = path.into_inner();
    let rows = web::block(move || reference_helpers::list_reference(&pool, &slug)).await??;
    Ok(HttpResponse::Ok().json(rows))
}

async fn list_groups(pool: web::Data<DbPool>, filter: web::Query<GroupFilter>) -> Result<HttpResponse, AppError> {
    let filter = filter.into_inner();
    let groups = web::block(move || reference_helpers::list_groups(&pool, &filter)).await??;
    Ok(HttpResponse::Ok().json(groups))
}

async fn get_group(pool: web::Data<DbPool>, path: web::Path<i64>) -> Result<HttpResponse, AppError> {
    let group_id = path.into_inner();
    let group = web::block(move || reference_helpers::read_group(&pool, group_id)).await??;
    Ok(HttpResponse::Ok().json(group))
}

async fn create_city(
    pool: web::Data<DbPool>,
    user: AuthenticatedUser,
    payload: web::Json<NewCity>,
) -> Result<HttpResponse, AppError> {
    let name = payload.into_inner().name;
    let city = web::block(move || reference_helpers::create_city(&pool, user.actor(), &name)).await??;
    Ok(HttpResponse::Created().json(city))
}

async fn create_group(
    pool: web::Data<DbPool>,
    user: AuthenticatedUser,
    payload: web::Json<NewGroup>,
) -> Result<HttpResponse, AppError> {
    let group = payload.into_inner();
    let created = web::block(move || reference_helpers::create_group(&pool, user.actor(), group)).await??;
    Ok(HttpResponse::Created().json(created))
}

async fn delete_group(
    pool: web::Data<DbPool>,
    user: AuthenticatedUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let group_id = path.into_inner();
    web::block(move || reference_helpers::delete_group(&pool, user.actor(), group_id)).await??;
    Ok(HttpResponse::Ok().json(json!({ "message": "Group deleted." })))
}

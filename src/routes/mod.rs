use actix_web::web;

use crate::error::AppError;

pub mod auth;
pub mod editor;
pub mod public;
pub mod reference;

/// Malformed query strings and JSON bodies render as `{"error": ...}` 400s.
pub fn config_extractors(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::QueryConfig::default().error_handler(|err, _req| AppError::validation(err.to_string()).into()),
    )
    .app_data(web::JsonConfig::default().error_handler(|err, _req| AppError::validation(err.to_string()).into()))
    .app_data(web::PathConfig::default().error_handler(|err, _req| AppError::validation(err.to_string()).into()));
}

/// One resource per path so that read and write methods share it. Fixed
/// segments are registered before `{id}`.
pub fn config_articles(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/articles/student-feed").route(web::get().to(public::student_feed)))
        .service(web::resource("/api/articles/bulk").route(web::post().to(editor::bulk_create_articles)))
        .service(
            web::resource("/api/articles")
                .route(web::get().to(public::list_articles))
                .route(web::post().to(editor::create_article)),
        )
        .service(
            web::resource("/api/articles/{id}")
                .route(web::get().to(public::get_article))
                .route(web::put().to(editor::update_article))
                .route(web::delete().to(editor::delete_article)),
        )
        .service(web::resource("/api/articles/{id}/publish").route(web::post().to(editor::publish_article)))
        .service(web::resource("/api/articles/{id}/unpublish").route(web::post().to(editor::unpublish_article)));
}

/// Every API route.
pub fn config_api(cfg: &mut web::ServiceConfig) {
    config_extractors(cfg);
    cfg.route("/api/is_server_active", web::get().to(public::is_server_active));
    config_articles(cfg);
    auth::config_api(cfg);
    reference::config_api(cfg);
}

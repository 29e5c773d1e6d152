use actix_session::Session;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::helper::auth_helpers;
use crate::middleware::{self, AuthenticatedUser};
use crate::DbPool;

#[derive(Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

pub fn config_api(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/auth")
            .route("/login", web::post().to(login))
            .route("/logout", web::post().to(logout))
            .route("/me", web::get().to(me)),
    );
}

async fn login(
    pool: web::Data<DbPool>,
    session: Session,
    form: web::Json<LoginRequest>,
) -> Result<HttpResponse, AppError> {
    let LoginRequest { email, password } = form.into_inner();
    let logged_email = email.clone();
    let actor = web::block(move || auth_helpers::verify_user_credentials(&pool, &email, &password)).await??;

    match actor {
        Some(actor) => {
            middleware::store_actor(&session, &actor).map_err(|e| AppError::Persistence(e.to_string()))?;
            log::info!("User {} logged in", actor.user_id);
            Ok(HttpResponse::Ok().json(actor))
        }
        None => {
            log::warn!("Failed login attempt for '{}'", logged_email);
            Err(AppError::Unauthenticated("Invalid email or password.".to_string()))
        }
    }
}

async fn logout(session: Session) -> HttpResponse {
    session.purge();
    HttpResponse::Ok().json(json!({ "message": "Logged out." }))
}

async fn me(pool: web::Data<DbPool>, user: AuthenticatedUser) -> Result<HttpResponse, AppError> {
    let user_id = user.actor().user_id;
    let record = web::block(move || auth_helpers::fetch_user(&pool, user_id)).await??;
    Ok(HttpResponse::Ok().json(record))
}

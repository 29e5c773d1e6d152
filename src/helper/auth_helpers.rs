use crate::error::AppError;
use crate::models::db_operations::users_db_operations;
use crate::models::{Actor, User};
use crate::DbPool;

pub fn verify_user_credentials(pool: &DbPool, email: &str, password: &str) -> Result<Option<Actor>, AppError> {
    let conn = pool.get()?;
    Ok(users_db_operations::verify_credentials(&conn, email.trim(), password)?
        .map(|(user_id, role)| Actor { user_id, role }))
}

pub fn fetch_user(pool: &DbPool, user_id: i64) -> Result<User, AppError> {
    let conn = pool.get()?;
    users_db_operations::read_user_by_id(&conn, user_id)?.ok_or_else(|| AppError::not_found("User not found."))
}

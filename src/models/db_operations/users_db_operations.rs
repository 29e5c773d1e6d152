use crate::models::db_operations::DbError;
use crate::models::{Role, User};
use bcrypt::{hash, verify, BcryptError};
use rusqlite::{params, Connection, Error as RusqliteError, OptionalExtension};

fn bcrypt_to_rusqlite_error(e: BcryptError) -> RusqliteError {
    RusqliteError::ToSqlConversionFailure(Box::new(e))
}

pub fn create_user(
    conn: &Connection,
    email: &str,
    password: &str,
    role: Role,
    full_name: Option<&str>,
) -> Result<i64, DbError> {
    let hashed_password = hash(password, bcrypt::DEFAULT_COST).map_err(bcrypt_to_rusqlite_error)?;
    conn.execute(
        "INSERT INTO users (email, password_hash, role, full_name) VALUES (?1, ?2, ?3, ?4)",
        params![email, hashed_password, role.as_str(), full_name],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn read_all_users(conn: &Connection) -> Result<Vec<User>, DbError> {
    let mut stmt = conn.prepare("SELECT id, email, role, full_name FROM users ORDER BY id")?;
    let user_iter = stmt.query_map([], |row| {
        let role: String = row.get(2)?;
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            role: Role::parse(&role),
            full_name: row.get(3)?,
        })
    })?;
    Ok(user_iter.collect::<Result<Vec<_>, _>>()?)
}

pub fn read_user_by_id(conn: &Connection, user_id: i64) -> Result<Option<User>, DbError> {
    Ok(conn
        .query_row(
            "SELECT id, email, role, full_name FROM users WHERE id = ?1",
            [user_id],
            |row| {
                let role: String = row.get(2)?;
                Ok(User {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    role: Role::parse(&role),
                    full_name: row.get(3)?,
                })
            },
        )
        .optional()?)
}

/// Returns `(user_id, role)` when the email exists and the password matches.
/// Unknown emails and wrong passwords give `Ok(None)`; storage failures are errors.
pub fn verify_credentials(conn: &Connection, email: &str, password: &str) -> Result<Option<(i64, Role)>, DbError> {
    let row: Option<(i64, String, String)> = conn
        .query_row(
            "SELECT id, password_hash, role FROM users WHERE email = ?1",
            [email],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let Some((id, hash, role)) = row else { return Ok(None) };
    if verify(password, &hash).map_err(bcrypt_to_rusqlite_error)? {
        Ok(Some((id, Role::parse(&role))))
    } else {
        Ok(None)
    }
}

pub fn change_password(conn: &Connection, email: &str, new_password: &str) -> Result<usize, DbError> {
    let hashed_password = hash(new_password, bcrypt::DEFAULT_COST).map_err(bcrypt_to_rusqlite_error)?;
    Ok(conn.execute(
        "UPDATE users SET password_hash = ?1 WHERE email = ?2",
        params![hashed_password, email],
    )?)
}

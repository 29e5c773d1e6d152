use actix_session::{Session, SessionExt, SessionInsertError};
use actix_web::{dev, FromRequest, HttpRequest};
use std::future::{ready, Ready};

use crate::error::AppError;
use crate::models::{Actor, Role};

const USER_ID_KEY: &str = "user_id";
const ROLE_KEY: &str = "role";

/// The logged-in caller, read from the session cookie. Fails with 401 when absent.
/// Use `Option<AuthenticatedUser>` for routes that also serve anonymous callers.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser(pub Actor);

impl AuthenticatedUser {
    pub fn actor(&self) -> &Actor {
        &self.0
    }
}

impl FromRequest for AuthenticatedUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut dev::Payload) -> Self::Future {
        let actor = read_actor(&req.get_session());
        ready(actor.map(AuthenticatedUser).ok_or_else(|| AppError::Unauthenticated("Not logged in.".to_string())))
    }
}

pub fn read_actor(session: &Session) -> Option<Actor> {
    match (session.get::<i64>(USER_ID_KEY), session.get::<String>(ROLE_KEY)) {
        (Ok(Some(user_id)), Ok(Some(role))) => Some(Actor { user_id, role: Role::parse(&role) }),
        _ => None,
    }
}

pub fn store_actor(session: &Session, actor: &Actor) -> Result<(), SessionInsertError> {
    session.renew();
    session.insert(USER_ID_KEY, actor.user_id)?;
    session.insert(ROLE_KEY, actor.role.as_str())?;
    Ok(())
}

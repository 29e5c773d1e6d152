use crate::error::AppError;
use crate::models::{Actor, Role};

/// Outcome of an authorization check. Handlers turn `Deny` into a 403.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthzDecision {
    Allow,
    Deny(String),
}

impl AuthzDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AuthzDecision::Allow)
    }

    pub fn into_result(self) -> Result<(), AppError> {
        match self {
            AuthzDecision::Allow => Ok(()),
            AuthzDecision::Deny(reason) => {
                log::info!("Authorization denied: {}", reason);
                Err(AppError::Authorization(reason))
            }
        }
    }
}

fn allow_if(condition: bool, reason: &str) -> AuthzDecision {
    if condition {
        AuthzDecision::Allow
    } else {
        AuthzDecision::Deny(reason.to_string())
    }
}

pub fn can_create_article(actor: &Actor) -> AuthzDecision {
    allow_if(actor.role.is_staff(), "Only editors and admins can create articles.")
}

/// Author, or any admin/editor.
pub fn can_update_article(actor: &Actor, author_ids: &[i64]) -> AuthzDecision {
    allow_if(
        actor.role.is_staff() || author_ids.contains(&actor.user_id),
        "Only the author, an editor or an admin can modify this article.",
    )
}

pub fn can_publish_article(actor: &Actor, author_ids: &[i64]) -> AuthzDecision {
    can_update_article(actor, author_ids)
}

/// Author or admin. Editors cannot delete other authors' articles.
pub fn can_delete_article(actor: &Actor, author_ids: &[i64]) -> AuthzDecision {
    allow_if(
        actor.role == Role::Admin || author_ids.contains(&actor.user_id),
        "Only the author or an admin can delete this article.",
    )
}

pub fn can_view_unpublished(actor: Option<&Actor>) -> AuthzDecision {
    allow_if(actor.map_or(false, |a| a.role.is_staff()), "Article not found.")
}

pub fn can_manage_reference_data(actor: &Actor) -> AuthzDecision {
    allow_if(actor.role == Role::Admin, "Only admins can change reference data.")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(user_id: i64, role: Role) -> Actor {
        Actor { user_id, role }
    }

    #[test]
    fn readers_cannot_create() {
        assert!(!can_create_article(&actor(1, Role::Reader)).is_allowed());
        assert!(can_create_article(&actor(1, Role::Editor)).is_allowed());
        assert!(can_create_article(&actor(1, Role::Admin)).is_allowed());
    }

    #[test]
    fn update_is_author_or_staff() {
        assert!(can_update_article(&actor(5, Role::Reader), &[5]).is_allowed());
        assert!(!can_update_article(&actor(6, Role::Reader), &[5]).is_allowed());
        assert!(can_update_article(&actor(6, Role::Editor), &[5]).is_allowed());
    }

    #[test]
    fn delete_is_narrower_than_update() {
        let editor = actor(6, Role::Editor);
        assert!(can_update_article(&editor, &[5]).is_allowed());
        assert_eq!(
            can_delete_article(&editor, &[5]),
            AuthzDecision::Deny("Only the author or an admin can delete this article.".to_string())
        );
        assert!(can_delete_article(&actor(5, Role::Editor), &[5]).is_allowed());
        assert!(can_delete_article(&actor(1, Role::Admin), &[5]).is_allowed());
    }

    #[test]
    fn unpublished_visibility_needs_staff() {
        assert!(!can_view_unpublished(None).is_allowed());
        assert!(!can_view_unpublished(Some(&actor(1, Role::Reader))).is_allowed());
        assert!(can_view_unpublished(Some(&actor(1, Role::Editor))).is_allowed());
    }

    #[test]
    fn deny_becomes_authorization_error() {
        let err = can_manage_reference_data(&actor(1, Role::Editor)).into_result().unwrap_err();
        assert!(matches!(err, AppError::Authorization(_)));
    }
}

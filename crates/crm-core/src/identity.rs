//! The acting user's identity, as established by the authentication layer.

use crate::UserId;
use serde::{Deserialize, Serialize};

/// Identity of the caller on an authenticated request.
///
/// Inserted into request extensions by the API's auth middleware and read by
/// handlers; webhook subscriptions are always scoped to `user_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub email: Option<String>,
    pub role: Option<String>,
}

impl AuthenticatedUser {
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            email: None,
            role: None,
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

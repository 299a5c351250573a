use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Account record owned by the authentication subsystem. The pool only needs
/// a stable id and somewhere to send the codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: Option<String>,
}

impl User {
    pub fn new(id: Uuid, email: Option<String>) -> Self {
        Self { id, email }
    }

    /// Email address suitable for delivery, if any
    pub fn resolvable_email(&self) -> Option<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
    }
}

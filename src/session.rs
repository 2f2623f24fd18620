//! Explicit session context passed into the engine's entry points.

use serde::{Deserialize, Serialize};

/// Role of the signed-in user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// Who is editing, and the credentials used for collaborator calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionContext {
    pub user_id: String,
    #[serde(default)]
    pub role: Role,
    /// Bearer token forwarded to HTTP stores. `None` for anonymous or in-memory use.
    #[serde(default, skip_serializing)]
    pub auth_token: Option<String>,
}

impl SessionContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::User,
            auth_token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

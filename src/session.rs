//! Authenticated session handed to the data layer.
//!
//! The identity collaborator owns login and logout; once a user is
//! authenticated it constructs a [`Session`] and passes it to
//! [`SyncService::on_login`](crate::sync::SyncService::on_login). The session
//! is discarded on logout rather than mutated.

/// One authenticated user session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    user_id: String,
    id_token: Option<String>,
}

impl Session {
    /// Session for a local-password account with no bearer token.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            id_token: None,
        }
    }

    /// Session backed by an identity provider token, usable for key
    /// derivation.
    pub fn with_token(user_id: impl Into<String>, id_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            id_token: Some(id_token.into()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn id_token(&self) -> Option<&str> {
        self.id_token.as_deref()
    }
}

// src/api/auth.rs
//! Request authentication.
//!
//! The pipeline asks its [`AuthProvider`] for headers once per stage run
//! and attaches the same set to every request of that run.

use super::types::HeaderSet;
use crate::error::AppError;
use crate::types::AccessToken;

/// The ability to produce the headers that authenticate a request.
pub trait AuthProvider: Send + Sync {
    fn headers(&self) -> Result<HeaderSet, AppError>;
}

/// A fixed header set, used as-is.
impl AuthProvider for HeaderSet {
    fn headers(&self) -> Result<HeaderSet, AppError> {
        Ok(self.clone())
    }
}

/// `Authorization: Bearer <token>` authentication for private apps.
#[derive(Debug, Clone)]
pub struct BearerTokenAuth {
    token: AccessToken,
    user_agent: Option<String>,
}

impl BearerTokenAuth {
    pub fn new(token: AccessToken) -> Self {
        Self {
            token,
            user_agent: None,
        }
    }

    pub fn with_user_agent(self, user_agent: Option<String>) -> Self {
        Self {
            user_agent: user_agent.filter(|ua| !ua.trim().is_empty()),
            ..self
        }
    }
}

impl AuthProvider for BearerTokenAuth {
    fn headers(&self) -> Result<HeaderSet, AppError> {
        let mut headers = HeaderSet::new();
        headers.insert(
            "Authorization".to_string(),
            format!("Bearer {}", self.token.as_str()),
        );
        if let Some(user_agent) = &self.user_agent {
            headers.insert("User-Agent".to_string(), user_agent.clone());
        }
        Ok(headers)
    }
}

//! Access tokens for Google REST APIs
//!
//! Obtaining tokens (service-account impersonation, metadata server, ...) is
//! outside this crate. Clients only need something that hands them a bearer
//! token, or `None` when talking to an emulator.

use async_trait::async_trait;

use crate::Result;

#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Bearer token for the next request, `None` to send no Authorization header
    async fn token(&self) -> Result<Option<String>>;
}

/// Fixed token supplied through configuration
#[derive(Debug, Clone, Default)]
pub struct StaticTokenSource {
    token: Option<String>,
}

impl StaticTokenSource {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
        }
    }

    /// No Authorization header (Pub/Sub emulator, local MinIO setups)
    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn token(&self) -> Result<Option<String>> {
        Ok(self.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_token_means_anonymous() {
        let source = StaticTokenSource::new(Some(String::new()));
        assert_eq!(source.token().await.unwrap(), None);

        let source = StaticTokenSource::new(Some("ya29.token".into()));
        assert_eq!(source.token().await.unwrap().as_deref(), Some("ya29.token"));
    }
}

use std::{fmt, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use objfs_core::auth::{Auth, CredentialMap, Session};
use tracing::instrument;

/// Auth provider that turns a `token` credential into a session as-is.
pub struct TokenAuth;

/// Session for a validated token and, optionally, the user it belongs to.
pub struct TokenSession {
    user: Option<String>,
}

impl fmt::Debug for TokenSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSession")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl Session for TokenSession {
    fn provider(&self) -> &str {
        "token"
    }

    fn principal(&self) -> Option<&str> {
        self.user.as_deref()
    }
}

#[async_trait]
impl Auth for TokenAuth {
    fn name(&self) -> &'static str {
        "token"
    }

    #[instrument(skip_all, fields(auth = "token"))]
    async fn session(&self, credentials: &CredentialMap) -> Result<Arc<dyn Session>> {
        credentials
            .get("token")
            .filter(|t| !t.is_empty())
            .context("credentials have no token")?;
        Ok(Arc::new(TokenSession {
            user: credentials.get("user").cloned(),
        }))
    }
}

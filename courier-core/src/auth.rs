//! # Credentials
//!
//! Calls are authorized with credentials obtained lazily from an external auth
//! collaborator ([`AuthClient`]). The [`CredentialProvider`] fetches them on first use and
//! caches the result for its lifetime; concurrent callers that arrive while the fetch is in
//! flight wait for that same fetch instead of starting their own.
use crate::BoxError;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tonic::metadata::{AsciiMetadataValue, errors::InvalidMetadataValue};

/// Project id value that means "not resolved yet".
pub const PROJECT_ID_PLACEHOLDER: &str = "{{projectId}}";

/// What the auth collaborator hands back.
#[derive(Debug, Clone, Default)]
pub struct AuthSession {
    /// OAuth2 access token attached as a bearer token to every call.
    pub access_token: Option<String>,
    /// Project the credentials belong to, if the collaborator knows it.
    pub project_id: Option<String>,
}

/// External source of [`AuthSession`]s.
#[tonic::async_trait]
pub trait AuthClient: Send + Sync {
    async fn get_auth_client(&self) -> Result<AuthSession, BoxError>;
}

/// Transport credentials for building stubs.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Plaintext channel, no authorization header.
    Insecure,
    /// TLS channel with an optional `authorization` header.
    Ssl {
        authorization: Option<AsciiMetadataValue>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    #[error("Failed to get an auth client: '{0}'")]
    AuthClient(#[source] BoxError),
    #[error("The access token is not a valid metadata value: '{0}'")]
    InvalidToken(#[source] InvalidMetadataValue),
}

#[derive(Debug)]
struct Resolved {
    credentials: Credentials,
    project_id: Option<String>,
}

/// Single-flight, caching accessor for [`Credentials`].
pub struct CredentialProvider {
    auth: Option<Arc<dyn AuthClient>>,
    configured_project_id: Option<String>,
    resolved: OnceCell<Resolved>,
}

impl CredentialProvider {
    pub fn new(auth: Arc<dyn AuthClient>, project_id: Option<String>) -> Self {
        Self {
            auth: Some(auth),
            configured_project_id: project_id,
            resolved: OnceCell::new(),
        }
    }

    /// A provider that is already resolved to [`Credentials::Insecure`] and never talks to
    /// an auth collaborator. Used for custom (local/emulator) endpoints.
    pub fn insecure(project_id: Option<String>) -> Self {
        Self {
            auth: None,
            configured_project_id: project_id,
            resolved: OnceCell::new_with(Some(Resolved {
                credentials: Credentials::Insecure,
                project_id: None,
            })),
        }
    }

    /// Returns the cached credentials, fetching them on first use.
    pub async fn get_credentials(&self) -> Result<Credentials, CredentialsError> {
        let resolved = self
            .resolved
            .get_or_try_init(|| self.fetch())
            .await?;

        Ok(resolved.credentials.clone())
    }

    /// The effective project id.
    ///
    /// A configured id wins unless it is empty or the placeholder, in which case the id
    /// derived from the credentials (once resolved) fills in.
    pub fn project_id(&self) -> Option<String> {
        match self.configured_project_id.as_deref() {
            Some(id) if !is_unresolved(id) => Some(id.to_owned()),
            configured => self
                .resolved
                .get()
                .and_then(|resolved| resolved.project_id.clone())
                .or_else(|| configured.map(str::to_owned)),
        }
    }

    async fn fetch(&self) -> Result<Resolved, CredentialsError> {
        let Some(auth) = &self.auth else {
            return Ok(Resolved {
                credentials: Credentials::Insecure,
                project_id: None,
            });
        };

        tracing::debug!("fetching credentials from the auth client");

        let session = auth
            .get_auth_client()
            .await
            .map_err(CredentialsError::AuthClient)?;

        let authorization = session
            .access_token
            .as_deref()
            .map(|token| AsciiMetadataValue::try_from(format!("Bearer {token}")))
            .transpose()
            .map_err(CredentialsError::InvalidToken)?;

        Ok(Resolved {
            credentials: Credentials::Ssl { authorization },
            project_id: session.project_id.filter(|id| !id.is_empty()),
        })
    }
}

fn is_unresolved(project_id: &str) -> bool {
    project_id.is_empty() || project_id == PROJECT_ID_PLACEHOLDER
}

use super::{coordinator::SessionCoordinator, credential::CredentialSource};
use reqwest::{
    header::{HeaderValue, AUTHORIZATION},
    RequestBuilder,
};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::{debug, warn};

/// Header to send with one outgoing call, plus the epoch it was prepared under.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub authorization: Option<HeaderValue>,
    pub epoch: u64,
}

/// Adds `Authorization: Bearer <token>` to outgoing calls of an
/// authenticated session. Never changes session state.
pub struct TokenAttacher {
    session: Arc<SessionCoordinator>,
    credentials: Arc<dyn CredentialSource>,
}

impl std::fmt::Debug for TokenAttacher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAttacher")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl TokenAttacher {
    #[must_use]
    pub fn new(session: Arc<SessionCoordinator>, credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            session,
            credentials,
        }
    }

    /// Force-refresh the token when a principal exists.
    ///
    /// A failed refresh is not an error: the call goes out without a header
    /// and the server decides what an anonymous caller may do.
    pub async fn attach(&self) -> Attachment {
        let (epoch, authenticated) = self.session.snapshot();
        if !authenticated {
            return Attachment {
                authorization: None,
                epoch,
            };
        }

        let authorization = match self.credentials.refresh(true).await {
            Ok(credential) => {
                let value = format!("Bearer {}", credential.token.expose_secret());
                match HeaderValue::from_str(&value) {
                    Ok(mut header) => {
                        header.set_sensitive(true);
                        Some(header)
                    }
                    Err(_) => {
                        warn!("Refreshed token is not a valid header value; sending call without it");
                        None
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "Token refresh failed; sending call without credentials");
                None
            }
        };

        debug!(epoch, attached = authorization.is_some(), "Token attachment prepared");
        Attachment {
            authorization,
            epoch,
        }
    }

    #[must_use]
    pub fn apply(request: RequestBuilder, attachment: &Attachment) -> RequestBuilder {
        match &attachment.authorization {
            Some(value) => request.header(AUTHORIZATION, value.clone()),
            None => request,
        }
    }
}

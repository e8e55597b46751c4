//! Connection-time authentication: credential token → Identity.

use thiserror::Error;

use crate::auth::tokens;
use crate::models::user::Identity;
use crate::AppState;

/// Terminal authentication failures. Reported once over the socket as an
/// `auth_error` event, then the transport is closed; never retried.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no credential token was supplied")]
    MissingToken,
    #[error("credential token is invalid or expired")]
    InvalidToken,
    #[error("token subject no longer exists")]
    UnknownSubject,
}

impl AuthError {
    /// Stable reason code carried in the `auth_error` event.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::InvalidToken => "invalid_token",
            Self::UnknownSubject => "unknown_subject",
        }
    }
}

/// Validate the token presented at handshake time and resolve its subject.
///
/// Pure validation: no per-connection state exists until this has returned
/// success, so a failed or hung authentication never occupies the registry.
pub async fn authenticate(state: &AppState, token: Option<&str>) -> Result<Identity, AuthError> {
    let token = token.ok_or(AuthError::MissingToken)?;

    let claims = tokens::verify_session_token(&state.config.jwt_secret, token)
        .map_err(|_| AuthError::InvalidToken)?;

    let user = state
        .users
        .find_by_id(&claims.sub)
        .await
        .map_err(|err| {
            tracing::error!(?err, "user lookup failed during gateway auth");
            AuthError::UnknownSubject
        })?
        .ok_or(AuthError::UnknownSubject)?;

    Ok(Identity::from(&user))
}

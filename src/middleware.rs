//! Binding resolved identities to HTTP requests.
//!
//! [`authorize`] and [`attach`] decide what happens to a request and return
//! an [`AuthOutcome`]; the axum middleware functions act on that outcome.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::{AuthError, Identity};
use crate::resolver::IdentityResolver;
use crate::types::{AccessToken, SubjectId};

/// Where credentials are read from on a request.
///
/// Tokens are read from the `Authorization` header. Reading them from the
/// query string is off unless `token_query` is set, since request URIs end up
/// in access logs and in the HTTP trace spans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialSource {
    /// Query parameter carrying the token when there is no Authorization header
    pub token_query: Option<String>,
    /// Header carrying the subject hint
    pub subject_header: String,
    /// Query parameter carrying the subject hint when the header is absent
    pub subject_query: String,
}

impl Default for CredentialSource {
    fn default() -> Self {
        Self {
            token_query: None,
            subject_header: "X-Subject-Id".to_string(),
            subject_query: "fid".to_string(),
        }
    }
}

impl CredentialSource {
    /// Pull the bearer token and subject hint off a request.
    pub fn extract(&self, headers: &HeaderMap, query: Option<&str>) -> RequestCredentials {
        let query_param = |name: &str| {
            query.and_then(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .find(|(k, _)| k == name)
                    .map(|(_, v)| v.into_owned())
            })
        };

        let token = headers
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .or_else(|| self.token_query.as_deref().and_then(query_param))
            .filter(|t| !t.is_empty())
            .map(AccessToken::new);

        let subject = headers
            .get(self.subject_header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .or_else(|| query_param(&self.subject_query))
            .filter(|s| !s.is_empty())
            .map(SubjectId::new);

        RequestCredentials { token, subject }
    }
}

/// Token of a `Bearer` authorization value; the scheme name is case-insensitive.
fn bearer_token(value: &str) -> Option<String> {
    let (scheme, token) = value.trim().split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("Bearer")
        .then(|| token.trim().to_string())
}

/// Credentials found on one request.
#[derive(Debug, Clone, Default)]
pub struct RequestCredentials {
    pub token: Option<AccessToken>,
    pub subject: Option<SubjectId>,
}

/// What the pipeline should do with a request.
#[derive(Debug)]
pub enum AuthOutcome {
    /// Bind the identity and continue
    Continue(Identity),
    /// Stop and answer with the error
    Reject(AuthError),
    /// Continue without an identity
    PassThrough,
}

/// Mandatory authentication: a request without a verifiable identity is rejected.
pub async fn authorize(
    resolver: &IdentityResolver,
    credentials: &RequestCredentials,
) -> AuthOutcome {
    let Some(token) = credentials.token.as_ref() else {
        return AuthOutcome::Reject(AuthError::MissingToken);
    };
    let Some(subject) = credentials.subject.as_ref() else {
        return AuthOutcome::Reject(AuthError::MissingSubject);
    };

    match resolver.verify_and_resolve(token, subject).await {
        Ok(identity) => AuthOutcome::Continue(identity),
        Err(e) => AuthOutcome::Reject(e),
    }
}

/// Advisory authentication: attach a cached identity when there is one.
///
/// Failures are logged and degrade to `PassThrough`.
pub async fn attach(
    resolver: &IdentityResolver,
    credentials: &RequestCredentials,
) -> AuthOutcome {
    match resolver.resolve(credentials.subject.as_ref()).await {
        Ok(Some(identity)) => AuthOutcome::Continue(identity),
        Ok(None) => AuthOutcome::PassThrough,
        Err(e) => {
            warn!(error = %e, "Advisory identity lookup failed, continuing without identity");
            AuthOutcome::PassThrough
        }
    }
}

/// State shared by the auth middleware.
#[derive(Clone)]
pub struct AuthState {
    pub resolver: Arc<IdentityResolver>,
    pub credentials: Arc<CredentialSource>,
}

impl AuthState {
    pub fn new(resolver: Arc<IdentityResolver>, credentials: CredentialSource) -> Self {
        Self {
            resolver,
            credentials: Arc::new(credentials),
        }
    }
}

async fn apply(outcome: AuthOutcome, mut request: Request, next: Next) -> Response {
    match outcome {
        AuthOutcome::Continue(identity) => {
            debug!(subject_id = %identity.subject_id(), "Identity bound to request");
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        AuthOutcome::PassThrough => next.run(request).await,
        AuthOutcome::Reject(e) => {
            if e.status().is_server_error() {
                warn!(error = %e, "Request rejected: backend failure");
            } else {
                debug!(error = %e, "Request rejected");
            }
            e.into_response()
        }
    }
}

/// Middleware requiring an identity; use with `axum::middleware::from_fn_with_state`.
pub async fn verify_access_token(
    State(state): State<AuthState>,
    request: Request,
    next: Next,
) -> Response {
    let credentials = state
        .credentials
        .extract(request.headers(), request.uri().query());
    let outcome = authorize(&state.resolver, &credentials).await;
    apply(outcome, request, next).await
}

/// Middleware attaching an identity when one is cached; never rejects.
pub async fn pass_user_context(
    State(state): State<AuthState>,
    request: Request,
    next: Next,
) -> Response {
    let credentials = state
        .credentials
        .extract(request.headers(), request.uri().query());
    let outcome = attach(&state.resolver, &credentials).await;
    apply(outcome, request, next).await
}

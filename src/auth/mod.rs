//! Token verification and identity types.
//!
//! - [`TokenVerifier`] turns a bearer token into [`VerifiedClaims`]
//! - [`JwtVerifier`] is the JWT implementation, with keys from a JWKS
//!   endpoint ([`jwks::JwksCache`]) or a fixed key
//! - [`Identity`] is what gets bound to a request and cached
//! - [`AuthError`] is the failure taxonomy and its HTTP mapping

mod error;
mod identity;
pub mod jwks;
mod verifier;

pub use error::{AuthError, ErrorBody, ErrorDetail};
pub use identity::Identity;
pub use jwks::{DEFAULT_CACHE_TTL_SECONDS, FIREBASE_JWKS_URL, JwksCache, JwksError};
pub use verifier::{JwtVerifier, MAX_SUBJECT_LEN, TokenVerifier, VerifiedClaims};

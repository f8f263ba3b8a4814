//! Bearer-token authentication.
//!
//! Credential issuance lives elsewhere; the server only maps a presented
//! token to a [`Principal`] through a [`CapabilityCheck`].

use axum::http::{header, HeaderMap};

use hotreload_core::{Principal, Settings};

use crate::error::AdmissionError;

/// Resolves a presented bearer token to a principal.
pub trait CapabilityCheck: Send + Sync {
    fn principal_for(&self, token: &str) -> Option<Principal>;
}

/// The static token table in `hotreload.yaml`.
impl CapabilityCheck for Settings {
    fn principal_for(&self, token: &str) -> Option<Principal> {
        self.grant_for_token(token).map(|grant| Principal {
            name: grant.principal.clone(),
            admin: grant.admin,
        })
    }
}

/// Extract `Authorization: Bearer <token>` and resolve it.
pub fn authenticate(
    headers: &HeaderMap,
    check: &dyn CapabilityCheck,
) -> Result<Principal, AdmissionError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AdmissionError::Unauthenticated)?;
    check
        .principal_for(token)
        .ok_or(AdmissionError::Unauthenticated)
}

/// The capability gate of the admission endpoint.
pub fn require_admin(principal: &Principal) -> Result<(), AdmissionError> {
    if principal.admin {
        Ok(())
    } else {
        Err(AdmissionError::Forbidden(principal.name.clone()))
    }
}

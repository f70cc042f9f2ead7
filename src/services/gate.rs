//! Basic-auth access gate for the import API.
//!
//! The expected credentials are injected at construction, so the gate is a
//! pure function of its inputs — no ambient configuration reads. A
//! structurally broken header is a distinct error, never a silent deny: the
//! boundary needs to tell a client typo apart from a bad password.

use base64::{Engine as _, engine::general_purpose};
use std::collections::HashMap;
use thiserror::Error;

/// The gate's verdict for one credential pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    Allow,
    Deny,
}

/// A decision scoped to the requested resource, never a blanket verdict.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyDecision {
    pub principal: String,
    pub resource: String,
    pub effect: Effect,
}

/// Structural problems with the authorization header. Distinct from `Deny`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("authorization scheme must be `Basic`")]
    WrongScheme,
    #[error("credential payload is not valid base64")]
    UndecodablePayload,
    #[error("decoded credentials are not in `user:password` form")]
    MissingSeparator,
}

/// Compares presented basic credentials against an injected lookup table.
pub struct AccessGate {
    credentials: HashMap<String, String>,
}

impl AccessGate {
    pub fn new(credentials: HashMap<String, String>) -> Self {
        Self { credentials }
    }

    /// Decide whether `header` grants access to `resource`.
    ///
    /// Unknown users and wrong passwords are a normal `Deny`; only a header
    /// that cannot be parsed at all is an error.
    pub fn authorize(&self, header: &str, resource: &str) -> Result<PolicyDecision, GateError> {
        // The scheme token is case-insensitive (RFC 7617).
        let (scheme, encoded) = header.split_once(' ').ok_or(GateError::WrongScheme)?;
        if !scheme.eq_ignore_ascii_case("Basic") {
            return Err(GateError::WrongScheme);
        }
        let encoded = encoded.trim();

        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| GateError::UndecodablePayload)?;
        let decoded = String::from_utf8(decoded).map_err(|_| GateError::UndecodablePayload)?;

        let (username, password) = decoded
            .split_once(':')
            .ok_or(GateError::MissingSeparator)?;

        let effect = match self.credentials.get(username) {
            Some(expected) if expected == password => Effect::Allow,
            _ => Effect::Deny,
        };

        Ok(PolicyDecision {
            principal: username.to_string(),
            resource: resource.to_string(),
            effect,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> AccessGate {
        AccessGate::new(HashMap::from([("alice".to_string(), "secret".to_string())]))
    }

    fn basic(credentials: &str) -> String {
        format!("Basic {}", general_purpose::STANDARD.encode(credentials))
    }

    #[test]
    fn correct_password_allows() {
        let decision = gate()
            .authorize(&basic("alice:secret"), "PUT /imports/uploaded/items.csv")
            .unwrap();
        assert_eq!(decision.effect, Effect::Allow);
        assert_eq!(decision.principal, "alice");
        assert_eq!(decision.resource, "PUT /imports/uploaded/items.csv");
    }

    #[test]
    fn scheme_token_is_case_insensitive() {
        let payload = general_purpose::STANDARD.encode("alice:secret");
        for scheme in ["basic", "BASIC", "bAsIc"] {
            let decision = gate()
                .authorize(&format!("{scheme} {payload}"), "PUT /x")
                .unwrap();
            assert_eq!(decision.effect, Effect::Allow);
        }
    }

    #[test]
    fn wrong_password_denies() {
        let decision = gate().authorize(&basic("alice:wrong"), "PUT /x").unwrap();
        assert_eq!(decision.effect, Effect::Deny);
    }

    #[test]
    fn unknown_user_denies() {
        let decision = gate().authorize(&basic("mallory:secret"), "PUT /x").unwrap();
        assert_eq!(decision.effect, Effect::Deny);
    }

    #[test]
    fn missing_scheme_is_malformed_not_deny() {
        let payload = general_purpose::STANDARD.encode("alice:secret");
        assert_eq!(
            gate().authorize(&payload, "PUT /x").unwrap_err(),
            GateError::WrongScheme
        );
        assert_eq!(
            gate().authorize("Bearer abc", "PUT /x").unwrap_err(),
            GateError::WrongScheme
        );
    }

    #[test]
    fn undecodable_payload_is_malformed() {
        assert_eq!(
            gate().authorize("Basic %%%not-base64%%%", "PUT /x").unwrap_err(),
            GateError::UndecodablePayload
        );
    }

    #[test]
    fn payload_without_separator_is_malformed() {
        let header = format!("Basic {}", general_purpose::STANDARD.encode("nocolon"));
        assert_eq!(
            gate().authorize(&header, "PUT /x").unwrap_err(),
            GateError::MissingSeparator
        );
    }

    #[test]
    fn password_may_itself_contain_colons() {
        let gate = AccessGate::new(HashMap::from([("bob".to_string(), "a:b:c".to_string())]));
        let decision = gate.authorize(&basic("bob:a:b:c"), "GET /x").unwrap();
        assert_eq!(decision.effect, Effect::Allow);
    }
}

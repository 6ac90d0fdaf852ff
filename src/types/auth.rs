//! Handshake state for the gateway connection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A resource allowance declared during authentication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allowance {
    pub asset: String,
    pub amount: String,
}

/// Per-connection authentication state.
///
/// Built once per connection attempt and discarded on disconnect; the
/// granted session key is filled in when the gateway confirms the
/// signed challenge response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    /// Participant (wallet) address
    pub address: String,
    /// Ephemeral session key; defaults to the participant address
    pub session_key: String,
    /// Application identifier presented to the gateway
    pub app_name: String,
    /// Scope string granted sessions are bound to
    pub scope: String,
    /// Absolute expiry of the requested session
    pub expire: DateTime<Utc>,
    /// Declared resource allowances
    pub allowances: Vec<Allowance>,
}

impl AuthContext {
    /// Build the context for a fresh connection attempt.
    pub fn new(
        address: String,
        session_key: Option<String>,
        app_name: String,
        scope: String,
        ttl: chrono::Duration,
        allowances: Vec<Allowance>,
    ) -> Self {
        let session_key = session_key.unwrap_or_else(|| address.clone());
        Self {
            address,
            session_key,
            app_name,
            scope,
            expire: Utc::now() + ttl,
            allowances,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_defaults_to_address() {
        let ctx = AuthContext::new(
            "0xabc".to_string(),
            None,
            "statefeed".to_string(),
            "console".to_string(),
            chrono::Duration::seconds(300),
            vec![],
        );
        assert_eq!(ctx.session_key, "0xabc");
    }

    #[test]
    fn test_explicit_session_key_kept() {
        let ctx = AuthContext::new(
            "0xabc".to_string(),
            Some("0xsession".to_string()),
            "statefeed".to_string(),
            "console".to_string(),
            chrono::Duration::seconds(300),
            vec![],
        );
        assert_eq!(ctx.session_key, "0xsession");
    }
}

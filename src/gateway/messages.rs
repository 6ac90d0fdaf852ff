//! Inbound frame classification
//!
//! The gateway has shipped several spellings for the same logical
//! concepts over its lifetime. All of that tolerance is concentrated
//! here; the rest of the crate only ever sees the canonical
//! [`Inbound`] shapes.

use serde_json::Value;

/// Canonical form of one inbound gateway frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Auth challenge carrying the string to sign
    Challenge { challenge: String },
    /// A challenge frame with no recognizable challenge string
    ChallengeUnreadable,
    /// Result of the signed challenge response
    AuthResult {
        success: bool,
        session_key: Option<String>,
        token: Option<String>,
    },
    /// One entity changed
    SingleUpdate(Value),
    /// A list of entities changed together
    BatchUpdate(Vec<Value>),
    /// A list of unrelated balance-style records changed
    AggregateUpdate(Vec<Value>),
    /// Gateway-reported error
    GatewayError(Value),
    /// Application-level liveness probe
    Ping,
    Pong,
    /// Recognized as JSON but not as any known kind
    Unknown(String),
}

/// Field names historically used for the challenge string
const CHALLENGE_FIELDS: [&str; 3] = ["challenge", "challenge_message", "challengeMessage"];

/// Classify one text frame. `None` means the frame is not JSON at all
/// (transport-level noise) and should be dropped without comment.
pub fn classify(text: &str) -> Option<Inbound> {
    let value: Value = serde_json::from_str(text).ok()?;
    let kind = message_kind(&value);
    let body = message_body(&value);

    let inbound = match kind.as_deref() {
        Some("auth_challenge") | Some("challenge") => classify_challenge(body),
        Some("auth_result") | Some("auth_response") | Some("auth_verify") => {
            classify_auth_result(body)
        }
        Some("channel_update") | Some("cu") => Inbound::SingleUpdate(body.clone()),
        Some("channels_update") | Some("channel_batch_update") => {
            Inbound::BatchUpdate(list_field(body, &["channels", "channel_updates"]))
        }
        Some("balance_update") | Some("balances_update") | Some("bu") => {
            Inbound::AggregateUpdate(list_field(body, &["balances", "balance_updates"]))
        }
        Some("error") => Inbound::GatewayError(body.clone()),
        Some("ping") => Inbound::Ping,
        Some("pong") => Inbound::Pong,
        Some(other) => Inbound::Unknown(other.to_string()),
        None => {
            // No type field; an error-shaped object is still routable.
            if let Some(err) = value.get("error") {
                Inbound::GatewayError(err.clone())
            } else {
                Inbound::Unknown("<untyped>".to_string())
            }
        }
    };
    Some(inbound)
}

fn classify_challenge(body: &Value) -> Inbound {
    for field in CHALLENGE_FIELDS {
        if let Some(challenge) = body.get(field).and_then(Value::as_str) {
            if !challenge.is_empty() {
                return Inbound::Challenge {
                    challenge: challenge.to_string(),
                };
            }
        }
    }
    Inbound::ChallengeUnreadable
}

fn classify_auth_result(body: &Value) -> Inbound {
    let success = body.get("success").and_then(Value::as_bool).unwrap_or(false);
    let session_key = string_field(body, &["sessionKey", "session_key"]);
    let token = string_field(body, &["token", "jwt"]);
    Inbound::AuthResult {
        success,
        session_key,
        token,
    }
}

/// The message kind, under `type` or the older `method` spelling
fn message_kind(value: &Value) -> Option<String> {
    value
        .get("type")
        .or_else(|| value.get("method"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// The substantive body: `params` or `data` when present, otherwise the
/// frame itself.
fn message_body(value: &Value) -> &Value {
    value
        .get("params")
        .or_else(|| value.get("data"))
        .filter(|body| body.is_object() || body.is_array())
        .unwrap_or(value)
}

fn list_field(body: &Value, fields: &[&str]) -> Vec<Value> {
    for field in fields {
        if let Some(list) = body.get(*field).and_then(Value::as_array) {
            return list.clone();
        }
    }
    // A bare array body is the list itself
    body.as_array().cloned().unwrap_or_default()
}

fn string_field(body: &Value, fields: &[&str]) -> Option<String> {
    fields
        .iter()
        .find_map(|field| body.get(*field).and_then(Value::as_str))
        .map(str::to_string)
}

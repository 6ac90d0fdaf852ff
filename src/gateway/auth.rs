//! Challenge/response authentication
//!
//! Builds the outbound auth request, and on challenge receipt signs a
//! structured payload binding the session parameters to the challenge
//! string so the gateway can verify the response against the declared
//! wallet.

use ed25519_dalek::{Signer as DalekSigner, SigningKey, VerifyingKey};
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::types::AuthContext;

/// Signing capability used for the challenge response. A seam so tests
/// (and alternative key schemes) can substitute their own.
pub trait Signer: Send + Sync {
    /// Wallet address the signature is attributed to
    fn address(&self) -> String;
    /// Sign an opaque message, returning raw signature bytes
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;
}

/// Ed25519 signer seeded from a hex-encoded 32-byte key
pub struct Ed25519Signer {
    key: SigningKey,
    address: String,
}

impl Ed25519Signer {
    pub fn from_hex(seed_hex: &str) -> Result<Self> {
        let seed = hex::decode(seed_hex.trim_start_matches("0x"))
            .map_err(|err| Error::Signer(format!("invalid key hex: {err}")))?;
        let seed: [u8; 32] = seed
            .try_into()
            .map_err(|_| Error::Signer("signing key must be 32 bytes".to_string()))?;
        let key = SigningKey::from_bytes(&seed);
        let address = derive_address(&key.verifying_key());
        Ok(Self { key, address })
    }
}

impl Signer for Ed25519Signer {
    fn address(&self) -> String {
        self.address.clone()
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(self.key.sign(message).to_bytes().to_vec())
    }
}

fn derive_address(key: &VerifyingKey) -> String {
    format!("0x{}", hex::encode(key.to_bytes()))
}

/// Structured message signed in response to a challenge. Field order is
/// fixed by this struct, which is what makes the signature reproducible
/// on the verifying side.
#[derive(Debug, Serialize)]
struct ChallengeBinding<'a> {
    scope: &'a str,
    application: &'a str,
    participant: &'a str,
    expire: chrono::DateTime<chrono::Utc>,
    allowances: &'a [crate::types::Allowance],
    challenge: &'a str,
    wallet: String,
}

/// The initial frame sent as soon as the transport opens
pub fn auth_request(ctx: &AuthContext) -> Value {
    json!({
        "type": "auth_request",
        "params": {
            "address": ctx.address,
            "sessionKey": ctx.session_key,
            "appName": ctx.app_name,
            "allowances": ctx.allowances,
            "expire": ctx.expire,
            "scope": ctx.scope,
        }
    })
}

/// Sign the challenge and build the response frame
pub fn challenge_response(
    ctx: &AuthContext,
    challenge: &str,
    signer: &dyn Signer,
) -> Result<Value> {
    let binding = ChallengeBinding {
        scope: &ctx.scope,
        application: &ctx.app_name,
        participant: &ctx.address,
        expire: ctx.expire,
        allowances: &ctx.allowances,
        challenge,
        wallet: signer.address(),
    };
    let message = serde_json::to_vec(&binding)?;
    let signature = signer.sign(&message)?;

    Ok(json!({
        "type": "auth_verify",
        "params": {
            "challenge": challenge,
            "signature": format!("0x{}", hex::encode(signature)),
            "address": ctx.address,
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::Verifier;

    const TEST_SEED: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";

    fn test_context() -> AuthContext {
        AuthContext::new(
            "0xparticipant".to_string(),
            None,
            "statefeed".to_string(),
            "console".to_string(),
            chrono::Duration::seconds(300),
            vec![],
        )
    }

    #[test]
    fn test_signer_rejects_bad_hex() {
        assert!(Ed25519Signer::from_hex("zz").is_err());
        assert!(Ed25519Signer::from_hex("abcd").is_err()); // wrong length
    }

    #[test]
    fn test_signer_accepts_0x_prefix() {
        let plain = Ed25519Signer::from_hex(TEST_SEED).unwrap();
        let prefixed = Ed25519Signer::from_hex(&format!("0x{TEST_SEED}")).unwrap();
        assert_eq!(plain.address(), prefixed.address());
    }

    #[test]
    fn test_signature_verifies() {
        let signer = Ed25519Signer::from_hex(TEST_SEED).unwrap();
        let sig = signer.sign(b"challenge-bytes").unwrap();

        let key = SigningKey::from_bytes(
            &hex::decode(TEST_SEED).unwrap().try_into().unwrap(),
        );
        let signature = ed25519_dalek::Signature::from_slice(&sig).unwrap();
        key.verifying_key()
            .verify(b"challenge-bytes", &signature)
            .unwrap();
    }

    #[test]
    fn test_auth_request_shape() {
        let ctx = test_context();
        let frame = auth_request(&ctx);
        assert_eq!(frame["type"], "auth_request");
        assert_eq!(frame["params"]["address"], "0xparticipant");
        assert_eq!(frame["params"]["sessionKey"], "0xparticipant");
        assert_eq!(frame["params"]["scope"], "console");
    }

    #[test]
    fn test_challenge_response_binds_challenge() {
        let ctx = test_context();
        let signer = Ed25519Signer::from_hex(TEST_SEED).unwrap();
        let frame = challenge_response(&ctx, "nonce-7", &signer).unwrap();

        assert_eq!(frame["type"], "auth_verify");
        assert_eq!(frame["params"]["challenge"], "nonce-7");
        let sig = frame["params"]["signature"].as_str().unwrap();
        assert!(sig.starts_with("0x"));
        assert_eq!(sig.len(), 2 + 128); // 64-byte ed25519 signature
    }

    #[test]
    fn test_different_challenges_sign_differently() {
        let ctx = test_context();
        let signer = Ed25519Signer::from_hex(TEST_SEED).unwrap();
        let a = challenge_response(&ctx, "nonce-a", &signer).unwrap();
        let b = challenge_response(&ctx, "nonce-b", &signer).unwrap();
        assert_ne!(a["params"]["signature"], b["params"]["signature"]);
    }
}

//! Signed tokens for the confirm/cancel links.
//!
//! A token is `base64url(payload) "." base64url(HMAC-SHA256(key, base64url(payload)))`
//! where the payload is the JSON object `{"meeting_id", "action", "issued_at"}`.
//! Tokens carry no expiry: whether one still does anything is decided by the
//! meeting's current status.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use meetconfirm_core::UserAction;

use crate::error::{SecretError, TokenError};

type HmacSha256 = Hmac<Sha256>;

/// The fields a token binds together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub meeting_id: String,
    pub action: UserAction,
    pub issued_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct WirePayload {
    meeting_id: String,
    action: String,
    issued_at: i64,
}

/// Stateless signer/verifier holding one active key.
#[derive(Clone)]
pub struct TokenCodec {
    mac: HmacSha256,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec").finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(key: &[u8]) -> Result<Self, SecretError> {
        if key.is_empty() {
            return Err(SecretError::Empty("signing key".to_string()));
        }
        let mac = HmacSha256::new_from_slice(key)
            .map_err(|e| SecretError::Unreadable(format!("unusable signing key: {}", e)))?;
        Ok(Self { mac })
    }

    /// Issue a token for `action` on `meeting_id`.
    pub fn issue(&self, meeting_id: &str, action: UserAction, issued_at: DateTime<Utc>) -> String {
        let payload = WirePayload {
            meeting_id: meeting_id.to_string(),
            action: action.as_str().to_string(),
            issued_at: issued_at.timestamp(),
        };
        // Serializing a struct of strings and an integer cannot fail.
        let json = serde_json::to_vec(&payload).unwrap_or_default();
        let encoded = URL_SAFE_NO_PAD.encode(json);
        let signature = URL_SAFE_NO_PAD.encode(self.sign(&encoded));
        format!("{}.{}", encoded, signature)
    }

    /// Check that `token` was issued by this key for exactly this meeting and action.
    pub fn verify(
        &self,
        token: &str,
        meeting_id: &str,
        action: UserAction,
    ) -> Result<TokenClaims, TokenError> {
        let (encoded, signature) = token
            .split_once('.')
            .ok_or_else(|| TokenError::Malformed("missing signature separator".to_string()))?;
        if encoded.is_empty() || signature.is_empty() || signature.contains('.') {
            return Err(TokenError::Malformed("unexpected token shape".to_string()));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|e| TokenError::Malformed(format!("signature encoding: {}", e)))?;
        let mut mac = self.mac.clone();
        mac.update(encoded.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let json = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| TokenError::Malformed(format!("payload encoding: {}", e)))?;
        let payload: WirePayload = serde_json::from_slice(&json)
            .map_err(|e| TokenError::Malformed(format!("payload: {}", e)))?;

        let issued_action: UserAction = payload
            .action
            .parse()
            .map_err(|_| TokenError::UnknownAction(payload.action.clone()))?;
        if payload.meeting_id != meeting_id {
            return Err(TokenError::MeetingMismatch);
        }
        if issued_action != action {
            return Err(TokenError::ActionMismatch {
                issued: issued_action,
                attempted: action,
            });
        }
        let issued_at = Utc
            .timestamp_opt(payload.issued_at, 0)
            .single()
            .ok_or_else(|| TokenError::Malformed("issued_at out of range".to_string()))?;

        Ok(TokenClaims {
            meeting_id: payload.meeting_id,
            action: issued_action,
            issued_at,
        })
    }

    fn sign(&self, encoded_payload: &str) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(encoded_payload.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

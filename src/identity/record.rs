//! Router info: the signed public descriptor of this router.
//!
//! Stored as JSON: `{ "body": { … }, "signature": "<hex>" }`. The signature is
//! ed25519 over the compact JSON encoding of `body`; field order is fixed by
//! the struct and `options` is a `BTreeMap`, so re-encoding is stable.

use std::collections::BTreeMap;

use ed25519_dalek::{Signature, Signer, Verifier};
use serde::{Deserialize, Serialize};

use crate::error::IdentityError;
use super::keys::{
    EncryptionPublicKey, KeyBundle, SigningPrivateKey, SigningPublicKey, ENCRYPTION_KEY_LEN,
    SIGNING_PUBLIC_KEY_LEN,
};

/// One way to reach the router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterAddress {
    /// Transport style, e.g. `"NTCP"` or `"SSU"`.
    pub transport: String,
    pub host: String,
    pub port: u16,
    pub cost: u8,
}

/// Signed fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterInfoBody {
    /// Unix milliseconds.
    pub published_ms: i64,
    /// Hex of the 256-byte encryption public key.
    pub encryption_key: String,
    /// Hex of the 32-byte ed25519 verifying key.
    pub signing_key: String,
    #[serde(default)]
    pub addresses: Vec<RouterAddress>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl RouterInfoBody {
    fn signed_bytes(&self) -> Result<Vec<u8>, IdentityError> {
        serde_json::to_vec(self).map_err(|e| IdentityError::Format(format!("encode router info: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterInfo {
    pub body: RouterInfoBody,
    /// Hex of the 64-byte ed25519 signature.
    pub signature: String,
}

impl RouterInfo {
    /// Build and sign a fresh record for `bundle`.
    pub fn build(
        bundle: &KeyBundle,
        addresses: Vec<RouterAddress>,
        options: BTreeMap<String, String>,
        published_ms: i64,
    ) -> Result<Self, IdentityError> {
        let body = RouterInfoBody {
            published_ms,
            encryption_key: hex::encode(bundle.encryption_public.as_bytes()),
            signing_key: hex::encode(bundle.signing_public.to_bytes()),
            addresses,
            options,
        };
        Self::sign(body, &bundle.signing_private)
    }

    pub fn sign(body: RouterInfoBody, key: &SigningPrivateKey) -> Result<Self, IdentityError> {
        let sig = key.to_signing_key().sign(&body.signed_bytes()?);
        Ok(Self { body, signature: hex::encode(sig.to_bytes()) })
    }

    /// Same record with a new publication time, re-signed.
    pub fn republished(&self, published_ms: i64, key: &SigningPrivateKey) -> Result<Self, IdentityError> {
        let mut body = self.body.clone();
        body.published_ms = published_ms;
        Self::sign(body, key)
    }

    /// `true` only if the embedded signature verifies against the embedded
    /// signing key. Never errors.
    pub fn verify_signature(&self) -> bool {
        let Ok(signing_key) = self.signing_public_key() else {
            return false;
        };
        let Some(sig) = hex::decode(&self.signature)
            .ok()
            .and_then(|b| <[u8; 64]>::try_from(b.as_slice()).ok())
        else {
            return false;
        };
        let Ok(msg) = self.body.signed_bytes() else {
            return false;
        };
        signing_key
            .verifying_key()
            .verify(&msg, &Signature::from_bytes(&sig))
            .is_ok()
    }

    pub fn signing_public_key(&self) -> Result<SigningPublicKey, IdentityError> {
        let bytes: [u8; SIGNING_PUBLIC_KEY_LEN] = decode_hex_array(&self.body.signing_key, "signing key")?;
        SigningPublicKey::from_bytes(&bytes)
    }

    pub fn encryption_public_key(&self) -> Result<EncryptionPublicKey, IdentityError> {
        let bytes: [u8; ENCRYPTION_KEY_LEN] = decode_hex_array(&self.body.encryption_key, "encryption key")?;
        Ok(EncryptionPublicKey::from_bytes(bytes))
    }

    /// Whether the public keys published here are the ones in `bundle`.
    /// Compares decoded key bytes, so hex case does not matter.
    pub fn matches_bundle(&self, bundle: &KeyBundle) -> bool {
        self.signing_public_key().is_ok_and(|k| k == bundle.signing_public)
            && self.encryption_public_key().is_ok_and(|k| k == bundle.encryption_public)
    }

    pub fn addresses(&self) -> &[RouterAddress] {
        &self.body.addresses
    }

    pub fn published_ms(&self) -> i64 {
        self.body.published_ms
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, IdentityError> {
        serde_json::to_vec_pretty(self).map_err(|e| IdentityError::Format(format!("encode router info: {e}")))
    }
}

/// Decode a stored record. Does not check the signature.
pub fn decode_record(bytes: &[u8]) -> Result<RouterInfo, IdentityError> {
    serde_json::from_slice(bytes).map_err(|e| IdentityError::Format(format!("router info: {e}")))
}

fn decode_hex_array<const N: usize>(s: &str, what: &str) -> Result<[u8; N], IdentityError> {
    let bytes = hex::decode(s).map_err(|e| IdentityError::Format(format!("{what}: {e}")))?;
    <[u8; N]>::try_from(bytes.as_slice())
        .map_err(|_| IdentityError::Format(format!("{what}: expected {N} bytes, got {}", bytes.len())))
}

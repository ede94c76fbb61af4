//! Router key material and the key-bundle file codec.
//!
//! The bundle is a plain concatenation of four fixed-length keys, always in
//! this order:
//! ```text
//! encryption private key   256 bytes  (ElGamal exponent, big-endian)
//! signing private key       32 bytes  (ed25519 seed)
//! encryption public key    256 bytes  (ElGamal g^x mod p, big-endian)
//! signing public key        32 bytes  (ed25519 verifying key)
//! ```
//! There is no framing or checksum. A bundle is accepted whole or not at all.

use std::{fmt, io::Read};

use ed25519_dalek::{SigningKey, VerifyingKey};

use crate::error::IdentityError;
use super::{policy::ExponentPolicy, store::ArtifactKind};

pub const ENCRYPTION_KEY_LEN: usize = 256;
pub const SIGNING_PRIVATE_KEY_LEN: usize = 32;
pub const SIGNING_PUBLIC_KEY_LEN: usize = 32;

/// Number of leading bytes inspected by the migration marker.
const MARKER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    EncryptionPrivate,
    SigningPrivate,
    EncryptionPublic,
    SigningPublic,
}

impl KeyKind {
    /// Order of the keys inside the bundle file.
    pub const BUNDLE_ORDER: [KeyKind; 4] = [
        KeyKind::EncryptionPrivate,
        KeyKind::SigningPrivate,
        KeyKind::EncryptionPublic,
        KeyKind::SigningPublic,
    ];

    pub fn byte_len(self) -> usize {
        match self {
            KeyKind::EncryptionPrivate | KeyKind::EncryptionPublic => ENCRYPTION_KEY_LEN,
            KeyKind::SigningPrivate => SIGNING_PRIVATE_KEY_LEN,
            KeyKind::SigningPublic => SIGNING_PUBLIC_KEY_LEN,
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeyKind::EncryptionPrivate => "encryption private key",
            KeyKind::SigningPrivate => "signing private key",
            KeyKind::EncryptionPublic => "encryption public key",
            KeyKind::SigningPublic => "signing public key",
        };
        f.write_str(s)
    }
}

/// Total size of a well-formed bundle file.
pub fn bundle_len() -> usize {
    KeyKind::BUNDLE_ORDER.iter().map(|k| k.byte_len()).sum()
}

fn read_key<const N: usize>(reader: &mut dyn Read, kind: KeyKind) -> Result<[u8; N], IdentityError> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => IdentityError::Format(format!("{kind} truncated")),
        _ => IdentityError::from_io(ArtifactKind::Keys, e),
    })?;
    Ok(buf)
}

// ── key types ────────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionPrivateKey([u8; ENCRYPTION_KEY_LEN]);

impl EncryptionPrivateKey {
    pub fn from_bytes(bytes: [u8; ENCRYPTION_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ENCRYPTION_KEY_LEN] {
        &self.0
    }

    /// Migration marker: a long-exponent key has a non-zero byte somewhere in
    /// its first eight bytes.
    pub fn has_long_exponent(&self) -> bool {
        self.0[..MARKER_LEN].iter().any(|b| *b != 0)
    }

    /// The policy that must have produced this key.
    pub fn exponent_policy(&self) -> ExponentPolicy {
        if self.has_long_exponent() {
            ExponentPolicy::Long
        } else {
            ExponentPolicy::Short
        }
    }
}

impl fmt::Debug for EncryptionPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionPrivateKey({} exponent, redacted)", self.exponent_policy())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct SigningPrivateKey([u8; SIGNING_PRIVATE_KEY_LEN]);

impl SigningPrivateKey {
    pub fn from_bytes(bytes: [u8; SIGNING_PRIVATE_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNING_PRIVATE_KEY_LEN] {
        &self.0
    }

    pub fn to_signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.0)
    }
}

impl fmt::Debug for SigningPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningPrivateKey(redacted)")
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionPublicKey([u8; ENCRYPTION_KEY_LEN]);

impl EncryptionPublicKey {
    pub fn from_bytes(bytes: [u8; ENCRYPTION_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ENCRYPTION_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for EncryptionPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionPublicKey({}…)", hex::encode(&self.0[..8]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigningPublicKey(VerifyingKey);

impl SigningPublicKey {
    /// Fails if the bytes are not a valid curve point.
    pub fn from_bytes(bytes: &[u8; SIGNING_PUBLIC_KEY_LEN]) -> Result<Self, IdentityError> {
        VerifyingKey::from_bytes(bytes)
            .map(Self)
            .map_err(|e| IdentityError::Format(format!("signing public key: {e}")))
    }

    pub fn to_bytes(&self) -> [u8; SIGNING_PUBLIC_KEY_LEN] {
        self.0.to_bytes()
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.0
    }
}

impl From<VerifyingKey> for SigningPublicKey {
    fn from(vk: VerifyingKey) -> Self {
        Self(vk)
    }
}

// ── bundle ───────────────────────────────────────────────────────────────────

/// The four keys that pair with a router info record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBundle {
    pub encryption_private: EncryptionPrivateKey,
    pub signing_private: SigningPrivateKey,
    pub encryption_public: EncryptionPublicKey,
    pub signing_public: SigningPublicKey,
}

impl KeyBundle {
    /// Decode a bundle, consuming the keys strictly in file order.
    ///
    /// Any short read, trailing data, invalid curve point or a signing public
    /// key that does not belong to the signing seed rejects the whole bundle.
    pub fn read_from(reader: &mut dyn Read) -> Result<Self, IdentityError> {
        let encryption_private =
            EncryptionPrivateKey(read_key::<ENCRYPTION_KEY_LEN>(reader, KeyKind::EncryptionPrivate)?);
        let signing_private =
            SigningPrivateKey(read_key::<SIGNING_PRIVATE_KEY_LEN>(reader, KeyKind::SigningPrivate)?);
        let encryption_public =
            EncryptionPublicKey(read_key::<ENCRYPTION_KEY_LEN>(reader, KeyKind::EncryptionPublic)?);
        let signing_public = SigningPublicKey::from_bytes(&read_key::<SIGNING_PUBLIC_KEY_LEN>(
            reader,
            KeyKind::SigningPublic,
        )?)?;

        let mut probe = [0u8; 1];
        match reader.read(&mut probe) {
            Ok(0) => {}
            Ok(_) => return Err(IdentityError::Format("trailing bytes after signing public key".into())),
            Err(e) => return Err(IdentityError::from_io(ArtifactKind::Keys, e)),
        }

        let derived = signing_private.to_signing_key().verifying_key();
        if &derived != signing_public.verifying_key() {
            return Err(IdentityError::Format(
                "signing public key does not match signing private key".into(),
            ));
        }

        Ok(Self { encryption_private, signing_private, encryption_public, signing_public })
    }

    /// Encode in bundle order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(bundle_len());
        out.extend_from_slice(self.encryption_private.as_bytes());
        out.extend_from_slice(self.signing_private.as_bytes());
        out.extend_from_slice(self.encryption_public.as_bytes());
        out.extend_from_slice(&self.signing_public.to_bytes());
        out
    }
}

//! Key generation for a fresh router identity.
//!
//! Signing keys are ed25519. Encryption keys are ElGamal over the 2048-bit
//! MODP group of RFC 3526 (generator 2). The exponent policy decides how many
//! bits the private exponent gets:
//!
//! - **long**: a full-width 2047-bit exponent; the high bytes are non-zero.
//! - **short**: a 226-bit exponent; the first 227 bytes are zero.

use ed25519_dalek::SigningKey;
use num_bigint::BigUint;
use rand_core::{OsRng, RngCore};

use crate::error::AppError;
use super::{
    keys::{EncryptionPrivateKey, EncryptionPublicKey, KeyBundle, SigningPrivateKey, ENCRYPTION_KEY_LEN},
    policy::ExponentPolicy,
};

const MODP_2048_PRIME: &str = "\
    FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1\
    29024E088A67CC74020BBEA63B139B22514A08798E3404DD\
    EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245\
    E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
    EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D\
    C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F\
    83655D23DCA3AD961C62F356208552BB9ED529077096966D\
    670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
    E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9\
    DE2BCBF6955817183995497CEA956AE515D2261898FA0510\
    15728E5A8AACAA68FFFFFFFFFFFFFFFF";

const GENERATOR: u32 = 2;

/// Bits in a short exponent.
const SHORT_EXPONENT_BITS: usize = 226;

/// Produces a complete, internally consistent key bundle.
pub trait KeyGenerator: Send + Sync {
    fn generate(&self, policy: ExponentPolicy) -> Result<KeyBundle, AppError>;
}

pub struct ElGamalKeyGenerator {
    prime: BigUint,
    generator: BigUint,
}

impl ElGamalKeyGenerator {
    pub fn new() -> Result<Self, AppError> {
        let prime = BigUint::parse_bytes(MODP_2048_PRIME.as_bytes(), 16)
            .ok_or_else(|| AppError::Identity("invalid MODP prime constant".into()))?;
        Ok(Self { prime, generator: BigUint::from(GENERATOR) })
    }

    fn exponent(policy: ExponentPolicy) -> [u8; ENCRYPTION_KEY_LEN] {
        let mut x = [0u8; ENCRYPTION_KEY_LEN];
        match policy {
            ExponentPolicy::Long => {
                OsRng.fill_bytes(&mut x);
                // Below 2^2047 keeps x < p - 1; bit 2046 keeps the marker set.
                x[0] = (x[0] & 0x7f) | 0x40;
            }
            ExponentPolicy::Short => {
                let nbytes = SHORT_EXPONENT_BITS.div_ceil(8);
                let start = ENCRYPTION_KEY_LEN - nbytes;
                OsRng.fill_bytes(&mut x[start..]);
                let top_bits = SHORT_EXPONENT_BITS - (nbytes - 1) * 8;
                x[start] &= (1u8 << top_bits) - 1;
                x[start] |= 1u8 << (top_bits - 1);
            }
        }
        x
    }

    fn public_for(&self, exponent: &[u8; ENCRYPTION_KEY_LEN]) -> [u8; ENCRYPTION_KEY_LEN] {
        let x = BigUint::from_bytes_be(exponent);
        let y = self.generator.modpow(&x, &self.prime).to_bytes_be();
        let mut out = [0u8; ENCRYPTION_KEY_LEN];
        out[ENCRYPTION_KEY_LEN - y.len()..].copy_from_slice(&y);
        out
    }
}

impl KeyGenerator for ElGamalKeyGenerator {
    fn generate(&self, policy: ExponentPolicy) -> Result<KeyBundle, AppError> {
        let x = Self::exponent(policy);
        let y = self.public_for(&x);
        let signing = SigningKey::generate(&mut OsRng);
        Ok(KeyBundle {
            encryption_private: EncryptionPrivateKey::from_bytes(x),
            signing_private: SigningPrivateKey::from_bytes(signing.to_bytes()),
            encryption_public: EncryptionPublicKey::from_bytes(y),
            signing_public: signing.verifying_key().into(),
        })
    }
}

//! Router identity: the signed router info plus the key bundle that backs it.
//!
//! - **keys**: the four key types and the bundle file codec.
//! - **record**: the signed router info record.
//! - **store**: byte access to the two persisted files.
//! - **policy**: exponent-length policy and its provider.
//! - **keygen**: fresh key material for a rebuild.

pub mod keygen;
pub mod keys;
pub mod policy;
pub mod record;
pub mod store;

use sha2::{Digest, Sha256};

use keys::KeyBundle;
use record::RouterInfo;

/// A validated identity: the record verifies and publishes the bundle's
/// public keys.
#[derive(Debug, Clone)]
pub struct RouterIdentity {
    pub info: RouterInfo,
    pub keys: KeyBundle,
}

impl RouterIdentity {
    /// Hex `SHA256(encryption_public || signing_public)`.
    pub fn router_hash(&self) -> String {
        let mut h = Sha256::new();
        h.update(self.keys.encryption_public.as_bytes());
        h.update(self.keys.signing_public.to_bytes());
        hex::encode(h.finalize())
    }

    /// First 8 hex chars of [`router_hash`](Self::router_hash), for logs.
    pub fn short_hash(&self) -> String {
        self.router_hash()[..8].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::keys::tests::sample_bundle;
    use crate::identity::policy::ExponentPolicy;

    #[test]
    fn router_hash_is_stable_and_key_dependent() {
        let keys = sample_bundle(ExponentPolicy::Long);
        let info = RouterInfo::build(&keys, vec![], Default::default(), 0).unwrap();
        let a = RouterIdentity { info: info.clone(), keys: keys.clone() };
        let b = RouterIdentity { info, keys };
        assert_eq!(a.router_hash(), b.router_hash());
        assert_eq!(a.router_hash().len(), 64);
        assert_eq!(a.short_hash().len(), 8);

        let other_keys = sample_bundle(ExponentPolicy::Long);
        let other_info = RouterInfo::build(&other_keys, vec![], Default::default(), 0).unwrap();
        let c = RouterIdentity { info: other_info, keys: other_keys };
        assert_ne!(a.router_hash(), c.router_hash());
    }
}

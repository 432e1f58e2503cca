use std::fmt;

use super::{KeyHandle, Signer, container_path};
use crate::acl::{AclUtility, set_acl};
use crate::blob::decode_ecdsa_public_blob;
use crate::error::Result;
use crate::ncrypt::{self, HashAlgorithm};
use crate::provider::{KeyStorageProvider, flags};
use crate::public_key::{EcdsaPublicKey, PublicKey};

/// ECDSA key held by a key storage provider. Signing only.
pub struct EcdsaKey<K: KeyStorageProvider> {
    handle: KeyHandle<K>,
    public: EcdsaPublicKey,
    container: String,
}

impl<K: KeyStorageProvider> EcdsaKey<K> {
    pub(super) fn load(handle: KeyHandle<K>, software_root: Option<&str>) -> Result<Self> {
        // The provider reports the curve as its bit length.
        let curve_bits =
            ncrypt::u32_property(handle.provider(), handle.raw(), flags::PROPERTY_LENGTH)?;
        let blob = ncrypt::export_key(handle.provider(), handle.raw(), flags::ECC_PUBLIC_BLOB)?;
        let public = decode_ecdsa_public_blob(&blob, curve_bits)?;
        let container = container_path(&handle, software_root)?;
        Ok(Self {
            handle,
            public,
            container,
        })
    }

    pub fn public(&self) -> &EcdsaPublicKey {
        &self.public
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn set_acl(
        &self,
        acl: &dyn AclUtility,
        access: &str,
        principal: &str,
        permission: &str,
    ) -> Result<()> {
        set_acl(acl, &self.container, access, principal, permission)
    }
}

impl<K: KeyStorageProvider> Signer for EcdsaKey<K> {
    fn public_key(&self) -> PublicKey {
        PublicKey::Ecdsa(self.public.clone())
    }

    fn sign(&self, digest: &[u8], hash: HashAlgorithm) -> Result<Vec<u8>> {
        ncrypt::sign_ecdsa(self.handle.provider(), self.handle.raw(), digest, hash)
    }

    fn algorithm(&self) -> &str {
        flags::ALGORITHM_GROUP_ECDSA
    }
}

impl<K: KeyStorageProvider> fmt::Debug for EcdsaKey<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EcdsaKey")
            .field("container", &self.container)
            .field("curve", &self.public.curve().name())
            .finish()
    }
}

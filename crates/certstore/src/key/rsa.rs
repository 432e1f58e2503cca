use std::fmt;

use super::{Decrypter, KeyHandle, Signer, container_path};
use crate::acl::{AclUtility, set_acl};
use crate::blob::decode_rsa_public_blob;
use crate::error::Result;
use crate::ncrypt::{self, DecrypterOptions, HashAlgorithm};
use crate::provider::{KeyStorageProvider, flags};
use crate::public_key::{PublicKey, RsaPublicKey};

/// RSA key held by a key storage provider.
///
/// Signs with PKCS#1 v1.5 padding and decrypts with the padding mode the
/// caller selects through [`DecrypterOptions::flags`].
pub struct RsaKey<K: KeyStorageProvider> {
    handle: KeyHandle<K>,
    public: RsaPublicKey,
    container: String,
}

impl<K: KeyStorageProvider> RsaKey<K> {
    pub(super) fn load(handle: KeyHandle<K>, software_root: Option<&str>) -> Result<Self> {
        let blob = ncrypt::export_key(handle.provider(), handle.raw(), flags::RSA_PUBLIC_BLOB)?;
        let public = decode_rsa_public_blob(&blob)?;
        let container = container_path(&handle, software_root)?;
        Ok(Self {
            handle,
            public,
            container,
        })
    }

    pub fn public(&self) -> &RsaPublicKey {
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

impl<K: KeyStorageProvider> Signer for RsaKey<K> {
    fn public_key(&self) -> PublicKey {
        PublicKey::Rsa(self.public.clone())
    }

    fn sign(&self, digest: &[u8], hash: HashAlgorithm) -> Result<Vec<u8>> {
        ncrypt::sign_rsa(self.handle.provider(), self.handle.raw(), digest, hash)
    }

    fn algorithm(&self) -> &str {
        flags::ALGORITHM_GROUP_RSA
    }
}

impl<K: KeyStorageProvider> Decrypter for RsaKey<K> {
    fn decrypt(&self, ciphertext: &[u8], options: &DecrypterOptions) -> Result<Vec<u8>> {
        ncrypt::decrypt_rsa(self.handle.provider(), self.handle.raw(), ciphertext, options)
    }
}

impl<K: KeyStorageProvider> fmt::Debug for RsaKey<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaKey")
            .field("container", &self.container)
            .field("bits", &self.public.bits())
            .finish()
    }
}

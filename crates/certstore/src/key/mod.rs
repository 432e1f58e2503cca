//! Key handles opened from, or generated in, a key storage provider.
//!
//! The algorithm family of a key is fixed when it is opened and is carried
//! in its type: [`RsaKey`] implements both [`Signer`] and [`Decrypter`],
//! [`EcdsaKey`] only [`Signer`].

mod ecdsa;
mod rsa;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::acl::AclUtility;
use crate::env::software_key_path;
use crate::error::{Error, Result};
use crate::ncrypt::{DecrypterOptions, HashAlgorithm, string_property};
use crate::provider::{KeyStorageProvider, flags};
use crate::public_key::{MAX_RSA_KEY_BITS, PublicKey};

pub use self::ecdsa::EcdsaKey;
pub use self::rsa::RsaKey;

pub trait Signer {
    /// Public half of the key, decoded from the provider's export blob.
    fn public_key(&self) -> PublicKey;

    /// Signs a precomputed digest of `hash`.
    fn sign(&self, digest: &[u8], hash: HashAlgorithm) -> Result<Vec<u8>>;

    /// Algorithm family identifier (e.g. "RSA").
    fn algorithm(&self) -> &str;
}

pub trait Decrypter {
    fn decrypt(&self, ciphertext: &[u8], options: &DecrypterOptions) -> Result<Vec<u8>>;
}

/// Owns a raw provider key handle and frees it when dropped.
///
/// Raw handles are only meaningful inside the process that opened them.
pub struct KeyHandle<K: KeyStorageProvider> {
    provider: Arc<K>,
    raw: Option<K::Key>,
}

impl<K: KeyStorageProvider> KeyHandle<K> {
    pub fn new(provider: Arc<K>, raw: K::Key) -> Self {
        Self {
            provider,
            raw: Some(raw),
        }
    }

    pub fn provider(&self) -> &K {
        &self.provider
    }

    pub fn raw(&self) -> &K::Key {
        self.raw.as_ref().expect("key handle is held until drop")
    }
}

impl<K: KeyStorageProvider> Drop for KeyHandle<K> {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            self.provider.free_key(raw);
        }
    }
}

/// A key of either supported family.
pub enum Key<K: KeyStorageProvider> {
    Rsa(RsaKey<K>),
    Ecdsa(EcdsaKey<K>),
}

impl<K: KeyStorageProvider> Key<K> {
    /// Reads the algorithm group of `handle` and loads the matching variant.
    pub fn from_handle(handle: KeyHandle<K>, software_root: Option<&str>) -> Result<Self> {
        let group = algorithm_group(&handle)?;
        debug!(%group, "loading key");
        match group.as_str() {
            flags::ALGORITHM_GROUP_RSA => Ok(Key::Rsa(RsaKey::load(handle, software_root)?)),
            flags::ALGORITHM_GROUP_ECDSA => {
                Ok(Key::Ecdsa(EcdsaKey::load(handle, software_root)?))
            }
            _ => Err(Error::UnsupportedKeyAlgorithm(group)),
        }
    }

    pub fn container(&self) -> &str {
        match self {
            Key::Rsa(key) => key.container(),
            Key::Ecdsa(key) => key.container(),
        }
    }

    /// The decrypting view of this key, if it has one.
    pub fn as_decrypter(&self) -> Option<&RsaKey<K>> {
        match self {
            Key::Rsa(key) => Some(key),
            Key::Ecdsa(_) => None,
        }
    }

    pub fn set_acl(
        &self,
        acl: &dyn AclUtility,
        access: &str,
        principal: &str,
        permission: &str,
    ) -> Result<()> {
        match self {
            Key::Rsa(key) => key.set_acl(acl, access, principal, permission),
            Key::Ecdsa(key) => key.set_acl(acl, access, principal, permission),
        }
    }
}

impl<K: KeyStorageProvider> Signer for Key<K> {
    fn public_key(&self) -> PublicKey {
        match self {
            Key::Rsa(key) => key.public_key(),
            Key::Ecdsa(key) => key.public_key(),
        }
    }

    fn sign(&self, digest: &[u8], hash: HashAlgorithm) -> Result<Vec<u8>> {
        match self {
            Key::Rsa(key) => key.sign(digest, hash),
            Key::Ecdsa(key) => key.sign(digest, hash),
        }
    }

    fn algorithm(&self) -> &str {
        match self {
            Key::Rsa(key) => key.algorithm(),
            Key::Ecdsa(key) => key.algorithm(),
        }
    }
}

impl<K: KeyStorageProvider> fmt::Debug for Key<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Rsa(key) => f.debug_tuple("Rsa").field(key).finish(),
            Key::Ecdsa(key) => f.debug_tuple("Ecdsa").field(key).finish(),
        }
    }
}

fn algorithm_group<K: KeyStorageProvider>(handle: &KeyHandle<K>) -> Result<String> {
    string_property(handle.provider(), handle.raw(), flags::PROPERTY_ALGORITHM_GROUP)
}

/// Location of the key container. Software provider keys live under the
/// machine data root; anything else keeps the provider's unique name.
fn container_path<K: KeyStorageProvider>(
    handle: &KeyHandle<K>,
    software_root: Option<&str>,
) -> Result<String> {
    let unique_name =
        string_property(handle.provider(), handle.raw(), flags::PROPERTY_UNIQUE_NAME)?;
    Ok(match software_root {
        Some(root) => software_key_path(root, &unique_name),
        None => unique_name,
    })
}

/// Opens `container` as a machine key.
pub(crate) fn open<K: KeyStorageProvider>(
    provider: &Arc<K>,
    container: &str,
    software_root: Option<&str>,
) -> Result<Key<K>> {
    let raw = provider
        .open_key(container, flags::MACHINE_KEY)
        .map_err(|code| {
            if code.is_not_found() {
                Error::NotFound(format!("key container {container}"))
            } else {
                Error::CallFailed {
                    call: "NCryptOpenKey",
                    code,
                }
            }
        })?;
    Key::from_handle(KeyHandle::new(Arc::clone(provider), raw), software_root)
}

/// Creates a persisted RSA machine key in `container`, replacing any key
/// already there, usable for both signing and decryption.
pub(crate) fn generate<K: KeyStorageProvider>(
    provider: &Arc<K>,
    container: &str,
    key_size: u32,
    software_root: Option<&str>,
) -> Result<RsaKey<K>> {
    if key_size > MAX_RSA_KEY_BITS {
        return Err(Error::UnsupportedKeySize(key_size));
    }

    let raw = provider
        .create_persisted_key(
            flags::ALGORITHM_RSA,
            container,
            flags::MACHINE_KEY | flags::OVERWRITE_KEY,
        )
        .map_err(Error::call_failed("NCryptCreatePersistedKey"))?;
    // Dropping the handle on any error below releases the unfinalized key.
    let handle = KeyHandle::new(Arc::clone(provider), raw);

    provider
        .set_property(
            handle.raw(),
            flags::PROPERTY_LENGTH,
            &key_size.to_le_bytes(),
            flags::PERSIST,
        )
        .map_err(Error::call_failed("NCryptSetProperty"))?;
    let usage = flags::ALLOW_DECRYPT | flags::ALLOW_SIGNING;
    provider
        .set_property(
            handle.raw(),
            flags::PROPERTY_KEY_USAGE,
            &usage.to_le_bytes(),
            flags::PERSIST,
        )
        .map_err(Error::call_failed("NCryptSetProperty"))?;
    provider
        .finalize_key(handle.raw())
        .map_err(Error::call_failed("NCryptFinalizeKey"))?;

    let group = algorithm_group(&handle)?;
    if group != flags::ALGORITHM_GROUP_RSA {
        return Err(Error::UnsupportedKeyAlgorithm(group));
    }
    let key = RsaKey::load(handle, software_root)?;
    info!(container = %key.container(), key_size, "generated rsa key");
    Ok(key)
}

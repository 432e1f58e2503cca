use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use p256::ecdsa::signature::hazmat::PrehashSigner;
use rand_chacha::ChaCha20Rng;
use rand_chacha::rand_core::SeedableRng;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Oaep, Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use tracing::debug;

use crate::blob::{encode_ecdsa_public_blob, encode_rsa_public_blob};
use crate::provider::{KeyStorageProvider, Padding, ProviderLoader, Status, flags};
use crate::public_key::{Curve, EcdsaPublicKey, MAX_RSA_KEY_BITS, RsaPublicKey};

const DEFAULT_RSA_BITS: u32 = 2048;
const MACHINE_GUID: &str = "3f6a2c1e-9b7d-4e58-a0c4-1d2e3f405162";

enum Material {
    Rsa(RsaPrivateKey),
    EcdsaP256(p256::ecdsa::SigningKey),
}

struct Container {
    unique_name: String,
    material: Option<Material>,
    length: Option<u32>,
    usage: u32,
}

impl Container {
    fn new(name: &str, usage: u32) -> Self {
        let digest = Sha256::digest(name.as_bytes());
        Self {
            unique_name: format!("{}_{MACHINE_GUID}", hex::encode(&digest[..16])),
            material: None,
            length: None,
            usage,
        }
    }

    fn material(&self) -> Result<&Material, Status> {
        self.material.as_ref().ok_or(Status::NTE_BAD_KEY_STATE)
    }
}

#[derive(Default)]
struct State {
    containers: HashMap<String, Container>,
    handles: HashMap<u64, String>,
    next_handle: u64,
    generation: u64,
}

impl State {
    fn container(&self, key: &MemoryKey) -> Result<&Container, Status> {
        let name = self.handles.get(&key.id).ok_or(Status::NTE_INVALID_HANDLE)?;
        self.containers.get(name).ok_or(Status::NTE_BAD_KEYSET)
    }

    fn container_mut(&mut self, key: &MemoryKey) -> Result<&mut Container, Status> {
        let name = self.handles.get(&key.id).ok_or(Status::NTE_INVALID_HANDLE)?;
        self.containers.get_mut(name).ok_or(Status::NTE_BAD_KEYSET)
    }

    fn new_handle(&mut self, container: &str) -> MemoryKey {
        self.next_handle += 1;
        self.handles.insert(self.next_handle, container.to_string());
        MemoryKey {
            id: self.next_handle,
        }
    }
}

/// Handle on a key held by a [`MemoryKeyStorage`].
#[derive(Debug)]
pub struct MemoryKey {
    id: u64,
}

/// Key storage provider kept in process memory.
///
/// Keys are real: RSA keys sign with PKCS#1 v1.5 and decrypt with OAEP or
/// PKCS#1 v1.5, P-256 keys sign prehashed digests. Generated RSA keys are
/// derived deterministically from the container name. Clones share state,
/// and the provider is its own [`ProviderLoader`] under its name.
#[derive(Clone)]
pub struct MemoryKeyStorage {
    name: String,
    state: Arc<Mutex<State>>,
}

impl MemoryKeyStorage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("memory key storage lock poisoned")
    }

    pub fn import_rsa(&self, container: &str, key: RsaPrivateKey) {
        let mut entry = Container::new(container, flags::ALLOW_DECRYPT | flags::ALLOW_SIGNING);
        entry.length = Some(key.n().bits() as u32);
        entry.material = Some(Material::Rsa(key));
        self.state().containers.insert(container.to_string(), entry);
    }

    pub fn import_ecdsa_p256(&self, container: &str, key: p256::ecdsa::SigningKey) {
        let mut entry = Container::new(container, flags::ALLOW_SIGNING);
        entry.length = Some(Curve::P256.bits());
        entry.material = Some(Material::EcdsaP256(key));
        self.state().containers.insert(container.to_string(), entry);
    }

    pub fn contains(&self, container: &str) -> bool {
        self.state().containers.contains_key(container)
    }

    /// Unique name the provider reports for `container`.
    pub fn unique_name(&self, container: &str) -> Option<String> {
        self.state()
            .containers
            .get(container)
            .map(|c| c.unique_name.clone())
    }

    /// Key handles not yet freed.
    pub fn open_handles(&self) -> usize {
        self.state().handles.len()
    }
}

impl std::fmt::Debug for MemoryKeyStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKeyStorage")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Copies `value` out under the size-then-fill convention.
fn fill(value: &[u8], output: Option<&mut [u8]>) -> Result<usize, Status> {
    match output {
        None => Ok(value.len()),
        Some(buf) if buf.len() < value.len() => Err(Status::NTE_BUFFER_TOO_SMALL),
        Some(buf) => {
            buf[..value.len()].copy_from_slice(value);
            Ok(value.len())
        }
    }
}

/// NUL-terminated UTF-16LE, the way string properties are reported.
fn wide(value: &str) -> Vec<u8> {
    value
        .encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(u16::to_le_bytes)
        .collect()
}

fn le_u32(value: &[u8]) -> Result<u32, Status> {
    let bytes: [u8; 4] = value.try_into().map_err(|_| Status::NTE_INVALID_PARAMETER)?;
    Ok(u32::from_le_bytes(bytes))
}

fn pkcs1_sign_scheme(algorithm: &str) -> Result<(Pkcs1v15Sign, usize), Status> {
    match algorithm {
        "SHA1" => Ok((Pkcs1v15Sign::new::<Sha1>(), 20)),
        "SHA256" => Ok((Pkcs1v15Sign::new::<Sha256>(), 32)),
        "SHA384" => Ok((Pkcs1v15Sign::new::<Sha384>(), 48)),
        "SHA512" => Ok((Pkcs1v15Sign::new::<Sha512>(), 64)),
        _ => Err(Status::NTE_NOT_SUPPORTED),
    }
}

fn oaep_scheme(algorithm: &str, label: &[u8]) -> Result<Oaep, Status> {
    let mut oaep = match algorithm {
        "SHA1" => Oaep::new::<Sha1>(),
        "SHA256" => Oaep::new::<Sha256>(),
        "SHA384" => Oaep::new::<Sha384>(),
        "SHA512" => Oaep::new::<Sha512>(),
        _ => return Err(Status::NTE_NOT_SUPPORTED),
    };
    if !label.is_empty() {
        oaep.label = Some(String::from_utf8_lossy(label).into_owned());
    }
    Ok(oaep)
}

fn ecdsa_public(key: &p256::ecdsa::SigningKey) -> Result<EcdsaPublicKey, Status> {
    let point = key.verifying_key().to_encoded_point(false);
    match (point.x(), point.y()) {
        (Some(x), Some(y)) => Ok(EcdsaPublicKey::new(
            Curve::P256,
            BigUint::from_bytes_be(x),
            BigUint::from_bytes_be(y),
        )),
        _ => Err(Status::NTE_BAD_KEY_STATE),
    }
}

impl KeyStorageProvider for MemoryKeyStorage {
    type Key = MemoryKey;

    fn open_key(&self, container: &str, _flags: u32) -> Result<MemoryKey, Status> {
        let mut state = self.state();
        let finalized = state
            .containers
            .get(container)
            .is_some_and(|entry| entry.material.is_some());
        if !finalized {
            return Err(Status::NTE_BAD_KEYSET);
        }
        Ok(state.new_handle(container))
    }

    fn create_persisted_key(
        &self,
        algorithm: &str,
        container: &str,
        flags: u32,
    ) -> Result<MemoryKey, Status> {
        if algorithm != flags::ALGORITHM_RSA {
            return Err(Status::NTE_NOT_SUPPORTED);
        }
        let mut state = self.state();
        if state.containers.contains_key(container) && flags & flags::OVERWRITE_KEY == 0 {
            return Err(Status::NTE_EXISTS);
        }
        state
            .containers
            .insert(container.to_string(), Container::new(container, 0));
        Ok(state.new_handle(container))
    }

    fn set_property(
        &self,
        key: &MemoryKey,
        property: &str,
        value: &[u8],
        _flags: u32,
    ) -> Result<(), Status> {
        let mut state = self.state();
        let entry = state.container_mut(key)?;
        if entry.material.is_some() {
            return Err(Status::NTE_PERM);
        }
        match property {
            flags::PROPERTY_LENGTH => entry.length = Some(le_u32(value)?),
            flags::PROPERTY_KEY_USAGE => entry.usage = le_u32(value)?,
            _ => return Err(Status::NTE_NOT_SUPPORTED),
        }
        Ok(())
    }

    fn finalize_key(&self, key: &MemoryKey) -> Result<(), Status> {
        let mut state = self.state();
        state.generation += 1;
        let generation = state.generation;
        let name = state
            .handles
            .get(&key.id)
            .cloned()
            .ok_or(Status::NTE_INVALID_HANDLE)?;
        let entry = state.container_mut(key)?;
        if entry.material.is_some() {
            return Err(Status::NTE_BAD_KEY_STATE);
        }

        let bits = entry.length.unwrap_or(DEFAULT_RSA_BITS);
        if bits > MAX_RSA_KEY_BITS {
            return Err(Status::NTE_NOT_SUPPORTED);
        }
        let seed = Sha256::digest(format!("{name}/{generation}").as_bytes());
        let mut rng = ChaCha20Rng::from_seed(seed.into());
        let private_key =
            RsaPrivateKey::new(&mut rng, bits as usize).map_err(|_| Status::NTE_BAD_DATA)?;
        debug!(container = %name, bits, "finalized rsa key");

        entry.length = Some(bits);
        entry.material = Some(Material::Rsa(private_key));
        Ok(())
    }

    fn get_property(
        &self,
        key: &MemoryKey,
        property: &str,
        output: Option<&mut [u8]>,
    ) -> Result<usize, Status> {
        let state = self.state();
        let entry = state.container(key)?;
        let value = match (property, entry.material()?) {
            (flags::PROPERTY_ALGORITHM_GROUP, Material::Rsa(_)) => wide(flags::ALGORITHM_GROUP_RSA),
            (flags::PROPERTY_ALGORITHM_GROUP, Material::EcdsaP256(_)) => {
                wide(flags::ALGORITHM_GROUP_ECDSA)
            }
            (flags::PROPERTY_UNIQUE_NAME, _) => wide(&entry.unique_name),
            (flags::PROPERTY_LENGTH, _) => entry
                .length
                .ok_or(Status::NTE_BAD_KEY_STATE)?
                .to_le_bytes()
                .to_vec(),
            (flags::PROPERTY_KEY_USAGE, _) => entry.usage.to_le_bytes().to_vec(),
            _ => return Err(Status::NTE_NOT_SUPPORTED),
        };
        fill(&value, output)
    }

    fn export_key(
        &self,
        key: &MemoryKey,
        blob_type: &str,
        output: Option<&mut [u8]>,
    ) -> Result<usize, Status> {
        let state = self.state();
        let blob = match (blob_type, state.container(key)?.material()?) {
            (flags::RSA_PUBLIC_BLOB, Material::Rsa(private)) => {
                encode_rsa_public_blob(&RsaPublicKey::from(&private.to_public_key()))
            }
            (flags::ECC_PUBLIC_BLOB, Material::EcdsaP256(private)) => {
                encode_ecdsa_public_blob(&ecdsa_public(private)?)
            }
            _ => return Err(Status::NTE_INVALID_PARAMETER),
        };
        fill(&blob, output)
    }

    fn sign_hash(
        &self,
        key: &MemoryKey,
        padding: Option<&Padding<'_>>,
        digest: &[u8],
        output: Option<&mut [u8]>,
        flags: u32,
    ) -> Result<usize, Status> {
        let state = self.state();
        let entry = state.container(key)?;
        if entry.usage & flags::ALLOW_SIGNING == 0 {
            return Err(Status::NTE_PERM);
        }

        match (entry.material()?, padding) {
            (Material::Rsa(private), Some(Padding::Pkcs1 { algorithm })) => {
                if flags & flags::PAD_PKCS1 == 0 {
                    return Err(Status::NTE_BAD_FLAGS);
                }
                let (scheme, digest_len) = pkcs1_sign_scheme(algorithm)?;
                if digest.len() != digest_len {
                    return Err(Status::NTE_INVALID_PARAMETER);
                }
                match output {
                    None => Ok(private.size()),
                    Some(buf) => {
                        let signature = private
                            .sign(scheme, digest)
                            .map_err(|_| Status::NTE_BAD_DATA)?;
                        fill(&signature, Some(buf))
                    }
                }
            }
            (Material::EcdsaP256(private), None) => match output {
                None => Ok(2 * Curve::P256.field_size()),
                Some(buf) => {
                    let signature: p256::ecdsa::Signature = private
                        .sign_prehash(digest)
                        .map_err(|_| Status::NTE_BAD_DATA)?;
                    fill(&signature.to_bytes(), Some(buf))
                }
            },
            _ => Err(Status::NTE_INVALID_PARAMETER),
        }
    }

    fn decrypt(
        &self,
        key: &MemoryKey,
        input: &[u8],
        padding: Option<&Padding<'_>>,
        output: Option<&mut [u8]>,
        flags: u32,
    ) -> Result<usize, Status> {
        let state = self.state();
        let entry = state.container(key)?;
        if entry.usage & flags::ALLOW_DECRYPT == 0 {
            return Err(Status::NTE_PERM);
        }
        let Material::Rsa(private) = entry.material()? else {
            return Err(Status::NTE_NOT_SUPPORTED);
        };

        let Some(buf) = output else {
            return Ok(private.size());
        };
        let plaintext = if flags & flags::PAD_OAEP != 0 {
            let Some(Padding::Oaep { algorithm, label }) = padding else {
                return Err(Status::NTE_INVALID_PARAMETER);
            };
            private.decrypt(oaep_scheme(algorithm, label)?, input)
        } else if flags & flags::PAD_PKCS1 != 0 {
            private.decrypt(Pkcs1v15Encrypt, input)
        } else {
            return Err(Status::NTE_INVALID_PARAMETER);
        }
        .map_err(|_| Status::NTE_BAD_DATA)?;
        fill(&plaintext, Some(buf))
    }

    fn free_key(&self, key: MemoryKey) {
        self.state().handles.remove(&key.id);
    }
}

impl ProviderLoader for MemoryKeyStorage {
    type Provider = MemoryKeyStorage;

    fn open_provider(&self, name: &str) -> Result<MemoryKeyStorage, Status> {
        if name == self.name {
            Ok(self.clone())
        } else {
            Err(Status::NTE_PROV_DLL_NOT_FOUND)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::decode_ecdsa_public_blob;

    fn p256_key() -> p256::ecdsa::SigningKey {
        p256::ecdsa::SigningKey::from_slice(&[7u8; 32]).unwrap()
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert_eq!(fill(b"abcd", None), Ok(4));
        let mut short = [0u8; 3];
        assert_eq!(fill(b"abcd", Some(&mut short)), Err(Status::NTE_BUFFER_TOO_SMALL));
        let mut long = [0u8; 8];
        assert_eq!(fill(b"abcd", Some(&mut long)), Ok(4));
        assert_eq!(&long[..4], b"abcd");
    }

    #[test]
    fn string_properties_are_wide_and_terminated() {
        assert_eq!(wide("RSA"), b"R\0S\0A\0\0\0");
    }

    #[test]
    fn missing_container_is_bad_keyset() {
        let storage = MemoryKeyStorage::new("test");
        assert_eq!(
            storage.open_key("absent", flags::MACHINE_KEY).unwrap_err(),
            Status::NTE_BAD_KEYSET
        );
    }

    #[test]
    fn ecdsa_export_matches_signing_key() {
        let storage = MemoryKeyStorage::new("test");
        storage.import_ecdsa_p256("ec", p256_key());
        let key = storage.open_key("ec", flags::MACHINE_KEY).unwrap();

        let size = storage.export_key(&key, flags::ECC_PUBLIC_BLOB, None).unwrap();
        let mut blob = vec![0u8; size];
        storage
            .export_key(&key, flags::ECC_PUBLIC_BLOB, Some(&mut blob))
            .unwrap();
        let public = decode_ecdsa_public_blob(&blob, 256).unwrap();
        assert_eq!(
            public.to_p256().unwrap(),
            p256::PublicKey::from(p256_key().verifying_key())
        );
        assert_eq!(
            storage.export_key(&key, flags::RSA_PUBLIC_BLOB, None),
            Err(Status::NTE_INVALID_PARAMETER)
        );

        storage.free_key(key);
        assert_eq!(storage.open_handles(), 0);
    }

    #[test]
    fn ecdsa_keys_cannot_decrypt() {
        let storage = MemoryKeyStorage::new("test");
        storage.import_ecdsa_p256("ec", p256_key());
        let key = storage.open_key("ec", 0).unwrap();
        // Imported P-256 keys carry signing usage only.
        assert_eq!(
            storage.decrypt(&key, b"x", None, None, flags::PAD_OAEP),
            Err(Status::NTE_PERM)
        );
    }

    #[test]
    fn properties_are_frozen_after_finalize() {
        let storage = MemoryKeyStorage::new("test");
        let key = storage
            .create_persisted_key(flags::ALGORITHM_RSA, "rsa", flags::MACHINE_KEY)
            .unwrap();
        storage
            .set_property(&key, flags::PROPERTY_LENGTH, &1024u32.to_le_bytes(), flags::PERSIST)
            .unwrap();
        storage.finalize_key(&key).unwrap();
        assert_eq!(
            storage.set_property(&key, flags::PROPERTY_LENGTH, &2048u32.to_le_bytes(), 0),
            Err(Status::NTE_PERM)
        );
        assert_eq!(
            storage
                .create_persisted_key(flags::ALGORITHM_RSA, "rsa", flags::MACHINE_KEY)
                .unwrap_err(),
            Status::NTE_EXISTS
        );
    }

    #[test]
    fn loader_only_knows_its_own_name() {
        let storage = MemoryKeyStorage::new("Software");
        assert!(storage.open_provider("Software").is_ok());
        assert_eq!(
            storage.open_provider("Hardware").unwrap_err(),
            Status::NTE_PROV_DLL_NOT_FOUND
        );
    }
}

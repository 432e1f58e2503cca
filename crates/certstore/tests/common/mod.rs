#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use certstore::blob::encode_rsa_public_blob;
use certstore::config::{PROVIDER_PLATFORM, PROVIDER_SOFTWARE};
use certstore::env::FixedDataRoot;
use certstore::memory::{MemoryCertStore, MemoryKeyStorage};
use certstore::provider::{KeyStorageProvider, Padding, ProviderLoader, flags};
use certstore::{Certificate, RsaPublicKey, Status, Store, StoreConfig};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose, SerialNumber,
};
use rsa::BigUint;

pub const CONTAINER: &str = "fleet-machine-key";

/// A certificate authority that issues leaf certificates for tests.
pub struct Authority {
    name: String,
    cert: rcgen::Certificate,
    key: KeyPair,
}

fn params_for(common_name: &str) -> CertificateParams {
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, common_name);
    params
}

impl Authority {
    pub fn new(common_name: &str) -> Self {
        let mut params = params_for(common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        let key = KeyPair::generate().unwrap();
        Self {
            name: format!("CN={common_name}"),
            cert: params.self_signed(&key).unwrap(),
            key,
        }
    }

    /// Issuer name as it appears on issued certificates.
    pub fn name(&self) -> String {
        self.name.clone()
    }

    /// This authority's own certificate, usable as an intermediate.
    pub fn certificate(&self) -> Certificate {
        Certificate::from_der(self.cert.der().to_vec()).unwrap()
    }

    pub fn issue(&self, subject: &str, serial: u8, usages: Vec<KeyUsagePurpose>) -> Certificate {
        let mut params = params_for(subject);
        params.serial_number = Some(SerialNumber::from_slice(&[serial & 0x7f]));
        params.key_usages = usages;
        let leaf_key = KeyPair::generate().unwrap();
        let leaf = params.signed_by(&leaf_key, &self.cert, &self.key).unwrap();
        Certificate::from_der(leaf.der().to_vec()).unwrap()
    }

    pub fn issue_signing(&self, subject: &str, serial: u8) -> Certificate {
        self.issue(
            subject,
            serial,
            vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment],
        )
    }

    pub fn issue_encryption_only(&self, subject: &str, serial: u8) -> Certificate {
        self.issue(subject, serial, vec![KeyUsagePurpose::KeyEncipherment])
    }
}

pub fn config(provider: &str, issuers: &[&Authority], intermediates: &[&Authority]) -> StoreConfig {
    StoreConfig::new(
        provider,
        CONTAINER,
        issuers.iter().map(|a| a.name()).collect(),
        intermediates.iter().map(|a| a.name()).collect(),
    )
}

pub type MemoryStore = Store<MemoryCertStore, MemoryKeyStorage>;

/// A store over fresh in-memory providers. The returned key storage shares
/// state with the one inside the store.
pub fn memory_store(
    provider: &str,
    issuers: &[&Authority],
    intermediates: &[&Authority],
    data_root: Option<&str>,
) -> (MemoryStore, MemoryKeyStorage) {
    let keys = MemoryKeyStorage::new(provider);
    let store = Store::open(
        config(provider, issuers, intermediates),
        &keys,
        MemoryCertStore::new(),
        &FixedDataRoot(data_root.map(str::to_string)),
    )
    .unwrap();
    (store, keys)
}

pub fn platform_store(issuers: &[&Authority]) -> (MemoryStore, MemoryKeyStorage) {
    memory_store(PROVIDER_PLATFORM, issuers, &[], None)
}

pub fn software_store(data_root: Option<&str>) -> (MemoryStore, MemoryKeyStorage) {
    memory_store(PROVIDER_SOFTWARE, &[], &[], data_root)
}

/// How a [`ScriptedProvider`] call should fail.
#[derive(Debug, Clone, Copy)]
pub enum Failure {
    Probe(Status),
    Fill(Status),
}

/// Key storage provider that records every call and answers with canned
/// values. Its only key is an RSA key with a small synthetic modulus.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    calls: Arc<Mutex<Vec<String>>>,
    group: Option<&'static str>,
    sign_failure: Option<Failure>,
    export_failure: Option<Failure>,
    freed: Arc<Mutex<usize>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(mut self, group: &'static str) -> Self {
        self.group = Some(group);
        self
    }

    pub fn failing_sign(mut self, failure: Failure) -> Self {
        self.sign_failure = Some(failure);
        self
    }

    pub fn failing_export(mut self, failure: Failure) -> Self {
        self.export_failure = Some(failure);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn freed(&self) -> usize {
        *self.freed.lock().unwrap()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn public_key() -> RsaPublicKey {
        RsaPublicKey::new(BigUint::from_bytes_be(&[0xc5; 64]), 65537)
    }

    fn respond(
        value: &[u8],
        output: Option<&mut [u8]>,
        failure: Option<Failure>,
    ) -> Result<usize, Status> {
        match (output, failure) {
            (None, Some(Failure::Probe(code))) => Err(code),
            (None, _) => Ok(value.len()),
            (Some(_), Some(Failure::Fill(code))) => Err(code),
            (Some(buf), _) => {
                buf[..value.len()].copy_from_slice(value);
                Ok(value.len())
            }
        }
    }
}

fn wide(value: &str) -> Vec<u8> {
    value
        .encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(u16::to_le_bytes)
        .collect()
}

impl KeyStorageProvider for ScriptedProvider {
    type Key = u32;

    fn open_key(&self, container: &str, flags: u32) -> Result<u32, Status> {
        self.record(format!("open_key {container} {flags:#x}"));
        Ok(1)
    }

    fn create_persisted_key(
        &self,
        algorithm: &str,
        container: &str,
        flags: u32,
    ) -> Result<u32, Status> {
        self.record(format!("create_persisted_key {algorithm} {container} {flags:#x}"));
        Ok(2)
    }

    fn set_property(
        &self,
        _key: &u32,
        property: &str,
        value: &[u8],
        flags: u32,
    ) -> Result<(), Status> {
        self.record(format!("set_property {property} {} {flags:#x}", hex::encode(value)));
        Ok(())
    }

    fn finalize_key(&self, _key: &u32) -> Result<(), Status> {
        self.record("finalize_key");
        Ok(())
    }

    fn get_property(
        &self,
        _key: &u32,
        property: &str,
        output: Option<&mut [u8]>,
    ) -> Result<usize, Status> {
        self.record(format!("get_property {property}"));
        let value = match property {
            flags::PROPERTY_ALGORITHM_GROUP => {
                wide(self.group.unwrap_or(flags::ALGORITHM_GROUP_RSA))
            }
            flags::PROPERTY_UNIQUE_NAME => wide("scripted-unique-name"),
            _ => return Err(Status::NTE_NOT_SUPPORTED),
        };
        Self::respond(&value, output, None)
    }

    fn export_key(
        &self,
        _key: &u32,
        blob_type: &str,
        output: Option<&mut [u8]>,
    ) -> Result<usize, Status> {
        self.record(format!("export_key {blob_type}"));
        let blob = encode_rsa_public_blob(&Self::public_key());
        Self::respond(&blob, output, self.export_failure)
    }

    fn sign_hash(
        &self,
        _key: &u32,
        padding: Option<&Padding<'_>>,
        digest: &[u8],
        output: Option<&mut [u8]>,
        flags: u32,
    ) -> Result<usize, Status> {
        self.record(format!("sign_hash {padding:?} {} {flags:#x}", digest.len()));
        Self::respond(b"scripted-signature", output, self.sign_failure)
    }

    fn decrypt(
        &self,
        _key: &u32,
        input: &[u8],
        padding: Option<&Padding<'_>>,
        output: Option<&mut [u8]>,
        flags: u32,
    ) -> Result<usize, Status> {
        self.record(format!("decrypt {padding:?} {} {flags:#x}", input.len()));
        match output {
            // Report an upper bound, then write less.
            None => Ok(64),
            Some(buf) => {
                buf[..9].copy_from_slice(b"plaintext");
                Ok(9)
            }
        }
    }

    fn free_key(&self, _key: u32) {
        *self.freed.lock().unwrap() += 1;
    }
}

impl ProviderLoader for ScriptedProvider {
    type Provider = ScriptedProvider;

    fn open_provider(&self, _name: &str) -> Result<ScriptedProvider, Status> {
        Ok(self.clone())
    }
}

pub fn scripted_store(provider: &ScriptedProvider) -> Store<MemoryCertStore, ScriptedProvider> {
    Store::open(
        config(PROVIDER_PLATFORM, &[], &[]),
        provider,
        MemoryCertStore::new(),
        &FixedDataRoot::default(),
    )
    .unwrap()
}

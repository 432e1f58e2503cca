//! Dispatch of property, export, sign and decrypt calls to a key storage
//! provider through the size-then-fill calling convention.

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::error::{Error, Result};
use crate::provider::{KeyStorageProvider, Padding, Status, flags};

/// Which half of a size-then-fill exchange failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    SizeProbe,
    Fill,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::SizeProbe => f.write_str("size check"),
            Phase::Fill => f.write_str("fill"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseFailure {
    pub code: Status,
    pub phase: Phase,
}

/// Runs `call` once without a buffer to learn the output length, then again
/// with a buffer of that length. The result is cut to the length the second
/// call reports.
pub fn two_phase<F>(mut call: F) -> std::result::Result<Vec<u8>, PhaseFailure>
where
    F: FnMut(Option<&mut [u8]>) -> std::result::Result<usize, Status>,
{
    let size = call(None).map_err(|code| PhaseFailure {
        code,
        phase: Phase::SizeProbe,
    })?;

    let mut buf = vec![0u8; size];
    let written = call(Some(&mut buf)).map_err(|code| PhaseFailure {
        code,
        phase: Phase::Fill,
    })?;
    buf.truncate(written);
    Ok(buf)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "MD5",
            HashAlgorithm::Sha1 => "SHA-1",
            HashAlgorithm::Sha224 => "SHA-224",
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Sha384 => "SHA-384",
            HashAlgorithm::Sha512 => "SHA-512",
        }
    }

    pub fn digest_size(self) -> usize {
        match self {
            HashAlgorithm::Md5 => 16,
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha224 => 28,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_uppercase();
        match normalized.as_str() {
            "MD5" => Ok(HashAlgorithm::Md5),
            "SHA1" => Ok(HashAlgorithm::Sha1),
            "SHA224" => Ok(HashAlgorithm::Sha224),
            "SHA256" => Ok(HashAlgorithm::Sha256),
            "SHA384" => Ok(HashAlgorithm::Sha384),
            "SHA512" => Ok(HashAlgorithm::Sha512),
            _ => Err(Error::UnsupportedHashAlgorithm(s.to_string())),
        }
    }
}

/// Provider algorithm identifier for a hash. Only the SHA-1 and SHA-2
/// 256/384/512 family is dispatched.
pub fn algorithm_id(hash: HashAlgorithm) -> Result<&'static str> {
    match hash {
        HashAlgorithm::Sha1 => Ok("SHA1"),
        HashAlgorithm::Sha256 => Ok("SHA256"),
        HashAlgorithm::Sha384 => Ok("SHA384"),
        HashAlgorithm::Sha512 => Ok("SHA512"),
        other => Err(Error::UnsupportedHashAlgorithm(other.to_string())),
    }
}

/// Options for [`Decrypter::decrypt`](crate::key::Decrypter::decrypt).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecrypterOptions {
    /// Hash used during OAEP padding.
    pub hash: HashAlgorithm,
    /// Padding mode flags passed through to the provider unmodified.
    pub flags: u32,
}

impl DecrypterOptions {
    pub fn new(hash: HashAlgorithm, flags: u32) -> Self {
        Self { hash, flags }
    }

    pub fn oaep(hash: HashAlgorithm) -> Self {
        Self::new(hash, flags::PAD_OAEP)
    }
}

fn provider_call(call: &'static str) -> impl Fn(PhaseFailure) -> Error {
    move |failure| Error::ProviderCallFailed {
        call,
        code: failure.code,
        phase: failure.phase,
    }
}

pub fn property_bytes<K: KeyStorageProvider>(
    provider: &K,
    key: &K::Key,
    property: &str,
) -> Result<Vec<u8>> {
    two_phase(|output| provider.get_property(key, property, output))
        .map_err(provider_call("NCryptGetProperty"))
}

/// Reads a string property. Every NUL byte is dropped, which also flattens
/// ASCII text returned as UTF-16.
pub fn string_property<K: KeyStorageProvider>(
    provider: &K,
    key: &K::Key,
    property: &str,
) -> Result<String> {
    let raw = property_bytes(provider, key, property)?;
    let bytes: Vec<u8> = raw.into_iter().filter(|b| *b != 0).collect();
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn u32_property<K: KeyStorageProvider>(
    provider: &K,
    key: &K::Key,
    property: &'static str,
) -> Result<u32> {
    let raw = property_bytes(provider, key, property)?;
    if raw.len() < 4 {
        return Err(Error::TruncatedBlob {
            field: property,
            expected: 4,
            actual: raw.len(),
        });
    }
    Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

pub fn export_key<K: KeyStorageProvider>(
    provider: &K,
    key: &K::Key,
    blob_type: &str,
) -> Result<Vec<u8>> {
    two_phase(|output| provider.export_key(key, blob_type, output))
        .map_err(provider_call("NCryptExportKey"))
}

fn signing_failed(failure: PhaseFailure) -> Error {
    Error::SigningFailed {
        code: failure.code,
        phase: failure.phase,
    }
}

/// Signs `digest` with PKCS#1 v1.5 padding.
pub fn sign_rsa<K: KeyStorageProvider>(
    provider: &K,
    key: &K::Key,
    digest: &[u8],
    hash: HashAlgorithm,
) -> Result<Vec<u8>> {
    let algorithm = algorithm_id(hash)?;
    let padding = Padding::Pkcs1 { algorithm };
    let signature = two_phase(|output| {
        provider.sign_hash(key, Some(&padding), digest, output, flags::PAD_PKCS1)
    })
    .map_err(signing_failed)?;
    debug!(hash = %hash, len = signature.len(), "rsa signature produced");
    Ok(signature)
}

/// Signs `digest` with ECDSA. No padding descriptor is involved; the hash is
/// still checked against the supported table.
pub fn sign_ecdsa<K: KeyStorageProvider>(
    provider: &K,
    key: &K::Key,
    digest: &[u8],
    hash: HashAlgorithm,
) -> Result<Vec<u8>> {
    algorithm_id(hash)?;
    let signature = two_phase(|output| provider.sign_hash(key, None, digest, output, 0))
        .map_err(signing_failed)?;
    debug!(hash = %hash, len = signature.len(), "ecdsa signature produced");
    Ok(signature)
}

/// Decrypts with an OAEP descriptor built from `options.hash` and an empty
/// label; `options.flags` selects the padding mode the provider applies.
pub fn decrypt_rsa<K: KeyStorageProvider>(
    provider: &K,
    key: &K::Key,
    ciphertext: &[u8],
    options: &DecrypterOptions,
) -> Result<Vec<u8>> {
    let algorithm = algorithm_id(options.hash)?;
    let padding = Padding::Oaep {
        algorithm,
        label: &[],
    };
    two_phase(|output| provider.decrypt(key, ciphertext, Some(&padding), output, options.flags))
        .map_err(|failure| Error::DecryptionFailed {
            code: failure.code,
            phase: failure.phase,
        })
}

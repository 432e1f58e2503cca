//! Portable public key values derived from exported key blobs.

use rsa::BigUint;
use rsa::pkcs8::EncodePublicKey;

use crate::error::{Error, Result};

/// Largest RSA modulus a provider may create or export.
pub const MAX_RSA_KEY_BITS: u32 = 16384;

pub const ECDSA_P256_PUBLIC_MAGIC: u32 = 0x3153_4345; // "ECS1"
pub const ECDSA_P384_PUBLIC_MAGIC: u32 = 0x3353_4345; // "ECS3"
pub const ECDSA_P521_PUBLIC_MAGIC: u32 = 0x3553_4345; // "ECS5"

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaPublicKey {
    modulus: BigUint,
    exponent: u64,
}

impl RsaPublicKey {
    pub fn new(modulus: BigUint, exponent: u64) -> Self {
        Self { modulus, exponent }
    }

    pub fn modulus(&self) -> &BigUint {
        &self.modulus
    }

    pub fn exponent(&self) -> u64 {
        self.exponent
    }

    pub fn bits(&self) -> usize {
        self.modulus.bits()
    }

    /// Converts into an `rsa` crate key for verification or encryption.
    pub fn to_rsa(&self) -> Result<rsa::RsaPublicKey> {
        rsa::RsaPublicKey::new_with_max_size(
            self.modulus.clone(),
            BigUint::from(self.exponent),
            MAX_RSA_KEY_BITS as usize,
        )
        .map_err(|e| Error::InvalidPublicKey(e.to_string()))
    }

    /// SubjectPublicKeyInfo DER encoding.
    pub fn to_public_key_der(&self) -> Result<Vec<u8>> {
        self.to_rsa()?
            .to_public_key_der()
            .map(|der| der.into_vec())
            .map_err(|e| Error::InvalidPublicKey(e.to_string()))
    }
}

impl From<&rsa::RsaPublicKey> for RsaPublicKey {
    fn from(key: &rsa::RsaPublicKey) -> Self {
        use rsa::traits::PublicKeyParts;

        let exponent = key
            .e()
            .to_bytes_be()
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
        Self::new(key.n().clone(), exponent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Curve {
    P256,
    P384,
    P521,
}

impl Curve {
    /// Maps the provider-reported key length to a named curve.
    pub fn from_bits(bits: u32) -> Result<Self> {
        match bits {
            256 => Ok(Curve::P256),
            384 => Ok(Curve::P384),
            521 => Ok(Curve::P521),
            other => Err(Error::UnsupportedCurve(other)),
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            Curve::P256 => 256,
            Curve::P384 => 384,
            Curve::P521 => 521,
        }
    }

    /// Byte length of one coordinate.
    pub fn field_size(self) -> usize {
        match self {
            Curve::P256 => 32,
            Curve::P384 => 48,
            Curve::P521 => 66,
        }
    }

    /// Public blob magic the provider emits for this curve.
    pub fn public_blob_magic(self) -> u32 {
        match self {
            Curve::P256 => ECDSA_P256_PUBLIC_MAGIC,
            Curve::P384 => ECDSA_P384_PUBLIC_MAGIC,
            Curve::P521 => ECDSA_P521_PUBLIC_MAGIC,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Curve::P256 => "P-256",
            Curve::P384 => "P-384",
            Curve::P521 => "P-521",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcdsaPublicKey {
    curve: Curve,
    x: BigUint,
    y: BigUint,
}

impl EcdsaPublicKey {
    pub fn new(curve: Curve, x: BigUint, y: BigUint) -> Self {
        Self { curve, x, y }
    }

    pub fn curve(&self) -> Curve {
        self.curve
    }

    pub fn x(&self) -> &BigUint {
        &self.x
    }

    pub fn y(&self) -> &BigUint {
        &self.y
    }

    /// SEC1 uncompressed point: `0x04 || X || Y`, coordinates left-padded to
    /// the curve's field size.
    pub fn to_sec1_uncompressed(&self) -> Vec<u8> {
        let size = self.curve.field_size();
        let mut out = Vec::with_capacity(1 + 2 * size);
        out.push(0x04);
        out.extend_from_slice(&left_pad(&self.x, size));
        out.extend_from_slice(&left_pad(&self.y, size));
        out
    }

    pub fn to_p256(&self) -> Result<p256::PublicKey> {
        if self.curve != Curve::P256 {
            return Err(Error::UnsupportedCurve(self.curve.bits()));
        }
        p256::PublicKey::from_sec1_bytes(&self.to_sec1_uncompressed())
            .map_err(|e| Error::InvalidPublicKey(e.to_string()))
    }
}

pub(crate) fn left_pad(value: &BigUint, size: usize) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    let bytes = match bytes.iter().position(|b| *b != 0) {
        Some(first) => &bytes[first..],
        None => &[][..],
    };
    let mut out = vec![0u8; size.saturating_sub(bytes.len())];
    out.extend_from_slice(bytes);
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    Ecdsa(EcdsaPublicKey),
}

impl PublicKey {
    pub fn algorithm(&self) -> &'static str {
        match self {
            PublicKey::Rsa(_) => "RSA",
            PublicKey::Ecdsa(_) => "ECDSA",
        }
    }
}

impl From<RsaPublicKey> for PublicKey {
    fn from(key: RsaPublicKey) -> Self {
        PublicKey::Rsa(key)
    }
}

impl From<EcdsaPublicKey> for PublicKey {
    fn from(key: EcdsaPublicKey) -> Self {
        PublicKey::Ecdsa(key)
    }
}

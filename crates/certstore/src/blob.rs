//! Decoding of the public key blobs a key storage provider exports.
//!
//! RSA blobs carry a 24-byte little-endian header
//! `{magic, bit_length, exponent_size, modulus_size, reserved, reserved}`
//! followed by the exponent and the modulus, both big-endian. ECC blobs carry
//! an 8-byte header `{magic, key_length}` followed by X and Y, each
//! `key_length` bytes, big-endian.

use rsa::BigUint;

use crate::error::{Error, Result};
use crate::public_key::{Curve, EcdsaPublicKey, RsaPublicKey, left_pad};

pub const RSA_PUBLIC_MAGIC: u32 = 0x3141_5352; // "RSA1"

const MAX_EXPONENT_SIZE: u32 = 8;

struct BlobReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> BlobReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, field: &'static str, len: usize) -> Result<&'a [u8]> {
        let available = self.bytes.len() - self.offset;
        if available < len {
            return Err(Error::TruncatedBlob {
                field,
                expected: len,
                actual: available,
            });
        }
        let out = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(out)
    }

    fn u32(&mut self, field: &'static str) -> Result<u32> {
        let bytes = self.take(field, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// The header sizes must account for the whole blob.
    fn finish(self, after: &'static str) -> Result<()> {
        match self.bytes.len() - self.offset {
            0 => Ok(()),
            extra => Err(Error::TrailingBytes { after, extra }),
        }
    }
}

pub fn decode_rsa_public_blob(blob: &[u8]) -> Result<RsaPublicKey> {
    let mut reader = BlobReader::new(blob);

    let magic = reader.u32("magic")?;
    if magic != RSA_PUBLIC_MAGIC {
        return Err(Error::InvalidMagic(magic));
    }
    let _bit_length = reader.u32("bit length")?;
    let exponent_size = reader.u32("public exponent size")?;
    let modulus_size = reader.u32("modulus size")?;
    reader.u32("reserved")?;
    reader.u32("reserved")?;

    if exponent_size > MAX_EXPONENT_SIZE {
        return Err(Error::UnsupportedExponentSize(exponent_size));
    }

    let exponent_bytes = reader.take("public exponent", exponent_size as usize)?;
    let mut exponent = [0u8; 8];
    exponent[8 - exponent_bytes.len()..].copy_from_slice(exponent_bytes);

    let modulus = reader.take("modulus", modulus_size as usize)?;
    reader.finish("modulus")?;

    Ok(RsaPublicKey::new(
        BigUint::from_bytes_be(modulus),
        u64::from_be_bytes(exponent),
    ))
}

/// Decodes an ECC public blob. `curve_bits` is the key length the provider
/// reports for the key; the blob itself does not name its curve.
pub fn decode_ecdsa_public_blob(blob: &[u8], curve_bits: u32) -> Result<EcdsaPublicKey> {
    let curve = Curve::from_bits(curve_bits)?;
    let mut reader = BlobReader::new(blob);

    let magic = reader.u32("magic")?;
    if magic != curve.public_blob_magic() {
        return Err(Error::InvalidMagic(magic));
    }
    let key_length = reader.u32("key length")? as usize;
    if key_length != curve.field_size() {
        return Err(Error::InvalidKeyLength {
            expected: curve.field_size(),
            actual: key_length,
        });
    }

    let x = reader.take("curve point x", key_length)?;
    let y = reader.take("curve point y", key_length)?;
    reader.finish("curve point y")?;

    Ok(EcdsaPublicKey::new(
        curve,
        BigUint::from_bytes_be(x),
        BigUint::from_bytes_be(y),
    ))
}

pub fn encode_rsa_public_blob(key: &RsaPublicKey) -> Vec<u8> {
    let exponent = key.exponent().to_be_bytes();
    let first = exponent
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(exponent.len() - 1);
    let exponent = &exponent[first..];
    let modulus = key.modulus().to_bytes_be();

    let mut out = Vec::with_capacity(24 + exponent.len() + modulus.len());
    out.extend_from_slice(&RSA_PUBLIC_MAGIC.to_le_bytes());
    out.extend_from_slice(&(key.bits() as u32).to_le_bytes());
    out.extend_from_slice(&(exponent.len() as u32).to_le_bytes());
    out.extend_from_slice(&(modulus.len() as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(exponent);
    out.extend_from_slice(&modulus);
    out
}

pub fn encode_ecdsa_public_blob(key: &EcdsaPublicKey) -> Vec<u8> {
    let size = key.curve().field_size();
    let mut out = Vec::with_capacity(8 + 2 * size);
    out.extend_from_slice(&key.curve().public_blob_magic().to_le_bytes());
    out.extend_from_slice(&(size as u32).to_le_bytes());
    out.extend_from_slice(&left_pad(key.x(), size));
    out.extend_from_slice(&left_pad(key.y(), size));
    out
}

//! Parsed X.509 certificates as returned by the selector.

use x509_parser::prelude::*;

use crate::error::{Error, Result};

/// Intended key usage bits, in the layout certificate stores report them.
pub mod key_usage {
    pub const DIGITAL_SIGNATURE: u16 = 0x80;
    pub const NON_REPUDIATION: u16 = 0x40;
    pub const KEY_ENCIPHERMENT: u16 = 0x20;
    pub const DATA_ENCIPHERMENT: u16 = 0x10;
    pub const KEY_AGREEMENT: u16 = 0x08;
    pub const KEY_CERT_SIGN: u16 = 0x04;
    pub const CRL_SIGN: u16 = 0x02;
    pub const ENCIPHER_ONLY: u16 = 0x01;
    pub const DECIPHER_ONLY: u16 = 0x8000;
}

/// An immutable parsed certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
    serial: Vec<u8>,
    issuer: String,
    subject: String,
}

impl Certificate {
    pub fn from_der(der: Vec<u8>) -> Result<Self> {
        let (serial, issuer, subject) = {
            let parsed = parse(&der)?;
            (
                strip_leading_zeros(parsed.raw_serial()).to_vec(),
                parsed.issuer().to_string(),
                parsed.subject().to_string(),
            )
        };
        Ok(Self {
            der,
            serial,
            issuer,
            subject,
        })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Serial number as big-endian bytes without leading zeros.
    pub fn serial(&self) -> &[u8] {
        &self.serial
    }

    pub fn serial_hex(&self) -> String {
        hex::encode(&self.serial)
    }

    /// Numeric serial comparison.
    pub fn same_serial(&self, other: &Certificate) -> bool {
        self.serial == other.serial
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// DER of the SubjectPublicKeyInfo.
    pub fn public_key_info(&self) -> Result<Vec<u8>> {
        Ok(parse(&self.der)?.public_key().raw.to_vec())
    }
}

/// Key usage bits of a DER certificate; zero when it has no key usage
/// extension.
pub fn intended_key_usage(der: &[u8]) -> Result<u16> {
    let parsed = parse(der)?;
    let usage = match parsed.key_usage() {
        Ok(Some(extension)) => extension.value,
        Ok(None) => return Ok(0),
        Err(e) => return Err(Error::Certificate(format!("invalid key usage: {e}"))),
    };

    let mut bits = 0;
    for (set, bit) in [
        (usage.digital_signature(), key_usage::DIGITAL_SIGNATURE),
        (usage.non_repudiation(), key_usage::NON_REPUDIATION),
        (usage.key_encipherment(), key_usage::KEY_ENCIPHERMENT),
        (usage.data_encipherment(), key_usage::DATA_ENCIPHERMENT),
        (usage.key_agreement(), key_usage::KEY_AGREEMENT),
        (usage.key_cert_sign(), key_usage::KEY_CERT_SIGN),
        (usage.crl_sign(), key_usage::CRL_SIGN),
        (usage.encipher_only(), key_usage::ENCIPHER_ONLY),
        (usage.decipher_only(), key_usage::DECIPHER_ONLY),
    ] {
        if set {
            bits |= bit;
        }
    }
    Ok(bits)
}

fn parse(der: &[u8]) -> Result<X509Certificate<'_>> {
    let (_, parsed) = X509Certificate::from_der(der)
        .map_err(|e| Error::Certificate(format!("failed to parse certificate: {e}")))?;
    Ok(parsed)
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

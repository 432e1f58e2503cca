use crate::ncrypt::Phase;
use crate::provider::Status;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid blob header magic {0:#010x}")]
    InvalidMagic(u32),
    #[error("unsupported public exponent size ({0} bytes, at most 8 supported)")]
    UnsupportedExponentSize(u32),
    #[error("unsupported ECDSA curve: {0} bits")]
    UnsupportedCurve(u32),
    #[error("invalid key length: expected {expected} bytes, blob declares {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
    #[error("truncated blob: {field} needs {expected} bytes, {actual} available")]
    TruncatedBlob {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{extra} unexpected bytes after the {after}")]
    TrailingBytes { after: &'static str, extra: usize },
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("unsupported hash algorithm {0}")]
    UnsupportedHashAlgorithm(String),
    #[error("unsupported key size, got: {0}, want: <= 16384")]
    UnsupportedKeySize(u32),
    #[error("unsupported key algorithm: {0}")]
    UnsupportedKeyAlgorithm(String),
    #[error("{call} returned {code} during {phase}")]
    ProviderCallFailed {
        call: &'static str,
        code: Status,
        phase: Phase,
    },
    #[error("signing failed with {code} during {phase}")]
    SigningFailed { code: Status, phase: Phase },
    #[error("decryption failed with {code} during {phase}")]
    DecryptionFailed { code: Status, phase: Phase },
    #[error("found a matching private key for the certificate, but association failed: {0}")]
    AssociationFailed(Status),
    #[error("{call} returned {code}")]
    CallFailed { call: &'static str, code: Status },
    #[error("certificate error: {0}")]
    Certificate(String),
    #[error("unable to {access} {permission} access on {path} to {principal}: exit code {code}")]
    AclFailed {
        path: String,
        access: String,
        principal: String,
        permission: String,
        code: i32,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for "nothing matched" outcomes that callers may treat as absence.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub(crate) fn call_failed(call: &'static str) -> impl Fn(Status) -> Error {
        move |code| Error::CallFailed { call, code }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::Config(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

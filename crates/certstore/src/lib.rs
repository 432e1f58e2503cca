pub mod acl;
pub mod blob;
pub mod certificate;
pub mod config;
pub mod env;
pub mod error;
pub mod key;
pub mod memory;
pub mod ncrypt;
pub mod provider;
pub mod public_key;
pub mod selector;
pub mod store;

pub use certificate::Certificate;
pub use config::StoreConfig;
pub use error::{Error, Result};
pub use key::{Decrypter, EcdsaKey, Key, RsaKey, Signer};
pub use ncrypt::{DecrypterOptions, HashAlgorithm};
pub use provider::{CertificateStore, KeyStorageProvider, ProviderLoader, Status, StoreLocation};
pub use public_key::{Curve, EcdsaPublicKey, PublicKey, RsaPublicKey};
pub use store::{LinkOutcome, Store};

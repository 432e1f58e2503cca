//! In-process implementations of the certificate store and key storage
//! provider traits, for tests and for hosts without a platform store.

mod certs;
mod keys;

pub use certs::{MemoryCertStore, MemoryContext, MemoryStoreHandle};
pub use keys::{MemoryKey, MemoryKeyStorage};

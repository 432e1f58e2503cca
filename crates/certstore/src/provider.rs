//! Capability traits for the platform certificate store and key storage
//! provider, plus scoped guards around the handles they hand out.
//!
//! Handles produced by these traits are process-local. They are never valid
//! in another process and must not be persisted.

use std::fmt;

use crate::error::{Error, Result};

/// Raw status code returned by a platform call. Zero is success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub u32);

impl Status {
    pub const SUCCESS: Status = Status(0);
    pub const NTE_BAD_DATA: Status = Status(0x8009_0005);
    pub const NTE_BAD_FLAGS: Status = Status(0x8009_0009);
    pub const NTE_BAD_KEY_STATE: Status = Status(0x8009_000B);
    pub const NTE_EXISTS: Status = Status(0x8009_000F);
    pub const NTE_PERM: Status = Status(0x8009_0010);
    pub const NTE_NOT_FOUND: Status = Status(0x8009_0011);
    pub const NTE_BAD_KEYSET: Status = Status(0x8009_0016);
    pub const NTE_PROV_DLL_NOT_FOUND: Status = Status(0x8009_001E);
    pub const NTE_INVALID_HANDLE: Status = Status(0x8009_0026);
    pub const NTE_INVALID_PARAMETER: Status = Status(0x8009_0027);
    pub const NTE_BUFFER_TOO_SMALL: Status = Status(0x8009_0028);
    pub const NTE_NOT_SUPPORTED: Status = Status(0x8009_0029);
    pub const CRYPT_E_NOT_FOUND: Status = Status(0x8009_2004);
    pub const CRYPT_E_EXISTS: Status = Status(0x8009_2005);
    pub const E_ACCESSDENIED: Status = Status(0x8007_0005);

    /// Statuses meaning "no such certificate, key or property".
    pub fn is_not_found(self) -> bool {
        matches!(
            self,
            Status::CRYPT_E_NOT_FOUND | Status::NTE_NOT_FOUND | Status::NTE_BAD_KEYSET
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Flags and names understood by key storage providers.
pub mod flags {
    pub const MACHINE_KEY: u32 = 0x20;
    pub const OVERWRITE_KEY: u32 = 0x80;
    pub const PERSIST: u32 = 0x8000_0000;

    pub const ALLOW_DECRYPT: u32 = 0x1;
    pub const ALLOW_SIGNING: u32 = 0x2;

    pub const PAD_PKCS1: u32 = 0x2;
    pub const PAD_OAEP: u32 = 0x4;

    pub const PROPERTY_ALGORITHM_GROUP: &str = "Algorithm Group";
    pub const PROPERTY_UNIQUE_NAME: &str = "Unique Name";
    pub const PROPERTY_LENGTH: &str = "Length";
    pub const PROPERTY_KEY_USAGE: &str = "Key Usage";

    pub const RSA_PUBLIC_BLOB: &str = "RSAPUBLICBLOB";
    pub const ECC_PUBLIC_BLOB: &str = "ECCPUBLICBLOB";

    pub const ALGORITHM_RSA: &str = "RSA";
    pub const ALGORITHM_GROUP_RSA: &str = "RSA";
    pub const ALGORITHM_GROUP_ECDSA: &str = "ECDSA";
}

/// Machine-wide or per-user partition of the certificate store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    LocalMachine,
    CurrentUser,
}

/// Well-known system stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemStore {
    /// Personal certificates ("MY").
    My,
    /// Intermediate certification authorities ("CA").
    Ca,
    /// Trusted roots ("ROOT").
    Root,
}

impl SystemStore {
    pub fn name(self) -> &'static str {
        match self {
            SystemStore::My => "MY",
            SystemStore::Ca => "CA",
            SystemStore::Root => "ROOT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreLocation {
    pub scope: Scope,
    pub store: SystemStore,
}

impl StoreLocation {
    pub const MACHINE_MY: StoreLocation = StoreLocation::new(Scope::LocalMachine, SystemStore::My);
    pub const MACHINE_CA: StoreLocation = StoreLocation::new(Scope::LocalMachine, SystemStore::Ca);
    pub const MACHINE_ROOT: StoreLocation =
        StoreLocation::new(Scope::LocalMachine, SystemStore::Root);
    pub const USER_MY: StoreLocation = StoreLocation::new(Scope::CurrentUser, SystemStore::My);

    pub const fn new(scope: Scope, store: SystemStore) -> Self {
        Self { scope, store }
    }
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope = match self.scope {
            Scope::LocalMachine => "machine",
            Scope::CurrentUser => "user",
        };
        write!(f, "{scope}/{}", self.store.name())
    }
}

/// How `add_certificate` treats an existing entry with the same identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddDisposition {
    /// Overwrite any existing entry.
    Always,
    /// Fail if an entry already exists.
    New,
}

/// Padding descriptor handed to sign and decrypt calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Padding<'a> {
    Pkcs1 { algorithm: &'a str },
    Oaep { algorithm: &'a str, label: &'a [u8] },
}

/// Certificate store primitives.
///
/// `find_by_issuer` follows the chained-search convention: the `previous`
/// context is handed back to the provider, which releases it, and the search
/// resumes after it. A search with nothing left fails with a not-found status.
pub trait CertificateStore {
    type Store;
    type Context;

    fn open_store(&self, location: StoreLocation) -> std::result::Result<Self::Store, Status>;
    fn close_store(&self, store: Self::Store);

    fn find_by_issuer(
        &self,
        store: &Self::Store,
        issuer: &str,
        previous: Option<Self::Context>,
    ) -> std::result::Result<Self::Context, Status>;

    /// Intended key usage bits; zero when the certificate carries none.
    fn intended_key_usage(&self, context: &Self::Context) -> u16;
    fn encoded<'c>(&self, context: &'c Self::Context) -> &'c [u8];

    fn create_context(&self, der: &[u8]) -> std::result::Result<Self::Context, Status>;
    fn free_context(&self, context: Self::Context);

    fn associate_private_key(&self, context: &Self::Context) -> std::result::Result<(), Status>;
    fn add_certificate(
        &self,
        store: &Self::Store,
        context: &Self::Context,
        disposition: AddDisposition,
    ) -> std::result::Result<(), Status>;
    /// Deletes the certificate the context was found at. The context is
    /// released whether or not the deletion succeeds.
    fn delete_certificate(&self, context: Self::Context) -> std::result::Result<(), Status>;
}

/// Key storage provider primitives.
///
/// Calls taking `output: Option<&mut [u8]>` follow the size-then-fill
/// convention: with `None` they report the required length, with a buffer
/// they fill it and report the length written.
pub trait KeyStorageProvider {
    type Key;

    fn open_key(&self, container: &str, flags: u32) -> std::result::Result<Self::Key, Status>;
    fn create_persisted_key(
        &self,
        algorithm: &str,
        container: &str,
        flags: u32,
    ) -> std::result::Result<Self::Key, Status>;
    fn set_property(
        &self,
        key: &Self::Key,
        property: &str,
        value: &[u8],
        flags: u32,
    ) -> std::result::Result<(), Status>;
    fn finalize_key(&self, key: &Self::Key) -> std::result::Result<(), Status>;

    fn get_property(
        &self,
        key: &Self::Key,
        property: &str,
        output: Option<&mut [u8]>,
    ) -> std::result::Result<usize, Status>;
    fn export_key(
        &self,
        key: &Self::Key,
        blob_type: &str,
        output: Option<&mut [u8]>,
    ) -> std::result::Result<usize, Status>;
    fn sign_hash(
        &self,
        key: &Self::Key,
        padding: Option<&Padding<'_>>,
        digest: &[u8],
        output: Option<&mut [u8]>,
        flags: u32,
    ) -> std::result::Result<usize, Status>;
    fn decrypt(
        &self,
        key: &Self::Key,
        input: &[u8],
        padding: Option<&Padding<'_>>,
        output: Option<&mut [u8]>,
        flags: u32,
    ) -> std::result::Result<usize, Status>;

    fn free_key(&self, key: Self::Key);
}

/// Opens a key storage provider by name. Called once per `Store`.
pub trait ProviderLoader {
    type Provider: KeyStorageProvider;

    fn open_provider(&self, name: &str) -> std::result::Result<Self::Provider, Status>;
}

/// An open certificate store, closed when dropped.
pub struct OpenStore<'p, C: CertificateStore> {
    provider: &'p C,
    store: Option<C::Store>,
    location: StoreLocation,
}

impl<'p, C: CertificateStore> OpenStore<'p, C> {
    pub fn open(provider: &'p C, location: StoreLocation) -> Result<Self> {
        let store = provider
            .open_store(location)
            .map_err(Error::call_failed("CertOpenStore"))?;
        Ok(Self {
            provider,
            store: Some(store),
            location,
        })
    }

    pub fn provider(&self) -> &'p C {
        self.provider
    }

    pub fn location(&self) -> StoreLocation {
        self.location
    }

    pub fn handle(&self) -> &C::Store {
        self.store.as_ref().expect("store handle is held until drop")
    }

    pub fn add(&self, context: &CertContext<'_, C>, disposition: AddDisposition) -> Result<()> {
        self.provider
            .add_certificate(self.handle(), context.raw(), disposition)
            .map_err(Error::call_failed("CertAddCertificateContextToStore"))
    }
}

impl<C: CertificateStore> Drop for OpenStore<'_, C> {
    fn drop(&mut self) {
        if let Some(store) = self.store.take() {
            self.provider.close_store(store);
        }
    }
}

/// A certificate context, freed when dropped.
pub struct CertContext<'p, C: CertificateStore> {
    provider: &'p C,
    context: Option<C::Context>,
}

impl<'p, C: CertificateStore> CertContext<'p, C> {
    pub fn create(provider: &'p C, der: &[u8]) -> Result<Self> {
        let context = provider
            .create_context(der)
            .map_err(Error::call_failed("CertCreateCertificateContext"))?;
        Ok(Self::from_raw(provider, context))
    }

    pub fn from_raw(provider: &'p C, context: C::Context) -> Self {
        Self {
            provider,
            context: Some(context),
        }
    }

    pub fn raw(&self) -> &C::Context {
        self.context
            .as_ref()
            .expect("certificate context is held until released")
    }

    pub fn into_raw(mut self) -> C::Context {
        self.context
            .take()
            .expect("certificate context is held until released")
    }

    pub fn encoded(&self) -> &[u8] {
        self.provider.encoded(self.raw())
    }

    pub fn intended_key_usage(&self) -> u16 {
        self.provider.intended_key_usage(self.raw())
    }

    pub fn associate_private_key(&self) -> std::result::Result<(), Status> {
        self.provider.associate_private_key(self.raw())
    }

    pub fn delete(self) -> Result<()> {
        let provider = self.provider;
        provider
            .delete_certificate(self.into_raw())
            .map_err(Error::call_failed("CertDeleteCertificateFromStore"))
    }
}

impl<C: CertificateStore> Drop for CertContext<'_, C> {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            self.provider.free_context(context);
        }
    }
}

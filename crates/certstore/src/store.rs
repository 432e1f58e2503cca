//! Store-scoped operations: certificate lookup, installation, linking into
//! the user scope, removal, and key access.

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::certificate::Certificate;
use crate::config::StoreConfig;
use crate::env::DataRoot;
use crate::error::{Error, Result};
use crate::key::{self, Key, RsaKey};
use crate::provider::{
    AddDisposition, CertContext, CertificateStore, KeyStorageProvider, OpenStore, ProviderLoader,
    StoreLocation,
};
use crate::selector;

/// Result of [`Store::link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The machine scope holds no certificate from a trusted issuer.
    NoMachineCertificate,
    /// The user scope already holds a certificate with the same serial.
    AlreadyLinked,
    Linked,
}

/// A key container and its certificates, bound to one key storage provider.
///
/// The provider is opened once in [`Store::open`] and shared with every key
/// obtained from the store.
pub struct Store<C: CertificateStore, K: KeyStorageProvider> {
    config: StoreConfig,
    certs: C,
    provider: Arc<K>,
    software_root: Option<String>,
}

impl<C: CertificateStore, K: KeyStorageProvider> Store<C, K> {
    pub fn open<L>(
        config: StoreConfig,
        loader: &L,
        certs: C,
        data_root: &dyn DataRoot,
    ) -> Result<Self>
    where
        L: ProviderLoader<Provider = K>,
    {
        config.validate()?;
        let provider = loader
            .open_provider(&config.provider)
            .map_err(Error::call_failed("NCryptOpenStorageProvider"))?;

        let software_root = if config.is_software_provider() {
            let root = data_root.data_root();
            if root.is_none() {
                warn!(
                    provider = %config.provider,
                    "data root is not set, key containers will be reported by unique name"
                );
            }
            root
        } else {
            None
        };

        info!(provider = %config.provider, container = %config.container, "opened store");
        Ok(Self {
            config,
            certs,
            provider: Arc::new(provider),
            software_root,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn certificate_store(&self) -> &C {
        &self.certs
    }

    /// First certificate in `location` from `issuers` that is usable for
    /// signing.
    pub fn select(
        &self,
        location: StoreLocation,
        issuers: &[String],
    ) -> Result<Option<Certificate>> {
        selector::select(&self.certs, location, issuers)
    }

    /// The current machine certificate.
    pub fn cert(&self) -> Result<Option<Certificate>> {
        self.select(StoreLocation::MACHINE_MY, &self.config.issuers)
    }

    /// The current intermediate, looked up where [`Store::store`] puts it.
    pub fn intermediate(&self) -> Result<Option<Certificate>> {
        self.select(StoreLocation::MACHINE_CA, &self.config.intermediate_issuers)
    }

    pub fn root(&self, issuers: &[String]) -> Result<Option<Certificate>> {
        self.select(StoreLocation::MACHINE_ROOT, issuers)
    }

    /// Makes the machine certificate available in the current user's
    /// personal store.
    pub fn link(&self) -> Result<LinkOutcome> {
        let Some(machine) = self.cert()? else {
            info!("no machine certificate to link");
            return Ok(LinkOutcome::NoMachineCertificate);
        };

        if let Some(user) = self.select(StoreLocation::USER_MY, &self.config.issuers)? {
            if user.same_serial(&machine) {
                info!(
                    serial = %machine.serial_hex(),
                    "certificate is already linked to the user store"
                );
                return Ok(LinkOutcome::AlreadyLinked);
            }
        }

        let context = CertContext::create(&self.certs, machine.der())?;
        if let Err(code) = context.associate_private_key() {
            warn!(
                %code,
                "found a matching private key for the certificate, but association failed"
            );
        }

        let user_store = OpenStore::open(&self.certs, StoreLocation::USER_MY)?;
        user_store.add(&context, AddDisposition::Always)?;
        info!(serial = %machine.serial_hex(), "linked machine certificate to the user store");
        Ok(LinkOutcome::Linked)
    }

    /// Deletes every certificate of each trusted issuer from the user store
    /// and, if `delete_from_machine`, from the machine store.
    /// Deletions already made stay made when a later one fails.
    pub fn remove(&self, delete_from_machine: bool) -> Result<()> {
        for issuer in &self.config.issuers {
            self.remove_from(StoreLocation::USER_MY, issuer)?;
            if delete_from_machine {
                self.remove_from(StoreLocation::MACHINE_MY, issuer)?;
            }
        }
        Ok(())
    }

    fn remove_from(&self, location: StoreLocation, issuer: &str) -> Result<()> {
        let store = OpenStore::open(&self.certs, location)?;
        while let Some(context) = selector::find_first(&store, issuer)? {
            context.delete()?;
            info!(%location, %issuer, "removed certificate");
        }
        Ok(())
    }

    /// Installs `cert` in the machine personal store bound to this store's
    /// private key, and `intermediate` in the machine CA store.
    pub fn store(&self, cert: &Certificate, intermediate: &Certificate) -> Result<()> {
        let context = CertContext::create(&self.certs, cert.der())?;
        context
            .associate_private_key()
            .map_err(Error::AssociationFailed)?;

        OpenStore::open(&self.certs, StoreLocation::MACHINE_MY)?
            .add(&context, AddDisposition::Always)?;

        let intermediate_context = CertContext::create(&self.certs, intermediate.der())?;
        OpenStore::open(&self.certs, StoreLocation::MACHINE_CA)?
            .add(&intermediate_context, AddDisposition::Always)?;

        info!(
            serial = %cert.serial_hex(),
            intermediate = %intermediate.serial_hex(),
            "stored certificate and intermediate"
        );
        Ok(())
    }

    /// Opens the existing key in this store's container.
    pub fn key(&self) -> Result<Key<K>> {
        key::open(
            &self.provider,
            &self.config.container,
            self.software_root.as_deref(),
        )
    }

    /// Creates a new RSA key of `key_size` bits in this store's container,
    /// replacing any existing key.
    pub fn generate(&self, key_size: u32) -> Result<RsaKey<K>> {
        key::generate(
            &self.provider,
            &self.config.container,
            key_size,
            self.software_root.as_deref(),
        )
    }
}

impl<C: CertificateStore, K: KeyStorageProvider> fmt::Debug for Store<C, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("config", &self.config)
            .field("software_root", &self.software_root)
            .finish_non_exhaustive()
    }
}

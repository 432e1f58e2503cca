use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use tracing::trace;

use crate::certificate::{Certificate, intended_key_usage};
use crate::provider::{AddDisposition, CertificateStore, Status, StoreLocation};

#[derive(Debug, Clone)]
struct Entry {
    id: u64,
    der: Vec<u8>,
    issuer: String,
    serial: Vec<u8>,
    key_usage: u16,
}

/// Open handle on one [`StoreLocation`] of a [`MemoryCertStore`].
#[derive(Debug)]
pub struct MemoryStoreHandle {
    location: StoreLocation,
}

/// A certificate context. Owns a copy of the encoding and remembers which
/// entry it was found at, if any.
#[derive(Debug)]
pub struct MemoryContext {
    der: Vec<u8>,
    issuer: String,
    serial: Vec<u8>,
    key_usage: u16,
    origin: Option<(StoreLocation, u64)>,
}

impl MemoryContext {
    fn from_entry(location: StoreLocation, entry: &Entry) -> Self {
        Self {
            der: entry.der.clone(),
            issuer: entry.issuer.clone(),
            serial: entry.serial.clone(),
            key_usage: entry.key_usage,
            origin: Some((location, entry.id)),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    locations: HashMap<StoreLocation, Vec<Entry>>,
    unavailable: HashSet<StoreLocation>,
    private_keys: HashSet<Vec<u8>>,
    open_stores: usize,
    live_contexts: usize,
    mutations: u64,
}

impl State {
    fn insert(&mut self, location: StoreLocation, mut entry: Entry) -> u64 {
        self.next_id += 1;
        entry.id = self.next_id;
        self.locations.entry(location).or_default().push(entry);
        self.next_id
    }
}

/// Certificate store kept in process memory.
///
/// Issuer search is a case-insensitive substring match on the formatted
/// issuer name, in insertion order. Certificate identity is issuer plus
/// serial number.
#[derive(Debug, Default)]
pub struct MemoryCertStore {
    state: Mutex<State>,
}

impl MemoryCertStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("memory certificate store lock poisoned")
    }

    /// Adds a parsed certificate to `location` without counting it as a
    /// mutation.
    pub fn insert(&self, location: StoreLocation, cert: &Certificate) {
        let key_usage = intended_key_usage(cert.der()).unwrap_or(0);
        self.insert_raw(location, cert.issuer(), cert.der().to_vec(), key_usage);
    }

    /// Adds an entry with an explicit issuer and key usage. `der` is not
    /// required to parse.
    pub fn insert_raw(&self, location: StoreLocation, issuer: &str, der: Vec<u8>, key_usage: u16) {
        let serial = Certificate::from_der(der.clone())
            .map(|cert| cert.serial().to_vec())
            .unwrap_or_default();
        self.state().insert(
            location,
            Entry {
                id: 0,
                der,
                issuer: issuer.to_string(),
                serial,
                key_usage,
            },
        );
    }

    /// Makes private key association succeed for certificates with this
    /// certificate's public key.
    pub fn register_private_key(&self, cert: &Certificate) -> crate::Result<()> {
        let spki = cert.public_key_info()?;
        self.state().private_keys.insert(spki);
        Ok(())
    }

    /// Makes every later open of `location` fail with access denied.
    pub fn make_unavailable(&self, location: StoreLocation) {
        self.state().unavailable.insert(location);
    }

    /// Encodings held at `location`, in store order.
    pub fn certificates(&self, location: StoreLocation) -> Vec<Vec<u8>> {
        self.state()
            .locations
            .get(&location)
            .map(|entries| entries.iter().map(|e| e.der.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of successful adds and deletes.
    pub fn mutations(&self) -> u64 {
        self.state().mutations
    }

    /// Store handles and certificate contexts not yet released.
    pub fn open_handles(&self) -> (usize, usize) {
        let state = self.state();
        (state.open_stores, state.live_contexts)
    }
}

impl CertificateStore for MemoryCertStore {
    type Store = MemoryStoreHandle;
    type Context = MemoryContext;

    fn open_store(&self, location: StoreLocation) -> Result<MemoryStoreHandle, Status> {
        let mut state = self.state();
        if state.unavailable.contains(&location) {
            return Err(Status::E_ACCESSDENIED);
        }
        state.open_stores += 1;
        Ok(MemoryStoreHandle { location })
    }

    fn close_store(&self, _store: MemoryStoreHandle) {
        self.state().open_stores -= 1;
    }

    fn find_by_issuer(
        &self,
        store: &MemoryStoreHandle,
        issuer: &str,
        previous: Option<MemoryContext>,
    ) -> Result<MemoryContext, Status> {
        let mut state = self.state();
        let after = match previous {
            Some(context) => {
                state.live_contexts -= 1;
                context.origin.map_or(0, |(_, id)| id)
            }
            None => 0,
        };

        let needle = issuer.to_lowercase();
        let found = state
            .locations
            .get(&store.location)
            .and_then(|entries| {
                entries
                    .iter()
                    .filter(|e| e.id > after)
                    .find(|e| e.issuer.to_lowercase().contains(&needle))
            })
            .map(|entry| MemoryContext::from_entry(store.location, entry));

        match found {
            Some(context) => {
                state.live_contexts += 1;
                trace!(location = %store.location, %issuer, "found certificate");
                Ok(context)
            }
            None => Err(Status::CRYPT_E_NOT_FOUND),
        }
    }

    fn intended_key_usage(&self, context: &MemoryContext) -> u16 {
        context.key_usage
    }

    fn encoded<'c>(&self, context: &'c MemoryContext) -> &'c [u8] {
        &context.der
    }

    fn create_context(&self, der: &[u8]) -> Result<MemoryContext, Status> {
        let cert = Certificate::from_der(der.to_vec()).map_err(|_| Status::NTE_BAD_DATA)?;
        let key_usage = intended_key_usage(der).unwrap_or(0);
        self.state().live_contexts += 1;
        Ok(MemoryContext {
            serial: cert.serial().to_vec(),
            issuer: cert.issuer().to_string(),
            der: der.to_vec(),
            key_usage,
            origin: None,
        })
    }

    fn free_context(&self, _context: MemoryContext) {
        self.state().live_contexts -= 1;
    }

    fn associate_private_key(&self, context: &MemoryContext) -> Result<(), Status> {
        let spki = Certificate::from_der(context.der.clone())
            .and_then(|cert| cert.public_key_info())
            .map_err(|_| Status::NTE_BAD_DATA)?;
        if self.state().private_keys.contains(&spki) {
            Ok(())
        } else {
            Err(Status::CRYPT_E_NOT_FOUND)
        }
    }

    fn add_certificate(
        &self,
        store: &MemoryStoreHandle,
        context: &MemoryContext,
        disposition: AddDisposition,
    ) -> Result<(), Status> {
        let mut state = self.state();
        let entries = state.locations.entry(store.location).or_default();
        let existing = entries
            .iter()
            .position(|e| e.issuer == context.issuer && e.serial == context.serial);

        match existing {
            Some(_) if disposition == AddDisposition::New => return Err(Status::CRYPT_E_EXISTS),
            Some(index) => {
                // Replacement keeps the entry's position in search order.
                let entry = &mut entries[index];
                entry.der = context.der.clone();
                entry.key_usage = context.key_usage;
            }
            None => {
                let entry = Entry {
                    id: 0,
                    der: context.der.clone(),
                    issuer: context.issuer.clone(),
                    serial: context.serial.clone(),
                    key_usage: context.key_usage,
                };
                state.insert(store.location, entry);
            }
        }
        state.mutations += 1;
        Ok(())
    }

    fn delete_certificate(&self, context: MemoryContext) -> Result<(), Status> {
        let mut state = self.state();
        state.live_contexts -= 1;
        let (location, id) = context.origin.ok_or(Status::NTE_INVALID_PARAMETER)?;
        let entries = state
            .locations
            .get_mut(&location)
            .ok_or(Status::CRYPT_E_NOT_FOUND)?;
        let index = entries
            .iter()
            .position(|e| e.id == id)
            .ok_or(Status::CRYPT_E_NOT_FOUND)?;
        entries.remove(index);
        state.mutations += 1;
        Ok(())
    }
}

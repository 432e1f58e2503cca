//! Selection of the current certificate by walking trusted issuers in
//! priority order.

use tracing::{debug, info, warn};

use crate::certificate::{Certificate, key_usage};
use crate::error::{Error, Result};
use crate::provider::{CertContext, CertificateStore, OpenStore, StoreLocation};

/// Chained search over the certificates of one issuer.
///
/// Holds the most recently returned context. Each step hands it back to the
/// store, which releases it and resumes after it; whatever is held when the
/// cursor is dropped is freed.
pub struct IssuerCursor<'s, 'p, C: CertificateStore> {
    store: &'s OpenStore<'p, C>,
    issuer: &'s str,
    previous: Option<C::Context>,
    exhausted: bool,
}

impl<'s, 'p, C: CertificateStore> IssuerCursor<'s, 'p, C> {
    pub fn new(store: &'s OpenStore<'p, C>, issuer: &'s str) -> Self {
        Self {
            store,
            issuer,
            previous: None,
            exhausted: false,
        }
    }

    /// Advances to the next certificate from the issuer. `None` once the
    /// store reports nothing further.
    pub fn next(&mut self) -> Result<Option<&C::Context>> {
        if self.exhausted {
            return Ok(None);
        }
        let provider = self.store.provider();
        match provider.find_by_issuer(self.store.handle(), self.issuer, self.previous.take()) {
            Ok(context) => {
                let context: &C::Context = self.previous.insert(context);
                Ok(Some(context))
            }
            Err(code) if code.is_not_found() => {
                self.exhausted = true;
                Ok(None)
            }
            Err(code) => {
                self.exhausted = true;
                Err(Error::CallFailed {
                    call: "CertFindCertificateInStore",
                    code,
                })
            }
        }
    }
}

impl<C: CertificateStore> Drop for IssuerCursor<'_, '_, C> {
    fn drop(&mut self) {
        if let Some(context) = self.previous.take() {
            self.store.provider().free_context(context);
        }
    }
}

/// Returns the first certificate that carries the digital signature key
/// usage, trying `issuers` in order. Candidates whose encoding does not
/// parse are skipped.
pub fn select<C: CertificateStore>(
    certs: &C,
    location: StoreLocation,
    issuers: &[String],
) -> Result<Option<Certificate>> {
    let store = OpenStore::open(certs, location)?;

    for issuer in issuers {
        let mut cursor = IssuerCursor::new(&store, issuer);
        while let Some(context) = cursor.next()? {
            if certs.intended_key_usage(context) & key_usage::DIGITAL_SIGNATURE == 0 {
                debug!(%location, %issuer, "skipping certificate without digital signature usage");
                continue;
            }
            match Certificate::from_der(certs.encoded(context).to_vec()) {
                Ok(cert) => {
                    info!(%location, %issuer, serial = %cert.serial_hex(), "selected certificate");
                    return Ok(Some(cert));
                }
                Err(e) => warn!(%location, %issuer, error = %e, "skipping unparseable certificate"),
            }
        }
    }

    debug!(%location, "no certificate from a trusted issuer");
    Ok(None)
}

/// First certificate from `issuer` in `store`, regardless of key usage.
pub(crate) fn find_first<'p, C: CertificateStore>(
    store: &OpenStore<'p, C>,
    issuer: &str,
) -> Result<Option<CertContext<'p, C>>> {
    let provider = store.provider();
    match provider.find_by_issuer(store.handle(), issuer, None) {
        Ok(context) => Ok(Some(CertContext::from_raw(provider, context))),
        Err(code) if code.is_not_found() => Ok(None),
        Err(code) => Err(Error::CallFailed {
            call: "CertFindCertificateInStore",
            code,
        }),
    }
}

use std::sync::Arc;

use thiserror::Error;

use crate::fingerprint::Fingerprint;
use crate::keylist::{Endpoint, FormatError, KeylistDocument, Keylist, NotValidated};
use crate::queue::ValidatorMessageQueue;
use crate::store::blake3_hex;
use crate::transport::{Fetch, FetchError};
use crate::verifier::{SignatureVerifier, VerifyError};

/// Why one endpoint could not be synced. Never escapes a refresh cycle.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Precondition(#[from] NotValidated),
    #[error("signature check failed: {0}")]
    Verify(#[from] VerifyError),
    #[error("signature {url} does not verify")]
    BadSignature { url: String },
    #[error("keylist signed by {signer}, expected {expected}")]
    UntrustedSigner {
        signer: Fingerprint,
        expected: Fingerprint,
    },
    #[error("updating trust store: {0}")]
    Store(anyhow::Error),
}

/// A keylist whose signature checked out against its authority key.
#[derive(Clone, Debug)]
pub struct VerifiedKeylist {
    pub endpoint: Endpoint,
    pub document: KeylistDocument,
    /// Hex blake3 of the exact bytes that were verified.
    pub digest: String,
}

struct Narrator<'a> {
    queue: &'a ValidatorMessageQueue,
    step: u32,
}

impl Narrator<'_> {
    fn note(&mut self, msg: String) {
        self.step += 1;
        log::debug!("[step {}] {msg}", self.step);
        self.queue.add_message(msg, self.step);
    }
}

/// Fetch, validate and verify a single endpoint.
#[derive(Clone)]
pub struct Pipeline {
    transport: Arc<dyn Fetch>,
    verifier: Arc<dyn SignatureVerifier>,
    retries: u32,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Fetch>,
        verifier: Arc<dyn SignatureVerifier>,
        retries: u32,
    ) -> Self {
        Self {
            transport,
            verifier,
            retries,
        }
    }

    /// Run every check for `endpoint`, narrating progress onto `messages`.
    ///
    /// # Errors
    /// The first failing step; a note describing it is pushed before returning.
    pub fn check(
        &self,
        endpoint: &Endpoint,
        messages: &ValidatorMessageQueue,
    ) -> Result<VerifiedKeylist, SyncError> {
        let mut narrator = Narrator {
            queue: messages,
            step: 0,
        };
        let result = self.run(endpoint, &mut narrator);
        if let Err(e) = &result {
            narrator.note(format!("{}: {e}", endpoint.url));
        }
        result
    }

    fn run(
        &self,
        endpoint: &Endpoint,
        narrator: &mut Narrator<'_>,
    ) -> Result<VerifiedKeylist, SyncError> {
        let mut keylist = Keylist::new(endpoint.clone());

        narrator.note(format!("Downloading keylist {}", endpoint.url));
        let bytes = self.fetch_with_retries(&keylist, &endpoint.url)?;

        narrator.note("Validating keylist format".to_string());
        let document = keylist.validate_format(&bytes)?.clone();
        let sig_url = keylist.get_msg_sig_url()?.to_string();

        narrator.note(format!("Downloading signature {sig_url}"));
        let signature = self.fetch_with_retries(&keylist, &sig_url)?;

        narrator.note(format!("Verifying signature with {}", endpoint.fingerprint));
        let verification = self
            .verifier
            .verify(&bytes, &signature, &endpoint.fingerprint)?;
        if !verification.valid {
            return Err(SyncError::BadSignature { url: sig_url });
        }
        match verification.signer {
            Some(signer) if signer == endpoint.fingerprint => {}
            Some(signer) => {
                return Err(SyncError::UntrustedSigner {
                    signer,
                    expected: endpoint.fingerprint.clone(),
                })
            }
            None => return Err(SyncError::BadSignature { url: sig_url }),
        }

        narrator.note(format!(
            "Keylist verified, {} keys listed",
            document.keys.len()
        ));
        Ok(VerifiedKeylist {
            endpoint: endpoint.clone(),
            document,
            digest: blake3_hex(&bytes),
        })
    }

    fn fetch_with_retries(&self, keylist: &Keylist, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut attempt = 0;
        loop {
            match keylist.fetch_url(&*self.transport, url) {
                Ok(bytes) => return Ok(bytes),
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    log::warn!("{e}; retrying ({attempt}/{})", self.retries);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

//! Keylist endpoints and the documents they publish.
//!
//! A keylist is a JSON document listing fingerprints together with a
//! reference to its detached signature. [`Keylist::validate_format`] is the
//! only way a fetched document becomes usable: it either accepts the whole
//! document or rejects it, never a subset of its keys.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::fingerprint::Fingerprint;
use crate::schema;
use crate::transport::{Fetch, FetchError, ProxyConfigError, SocksProxy};

/// One configured keylist source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
    /// Key expected to have signed the keylist.
    pub fingerprint: Fingerprint,
    #[serde(default)]
    pub use_proxy: bool,
    #[serde(default)]
    pub proxy_host: Option<String>,
    #[serde(default)]
    pub proxy_port: Option<String>,
}

impl Endpoint {
    #[must_use]
    pub fn new(url: impl Into<String>, fingerprint: Fingerprint) -> Self {
        Self {
            url: url.into(),
            fingerprint,
            use_proxy: false,
            proxy_host: None,
            proxy_port: None,
        }
    }

    #[must_use]
    pub fn with_proxy(mut self, host: impl Into<String>, port: impl Into<String>) -> Self {
        self.use_proxy = true;
        self.proxy_host = Some(host.into());
        self.proxy_port = Some(port.into());
        self
    }

    /// The SOCKS5 proxy to route through, if this endpoint uses one.
    ///
    /// # Errors
    /// Returns an error when `use_proxy` is set but host/port are missing or malformed.
    pub fn proxy(&self) -> Result<Option<SocksProxy>, ProxyConfigError> {
        if !self.use_proxy {
            return Ok(None);
        }
        SocksProxy::from_parts(self.proxy_host.as_deref(), self.proxy_port.as_deref()).map(Some)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub signature_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEntry {
    pub fingerprint: Fingerprint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub revoked: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeylistDocument {
    pub metadata: Metadata,
    pub keys: Vec<KeyEntry>,
}

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("keylist is not valid JSON: {0}")]
    KeylistNotJson(String),
    #[error("keylist is invalid: {0}")]
    KeylistInvalid(String),
}

/// Raised when the signature URL is requested before a document validated.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("signature URL requested before the keylist passed validation")]
pub struct NotValidated;

/// Runtime state of an [`Endpoint`] during a single sync.
#[derive(Clone, Debug)]
pub struct Keylist {
    pub endpoint: Endpoint,
    fetched_document: Option<Vec<u8>>,
    document: Option<KeylistDocument>,
    signature_url: Option<Url>,
}

impl Keylist {
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            fetched_document: None,
            document: None,
            signature_url: None,
        }
    }

    /// Download `url` honouring this endpoint's proxy settings.
    ///
    /// # Errors
    /// Proxy misconfiguration is reported as [`FetchError::ProxyUrlDownload`].
    pub fn fetch_url(&self, transport: &dyn Fetch, url: &str) -> Result<Vec<u8>, FetchError> {
        let proxy = self.endpoint.proxy().map_err(|e| FetchError::ProxyUrlDownload {
            url: url.to_string(),
            proxy: format!(
                "{}:{}",
                self.endpoint.proxy_host.as_deref().unwrap_or_default(),
                self.endpoint.proxy_port.as_deref().unwrap_or_default()
            ),
            reason: e.to_string(),
        })?;
        transport.fetch(url, proxy.as_ref())
    }

    /// Download the keylist itself. The bytes are not trusted until
    /// [`Keylist::validate_format`] accepts them.
    ///
    /// # Errors
    /// See [`Keylist::fetch_url`].
    pub fn fetch(&self, transport: &dyn Fetch) -> Result<Vec<u8>, FetchError> {
        self.fetch_url(transport, &self.endpoint.url)
    }

    /// Validate `bytes` as a keylist and, on success, keep it as the current document.
    ///
    /// # Errors
    /// [`FormatError::KeylistNotJson`] for unparseable bytes,
    /// [`FormatError::KeylistInvalid`] for any structural or fingerprint problem.
    pub fn validate_format(&mut self, bytes: &[u8]) -> Result<&KeylistDocument, FormatError> {
        self.fetched_document = None;
        self.document = None;
        self.signature_url = None;

        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| FormatError::KeylistNotJson(e.to_string()))?;
        schema::validate_keylist(&value).map_err(FormatError::KeylistInvalid)?;

        if let Some(keys) = value.get("keys").and_then(Value::as_array) {
            for (i, entry) in keys.iter().enumerate() {
                let raw = entry
                    .get("fingerprint")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                raw.parse::<Fingerprint>()
                    .map_err(|e| FormatError::KeylistInvalid(format!("keys[{i}]: {e}")))?;
            }
        }

        let document: KeylistDocument = serde_json::from_value(value)
            .map_err(|e| FormatError::KeylistInvalid(e.to_string()))?;
        let signature_url = self.resolve_signature_url(&document.metadata.signature_uri)?;

        self.fetched_document = Some(bytes.to_vec());
        self.signature_url = Some(signature_url);
        Ok(self.document.insert(document))
    }

    fn resolve_signature_url(&self, reference: &str) -> Result<Url, FormatError> {
        let resolved = match Url::parse(reference) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&self.endpoint.url)
                .and_then(|base| base.join(reference))
                .map_err(|e| {
                    FormatError::KeylistInvalid(format!(
                        "cannot resolve signature_uri {reference:?}: {e}"
                    ))
                })?,
            Err(e) => {
                return Err(FormatError::KeylistInvalid(format!(
                    "invalid signature_uri {reference:?}: {e}"
                )))
            }
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            return Err(FormatError::KeylistInvalid(format!(
                "signature_uri must be http(s), got {}",
                resolved.scheme()
            )));
        }
        Ok(resolved)
    }

    /// Absolute URL of the detached signature for the validated document.
    ///
    /// # Errors
    /// [`NotValidated`] when no document has passed [`Keylist::validate_format`].
    pub fn get_msg_sig_url(&self) -> Result<&Url, NotValidated> {
        self.signature_url.as_ref().ok_or(NotValidated)
    }

    #[must_use]
    pub fn fetched_document(&self) -> Option<&[u8]> {
        self.fetched_document.as_deref()
    }

    #[must_use]
    pub fn document(&self) -> Option<&KeylistDocument> {
        self.document.as_ref()
    }
}

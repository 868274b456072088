use std::fmt;
use std::io::Read;
use std::time::Duration;

use thiserror::Error;
use url::Url;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Keylists are small; anything beyond this is treated as a hostile response.
pub const DEFAULT_MAX_BYTES: u64 = 1024 * 1024;

/// Download failures, split so callers can tell "check your network" apart
/// from "check your proxy settings".
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("error downloading {url}: {reason}")]
    UrlDownload { url: String, reason: String },
    #[error("error downloading {url} through SOCKS5 proxy {proxy}: {reason}")]
    ProxyUrlDownload {
        url: String,
        proxy: String,
        reason: String,
    },
}

impl FetchError {
    fn direct(url: &str, reason: impl Into<String>) -> Self {
        Self::UrlDownload {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    fn proxied(url: &str, proxy: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self::ProxyUrlDownload {
            url: url.to_string(),
            proxy: proxy.to_string(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn is_proxy(&self) -> bool {
        matches!(self, Self::ProxyUrlDownload { .. })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProxyConfigError {
    #[error("proxy host is not set")]
    MissingHost,
    #[error("proxy port is not set")]
    MissingPort,
    #[error("invalid proxy port: {0}")]
    BadPort(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocksProxy {
    pub host: String,
    pub port: u16,
}

impl SocksProxy {
    /// Build from the loosely-typed host/port pair kept in endpoint settings.
    ///
    /// # Errors
    /// Returns an error when either part is missing or the port is not a number.
    pub fn from_parts(host: Option<&str>, port: Option<&str>) -> Result<Self, ProxyConfigError> {
        let host = host
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or(ProxyConfigError::MissingHost)?;
        let port = port
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or(ProxyConfigError::MissingPort)?;
        let port = port
            .parse::<u16>()
            .map_err(|_| ProxyConfigError::BadPort(port.to_string()))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    fn uri(&self) -> String {
        if self.host.contains(':') {
            format!("socks5://[{}]:{}", self.host, self.port)
        } else {
            format!("socks5://{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for SocksProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// GET a URL, optionally through a SOCKS5 proxy. Implementations must not retry.
pub trait Fetch: Send + Sync {
    /// # Errors
    /// Returns a classified [`FetchError`] on any failure.
    fn fetch(&self, url: &str, proxy: Option<&SocksProxy>) -> Result<Vec<u8>, FetchError>;
}

#[derive(Clone, Debug)]
pub struct HttpTransport {
    timeout: Duration,
    max_bytes: u64,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_MAX_BYTES)
    }
}

impl HttpTransport {
    #[must_use]
    pub fn new(timeout: Duration, max_bytes: u64) -> Self {
        Self { timeout, max_bytes }
    }

    fn fail(&self, url: &str, proxy: Option<&SocksProxy>, reason: String) -> FetchError {
        match proxy {
            Some(p) => FetchError::proxied(url, p, reason),
            None => FetchError::direct(url, reason),
        }
    }

    fn classify(&self, url: &str, proxy: Option<&SocksProxy>, err: ureq::Error) -> FetchError {
        match err {
            ureq::Error::Status(code, _) => FetchError::direct(url, format!("HTTP status {code}")),
            ureq::Error::Transport(t) => match t.kind() {
                ureq::ErrorKind::InvalidUrl | ureq::ErrorKind::UnknownScheme => {
                    FetchError::direct(url, t.to_string())
                }
                // Through SOCKS every connect/DNS failure surfaces from the proxy hop.
                _ => self.fail(url, proxy, t.to_string()),
            },
        }
    }
}

impl Fetch for HttpTransport {
    fn fetch(&self, url: &str, proxy: Option<&SocksProxy>) -> Result<Vec<u8>, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::direct(url, e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::direct(
                url,
                format!("unsupported URL scheme: {}", parsed.scheme()),
            ));
        }

        let mut builder = ureq::AgentBuilder::new().timeout(self.timeout);
        if let Some(p) = proxy {
            let socks = ureq::Proxy::new(p.uri())
                .map_err(|e| FetchError::proxied(url, p, e.to_string()))?;
            builder = builder.proxy(socks);
        }
        let agent = builder.build();

        log::debug!(
            "GET {url}{}",
            proxy.map(|p| format!(" via socks5 {p}")).unwrap_or_default()
        );
        let resp = agent
            .get(parsed.as_str())
            .call()
            .map_err(|e| self.classify(url, proxy, e))?;

        let mut body = Vec::new();
        resp.into_reader()
            .take(self.max_bytes.saturating_add(1))
            .read_to_end(&mut body)
            .map_err(|e| self.fail(url, proxy, e.to_string()))?;
        if body.len() as u64 > self.max_bytes {
            return Err(FetchError::direct(
                url,
                format!("response exceeds {} bytes", self.max_bytes),
            ));
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_from_parts_requires_host_and_numeric_port() {
        assert_eq!(
            SocksProxy::from_parts(Some("127.0.0.1"), Some("9050")).unwrap(),
            SocksProxy {
                host: "127.0.0.1".into(),
                port: 9050
            }
        );
        assert_eq!(
            SocksProxy::from_parts(None, Some("9050")),
            Err(ProxyConfigError::MissingHost)
        );
        assert_eq!(
            SocksProxy::from_parts(Some("127.0.0.1"), Some(" ")),
            Err(ProxyConfigError::MissingPort)
        );
        assert_eq!(
            SocksProxy::from_parts(Some("127.0.0.1"), Some("tor")),
            Err(ProxyConfigError::BadPort("tor".into()))
        );
    }

    #[test]
    fn proxy_uri_brackets_ipv6() {
        let p = SocksProxy {
            host: "::1".into(),
            port: 9050,
        };
        assert_eq!(p.uri(), "socks5://[::1]:9050");
        assert_eq!(p.to_string(), "::1:9050");
    }

    #[test]
    fn rejects_non_http_scheme_without_network() {
        let err = HttpTransport::default()
            .fetch("ftp://example.com/keylist.json", None)
            .unwrap_err();
        assert!(matches!(err, FetchError::UrlDownload { .. }));
    }
}

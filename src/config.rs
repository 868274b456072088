use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::keylist::Endpoint;
use crate::transport::{DEFAULT_MAX_BYTES, DEFAULT_TIMEOUT};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub timeout_secs: u64,
    pub max_document_bytes: u64,
    pub retries: u32,
    pub interval_secs: u64,
    pub gpg_homedir: Option<PathBuf>,
    pub store_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            max_document_bytes: DEFAULT_MAX_BYTES,
            retries: 1,
            interval_secs: 3600,
            gpg_homedir: None,
            store_dir: None,
        }
    }
}

impl Settings {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

impl Config {
    /// # Errors
    /// Returns an error on malformed TOML or an endpoint that cannot be used.
    pub fn parse(data: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(data)?;
        cfg.check()?;
        Ok(cfg)
    }

    /// # Errors
    /// Returns an error when the file cannot be read or does not parse.
    pub fn load_from(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&data).with_context(|| format!("loading {}", path.display()))
    }

    /// Load `explicit`, else `$KEYSYNC_CONFIG`, else `~/.keysync/config.toml`.
    ///
    /// # Errors
    /// Returns an error when no location can be determined or loading fails.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("KEYSYNC_CONFIG").ok().map(PathBuf::from))
            .or_else(|| {
                let mut p = dirs::home_dir()?;
                p.push(".keysync");
                p.push("config.toml");
                Some(p)
            })
            .ok_or_else(|| anyhow!("no config path and no home dir"))?;
        Self::load_from(&path)
    }

    fn check(&self) -> Result<()> {
        for ep in &self.endpoints {
            let url = url::Url::parse(&ep.url).with_context(|| format!("endpoint url {}", ep.url))?;
            if !matches!(url.scheme(), "http" | "https") {
                bail!("endpoint {} must be http(s)", ep.url);
            }
            ep.proxy().with_context(|| format!("endpoint {} proxy", ep.url))?;
        }
        if self.settings.max_document_bytes == 0 {
            bail!("max_document_bytes must be positive");
        }
        if self.settings.timeout_secs == 0 {
            bail!("timeout_secs must be positive");
        }
        if self.settings.interval_secs == 0 {
            bail!("interval_secs must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_endpoints_and_defaults() {
        let cfg = Config::parse(
            r#"
[settings]
retries = 3

[[endpoints]]
url = "https://example.org/keylist.json"
fingerprint = "927F 419D 7EC8 2C2F 149C  1BD1 403C 2657 CD99 4F73"

[[endpoints]]
url = "https://onion.example/keylist.json"
fingerprint = "1111111111111111111111111111111111111111"
use_proxy = true
proxy_host = "127.0.0.1"
proxy_port = "9050"
"#,
        )
        .unwrap();
        assert_eq!(cfg.settings.retries, 3);
        assert_eq!(cfg.settings.timeout_secs, 30);
        assert_eq!(cfg.endpoints.len(), 2);
        assert_eq!(
            cfg.endpoints[0].fingerprint.as_str(),
            "927F419D7EC82C2F149C1BD1403C2657CD994F73"
        );
        assert_eq!(cfg.endpoints[1].proxy().unwrap().unwrap().port, 9050);
    }

    #[test]
    fn rejects_proxy_without_port() {
        let err = Config::parse(
            r#"
[[endpoints]]
url = "https://example.org/keylist.json"
fingerprint = "1111111111111111111111111111111111111111"
use_proxy = true
proxy_host = "127.0.0.1"
"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("proxy port is not set"));
    }

    #[test]
    fn rejects_zero_interval() {
        let err = Config::parse("[settings]\ninterval_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("interval_secs"), "{err}");
    }

    #[test]
    fn rejects_zero_timeout() {
        let err = Config::parse("[settings]\ntimeout_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("timeout_secs"), "{err}");
    }

    #[test]
    fn rejects_bad_fingerprint() {
        assert!(Config::parse(
            r#"
[[endpoints]]
url = "https://example.org/keylist.json"
fingerprint = "abc"
"#
        )
        .is_err());
    }

    #[test]
    fn empty_config_is_valid() {
        let cfg = Config::parse("").unwrap();
        assert!(cfg.endpoints.is_empty());
        assert_eq!(cfg.settings.interval(), Duration::from_secs(3600));
    }
}

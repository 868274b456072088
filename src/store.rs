use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::fingerprint::Fingerprint;
use crate::keylist::KeyEntry;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustStatus {
    Trusted,
    Revoked,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustRecord {
    pub fingerprint: Fingerprint,
    #[serde(default)]
    pub name: Option<String>,
    pub status: TrustStatus,
    pub source: String,         // keylist URL that last touched this key
    pub keylist_digest: String, // hex blake3 of the verified keylist bytes
    pub updated: String,        // RFC3339
}

/// Local trust state. Only verified keylists reach these methods.
pub trait TrustStore: Send + Sync {
    /// # Errors
    /// Returns an error when the change cannot be persisted.
    fn trust(&self, source: &str, keylist_digest: &str, key: &KeyEntry) -> Result<()>;

    /// # Errors
    /// Returns an error when the change cannot be persisted.
    fn revoke(&self, source: &str, keylist_digest: &str, key: &KeyEntry) -> Result<()>;
}

/// One JSON record per fingerprint inside a directory.
#[derive(Clone, Debug)]
pub struct FileTrustStore {
    dir: PathBuf,
}

pub fn default_store_dir() -> Result<PathBuf> {
    if let Ok(custom) = std::env::var("KEYSYNC_STORE_DIR") {
        return Ok(PathBuf::from(custom));
    }
    let home = dirs::home_dir().ok_or_else(|| anyhow!("no home dir"))?;
    Ok(home.join(".keysync").join("trust"))
}

impl FileTrustStore {
    /// Open (creating if needed) a store rooted at `dir`.
    ///
    /// # Errors
    /// Returns an error when the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{fingerprint}.json"))
    }

    fn write(&self, status: TrustStatus, source: &str, digest: &str, key: &KeyEntry) -> Result<()> {
        let record = TrustRecord {
            fingerprint: key.fingerprint.clone(),
            name: key.name.clone(),
            status,
            source: source.to_string(),
            keylist_digest: digest.to_string(),
            updated: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        };
        let path = self.record_path(&key.fingerprint);
        std::fs::write(&path, serde_json::to_vec_pretty(&record)?)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when an existing record cannot be read or parsed.
    pub fn get(&self, fingerprint: &Fingerprint) -> Result<Option<TrustRecord>> {
        let path = self.record_path(fingerprint);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        Ok(Some(serde_json::from_slice(&data)?))
    }

    /// All records, sorted by fingerprint. Files that are not records are skipped.
    ///
    /// # Errors
    /// Returns an error when the directory cannot be read.
    pub fn list(&self) -> Result<Vec<TrustRecord>> {
        let mut out = Vec::new();
        for ent in std::fs::read_dir(&self.dir)? {
            let ent = ent?;
            let name = ent.file_name().to_string_lossy().to_string();
            if !name.ends_with(".json") { continue; }
            let bytes = std::fs::read(ent.path())?;
            match serde_json::from_slice::<TrustRecord>(&bytes) {
                Ok(rec) => out.push(rec),
                Err(e) => log::warn!("skipping {name}: {e}"),
            }
        }
        out.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        Ok(out)
    }
}

impl TrustStore for FileTrustStore {
    fn trust(&self, source: &str, keylist_digest: &str, key: &KeyEntry) -> Result<()> {
        self.write(TrustStatus::Trusted, source, keylist_digest, key)
    }

    fn revoke(&self, source: &str, keylist_digest: &str, key: &KeyEntry) -> Result<()> {
        self.write(TrustStatus::Revoked, source, keylist_digest, key)
    }
}

pub fn blake3_hex(data: &[u8]) -> String {
    let mut h = blake3::Hasher::new();
    h.update(data);
    hex::encode(h.finalize().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(fp: &str, revoked: bool) -> KeyEntry {
        KeyEntry {
            fingerprint: fp.parse().unwrap(),
            name: Some("Example".into()),
            revoked,
        }
    }

    #[test]
    fn trust_then_revoke_overwrites_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTrustStore::open(dir.path()).unwrap();
        let key = entry("927F419D7EC82C2F149C1BD1403C2657CD994F73", false);

        store.trust("https://example.org/k.json", "aa", &key).unwrap();
        let rec = store.get(&key.fingerprint).unwrap().unwrap();
        assert_eq!(rec.status, TrustStatus::Trusted);
        assert_eq!(rec.keylist_digest, "aa");

        store.revoke("https://example.org/k.json", "bb", &key).unwrap();
        let rec = store.get(&key.fingerprint).unwrap().unwrap();
        assert_eq!(rec.status, TrustStatus::Revoked);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn list_skips_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::write(dir.path().join("junk.json"), "{}").unwrap();
        let store = FileTrustStore::open(dir.path()).unwrap();
        store
            .trust("u", "d", &entry("1111111111111111111111111111111111111111", false))
            .unwrap();
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn blake3_hex_is_64_chars() {
        assert_eq!(blake3_hex(b"keylist").len(), 64);
    }
}

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const FINGERPRINT_BYTES: usize = 20;

/// OpenPGP v4 key fingerprint in canonical form (40 uppercase hex digits).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FingerprintError {
    #[error("fingerprint must be {expected} hex digits, got {got}")]
    Length { expected: usize, got: usize },
    #[error("fingerprint contains non-hex characters")]
    Charset,
}

impl Fingerprint {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Fingerprint {
    type Err = FingerprintError;

    /// Whitespace is ignored so the grouped form `ABCD 1234 ...` is accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        if compact.len() != FINGERPRINT_BYTES * 2 {
            return Err(FingerprintError::Length {
                expected: FINGERPRINT_BYTES * 2,
                got: compact.len(),
            });
        }
        hex::decode(&compact).map_err(|_| FingerprintError::Charset)?;
        Ok(Self(compact.to_ascii_uppercase()))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_grouped_lowercase() {
        let fp: Fingerprint = "927f 419d 7ec8 2c2f 149c  1bd1 403c 2657 cd99 4f73"
            .parse()
            .unwrap();
        assert_eq!(fp.as_str(), "927F419D7EC82C2F149C1BD1403C2657CD994F73");
    }

    #[test]
    fn rejects_short_and_non_hex() {
        assert_eq!(
            "ABCD".parse::<Fingerprint>(),
            Err(FingerprintError::Length { expected: 40, got: 4 })
        );
        assert_eq!(
            "Z27F419D7EC82C2F149C1BD1403C2657CD994F73".parse::<Fingerprint>(),
            Err(FingerprintError::Charset)
        );
    }

    #[test]
    fn deserializes_from_json_string() {
        let fp: Fingerprint =
            serde_json::from_str("\"927F419D7EC82C2F149C1BD1403C2657CD994F73\"").unwrap();
        assert_eq!(fp.to_string(), "927F419D7EC82C2F149C1BD1403C2657CD994F73");
        assert!(serde_json::from_str::<Fingerprint>("\"nope\"").is_err());
    }
}

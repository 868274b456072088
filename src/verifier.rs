use std::io::Write;
use std::path::PathBuf;
use std::process::Command;

use thiserror::Error;

use crate::fingerprint::Fingerprint;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verification {
    pub valid: bool,
    /// Primary key that produced the signature, when the verifier could tell.
    pub signer: Option<Fingerprint>,
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("staging verification input: {0}")]
    Io(#[from] std::io::Error),
    #[error("running {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
}

/// Detached-signature check over raw document bytes.
pub trait SignatureVerifier: Send + Sync {
    /// # Errors
    /// Only for failures to run the check; a bad signature is `Ok` with `valid == false`.
    fn verify(
        &self,
        document: &[u8],
        signature: &[u8],
        authority: &Fingerprint,
    ) -> Result<Verification, VerifyError>;
}

/// Verifier backed by the `gpg` command line.
#[derive(Clone, Debug)]
pub struct GpgVerifier {
    program: String,
    homedir: Option<PathBuf>,
}

impl Default for GpgVerifier {
    fn default() -> Self {
        Self {
            program: "gpg".into(),
            homedir: None,
        }
    }
}

impl GpgVerifier {
    #[must_use]
    pub fn new(homedir: Option<PathBuf>) -> Self {
        Self {
            homedir,
            ..Self::default()
        }
    }
}

impl SignatureVerifier for GpgVerifier {
    fn verify(
        &self,
        document: &[u8],
        signature: &[u8],
        authority: &Fingerprint,
    ) -> Result<Verification, VerifyError> {
        let mut doc_file = tempfile::NamedTempFile::new()?;
        doc_file.write_all(document)?;
        doc_file.flush()?;
        let mut sig_file = tempfile::NamedTempFile::new()?;
        sig_file.write_all(signature)?;
        sig_file.flush()?;

        let mut cmd = Command::new(&self.program);
        if let Some(home) = &self.homedir {
            cmd.arg("--homedir").arg(home);
        }
        cmd.args(["--batch", "--no-tty", "--status-fd", "1", "--verify"])
            .arg(sig_file.path())
            .arg(doc_file.path());

        let output = cmd.output().map_err(|source| VerifyError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        let status = String::from_utf8_lossy(&output.stdout);
        let signer = parse_validsig(&status);
        let valid = output.status.success() && signer.is_some();
        if !valid {
            log::warn!(
                "gpg rejected signature (expected signer {authority}): {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(Verification { valid, signer })
    }
}

/// Extract the signer from `[GNUPG:] VALIDSIG` status output.
///
/// The last field is the primary key fingerprint when the signature was made
/// by a subkey; otherwise the first field is the signing key itself.
fn parse_validsig(status: &str) -> Option<Fingerprint> {
    status.lines().find_map(|line| {
        let rest = line.strip_prefix("[GNUPG:] VALIDSIG ")?;
        let fields: Vec<&str> = rest.split_whitespace().collect();
        let candidate = if fields.len() >= 10 {
            fields[9]
        } else {
            fields.first().copied()?
        };
        candidate.parse().ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validsig_prefers_primary_fingerprint() {
        let status = "\
[GNUPG:] NEWSIG
[GNUPG:] GOODSIG 403C2657CD994F73 Example Org <keys@example.org>
[GNUPG:] VALIDSIG 1111111111111111111111111111111111111111 2024-01-01 1704067200 0 4 0 1 10 00 927F419D7EC82C2F149C1BD1403C2657CD994F73
[GNUPG:] TRUST_UNDEFINED 0 pgp
";
        assert_eq!(
            parse_validsig(status).unwrap().as_str(),
            "927F419D7EC82C2F149C1BD1403C2657CD994F73"
        );
    }

    #[test]
    fn no_validsig_means_no_signer() {
        let status = "[GNUPG:] BADSIG 403C2657CD994F73 Example Org\n";
        assert_eq!(parse_validsig(status), None);
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let verifier = GpgVerifier {
            program: "keysync-no-such-gpg".into(),
            homedir: None,
        };
        let authority = "927F419D7EC82C2F149C1BD1403C2657CD994F73".parse().unwrap();
        let err = verifier.verify(b"doc", b"sig", &authority).unwrap_err();
        assert!(matches!(err, VerifyError::Spawn { .. }));
    }
}

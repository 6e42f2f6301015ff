//! Error types that need a stable, user-facing `Display` rather than
//! `anyhow`'s opaque chain — currently just manifest decoding, whose
//! message text is echoed verbatim in the `/add_job` HTTP response.

use std::fmt;
use std::path::PathBuf;

/// A `job.yaml` that is missing a required field, malformed, or whose
/// `run_job.sh` entry point is absent.
#[derive(Debug)]
pub enum ManifestError {
    NotFound(PathBuf),
    MissingField(&'static str),
    Invalid(String),
    MissingEntryPoint(PathBuf),
}

impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestError::NotFound(path) => {
                write!(f, "Could not find job.yaml file in {}", path.display())
            }
            ManifestError::MissingField(name) => {
                write!(f, "Invalid job.yaml: '{name}' parameter is required.")
            }
            ManifestError::Invalid(message) => write!(f, "Invalid job.yaml: {message}"),
            ManifestError::MissingEntryPoint(path) => {
                write!(f, "'{}' not found, or not executable.", path.display())
            }
        }
    }
}

impl std::error::Error for ManifestError {}

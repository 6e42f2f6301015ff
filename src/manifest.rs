//! Decoding of `job.yaml`, the manifest every job directory must contain.
//!
//! Treated as an opaque decoder per spec: we accept whatever shape
//! `serde_yaml` hands us and validate required fields ourselves, rather than
//! relying on `serde`'s own "missing field" errors, so the message text
//! matches what submitters see over HTTP.

use crate::error::ManifestError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const ENTRY_POINT: &str = "run_job.sh";
pub const MANIFEST_FILE: &str = "job.yaml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Percent of one core-equivalent; 100 means one full core.
    pub cpu: f64,
    /// Bytes.
    pub ram: f64,
    /// Percent of a single GPU, 0-100.
    pub gpu: f64,
    /// Bytes.
    pub vram: f64,
}

/// A decoded, validated manifest. Cheap to clone and safe to pass across
/// the command queue — `serde`-able so the control plane can hand a fully
/// decoded job to the scheduler process as plain JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobManifest {
    pub name: String,
    pub description: String,
    pub container: String,
    pub volumes: HashMap<String, String>,
    pub resource_usage: ResourceUsage,
}

/// Raw, permissive view of `job.yaml` used only as a decode target. Fields
/// are optional here; required-ness is enforced in [`JobManifest::decode`]
/// so we control the exact error message.
#[derive(Debug, Deserialize, Default)]
struct RawManifest {
    #[serde(rename = "Name")]
    name: Option<String>,
    #[serde(rename = "Description")]
    description: Option<String>,
    #[serde(rename = "Container")]
    container: Option<String>,
    #[serde(rename = "Volumes", default)]
    volumes: HashMap<String, String>,
    #[serde(rename = "ResourceUsage", default)]
    resource_usage: Vec<HashMap<String, serde_yaml::Value>>,
}

impl JobManifest {
    /// Reads and decodes `job.yaml` from `job_dir`, and checks that the
    /// entry-point script exists alongside it.
    pub fn decode(job_dir: &Path) -> Result<Self, ManifestError> {
        let manifest_path = job_dir.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Err(ManifestError::NotFound(job_dir.to_path_buf()));
        }

        let contents = std::fs::read_to_string(&manifest_path)
            .map_err(|e| ManifestError::Invalid(e.to_string()))?;
        let raw: RawManifest =
            serde_yaml::from_str(&contents).map_err(|e| ManifestError::Invalid(e.to_string()))?;

        let name = raw.name.filter(|s| !s.is_empty()).ok_or(ManifestError::MissingField("Name"))?;
        let description = raw
            .description
            .filter(|s| !s.is_empty())
            .ok_or(ManifestError::MissingField("Description"))?;
        let container = raw
            .container
            .filter(|s| !s.is_empty())
            .ok_or(ManifestError::MissingField("Container"))?;

        let resource_usage = parse_resource_usage(raw.resource_usage);

        let entry_point = job_dir.join(ENTRY_POINT);
        if !entry_point.exists() {
            return Err(ManifestError::MissingEntryPoint(entry_point));
        }

        Ok(JobManifest {
            name,
            description,
            container,
            volumes: raw.volumes,
            resource_usage,
        })
    }
}

fn parse_resource_usage(pairs: Vec<HashMap<String, serde_yaml::Value>>) -> ResourceUsage {
    let mut usage = ResourceUsage::default();

    for pair in pairs {
        for (key, value) in pair {
            let as_f64 = value.as_f64().or_else(|| value.as_i64().map(|v| v as f64));
            match (key.as_str(), as_f64) {
                ("CpuUsage", Some(v)) => usage.cpu = v,
                ("RamUsage", Some(v)) => usage.ram = v,
                ("GpuUsage", Some(v)) => usage.gpu = v,
                ("VramUsage", Some(v)) => usage.vram = v,
                (other, _) => {
                    tracing::warn!("Got unknown resource: '{other}'.");
                }
            }
        }
    }

    usage
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_job_dir(yaml: &str, with_entry_point: bool) -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), yaml).unwrap();
        if with_entry_point {
            fs::write(dir.path().join(ENTRY_POINT), "#!/bin/sh\n").unwrap();
        }
        dir
    }

    #[test]
    fn decodes_full_manifest() {
        let dir = write_job_dir(
            r#"
Name: A
Description: a
Container: alpine:latest
Volumes:
  /host: /container
ResourceUsage:
  - CpuUsage: 50
  - RamUsage: 1073741824
  - GpuUsage: 10
  - VramUsage: 1073741824
"#,
            true,
        );

        let manifest = JobManifest::decode(dir.path()).unwrap();
        assert_eq!(manifest.name, "A");
        assert_eq!(manifest.description, "a");
        assert_eq!(manifest.container, "alpine:latest");
        assert_eq!(manifest.resource_usage.cpu, 50.0);
        assert_eq!(manifest.resource_usage.ram, 1073741824.0);
        assert_eq!(manifest.volumes.get("/host").unwrap(), "/container");
    }

    #[test]
    fn defaults_missing_resource_fields_to_zero() {
        let dir = write_job_dir("Name: A\nDescription: a\nContainer: alpine\n", true);
        let manifest = JobManifest::decode(dir.path()).unwrap();
        assert_eq!(manifest.resource_usage, ResourceUsage::default());
    }

    #[test]
    fn missing_description_reports_required_field_message() {
        let dir = write_job_dir("Name: A\nContainer: alpine\n", true);
        let err = JobManifest::decode(dir.path()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid job.yaml: 'Description' parameter is required."
        );
    }

    #[test]
    fn missing_manifest_file_is_reported() {
        let dir = tempdir().unwrap();
        let err = JobManifest::decode(dir.path()).unwrap_err();
        assert!(matches!(err, ManifestError::NotFound(_)));
    }

    #[test]
    fn missing_entry_point_is_reported() {
        let dir = write_job_dir("Name: A\nDescription: a\nContainer: alpine\n", false);
        let err = JobManifest::decode(dir.path()).unwrap_err();
        assert!(matches!(err, ManifestError::MissingEntryPoint(_)));
    }

    #[test]
    fn unknown_resource_key_is_ignored() {
        let dir = write_job_dir(
            "Name: A\nDescription: a\nContainer: alpine\nResourceUsage:\n  - DiskUsage: 5\n",
            true,
        );
        let manifest = JobManifest::decode(dir.path()).unwrap();
        assert_eq!(manifest.resource_usage, ResourceUsage::default());
    }
}

//! Thin REST client mirroring `client/stoplight.py`: two calls, plain
//! `{status: "okay"/"error", ...}` envelopes, exit-code-friendly results.

use anyhow::{Context, Result};
use reqwest::Client as ReqwestClient;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    details: Option<String>,
    #[serde(default)]
    running: Vec<(String, String)>,
    #[serde(default)]
    pending: Vec<(String, String)>,
}

pub struct Client {
    client: ReqwestClient,
    base_url: String,
}

impl Client {
    pub fn new(base_url: String) -> Self {
        Self { client: ReqwestClient::new(), base_url }
    }

    /// Posts `job_dir` to `/add_job`. Prints a user-facing message and
    /// returns the exit code the binary should use.
    pub async fn add_job(&self, job_dir: &std::path::Path) -> Result<i32> {
        let absolute = job_dir.canonicalize().unwrap_or_else(|_| job_dir.to_path_buf());
        let form = [("job_dir", absolute.to_string_lossy().to_string())];

        let response = self
            .client
            .post(format!("{}/add_job", self.base_url))
            .form(&form)
            .send()
            .await
            .context("failed to reach stoplight daemon")?;

        let envelope: Envelope = response.json().await.context("failed to parse daemon response")?;
        if envelope.status != "okay" {
            println!("Got error status from daemon: {}", envelope.details.unwrap_or_default());
            return Ok(1);
        }

        println!("Job added successfully.");
        Ok(0)
    }

    /// Gets `/status` and renders it the same way the original client did.
    pub async fn status(&self) -> Result<i32> {
        let response = self
            .client
            .get(format!("{}/status", self.base_url))
            .send()
            .await
            .context("failed to reach stoplight daemon")?;

        let envelope: Envelope = response.json().await.context("failed to parse daemon response")?;
        if envelope.status != "okay" {
            println!("Got error status from daemon {}", envelope.details.unwrap_or_default());
            return Ok(1);
        }

        println!("Running Jobs: ({})", envelope.running.len());
        for (name, description) in &envelope.running {
            println!("\t{name} (\"{description}\")");
        }
        println!("Pending Jobs: ({})", envelope.pending.len());
        for (name, description) in &envelope.pending {
            println!("\t{name} (\"{description}\")");
        }

        Ok(0)
    }
}

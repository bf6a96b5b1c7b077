//! Dropbox remote over the HTTP API v2.
//!
//! Listing uses `files/list_folder` (recursive) followed by
//! `files/list_folder/continue` until `has_more` is false. Downloads use
//! `files/download` with the target in the `Dropbox-API-Arg` header.
//! Requests that hit 429 or a 5xx are retried with exponential backoff.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deedbox_core::models::RemoteEntry;
use deedbox_core::remote::RemoteStorage;

use crate::config::RemoteConfig;
use crate::paths::normalize;

const API_BASE: &str = "https://api.dropboxapi.com/2";
const CONTENT_BASE: &str = "https://content.dropboxapi.com/2";
const MAX_RETRIES: u32 = 3;

pub struct DropboxRemote {
    client: reqwest::Client,
    token: String,
    /// Remote folder, `""` for the account root, otherwise `/`-prefixed.
    root: String,
    api_base: String,
    content_base: String,
}

impl DropboxRemote {
    /// Build from config; the access token comes from `remote.token_env`.
    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        let token = std::env::var(&config.token_env)
            .with_context(|| format!("{} environment variable not set", config.token_env))?;
        Self::new(token, &config.root)
    }

    pub fn new(token: impl Into<String>, root: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()?;
        let trimmed = root.trim_matches('/');
        let root = if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{}", trimmed)
        };
        Ok(Self {
            client,
            token: token.into(),
            root,
            api_base: API_BASE.to_string(),
            content_base: CONTENT_BASE.to_string(),
        })
    }

    /// Point the client at a different API host (used against local stubs).
    pub fn with_endpoints(mut self, api_base: &str, content_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self.content_base = content_base.trim_end_matches('/').to_string();
        self
    }

    async fn rpc(&self, endpoint: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let url = format!("{}/{}", self.api_base, endpoint);
        let response = self
            .send_with_retry(|| {
                self.client
                    .post(&url)
                    .bearer_auth(&self.token)
                    .json(body)
            })
            .await?;
        Ok(response.json().await?)
    }

    async fn send_with_retry<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut last_err = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow::anyhow!("Dropbox API error {}: {}", status, body_text));
                        continue;
                    }
                    bail!("Dropbox API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Dropbox request failed after retries")))
    }

    fn full_path(&self, path: &str) -> Result<String> {
        Ok(format!("{}/{}", self.root, normalize(path)?))
    }
}

#[async_trait]
impl RemoteStorage for DropboxRemote {
    fn name(&self) -> &str {
        "dropbox"
    }

    fn root(&self) -> &str {
        if self.root.is_empty() {
            "/"
        } else {
            &self.root
        }
    }

    async fn list(&self) -> Result<Vec<RemoteEntry>> {
        let mut page = self
            .rpc(
                "files/list_folder",
                &serde_json::json!({ "path": self.root, "recursive": true }),
            )
            .await?;

        let mut entries = Vec::new();
        loop {
            entries.extend(parse_list_page(&page, &self.root)?);
            if !page.get("has_more").and_then(|v| v.as_bool()).unwrap_or(false) {
                break;
            }
            let cursor = page
                .get("cursor")
                .and_then(|c| c.as_str())
                .ok_or_else(|| anyhow::anyhow!("Invalid Dropbox response: missing cursor"))?
                .to_string();
            page = self
                .rpc(
                    "files/list_folder/continue",
                    &serde_json::json!({ "cursor": cursor }),
                )
                .await?;
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        let arg = header_safe_json(&serde_json::json!({ "path": self.full_path(path)? }));
        let url = format!("{}/files/download", self.content_base);
        let response = self
            .send_with_retry(|| {
                self.client
                    .post(&url)
                    .bearer_auth(&self.token)
                    .header("Dropbox-API-Arg", arg.as_str())
            })
            .await?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// JSON for the `Dropbox-API-Arg` header, which must be ASCII: every
/// non-ASCII char is written as a `\uXXXX` escape.
fn header_safe_json(value: &serde_json::Value) -> String {
    let raw = value.to_string();
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut buf = [0u16; 2];
            for unit in c.encode_utf16(&mut buf) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

/// Extract file entries from one `list_folder` page.
///
/// Folders and deleted markers are skipped. Paths are made relative to
/// `root` (compared case-insensitively, as Dropbox paths are).
fn parse_list_page(page: &serde_json::Value, root: &str) -> Result<Vec<RemoteEntry>> {
    let items = page
        .get("entries")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Dropbox response: missing entries array"))?;

    let root_lower = root.to_lowercase();
    let mut out = Vec::new();
    for item in items {
        if item.get(".tag").and_then(|t| t.as_str()) != Some("file") {
            continue;
        }
        let display = item
            .get("path_display")
            .and_then(|p| p.as_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid Dropbox response: file without path_display"))?;

        let relative = if display.to_lowercase().starts_with(&root_lower) {
            display.get(root.len()..).unwrap_or(display)
        } else {
            display
        };
        let path = normalize(relative)?;

        let modified = item
            .get("server_modified")
            .and_then(|m| m.as_str())
            .map(DateTime::parse_from_rfc3339)
            .transpose()?
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        out.push(RemoteEntry {
            path,
            content_hash: item
                .get("content_hash")
                .and_then(|h| h.as_str())
                .map(str::to_string),
            size: item.get("size").and_then(|s| s.as_u64()).unwrap_or(0),
            remote_modified_at: modified,
        });
    }
    Ok(out)
}

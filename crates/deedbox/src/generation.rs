//! Answer generation backends.
//!
//! `runpod` posts the prompt to a RunPod serverless `runsync` endpoint;
//! `extractive` answers with the retrieved passages themselves and makes
//! no external call.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use deedbox_core::generate::{clean_output, AnswerGenerator};

use crate::config::GenerationConfig;

/// Keys tried, in order, when the RunPod `output` is an object.
const OUTPUT_KEYS: [&str; 5] = ["text", "response", "generated_text", "content", "answer"];

pub struct RunPodGenerator {
    client: reqwest::Client,
    url: String,
    api_key: String,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
}

impl RunPodGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.url required for runpod provider"))?;
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("{} environment variable not set", config.api_key_env))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url,
            api_key,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
        })
    }
}

#[async_trait]
impl AnswerGenerator for RunPodGenerator {
    fn name(&self) -> &str {
        "runpod"
    }

    async fn generate(&self, _query: &str, _context: &str, prompt: &str) -> Result<String> {
        let payload = serde_json::json!({
            "input": {
                "prompt": prompt,
                "max_tokens": self.max_tokens,
                "temperature": self.temperature,
                "top_p": self.top_p,
            }
        });

        // RunPod expects the raw key, without a "Bearer" prefix
        let response = self
            .client
            .post(&self.url)
            .header("Authorization", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow::anyhow!("RunPod request timed out")
                } else {
                    anyhow::anyhow!("RunPod connection error: {}", e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("RunPod API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        let raw = parse_runpod_output(&json)?;
        clean_output(&raw).ok_or_else(|| anyhow::anyhow!("RunPod returned an empty answer"))
    }
}

fn parse_runpod_output(json: &serde_json::Value) -> Result<String> {
    let output = json
        .get("output")
        .ok_or_else(|| anyhow::anyhow!("Invalid RunPod response: missing output"))?;

    if let Some(text) = output.as_str() {
        return Ok(text.to_string());
    }
    if output.is_object() {
        if let Some(text) = OUTPUT_KEYS
            .iter()
            .find_map(|key| output.get(*key).and_then(|v| v.as_str()))
        {
            return Ok(text.to_string());
        }
    }
    bail!("Invalid RunPod response: unexpected output format: {}", output)
}

/// Answers with the top retrieved passages, capped at `max_chars`.
pub struct ExtractiveGenerator {
    max_chars: usize,
}

impl ExtractiveGenerator {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }
}

impl Default for ExtractiveGenerator {
    fn default() -> Self {
        Self::new(1500)
    }
}

#[async_trait]
impl AnswerGenerator for ExtractiveGenerator {
    fn name(&self) -> &str {
        "extractive"
    }

    async fn generate(&self, _query: &str, context: &str, _prompt: &str) -> Result<String> {
        let context = context.trim();
        if context.is_empty() {
            bail!("no context to answer from");
        }
        let mut end = context.len().min(self.max_chars);
        while !context.is_char_boundary(end) {
            end -= 1;
        }
        let mut answer = format!("Most relevant passages:\n\n{}", &context[..end]);
        if end < context.len() {
            answer.push_str(" ...");
        }
        Ok(answer)
    }
}

/// Build the configured generator.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn AnswerGenerator>> {
    match config.provider.as_str() {
        "extractive" => Ok(Arc::new(ExtractiveGenerator::default())),
        "runpod" => Ok(Arc::new(RunPodGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

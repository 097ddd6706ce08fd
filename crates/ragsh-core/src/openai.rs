//! Blocking client for OpenAI-compatible JSON endpoints.
//!
//! Retry strategy:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s, ... (capped at 2^5)

use std::time::Duration;

use serde_json::Value;

pub(crate) struct OpenAiClient {
    http: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    max_retries: u32,
}

impl OpenAiClient {
    pub(crate) fn new(
        base_url: &str,
        api_key: String,
        timeout_secs: u64,
        max_retries: u32,
    ) -> Result<Self, String> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            max_retries,
        })
    }

    /// POST `body` to `{base_url}/{path}` and return the decoded JSON response.
    pub(crate) fn post_json(&self, path: &str, body: &Value) -> Result<Value, String> {
        let url = format!("{}/{}", self.base_url, path);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!("Retrying {} in {:?} (attempt {})", url, delay, attempt + 1);
                std::thread::sleep(delay);
            }

            let response = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(body)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response
                            .json::<Value>()
                            .map_err(|e| format!("invalid response from {url}: {e}"));
                    }

                    let body_text = response.text().unwrap_or_default();
                    let err = format!("{url} returned {status}: {body_text}");

                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!("{}", err);
                        last_err = Some(err);
                        continue;
                    }

                    return Err(err);
                }
                Err(e) => {
                    let err = format!("request to {url} failed: {e}");
                    tracing::warn!("{}", err);
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| format!("request to {url} failed after retries")))
    }
}

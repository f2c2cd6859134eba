//! HTTP utilities for Bugzilla REST API calls.

use reqwest::{Client, Method};
use serde_json::Value;
use url::Url;

use crate::error::{Error, Result};

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and masks non-printable content
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let cut = body
            .char_indices()
            .take_while(|(i, _)| *i < MAX_LOG_BODY_LENGTH)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// HTTP client wrapper for Bugzilla REST calls
#[derive(Clone)]
pub struct RestHttpClient {
    client: Client,
}

impl RestHttpClient {
    /// Create a new HTTP client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("bugzilla-rest/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    /// Execute one request and decode the JSON response.
    ///
    /// The Bugzilla API error envelope (`{"error": true, "code": ...,
    /// "message": ...}`) can arrive with any HTTP status, including non-2xx,
    /// and takes precedence over the status check so API errors surface as
    /// [`Error::Api`] rather than an opaque transport fault.
    pub async fn execute(&self, method: Method, url: Url, body: Option<&Value>) -> Result<Value> {
        tracing::debug!("{} {}", method, url.path());

        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let status_err = response.error_for_status_ref().err();
        let text = response.text().await?;

        if status.is_success() && text.is_empty() {
            return Ok(Value::Null);
        }

        match serde_json::from_str::<Value>(&text) {
            Ok(json) => {
                if json.get("error").and_then(Value::as_bool) == Some(true) {
                    let code = json.get("code").and_then(Value::as_i64).unwrap_or(-1);
                    let message = json
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string();
                    return Err(Error::Api { code, message });
                }
                match status_err {
                    None => Ok(json),
                    Some(err) => {
                        // Security: Only log sanitized/truncated error body
                        tracing::error!("API error: {} - {}", status, sanitize_for_log(&text));
                        Err(Error::from(err))
                    },
                }
            },
            Err(parse_err) => {
                tracing::error!("API error: {} - {}", status, sanitize_for_log(&text));
                match status_err {
                    Some(err) => Err(Error::from(err)),
                    None => Err(Error::transport(format!("malformed JSON body: {parse_err}"))),
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_truncates_long_bodies() {
        let body = "x".repeat(500);
        let out = sanitize_for_log(&body);
        assert!(out.contains("truncated, 500 bytes total"));
    }

    #[test]
    fn sanitize_strips_control_characters() {
        assert_eq!(sanitize_for_log("ok\r\nline"), "okline");
    }
}

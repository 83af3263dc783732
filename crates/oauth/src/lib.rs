//! OAuth token-exchange calls with retry.
//!
//! Request signing is the caller's job: both methods take fully
//! prepared parameter lists and never inspect or reorder them. This
//! crate owns the retry loop, the reply validation, and the typed
//! token results.

use std::collections::HashMap;
use std::time::Duration;

use fotoferry_protocol::Parameter;
use fotoferry_transport::{RestClient, TransportError};
use thiserror::Error;
use tracing::warn;

/// Linear backoff for the exchange calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_step: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

/// Temporary credential from the first exchange leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestToken {
    pub token: String,
    pub token_secret: String,
}

/// Long-lived credential from the final exchange leg, with the
/// identity fields some providers attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub token_secret: String,
    pub user_id: Option<String>,
    pub username: Option<String>,
}

/// Token-exchange failures.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The reply parsed but a required field was missing or wrong.
    /// The decoded reply rides along for diagnostics; the display
    /// names only the field, since exchange replies carry credentials.
    #[error("invalid exchange reply: bad {field}")]
    Invalid { field: &'static str, body: String },
}

/// Retrying wrapper around the two token-exchange calls.
pub struct TokenExchanger {
    client: RestClient,
    policy: RetryPolicy,
}

impl TokenExchanger {
    pub fn new(client: RestClient, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Fetches a request token via GET. The reply must confirm the
    /// callback and carry a non-empty token pair.
    pub async fn request_token(
        &self,
        path: &str,
        params: &[Parameter],
    ) -> Result<RequestToken, TokenError> {
        let mut attempt = 1;
        loop {
            match self.request_token_once(path, params).await {
                Ok(token) => return Ok(token),
                Err(err) if attempt < self.policy.max_attempts => {
                    warn!(attempt, %err, "request token attempt failed, retrying");
                    tokio::time::sleep(self.policy.delay_after(attempt)).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(attempt, %err, "request token attempts exhausted");
                    return Err(err);
                }
            }
        }
    }

    /// Trades a request token for an access token via form POST.
    pub async fn access_token(
        &self,
        path: &str,
        params: &[Parameter],
    ) -> Result<AccessToken, TokenError> {
        let mut attempt = 1;
        loop {
            match self.access_token_once(path, params).await {
                Ok(token) => return Ok(token),
                Err(err) if attempt < self.policy.max_attempts => {
                    warn!(attempt, %err, "access token attempt failed, retrying");
                    tokio::time::sleep(self.policy.delay_after(attempt)).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(attempt, %err, "access token attempts exhausted");
                    return Err(err);
                }
            }
        }
    }

    async fn request_token_once(
        &self,
        path: &str,
        params: &[Parameter],
    ) -> Result<RequestToken, TokenError> {
        let map = self.client.get_as_map(true, path, params).await?;
        if field(&map, "oauth_callback_confirmed")? != "true" {
            return Err(invalid("oauth_callback_confirmed", &map));
        }
        Ok(RequestToken {
            token: field(&map, "oauth_token")?.to_string(),
            token_secret: field(&map, "oauth_token_secret")?.to_string(),
        })
    }

    async fn access_token_once(
        &self,
        path: &str,
        params: &[Parameter],
    ) -> Result<AccessToken, TokenError> {
        let map = self.client.get_as_map(false, path, params).await?;
        Ok(AccessToken {
            token: field(&map, "oauth_token")?.to_string(),
            token_secret: field(&map, "oauth_token_secret")?.to_string(),
            user_id: map.get("user_nsid").cloned(),
            username: map.get("username").cloned(),
        })
    }
}

/// Looks up a required, non-empty reply field.
fn field<'m>(
    map: &'m HashMap<String, String>,
    name: &'static str,
) -> Result<&'m str, TokenError> {
    match map.get(name) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(invalid(name, map)),
    }
}

fn invalid(field: &'static str, map: &HashMap<String, String>) -> TokenError {
    let mut pairs: Vec<String> = map.iter().map(|(k, v)| format!("{k}={v}")).collect();
    pairs.sort();
    TokenError::Invalid {
        field,
        body: pairs.join("&"),
    }
}

//! Twilio Network Traversal Service credential fetch.
//!
//! Grounded on `examples/original_source/gateway/turn.py`'s
//! `fetch_twilio_turn_credentials`: a single authenticated POST to Twilio's
//! Tokens endpoint. Any failure — missing credentials, request error,
//! unexpected response shape — yields an empty Vec so the caller falls back
//! to `ice_servers_fallback_json`.

use async_trait::async_trait;
use serde::Deserialize;

use super::{IceCredentials, IceServer};

const TWILIO_TOKENS_URL_TEMPLATE: &str = "https://api.twilio.com/2010-04-01/Accounts/{account_sid}/Tokens.json";

pub struct TwilioIceCredentials {
    account_sid: Option<String>,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl TwilioIceCredentials {
    pub fn new(account_sid: Option<String>, auth_token: Option<String>) -> Self {
        Self { account_sid, auth_token, client: reqwest::Client::new() }
    }

    fn configured(&self) -> Option<(&str, &str)> {
        match (&self.account_sid, &self.auth_token) {
            (Some(sid), Some(token)) if !sid.is_empty() && !token.is_empty() => Some((sid, token)),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TwilioTokenResponse {
    ice_servers: Vec<TwilioIceServer>,
}

#[derive(Debug, Deserialize)]
struct TwilioIceServer {
    urls: Option<Vec<String>>,
    url: Option<String>,
    username: Option<String>,
    credential: Option<String>,
}

#[async_trait]
impl IceCredentials for TwilioIceCredentials {
    async fn fetch(&self) -> Vec<IceServer> {
        let Some((account_sid, auth_token)) = self.configured() else {
            tracing::warn!("twilio telephony credentials not configured, falling back to static ICE servers");
            return Vec::new();
        };

        let url = TWILIO_TOKENS_URL_TEMPLATE.replace("{account_sid}", account_sid);
        let response = self
            .client
            .post(&url)
            .basic_auth(account_sid, Some(auth_token))
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("twilio turn credential fetch failed: {e}");
                return Vec::new();
            }
        };

        if !response.status().is_success() {
            tracing::warn!("twilio turn credential fetch returned status {}", response.status());
            return Vec::new();
        }

        match response.json::<TwilioTokenResponse>().await {
            Ok(body) => body
                .ice_servers
                .into_iter()
                .map(|s| IceServer {
                    urls: s.urls.unwrap_or_else(|| s.url.into_iter().collect()),
                    username: s.username,
                    credential: s.credential,
                })
                .collect(),
            Err(e) => {
                tracing::warn!("twilio turn response did not match expected shape: {e}");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_credentials_returns_empty() {
        let creds = TwilioIceCredentials::new(None, None);
        assert!(creds.fetch().await.is_empty());
    }

    #[tokio::test]
    async fn empty_string_credentials_returns_empty() {
        let creds = TwilioIceCredentials::new(Some(String::new()), Some(String::new()));
        assert!(creds.fetch().await.is_empty());
    }
}

//! REST client for the platform HTTP API.

mod error;
mod pagination;

pub use error::{ApiError, check_response};
pub use pagination::{GuildInfo, MemberInfo, collect_pages};

use std::time::Duration;

use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::{Config, ProxyConfig};

/// `DiscordBot (<url>, <api version>)`.
const USER_AGENT_VALUE: &str = concat!("DiscordBot (", env!("CARGO_PKG_REPOSITORY"), ", 10)");

/// Authorized JSON client rooted at the API base URL.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(
        token: &str,
        base_url: impl Into<String>,
        timeout: Duration,
        proxy: Option<&ProxyConfig>,
    ) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        let mut auth =
            HeaderValue::from_str(&format!("Bot {token}")).map_err(|_| ApiError::InvalidToken)?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let mut builder = Client::builder().default_headers(headers).timeout(timeout);
        // Only the configured proxy is used, never one from the environment.
        builder = match proxy {
            Some(proxy) => builder.proxy(reqwest::Proxy::all(proxy.url())?),
            None => builder.no_proxy(),
        };

        Ok(Self {
            client: builder.build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Client for a resolved config (token already filled in).
    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        Self::new(
            &config.bot.token,
            config.api_base_url(),
            Duration::from_secs(config.api.request_timeout_seconds),
            config.proxy.as_ref(),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ApiError> {
        debug!(path = %path, "GET");
        let mut url = Url::parse(&self.url(path))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        let response = self.client.get(url).send().await?;
        let response = check_response(response).await?;
        Ok(response.json().await?)
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        debug!(path = %path, "POST");
        let response = self.client.post(self.url(path)).json(body).send().await?;
        let response = check_response(response).await?;
        Ok(response.json().await?)
    }
}

//! ICE server configuration
//!
//! Fetched once per session. Any failure falls back to public STUN servers so
//! a consultation can still start on permissive networks.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};

/// Public STUN servers used when no configuration can be fetched
pub const FALLBACK_STUN_URLS: [&str; 2] = ["stun:stun.l.google.com:19302", "stun:stun1.l.google.com:19302"];

/// One URL or a list of URLs, as browsers accept both
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IceUrls {
    One(String),
    Many(Vec<String>),
}

impl IceUrls {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            IceUrls::One(url) => vec![url.clone()],
            IceUrls::Many(urls) => urls.clone(),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            IceUrls::One(url) => url.is_empty(),
            IceUrls::Many(urls) => urls.iter().all(String::is_empty),
        }
    }
}

/// A STUN or TURN server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: IceUrls,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self { urls: IceUrls::One(url.into()), username: None, credential: None }
    }
}

/// Servers handed to every peer link of the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceConfiguration {
    pub ice_servers: Vec<IceServer>,
}

impl IceConfiguration {
    pub fn fallback() -> Self {
        Self {
            ice_servers: FALLBACK_STUN_URLS.iter().map(|url| IceServer::stun(*url)).collect(),
        }
    }

    /// True when no server has a usable URL
    pub fn is_empty(&self) -> bool {
        self.ice_servers.iter().all(|server| server.urls.is_empty())
    }
}

impl Default for IceConfiguration {
    fn default() -> Self {
        Self::fallback()
    }
}

/// Source of the session's ICE configuration
#[async_trait]
pub trait IceConfigProvider: Send + Sync + std::fmt::Debug {
    async fn fetch(&self) -> Result<IceConfiguration>;
}

/// Fetches `{ iceServers: [...] }` from an HTTP endpoint
#[derive(Debug, Clone)]
pub struct HttpIceConfigProvider {
    client: reqwest::Client,
    url: String,
}

impl HttpIceConfigProvider {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::IceConfig(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl IceConfigProvider for HttpIceConfigProvider {
    async fn fetch(&self) -> Result<IceConfiguration> {
        debug!("Fetching ICE configuration from {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SessionError::IceConfig(format!("Failed to fetch ICE config: {}", e)))?;

        if !response.status().is_success() {
            return Err(SessionError::IceConfig(format!(
                "ICE config request failed: {}",
                response.status()
            )));
        }

        let config: IceConfiguration = response
            .json()
            .await
            .map_err(|e| SessionError::IceConfig(format!("Failed to parse ICE config: {}", e)))?;

        if config.is_empty() {
            return Err(SessionError::IceConfig("ICE config contains no servers".into()));
        }
        Ok(config)
    }
}

/// Fixed configuration, for deployments without a config endpoint
#[derive(Debug, Clone, Default)]
pub struct StaticIceConfigProvider(pub IceConfiguration);

#[async_trait]
impl IceConfigProvider for StaticIceConfigProvider {
    async fn fetch(&self) -> Result<IceConfiguration> {
        Ok(self.0.clone())
    }
}

/// Fetch from `provider`, falling back to public STUN on any failure
///
/// ```
/// use telecare_session_core::{
///     resolve_ice_configuration, IceConfigProvider, IceConfiguration, StaticIceConfigProvider,
/// };
///
/// # tokio_test::block_on(async {
/// assert_eq!(resolve_ice_configuration(None).await, IceConfiguration::fallback());
///
/// let fixed: &dyn IceConfigProvider = &StaticIceConfigProvider(IceConfiguration::fallback());
/// let config = resolve_ice_configuration(Some(fixed)).await;
/// assert_eq!(config.ice_servers.len(), 2);
/// # })
/// ```
pub async fn resolve_ice_configuration(provider: Option<&dyn IceConfigProvider>) -> IceConfiguration {
    let Some(provider) = provider else {
        debug!("No ICE config provider, using public STUN servers");
        return IceConfiguration::fallback();
    };

    match provider.fetch().await {
        Ok(config) => {
            info!("Using {} ICE servers", config.ice_servers.len());
            config
        }
        Err(e) => {
            warn!(error = %e, "ICE configuration unavailable, using public STUN servers");
            IceConfiguration::fallback()
        }
    }
}

//! `/gateway/bot` lookup
//!
//! Returns the recommended shard count and the session start limit. This is the
//! only request made before the fleet starts, and any failure here is fatal.
//!
//! Endpoint: `GET {api_base}/gateway/bot` with `Authorization: Bot <token>`

use {
    async_trait::async_trait,
    serde::Deserialize,
    std::time::Duration,
    thiserror::Error,
};

/// `/gateway/bot` response
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayBot {
    pub url: String,
    pub shards: u32,
    pub session_start_limit: SessionStartLimit,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,
    pub reset_after: u64,
    pub max_concurrency: u32,
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("gateway metadata request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway metadata request returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Source of fleet size and rate-limit parameters
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch(&self) -> Result<GatewayBot, MetadataError>;
}

pub struct GatewayBotClient {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl GatewayBotClient {
    pub fn new(api_base: &str, token: &str) -> Result<Self, MetadataError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            url: format!("{}/gateway/bot", api_base.trim_end_matches('/')),
            token: token.to_string(),
        })
    }
}

#[async_trait]
impl MetadataSource for GatewayBotClient {
    async fn fetch(&self) -> Result<GatewayBot, MetadataError> {
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::AUTHORIZATION, format!("Bot {}", self.token))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MetadataError::Status { status, body });
        }

        let gateway: GatewayBot = response.json().await?;
        log::debug!(
            "/gateway/bot: shards={} max_concurrency={} remaining={}/{}",
            gateway.shards,
            gateway.session_start_limit.max_concurrency,
            gateway.session_start_limit.remaining,
            gateway.session_start_limit.total
        );
        Ok(gateway)
    }
}

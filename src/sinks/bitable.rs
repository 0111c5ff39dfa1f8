//! Record sink for Feishu/Lark Bitable tables.
//!
//! Authenticates with an app id/secret pair for a tenant access token, keeps
//! it until shortly before it expires, and appends one row per record.

use super::{Record, RecordSink};
use crate::digest::RecordFields;
use crate::error::SinkError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

/// Tokens are refreshed this long before the server says they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

fn default_base_url() -> String {
    "https://open.feishu.cn/open-apis".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitableConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub app_id: String,
    #[serde(skip_serializing)]
    pub app_secret: String,
    /// Token of the bitable app (the base), not of the tenant.
    pub app_token: String,
    pub table_id: String,
    #[serde(default)]
    pub fields: RecordFields,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    tenant_access_token: Option<String>,
    /// Lifetime in seconds.
    #[serde(default)]
    expire: u64,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    code: i64,
    #[serde(default)]
    msg: String,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct BitableSink {
    client: Client,
    config: BitableConfig,
    token: Mutex<Option<CachedToken>>,
}

impl BitableSink {
    pub fn new(config: BitableConfig, timeout: Duration) -> Result<Self, SinkError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            config,
            token: Mutex::new(None),
        })
    }

    pub fn fields(&self) -> &RecordFields {
        &self.config.fields
    }

    fn records_url(&self) -> String {
        format!(
            "{}/bitable/v1/apps/{}/tables/{}/records",
            self.config.base_url.trim_end_matches('/'),
            self.config.app_token,
            self.config.table_id
        )
    }

    /// A valid tenant token, fetched when none is cached or the cached one expired.
    async fn access_token(&self) -> Result<String, SinkError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.expires_at > Instant::now()) {
            return Ok(token.value.clone());
        }

        let url = format!(
            "{}/auth/v3/tenant_access_token/internal",
            self.config.base_url.trim_end_matches('/')
        );
        let reply: TokenResponse = self
            .client
            .post(&url)
            .json(&json!({
                "app_id": self.config.app_id,
                "app_secret": self.config.app_secret,
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let value = match (reply.code, reply.tenant_access_token) {
            (0, Some(value)) => value,
            (code, _) => {
                return Err(SinkError::Rejected(format!(
                    "token request failed with code {code}: {}",
                    reply.msg
                )));
            }
        };
        let lifetime = Duration::from_secs(reply.expire).saturating_sub(TOKEN_EXPIRY_MARGIN);
        debug!(lifetime_secs = lifetime.as_secs(), "Obtained tenant access token");
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(value)
    }

    async fn forget_token(&self) {
        *self.token.lock().await = None;
    }
}

#[async_trait]
impl RecordSink for BitableSink {
    fn name(&self) -> &str {
        "bitable"
    }

    #[instrument(level = "info", skip_all, fields(table = %self.config.table_id, fields = record.len()))]
    async fn write(&self, record: &Record) -> Result<(), SinkError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(self.records_url())
            .bearer_auth(token)
            .json(&json!({ "fields": record }))
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            self.forget_token().await;
            return Err(SinkError::Rejected("access token rejected".to_string()));
        }
        let reply: ApiResponse = response.error_for_status()?.json().await?;
        if reply.code != 0 {
            return Err(SinkError::Rejected(format!(
                "code {}: {}",
                reply.code, reply.msg
            )));
        }
        info!("Record written");
        Ok(())
    }
}

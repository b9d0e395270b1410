use crate::cache::persistent::KvStore;
use crate::{Result, ScentKitError};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

/// Redis over the Upstash REST protocol.
///
/// Each command is a JSON array (`["GET", key]`) POSTed to the database URL
/// with a bearer token; the reply is `{"result": ...}` or `{"error": "..."}`.
/// Values are stored as JSON strings, which keeps them readable by other
/// Upstash clients sharing the database.
pub struct UpstashStore {
    http: Client,
    url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct CommandReply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

impl UpstashStore {
    pub fn new(http: Client, url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    async fn command(&self, args: &[&str]) -> Result<Value> {
        let resp = self
            .http
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&args)
            .send()
            .await
            .map_err(|e| ScentKitError::CacheUnavailable(e.to_string()))?;

        let status = resp.status();
        let reply: CommandReply = resp
            .json()
            .await
            .map_err(|e| ScentKitError::CacheUnavailable(format!("Malformed reply: {}", e)))?;

        if let Some(error) = reply.error {
            return Err(ScentKitError::CacheUnavailable(error));
        }
        if !status.is_success() {
            return Err(ScentKitError::CacheUnavailable(format!("Upstream status: {}", status)));
        }
        Ok(reply.result)
    }
}

#[async_trait::async_trait]
impl KvStore for UpstashStore {
    fn backend(&self) -> &'static str {
        "upstash"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(match self.command(&["GET", key]).await? {
            Value::Null => None,
            Value::String(s) => Some(s.into_bytes()),
            other => Some(other.to_string().into_bytes()),
        })
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let value = std::str::from_utf8(value)
            .map_err(|e| ScentKitError::CacheUnavailable(format!("Value is not UTF-8: {}", e)))?;
        self.command(&["SET", key, value]).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.command(&["DEL", key]).await?;
        Ok(())
    }
}

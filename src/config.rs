use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Capacity and lifetime of one memory tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryTierConfig {
    pub capacity: u64,
    pub ttl: Duration,
}

/// Which backend, if any, holds the persistent tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistentBackend {
    None,
    Sled { path: PathBuf },
    Upstash { url: String, token: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub per_second: u64,
    pub burst_size: u32,
}

#[derive(Debug, Clone)]
pub struct ScentKitConfig {
    /// Cache-key namespace for text entries. Bump it to retire old entries.
    pub prompt_version: String,
    /// Same, for image entries.
    pub image_prompt_version: String,
    pub seed_dir: PathBuf,
    pub text_memory: MemoryTierConfig,
    pub image_memory: MemoryTierConfig,
    pub persistent: PersistentBackend,
    pub store_timeout: Duration,
    pub text_timeout: Duration,
    pub image_timeout: Duration,
    /// Download provider-hosted image URLs and keep them as blobs.
    pub inline_remote_images: bool,
    pub max_remote_image_size: usize, // bytes
    pub rate_limit: Option<RateLimit>,
    pub static_dir: PathBuf,
}

impl Default for ScentKitConfig {
    fn default() -> Self {
        Self {
            prompt_version: "v1".to_string(),
            image_prompt_version: "v1".to_string(),
            seed_dir: PathBuf::from("./data"),
            text_memory: MemoryTierConfig {
                capacity: 1000,
                ttl: DAY * 30,
            },
            image_memory: MemoryTierConfig {
                capacity: 500,
                ttl: DAY * 30,
            },
            persistent: PersistentBackend::None,
            store_timeout: Duration::from_secs(2),
            text_timeout: Duration::from_secs(45),
            image_timeout: Duration::from_secs(90),
            inline_remote_images: false,
            max_remote_image_size: 8 * 1024 * 1024,
            rate_limit: Some(RateLimit {
                per_second: 10,
                burst_size: 30,
            }),
            static_dir: PathBuf::from("frontend"),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Prompt version must be non-empty and use only [A-Za-z0-9._-]: {0:?}")]
    InvalidVersion(String),
    #[error("Memory tier capacity must be > 0")]
    InvalidCapacity,
    #[error("Memory tier TTL must be > 0")]
    InvalidTtl,
    #[error("Image TTL must not be shorter than text TTL")]
    ImageTtlShorterThanText,
    #[error("Timeouts must be > 0")]
    InvalidTimeout,
    #[error("Persistent backend is missing {0}")]
    IncompleteBackend(&'static str),
    #[error("Rate limit values must be > 0")]
    InvalidRateLimit,
}

impl ScentKitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for version in [&self.prompt_version, &self.image_prompt_version] {
            if !is_valid_version(version) {
                return Err(ConfigError::InvalidVersion(version.clone()));
            }
        }
        for tier in [self.text_memory, self.image_memory] {
            if tier.capacity == 0 {
                return Err(ConfigError::InvalidCapacity);
            }
            if tier.ttl.is_zero() {
                return Err(ConfigError::InvalidTtl);
            }
        }
        if self.image_memory.ttl < self.text_memory.ttl {
            return Err(ConfigError::ImageTtlShorterThanText);
        }
        if [self.store_timeout, self.text_timeout, self.image_timeout]
            .iter()
            .any(Duration::is_zero)
        {
            return Err(ConfigError::InvalidTimeout);
        }
        match &self.persistent {
            PersistentBackend::Upstash { url, .. } if url.trim().is_empty() => {
                return Err(ConfigError::IncompleteBackend("url"))
            }
            PersistentBackend::Upstash { token, .. } if token.trim().is_empty() => {
                return Err(ConfigError::IncompleteBackend("token"))
            }
            PersistentBackend::Sled { path } if path.as_os_str().is_empty() => {
                return Err(ConfigError::IncompleteBackend("path"))
            }
            _ => {}
        }
        if let Some(limit) = self.rate_limit {
            if limit.per_second == 0 || limit.burst_size == 0 {
                return Err(ConfigError::InvalidRateLimit);
            }
        }
        Ok(())
    }
}

/// Versions end up inside cache keys, so they must never contain the
/// separator or whitespace.
fn is_valid_version(version: &str) -> bool {
    !version.is_empty()
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

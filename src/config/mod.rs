use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::models::job::BackoffPolicy;
use crate::queue::QueueConfig;
use crate::services::ImageLimits;
use crate::workers::{OcrWorkerConfig, VisionWorkerConfig, WorkerPoolConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Exponential,
    Fixed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Operations HTTP bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Redis connection string for the shared result cache. In-memory cache when unset.
    pub redis_url: Option<String>,

    /// Cloudflare account ID for the Workers AI OCR engine
    pub cf_account_id: Option<String>,

    /// Cloudflare Workers AI API token
    pub cf_api_token: Option<String>,

    #[serde(default = "default_ocr_concurrency")]
    pub ocr_concurrency: usize,

    #[serde(default = "default_vision_concurrency")]
    pub vision_concurrency: usize,

    #[serde(default = "default_ocr_timeout_secs")]
    pub ocr_timeout_secs: u64,

    #[serde(default = "default_vision_timeout_secs")]
    pub vision_timeout_secs: u64,

    /// Root under which each worker kind gets its own temp directory
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,

    #[serde(default = "default_max_image_dimension")]
    pub max_image_dimension: u32,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_attempts")]
    pub default_attempts: u32,

    #[serde(default = "default_backoff_delay_ms")]
    pub backoff_delay_ms: u64,

    #[serde(default = "default_backoff_kind")]
    pub backoff_kind: BackoffKind,

    #[serde(default = "default_lock_duration_ms")]
    pub lock_duration_ms: u64,

    #[serde(default = "default_max_stalled_count")]
    pub max_stalled_count: u32,

    #[serde(default = "default_maintenance_interval_ms")]
    pub maintenance_interval_ms: u64,

    #[serde(default = "default_dependency_delay_ms")]
    pub dependency_delay_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_ocr_concurrency() -> usize {
    2
}

fn default_vision_concurrency() -> usize {
    2
}

fn default_ocr_timeout_secs() -> u64 {
    120
}

fn default_vision_timeout_secs() -> u64 {
    180
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("floorplan-pipeline")
}

fn default_max_image_bytes() -> u64 {
    20 * 1024 * 1024
}

fn default_max_image_dimension() -> u32 {
    10_000
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_attempts() -> u32 {
    3
}

fn default_backoff_delay_ms() -> u64 {
    2000
}

fn default_backoff_kind() -> BackoffKind {
    BackoffKind::Exponential
}

fn default_lock_duration_ms() -> u64 {
    30_000
}

fn default_max_stalled_count() -> u32 {
    1
}

fn default_maintenance_interval_ms() -> u64 {
    5000
}

fn default_dependency_delay_ms() -> u64 {
    5000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn backoff(&self) -> BackoffPolicy {
        match self.backoff_kind {
            BackoffKind::Exponential => BackoffPolicy::Exponential {
                delay_ms: self.backoff_delay_ms,
            },
            BackoffKind::Fixed => BackoffPolicy::Fixed {
                delay_ms: self.backoff_delay_ms,
            },
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            default_attempts: self.default_attempts.max(1),
            default_backoff: self.backoff(),
            lock_duration: Duration::from_millis(self.lock_duration_ms),
            max_stalled_count: self.max_stalled_count,
            dependency_delay: Duration::from_millis(self.dependency_delay_ms),
            ..QueueConfig::default()
        }
    }

    pub fn image_limits(&self) -> ImageLimits {
        ImageLimits {
            max_bytes: self.max_image_bytes,
            max_dimension: self.max_image_dimension,
        }
    }

    pub fn ocr_worker_config(&self) -> OcrWorkerConfig {
        OcrWorkerConfig {
            temp_root: self.temp_dir.join("ocr"),
            timeout: Duration::from_secs(self.ocr_timeout_secs),
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            limits: self.image_limits(),
        }
    }

    pub fn vision_worker_config(&self) -> VisionWorkerConfig {
        VisionWorkerConfig {
            temp_root: self.temp_dir.join("vision"),
            timeout: Duration::from_secs(self.vision_timeout_secs),
            limits: self.image_limits(),
        }
    }

    pub fn ocr_pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig {
            concurrency: self.ocr_concurrency.max(1),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn vision_pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig {
            concurrency: self.vision_concurrency.max(1),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }
}

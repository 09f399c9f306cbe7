pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::{InMemoryCacheStore, JsonFileCacheStore};
pub use config::toml_config::SyncSettings;
pub use core::{
    orchestrator::{SyncConfig, SyncConfigUpdate, SyncOrchestrator, SyncState, SyncStatus},
    rate_limiter::{Operation, RateLimitPolicy, RateLimiter},
    retry::RetryConfig,
    transport::SoapTransport,
};
pub use domain::model::{Credentials, InternalAppointment, SyncResult, SyncWindow};
pub use utils::error::{Result, SyncError};

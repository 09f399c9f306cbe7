pub mod orchestrator;
pub mod rate_limiter;
pub mod retry;
pub mod soap;
pub mod transformer;
pub mod transport;

pub use crate::domain::model::{Record, SyncResult, SyncWindow};
pub use crate::domain::ports::{CacheStore, CredentialProvider, EhrTransport};
pub use crate::utils::error::Result;

use crate::domain::model::{
    Credentials, InternalAppointment, RemoteAppointment, RemotePatient, RemoteProvider,
};
use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Supplies the remote connection details. The core never looks up
/// environment variables or secrets itself.
pub trait CredentialProvider: Send + Sync {
    fn credentials(&self) -> Result<Credentials>;
}

impl CredentialProvider for Credentials {
    fn credentials(&self) -> Result<Credentials> {
        Ok(self.clone())
    }
}

/// Externally owned session cache. `save` overwrites the whole session.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn save(&self, session_date: NaiveDate, appointments: &[InternalAppointment])
        -> Result<()>;
    async fn load(&self, session_date: NaiveDate) -> Result<Vec<InternalAppointment>>;
}

/// The read operations the orchestrator depends on.
#[async_trait]
pub trait EhrTransport: Send + Sync {
    /// 執行環境無法使用傳輸層時回傳 false
    fn is_available(&self) -> bool {
        true
    }

    async fn test_connection(&self) -> Result<()>;
    async fn get_appointments(&self, from: NaiveDate, to: NaiveDate)
        -> Result<Vec<RemoteAppointment>>;
    async fn get_patients(&self, patient_ids: &[String]) -> Result<Vec<RemotePatient>>;
    async fn get_providers(&self) -> Result<Vec<RemoteProvider>>;
}

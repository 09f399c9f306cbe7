use crate::domain::model::InternalAppointment;
use crate::domain::ports::CacheStore;
use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// One JSON file per session date under `base_path`.
#[derive(Debug, Clone)]
pub struct JsonFileCacheStore {
    base_path: PathBuf,
}

impl JsonFileCacheStore {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    pub fn session_path(&self, session_date: NaiveDate) -> PathBuf {
        self.base_path
            .join(format!("appointments-{}.json", session_date.format("%Y-%m-%d")))
    }
}

#[async_trait]
impl CacheStore for JsonFileCacheStore {
    async fn save(
        &self,
        session_date: NaiveDate,
        appointments: &[InternalAppointment],
    ) -> Result<()> {
        let full_path = self.session_path(session_date);
        tokio::fs::create_dir_all(&self.base_path).await?;

        // 先寫暫存檔再改名，避免讀到寫一半的快取
        let tmp_path = full_path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(appointments)?;
        tokio::fs::write(&tmp_path, &data).await?;
        tokio::fs::rename(&tmp_path, &full_path).await?;

        tracing::debug!(
            "💾 Saved {} appointments to {}",
            appointments.len(),
            full_path.display()
        );
        Ok(())
    }

    async fn load(&self, session_date: NaiveDate) -> Result<Vec<InternalAppointment>> {
        let full_path = self.session_path(session_date);
        match tokio::fs::read(&full_path).await {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    sessions: Mutex<HashMap<NaiveDate, Vec<InternalAppointment>>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn save(
        &self,
        session_date: NaiveDate,
        appointments: &[InternalAppointment],
    ) -> Result<()> {
        self.sessions
            .lock()
            .await
            .insert(session_date, appointments.to_vec());
        Ok(())
    }

    async fn load(&self, session_date: NaiveDate) -> Result<Vec<InternalAppointment>> {
        Ok(self
            .sessions
            .lock()
            .await
            .get(&session_date)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{AppointmentStatus, AppointmentType};
    use tempfile::TempDir;

    fn sample(id: &str) -> InternalAppointment {
        let date = NaiveDate::from_ymd_opt(2025, 7, 7).unwrap();
        InternalAppointment {
            id: id.to_string(),
            patient_id: "P-1".to_string(),
            patient_name: "Ann Lee".to_string(),
            date_of_birth: None,
            phone: String::new(),
            provider_id: "D-1".to_string(),
            provider_name: "Dr. Rivera".to_string(),
            start: date.and_hms_opt(9, 0, 0).unwrap(),
            end: date.and_hms_opt(9, 30, 0).unwrap(),
            status: AppointmentStatus::Confirmed,
            appointment_type: AppointmentType::OfficeVisit,
            reason: "Annual".to_string(),
        }
    }

    #[tokio::test]
    async fn test_json_store_overwrites_whole_session() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileCacheStore::new(temp_dir.path().join("cache"));
        let date = NaiveDate::from_ymd_opt(2025, 7, 7).unwrap();

        store.save(date, &[sample("A-1"), sample("A-2")]).await.unwrap();
        store.save(date, &[sample("A-3")]).await.unwrap();

        let loaded = store.load(date).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "A-3");
        assert!(store.session_path(date).exists());
    }

    #[tokio::test]
    async fn test_json_store_missing_session_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileCacheStore::new(temp_dir.path());
        let date = NaiveDate::from_ymd_opt(2025, 7, 8).unwrap();

        assert!(store.load(date).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_store_round_trip() {
        let store = InMemoryCacheStore::new();
        let date = NaiveDate::from_ymd_opt(2025, 7, 7).unwrap();

        store.save(date, &[sample("A-1")]).await.unwrap();
        assert_eq!(store.load(date).await.unwrap(), vec![sample("A-1")]);
        assert_eq!(store.session_count().await, 1);
    }
}

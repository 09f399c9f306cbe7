use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::utils::error::Result;
use crate::utils::validation::validate_credential_field;

/// 遠端回傳的原始記錄，欄位名稱不保證一致
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub data: HashMap<String, serde_json::Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    /// 依序嘗試多個欄位名稱，回傳第一個非空的字串值
    pub fn first_str(&self, names: &[&str]) -> Option<String> {
        names.iter().find_map(|name| match self.data.get(*name)? {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteAppointment(pub Record);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemotePatient(pub Record);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteProvider(pub Record);

impl From<Record> for RemoteAppointment {
    fn from(record: Record) -> Self {
        Self(record)
    }
}

impl From<Record> for RemotePatient {
    fn from(record: Record) -> Self {
        Self(record)
    }
}

impl From<Record> for RemoteProvider {
    fn from(record: Record) -> Self {
        Self(record)
    }
}

/// Connection details for the remote service. Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    endpoint: String,
    username: String,
    password: String,
    customer_key: String,
}

impl Credentials {
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        customer_key: impl Into<String>,
    ) -> Result<Self> {
        let credentials = Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
            customer_key: customer_key.into(),
        };

        validate_credential_field("endpoint", &credentials.endpoint)?;
        validate_credential_field("username", &credentials.username)?;
        validate_credential_field("password", &credentials.password)?;
        validate_credential_field("customer_key", &credentials.customer_key)?;

        Ok(credentials)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn customer_key(&self) -> &str {
        &self.customer_key
    }
}

// 不可把密碼寫進日誌
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"***")
            .field("customer_key", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Arrived,
    Waiting,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
    Rescheduled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Confirmed => "confirmed",
            Self::Arrived => "arrived",
            Self::Waiting => "waiting",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::NoShow => "no_show",
            Self::Rescheduled => "rescheduled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentType {
    OfficeVisit,
    NewPatient,
    FollowUp,
    Telehealth,
    Procedure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalPatient {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub phone: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalProvider {
    pub id: String,
    pub full_name: String,
    pub specialty: String,
}

/// 可直接寫入快取的預約記錄
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalAppointment {
    pub id: String,
    pub patient_id: String,
    pub patient_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub phone: String,
    pub provider_id: String,
    pub provider_name: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub status: AppointmentStatus,
    pub appointment_type: AppointmentType,
    pub reason: String,
}

/// Half-open date range `[from, to)` fetched by one sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl SyncWindow {
    pub fn session_date(&self) -> NaiveDate {
        self.from
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub success: bool,
    pub appointments_found: usize,
    pub patients_found: usize,
    pub errors: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

impl SyncResult {
    pub fn succeeded(appointments_found: usize, patients_found: usize, errors: Vec<String>) -> Self {
        Self {
            success: true,
            appointments_found,
            patients_found,
            errors,
            timestamp: Utc::now(),
            duration_ms: 0,
        }
    }

    pub fn failed(errors: Vec<String>) -> Self {
        Self {
            success: false,
            appointments_found: 0,
            patients_found: 0,
            errors,
            timestamp: Utc::now(),
            duration_ms: 0,
        }
    }

    pub fn empty() -> Self {
        Self::succeeded(0, 0, Vec::new())
    }

    pub fn with_duration(mut self, duration: std::time::Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }
}

/// Create (no id) or update (with id) request for one appointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentRequest {
    pub appointment_id: Option<String>,
    pub patient_id: String,
    pub provider_id: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub reason: String,
    pub status: Option<AppointmentStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientUpdate {
    pub patient_id: String,
    pub fields: BTreeMap<String, String>,
}

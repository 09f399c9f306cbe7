//! Per-operation minimum-interval rate limiting for the remote service.
//!
//! Each remote method has its own documented limit. The limiter keeps a
//! ledger of the last dispatch time per method and suspends callers until the
//! method's interval has elapsed. Different methods never block each other.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Remote methods exposed by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetAllPatients,
    GetAppointment,
    GetAppointments,
    GetPatient,
    GetPatients,
    GetProviders,
    SearchPatient,
    CreateAppointment,
    UpdateAppointment,
    UpdatePatient,
}

impl Operation {
    /// SOAP method name, also used as the rate-limit key.
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetAllPatients => "GetAllPatients",
            Self::GetAppointment => "GetAppointment",
            Self::GetAppointments => "GetAppointments",
            Self::GetPatient => "GetPatient",
            Self::GetPatients => "GetPatients",
            Self::GetProviders => "GetProviders",
            Self::SearchPatient => "SearchPatient",
            Self::CreateAppointment => "CreateAppointment",
            Self::UpdateAppointment => "UpdateAppointment",
            Self::UpdatePatient => "UpdatePatient",
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::CreateAppointment | Self::UpdateAppointment | Self::UpdatePatient
        )
    }
}

/// Fixed table of minimum intervals, keyed by method name.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    intervals: HashMap<String, Duration>,
}

impl RateLimitPolicy {
    /// 遠端服務文件公布的限制
    pub fn documented() -> Self {
        let table: [(Operation, u64); 10] = [
            (Operation::GetAllPatients, 5000),
            (Operation::GetAppointment, 500),
            (Operation::GetAppointments, 1000),
            (Operation::GetPatient, 250),
            (Operation::GetPatients, 1000),
            (Operation::GetProviders, 500),
            (Operation::SearchPatient, 250),
            (Operation::CreateAppointment, 500),
            (Operation::UpdateAppointment, 500),
            (Operation::UpdatePatient, 1000),
        ];

        Self {
            intervals: table
                .iter()
                .map(|(op, ms)| (op.name().to_string(), Duration::from_millis(*ms)))
                .collect(),
        }
    }

    pub fn empty() -> Self {
        Self {
            intervals: HashMap::new(),
        }
    }

    pub fn with_interval(mut self, operation: &str, interval: Duration) -> Self {
        self.intervals.insert(operation.to_string(), interval);
        self
    }

    pub fn interval(&self, operation: &str) -> Option<Duration> {
        self.intervals.get(operation).copied()
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::documented()
    }
}

pub struct RateLimiter {
    policy: RateLimitPolicy,
    ledger: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            ledger: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Suspends until `operation` may be dispatched, then returns.
    ///
    /// The slot is reserved under the ledger lock before sleeping, so
    /// concurrent callers for the same method are spaced one interval apart.
    pub async fn wait_for_slot(&self, operation: &str) {
        let Some(interval) = self.policy.interval(operation) else {
            tracing::warn!(
                "⚠️ No rate limit configured for {}, dispatching without delay",
                operation
            );
            self.ledger().insert(operation.to_string(), Instant::now());
            return;
        };

        let wait = {
            let mut ledger = self.ledger();
            let now = Instant::now();
            let slot = match ledger.get(operation) {
                Some(last) => (*last + interval).max(now),
                None => now,
            };
            ledger.insert(operation.to_string(), slot);
            slot - now
        };

        if !wait.is_zero() {
            tracing::debug!("⏳ Rate limit: waiting {:?} before {}", wait, operation);
            tokio::time::sleep(wait).await;
        }
    }

    pub fn can_call_now(&self, operation: &str) -> bool {
        self.remaining_wait(operation).is_zero()
    }

    pub fn remaining_wait(&self, operation: &str) -> Duration {
        let Some(interval) = self.policy.interval(operation) else {
            return Duration::ZERO;
        };

        match self.ledger().get(operation) {
            Some(last) => (*last + interval).saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }

    pub fn remaining_wait_ms(&self, operation: &str) -> u64 {
        self.remaining_wait(operation).as_millis() as u64
    }

    pub fn reset(&self) {
        self.ledger().clear();
    }

    pub fn reset_one(&self, operation: &str) {
        self.ledger().remove(operation);
    }

    // 鎖只在同步區段內持有，中毒時沿用內部資料即可
    fn ledger(&self) -> std::sync::MutexGuard<'_, HashMap<String, Instant>> {
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitPolicy::documented())
    }
}

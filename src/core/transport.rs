use crate::core::rate_limiter::{Operation, RateLimiter};
use crate::core::soap::{
    build_envelope, check_envelope, extract_records, parse_document, soap_action, Element,
};
use crate::domain::model::{
    AppointmentRequest, Credentials, PatientUpdate, Record, RemoteAppointment, RemotePatient,
    RemoteProvider,
};
use crate::domain::ports::{CredentialProvider, EhrTransport};
use crate::utils::error::{Result, SyncError};
use crate::utils::monitor::CallTimer;
use crate::utils::validation::validate_url;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};

const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// SOAP client for the remote EHR service.
///
/// Owns one lazily-built HTTP session. Every call waits for its rate-limit
/// slot first; mutating calls are additionally serialised so that only one
/// is in flight at a time.
pub struct SoapTransport {
    credentials: Credentials,
    limiter: Arc<RateLimiter>,
    timeout: Duration,
    client: OnceCell<Client>,
    mutation_lock: Mutex<()>,
}

impl SoapTransport {
    pub fn new(
        provider: &dyn CredentialProvider,
        limiter: Arc<RateLimiter>,
        timeout: Duration,
    ) -> Result<Self> {
        let credentials = provider.credentials()?;
        validate_url("remote.endpoint", credentials.endpoint())?;

        Ok(Self {
            credentials,
            limiter,
            timeout,
            client: OnceCell::new(),
            mutation_lock: Mutex::new(()),
        })
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    async fn client(&self) -> Result<&Client> {
        self.client
            .get_or_try_init(|| async {
                tracing::debug!("🔌 Opening session to {}", self.credentials.endpoint());
                Client::builder()
                    .timeout(self.timeout)
                    .build()
                    .map_err(|e| SyncError::TransportUnavailable {
                        message: e.to_string(),
                    })
            })
            .await
    }

    async fn call(
        &self,
        operation: Operation,
        body: Vec<Element>,
        record_tag: &str,
    ) -> Result<Vec<Record>> {
        let _mutation = if operation.is_mutation() {
            Some(self.mutation_lock.lock().await)
        } else {
            None
        };

        self.limiter.wait_for_slot(operation.name()).await;

        let client = self.client().await?;
        let envelope = build_envelope(operation.name(), &self.credentials, &body);
        let timer = CallTimer::start(operation.name());

        let response = match client
            .post(self.credentials.endpoint())
            .header(reqwest::header::CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", soap_action(operation.name()))
            .body(envelope)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                timer.finish("failed to send");
                return Err(map_send_error(e, self.timeout));
            }
        };

        let status = response.status();
        let text = response.text().await.map_err(|e| map_send_error(e, self.timeout))?;
        let records = interpret_response(status, &text, record_tag);

        timer.finish(if records.is_ok() { "ok" } else { "failed" });
        if let Ok(records) = &records {
            tracing::debug!("📥 {} returned {} records", operation.name(), records.len());
        }
        records
    }

    pub async fn get_all_patients(&self) -> Result<Vec<RemotePatient>> {
        let records = self
            .call(Operation::GetAllPatients, vec![Element::parent("Filter", vec![])], "PatientData")
            .await?;
        Ok(records.into_iter().map(RemotePatient::from).collect())
    }

    pub async fn get_patient(&self, patient_id: &str) -> Result<Option<RemotePatient>> {
        let body = vec![Element::parent(
            "Filter",
            vec![Element::leaf("PatientID", patient_id)],
        )];
        let records = self.call(Operation::GetPatient, body, "Patient").await?;
        Ok(records.into_iter().next().map(RemotePatient::from))
    }

    pub async fn get_appointment(&self, appointment_id: &str) -> Result<Option<RemoteAppointment>> {
        let body = vec![Element::parent(
            "Appointment",
            vec![Element::leaf("AppointmentId", appointment_id)],
        )];
        let records = self.call(Operation::GetAppointment, body, "Appointment").await?;
        Ok(records.into_iter().next().map(RemoteAppointment::from))
    }

    pub async fn search_patients(
        &self,
        last_name: &str,
        first_name: Option<&str>,
    ) -> Result<Vec<RemotePatient>> {
        let mut filter = vec![Element::leaf("LastName", last_name)];
        if let Some(first_name) = first_name {
            filter.push(Element::leaf("FirstName", first_name));
        }
        let records = self
            .call(Operation::SearchPatient, vec![Element::parent("Filter", filter)], "PatientData")
            .await?;
        Ok(records.into_iter().map(RemotePatient::from).collect())
    }

    /// Creates the appointment, or updates it when `appointment_id` is set.
    pub async fn save_appointment(&self, request: &AppointmentRequest) -> Result<Record> {
        if request.start > request.end {
            return Err(SyncError::InvalidDateRange {
                from: request.start.to_string(),
                to: request.end.to_string(),
            });
        }

        let mut fields = Vec::new();
        if let Some(id) = &request.appointment_id {
            fields.push(Element::leaf("AppointmentId", id.as_str()));
        }
        fields.push(Element::leaf("PatientId", request.patient_id.as_str()));
        fields.push(Element::leaf("ProviderId", request.provider_id.as_str()));
        fields.push(Element::leaf("StartTime", format_timestamp(&request.start)));
        fields.push(Element::leaf("EndTime", format_timestamp(&request.end)));
        fields.push(Element::leaf("AppointmentReason", request.reason.as_str()));
        if let Some(status) = request.status {
            fields.push(Element::leaf("AppointmentStatus", status.as_str()));
        }

        let operation = match request.appointment_id {
            Some(_) => Operation::UpdateAppointment,
            None => Operation::CreateAppointment,
        };

        let records = self
            .call(operation, vec![Element::parent("Appointment", fields)], "Appointment")
            .await?;
        Ok(records.into_iter().next().unwrap_or_default())
    }

    pub async fn update_patient(&self, update: &PatientUpdate) -> Result<Record> {
        let mut fields = vec![Element::leaf("PatientID", update.patient_id.as_str())];
        fields.extend(
            update
                .fields
                .iter()
                .map(|(name, value)| Element::leaf(name, value.as_str())),
        );

        let records = self
            .call(Operation::UpdatePatient, vec![Element::parent("Patient", fields)], "Patient")
            .await?;
        Ok(records.into_iter().next().unwrap_or_default())
    }
}

#[async_trait]
impl EhrTransport for SoapTransport {
    async fn test_connection(&self) -> Result<()> {
        self.call(Operation::GetProviders, vec![Element::parent("Filter", vec![])], "ProviderData")
            .await?;
        tracing::info!("✅ Connected to {}", self.credentials.endpoint());
        Ok(())
    }

    async fn get_appointments(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RemoteAppointment>> {
        if from > to {
            return Err(SyncError::InvalidDateRange {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        if from == to {
            return Ok(Vec::new());
        }

        let body = vec![Element::parent(
            "Filter",
            vec![
                Element::leaf("StartDate", format_timestamp(&from.and_time(chrono::NaiveTime::MIN))),
                Element::leaf("EndDate", format_timestamp(&to.and_time(chrono::NaiveTime::MIN))),
            ],
        )];

        let records = self.call(Operation::GetAppointments, body, "AppointmentData").await?;
        Ok(records.into_iter().map(RemoteAppointment::from).collect())
    }

    async fn get_patients(&self, patient_ids: &[String]) -> Result<Vec<RemotePatient>> {
        if patient_ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids = patient_ids
            .iter()
            .map(|id| Element::leaf("string", id.as_str()))
            .collect();
        let body = vec![Element::parent(
            "Filter",
            vec![Element::parent("PatientIDs", ids)],
        )];

        let records = self.call(Operation::GetPatients, body, "PatientData").await?;
        Ok(records.into_iter().map(RemotePatient::from).collect())
    }

    async fn get_providers(&self) -> Result<Vec<RemoteProvider>> {
        let records = self
            .call(Operation::GetProviders, vec![Element::parent("Filter", vec![])], "ProviderData")
            .await?;
        Ok(records.into_iter().map(RemoteProvider::from).collect())
    }
}

fn format_timestamp(value: &NaiveDateTime) -> String {
    value.format(DATE_TIME_FORMAT).to_string()
}

fn map_send_error(err: reqwest::Error, timeout: Duration) -> SyncError {
    if err.is_timeout() {
        SyncError::connection(format!("Request timed out after {:?}", timeout))
    } else if err.is_connect() {
        SyncError::connection(format!("Connection failed: {}", err))
    } else {
        SyncError::from(err)
    }
}

/// 依 HTTP 狀態與信封內容判斷結果
fn interpret_response(status: StatusCode, body: &str, record_tag: &str) -> Result<Vec<Record>> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(SyncError::auth(format!("HTTP {}", status)));
    }

    match parse_document(body) {
        Ok(doc) => {
            check_envelope(&doc)?;
            if status.is_success() {
                Ok(extract_records(&doc, record_tag))
            } else if status.is_server_error() {
                Err(SyncError::connection(format!("HTTP {}", status)))
            } else {
                Err(SyncError::remote_fault(format!("HTTP {}", status)))
            }
        }
        Err(e) if status.is_success() => Err(e),
        Err(_) if status.is_server_error() => {
            Err(SyncError::connection(format!("HTTP {}", status)))
        }
        Err(_) => Err(SyncError::remote_fault(format!("HTTP {}", status))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpret_unauthorized_status() {
        let err = interpret_response(StatusCode::UNAUTHORIZED, "", "PatientData").unwrap_err();
        assert!(matches!(err, SyncError::AuthenticationFailed { .. }));
    }

    #[test]
    fn test_interpret_plain_server_error_is_connectivity() {
        let err = interpret_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "<html>maintenance</html>",
            "PatientData",
        )
        .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_interpret_fault_with_server_status() {
        let body = r#"<Envelope><Body><Fault><faultcode>s:Client</faultcode><faultstring>Bad request</faultstring></Fault></Body></Envelope>"#;
        let err = interpret_response(StatusCode::INTERNAL_SERVER_ERROR, body, "PatientData")
            .unwrap_err();
        assert!(matches!(err, SyncError::RemoteFault { message } if message == "Bad request"));
    }

    #[test]
    fn test_new_rejects_non_http_endpoint() {
        let credentials = Credentials::new("ftp://ehr.example.com", "u", "p", "k").unwrap();
        let result = SoapTransport::new(
            &credentials,
            Arc::new(RateLimiter::default()),
            Duration::from_secs(5),
        );
        assert!(result.is_err());
    }
}

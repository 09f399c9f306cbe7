//! Conversion of loosely-named remote records into validated entities.
//!
//! The remote service is inconsistent about field names, so each entity has
//! an explicit table of candidate names tried in order. Missing optional
//! fields fall back to an empty string; only a missing identifier, an
//! unparseable start time or an unknown patient rejects a record.

use crate::domain::model::{
    AppointmentStatus, AppointmentType, InternalAppointment, InternalPatient, InternalProvider,
    Record, RemoteAppointment, RemotePatient, RemoteProvider,
};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::{HashMap, HashSet};

const DEFAULT_APPOINTMENT_MINUTES: i64 = 30;

struct PatientFields;

impl PatientFields {
    const ID: &'static [&'static str] = &["PatientId", "PatientID", "PatientSummary.ID", "ID", "Id"];
    const FIRST_NAME: &'static [&'static str] = &["FirstName", "PatientFirstName", "First"];
    const LAST_NAME: &'static [&'static str] = &["LastName", "PatientLastName", "Last"];
    const FULL_NAME: &'static [&'static str] = &["FullName", "PatientFullName", "Name"];
    const DATE_OF_BIRTH: &'static [&'static str] = &["DOB", "DateOfBirth", "BirthDate"];
    const PHONE: &'static [&'static str] =
        &["MobilePhone", "HomePhone", "WorkPhone", "Phone", "PhoneNumber"];
    const EMAIL: &'static [&'static str] = &["EmailAddress", "Email"];
}

struct ProviderFields;

impl ProviderFields {
    const ID: &'static [&'static str] = &["ProviderId", "ProviderID", "ID", "Id"];
    const FULL_NAME: &'static [&'static str] = &["FullName", "ProviderFullName", "Name"];
    const FIRST_NAME: &'static [&'static str] = &["FirstName", "First"];
    const LAST_NAME: &'static [&'static str] = &["LastName", "Last"];
    const SPECIALTY: &'static [&'static str] = &["SpecialtyName", "Specialty"];
}

struct AppointmentFields;

impl AppointmentFields {
    const ID: &'static [&'static str] = &["AppointmentId", "AppointmentID", "ID", "Id"];
    const PATIENT_ID: &'static [&'static str] = &[
        "PatientId",
        "PatientID",
        "PatientSummary.ID",
        "PatientSummary.PatientId",
        "PatientSummary.PatientID",
    ];
    const PROVIDER_ID: &'static [&'static str] =
        &["ProviderId", "ProviderID", "ResourceId", "ResourceID", "PrimaryProviderId"];
    const START: &'static [&'static str] =
        &["StartTime", "StartDate", "StartDateTime", "AppointmentStart"];
    const END: &'static [&'static str] = &["EndTime", "EndDate", "EndDateTime", "AppointmentEnd"];
    const DURATION: &'static [&'static str] = &["AppointmentDuration", "Duration"];
    const STATUS: &'static [&'static str] = &["AppointmentStatus", "ConfirmationStatus", "Status"];
    const TYPE: &'static [&'static str] = &["AppointmentType", "Type", "VisitType"];
    const REASON: &'static [&'static str] = &["AppointmentReason1", "AppointmentReason", "Reason", "Notes"];
}

fn field(record: &Record, names: &[&str]) -> String {
    record.first_str(names).unwrap_or_default()
}

pub fn transform_patient(raw: &RemotePatient) -> InternalPatient {
    let record = &raw.0;
    let first_name = field(record, PatientFields::FIRST_NAME);
    let last_name = field(record, PatientFields::LAST_NAME);
    let full_name = record
        .first_str(PatientFields::FULL_NAME)
        .unwrap_or_else(|| join_name(&first_name, &last_name));

    InternalPatient {
        id: field(record, PatientFields::ID),
        first_name,
        last_name,
        full_name,
        date_of_birth: record
            .first_str(PatientFields::DATE_OF_BIRTH)
            .and_then(|value| parse_date(&value)),
        phone: field(record, PatientFields::PHONE),
        email: field(record, PatientFields::EMAIL),
    }
}

pub fn transform_provider(raw: &RemoteProvider) -> InternalProvider {
    let record = &raw.0;
    let full_name = record.first_str(ProviderFields::FULL_NAME).unwrap_or_else(|| {
        join_name(
            &field(record, ProviderFields::FIRST_NAME),
            &field(record, ProviderFields::LAST_NAME),
        )
    });

    InternalProvider {
        id: field(record, ProviderFields::ID),
        full_name,
        specialty: field(record, ProviderFields::SPECIALTY),
    }
}

/// An appointment whose own fields are valid, not yet joined to its patient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAppointment {
    pub id: String,
    pub patient_id: String,
    pub provider_id: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub status: AppointmentStatus,
    pub appointment_type: AppointmentType,
    pub reason: String,
}

/// `window_date` is combined with bare times such as `"09:30"`.
pub fn transform_appointment(
    raw: &RemoteAppointment,
    window_date: NaiveDate,
) -> Result<ParsedAppointment, String> {
    let record = &raw.0;
    let id = record
        .first_str(AppointmentFields::ID)
        .ok_or_else(|| "Appointment record is missing an identifier".to_string())?;

    let start = record
        .first_str(AppointmentFields::START)
        .and_then(|value| parse_timestamp(&value, window_date))
        .ok_or_else(|| format!("Invalid start time for appointment {}", id))?;

    let explicit_end = record
        .first_str(AppointmentFields::END)
        .and_then(|value| parse_timestamp(&value, start.date()))
        .filter(|end| *end >= start);

    let end = match explicit_end {
        Some(end) => end,
        None => {
            // 不合理的時長（溢位）一律退回預設時長
            let after = |minutes: i64| {
                Duration::try_minutes(minutes).and_then(|delta| start.checked_add_signed(delta))
            };
            record
                .first_str(AppointmentFields::DURATION)
                .and_then(|value| value.parse::<i64>().ok())
                .filter(|minutes| *minutes > 0)
                .and_then(after)
                .or_else(|| after(DEFAULT_APPOINTMENT_MINUTES))
                .ok_or_else(|| format!("Invalid end time for appointment {}", id))?
        }
    };

    Ok(ParsedAppointment {
        patient_id: field(record, AppointmentFields::PATIENT_ID),
        provider_id: field(record, AppointmentFields::PROVIDER_ID),
        start,
        end,
        status: normalize_status(&field(record, AppointmentFields::STATUS)),
        appointment_type: normalize_type(&field(record, AppointmentFields::TYPE)),
        reason: field(record, AppointmentFields::REASON),
        id,
    })
}

/// Distinct patient ids referenced by the appointments, in first-seen order.
pub fn distinct_patient_ids(appointments: &[RemoteAppointment]) -> Vec<String> {
    let mut seen = HashSet::new();
    appointments
        .iter()
        .filter_map(|a| a.0.first_str(AppointmentFields::PATIENT_ID))
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinOutcome {
    pub appointments: Vec<InternalAppointment>,
    pub errors: Vec<String>,
}

/// 逐筆合併；單筆失敗只記錄錯誤，不影響其他預約
pub fn join_appointments(
    appointments: &[RemoteAppointment],
    patients: &[RemotePatient],
    providers: &[RemoteProvider],
    window_date: NaiveDate,
) -> JoinOutcome {
    let patients: HashMap<String, InternalPatient> = patients
        .iter()
        .map(transform_patient)
        .filter(|p| !p.id.is_empty())
        .map(|p| (p.id.clone(), p))
        .collect();
    let providers: HashMap<String, InternalProvider> = providers
        .iter()
        .map(transform_provider)
        .filter(|p| !p.id.is_empty())
        .map(|p| (p.id.clone(), p))
        .collect();

    let mut outcome = JoinOutcome::default();

    for raw in appointments {
        let parsed = match transform_appointment(raw, window_date) {
            Ok(parsed) => parsed,
            Err(message) => {
                tracing::warn!("⚠️ {}", message);
                outcome.errors.push(message);
                continue;
            }
        };

        let Some(patient) = patients.get(&parsed.patient_id) else {
            let message = format!("Patient not found for appointment {}", parsed.id);
            tracing::warn!("⚠️ {}", message);
            outcome.errors.push(message);
            continue;
        };

        let provider_name = providers
            .get(&parsed.provider_id)
            .map(|p| p.full_name.clone())
            .unwrap_or_default();

        outcome.appointments.push(InternalAppointment {
            id: parsed.id,
            patient_id: patient.id.clone(),
            patient_name: patient.full_name.clone(),
            date_of_birth: patient.date_of_birth,
            phone: patient.phone.clone(),
            provider_id: parsed.provider_id,
            provider_name,
            start: parsed.start,
            end: parsed.end,
            status: parsed.status,
            appointment_type: parsed.appointment_type,
            reason: parsed.reason,
        });
    }

    outcome
        .appointments
        .sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
    outcome
}

pub fn normalize_status(value: &str) -> AppointmentStatus {
    match squash(value).as_str() {
        "scheduled" | "unconfirmed" | "booked" | "pending" => AppointmentStatus::Scheduled,
        "confirmed" => AppointmentStatus::Confirmed,
        "arrived" | "checkedin" | "checkin" => AppointmentStatus::Arrived,
        "waiting" | "waitingroom" => AppointmentStatus::Waiting,
        "inprogress" | "roomed" | "withprovider" => AppointmentStatus::InProgress,
        "completed" | "complete" | "checkedout" | "checkout" => AppointmentStatus::Completed,
        "cancelled" | "canceled" => AppointmentStatus::Cancelled,
        "noshow" => AppointmentStatus::NoShow,
        "rescheduled" => AppointmentStatus::Rescheduled,
        other => {
            if !other.is_empty() {
                tracing::debug!("Unrecognized appointment status '{}', using scheduled", value);
            }
            AppointmentStatus::Scheduled
        }
    }
}

pub fn normalize_type(value: &str) -> AppointmentType {
    match squash(value).as_str() {
        "newpatient" | "new" | "newvisit" => AppointmentType::NewPatient,
        "followup" | "followupvisit" => AppointmentType::FollowUp,
        "telehealth" | "telemedicine" | "virtual" | "video" => AppointmentType::Telehealth,
        "procedure" => AppointmentType::Procedure,
        _ => AppointmentType::OfficeVisit,
    }
}

// "No Show" / "no_show" / "NoShow" 都視為同一個值
fn squash(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn join_name(first: &str, last: &str) -> String {
    format!("{} {}", first, last).trim().to_string()
}

const DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const TIME_FORMATS: &[&str] = &["%H:%M:%S", "%H:%M", "%I:%M:%S %p", "%I:%M %p"];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// Normalizes the accepted timestamp shapes to one naive local timestamp.
pub fn parse_timestamp(value: &str, window_date: NaiveDate) -> Option<NaiveDateTime> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_local());
    }

    if let Some(dt) = DATE_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
    {
        return Some(dt);
    }

    if let Some(time) = TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(value, fmt).ok())
    {
        return Some(window_date.and_time(time));
    }

    parse_date(value).map(|date| date.and_time(NaiveTime::MIN))
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    let date_part = value.split('T').next().unwrap_or(value);

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
        .or_else(|| {
            DATE_TIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
                .map(|dt| dt.date())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 7).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        day().and_hms_opt(h, m, 0).unwrap()
    }

    fn appointment(id: &str, patient_id: &str, start: &str) -> RemoteAppointment {
        RemoteAppointment(
            Record::new()
                .with_field("ID", id)
                .with_field("PatientID", patient_id)
                .with_field("StartTime", start),
        )
    }

    fn patient(id: &str, first: &str, last: &str) -> RemotePatient {
        RemotePatient(
            Record::new()
                .with_field("PatientId", id)
                .with_field("FirstName", first)
                .with_field("LastName", last),
        )
    }

    #[test]
    fn test_patient_uses_alternate_field_names() {
        let raw = RemotePatient(
            Record::new()
                .with_field("Id", "P-1")
                .with_field("PatientFirstName", "Ada")
                .with_field("PatientLastName", "Lovelace")
                .with_field("DateOfBirth", "1815-12-10T00:00:00")
                .with_field("HomePhone", "555-0100"),
        );

        let patient = transform_patient(&raw);
        assert_eq!(patient.id, "P-1");
        assert_eq!(patient.full_name, "Ada Lovelace");
        assert_eq!(patient.date_of_birth, NaiveDate::from_ymd_opt(1815, 12, 10));
        assert_eq!(patient.phone, "555-0100");
        assert_eq!(patient.email, "");
    }

    #[test]
    fn test_transform_patient_is_idempotent() {
        let raw = patient("P-2", "Grace", "Hopper");
        let first = serde_json::to_vec(&transform_patient(&raw)).unwrap();
        let second = serde_json::to_vec(&transform_patient(&raw)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_optional_fields_default_to_empty() {
        let patient = transform_patient(&RemotePatient(Record::new().with_field("ID", "P-3")));
        assert_eq!(patient.full_name, "");
        assert_eq!(patient.date_of_birth, None);

        let provider = transform_provider(&RemoteProvider(
            Record::new()
                .with_field("ProviderID", "D-1")
                .with_field("FirstName", "Jane")
                .with_field("LastName", "Doe"),
        ));
        assert_eq!(provider.full_name, "Jane Doe");
        assert_eq!(provider.specialty, "");
    }

    #[test]
    fn test_parse_timestamp_shapes() {
        assert_eq!(parse_timestamp("2025-07-07T09:30:00", day()), Some(at(9, 30)));
        assert_eq!(parse_timestamp("2025-07-07T09:30:00-05:00", day()), Some(at(9, 30)));
        assert_eq!(parse_timestamp("07/07/2025 2:15 PM", day()), Some(at(14, 15)));
        assert_eq!(parse_timestamp("10:45", day()), Some(at(10, 45)));
        assert_eq!(parse_timestamp("9:05 AM", day()), Some(at(9, 5)));
        assert_eq!(parse_timestamp("2025-07-07", day()), Some(at(0, 0)));
        assert_eq!(parse_timestamp("tomorrow-ish", day()), None);
    }

    #[test]
    fn test_appointment_end_defaults_from_duration() {
        let raw = RemoteAppointment(
            Record::new()
                .with_field("AppointmentId", "A-1")
                .with_field("StartDate", "2025-07-07T08:00:00")
                .with_field("AppointmentDuration", "45"),
        );
        let parsed = transform_appointment(&raw, day()).unwrap();
        assert_eq!(parsed.end, at(8, 45));

        let no_duration = appointment("A-2", "P-1", "11:00");
        let parsed = transform_appointment(&no_duration, day()).unwrap();
        assert_eq!(parsed.start, at(11, 0));
        assert_eq!(parsed.end, at(11, 30));
    }

    #[test]
    fn test_bad_start_time_is_a_record_error() {
        let err = transform_appointment(&appointment("A-9", "P-1", "soon"), day()).unwrap_err();
        assert_eq!(err, "Invalid start time for appointment A-9");
    }

    #[test]
    fn test_status_and_type_normalization() {
        assert_eq!(normalize_status("Checked Out"), AppointmentStatus::Completed);
        assert_eq!(normalize_status("No Show"), AppointmentStatus::NoShow);
        assert_eq!(normalize_status("in_progress"), AppointmentStatus::InProgress);
        assert_eq!(normalize_status("arrived"), AppointmentStatus::Arrived);
        assert_eq!(normalize_status("Canceled"), AppointmentStatus::Cancelled);
        assert_eq!(normalize_status("mystery"), AppointmentStatus::Scheduled);
        assert_eq!(normalize_status(""), AppointmentStatus::Scheduled);

        assert_eq!(normalize_type("Follow-Up"), AppointmentType::FollowUp);
        assert_eq!(normalize_type("Telemedicine"), AppointmentType::Telehealth);
        assert_eq!(normalize_type("whatever"), AppointmentType::OfficeVisit);
    }

    #[test]
    fn test_distinct_patient_ids_keeps_first_seen_order() {
        let appointments = vec![
            appointment("A-1", "P-2", "09:00"),
            appointment("A-2", "P-1", "10:00"),
            appointment("A-3", "P-2", "11:00"),
        ];
        assert_eq!(distinct_patient_ids(&appointments), vec!["P-2", "P-1"]);
    }

    #[test]
    fn test_join_isolates_missing_patient() {
        let appointments = vec![
            appointment("A-1", "P-1", "09:00"),
            appointment("A-2", "P-404", "10:00"),
            appointment("A-3", "P-2", "11:00"),
        ];
        let patients = vec![patient("P-1", "Ann", "Lee"), patient("P-2", "Bo", "Kim")];
        let providers = vec![];

        let outcome = join_appointments(&appointments, &patients, &providers, day());

        assert_eq!(outcome.appointments.len(), 2);
        assert_eq!(outcome.errors, vec!["Patient not found for appointment A-2"]);
        assert_eq!(outcome.appointments[0].patient_name, "Ann Lee");
        assert_eq!(outcome.appointments[1].id, "A-3");
    }

    #[test]
    fn test_join_attaches_provider_name() {
        let mut raw = appointment("A-1", "P-1", "09:00");
        raw.0 = raw.0.with_field("ResourceID", "D-7");
        let providers = vec![RemoteProvider(
            Record::new()
                .with_field("ID", "D-7")
                .with_field("FullName", "Dr. Rivera"),
        )];

        let outcome = join_appointments(&[raw], &[patient("P-1", "Ann", "Lee")], &providers, day());
        assert_eq!(outcome.appointments[0].provider_id, "D-7");
        assert_eq!(outcome.appointments[0].provider_name, "Dr. Rivera");
    }

    #[test]
    fn test_oversized_duration_falls_back_to_default() {
        let mut raw = appointment("A-9", "P-1", "2025-07-07T09:00:00");
        raw.0 = raw.0.with_field("AppointmentDuration", "200000000000");

        let parsed = transform_appointment(&raw, day()).unwrap();
        assert_eq!(parsed.end, at(9, 30));

        let outcome = join_appointments(&[raw], &[patient("P-1", "Ann", "Lee")], &[], day());
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.appointments[0].end, at(9, 30));
    }
}

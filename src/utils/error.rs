use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Remote service unavailable: {message}")]
    ConnectionUnavailable { message: String },

    #[error("Remote fault: {message}")]
    RemoteFault { message: String },

    #[error("Transport unavailable: {message}")]
    TransportUnavailable { message: String },

    #[error("Invalid date range: {from} is after {to}")]
    InvalidDateRange { from: String, to: String },

    #[error("Missing credential field: {field}")]
    MissingCredential { field: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value for {field} ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("XML error: {0}")]
    XmlError(#[from] quick_xml::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Connectivity,
    Authentication,
    Remote,
    Data,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl SyncError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::ConnectionUnavailable {
            message: message.into(),
        }
    }

    pub fn remote_fault(message: impl Into<String>) -> Self {
        Self::RemoteFault {
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::AuthenticationFailed { .. } => ErrorCategory::Authentication,
            Self::ConnectionUnavailable { .. } | Self::TransportUnavailable { .. } => {
                ErrorCategory::Connectivity
            }
            Self::RemoteFault { .. } => ErrorCategory::Remote,
            Self::InvalidDateRange { .. } | Self::XmlError(_) | Self::SerializationError(_) => {
                ErrorCategory::Data
            }
            Self::MissingCredential { .. }
            | Self::ConfigError { .. }
            | Self::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            Self::IoError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Connectivity => ErrorSeverity::Medium,
            ErrorCategory::Remote | ErrorCategory::Data => ErrorSeverity::High,
            ErrorCategory::Authentication => ErrorSeverity::High,
            ErrorCategory::Configuration | ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    /// 只有連線類錯誤值得在同一次同步中重試
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionUnavailable { .. })
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => "Check the settings file and credential fields",
            ErrorCategory::Connectivity => {
                "Check network access to the remote endpoint; cached data remains available"
            }
            ErrorCategory::Authentication => "Rotate or re-issue the remote service credentials",
            ErrorCategory::Remote => "Inspect the remote fault message and the request window",
            ErrorCategory::Data => "Inspect the raw response; the remote schema may have changed",
            ErrorCategory::System => "Check disk permissions for the cache directory",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::AuthenticationFailed { .. } => {
                "The EHR service rejected the configured credentials".to_string()
            }
            Self::ConnectionUnavailable { .. } | Self::TransportUnavailable { .. } => {
                "The EHR service could not be reached".to_string()
            }
            Self::RemoteFault { message } => format!("The EHR service reported an error: {}", message),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
            {
                return Self::auth(format!("HTTP {}", status));
            }
        }
        Self::connection(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connectivity_is_retryable() {
        assert!(SyncError::connection("timeout").is_retryable());
        assert!(!SyncError::auth("bad password").is_retryable());
        assert!(!SyncError::remote_fault("boom").is_retryable());
    }

    #[test]
    fn test_severity_by_category() {
        let err = SyncError::MissingCredential {
            field: "username".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert_eq!(
            SyncError::connection("dns").severity(),
            ErrorSeverity::Medium
        );
    }

    #[test]
    fn test_remote_fault_message_is_verbatim() {
        let err = SyncError::remote_fault("Customer key invalid");
        assert_eq!(err.to_string(), "Remote fault: Customer key invalid");
        assert!(err.user_friendly_message().contains("Customer key invalid"));
    }
}

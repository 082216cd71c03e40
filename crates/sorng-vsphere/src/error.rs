//! Error types for the vSphere control client.

use std::fmt;

/// Categorised error kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VsphereErrorKind {
    /// Control plane unreachable or session missing
    ConnectionError,
    /// Login rejected (`InvalidLogin`) or session expired
    AuthenticationError,
    /// Managed object, device or snapshot not found
    NotFound,
    /// HTTP status outside the SOAP contract
    ApiError(u16),
    /// SOAP fault or task fault, carrying the vim25 fault type name
    Fault(String),
    /// Task ended in an unexpected state
    TaskError,
    /// XML / cookie / timestamp parse error
    ParseError,
    /// HTTP timeout
    Timeout,
    /// Generic
    Other,
}

/// Crate error type carrying a kind + human-readable message.
#[derive(Debug, Clone)]
pub struct VsphereError {
    pub kind: VsphereErrorKind,
    pub message: String,
}

impl VsphereError {
    pub fn new(kind: VsphereErrorKind, msg: impl Into<String>) -> Self {
        Self { kind, message: msg.into() }
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::new(VsphereErrorKind::ConnectionError, msg)
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::new(VsphereErrorKind::AuthenticationError, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(VsphereErrorKind::NotFound, msg)
    }

    pub fn api(status: u16, msg: impl Into<String>) -> Self {
        Self::new(VsphereErrorKind::ApiError(status), msg)
    }

    pub fn fault(fault_type: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(VsphereErrorKind::Fault(fault_type.into()), msg)
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::new(VsphereErrorKind::ParseError, msg)
    }

    pub fn task(msg: impl Into<String>) -> Self {
        Self::new(VsphereErrorKind::TaskError, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(VsphereErrorKind::Timeout, msg)
    }

    /// Whether this error is the given vim25 fault (e.g. `CpuHotPlugNotSupported`).
    pub fn is_fault(&self, fault_type: &str) -> bool {
        matches!(&self.kind, VsphereErrorKind::Fault(f) if f == fault_type)
    }
}

impl fmt::Display for VsphereError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)
    }
}

impl std::error::Error for VsphereError {}

impl From<reqwest::Error> for VsphereError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::timeout(format!("HTTP timeout: {e}"))
        } else if e.is_connect() {
            Self::connection(format!("Connection failed: {e}"))
        } else {
            Self::new(VsphereErrorKind::Other, format!("HTTP error: {e}"))
        }
    }
}

impl From<quick_xml::Error> for VsphereError {
    fn from(e: quick_xml::Error) -> Self {
        Self::parse(format!("XML parse error: {e}"))
    }
}

impl From<url::ParseError> for VsphereError {
    fn from(e: url::ParseError) -> Self {
        Self::parse(format!("Invalid URL: {e}"))
    }
}

/// Convenience alias.
pub type VsphereResult<T> = Result<T, VsphereError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_kind_matches_by_name() {
        let e = VsphereError::fault("CpuHotPlugNotSupported", "hot plug off");
        assert!(e.is_fault("CpuHotPlugNotSupported"));
        assert!(!e.is_fault("InvalidPowerState"));
        assert!(!VsphereError::task("boom").is_fault("CpuHotPlugNotSupported"));
    }

    #[test]
    fn display_includes_kind_and_message() {
        let e = VsphereError::not_found("VM \"web01\" not found");
        assert_eq!(e.to_string(), "[NotFound] VM \"web01\" not found");
    }
}

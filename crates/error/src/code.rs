use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric error codes following CONDUIT-XXXX format.
///
/// ## Code Ranges
/// - **1000-1999**: Connection errors
/// - **2000-2999**: Request validation errors
/// - **3000-3999**: Execution errors
/// - **4000-4999**: Bridge errors
/// - **5000-5999**: Configuration/Internal errors
///
/// Codes are stable across versions (semver contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
#[non_exhaustive]
pub enum ErrorCode {
    // === Connection Errors (1000-1999) ===
    /// CONDUIT-1001: No pooled connection became available in time
    PoolExhausted = 1001,
    /// CONDUIT-1002: Establishing a connection timed out
    ConnectionTimeout = 1002,
    /// CONDUIT-1003: Target engine unreachable
    ConnectionRefused = 1003,
    /// CONDUIT-1004: Target engine rejected the credentials
    AuthenticationFailed = 1004,
    /// CONDUIT-1005: Connection dropped while in use
    ConnectionLost = 1005,

    // === Request Errors (2000-2999) ===
    /// CONDUIT-2001: Missing or empty operation name
    InvalidOperation = 2001,
    /// CONDUIT-2002: Parameter name or value rejected by the binder
    InvalidParameter = 2002,
    /// CONDUIT-2003: Request cancelled by the caller
    Cancelled = 2003,

    // === Execution Errors (3000-3999) ===
    /// CONDUIT-3001: Target engine rejected or failed the command
    ExecutionFailed = 3001,
    /// CONDUIT-3002: Command exceeded the configured timeout
    CommandTimeout = 3002,
    /// CONDUIT-3003: Relay endpoint answered with a non-success status
    RelayRejected = 3003,
    /// CONDUIT-3004: Result column type has no scalar representation
    UnsupportedColumnType = 3004,
    /// CONDUIT-3005: Result payload could not be decoded
    ResultDecodeFailed = 3005,

    // === Bridge Errors (4000-4999) ===
    /// CONDUIT-4001: Proxy resource could not be destroyed
    BridgeTeardownFailed = 4001,

    // === Internal Errors (5000-5999) ===
    /// CONDUIT-5001: Configuration is invalid
    InvalidConfiguration = 5001,
    /// CONDUIT-5002: Driver returned rows that disagree with its own column list
    DriverContractViolation = 5002,
    /// CONDUIT-5003: Serialization/deserialization failed
    SerializationFailed = 5003,
    /// CONDUIT-5004: Unexpected internal state
    Internal = 5004,

    /// CONDUIT-9999: Unknown/unclassified error
    Unknown = 9999,
}

impl ErrorCode {
    /// Get the numeric code value
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Get the formatted code string (e.g., "CONDUIT-2002")
    pub fn as_str(&self) -> String {
        format!("CONDUIT-{:04}", self.as_u16())
    }

    /// Taxonomy bucket the code belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ErrorCode::InvalidOperation => ErrorKind::InvalidOperation,
            ErrorCode::InvalidParameter => ErrorKind::InvalidParameter,
            ErrorCode::Cancelled => ErrorKind::Cancelled,
            ErrorCode::BridgeTeardownFailed => ErrorKind::BridgeTeardownFailure,
            _ => match self.as_u16() {
                1000..=1999 => ErrorKind::ConnectionFailure,
                3000..=3999 => ErrorKind::ExecutionFailure,
                _ => ErrorKind::Internal,
            },
        }
    }

    /// HTTP status a transport layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorCode::PoolExhausted | ErrorCode::ConnectionTimeout => 504,
            ErrorCode::CommandTimeout => 504,
            _ => match self.kind() {
                ErrorKind::InvalidOperation | ErrorKind::InvalidParameter => 400,
                ErrorKind::ConnectionFailure => 502,
                ErrorKind::Cancelled => 499,
                ErrorKind::ExecutionFailure
                | ErrorKind::BridgeTeardownFailure
                | ErrorKind::Internal => 500,
            },
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> String {
        code.as_str()
    }
}

impl TryFrom<String> for ErrorCode {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        let num: u16 = s
            .strip_prefix("CONDUIT-")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| "Invalid format".to_string())?;
        Self::try_from(num).map_err(|_| "Unknown code".to_string())
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = String;

    fn try_from(n: u16) -> std::result::Result<Self, Self::Error> {
        match n {
            1001 => Ok(Self::PoolExhausted),
            1002 => Ok(Self::ConnectionTimeout),
            1003 => Ok(Self::ConnectionRefused),
            1004 => Ok(Self::AuthenticationFailed),
            1005 => Ok(Self::ConnectionLost),
            2001 => Ok(Self::InvalidOperation),
            2002 => Ok(Self::InvalidParameter),
            2003 => Ok(Self::Cancelled),
            3001 => Ok(Self::ExecutionFailed),
            3002 => Ok(Self::CommandTimeout),
            3003 => Ok(Self::RelayRejected),
            3004 => Ok(Self::UnsupportedColumnType),
            3005 => Ok(Self::ResultDecodeFailed),
            4001 => Ok(Self::BridgeTeardownFailed),
            5001 => Ok(Self::InvalidConfiguration),
            5002 => Ok(Self::DriverContractViolation),
            5003 => Ok(Self::SerializationFailed),
            5004 => Ok(Self::Internal),
            9999 => Ok(Self::Unknown),
            _ => Err(format!("Unknown error code: {}", n)),
        }
    }
}

/// Failure taxonomy exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorKind {
    InvalidOperation,
    InvalidParameter,
    ConnectionFailure,
    ExecutionFailure,
    BridgeTeardownFailure,
    Cancelled,
    Internal,
}

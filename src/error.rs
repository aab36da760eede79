//! Error taxonomy
//!
//! Backend failures are classified once, when the response comes back, and
//! every later decision (retry, swallow, propagate) looks at the class only.

use serde_json::Value;
use thiserror::Error;

/// Maximum length of an error message kept from a response body
const MAX_MESSAGE_LENGTH: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The addressed target does not exist; treated as an empty result
    NotFound,
    /// Rate limited; retried with backoff
    Throttled,
    /// Credentials lack permission; aborts the current leaf
    AccessDenied,
    /// Anything else
    Other,
}

/// A failed backend call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("{operation}: not found ({code}): {message}")]
    NotFound {
        operation: String,
        code: String,
        message: String,
    },
    #[error("{operation}: throttled after {attempts} attempt(s)")]
    Throttled { operation: String, attempts: u32 },
    #[error("{operation}: access denied ({code}): {message}")]
    AccessDenied {
        operation: String,
        code: String,
        message: String,
    },
    #[error("{operation}: service error {status} ({code}): {message}")]
    Service {
        operation: String,
        status: u16,
        code: String,
        message: String,
    },
    #[error("{operation}: transport error: {message}")]
    Transport { operation: String, message: String },
}

impl ApiError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ApiError::NotFound { .. } => ErrorClass::NotFound,
            ApiError::Throttled { .. } => ErrorClass::Throttled,
            ApiError::AccessDenied { .. } => ErrorClass::AccessDenied,
            ApiError::Service { .. } | ApiError::Transport { .. } => ErrorClass::Other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.class() == ErrorClass::NotFound
    }

    pub fn operation(&self) -> &str {
        match self {
            ApiError::NotFound { operation, .. }
            | ApiError::Throttled { operation, .. }
            | ApiError::AccessDenied { operation, .. }
            | ApiError::Service { operation, .. }
            | ApiError::Transport { operation, .. } => operation,
        }
    }

    pub fn not_found(operation: &str, message: &str) -> Self {
        ApiError::NotFound {
            operation: operation.to_string(),
            code: "ResourceNotFoundException".to_string(),
            message: message.to_string(),
        }
    }

    pub fn transport(operation: &str, message: impl Into<String>) -> Self {
        ApiError::Transport {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// Classify an error response.
    ///
    /// The error code comes from the `x-amzn-ErrorType` header when present,
    /// otherwise from the body's `__type` (or `code`) field. A code of the
    /// form `namespace#Code` is reduced to `Code`.
    pub fn from_response(
        operation: &str,
        status: u16,
        error_type: Option<&str>,
        body: &str,
    ) -> Self {
        let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);

        let raw_code = error_type
            .map(|s| s.to_string())
            .or_else(|| {
                ["__type", "code", "Code"]
                    .iter()
                    .find_map(|k| parsed.get(*k).and_then(|v| v.as_str()).map(|s| s.to_string()))
            })
            .unwrap_or_default();

        let message = ["message", "Message"]
            .iter()
            .find_map(|k| parsed.get(*k).and_then(|v| v.as_str()))
            .unwrap_or(body);

        Self::from_code(operation, status, &raw_code, message)
    }

    /// Classify an XML error response (query, EC2 and REST-XML services)
    pub fn from_xml_response(operation: &str, status: u16, body: &str) -> Self {
        let (code, message) = crate::aws::xml::error_fields(body);
        Self::from_code(
            operation,
            status,
            code.as_deref().unwrap_or_default(),
            message.as_deref().unwrap_or(body),
        )
    }

    /// Build the error for a response status and raw error code
    pub fn from_code(operation: &str, status: u16, raw_code: &str, message: &str) -> Self {
        let code = short_code(raw_code);
        let message = sanitize(message);
        let operation = operation.to_string();
        match classify(status, &code) {
            ErrorClass::NotFound => ApiError::NotFound {
                operation,
                code,
                message,
            },
            ErrorClass::Throttled => ApiError::Throttled {
                operation,
                attempts: 1,
            },
            ErrorClass::AccessDenied => ApiError::AccessDenied {
                operation,
                code,
                message,
            },
            ErrorClass::Other => ApiError::Service {
                operation,
                status,
                code,
                message,
            },
        }
    }
}

/// `com.amazonaws.dynamodb.v20120810#ResourceNotFoundException:http://...`
/// becomes `ResourceNotFoundException`
fn short_code(raw: &str) -> String {
    let code = raw.rsplit('#').next().unwrap_or(raw);
    code.split(':').next().unwrap_or(code).trim().to_string()
}

fn classify(status: u16, code: &str) -> ErrorClass {
    const THROTTLING: &[&str] = &[
        "Throttling",
        "ThrottlingException",
        "ThrottledException",
        "TooManyRequestsException",
        "RequestLimitExceeded",
        "RequestThrottled",
        "RequestThrottledException",
        "ProvisionedThroughputExceededException",
        "SlowDown",
    ];
    const DENIED: &[&str] = &[
        "AccessDenied",
        "AccessDeniedException",
        "UnauthorizedOperation",
        "UnrecognizedClientException",
        "InvalidClientTokenId",
        "AuthFailure",
        "ExpiredTokenException",
    ];

    if THROTTLING.contains(&code) || status == 429 {
        return ErrorClass::Throttled;
    }
    if DENIED.contains(&code) || status == 401 || status == 403 {
        return ErrorClass::AccessDenied;
    }
    if code.contains("NotFound")
        || code.contains("NonExistent")
        || code.starts_with("NoSuch")
        || status == 404
    {
        return ErrorClass::NotFound;
    }
    ErrorClass::Other
}

/// Truncate and strip control characters before a body ends up in a message
fn sanitize(body: &str) -> String {
    let cleaned: String = body
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_MESSAGE_LENGTH)
        .collect();
    if body.chars().count() > MAX_MESSAGE_LENGTH {
        format!("{}...", cleaned)
    } else {
        cleaned
    }
}

/// What a scan yields in place of a resource when a leaf fails
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("{target}: {source}")]
    Backend {
        target: String,
        #[source]
        source: ApiError,
    },
    #[error("{target}: cannot create client: {message}")]
    Client { target: String, message: String },
    #[error("metric '{0}' not available")]
    MetricUnavailable(String),
}

impl ScanError {
    pub fn backend(target: impl ToString, source: ApiError) -> Self {
        ScanError::Backend {
            target: target.to_string(),
            source,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            ScanError::Backend { source, .. } => source.class(),
            ScanError::Client { .. } | ScanError::MetricUnavailable(_) => ErrorClass::Other,
        }
    }
}

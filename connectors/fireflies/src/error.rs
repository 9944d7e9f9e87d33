use serde_json::Value;
use shared::RetryPolicy;
use std::time::Duration;
use thiserror::Error;

/// Named failure kinds carried in the `code` of a Fireflies error response.
/// See https://docs.fireflies.ai/miscellaneous/error-codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    InvalidArguments,
    ObjectNotFound,
    Forbidden,
    PaidRequired,
    NotInTeam,
    RequireElevatedPrivilege,
    AccountCancelled,
    ArgsRequired,
    RateLimited,
    PayloadTooSmall,
    RequestTimeout,
    InvalidLanguageCode,
    AdminMustExist,
    /// No mapped code and an embedded status of 500 or above.
    Server,
    /// No mapped code otherwise.
    Generic,
}

impl ApiErrorKind {
    pub fn from_code(code: &str) -> Option<Self> {
        let kind = match code {
            "invalid_arguments" => ApiErrorKind::InvalidArguments,
            "object_not_found" => ApiErrorKind::ObjectNotFound,
            "forbidden" => ApiErrorKind::Forbidden,
            "paid_required" => ApiErrorKind::PaidRequired,
            "not_in_team" => ApiErrorKind::NotInTeam,
            "require_elevated_privilege" => ApiErrorKind::RequireElevatedPrivilege,
            "account_cancelled" => ApiErrorKind::AccountCancelled,
            "args_required" => ApiErrorKind::ArgsRequired,
            "too_many_requests" => ApiErrorKind::RateLimited,
            "payload_too_small" => ApiErrorKind::PayloadTooSmall,
            "request_timeout" => ApiErrorKind::RequestTimeout,
            "invalid_language_code" => ApiErrorKind::InvalidLanguageCode,
            "admin_must_exist" => ApiErrorKind::AdminMustExist,
            _ => return None,
        };
        Some(kind)
    }

    pub fn classify(status: u16, code: &str) -> Self {
        Self::from_code(code).unwrap_or(if status >= 500 {
            ApiErrorKind::Server
        } else {
            ApiErrorKind::Generic
        })
    }

    pub fn description(&self) -> &'static str {
        match self {
            ApiErrorKind::InvalidArguments => "The variables in the GraphQL request is incorrect.",
            ApiErrorKind::ObjectNotFound => "We did not find the object for your query.",
            ApiErrorKind::Forbidden => "You don't have access to perform this action.",
            ApiErrorKind::PaidRequired => "Consider upgrading your plan to perform this action.",
            ApiErrorKind::NotInTeam => "You do not have permissions for this team.",
            ApiErrorKind::RequireElevatedPrivilege => {
                "You do not have permission to perform this action."
            }
            ApiErrorKind::AccountCancelled => {
                "Your account is inactive. If this is not expected, please contact support."
            }
            ApiErrorKind::ArgsRequired => "You must provide the missing argument(s).",
            ApiErrorKind::RateLimited => "Too many requests. Please retry at a later time.",
            ApiErrorKind::PayloadTooSmall => {
                "Content size is too small. Please upload files larger than 50kb."
            }
            ApiErrorKind::RequestTimeout => {
                "Request timed out. Please try again or contact support."
            }
            ApiErrorKind::InvalidLanguageCode => {
                "Language code is invalid or not supported. Please refer to API docs for supported languages."
            }
            ApiErrorKind::AdminMustExist => "You must have at least one admin your team.",
            ApiErrorKind::Server => "Fireflies server error.",
            ApiErrorKind::Generic => "Unexpected Fireflies API error.",
        }
    }
}

#[derive(Debug, Error)]
pub enum FirefliesError {
    #[error("Fireflies-error_status: {status}, Error: {message}, Error_Code: {code}")]
    Api {
        kind: ApiErrorKind,
        status: u16,
        code: String,
        message: String,
    },
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Fireflies returned an unparsable response body: {0}")]
    BadResponse(String),
    #[error("Response is empty for {0}")]
    EmptyResponse(String),
    #[error("Response for {context} is missing field `{field}`")]
    MissingField { context: String, field: String },
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

impl FirefliesError {
    /// Builds a typed error from the body of a failed response. Only the
    /// embedded error object is consulted; the HTTP status is ignored.
    pub fn from_error_body(body: &Value) -> Self {
        const DEFAULT_STATUS: u16 = 502;

        let errors = body
            .get("errors")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let (status, code, message) = match errors {
            [] => (DEFAULT_STATUS, String::new(), body.to_string()),
            [single] => {
                let extensions = single.get("extensions");
                let code = single
                    .get("code")
                    .or_else(|| extensions.and_then(|e| e.get("code")))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let status = extensions
                    .and_then(|e| e.get("status"))
                    .and_then(Value::as_u64)
                    .and_then(|s| u16::try_from(s).ok())
                    .unwrap_or(DEFAULT_STATUS);
                let message = single
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                (status, code, message)
            }
            many => (DEFAULT_STATUS, String::new(), Value::from(many.to_vec()).to_string()),
        };

        FirefliesError::Api {
            kind: ApiErrorKind::classify(status, &code),
            status,
            code,
            message,
        }
    }

    pub fn api_kind(&self) -> Option<ApiErrorKind> {
        match self {
            FirefliesError::Api { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn code(&self) -> &str {
        match self {
            FirefliesError::Api { code, .. } => code,
            FirefliesError::Timeout(_) => "timeout",
            FirefliesError::Connection(_) => "connection_error",
            FirefliesError::BadResponse(_) => "bad_response",
            FirefliesError::EmptyResponse(_) | FirefliesError::MissingField { .. } => {
                "data_integrity"
            }
            FirefliesError::Client(_) => "client_error",
        }
    }

    pub fn retry_policy(&self, policies: &RetryPolicies) -> Option<RetryPolicy> {
        match self {
            FirefliesError::Timeout(_)
            | FirefliesError::Api {
                kind: ApiErrorKind::RequestTimeout,
                ..
            } => Some(policies.timeout),
            FirefliesError::Connection(_)
            | FirefliesError::BadResponse(_)
            | FirefliesError::Api {
                kind: ApiErrorKind::Server | ApiErrorKind::RateLimited,
                ..
            } => Some(policies.transient),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FirefliesError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FirefliesError::Timeout(e.to_string())
        } else if e.is_decode() {
            FirefliesError::BadResponse(e.to_string())
        } else {
            FirefliesError::Connection(e.to_string())
        }
    }
}

/// The two retry classes of the transport.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicies {
    pub timeout: RetryPolicy,
    pub transient: RetryPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            timeout: RetryPolicy::new("timeout", 5, Duration::from_secs(2)),
            transient: RetryPolicy::new("transient", 4, Duration::from_secs(3)),
        }
    }
}

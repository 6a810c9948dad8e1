use thiserror::Error;

use crate::session::Activity;

/// Type alias for Result with GmailError
pub type Result<T> = std::result::Result<T, GmailError>;

/// Error types for the collection/cleanup engine
#[derive(Error, Debug)]
pub enum GmailError {
    /// Gmail API returned an error that fits no other class
    #[error("Gmail API error: {0}")]
    ApiError(String),

    /// Credentials expired, revoked or missing
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Rate limit exceeded - should retry after specified seconds
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    /// Network-related error (connection issues, timeouts, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Server returned 5xx error
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Resource not found (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden (403)
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// The external system answered with something we cannot interpret
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A scan or cleanup is already running
    #[error("{running} already in progress")]
    SessionConflict { running: Activity },

    /// Cleanup was requested without any domain
    #[error("No domains selected for cleanup")]
    EmptyDomainSelection,

    /// Request arguments failed validation
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl GmailError {
    /// Check if the error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GmailError::RateLimitExceeded { .. }
                | GmailError::ServerError { .. }
                | GmailError::NetworkError(_)
        )
    }

    /// Check if the error makes the whole in-flight operation pointless.
    ///
    /// Fatal errors abort a scan or cleanup; any other adapter error only
    /// affects the thread it was raised for.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GmailError::AuthError(_) | GmailError::Forbidden(_))
    }

    /// Check if the error was raised at the operation boundary (validation or
    /// single-flight) rather than by the mailbox
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            GmailError::SessionConflict { .. }
                | GmailError::EmptyDomainSelection
                | GmailError::InvalidRequest(_)
        )
    }
}

/// Parse the Retry-After header from an HTTP response
///
/// Accepts delay-seconds ("120") or an HTTP-date. Missing, invalid or past
/// values fall back to 5 seconds.
fn parse_retry_after_header<B>(response: &hyper::Response<B>) -> u64 {
    const DEFAULT_RETRY_AFTER: u64 = 5;

    let Some(value) = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
    else {
        return DEFAULT_RETRY_AFTER;
    };

    if let Ok(seconds) = value.parse::<u64>() {
        return seconds;
    }

    httpdate::parse_http_date(value)
        .ok()
        .and_then(|at| at.duration_since(std::time::SystemTime::now()).ok())
        .map(|wait| wait.as_secs())
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

impl From<google_gmail1::Error> for GmailError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status();
                let status_code = status.as_u16();
                let message = format!(
                    "HTTP {}: {}",
                    status_code,
                    status.canonical_reason().unwrap_or("Unknown")
                );

                match status_code {
                    429 => GmailError::RateLimitExceeded {
                        retry_after: parse_retry_after_header(response),
                    },
                    401 => GmailError::AuthError(message),
                    403 => GmailError::Forbidden(message),
                    404 => GmailError::NotFound(message),
                    400 => GmailError::BadRequest(message),
                    500..=599 => GmailError::ServerError {
                        status: status_code,
                        message,
                    },
                    _ => GmailError::ApiError(message),
                }
            }
            google_gmail1::Error::BadRequest(ref err) => GmailError::BadRequest(err.to_string()),
            google_gmail1::Error::MissingToken(ref err) => {
                GmailError::AuthError(format!("Missing access token: {}", err))
            }
            google_gmail1::Error::HttpError(ref err) => {
                GmailError::NetworkError(format!("Connection error: {}", err))
            }
            google_gmail1::Error::Io(err) => GmailError::NetworkError(err.to_string()),
            google_gmail1::Error::JsonDecodeError(body, err) => GmailError::InvalidResponse(
                format!("Could not decode response ({}): {}", err, body),
            ),
            _ => GmailError::ApiError(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(GmailError::RateLimitExceeded { retry_after: 5 }.is_transient());
        assert!(GmailError::ServerError {
            status: 503,
            message: "Service unavailable".to_string(),
        }
        .is_transient());
        assert!(GmailError::NetworkError("Connection timeout".to_string()).is_transient());
        assert!(!GmailError::NotFound("thread-1".to_string()).is_transient());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(GmailError::AuthError("token revoked".to_string()).is_fatal());
        assert!(GmailError::Forbidden("scope".to_string()).is_fatal());

        // Per-item failures never abort the whole run
        assert!(!GmailError::NotFound("thread-1".to_string()).is_fatal());
        assert!(!GmailError::RateLimitExceeded { retry_after: 1 }.is_fatal());
        assert!(!GmailError::BadRequest("bad id".to_string()).is_fatal());
    }

    #[test]
    fn test_rejections() {
        assert!(GmailError::EmptyDomainSelection.is_rejection());
        assert!(GmailError::SessionConflict {
            running: Activity::Scanning
        }
        .is_rejection());
        assert!(!GmailError::AuthError("x".to_string()).is_rejection());
    }

    #[test]
    fn test_local_io_error() {
        fn open_missing() -> Result<()> {
            std::fs::read("/nonexistent/gmail-domain-cleaner/config.toml")?;
            Ok(())
        }

        let err = open_missing().unwrap_err();
        assert!(matches!(err, GmailError::IoError(_)));
        assert!(!err.is_transient());
        assert!(!err.is_fatal());
        assert!(!err.is_rejection());
    }

    #[test]
    fn test_error_display() {
        let display = GmailError::RateLimitExceeded { retry_after: 10 }.to_string();
        assert!(display.contains("Rate limit exceeded"));
        assert!(display.contains("10 seconds"));

        let conflict = GmailError::SessionConflict {
            running: Activity::Scanning,
        };
        assert_eq!(conflict.to_string(), "collection already in progress");

        let conflict = GmailError::SessionConflict {
            running: Activity::CleaningUp,
        };
        assert_eq!(conflict.to_string(), "cleanup already in progress");
    }

    #[test]
    fn test_parse_retry_after_header_integer() {
        let mut response = hyper::Response::builder().status(429).body(()).unwrap();
        response
            .headers_mut()
            .insert("retry-after", hyper::header::HeaderValue::from_static("120"));

        assert_eq!(parse_retry_after_header(&response), 120);
    }

    #[test]
    fn test_parse_retry_after_header_missing() {
        let response = hyper::Response::builder().status(429).body(()).unwrap();
        assert_eq!(parse_retry_after_header(&response), 5);
    }

    #[test]
    fn test_parse_retry_after_header_invalid() {
        let mut response = hyper::Response::builder().status(429).body(()).unwrap();
        response.headers_mut().insert(
            "retry-after",
            hyper::header::HeaderValue::from_static("invalid"),
        );

        assert_eq!(parse_retry_after_header(&response), 5);
    }

    #[test]
    fn test_parse_retry_after_header_http_date() {
        let mut response = hyper::Response::builder().status(429).body(()).unwrap();
        let future_time = std::time::SystemTime::now() + std::time::Duration::from_secs(60);
        response.headers_mut().insert(
            "retry-after",
            hyper::header::HeaderValue::from_str(&httpdate::fmt_http_date(future_time)).unwrap(),
        );

        let retry_after = parse_retry_after_header(&response);
        assert!(
            (58..=61).contains(&retry_after),
            "Expected ~60, got {}",
            retry_after
        );
    }

    #[test]
    fn test_parse_retry_after_header_past_http_date() {
        let mut response = hyper::Response::builder().status(429).body(()).unwrap();
        let past_time = std::time::SystemTime::now() - std::time::Duration::from_secs(60);
        response.headers_mut().insert(
            "retry-after",
            hyper::header::HeaderValue::from_str(&httpdate::fmt_http_date(past_time)).unwrap(),
        );

        assert_eq!(parse_retry_after_header(&response), 5);
    }
}

//! Errors surfaced to the browser.

use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use thiserror::Error;

use crate::backend::ExchangeError;
use crate::bridge::TransferError;
use crate::interpret::Verdict;
use crate::render;
use protocol::CODE_AUTH_REQUIRED;

/// A request that cannot be answered with the page it asked for.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No session; send the browser to `location` to log in.
    #[error("authentication required")]
    AuthMissing { location: String },

    /// The backend rejected the session; send the browser to `location`.
    #[error("reauthentication required")]
    Reauthenticate { location: String },

    #[error("connection error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("failed: {code} {message}")]
    BackendFailure { code: i32, message: String },

    #[error("does not exist")]
    NotFound,

    #[error("error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::AuthMissing { .. } | GatewayError::Reauthenticate { .. } => StatusCode::FOUND,
            GatewayError::NotFound => StatusCode::NOT_FOUND,
            GatewayError::Exchange(_) | GatewayError::BackendFailure { .. } | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<Verdict> for GatewayError {
    /// Only meaningful for non-proceed verdicts; `Proceed` becomes an internal error.
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Reauthenticate { redirect } => GatewayError::Reauthenticate { location: redirect },
            Verdict::Fail { code, message } => GatewayError::BackendFailure { code, message },
            Verdict::Proceed => GatewayError::Internal("unexpected success verdict".to_string()),
        }
    }
}

impl From<TransferError> for GatewayError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Exchange(e) => GatewayError::Exchange(e),
            TransferError::Backend { code, message } => GatewayError::BackendFailure { code, message },
            TransferError::LateReauthentication => GatewayError::BackendFailure {
                code: CODE_AUTH_REQUIRED,
                message: err.to_string(),
            },
            TransferError::Footer(_) | TransferError::OutOfOrder { .. } => {
                GatewayError::Exchange(ExchangeError::ProtocolViolation(err.to_string()))
            }
            // the browser went away; nobody reads this
            TransferError::SinkClosed(_) => GatewayError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            GatewayError::AuthMissing { location } | GatewayError::Reauthenticate { location } => {
                found(&location)
            }
            other => {
                let status = other.status();
                if status.is_server_error() {
                    tracing::error!(error = %other, "Request failed");
                } else {
                    tracing::debug!(error = %other, "Request rejected");
                }
                (status, Html(render::error_page(status.as_u16(), &other.to_string()))).into_response()
            }
        }
    }
}

/// `302 Found` pointing at `location`.
pub fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statuses() {
        assert_eq!(GatewayError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            GatewayError::Exchange(ExchangeError::Timeout { step: "connect" }).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            GatewayError::AuthMissing {
                location: "/login".to_string()
            }
            .status(),
            StatusCode::FOUND
        );
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            GatewayError::BackendFailure {
                code: 3,
                message: "no such drive".to_string()
            }
            .to_string(),
            "failed: 3 no such drive"
        );
        assert_eq!(
            GatewayError::Exchange(ExchangeError::Connection("refused".to_string())).to_string(),
            "connection error: backend connection failed: refused"
        );
    }

    #[test]
    fn test_redirect_response() {
        let response = GatewayError::Reauthenticate {
            location: "/login?redirect=%2Fdrive%2F".to_string(),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/login?redirect=%2Fdrive%2F"
        );
    }

    #[test]
    fn test_verdict_conversion() {
        let err = GatewayError::from(Verdict::Fail {
            code: 2,
            message: "io".to_string(),
        });
        assert!(matches!(err, GatewayError::BackendFailure { code: 2, .. }));
    }

    #[test]
    fn test_transfer_errors_keep_their_category() {
        let footer = GatewayError::from(TransferError::Footer("disk read error".to_string()));
        assert!(matches!(
            footer,
            GatewayError::Exchange(ExchangeError::ProtocolViolation(_))
        ));
        assert!(footer.to_string().starts_with("connection error: "));
        assert!(footer.to_string().contains("disk read error"));

        let out_of_order = GatewayError::from(TransferError::OutOfOrder {
            action: "await_header",
            stage: crate::bridge::TransferStage::Done,
        });
        assert!(matches!(
            out_of_order,
            GatewayError::Exchange(ExchangeError::ProtocolViolation(_))
        ));

        let late = GatewayError::from(TransferError::LateReauthentication);
        assert!(matches!(
            late,
            GatewayError::BackendFailure {
                code: CODE_AUTH_REQUIRED,
                ..
            }
        ));
        assert_eq!(late.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let closed = GatewayError::from(TransferError::SinkClosed(std::io::Error::from(
            std::io::ErrorKind::BrokenPipe,
        )));
        assert!(matches!(closed, GatewayError::Internal(_)));
    }
}

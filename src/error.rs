use bytes::Bytes;
use http::StatusCode;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("The \"authorization\" header is missing or malformed.")]
    MalformedAuthorization(#[source] Option<BoxError>),

    #[error("Malformed body")]
    Body(#[source] BoxError),

    #[error("A \"digest\" header must be present when an HTTP body is present.")]
    MissingDigest,

    #[error("The \"digest\" header value does not match digest of body.")]
    DigestMismatch,

    #[error("{0}")]
    BadExpectedValues(String),

    #[error("HTTP method \"{0}\" has no default capability action.")]
    UnsupportedMethod(http::Method),

    #[error("A root capability cannot be revoked.")]
    RootNotRevocable,

    #[error("The provided capability delegation is invalid.")]
    InvalidDelegation(#[source] Option<BoxError>),

    #[error("The provided capability delegation does not delegate from this service object.")]
    UnrelatedServiceObject,

    #[error("Forbidden.")]
    NotAuthorized(#[source] Option<BoxError>),

    #[error("Revocation handlers must be mounted at a route ending in \"/revocations/<revocationId>\".")]
    Misconfigured,
}

impl Error {
    #[track_caller]
    pub(crate) fn body(err: impl Into<BoxError>) -> Self {
        Self::Body(err.into())
    }

    #[track_caller]
    pub(crate) fn malformed_authorization(err: impl Into<BoxError>) -> Self {
        Self::MalformedAuthorization(Some(err.into()))
    }

    #[track_caller]
    pub(crate) fn not_authorized(err: impl Into<BoxError>) -> Self {
        Self::NotAuthorized(Some(err.into()))
    }

    #[track_caller]
    pub(crate) fn invalid_delegation(err: impl Into<BoxError>) -> Self {
        Self::InvalidDelegation(Some(err.into()))
    }

    /// HTTP status this error surfaces as
    ///
    /// Client mistakes are 400, failed authorization is 403 and host
    /// programming errors are 500.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MalformedAuthorization(..)
            | Self::Body(..)
            | Self::MissingDigest
            | Self::DigestMismatch
            | Self::UnsupportedMethod(..)
            | Self::RootNotRevocable
            | Self::InvalidDelegation(..) => StatusCode::BAD_REQUEST,
            Self::UnrelatedServiceObject | Self::NotAuthorized(..) => StatusCode::FORBIDDEN,
            Self::BadExpectedValues(..) | Self::Misconfigured => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Wire-visible error name, written into the response body
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::MalformedAuthorization(..)
            | Self::Body(..)
            | Self::MissingDigest
            | Self::DigestMismatch
            | Self::InvalidDelegation(..) => "DataError",
            Self::UnsupportedMethod(..) => "NotSupportedError",
            Self::RootNotRevocable | Self::UnrelatedServiceObject | Self::NotAuthorized(..) => {
                "NotAllowedError"
            }
            Self::BadExpectedValues(..) | Self::Misconfigured => "OperationError",
        }
    }

    /// Render the error as an HTTP response with a `{"name", "message"}` body
    ///
    /// Underlying causes are deliberately not serialized; they are reachable
    /// through [`std::error::Error::source`] for logging on the host side.
    #[must_use]
    pub fn into_response(self) -> http::Response<Bytes> {
        let body = serde_json::json!({
            "name": self.name(),
            "message": self.to_string(),
        });

        http::Response::builder()
            .status(self.status())
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Bytes::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }
}

macro_rules! ensure {
    ($cond:expr, $err:expr) => {{
        if !{ $cond } {
            return Err($err);
        }
    }};
}
pub(crate) use ensure;

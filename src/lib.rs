//!
//! Authorization Capability (zcap) checkpoint for signed HTTP requests
//!
//! `sekisho` decides whether an incoming HTTP request is authorized by a
//! valid capability invocation. For dedicated revocation endpoints it also
//! decides whether a submitted capability delegation may be accepted for
//! revocation.
//!
//! The crate is framework-agnostic: it consumes [`http`] types plus a
//! buffered [`Bytes`] body and hands back either a verification result or an
//! error that knows its HTTP status. Cryptographic proof suites, document
//! loading (JSON-LD contexts, DID documents, stored capabilities) and root
//! controller lookup are supplied by the host through the traits in
//! [`chain`], [`loader`], [`expected`] and [`invocation`].
//!
//! The entry points live in [`pipeline`]: [`pipeline::authorize`] for plain
//! invocations and [`pipeline::authorize_revocation`] for the opinionated
//! `…/revocations/<id>` flow.
//!

#[macro_use]
extern crate tracing;

use self::error::{BoxError, Error};
use http_body_util::BodyExt;
use time::Duration;

pub mod capability;
pub mod chain;
pub mod delegation;
pub mod digest;
pub mod error;
pub mod expected;
pub mod header;
pub mod invocation;
pub mod loader;
pub mod pipeline;
pub mod signature_string;

pub use self::capability::{Capability, OneOrMany, Proof};
pub use self::invocation::InvocationAuthorization;
pub use self::pipeline::{
    authorize, authorize_revocation, Impls, RevocationAuthorization, RevocationImpls,
};

/// A request with its body fully buffered
///
/// Wraps [`http::request::Parts`] plus the collected body bytes. When the
/// headers don't announce a body (`content-length`/`transfer-encoding`), any
/// pre-populated buffer is dropped so nothing downstream consumes it by
/// accident.
pub struct Request {
    parts: http::request::Parts,
    body: bytes::Bytes,
}

impl Request {
    #[inline]
    #[instrument(skip_all)]
    pub async fn read_from<B>(req: http::Request<B>) -> Result<Self, Error>
    where
        B: http_body::Body,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();
        let body = body.collect().await.map_err(Error::body)?.to_bytes();

        Ok(Self::from_parts(parts, body))
    }

    #[must_use]
    pub fn from_parts(parts: http::request::Parts, body: bytes::Bytes) -> Self {
        let body = if crate::digest::has_body(&parts) {
            body
        } else {
            bytes::Bytes::new()
        };

        Self { parts, body }
    }

    #[inline]
    #[must_use]
    pub fn parts(&self) -> &http::request::Parts {
        &self.parts
    }

    #[inline]
    #[must_use]
    pub fn body(&self) -> &bytes::Bytes {
        &self.body
    }

    #[inline]
    #[must_use]
    pub fn method(&self) -> &http::Method {
        &self.parts.method
    }

    #[inline]
    #[must_use]
    pub fn uri(&self) -> &http::Uri {
        &self.parts.uri
    }

    #[inline]
    #[must_use]
    pub fn headers(&self) -> &http::HeaderMap {
        &self.parts.headers
    }

    /// Value of `name` as a string slice, if the header is present and UTF-8
    pub(crate) fn header_str(&self, name: &http::HeaderName) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Request authority, read from the `host` header with the URI authority
    /// as fallback (HTTP/2 requests carry `:authority` instead)
    pub(crate) fn host(&self) -> Option<&str> {
        self.header_str(&http::header::HOST)
            .or_else(|| self.parts.uri.authority().map(|auth| auth.as_str()))
    }
}

/// Policy bounds applied while verifying a delegation chain
#[derive(Clone, Debug)]
pub struct Policy {
    /// Maximum number of capabilities in a chain, root included
    pub max_chain_length: usize,

    /// Maximum time between a delegation proof's `created` and the
    /// capability's `expires`
    pub max_delegation_ttl: Duration,

    /// Tolerated clock skew for every timestamp comparison
    pub max_clock_skew: Duration,

    /// Whether a child capability may attenuate its parent's invocation
    /// target by hierarchical path suffixing
    pub allow_target_attenuation: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_chain_length: 10,
            max_delegation_ttl: Duration::days(90),
            max_clock_skew: Duration::seconds(300),
            allow_target_attenuation: false,
        }
    }
}

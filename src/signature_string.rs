use crate::{
    error::{Error, Result},
    header::AuthorizationHeader,
    Request,
};
use std::fmt::Write;

const REQUIRED_COVERED: &[&str] = &[
    "(created)",
    "(expires)",
    "(request-target)",
    "host",
    "capability-invocation",
];
const REQUIRED_BODY_COVERED: &[&str] = &["content-type", "digest"];

#[inline]
fn is_subset<I>(left: &[I], right: &[I]) -> bool
where
    I: PartialEq,
{
    if left.len() <= right.len() {
        left.iter().all(|item| right.contains(item))
    } else {
        false
    }
}

/// Construct the canonical signing string for `req`
///
/// Covers the headers named by the signature in order, expanding the
/// `(request-target)`, `(created)` and `(expires)` pseudo-headers. The
/// signature must cover at least `(created)`, `(expires)`,
/// `(request-target)`, `host` and `capability-invocation`, plus
/// `content-type` and `digest` when the request has a body.
pub fn construct(req: &Request, header: &AuthorizationHeader<'_>) -> Result<String> {
    let fulfills_min_requirements = is_subset(REQUIRED_COVERED, &header.headers)
        && (!crate::digest::has_body(req.parts())
            || is_subset(REQUIRED_BODY_COVERED, &header.headers));

    if !fulfills_min_requirements {
        debug!(covered = ?header.headers, "signature does not cover the required headers");
        return Err(Error::not_authorized(
            "signature does not cover the required headers",
        ));
    }

    let mut signature_string = String::new();
    for name in &header.headers {
        match *name {
            name @ "(request-target)" => {
                let method = req.method().as_str().to_lowercase();
                let path_and_query = req
                    .uri()
                    .path_and_query()
                    .map_or_else(|| req.uri().path(), |path_and_query| path_and_query.as_str());

                let _ = writeln!(signature_string, "{name}: {method} {path_and_query}");
            }
            name @ "(created)" => {
                let created = header
                    .created
                    .ok_or_else(|| Error::not_authorized("signature covers (created) without a created parameter"))?;
                let _ = writeln!(signature_string, "{name}: {created}");
            }
            name @ "(expires)" => {
                let expires = header
                    .expires
                    .ok_or_else(|| Error::not_authorized("signature covers (expires) without an expires parameter"))?;
                let _ = writeln!(signature_string, "{name}: {expires}");
            }
            header_name => {
                let value = req
                    .headers()
                    .get(header_name)
                    .ok_or_else(|| Error::not_authorized("signature covers a missing header"))?
                    .to_str()
                    .map_err(Error::not_authorized)?;

                let _ = writeln!(signature_string, "{}: {}", header_name.to_lowercase(), value);
            }
        }
    }

    signature_string.shrink_to_fit();

    Ok(signature_string)
}

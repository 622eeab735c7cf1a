use crate::{
    error::{Error, Result},
    Request,
};
use base64_simd::STANDARD as BASE64;
use sha2::{Digest, Sha256, Sha512};
use strum::{AsRefStr, EnumString};

static DIGEST_HEADER_NAME: http::HeaderName = http::HeaderName::from_static("digest");

#[derive(AsRefStr, Clone, Copy, Default, EnumString)]
#[strum(ascii_case_insensitive)]
#[non_exhaustive]
pub enum Algorithm {
    #[default]
    #[strum(serialize = "sha-256", serialize = "id-sha-256")]
    Sha256,

    #[strum(serialize = "sha-512", serialize = "id-sha-512")]
    Sha512,
}

impl Algorithm {
    #[must_use]
    pub fn digest(&self, data: impl AsRef<[u8]>) -> Vec<u8> {
        match self {
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

/// Whether the request headers announce a body
///
/// Only `content-length` and `transfer-encoding` count. `content-type` alone
/// does not; server-side body parsers tend to set empty bodies spuriously.
#[must_use]
pub fn has_body(parts: &http::request::Parts) -> bool {
    parts.headers.contains_key(http::header::CONTENT_LENGTH)
        || parts.headers.contains_key(http::header::TRANSFER_ENCODING)
}

/// Build a `digest` header value for `body`
#[must_use]
pub fn header_value(algorithm: Algorithm, body: impl AsRef<[u8]>) -> String {
    format!(
        "{}={}",
        algorithm.as_ref(),
        BASE64.encode_to_string(algorithm.digest(body))
    )
}

/// Validate the `digest` header against the received body bytes
///
/// A request that announces a body must carry a `digest` header, and the
/// decoded digest must match the body byte-for-byte. Requests without a body
/// pass through untouched.
#[instrument(skip_all)]
pub fn verify(req: &Request) -> Result<()> {
    if !has_body(req.parts()) {
        return Ok(());
    }

    let raw = req
        .header_str(&DIGEST_HEADER_NAME)
        .ok_or(Error::MissingDigest)?;

    // The header may list multiple digests; the first one under a recognized
    // algorithm is authoritative
    for entry in raw.split(',') {
        let Some((name, value)) = entry.trim().split_once('=') else {
            continue;
        };
        let Ok(algorithm) = name.parse::<Algorithm>() else {
            continue;
        };

        let Ok(claimed) = BASE64.decode_to_vec(value) else {
            debug!(%name, "digest header value is not valid base64");
            return Err(Error::DigestMismatch);
        };

        if claimed == algorithm.digest(req.body()) {
            return Ok(());
        }

        debug!(%name, "digest header does not match body");
        return Err(Error::DigestMismatch);
    }

    debug!("digest header carries no recognized algorithm");
    Err(Error::DigestMismatch)
}

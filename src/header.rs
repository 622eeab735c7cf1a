use crate::{
    error::{Error, Result},
    Request,
};
use base64_simd::STANDARD as BASE64;
use logos::{Lexer, Logos, Span};
use memchr::memchr;
use std::fmt::Write;

static CAPABILITY_INVOCATION: http::HeaderName =
    http::HeaderName::from_static("capability-invocation");

#[derive(Debug, Logos)]
#[logos(skip r"[ \t]+")]
enum TokenTy {
    #[regex(r"[\w.:+/-]+")]
    Bare,

    #[token("=")]
    Equals,

    #[regex(r#""[^"]*""#)]
    Quoted,

    #[token(",")]
    Comma,
}

#[derive(Debug)]
struct Token {
    pub ty: TokenTy,
    pub span: Span,
}

impl Token {
    pub fn parse(input: &str) -> impl Iterator<Item = Result<Token, ()>> + '_ {
        Lexer::<'_, TokenTy>::new(input)
            .spanned()
            .map(|(ty, span)| ty.map(|ty| Token { ty, span }))
    }
}

macro_rules! expect {
    ($self:expr, $value:expr, $pattern:pat) => {{
        let Ok(value) = $value else {
            $self.is_broken = true;
            return Some(Err(()));
        };

        if !matches!(value.ty, $pattern) {
            $self.is_broken = true;
            return Some(Err(()));
        }

        value
    }};
}

struct ParseIter<'a, I> {
    /// Stream of tokens wrapped into a result
    inner: I,

    /// Reference to the original input that was fed to the lexer
    input: &'a str,

    /// Marker whether we encountered any error or illegal token
    ///
    /// If we did, the iterator will stop yielding any results
    is_broken: bool,
}

impl<'a, I> Iterator for ParseIter<'a, I>
where
    I: Iterator<Item = Result<Token, ()>>,
{
    type Item = Result<(&'a str, &'a str), ()>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_broken {
            return None;
        }

        let key = expect!(self, self.inner.next()?, TokenTy::Bare);
        expect!(self, self.inner.next()?, TokenTy::Equals);

        // Integer parameters (`created`, `expires`) are commonly sent unquoted
        let value = expect!(self, self.inner.next()?, TokenTy::Bare | TokenTy::Quoted);

        if let Some(next) = self.inner.next() {
            expect!(self, next, TokenTy::Comma);
        }

        let key = &self.input[key.span];
        let value = self.input[value.span].trim_matches('"');

        Some(Ok((key, value)))
    }
}

fn parse_params(input: &str) -> impl Iterator<Item = Result<(&str, &str), ()>> {
    ParseIter {
        inner: Token::parse(input),
        input,
        is_broken: false,
    }
}

/// Split an `<scheme> <params>` header value, matching the scheme
/// case-insensitively
fn split_scheme<'a>(raw: &'a str, scheme: &str) -> Option<&'a str> {
    let space = memchr(b' ', raw.as_bytes())?;
    let (found, params) = raw.split_at(space);

    found
        .eq_ignore_ascii_case(scheme)
        .then(|| params.trim_start())
}

/// Parsed `authorization` header of the HTTP-Signature scheme
///
/// Purely syntactic; no cryptographic work happens here.
#[derive(Debug)]
pub struct AuthorizationHeader<'a> {
    /// Identifier of the key the request was signed with
    pub key_id: &'a str,

    /// Header names covered by the signature, in signing order
    pub headers: Vec<&'a str>,

    /// Decoded signature bytes
    pub signature: Vec<u8>,

    /// Unix timestamp in seconds when the signature was created
    pub created: Option<u64>,

    /// Unix timestamp in seconds when the signature expires
    pub expires: Option<u64>,
}

impl<'a> AuthorizationHeader<'a> {
    /// Parse the `authorization` header of `req`
    ///
    /// Fails when the header is missing, carries a scheme other than
    /// `Signature`, or has unparseable parameters.
    pub fn parse_from(req: &'a Request) -> Result<Self> {
        let raw = req
            .header_str(&http::header::AUTHORIZATION)
            .ok_or(Error::MalformedAuthorization(None))?;

        let params = split_scheme(raw, "signature").ok_or(Error::MalformedAuthorization(None))?;
        Self::parse(params)
    }

    /// Parse the parameter list after the `Signature ` scheme tag
    pub fn parse(input: &str) -> Result<AuthorizationHeader<'_>> {
        let mut key_id = None;
        let mut signature = None;
        let mut headers = None;
        let mut created = None;
        let mut expires = None;

        for kv in parse_params(input) {
            let (key, value) = kv.map_err(|()| Error::MalformedAuthorization(None))?;

            match key {
                "algorithm" => {
                    // Discarded. The algorithm is determined by the resolved
                    // verification key, not by what the client claims.
                }
                "keyId" => key_id = Some(value),
                "signature" => {
                    signature = Some(
                        BASE64
                            .decode_to_vec(value)
                            .map_err(Error::malformed_authorization)?,
                    );
                }
                "headers" => headers = Some(value.split_whitespace().collect()),
                "created" => {
                    created = Some(value.parse().map_err(Error::malformed_authorization)?);
                }
                "expires" => {
                    expires = Some(value.parse().map_err(Error::malformed_authorization)?);
                }
                _ => return Err(Error::MalformedAuthorization(None)),
            }
        }

        Ok(AuthorizationHeader {
            key_id: key_id.ok_or(Error::MalformedAuthorization(None))?,
            signature: signature.ok_or(Error::MalformedAuthorization(None))?,
            headers: headers.unwrap_or_else(|| vec!["(created)"]),
            created,
            expires,
        })
    }
}

/// Serialise signature parameters into an `authorization` header value
///
/// Client-side companion to [`AuthorizationHeader::parse_from`]; mainly
/// useful for building test traffic and reference clients.
#[must_use]
pub fn serialise<'a, I>(
    key_id: &str,
    headers: I,
    signature: &[u8],
    created: Option<u64>,
    expires: Option<u64>,
) -> String
where
    I: Iterator<Item = &'a str>,
{
    let mut buffer = String::from("Signature ");

    let _ = write!(buffer, "keyId=\"{key_id}\"");

    buffer.push_str(",headers=\"");
    for item in itertools::intersperse(headers, " ") {
        buffer.push_str(item);
    }
    buffer.push('"');

    let _ = write!(buffer, ",signature=\"{}\"", BASE64.encode_to_string(signature));

    if let Some(created) = created {
        let _ = write!(buffer, ",created={created}");
    }

    if let Some(expires) = expires {
        let _ = write!(buffer, ",expires={expires}");
    }

    buffer
}

/// Parsed `capability-invocation` header
#[derive(Debug)]
pub struct CapabilityInvocation<'a> {
    /// Identifier of the invoked capability
    pub capability: &'a str,

    /// Action the client asks to perform
    pub action: Option<&'a str>,
}

impl<'a> CapabilityInvocation<'a> {
    pub fn parse_from(req: &'a Request) -> Result<Self> {
        let raw = req
            .header_str(&CAPABILITY_INVOCATION)
            .ok_or_else(|| Error::not_authorized("missing \"capability-invocation\" header"))?;

        let params = split_scheme(raw, "zcap")
            .ok_or_else(|| Error::not_authorized("\"capability-invocation\" header is not of the zcap scheme"))?;

        let mut capability = None;
        let mut action = None;

        // The header may carry parameters minted by other tooling; unknown
        // keys pass through instead of poisoning the parse
        for kv in parse_params(params) {
            let (key, value) =
                kv.map_err(|()| Error::not_authorized("malformed \"capability-invocation\" header"))?;

            match key {
                "capability" | "id" => capability = Some(value),
                "action" => action = Some(value),
                _ => continue,
            }
        }

        Ok(Self {
            capability: capability.ok_or_else(|| {
                Error::not_authorized("\"capability-invocation\" header names no capability")
            })?,
            action,
        })
    }
}

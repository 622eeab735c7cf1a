use crate::{
    capability,
    error::{BoxError, Error, Result},
    Request,
};
use indexmap::IndexSet;
use serde_json::Value;
use std::future::Future;
use url::Url;

/// Host callback resolving the values verification must enforce
///
/// Returns loosely-typed JSON on purpose: the shape is validated here, and a
/// misshaped return is reported as a host programming error (HTTP 500)
/// instead of a client failure.
pub trait ExpectedValuesResolver {
    fn expected_values(
        &self,
        req: &Request,
    ) -> impl Future<Output = Result<Value, BoxError>> + Send;
}

/// Validated expected values plus the derived root capability identifiers
#[derive(Debug)]
pub struct Expected {
    pub host: String,
    pub action: String,
    pub target: String,
    pub root_ids: IndexSet<String>,
}

/// Default capability action for an HTTP method
pub(crate) fn default_action(method: &http::Method) -> Result<&'static str> {
    match *method {
        http::Method::GET | http::Method::HEAD | http::Method::OPTIONS => Ok("read"),
        http::Method::POST
        | http::Method::PUT
        | http::Method::PATCH
        | http::Method::DELETE
        | http::Method::CONNECT
        | http::Method::TRACE => Ok("write"),
        ref method => Err(Error::UnsupportedMethod(method.clone())),
    }
}

fn is_absolute(uri: &str) -> bool {
    Url::parse(uri).is_ok()
}

/// Default invocation target: the absolute URL of the request
pub(crate) fn default_target(host: &str, req: &Request) -> String {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map_or_else(|| req.uri().path(), |paq| paq.as_str());

    format!("https://{host}{path_and_query}")
}

/// Invoke the host resolver and validate its return
#[instrument(skip_all)]
pub(crate) async fn resolve<EV>(req: &Request, resolver: &EV) -> Result<Expected>
where
    EV: ExpectedValuesResolver + Sync,
{
    let value = resolver.expected_values(req).await.map_err(|err| {
        Error::BadExpectedValues(format!("\"getExpectedValues\" failed: {err}"))
    })?;

    let Value::Object(map) = value else {
        return Err(Error::BadExpectedValues(
            "\"getExpectedValues\" must return an object.".into(),
        ));
    };

    let host = map
        .get("host")
        .and_then(Value::as_str)
        .filter(|host| !host.is_empty())
        .ok_or_else(|| {
            Error::BadExpectedValues("\"expected.host\" must be a non-empty string.".into())
        })?
        .to_owned();

    let root_targets: Vec<String> = match map.get("rootInvocationTarget") {
        Some(Value::String(target)) => vec![target.clone()],
        Some(Value::Array(targets)) if !targets.is_empty() => targets
            .iter()
            .map(|target| target.as_str().map(ToOwned::to_owned))
            .collect::<Option<_>>()
            .ok_or_else(root_target_error)?,
        _ => return Err(root_target_error()),
    };

    if !root_targets.iter().all(|target| is_absolute(target)) {
        return Err(root_target_error());
    }

    let action = match map.get("action") {
        None => default_action(req.method())?.to_owned(),
        Some(Value::String(action)) if !action.is_empty() => action.clone(),
        Some(..) => {
            return Err(Error::BadExpectedValues(
                "\"expected.action\" must be a non-empty string.".into(),
            ));
        }
    };

    let target = match map.get("target") {
        None => default_target(&host, req),
        Some(Value::String(target)) if is_absolute(target) => target.clone(),
        Some(..) => {
            return Err(Error::BadExpectedValues(
                "\"expected.target\" must be an absolute URI.".into(),
            ));
        }
    };

    let root_ids = root_targets
        .iter()
        .map(|target| capability::root_capability_id(target))
        .collect();

    Ok(Expected {
        host,
        action,
        target,
        root_ids,
    })
}

fn root_target_error() -> Error {
    Error::BadExpectedValues(
        "\"expected.rootInvocationTarget\" must be an absolute URI or a non-empty array of absolute URIs."
            .into(),
    )
}

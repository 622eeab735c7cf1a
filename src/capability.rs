use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// JSON-LD context every synthesized root capability carries
pub const ZCAP_CONTEXT: &str = "https://w3id.org/zcap/v1";

/// Identifier prefix of root capabilities
pub const ROOT_CAPABILITY_PREFIX: &str = "urn:zcap:root:";

/// One value or a list of values
///
/// Capability documents express `controller`, `allowedAction` and `proof`
/// either as a single entry or as an array. Keeping the distinction in a sum
/// type avoids runtime shape checks at every use site.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        match self {
            Self::One(item) => std::slice::from_ref(item),
            Self::Many(items) => items,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Many(items) if items.is_empty())
    }
}

impl<T> From<T> for OneOrMany<T> {
    #[inline]
    fn from(value: T) -> Self {
        Self::One(value)
    }
}

impl<T> From<Vec<T>> for OneOrMany<T> {
    #[inline]
    fn from(value: Vec<T>) -> Self {
        Self::Many(value)
    }
}

impl<'a, T> IntoIterator for &'a OneOrMany<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Invocation target of a capability, either a bare URI or an object form
/// with an `id` field
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InvocationTarget {
    Uri(String),
    Object {
        id: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
}

impl InvocationTarget {
    #[inline]
    #[must_use]
    pub fn uri(&self) -> &str {
        match self {
            Self::Uri(uri) => uri,
            Self::Object { id, .. } => id,
        }
    }
}

/// An Authorization Capability document
///
/// Fields this crate doesn't interpret are preserved in `extra` so the
/// document round-trips through verification unchanged.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    #[serde(rename = "@context", skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,

    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation_target: Option<InvocationTarget>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller: Option<OneOrMany<String>>,

    /// Legacy alias for `controller` on invocation-capable capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoker: Option<String>,

    /// Legacy alias for `controller` on delegation-capable capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegator: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_capability: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_action: Option<OneOrMany<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<OneOrMany<Proof>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Capability {
    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.id.starts_with(ROOT_CAPABILITY_PREFIX)
    }

    #[inline]
    #[must_use]
    pub fn invocation_target(&self) -> Option<&str> {
        self.invocation_target.as_ref().map(InvocationTarget::uri)
    }

    /// All identifiers allowed to act for this capability
    ///
    /// `controller` wins; the legacy `invoker`/`delegator` fields are the
    /// fallback for older documents.
    #[must_use]
    pub fn controllers(&self) -> Vec<&str> {
        if let Some(controller) = &self.controller {
            return controller.iter().map(String::as_str).collect();
        }

        self.invoker
            .as_deref()
            .into_iter()
            .chain(self.delegator.as_deref())
            .collect()
    }

    /// Delegation proofs attached to this capability
    pub fn delegation_proofs(&self) -> impl Iterator<Item = &Proof> {
        self.proof
            .iter()
            .flat_map(OneOrMany::iter)
            .filter(|proof| proof.proof_purpose.as_deref() == Some("capabilityDelegation"))
    }

    /// Whether this capability grants `action`
    ///
    /// A capability without an `allowedAction` restriction grants any action
    /// to its controller.
    #[must_use]
    pub fn allows_action(&self, action: &str) -> bool {
        match &self.allowed_action {
            None => true,
            Some(allowed) => allowed.iter().any(|allowed| allowed == action),
        }
    }

    pub fn expires_at(&self) -> Option<Result<OffsetDateTime, time::error::Parse>> {
        self.expires
            .as_deref()
            .map(|raw| OffsetDateTime::parse(raw, &Rfc3339))
    }
}

/// Cryptographic proof section of a delegated capability
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_method: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_purpose: Option<String>,

    /// Parent capability references, root-first
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability_chain: Option<Vec<Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_value: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Proof {
    pub fn created_at(&self) -> Option<Result<OffsetDateTime, time::error::Parse>> {
        self.created
            .as_deref()
            .map(|raw| OffsetDateTime::parse(raw, &Rfc3339))
    }
}

/// Derive the root capability identifier for an invocation target
#[inline]
#[must_use]
pub fn root_capability_id(invocation_target: &str) -> String {
    format!(
        "{ROOT_CAPABILITY_PREFIX}{}",
        urlencoding::encode(invocation_target)
    )
}

/// Recover the invocation target encoded into a root capability identifier
pub fn root_invocation_target(capability_id: &str) -> Option<Cow<'_, str>> {
    let encoded = capability_id.strip_prefix(ROOT_CAPABILITY_PREFIX)?;
    urlencoding::decode(encoded).ok()
}

use crate::{
    capability::{Capability, OneOrMany, Proof},
    error::BoxError,
    loader::{DocumentLoader, RootCapabilityLoader, RootControllerResolver},
    Policy, Request,
};
use indexmap::IndexSet;
use serde_json::Value;
use std::future::Future;
use time::OffsetDateTime;

/// Outcome of a successfully verified delegation proof
pub struct VerifiedProof {
    /// Verification method document the proof verified under
    pub verification_method: Value,
}

impl VerifiedProof {
    /// Identifier that signed: the method's controller, falling back to the
    /// key id up to its fragment
    #[must_use]
    pub fn signer(&self) -> Option<&str> {
        signer_of(&self.verification_method)
    }
}

/// Identifier acting for a verification method document
pub(crate) fn signer_of(verification_method: &Value) -> Option<&str> {
    verification_method
        .get("controller")
        .and_then(Value::as_str)
        .or_else(|| {
            verification_method
                .get("id")
                .and_then(Value::as_str)
                .and_then(|id| id.split('#').next())
        })
}

/// A cryptographic proof suite, supplied by the host
///
/// Suites own canonicalization and signature verification of capability
/// delegation proofs; this crate never interprets proof bytes itself.
pub trait ProofSuite {
    fn verify_proof<L>(
        &self,
        document: &Value,
        proof: &Proof,
        loader: &L,
    ) -> impl Future<Output = Result<VerifiedProof, BoxError>> + Send
    where
        L: DocumentLoader + Sync;
}

/// Per-request factory for the proof suite set
pub trait SuiteFactory {
    type Suite: ProofSuite + Sync;

    fn suites(
        &self,
        req: &Request,
    ) -> impl Future<Output = Result<OneOrMany<Self::Suite>, BoxError>> + Send;
}

/// Optional host hook invoked with the dereferenced chain, root-first
///
/// Returning an error vetoes the chain. Hosts use this to reject revoked
/// capabilities.
pub trait ChainInspector {
    fn inspect_chain(
        &self,
        chain: &[Capability],
    ) -> impl Future<Output = Result<(), BoxError>> + Send;
}

impl ChainInspector for () {
    fn inspect_chain(
        &self,
        _chain: &[Capability],
    ) -> impl Future<Output = Result<(), BoxError>> + Send {
        std::future::ready(Ok(()))
    }
}

/// What the root of a verified chain must satisfy
pub(crate) enum RootExpectation<'a> {
    /// The root's identifier must be one of these
    Ids(&'a IndexSet<String>),

    /// The root's invocation target must equal this service object or sit
    /// under it path-wise
    ServicePrefix(&'a str),
}

pub(crate) enum ChainError {
    /// The chain roots outside the expected service object
    UnrelatedRoot,

    Invalid(BoxError),
}

impl ChainError {
    #[track_caller]
    fn invalid(err: impl Into<BoxError>) -> Self {
        Self::Invalid(err.into())
    }
}

pub(crate) struct ChainVerification {
    /// Dereferenced chain, root-first
    pub chain: Vec<Capability>,

    /// Verified signer of the leaf capability's delegation proof; `None`
    /// when the leaf is a root capability
    pub last_signer: Option<String>,
}

/// `target` equals `base` or is attenuated from it by hierarchical path
/// suffixing
pub(crate) fn is_hierarchical_suffix(target: &str, base: &str) -> bool {
    target
        .strip_prefix(base)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Walk `invoked` root-ward and verify the delegation chain
///
/// Every controller encountered along the way is appended to `controllers`
/// in insertion order, so callers that need the transitive controller set
/// don't pay for a second walk.
#[allow(clippy::too_many_arguments)]
#[instrument(skip_all, fields(invoked = %invoked.id))]
pub(crate) async fn verify_chain<L, R, S, CI>(
    invoked: Capability,
    expectation: RootExpectation<'_>,
    loader: &RootCapabilityLoader<'_, L, R>,
    suites: &[S],
    inspector: Option<&CI>,
    policy: &Policy,
    now: OffsetDateTime,
    controllers: &mut IndexSet<String>,
) -> Result<ChainVerification, ChainError>
where
    L: DocumentLoader + Sync,
    R: RootControllerResolver + Sync,
    S: ProofSuite + Sync,
    CI: ChainInspector + Sync,
{
    let mut seen: IndexSet<String> = IndexSet::new();
    seen.insert(invoked.id.clone());

    let mut chain = vec![invoked];
    let mut last_signer = None;

    while !chain.last().unwrap().is_root() {
        if chain.len() >= policy.max_chain_length {
            return Err(ChainError::invalid(
                "delegation chain exceeds the maximum chain length",
            ));
        }

        let parent = {
            let current = chain.last().unwrap();

            let parent_ref = current
                .parent_capability
                .clone()
                .ok_or_else(|| ChainError::invalid("non-root capability without a parent"))?;

            if !seen.insert(parent_ref.clone()) {
                return Err(ChainError::invalid("delegation chain contains a cycle"));
            }

            let parent = loader
                .load_capability(&parent_ref)
                .await
                .map_err(ChainError::Invalid)?;

            if parent.id != parent_ref {
                return Err(ChainError::invalid(
                    "dereferenced capability id differs from its reference",
                ));
            }

            let signer = verify_delegation(current, &parent, suites, loader, policy, now).await?;
            if last_signer.is_none() {
                last_signer = Some(signer);
            }

            check_attenuation(current, &parent, policy)?;

            parent
        };

        chain.push(parent);
    }

    let root = chain.last().unwrap();
    match expectation {
        RootExpectation::Ids(ids) => {
            if !ids.contains(&root.id) {
                debug!(root = %root.id, "root capability is not an expected root");
                return Err(ChainError::invalid("root capability is not an expected root"));
            }
        }
        RootExpectation::ServicePrefix(service_object_id) => {
            let target = root
                .invocation_target()
                .ok_or_else(|| ChainError::invalid("root capability without an invocation target"))?;

            if !is_hierarchical_suffix(target, service_object_id) {
                return Err(ChainError::UnrelatedRoot);
            }
        }
    }

    chain.reverse();

    for capability in &chain {
        for controller in capability.controllers() {
            controllers.insert(controller.to_owned());
        }
    }

    if let Some(inspector) = inspector {
        inspector
            .inspect_chain(&chain)
            .await
            .map_err(ChainError::Invalid)?;
    }

    Ok(ChainVerification { chain, last_signer })
}

/// Verify the delegation proof binding `current` to `parent`
///
/// Returns the verified signer identifier.
async fn verify_delegation<L, R, S>(
    current: &Capability,
    parent: &Capability,
    suites: &[S],
    loader: &RootCapabilityLoader<'_, L, R>,
    policy: &Policy,
    now: OffsetDateTime,
) -> Result<String, ChainError>
where
    L: DocumentLoader + Sync,
    R: RootControllerResolver + Sync,
    S: ProofSuite + Sync,
{
    let expires = current
        .expires_at()
        .ok_or_else(|| ChainError::invalid("delegated capability without an expiry"))?
        .map_err(|err| ChainError::invalid(format!("unparsable capability expiry: {err}")))?;

    if expires + policy.max_clock_skew < now {
        return Err(ChainError::invalid("capability has expired"));
    }

    let document =
        serde_json::to_value(current).map_err(|err| ChainError::invalid(err.to_string()))?;

    let mut proof_seen = false;
    for proof in current.delegation_proofs() {
        proof_seen = true;

        let created = proof
            .created_at()
            .ok_or_else(|| ChainError::invalid("delegation proof without a created timestamp"))?
            .map_err(|err| ChainError::invalid(format!("unparsable proof timestamp: {err}")))?;

        if created - policy.max_clock_skew > now {
            return Err(ChainError::invalid("delegation proof is from the future"));
        }

        if expires - created > policy.max_delegation_ttl {
            return Err(ChainError::invalid(
                "delegation lifetime exceeds the maximum delegation TTL",
            ));
        }

        for suite in suites {
            match suite.verify_proof(&document, proof, loader).await {
                Ok(verified) => {
                    let signer = verified
                        .signer()
                        .ok_or_else(|| {
                            ChainError::invalid("verified proof names no verification method")
                        })?
                        .to_owned();

                    if !parent.controllers().contains(&signer.as_str()) {
                        return Err(ChainError::invalid(
                            "proof signer is not a controller of the parent capability",
                        ));
                    }

                    return Ok(signer);
                }
                Err(error) => {
                    debug!(?error, capability = %current.id, "proof suite rejected delegation proof");
                }
            }
        }
    }

    if proof_seen {
        Err(ChainError::invalid("no suite verified the delegation proof"))
    } else {
        Err(ChainError::invalid("capability carries no delegation proof"))
    }
}

fn check_attenuation(
    current: &Capability,
    parent: &Capability,
    policy: &Policy,
) -> Result<(), ChainError> {
    let child_target = current
        .invocation_target()
        .ok_or_else(|| ChainError::invalid("capability without an invocation target"))?;
    let parent_target = parent
        .invocation_target()
        .ok_or_else(|| ChainError::invalid("capability without an invocation target"))?;

    if child_target == parent_target {
        return Ok(());
    }

    if policy.allow_target_attenuation && is_hierarchical_suffix(child_target, parent_target) {
        return Ok(());
    }

    debug!(
        child = %child_target,
        parent = %parent_target,
        "invocation target is not an attenuation of its parent"
    );
    Err(ChainError::invalid(
        "invocation target is not an attenuation of its parent",
    ))
}

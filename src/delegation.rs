use crate::{
    capability::Capability,
    chain::{self, ChainError, ChainInspector, RootExpectation, SuiteFactory},
    error::{ensure, Error, Result},
    loader::{DocumentLoader, RootCapabilityLoader, RootControllerResolver},
    Policy, Request,
};
use indexmap::IndexSet;
use time::OffsetDateTime;

/// Verified context of a capability submitted for revocation
#[derive(Debug)]
pub struct RevocationContext {
    /// Last signer in the chain: the party that delegated the submitted
    /// capability
    pub delegator: Option<String>,

    /// The submitted, to-be-revoked capability
    pub capability: Capability,

    /// Dereferenced delegation chain, root-first
    pub capability_chain: Vec<Capability>,

    /// Transitive set of controllers appearing anywhere in the chain, in
    /// insertion order
    pub chain_controllers: IndexSet<String>,
}

/// Verify the request body as a capability delegation acceptable for
/// revocation at this service object
#[allow(clippy::too_many_arguments)]
#[instrument(skip_all)]
pub(crate) async fn verify<L, R, SF, CI>(
    req: &Request,
    service_object_id: &str,
    document_loader: &L,
    root_controller: &R,
    suite_factory: &SF,
    inspector: Option<&CI>,
    policy: &Policy,
    now: OffsetDateTime,
) -> Result<RevocationContext>
where
    L: DocumentLoader + Sync,
    R: RootControllerResolver + Sync,
    SF: SuiteFactory + Sync,
    CI: ChainInspector + Sync,
{
    let capability: Capability =
        serde_json::from_slice(req.body()).map_err(Error::invalid_delegation)?;

    ensure!(!capability.is_root(), Error::RootNotRevocable);

    let suites = suite_factory
        .suites(req)
        .await
        .map_err(Error::invalid_delegation)?;

    let loader = RootCapabilityLoader::new(req, document_loader, root_controller);

    let mut controllers = IndexSet::new();
    let verification = chain::verify_chain(
        capability.clone(),
        RootExpectation::ServicePrefix(service_object_id),
        &loader,
        suites.as_slice(),
        inspector,
        policy,
        now,
        &mut controllers,
    )
    .await
    .map_err(|err| match err {
        ChainError::UnrelatedRoot => Error::UnrelatedServiceObject,
        ChainError::Invalid(err) => Error::InvalidDelegation(Some(err)),
    })?;

    Ok(RevocationContext {
        delegator: verification.last_signer,
        capability,
        capability_chain: verification.chain,
        chain_controllers: controllers,
    })
}

use crate::{
    capability::Capability,
    chain::{self, ChainError, ChainInspector, RootExpectation, SuiteFactory},
    error::{ensure, BoxError, Error, Result},
    expected::Expected,
    header::{AuthorizationHeader, CapabilityInvocation},
    loader::{DocumentLoader, RootCapabilityLoader, RootControllerResolver},
    signature_string, Policy, Request,
};
use indexmap::IndexSet;
use serde_json::Value;
use std::future::Future;
use time::OffsetDateTime;

/// Verification side of a resolved signing key
pub trait SignatureVerifier {
    fn verify(&self, message: &[u8], signature: &[u8]) -> bool;
}

/// A signing key resolved by the host
pub struct ResolvedKey<V> {
    pub verifier: V,

    /// Verification method document of the key; its `controller` binds the
    /// key to the capability controller
    pub verification_method: Value,
}

/// Host callback resolving the key an HTTP signature names
///
/// The loader is the per-request wrapping loader, so key documents reachable
/// through root capability ids resolve the same way capability documents do.
pub trait VerifierResolver {
    type Verifier: SignatureVerifier;

    fn resolve<L>(
        &self,
        key_id: &str,
        loader: &L,
    ) -> impl Future<Output = Result<ResolvedKey<Self::Verifier>, BoxError>> + Send
    where
        L: DocumentLoader + Sync;
}

/// Successful invocation verification
#[derive(Debug)]
pub struct InvocationAuthorization {
    /// Controller the signing key acted for
    pub controller: String,

    /// Identifier of the signing key
    pub key_id: String,

    /// Dereferenced delegation chain, root-first; the invoked capability is
    /// the last entry
    pub capability_chain: Vec<Capability>,

    /// Action the invocation was authorized for
    pub action: String,
}

/// Verify that the request is authorized by the capability it invokes
#[allow(clippy::too_many_arguments)]
#[instrument(skip_all)]
pub(crate) async fn verify<L, R, V, SF, CI>(
    req: &Request,
    sig: &AuthorizationHeader<'_>,
    expected: &Expected,
    document_loader: &L,
    root_controller: &R,
    verifier_resolver: &V,
    suite_factory: &SF,
    inspector: Option<&CI>,
    policy: &Policy,
    now: OffsetDateTime,
) -> Result<InvocationAuthorization>
where
    L: DocumentLoader + Sync,
    R: RootControllerResolver + Sync,
    V: VerifierResolver + Sync,
    SF: SuiteFactory + Sync,
    CI: ChainInspector + Sync,
{
    ensure!(
        req.host() == Some(expected.host.as_str()),
        Error::not_authorized("request host does not match the expected host")
    );

    check_signature_window(sig, policy, now)?;

    let signing_string = signature_string::construct(req, sig)?;

    let loader = RootCapabilityLoader::new(req, document_loader, root_controller);

    let resolved = verifier_resolver
        .resolve(sig.key_id, &loader)
        .await
        .map_err(Error::not_authorized)?;

    ensure!(
        resolved
            .verifier
            .verify(signing_string.as_bytes(), &sig.signature),
        Error::not_authorized("signature verification failed")
    );

    let invocation = CapabilityInvocation::parse_from(req)?;
    if let Some(action) = invocation.action {
        ensure!(
            action == expected.action,
            Error::not_authorized("requested action does not match the expected action")
        );
    }

    let invoked = loader
        .load_capability(invocation.capability)
        .await
        .map_err(Error::not_authorized)?;
    ensure!(
        invoked.id == invocation.capability,
        Error::not_authorized("dereferenced capability id differs from the invoked reference")
    );

    let suites = suite_factory
        .suites(req)
        .await
        .map_err(Error::not_authorized)?;

    let mut controllers = IndexSet::new();
    let verification = chain::verify_chain(
        invoked,
        RootExpectation::Ids(&expected.root_ids),
        &loader,
        suites.as_slice(),
        inspector,
        policy,
        now,
        &mut controllers,
    )
    .await
    .map_err(|err| match err {
        ChainError::UnrelatedRoot => Error::NotAuthorized(None),
        ChainError::Invalid(err) => Error::NotAuthorized(Some(err)),
    })?;

    // The chain comes back root-first; the invoked capability sits at the end
    let invoked = verification.chain.last().unwrap();

    let signer = chain::signer_of(&resolved.verification_method)
        .ok_or_else(|| Error::not_authorized("resolved key names no controller"))?;
    ensure!(
        invoked.controllers().contains(&signer),
        Error::not_authorized("signing key controller is not a controller of the capability")
    );

    ensure!(
        invoked.allows_action(&expected.action),
        Error::not_authorized("capability does not grant the expected action")
    );

    let capability_target = invoked
        .invocation_target()
        .ok_or_else(|| Error::not_authorized("capability without an invocation target"))?;
    let target_matches = capability_target == expected.target
        || (policy.allow_target_attenuation
            && chain::is_hierarchical_suffix(&expected.target, capability_target));
    ensure!(
        target_matches,
        Error::not_authorized("capability does not cover the invoked target")
    );

    let signer = signer.to_owned();
    Ok(InvocationAuthorization {
        controller: signer,
        key_id: sig.key_id.to_owned(),
        capability_chain: verification.chain,
        action: expected.action.clone(),
    })
}

/// Bounds-check the signature's `(created)`/`(expires)` window against the
/// sampled clock
fn check_signature_window(
    sig: &AuthorizationHeader<'_>,
    policy: &Policy,
    now: OffsetDateTime,
) -> Result<()> {
    let created = sig
        .created
        .ok_or_else(|| Error::not_authorized("signature without a created timestamp"))?;
    let expires = sig
        .expires
        .ok_or_else(|| Error::not_authorized("signature without an expires timestamp"))?;

    let created = OffsetDateTime::from_unix_timestamp(created as i64)
        .map_err(Error::not_authorized)?;
    let expires = OffsetDateTime::from_unix_timestamp(expires as i64)
        .map_err(Error::not_authorized)?;

    ensure!(
        created - policy.max_clock_skew <= now,
        Error::not_authorized("signature was created in the future")
    );
    ensure!(
        now <= expires + policy.max_clock_skew,
        Error::not_authorized("signature has expired")
    );

    Ok(())
}

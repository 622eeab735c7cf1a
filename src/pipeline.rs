use crate::{
    capability,
    chain::{ChainInspector, SuiteFactory},
    delegation::{self, RevocationContext},
    digest,
    error::{BoxError, Error, Result},
    expected::{self, Expected, ExpectedValuesResolver},
    header::AuthorizationHeader,
    invocation::{self, InvocationAuthorization, VerifierResolver},
    loader::{DocumentLoader, RootControllerResolver},
    OneOrMany, Policy, Request,
};
use indexmap::IndexSet;
use time::OffsetDateTime;

/// Host implementations backing the invocation pipeline
pub struct Impls<EV, L, R, V, SF, CI = ()> {
    pub expected_values: EV,
    pub document_loader: L,
    pub root_controller: R,
    pub verifier_resolver: V,
    pub suite_factory: SF,
    pub chain_inspector: Option<CI>,
}

/// Authorize a request through the invocation pipeline
///
/// Stages run strictly in order (signature header parsing, digest
/// validation, expected-value resolution, invocation verification) and the
/// first failure short-circuits. The clock is sampled once here so every
/// time comparison within the request is internally consistent.
#[instrument(skip_all)]
pub async fn authorize<EV, L, R, V, SF, CI>(
    req: &Request,
    impls: &Impls<EV, L, R, V, SF, CI>,
    policy: &Policy,
) -> Result<InvocationAuthorization>
where
    EV: ExpectedValuesResolver + Sync,
    L: DocumentLoader + Sync,
    R: RootControllerResolver + Sync,
    V: VerifierResolver + Sync,
    SF: SuiteFactory + Sync,
    CI: ChainInspector + Sync,
{
    let now = OffsetDateTime::now_utc();

    let sig = AuthorizationHeader::parse_from(req)?;
    digest::verify(req)?;
    let expected = expected::resolve(req, &impls.expected_values).await?;

    invocation::verify(
        req,
        &sig,
        &expected,
        &impls.document_loader,
        &impls.root_controller,
        &impls.verifier_resolver,
        &impls.suite_factory,
        impls.chain_inspector.as_ref(),
        policy,
        now,
    )
    .await
}

/// Host implementations backing the revocation pipeline
///
/// The two inspector slots are deliberately separate: `delegation_inspector`
/// sees the submitted, to-be-revoked chain while `invocation_inspector` sees
/// the invoker's chain.
pub struct RevocationImpls<L, R, V, SF, DI = (), II = ()> {
    pub expected_host: String,
    pub document_loader: L,
    pub root_controller: R,
    pub verifier_resolver: V,
    pub suite_factory: SF,
    pub delegation_inspector: Option<DI>,
    pub invocation_inspector: Option<II>,
}

/// Successful revocation authorization
///
/// Storage of the revocation stays with the host; this only proves the
/// submission was allowed.
#[derive(Debug)]
pub struct RevocationAuthorization {
    pub invocation: InvocationAuthorization,
    pub revocation: RevocationContext,
}

/// Authorize a capability revocation submitted to a
/// `<prefix>/revocations/<revocationId>` route
#[instrument(skip_all)]
pub async fn authorize_revocation<L, R, V, SF, DI, II>(
    req: &Request,
    impls: &RevocationImpls<L, R, V, SF, DI, II>,
    policy: &Policy,
) -> Result<RevocationAuthorization>
where
    L: DocumentLoader + Sync,
    R: RootControllerResolver + Sync,
    V: VerifierResolver + Sync,
    SF: SuiteFactory + Sync,
    DI: ChainInspector + Sync,
    II: ChainInspector + Sync,
{
    let now = OffsetDateTime::now_utc();

    let (prefix, revocation_id) = split_revocation_route(req.uri().path())?;
    let service_object_id = format!("https://{}{prefix}", impls.expected_host);
    let revocation_target = format!("{service_object_id}/revocations/{revocation_id}");

    let sig = AuthorizationHeader::parse_from(req)?;
    digest::verify(req)?;

    let expected = Expected {
        host: impls.expected_host.clone(),
        action: "write".to_owned(),
        target: expected::default_target(&impls.expected_host, req),
        root_ids: [
            capability::root_capability_id(&service_object_id),
            capability::root_capability_id(&revocation_target),
        ]
        .into_iter()
        .collect(),
    };

    let revocation = delegation::verify(
        req,
        &service_object_id,
        &impls.document_loader,
        &impls.root_controller,
        &impls.suite_factory,
        impls.delegation_inspector.as_ref(),
        policy,
        now,
    )
    .await?;

    // Any controller in the to-be-revoked chain may authorize the
    // submission: the revocation-specific root capability is controlled by
    // the transitive controller set collected above
    let roots = RevocationRootController {
        inner: &impls.root_controller,
        service_object_id: &service_object_id,
        revocation_target: &revocation_target,
        chain_controllers: &revocation.chain_controllers,
    };

    // An admin may invoke through the service object's own root capability,
    // whose target sits above the revocation URL
    let invocation_policy = Policy {
        allow_target_attenuation: true,
        ..policy.clone()
    };

    let invocation = invocation::verify(
        req,
        &sig,
        &expected,
        &impls.document_loader,
        &roots,
        &impls.verifier_resolver,
        &impls.suite_factory,
        impls.invocation_inspector.as_ref(),
        &invocation_policy,
        now,
    )
    .await?;

    Ok(RevocationAuthorization {
        invocation,
        revocation,
    })
}

fn split_revocation_route(path: &str) -> Result<(&str, &str)> {
    let Some((prefix, revocation_id)) = path.rsplit_once("/revocations/") else {
        debug!(%path, "revocation route without a /revocations/ suffix");
        return Err(Error::Misconfigured);
    };

    if revocation_id.is_empty() || revocation_id.contains('/') {
        return Err(Error::Misconfigured);
    }

    Ok((prefix, revocation_id))
}

/// Root controller resolver scoped to one revocation request
struct RevocationRootController<'a, R> {
    inner: &'a R,
    service_object_id: &'a str,
    revocation_target: &'a str,
    chain_controllers: &'a IndexSet<String>,
}

impl<R> RootControllerResolver for RevocationRootController<'_, R>
where
    R: RootControllerResolver + Sync,
{
    async fn root_controller(
        &self,
        req: &Request,
        root_capability_id: &str,
        root_invocation_target: &str,
    ) -> Result<OneOrMany<String>, BoxError> {
        if root_invocation_target == self.service_object_id {
            return self
                .inner
                .root_controller(req, root_capability_id, root_invocation_target)
                .await;
        }

        if root_invocation_target == self.revocation_target {
            let controllers = self.chain_controllers.iter().cloned().collect::<Vec<_>>();
            return Ok(OneOrMany::Many(controllers));
        }

        Err(format!("no root controller for invocation target \"{root_invocation_target}\"").into())
    }
}

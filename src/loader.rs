use crate::{
    capability::{Capability, OneOrMany, ROOT_CAPABILITY_PREFIX, ZCAP_CONTEXT},
    error::BoxError,
    Request,
};
use serde_json::{json, Value};
use std::future::Future;

/// A dereferenced JSON-LD document
pub struct RemoteDocument {
    pub document_url: String,
    pub document: Value,
}

/// Host callback resolving JSON-LD contexts, DID documents and stored
/// capability documents
///
/// Invoked concurrently across requests; implementations must be reentrant.
pub trait DocumentLoader {
    fn load(&self, url: &str) -> impl Future<Output = Result<RemoteDocument, BoxError>> + Send;
}

/// Host callback naming the controller(s) of a root capability
pub trait RootControllerResolver {
    fn root_controller(
        &self,
        req: &Request,
        root_capability_id: &str,
        root_invocation_target: &str,
    ) -> impl Future<Output = Result<OneOrMany<String>, BoxError>> + Send;
}

/// Document loader wrapper that synthesizes root capabilities on demand
///
/// Root capabilities are never persisted. For `urn:zcap:root:` identifiers
/// the wrapper percent-decodes the invocation target, asks the host for the
/// controller and fabricates the document; everything else goes to the base
/// loader. Bound to one request; synthesized documents don't outlive it.
pub struct RootCapabilityLoader<'a, L, R> {
    pub(crate) request: &'a Request,
    pub(crate) base: &'a L,
    pub(crate) roots: &'a R,
}

impl<'a, L, R> RootCapabilityLoader<'a, L, R>
where
    L: DocumentLoader + Sync,
    R: RootControllerResolver + Sync,
{
    pub fn new(request: &'a Request, base: &'a L, roots: &'a R) -> Self {
        Self {
            request,
            base,
            roots,
        }
    }

    /// Dereference `url` into a capability document
    pub(crate) async fn load_capability(&self, url: &str) -> Result<Capability, BoxError> {
        let document = self.load(url).await?.document;
        let capability = serde_json::from_value(document)?;
        Ok(capability)
    }
}

impl<L, R> DocumentLoader for RootCapabilityLoader<'_, L, R>
where
    L: DocumentLoader + Sync,
    R: RootControllerResolver + Sync,
{
    async fn load(&self, url: &str) -> Result<RemoteDocument, BoxError> {
        let Some(encoded) = url.strip_prefix(ROOT_CAPABILITY_PREFIX) else {
            return self.base.load(url).await;
        };

        let target = urlencoding::decode(encoded)
            .map_err(|err| format!("root capability id encodes no valid invocation target: {err}"))?;

        let controller = self
            .roots
            .root_controller(self.request, url, &target)
            .await?;

        Ok(RemoteDocument {
            document_url: url.to_owned(),
            document: json!({
                "@context": ZCAP_CONTEXT,
                "id": url,
                "invocationTarget": target,
                "controller": controller,
            }),
        })
    }
}

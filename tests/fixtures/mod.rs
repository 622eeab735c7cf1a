use bytes::Bytes;
use http_body_util::Full;
use ring::{
    rand::SystemRandom,
    signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519},
};
use sekisho::{
    capability::{OneOrMany, Proof},
    chain::{ProofSuite, SuiteFactory, VerifiedProof},
    error::BoxError,
    expected::ExpectedValuesResolver,
    invocation::{ResolvedKey, SignatureVerifier, VerifierResolver},
    loader::{DocumentLoader, RemoteDocument, RootControllerResolver},
    Request,
};
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    fmt::Write as _,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use time::{format_description::well_known::Rfc3339, Duration, OffsetDateTime};

use base64_simd::STANDARD as BASE64;

pub const HOST: &str = "localhost:9876";

/// An Ed25519 signing key bound to a controller DID
pub struct TestKey {
    pub controller: String,
    pub key_id: String,
    pub public_key: Vec<u8>,
    keypair: Ed25519KeyPair,
}

impl TestKey {
    pub fn generate(controller: &str) -> Self {
        let document = Ed25519KeyPair::generate_pkcs8(&SystemRandom::new()).unwrap();
        let keypair = Ed25519KeyPair::from_pkcs8(document.as_ref()).unwrap();
        let public_key = keypair.public_key().as_ref().to_vec();

        Self {
            controller: controller.to_owned(),
            key_id: format!("{controller}#key-1"),
            public_key,
            keypair,
        }
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.keypair.sign(message).as_ref().to_vec()
    }
}

#[derive(Clone)]
struct KeyRecord {
    public_key: Vec<u8>,
    controller: String,
}

/// Registry shared by the verifier resolver and the proof suite
#[derive(Clone, Default)]
pub struct KeyRing {
    keys: HashMap<String, KeyRecord>,
    pub resolutions: Arc<AtomicUsize>,
}

impl KeyRing {
    pub fn register(&mut self, key: &TestKey) {
        self.keys.insert(
            key.key_id.clone(),
            KeyRecord {
                public_key: key.public_key.clone(),
                controller: key.controller.clone(),
            },
        );
    }

    pub fn resolution_count(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }
}

pub struct Ed25519Verifier {
    public_key: Vec<u8>,
}

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        UnparsedPublicKey::new(&ED25519, &self.public_key)
            .verify(message, signature)
            .is_ok()
    }
}

impl VerifierResolver for KeyRing {
    type Verifier = Ed25519Verifier;

    async fn resolve<L>(
        &self,
        key_id: &str,
        _loader: &L,
    ) -> Result<ResolvedKey<Self::Verifier>, BoxError>
    where
        L: DocumentLoader + Sync,
    {
        self.resolutions.fetch_add(1, Ordering::SeqCst);

        let record = self
            .keys
            .get(key_id)
            .ok_or_else(|| format!("unknown key: {key_id}"))?;

        Ok(ResolvedKey {
            verifier: Ed25519Verifier {
                public_key: record.public_key.clone(),
            },
            verification_method: json!({
                "id": key_id,
                "type": "Ed25519VerificationKey2020",
                "controller": record.controller,
            }),
        })
    }
}

/// Ed25519 proof suite over a canonical JSON form
///
/// A deliberately small stand-in for a production JSON-LD suite. The
/// signing input is the JSON serialisation (sorted keys) of the document
/// without its `proof` next to the proof without its `proofValue`.
#[derive(Clone)]
pub struct FixtureSuite {
    keys: KeyRing,
}

pub fn signing_input(document: &Value, proof: &Value) -> Vec<u8> {
    let mut document = document.clone();
    if let Some(map) = document.as_object_mut() {
        map.remove("proof");
    }

    let mut proof = proof.clone();
    if let Some(map) = proof.as_object_mut() {
        map.remove("proofValue");
    }

    serde_json::to_vec(&json!({ "document": document, "proof": proof })).unwrap()
}

impl ProofSuite for FixtureSuite {
    async fn verify_proof<L>(
        &self,
        document: &Value,
        proof: &Proof,
        _loader: &L,
    ) -> Result<VerifiedProof, BoxError>
    where
        L: DocumentLoader + Sync,
    {
        let key_id = proof
            .verification_method
            .as_deref()
            .ok_or("proof names no verification method")?;
        let record = self
            .keys
            .keys
            .get(key_id)
            .ok_or_else(|| format!("unknown verification method: {key_id}"))?;

        let proof_value = proof.proof_value.as_deref().ok_or("proof carries no value")?;
        let signature = BASE64.decode_to_vec(proof_value)?;

        let input = signing_input(document, &serde_json::to_value(proof)?);
        UnparsedPublicKey::new(&ED25519, &record.public_key)
            .verify(&input, &signature)
            .map_err(|_| "signature mismatch")?;

        Ok(VerifiedProof {
            verification_method: json!({
                "id": key_id,
                "controller": record.controller,
            }),
        })
    }
}

impl SuiteFactory for KeyRing {
    type Suite = FixtureSuite;

    async fn suites(&self, _req: &Request) -> Result<OneOrMany<Self::Suite>, BoxError> {
        Ok(OneOrMany::One(FixtureSuite { keys: self.clone() }))
    }
}

/// In-memory capability/document store
#[derive(Clone, Default)]
pub struct StaticLoader {
    documents: HashMap<String, Value>,
}

impl StaticLoader {
    pub fn insert(&mut self, document: Value) {
        let url = document["id"].as_str().unwrap().to_owned();
        self.documents.insert(url, document);
    }
}

impl DocumentLoader for StaticLoader {
    async fn load(&self, url: &str) -> Result<RemoteDocument, BoxError> {
        self.documents
            .get(url)
            .cloned()
            .map(|document| RemoteDocument {
                document_url: url.to_owned(),
                document,
            })
            .ok_or_else(|| format!("document not found: {url}").into())
    }
}

/// Root controller lookup by invocation target
#[derive(Clone, Default)]
pub struct StaticRoots {
    controllers: HashMap<String, String>,
}

impl StaticRoots {
    pub fn insert(&mut self, invocation_target: &str, controller: &str) {
        self.controllers
            .insert(invocation_target.to_owned(), controller.to_owned());
    }
}

impl RootControllerResolver for StaticRoots {
    async fn root_controller(
        &self,
        _req: &Request,
        _root_capability_id: &str,
        root_invocation_target: &str,
    ) -> Result<OneOrMany<String>, BoxError> {
        self.controllers
            .get(root_invocation_target)
            .cloned()
            .map(OneOrMany::One)
            .ok_or_else(|| format!("no controller for {root_invocation_target}").into())
    }
}

/// Expected values handed back verbatim
pub struct StaticExpected {
    pub value: Value,
}

impl ExpectedValuesResolver for StaticExpected {
    async fn expected_values(&self, _req: &Request) -> Result<Value, BoxError> {
        Ok(self.value.clone())
    }
}

/// Chain inspector that vetoes every chain
pub struct Veto;

impl sekisho::chain::ChainInspector for Veto {
    async fn inspect_chain(&self, _chain: &[sekisho::Capability]) -> Result<(), BoxError> {
        Err("capability has been revoked".into())
    }
}

/// Build a delegated capability document signed by `signer`
pub fn delegated_zcap(
    id: &str,
    invocation_target: &str,
    controller: &str,
    parent_id: &str,
    created: OffsetDateTime,
    expires: OffsetDateTime,
    signer: &TestKey,
    capability_chain: Vec<Value>,
) -> Value {
    let mut capability = json!({
        "@context": "https://w3id.org/zcap/v1",
        "id": id,
        "parentCapability": parent_id,
        "invocationTarget": invocation_target,
        "controller": controller,
        "expires": expires.format(&Rfc3339).unwrap(),
    });

    let mut proof = json!({
        "type": "Ed25519Signature2020",
        "created": created.format(&Rfc3339).unwrap(),
        "verificationMethod": signer.key_id,
        "proofPurpose": "capabilityDelegation",
        "capabilityChain": capability_chain,
    });

    let signature = signer.sign(&signing_input(&capability, &proof));
    proof["proofValue"] = Value::String(BASE64.encode_to_string(signature));
    capability["proof"] = proof;

    capability
}

/// Build a signed invocation request
///
/// `url` must be absolute; the signature covers the minimum header set plus
/// `content-type` and `digest` when a body is supplied.
pub fn signed_request(
    method: &str,
    url: &str,
    body: Option<&Value>,
    key: &TestKey,
    capability: &str,
    action: &str,
) -> http::Request<Full<Bytes>> {
    let uri: http::Uri = url.parse().unwrap();
    let host = uri.authority().unwrap().as_str().to_owned();
    let path_and_query = uri
        .path_and_query()
        .map_or_else(|| uri.path(), |paq| paq.as_str())
        .to_owned();

    let now = OffsetDateTime::now_utc();
    let created = (now - Duration::seconds(5)).unix_timestamp() as u64;
    let expires = (now + Duration::seconds(600)).unix_timestamp() as u64;

    let invocation_header = format!("zcap capability=\"{capability}\",action=\"{action}\"");

    let body_bytes = body.map(|body| serde_json::to_vec(body).unwrap());
    let digest = body_bytes
        .as_deref()
        .map(|bytes| sekisho::digest::header_value(sekisho::digest::Algorithm::Sha256, bytes));

    let mut covered: Vec<&str> = vec![
        "(created)",
        "(expires)",
        "(request-target)",
        "host",
        "capability-invocation",
    ];
    if body_bytes.is_some() {
        covered.extend(["content-type", "digest"]);
    }

    let mut signing_string = String::new();
    let _ = writeln!(signing_string, "(created): {created}");
    let _ = writeln!(signing_string, "(expires): {expires}");
    let _ = writeln!(
        signing_string,
        "(request-target): {} {path_and_query}",
        method.to_lowercase()
    );
    let _ = writeln!(signing_string, "host: {host}");
    let _ = writeln!(signing_string, "capability-invocation: {invocation_header}");
    if let Some(digest) = &digest {
        let _ = writeln!(signing_string, "content-type: application/json");
        let _ = writeln!(signing_string, "digest: {digest}");
    }

    let signature = key.sign(signing_string.as_bytes());
    let authorization = sekisho::header::serialise(
        &key.key_id,
        covered.iter().copied(),
        &signature,
        Some(created),
        Some(expires),
    );

    let mut builder = http::Request::builder()
        .method(method)
        .uri(url)
        .header(http::header::HOST, &host)
        .header("capability-invocation", &invocation_header)
        .header(http::header::AUTHORIZATION, &authorization);

    let body_bytes = body_bytes.unwrap_or_default();
    if !body_bytes.is_empty() {
        builder = builder
            .header(http::header::CONTENT_TYPE, "application/json")
            .header(http::header::CONTENT_LENGTH, body_bytes.len())
            .header("digest", digest.unwrap());
    }

    builder.body(Full::new(Bytes::from(body_bytes))).unwrap()
}

/// Read an error's wire surface
pub fn wire_error(err: sekisho::error::Error) -> (http::StatusCode, String, String) {
    let response = err.into_response();
    let status = response.status();
    let body: Value = serde_json::from_slice(response.body()).unwrap();

    (
        status,
        body["name"].as_str().unwrap().to_owned(),
        body["message"].as_str().unwrap().to_owned(),
    )
}

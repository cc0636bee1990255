//! In-process mock of a Docker Registry V2, built on `tiny_http`.
//!
//! Records every request so tests can assert on the exact wire traffic:
//! dedup HEADs, upload-session POSTs, chunk PATCHes with their
//! `Content-Range`, terminal PUTs and manifest publications. Optionally
//! demands a bearer token, answering anonymous requests with a
//! `WWW-Authenticate` challenge and serving the token endpoint itself.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tiny_http::{Header, Request, Response, Server};

pub const TOKEN: &str = "mock-session-token";

#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    /// Demand `Authorization: Bearer` on /v2/ requests, challenging
    /// everything else.
    pub require_token: bool,
    /// Keep answering 401 even to a valid token (terminal-auth scenario).
    pub reject_authorized: bool,
    /// Digests the registry already stores.
    pub existing: Vec<String>,
    /// Status returned for manifest PUTs; 201 when unset.
    pub manifest_status: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub authorization: Option<String>,
    pub content_range: Option<String>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn path(&self) -> &str {
        self.url.split('?').next().unwrap_or(&self.url)
    }
}

#[derive(Default)]
struct RegistryState {
    requests: Vec<RecordedRequest>,
    token_exchanges: usize,
    /// Open upload sessions: id -> bytes accumulated so far.
    sessions: Vec<Vec<u8>>,
    /// Blobs the registry holds (pre-existing digests map to None).
    blobs: HashMap<String, Option<Vec<u8>>>,
    /// Published manifests keyed by "<repo>:<tag>".
    manifests: HashMap<String, Vec<u8>>,
}

pub struct MockRegistry {
    server: Arc<Server>,
    port: u16,
    state: Arc<Mutex<RegistryState>>,
}

impl MockRegistry {
    pub fn start(options: RegistryOptions) -> Self {
        let server = Arc::new(Server::http("127.0.0.1:0").expect("start mock registry"));
        let port = server.server_addr().to_ip().unwrap().port();

        let mut state = RegistryState::default();
        for digest in &options.existing {
            state.blobs.insert(digest.clone(), None);
        }
        let state = Arc::new(Mutex::new(state));

        let handler = Handler {
            server: server.clone(),
            state: state.clone(),
            options,
            port,
        };
        std::thread::spawn(move || handler.run());

        Self { server, port, state }
    }

    pub fn endpoint(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn requests_with_method(&self, method: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method)
            .collect()
    }

    pub fn token_exchanges(&self) -> usize {
        self.state.lock().unwrap().token_exchanges
    }

    pub fn blob(&self, digest: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .blobs
            .get(digest)
            .and_then(|b| b.clone())
    }

    pub fn has_blob(&self, digest: &str) -> bool {
        self.state.lock().unwrap().blobs.contains_key(digest)
    }

    pub fn manifest(&self, repository: &str, tag: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .manifests
            .get(&format!("{}:{}", repository, tag))
            .cloned()
    }
}

impl Drop for MockRegistry {
    fn drop(&mut self) {
        self.server.unblock();
    }
}

struct Handler {
    server: Arc<Server>,
    state: Arc<Mutex<RegistryState>>,
    options: RegistryOptions,
    port: u16,
}

impl Handler {
    fn run(self) {
        let timeout = Duration::from_secs(30);
        while let Ok(Some(request)) = self.server.recv_timeout(timeout) {
            self.handle(request);
        }
    }

    fn handle(&self, mut request: Request) {
        let method = request.method().to_string();
        let url = request.url().to_string();
        let authorization = header_value(&request, "Authorization");
        let content_range = header_value(&request, "Content-Range");

        let mut body = Vec::new();
        let _ = request.as_reader().read_to_end(&mut body);

        self.state.lock().unwrap().requests.push(RecordedRequest {
            method: method.clone(),
            url: url.clone(),
            authorization: authorization.clone(),
            content_range,
            body: body.clone(),
        });

        let path = url.split('?').next().unwrap_or("").to_string();
        let query = url.split_once('?').map(|(_, q)| q.to_string());

        // Token endpoint is served outside the /v2/ auth wall.
        if path == "/token" && method == "POST" {
            self.state.lock().unwrap().token_exchanges += 1;
            respond_json(request, 200, format!(r#"{{"token":"{}"}}"#, TOKEN));
            return;
        }

        if self.options.require_token {
            let authorized =
                authorization.as_deref() == Some(&format!("Bearer {}", TOKEN));
            if !authorized || self.options.reject_authorized {
                let repo = repository_of(&path).unwrap_or("unknown");
                let challenge = format!(
                    r#"Bearer realm="http://127.0.0.1:{}/token",service="mock-registry",scope="repository:{}:pull""#,
                    self.port, repo
                );
                let response = Response::empty(401)
                    .with_header(Header::from_bytes("WWW-Authenticate", challenge).unwrap());
                let _ = request.respond(response);
                return;
            }
        }

        match method.as_str() {
            "HEAD" => self.head_blob(request, &path),
            "POST" => self.start_upload(request, &path),
            "PATCH" => self.patch_chunk(request, &path, body),
            "PUT" => self.put(request, &path, query.as_deref(), body),
            _ => {
                let _ = request.respond(Response::empty(405));
            }
        }
    }

    fn head_blob(&self, request: Request, path: &str) {
        let digest = path.rsplit('/').next().unwrap_or_default();
        let status = if self.state.lock().unwrap().blobs.contains_key(digest) {
            200
        } else {
            404
        };
        let _ = request.respond(Response::empty(status));
    }

    fn start_upload(&self, request: Request, path: &str) {
        if !path.ends_with("/blobs/uploads/") {
            let _ = request.respond(Response::empty(404));
            return;
        }

        let mut state = self.state.lock().unwrap();
        state.sessions.push(Vec::new());
        let id = state.sessions.len() - 1;
        drop(state);

        // Path-relative Location, as Docker distribution returns.
        let location = format!("{}{}?_state=0", path, id);
        let response = Response::empty(202)
            .with_header(Header::from_bytes("Location", location).unwrap());
        let _ = request.respond(response);
    }

    fn patch_chunk(&self, request: Request, path: &str, body: Vec<u8>) {
        let Some(id) = session_id(path) else {
            let _ = request.respond(Response::empty(404));
            return;
        };

        let mut state = self.state.lock().unwrap();
        let Some(session) = state.sessions.get_mut(id) else {
            let _ = request.respond(Response::empty(404));
            return;
        };
        session.extend_from_slice(&body);
        let chunks = session.len();
        drop(state);

        let location = format!("{}?_state={}", path, chunks);
        let response = Response::empty(202)
            .with_header(Header::from_bytes("Location", location).unwrap());
        let _ = request.respond(response);
    }

    fn put(&self, request: Request, path: &str, query: Option<&str>, body: Vec<u8>) {
        if path.contains("/manifests/") {
            self.put_manifest(request, path, body);
        } else {
            self.put_final_chunk(request, path, query, body);
        }
    }

    fn put_final_chunk(&self, request: Request, path: &str, query: Option<&str>, body: Vec<u8>) {
        let claimed = query
            .and_then(|q| {
                q.split('&')
                    .find_map(|pair| pair.strip_prefix("digest="))
            })
            .unwrap_or_default()
            .to_string();

        let Some(id) = session_id(path) else {
            let _ = request.respond(Response::empty(404));
            return;
        };

        let mut state = self.state.lock().unwrap();
        let Some(session) = state.sessions.get_mut(id) else {
            let _ = request.respond(Response::empty(404));
            return;
        };
        session.extend_from_slice(&body);
        let content = std::mem::take(session);

        let mut hasher = Sha256::new();
        hasher.update(&content);
        let actual = format!("sha256:{}", hex::encode(hasher.finalize()));

        if actual != claimed {
            drop(state);
            let _ = request.respond(Response::from_string("digest mismatch").with_status_code(400));
            return;
        }

        state.blobs.insert(actual, Some(content));
        drop(state);
        let _ = request.respond(Response::empty(201));
    }

    fn put_manifest(&self, request: Request, path: &str, body: Vec<u8>) {
        let status = self.options.manifest_status.unwrap_or(201);
        if status == 201 {
            if let Some((repo, tag)) = split_manifest_path(path) {
                self.state
                    .lock()
                    .unwrap()
                    .manifests
                    .insert(format!("{}:{}", repo, tag), body);
            }
        }
        let _ = request.respond(Response::empty(status));
    }
}

fn header_value(request: &Request, name: &str) -> Option<String> {
    request
        .headers()
        .iter()
        .find(|h| h.field.as_str().as_str().eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str().to_string())
}

/// `/v2/<repo>/blobs/...` or `/v2/<repo>/manifests/...` -> `<repo>`.
fn repository_of(path: &str) -> Option<&str> {
    let rest = path.strip_prefix("/v2/")?;
    let end = rest.find("/blobs/").or_else(|| rest.find("/manifests/"))?;
    Some(&rest[..end])
}

/// `/v2/<repo>/blobs/uploads/<id>` -> `<id>`.
fn session_id(path: &str) -> Option<usize> {
    let (_, id) = path.rsplit_once("/blobs/uploads/")?;
    id.parse().ok()
}

fn split_manifest_path(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix("/v2/")?;
    rest.split_once("/manifests/")
}

fn respond_json(request: Request, status: u16, body: String) {
    let response = Response::from_string(body)
        .with_status_code(status)
        .with_header(Header::from_bytes("Content-Type", "application/json").unwrap());
    let _ = request.respond(response);
}

//! Common test utilities shared across integration tests.

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bundlerun::{BundleRef, Credential, GithubArchiveFetcher, GithubConfig, RepoRef};
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::TcpListener;

pub const TOKEN: &str = "test-token";

/// Build an in-memory zip with every entry under `root/`.
///
/// Entries ending in `.sh` or `.py` are marked executable.
pub fn zip_bundle(root: &str, files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let dir_options = zip::write::SimpleFileOptions::default();
    writer.add_directory(format!("{}/", root), dir_options).unwrap();
    for (name, content) in files {
        let mode = if name.ends_with(".sh") || name.ends_with(".py") {
            0o755
        } else {
            0o644
        };
        let options = zip::write::SimpleFileOptions::default().unix_permissions(mode);
        writer
            .start_file(format!("{}/{}", root, name), options)
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// How the fake archive API answers.
#[derive(Clone)]
pub enum Reply {
    /// 200 with the zip body and `Content-Disposition: attachment; filename=<name>`.
    Archive { filename: String, body: Vec<u8> },
    /// 200 with the zip body and no `Content-Disposition` header.
    NoDisposition(Vec<u8>),
    /// Bare status code.
    Status(StatusCode),
}

struct ServerState {
    reply: Reply,
    hits: AtomicUsize,
    last_path: std::sync::Mutex<Option<String>>,
}

/// A local stand-in for the archive API, bound to an ephemeral port.
pub struct ArchiveServer {
    pub addr: SocketAddr,
    state: Arc<ServerState>,
}

impl ArchiveServer {
    pub async fn start(reply: Reply) -> Self {
        let state = Arc::new(ServerState {
            reply,
            hits: AtomicUsize::new(0),
            last_path: std::sync::Mutex::new(None),
        });
        let router = Router::new()
            .route("/repos/{owner}/{name}/zipball", get(zipball))
            .route("/repos/{owner}/{name}/zipball/{git_ref}", get(zipball_at_ref))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Fetcher pointed at this server.
    pub fn fetcher(&self) -> GithubArchiveFetcher {
        GithubArchiveFetcher::new(GithubConfig::default().with_api_url(self.url())).unwrap()
    }

    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    pub fn last_path(&self) -> Option<String> {
        self.state.last_path.lock().unwrap().clone()
    }
}

pub fn bundle() -> BundleRef {
    BundleRef::new(RepoRef::new("acme", "flows"), Credential::new(TOKEN))
}

async fn zipball(
    State(state): State<Arc<ServerState>>,
    Path((owner, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    respond(&state, format!("/repos/{}/{}/zipball", owner, name), &headers)
}

async fn zipball_at_ref(
    State(state): State<Arc<ServerState>>,
    Path((owner, name, git_ref)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    respond(
        &state,
        format!("/repos/{}/{}/zipball/{}", owner, name, git_ref),
        &headers,
    )
}

fn respond(state: &ServerState, path: String, headers: &HeaderMap) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    *state.last_path.lock().unwrap() = Some(path);

    let expected = format!("token {}", TOKEN);
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if auth != Some(expected.as_str()) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    match &state.reply {
        Reply::Archive { filename, body } => (
            [(
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={}", filename),
            )],
            body.clone(),
        )
            .into_response(),
        Reply::NoDisposition(body) => body.clone().into_response(),
        Reply::Status(status) => status.into_response(),
    }
}

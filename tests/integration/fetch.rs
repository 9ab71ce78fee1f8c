//! Archive download tests against a local archive API.

use crate::common::{self, ArchiveServer, Reply};
use axum::http::StatusCode;
use bundlerun::{
    ArchiveSource, BundleRef, Credential, GithubArchiveFetcher, GithubConfig, RepoRef, TaskError,
};
use std::time::Duration;

/// Test: the body and declared filename come back untouched.
#[tokio::test]
async fn test_fetch_returns_bytes_and_filename() {
    let body = common::zip_bundle("acme-flows-1a2b3c4", &[("flow.py", "print('OK')\n")]);
    let server = ArchiveServer::start(Reply::Archive {
        filename: "acme-flows-1a2b3c4.zip".into(),
        body: body.clone(),
    })
    .await;

    let archive = server.fetcher().fetch(&common::bundle()).await.unwrap();

    assert_eq!(archive.filename(), "acme-flows-1a2b3c4.zip");
    assert_eq!(archive.bytes(), body.as_slice());
    assert_eq!(server.last_path().as_deref(), Some("/repos/acme/flows/zipball"));
}

/// Test: a pinned ref is appended to the zipball path.
#[tokio::test]
async fn test_fetch_at_ref() {
    let server = ArchiveServer::start(Reply::Archive {
        filename: "acme-flows-v1.zip".into(),
        body: common::zip_bundle("acme-flows-v1", &[]),
    })
    .await;
    let bundle = common::bundle().with_git_ref("v1.2.0");

    server.fetcher().fetch(&bundle).await.unwrap();

    assert_eq!(
        server.last_path().as_deref(),
        Some("/repos/acme/flows/zipball/v1.2.0")
    );
}

/// Test: a response without Content-Disposition cannot be named.
#[tokio::test]
async fn test_missing_content_disposition_is_metadata_error() {
    let server =
        ArchiveServer::start(Reply::NoDisposition(common::zip_bundle("x", &[]))).await;

    let err = server.fetcher().fetch(&common::bundle()).await.unwrap_err();

    match err {
        TaskError::ArchiveMetadata { repo } => assert_eq!(repo, "acme/flows"),
        other => panic!("Expected ArchiveMetadata, got {:?}", other),
    }
}

/// Test: a missing repository surfaces the HTTP status.
#[tokio::test]
async fn test_not_found_is_fetch_error_with_status() {
    let server = ArchiveServer::start(Reply::Status(StatusCode::NOT_FOUND)).await;

    let err = server.fetcher().fetch(&common::bundle()).await.unwrap_err();

    assert_eq!(err.kind(), "fetch");
    match err {
        TaskError::Fetch { status, .. } => assert_eq!(status, Some(404)),
        other => panic!("Expected Fetch, got {:?}", other),
    }
}

/// Test: the credential is sent as a token authorization header.
#[tokio::test]
async fn test_wrong_credential_is_rejected() {
    let server = ArchiveServer::start(Reply::Archive {
        filename: "x.zip".into(),
        body: common::zip_bundle("x", &[]),
    })
    .await;
    let bundle = BundleRef::new(RepoRef::new("acme", "flows"), Credential::new("wrong"));

    let err = server.fetcher().fetch(&bundle).await.unwrap_err();

    assert!(matches!(err, TaskError::Fetch { status: Some(401), .. }));
    assert!(!err.to_string().contains("wrong"));
}

/// Test: an unreachable API is a fetch error without a status.
#[tokio::test]
async fn test_unreachable_api_is_fetch_error() {
    // Grab a free port, then close it again.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let fetcher = GithubArchiveFetcher::new(
        GithubConfig::default()
            .with_api_url(format!("http://{}", addr))
            .with_timeout(Duration::from_secs(5)),
    )
    .unwrap();

    let err = fetcher.fetch(&common::bundle()).await.unwrap_err();

    assert!(matches!(err, TaskError::Fetch { status: None, .. }));
    assert!(err.is_transient());
}

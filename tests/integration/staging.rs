//! Download-and-extract tests.

use crate::common::{self, ArchiveServer, Reply};
use bundlerun::{ArchiveSource, RunId, Workspace, WorkspaceState};
use tempfile::TempDir;

/// Test: a downloaded bundle lands under `<dir>/<filename minus .zip>`.
#[tokio::test]
async fn test_fetch_then_extract() {
    let server = ArchiveServer::start(Reply::Archive {
        filename: "X-1.0.zip".into(),
        body: common::zip_bundle(
            "X-1.0",
            &[("flows/flow.py", "print('OK')\n"), ("README.md", "# flows\n")],
        ),
    })
    .await;
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("clone");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("stale.txt"), "old").unwrap();

    let archive = server.fetcher().fetch(&common::bundle()).await.unwrap();
    let mut workspace = Workspace::new(&dir);
    workspace.prepare().await.unwrap();
    let root = workspace.extract(archive).await.unwrap();

    assert_eq!(root, dir.join("X-1.0"));
    assert_eq!(workspace.state(), WorkspaceState::Populated);
    assert_eq!(
        std::fs::read_to_string(root.join("flows/flow.py")).unwrap(),
        "print('OK')\n"
    );
    assert!(root.join("README.md").is_file());
    assert!(!dir.join("stale.txt").exists());
}

/// Test: executable bits survive extraction.
#[cfg(unix)]
#[tokio::test]
async fn test_extract_keeps_executable_bit() {
    use std::os::unix::fs::PermissionsExt;

    let server = ArchiveServer::start(Reply::Archive {
        filename: "X-1.0.zip".into(),
        body: common::zip_bundle("X-1.0", &[("run.sh", "#!/bin/sh\necho OK\n")]),
    })
    .await;
    let tmp = TempDir::new().unwrap();

    let archive = server.fetcher().fetch(&common::bundle()).await.unwrap();
    let mut workspace = Workspace::new(tmp.path().join("clone"));
    workspace.prepare().await.unwrap();
    let root = workspace.extract(archive).await.unwrap();

    let mode = std::fs::metadata(root.join("run.sh"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o111, 0o111);
}

/// Test: concurrent extraction into distinct folders does not interfere.
#[tokio::test]
async fn test_concurrent_extraction_into_distinct_folders() {
    let tmp = TempDir::new().unwrap();
    let first = common::zip_bundle("first-1", &[("flow.py", "first\n")]);
    let second = common::zip_bundle("second-1", &[("flow.py", "second\n")]);

    let stage = |name: &'static str, body: Vec<u8>| {
        let base = tmp.path().to_path_buf();
        async move {
            let mut workspace = Workspace::for_run(&base, &RunId::new());
            workspace.prepare().await.unwrap();
            let archive = bundlerun::FetchedArchive::new(body, format!("{}.zip", name));
            let root = workspace.extract(archive).await.unwrap();
            (workspace.path().to_path_buf(), root)
        }
    };

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let (name, body) = if i % 2 == 0 {
                ("first-1", first.clone())
            } else {
                ("second-1", second.clone())
            };
            tokio::spawn(stage(name, body))
        })
        .collect();

    let mut folders = Vec::new();
    for (i, handle) in handles.into_iter().enumerate() {
        let (folder, root) = handle.await.unwrap();
        let expected = if i % 2 == 0 { "first\n" } else { "second\n" };
        assert_eq!(std::fs::read_to_string(root.join("flow.py")).unwrap(), expected);
        // Only this run's bundle is in its folder.
        assert_eq!(std::fs::read_dir(&folder).unwrap().count(), 1);
        folders.push(folder);
    }
    folders.sort();
    folders.dedup();
    assert_eq!(folders.len(), 4);
}

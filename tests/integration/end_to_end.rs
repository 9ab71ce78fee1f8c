//! End-to-end tests: YAML task definition to reduced output.

use crate::common::{self, ArchiveServer, Reply};
use axum::http::StatusCode;
use bundlerun::{
    BundleTask, ParameterMap, RunOptions, Staging, TaskError, TaskOutput, TaskState, load_task,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const SUMMATION_FLOW: &str = r#"#!/bin/sh
# Usage: flow.sh <verb> --sum=<n>
verb="$1"
shift
for arg in "$@"; do
  case "$arg" in
    --sum=*) sum="${arg#--sum=}" ;;
  esac
done
echo "verb=$verb"
echo "profile=$METAFLOW_PROFILE"
echo "$((sum + 2))"
"#;

fn write_task(dir: &Path, yaml: &str) -> std::path::PathBuf {
    let path = dir.join("task.yaml");
    std::fs::write(&path, yaml).unwrap();
    path
}

async fn summation_server() -> ArchiveServer {
    ArchiveServer::start(Reply::Archive {
        filename: "acme-flows-1a2b3c4.zip".into(),
        body: common::zip_bundle("acme-flows-1a2b3c4", &[("flows/summation.sh", SUMMATION_FLOW)]),
    })
    .await
}

/// Test: a staged flow runs from its extracted bundle with YAML settings.
#[tokio::test]
async fn test_staged_flow_from_yaml() {
    let server = summation_server().await;
    let tmp = TempDir::new().unwrap();
    let clone_folder = tmp.path().join("clone");
    let task_file = write_task(
        tmp.path(),
        &format!(
            r#"
name: summation
flowPath: flows/summation.sh
repoRef: acme/flows
cloneFolder: {}
interpreter: sh
env:
  METAFLOW_PROFILE: metaflow
params:
  sum: 1
github:
  api_url: {}
"#,
            clone_folder.display(),
            server.url()
        ),
    );

    let (config, task) = load_task(&task_file, Some(common::TOKEN)).unwrap();
    let params = config.params.merged_with(&ParameterMap::new().with("sum", 40));
    let run = task.execute(&params, RunOptions::default()).await;

    assert_eq!(server.hits(), 1);
    assert!(run.succeeded(), "run failed: {:?}", run.result);
    let program = clone_folder.join("acme-flows-1a2b3c4/flows/summation.sh");
    assert_eq!(
        run.command.as_deref(),
        Some(format!("sh {} run --sum=40", program.display()).as_str())
    );
    assert_eq!(run.into_result().unwrap(), Some(TaskOutput::Line("42".into())));
}

/// Test: every stdout line is returned when asked for.
#[tokio::test]
async fn test_staged_flow_return_all() {
    let server = summation_server().await;
    let tmp = TempDir::new().unwrap();
    let staging = Staging::new(
        Arc::new(server.fetcher()),
        common::bundle(),
        tmp.path().join("clone"),
    );
    let task = BundleTask::builder("flows/summation.sh")
        .interpreter("sh")
        .env("METAFLOW_PROFILE", "dev")
        .return_all(true)
        .staging(staging)
        .build();

    let options = RunOptions::new().command("resume");
    let run = task
        .execute(&ParameterMap::new().with("sum", 1), options)
        .await;

    assert_eq!(
        run.into_result().unwrap(),
        Some(TaskOutput::Lines(vec![
            "verb=resume".into(),
            "profile=dev".into(),
            "3".into(),
        ]))
    );
}

/// Test: a local program printing OK and exiting 0 succeeds with "OK".
#[tokio::test]
async fn test_local_flow_success() {
    let tmp = TempDir::new().unwrap();
    let program = tmp.path().join("flow.sh");
    std::fs::write(&program, "echo starting\necho OK\n").unwrap();
    let task_file = write_task(
        tmp.path(),
        &format!("flow_path: {}\ninterpreter: sh\n", program.display()),
    );

    let (_, task) = load_task(&task_file, None).unwrap();
    let output = task.run(&ParameterMap::new()).await.unwrap();

    assert_eq!(output, Some(TaskOutput::Line("OK".into())));
}

/// Test: exit code 2 fails the run even though stdout looks fine.
#[tokio::test]
async fn test_local_flow_non_zero_exit() {
    let tmp = TempDir::new().unwrap();
    let program = tmp.path().join("flow.sh");
    std::fs::write(&program, "echo OK\necho 'boom' >&2\nexit 2\n").unwrap();
    let task_file = write_task(
        tmp.path(),
        &format!(
            "flow_path: {}\ninterpreter: sh\nlogStderrOnFailure: true\n",
            program.display()
        ),
    );

    let (_, task) = load_task(&task_file, None).unwrap();
    let run = task.execute(&ParameterMap::new(), RunOptions::default()).await;

    assert_eq!(run.state(), TaskState::Failed);
    assert_eq!(run.exit_code, Some(2));
    let err = run.into_result().unwrap_err();
    assert_eq!(err.exit_code(), Some(2));
    match err {
        TaskError::NonZeroExit {
            code,
            stderr,
            last_output,
        } => {
            assert_eq!(code, 2);
            assert_eq!(stderr.as_deref(), Some("boom"));
            assert_eq!(last_output.as_deref(), Some("OK"));
        }
        other => panic!("Expected NonZeroExit, got {:?}", other),
    }
}

/// Test: a failed download leaves the clone folder as it was.
#[tokio::test]
async fn test_fetch_failure_does_not_touch_clone_folder() {
    let server = ArchiveServer::start(Reply::Status(StatusCode::NOT_FOUND)).await;
    let tmp = TempDir::new().unwrap();
    let clone_folder = tmp.path().join("clone");
    std::fs::create_dir_all(&clone_folder).unwrap();
    std::fs::write(clone_folder.join("previous.txt"), "kept").unwrap();

    let task = BundleTask::builder("flows/summation.sh")
        .staging(Staging::new(
            Arc::new(server.fetcher()),
            common::bundle(),
            &clone_folder,
        ))
        .build();

    let run = task.execute(&ParameterMap::new(), RunOptions::default()).await;

    assert_eq!(
        run.states,
        vec![TaskState::Idle, TaskState::Staging, TaskState::Failed]
    );
    assert!(matches!(run.result, Err(TaskError::Fetch { status: Some(404), .. })));
    assert!(clone_folder.join("previous.txt").exists());
}

/// Test: concurrent staged runs with their own folders do not interfere.
#[tokio::test]
async fn test_concurrent_staged_runs() {
    let server = Arc::new(summation_server().await);
    let tmp = TempDir::new().unwrap();

    let mut handles = Vec::new();
    for i in 0..3 {
        let staging = Staging::new(
            Arc::new(server.fetcher()),
            common::bundle(),
            tmp.path().join(format!("clone-{}", i)),
        );
        let task = BundleTask::builder("flows/summation.sh")
            .interpreter("sh")
            .staging(staging)
            .build();
        handles.push(tokio::spawn(async move {
            task.run(&ParameterMap::new().with("sum", i)).await
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let output = handle.await.unwrap().unwrap();
        assert_eq!(output, Some(TaskOutput::Line((i + 2).to_string())));
    }
    assert_eq!(server.hits(), 3);
}

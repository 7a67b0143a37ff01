//! Initialize / Run / Shutdown through the engine's response streams.

use std::path::Path;
use std::time::Duration;

use tofu_engine::{
    EnginePhase, InitRequest, LogLevel, MetaValue, Metadata, RunRequest, StreamMessage,
    ToolEngine, Transcript,
};

use crate::fixture::ReleaseServer;

fn version_meta(version: &str, install_dir: &Path) -> InitRequest {
    InitRequest {
        metadata: Metadata::new()
            .with("tool_version", MetaValue::Bytes(version.as_bytes().to_vec()))
            .with(
                "tool_install_dir",
                MetaValue::Bytes(install_dir.to_string_lossy().as_bytes().to_vec()),
            ),
    }
}

async fn initialized_engine(server: &ReleaseServer, install_dir: &Path) -> ToolEngine {
    let engine = ToolEngine::new(server.config(install_dir));
    let init = engine
        .initialize(version_meta("v1.9.1", install_dir))
        .collect()
        .await;
    assert_eq!(init.exit_code(), None, "init failed: {:?}", init.messages);
    engine
}

async fn run(engine: &ToolEngine, args: &[&str]) -> Transcript {
    engine
        .run(RunRequest::new("tofu", args.iter().copied()))
        .collect()
        .await
}

#[tokio::test]
async fn test_initialize_explicit_version() {
    let server = ReleaseServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = ToolEngine::new(server.config(dir.path()));

    let init = engine
        .initialize(version_meta("v1.9.1", dir.path()))
        .collect()
        .await;
    assert_eq!(
        init.messages,
        vec![
            StreamMessage::info("Tofu Initialization started"),
            StreamMessage::info("Tofu Initialization completed"),
        ]
    );
    assert_eq!(engine.phase(), EnginePhase::Initialized);
    assert!(engine.executable().unwrap().starts_with(dir.path()));

    let transcript = run(&engine, &["version"]).await;
    assert!(transcript.stdout().contains("OpenTofu v1.9.1"));
    assert!(transcript.stderr().is_empty());
    assert_eq!(transcript.exit_code(), Some(0));
}

#[tokio::test]
async fn test_initialize_uses_configured_default_dir() {
    let server = ReleaseServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = ToolEngine::new(server.config(dir.path()));

    let request = InitRequest {
        metadata: Metadata::new().with("tool_version", "1.8.5"),
    };
    let init = engine.initialize(request).collect().await;
    assert_eq!(init.len(), 2);

    let executable = engine.executable().unwrap();
    assert!(executable.starts_with(dir.path().join("tofu_1.8.5")));
    assert!(run(&engine, &["version"]).await.stdout().contains("OpenTofu v1.8.5"));
}

#[tokio::test]
async fn test_initialize_latest_version() {
    let server = ReleaseServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = ToolEngine::new(server.config(dir.path()));

    let init = engine
        .initialize(version_meta("latest", dir.path()))
        .collect()
        .await;
    assert_eq!(init.len(), 2);

    let transcript = run(&engine, &["version"]).await;
    assert!(transcript.stdout().contains("OpenTofu v"));
    assert_eq!(transcript.exit_code(), Some(0));
}

#[tokio::test]
async fn test_initialize_missing_version() {
    let server = ReleaseServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = ToolEngine::new(server.config(dir.path()));

    let init = engine
        .initialize(version_meta("v0.0.0", dir.path()))
        .collect()
        .await;

    let errors = init.logs(LogLevel::Error);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("failed to download OpenTofu: No such version: 0.0.0"));
    assert_eq!(init.exit_code(), Some(1));
    assert_eq!(engine.phase(), EnginePhase::Uninitialized);
    assert!(engine.executable().is_none());
}

#[tokio::test]
async fn test_failed_reinitialize_drops_previous_binary() {
    let server = ReleaseServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = initialized_engine(&server, dir.path()).await;

    let reinit = engine
        .initialize(version_meta("v0.0.0", dir.path()))
        .collect()
        .await;
    assert_eq!(reinit.exit_code(), Some(1));
    assert_eq!(engine.phase(), EnginePhase::Uninitialized);
    assert!(engine.executable().is_none());
    assert!(engine.selector().is_none());

    let transcript = run(&engine, &["version"]).await;
    assert!(transcript.stdout().is_empty());
    assert!(transcript.stderr().contains("engine initialization failed"));
    assert_eq!(transcript.exit_code(), Some(1));

    // A later successful Initialize recovers the session.
    let init = engine
        .initialize(version_meta("1.8.5", dir.path()))
        .collect()
        .await;
    assert_eq!(init.exit_code(), None);
    assert!(run(&engine, &["version"]).await.stdout().contains("OpenTofu v1.8.5"));
}

#[tokio::test]
async fn test_unknown_subcommand() {
    let server = ReleaseServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = initialized_engine(&server, dir.path()).await;

    let transcript = run(&engine, &["not-a-valid-command"]).await;
    assert!(transcript
        .stderr()
        .contains("OpenTofu has no command named \"not-a-valid-command\""));
    assert_ne!(transcript.exit_code(), Some(0));
    assert!(transcript.exit_code().is_some());
}

#[tokio::test]
async fn test_help_with_no_args() {
    let server = ReleaseServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = initialized_engine(&server, dir.path()).await;

    let transcript = run(&engine, &[]).await;
    assert!(transcript
        .stdout()
        .contains("Usage: tofu [global options] <subcommand> [args]"));
    assert_eq!(transcript.exit_code(), Some(0));
}

#[tokio::test]
async fn test_env_overlay_and_working_dir() {
    let server = ReleaseServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    let engine = initialized_engine(&server, dir.path()).await;

    let transcript = engine
        .run(RunRequest::new("tofu", ["env"]).env("TF_VAR_test_var", "test_value_42"))
        .collect()
        .await;
    assert_eq!(transcript.stdout(), "TF_VAR_test_var=test_value_42\n");

    let project_dir = project.path().canonicalize().unwrap();
    let transcript = engine
        .run(RunRequest::new("tofu", ["pwd"]).working_dir(project_dir.to_string_lossy()))
        .collect()
        .await;
    assert_eq!(transcript.stdout().trim_end(), project_dir.to_string_lossy());
}

#[tokio::test]
async fn test_interleaved_output_through_engine() {
    let server = ReleaseServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = initialized_engine(&server, dir.path()).await;

    let transcript = run(&engine, &["noise"]).await;

    let expected_out: String = (0..5000).map(|i| format!("out-{}\n", i)).collect();
    let expected_err: String = (0..5000).map(|i| format!("err-{}\n", i)).collect();
    assert_eq!(transcript.stdout(), expected_out);
    assert_eq!(transcript.stderr(), expected_err);
    assert!(transcript.messages.last().unwrap().is_exit());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_runs_share_session() {
    let server = ReleaseServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = initialized_engine(&server, dir.path()).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .run(RunRequest::new("tofu", ["env"]).env("TF_VAR_test_var", i.to_string()))
                .collect()
                .await
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let transcript = handle.await.unwrap();
        assert_eq!(transcript.stdout(), format!("TF_VAR_test_var={}\n", i));
        assert_eq!(transcript.exit_code(), Some(0));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_initialize_same_version() {
    let server = ReleaseServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let first = ToolEngine::new(server.config(dir.path()));
    let second = ToolEngine::new(server.config(dir.path()));

    let (a, b) = tokio::join!(
        first.initialize(version_meta("1.9.1", dir.path())).collect(),
        second.initialize(version_meta("1.9.1", dir.path())).collect(),
    );
    assert_eq!(a.len(), 2);
    assert_eq!(b.len(), 2);
    assert_eq!(first.executable(), second.executable());

    let transcript = run(&second, &["version"]).await;
    assert!(transcript.stdout().contains("OpenTofu v1.9.1"));
}

#[tokio::test]
async fn test_shutdown_ends_session() {
    let server = ReleaseServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = initialized_engine(&server, dir.path()).await;

    let shutdown = engine.shutdown().collect().await;
    assert_eq!(
        shutdown.messages,
        vec![
            StreamMessage::info("Tofu Shutdown completed"),
            StreamMessage::exit(0),
        ]
    );
    assert_eq!(engine.phase(), EnginePhase::Terminated);

    let transcript = run(&engine, &["version"]).await;
    assert!(transcript.stdout().is_empty());
    assert_eq!(transcript.exit_code(), Some(1));
}

#[tokio::test]
async fn test_shutdown_during_initialize_is_final() {
    let server = ReleaseServer::start_with_listing_delay(Duration::from_millis(500)).await;
    let dir = tempfile::tempdir().unwrap();
    let engine = ToolEngine::new(server.config(dir.path()));

    let init = engine.initialize(version_meta("latest", dir.path()));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let shutdown = engine.shutdown().collect().await;
    assert_eq!(shutdown.exit_code(), Some(0));
    assert_eq!(engine.phase(), EnginePhase::Terminated);

    let init = init.collect().await;
    assert_eq!(server.listings(), 1);
    assert_eq!(init.exit_code(), Some(1));
    assert!(init.logs(LogLevel::Error)[0].contains("engine is terminated"));
    assert_eq!(engine.phase(), EnginePhase::Terminated);
    assert!(engine.executable().is_none());

    let transcript = run(&engine, &["version"]).await;
    assert!(transcript.stdout().is_empty());
    assert_eq!(transcript.stderr(), "engine is terminated\n");
    assert_eq!(transcript.exit_code(), Some(1));
}

#[tokio::test]
async fn test_dropping_stream_cancels_run() {
    let server = ReleaseServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = initialized_engine(&server, dir.path()).await;

    let mut stream = engine.run(RunRequest::new("tofu", ["noise"]));
    let first = stream.recv().await.unwrap();
    assert!(matches!(first, StreamMessage::Output { .. }));
    drop(stream);

    // The session stays usable for later calls.
    let transcript = run(&engine, &["version"]).await;
    assert_eq!(transcript.exit_code(), Some(0));
}

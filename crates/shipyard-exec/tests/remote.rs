#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use shipyard_exec::{Command, CommandExecutor, ExecError, MemorySink, SshExecutor, Verbosity};

mod support;

use support::{DEPLOY_KEY, INTRUDER_KEY, TestServer};

fn ssh(verbosity: Verbosity) -> (SshExecutor, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new(verbosity));
    let executor = SshExecutor::new(sink.clone()).with_connect_timeout(Duration::from_secs(5));
    (executor, sink)
}

#[tokio::test]
async fn test_echo_streams_into_sink_and_output() {
    let server = TestServer::start().await;
    let node = Arc::new(server.node("web1", DEPLOY_KEY));
    let (executor, sink) = ssh(Verbosity::Normal);

    let result = executor
        .run(&Command::new("echo hello").on(node))
        .await
        .unwrap();

    assert!(result.success());
    assert!(result.output.ends_with("hello\n"));

    // the sink saw the Run line, then exactly the bytes that were captured
    let contents = sink.contents();
    let run_line = format!("[web1:{}] Run: echo hello\n", std::process::id());
    assert!(contents.starts_with(&run_line));
    assert_eq!(&contents[run_line.len()..], result.output);

    assert!(server.wait_until_idle().await, "session left open");
}

#[tokio::test]
async fn test_stdout_and_stderr_share_one_buffer() {
    let server = TestServer::start().await;
    let node = Arc::new(server.node("web1", DEPLOY_KEY));
    let (executor, sink) = ssh(Verbosity::Normal);

    let command = Command::new(["echo out", "sleep 0.2", "echo err >&2"]).on(node);
    let result = executor.run(&command).await.unwrap();

    assert!(result.output.ends_with("out\nerr\n"));
    assert!(sink.contents().ends_with(&result.output));
}

#[tokio::test]
async fn test_nonzero_exit_is_not_an_error() {
    let server = TestServer::start().await;
    let node = Arc::new(server.node("web1", DEPLOY_KEY));
    let (executor, _) = ssh(Verbosity::Normal);

    let result = executor.run(&Command::new("exit 3").on(node)).await.unwrap();

    assert_eq!(result.exit_code, 3);
    assert!(!result.success());
}

#[tokio::test]
async fn test_cwd_and_quoting_survive_the_wire() {
    let server = TestServer::start().await;
    let node = Arc::new(server.node("web1", DEPLOY_KEY));
    let (executor, _) = ssh(Verbosity::Normal);

    let command = Command::new(r#"echo "$(basename "$PWD")" '$HOME'"#)
        .cwd(server.remote_root().display().to_string())
        .on(node);
    let result = executor.run(&command).await.unwrap();

    let dir_name = server
        .remote_root()
        .file_name()
        .unwrap()
        .to_string_lossy()
        .into_owned();
    assert_eq!(
        result.output.lines().last(),
        Some(format!("{dir_name} $HOME").as_str())
    );
}

#[tokio::test]
async fn test_timeout_closes_session() {
    let server = TestServer::start().await;
    let node = Arc::new(server.node("web1", DEPLOY_KEY));
    let (executor, _) = ssh(Verbosity::Normal);

    let command = Command::new("sleep 5")
        .timeout(Duration::from_millis(200))
        .on(node);
    let result = executor.run(&command).await;

    match result {
        Err(ExecError::Timeout { timeout }) => assert_eq!(timeout, Duration::from_millis(200)),
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(server.wait_until_idle().await, "session left open after timeout");
}

#[tokio::test]
async fn test_rejected_key_is_authentication_error() {
    let server = TestServer::start().await;
    let node = Arc::new(server.node("web1", INTRUDER_KEY));
    let (executor, sink) = ssh(Verbosity::Normal);

    let err = executor
        .run(&Command::new("uptime").on(node))
        .await
        .unwrap_err();

    assert!(!err.is_retryable());
    match err {
        ExecError::Authentication { node, .. } => assert_eq!(node, "web1"),
        other => panic!("expected authentication error, got {other:?}"),
    }
    // only the Run line was written
    assert_eq!(sink.contents().lines().count(), 1);
    assert!(server.wait_until_idle().await, "half-open session left behind");
}

#[tokio::test]
async fn test_missing_key_file_is_authentication_error() {
    let server = TestServer::start().await;
    let node = Arc::new(
        server
            .node("web1", DEPLOY_KEY)
            .with_private_key("/nonexistent/id_ed25519"),
    );
    let (executor, _) = ssh(Verbosity::Normal);

    let result = executor.run(&Command::new("uptime").on(node)).await;

    assert!(matches!(result, Err(ExecError::Authentication { .. })));
    assert!(server.wait_until_idle().await);
}

#[tokio::test]
async fn test_role_members_run_independently() {
    let server = TestServer::start().await;
    let web1 = Arc::new(server.node("web1", DEPLOY_KEY));
    let web2 = Arc::new(server.node("web2", DEPLOY_KEY));
    let (executor, _) = ssh(Verbosity::Normal);
    let command = Command::new("echo $((20 + 22))");

    let cmd_web1 = command.clone().on(web1);
    let cmd_web2 = command.clone().on(web2);
    let (first, second) = tokio::join!(executor.run(&cmd_web1), executor.run(&cmd_web2),);

    assert_eq!(first.unwrap().output.lines().last(), Some("42"));
    assert_eq!(second.unwrap().output.lines().last(), Some("42"));
    assert!(server.wait_until_idle().await);
}

//! Upload broker: pipe an HTTP request body straight into
//! the workspace of a running "waiter" container via the orchestrator's
//! exec subresource, then signal the waiter that the upload is done.

use futures::{AsyncReadExt, AsyncWriteExt, StreamExt};
use k8s_openapi::api::core::v1::{ContainerState, Pod};
use kube::api::{AttachParams, Api};
use thiserror::Error;

use automotive_build_utils::constants::{SOURCE_LOCAL_CONTAINER_SUBSTR, WORKSPACE_SOURCE_PATH};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("source waiter not running, retry")]
    WaiterNotReady,

    #[error("tar extraction failed: {0}")]
    TarFailed(String),

    #[error("waiter done failed: {0}")]
    DoneFailed(String),

    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error("io error piping upload: {0}")]
    Io(#[from] std::io::Error),
}

/// A waiter container located inside a pod, ready to receive a tar stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaiterContainer {
    pub pod_name: String,
    pub container_name: String,
    pub lock_file: Option<String>,
}

/// Find the first container (regular or init) whose name contains
/// `source-local` and whose state is `Running`.
#[must_use]
pub fn find_waiter_container(pod: &Pod) -> Option<WaiterContainer> {
    let pod_name = pod.metadata.name.clone()?;
    let status = pod.status.as_ref()?;

    let candidates = status
        .container_statuses
        .iter()
        .flatten()
        .chain(status.init_container_statuses.iter().flatten());

    for container_status in candidates {
        if !container_status.name.contains(SOURCE_LOCAL_CONTAINER_SUBSTR) {
            continue;
        }
        if !is_running(container_status.state.as_ref()) {
            continue;
        }
        let lock_file = pod
            .spec
            .as_ref()
            .and_then(|spec| {
                spec.containers
                    .iter()
                    .chain(spec.init_containers.iter().flatten())
                    .find(|c| c.name == container_status.name)
            })
            .and_then(|c| c.command.as_ref())
            .and_then(|cmd| parse_lock_file_flag(cmd));

        return Some(WaiterContainer {
            pod_name: pod_name.clone(),
            container_name: container_status.name.clone(),
            lock_file,
        });
    }
    None
}

fn is_running(state: Option<&ContainerState>) -> bool {
    state.and_then(|s| s.running.as_ref()).is_some()
}

/// Parse `--lock-file=PATH` or `--lock-file PATH` out of a container's
/// command-line (appending `--lock-file=<path>`).
#[must_use]
pub fn parse_lock_file_flag(command: &[String]) -> Option<String> {
    for (idx, token) in command.iter().enumerate() {
        if let Some(value) = token.strip_prefix("--lock-file=") {
            return Some(value.to_string());
        }
        if token == "--lock-file" {
            return command.get(idx + 1).cloned();
        }
    }
    None
}

/// Phase 1 + phase 2 of the broker: exec `tar -x` with `body` as stdin, then
/// exec `waiter done`.
pub async fn deliver_upload(
    pods: &Api<Pod>,
    waiter: &WaiterContainer,
    mut body: impl futures::AsyncRead + Unpin,
) -> Result<(), UploadError> {
    let tar_command = vec![
        "tar".to_string(),
        "--no-same-permissions".to_string(),
        "--no-same-owner".to_string(),
        "-xf".to_string(),
        "-".to_string(),
        "-C".to_string(),
        WORKSPACE_SOURCE_PATH.to_string(),
    ];

    let params = AttachParams::default()
        .container(waiter.container_name.clone())
        .stdin(true)
        .stdout(true)
        .stderr(true);

    let mut process = pods.exec(&waiter.pod_name, tar_command, &params).await?;
    if let Some(mut stdin) = process.stdin() {
        futures::io::copy(&mut body, &mut stdin).await?;
        stdin.close().await.ok();
    }

    let mut stderr_buf = String::new();
    if let Some(mut stderr) = process.stderr() {
        stderr.read_to_string(&mut stderr_buf).await.ok();
    }

    let status = match process.take_status() {
        Some(fut) => fut.await,
        None => None,
    };
    process.join().await?;
    if let Some(status) = status {
        if status.status.as_deref() != Some("Success") {
            return Err(UploadError::TarFailed(stderr_buf));
        }
    }

    run_waiter_done(pods, waiter).await
}

async fn run_waiter_done(pods: &Api<Pod>, waiter: &WaiterContainer) -> Result<(), UploadError> {
    let mut done_command = vec!["waiter".to_string(), "done".to_string()];
    if let Some(lock_file) = &waiter.lock_file {
        done_command.push(format!("--lock-file={lock_file}"));
    }

    let params = AttachParams::default()
        .container(waiter.container_name.clone())
        .stdout(true)
        .stderr(true);

    let mut process = pods.exec(&waiter.pod_name, done_command, &params).await?;
    let mut stderr_buf = String::new();
    if let Some(mut stderr) = process.stderr() {
        stderr.read_to_string(&mut stderr_buf).await.ok();
    }
    let status = match process.take_status() {
        Some(fut) => fut.await,
        None => None,
    };
    process.join().await?;
    if let Some(status) = status {
        if status.status.as_deref() != Some("Success") {
            return Err(UploadError::DoneFailed(stderr_buf));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_equals_form() {
        let command = vec!["waiter".to_string(), "--lock-file=/tmp/x.lock".to_string()];
        assert_eq!(parse_lock_file_flag(&command), Some("/tmp/x.lock".to_string()));
    }

    #[test]
    fn parses_space_separated_form() {
        let command = vec![
            "waiter".to_string(),
            "--lock-file".to_string(),
            "/tmp/y.lock".to_string(),
        ];
        assert_eq!(parse_lock_file_flag(&command), Some("/tmp/y.lock".to_string()));
    }

    #[test]
    fn missing_flag_is_not_an_error() {
        let command = vec!["waiter".to_string()];
        assert_eq!(parse_lock_file_flag(&command), None);
    }
}

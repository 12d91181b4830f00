//! Artifact streaming: once a build is `Completed`, open a stream from its
//! artifact pod (sleep-forever, PVC mounted read-only) and forward it
//! verbatim.

use automotive_build_types::{ImageBuildPhase, ImageBuildStatus};
use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
};
use futures::{AsyncReadExt, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams};

use crate::error::ApiError;

/// Guess a content type from the artifact's file extension, falling back to
/// the generic octet-stream.
fn content_type_for(file_name: &str) -> &'static str {
    if file_name.ends_with(".tar.gz") || file_name.ends_with(".tgz") {
        "application/gzip"
    } else if file_name.ends_with(".tar") {
        "application/x-tar"
    } else {
        "application/octet-stream"
    }
}

/// Open and forward the artifact stored on the artifact pod's workspace PVC
/// by `cat`-ing it through an exec session (the pod has no HTTP server of
/// its own — same "sleep forever, exec to reach the filesystem" idiom the
/// reconciler uses to deliver uploads in reverse).
pub async fn stream(pods: &Api<Pod>, pod_name: &str, status: &ImageBuildStatus) -> Result<Response, ApiError> {
    if status.phase != ImageBuildPhase::Completed {
        return Err(ApiError::Upstream("build has not completed yet".to_string()));
    }
    let file_name = status
        .artifact_file_name
        .clone()
        .ok_or_else(|| ApiError::Internal("completed build is missing an artifactFileName".to_string()))?;

    let params = AttachParams::default().stdout(true).stderr(true);
    let command = vec![
        "cat".to_string(),
        format!("/workspace/source/{file_name}"),
    ];
    let mut process = pods.exec(pod_name, command, &params).await?;

    let mut stdout = process.stdout().ok_or_else(|| ApiError::Internal("artifact pod exec had no stdout".to_string()))?;
    let (tx, rx) = tokio::sync::mpsc::channel::<axum::body::Bytes>(16);
    tokio::spawn(async move {
        let mut buf = [0u8; 64 * 1024];
        loop {
            match stdout.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(axum::body::Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        process.join().await.ok();
    });

    let body = Body::from_stream(futures::stream::poll_fn(move |cx| {
        rx.poll_recv(cx).map(|opt| opt.map(Ok::<_, std::io::Error>))
    }));

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type_for(&file_name)));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{file_name}\""))
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );
    headers.insert("x-aib-artifact-type", HeaderValue::from_static("disk-image"));
    if file_name.ends_with(".tar") || file_name.ends_with(".tar.gz") {
        headers.insert("x-aib-archive-root", HeaderValue::from_static("."));
    }

    Ok((headers, body).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_gzip_content_type_for_tar_gz() {
        assert_eq!(content_type_for("disk.tar.gz"), "application/gzip");
    }

    #[test]
    fn falls_back_to_octet_stream() {
        assert_eq!(content_type_for("disk.qcow2"), "application/octet-stream");
    }
}

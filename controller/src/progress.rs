//! Progress aggregation: combine per-task progress markers
//! with the build's phase into a stable `(stage, done, total)` step, and
//! cache the extracted per-pipeline-run marker list to absorb polling
//! bursts.

use std::time::Duration;

use automotive_build_types::{BuildMode, ImageBuildPhase, ImageBuildSpec};
use chrono::{DateTime, Utc};
use moka::sync::Cache;
use serde::{Deserialize, Serialize};

/// A parsed `automotive.sdv.cloud.redhat.com/progress` annotation value of
/// the form `"<stage>|<done>|<total>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMarker {
    pub task_name: String,
    pub pod_start_time: DateTime<Utc>,
    pub stage: String,
    pub done: u64,
    pub total: u64,
}

/// What a single worker pod contributes, whether or not it carries an
/// explicit marker annotation.
#[derive(Debug, Clone)]
pub enum PodObservation {
    Marker(TaskMarker),
    /// `Running` with no marker: synthesize a `0/1`.
    RunningNoMarker {
        task_name: String,
        pod_start_time: DateTime<Utc>,
    },
    /// `Succeeded` with no marker: synthesize a `1/1`.
    SucceededNoMarker {
        task_name: String,
        pod_start_time: DateTime<Utc>,
    },
}

impl PodObservation {
    fn pod_start_time(&self) -> DateTime<Utc> {
        match self {
            Self::Marker(m) => m.pod_start_time,
            Self::RunningNoMarker { pod_start_time, .. }
            | Self::SucceededNoMarker { pod_start_time, .. } => *pod_start_time,
        }
    }

    fn into_marker(self) -> TaskMarker {
        match self {
            Self::Marker(m) => m,
            Self::RunningNoMarker { task_name, pod_start_time } => TaskMarker {
                stage: human_readable_stage(&task_name),
                done: 0,
                total: 1,
                task_name,
                pod_start_time,
            },
            Self::SucceededNoMarker { task_name, pod_start_time } => TaskMarker {
                stage: human_readable_stage(&task_name),
                done: 1,
                total: 1,
                task_name,
                pod_start_time,
            },
        }
    }
}

/// Parse a raw `"<stage>|<done>|<total>"` annotation value. Malformed
/// annotations are ignored.
#[must_use]
pub fn parse_marker_annotation(raw: &str) -> Option<(String, u64, u64)> {
    let mut parts = raw.splitn(3, '|');
    let stage = parts.next()?.to_string();
    let done: u64 = parts.next()?.parse().ok()?;
    let total: u64 = parts.next()?.parse().ok()?;
    Some((stage, done, total))
}

fn human_readable_stage(task_name: &str) -> String {
    match task_name {
        "push-disk-artifact" => "Pushing artifact".to_string(),
        "flash-image" => "Flashing device".to_string(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressStep {
    pub stage: String,
    pub done: u64,
    pub total: u64,
}

/// The build-derived estimate used when no marker has reported a non-zero
/// total yet.
#[must_use]
pub fn estimate_total(spec: &ImageBuildSpec, cluster_registry_route_exists: bool) -> u64 {
    let mut total: u64 = 3; // preparing, building, finalizing

    let bootc_or_disk = matches!(spec.mode, BuildMode::Bootc | BuildMode::Disk);
    if bootc_or_disk && spec.builder_image.is_none() && cluster_registry_route_exists {
        total += 2;
    } else if bootc_or_disk && spec.builder_image.is_some() {
        total += 1;
    }
    if spec.container_push.is_some() && matches!(spec.mode, BuildMode::Bootc) {
        total += 1;
    }
    if spec.build_disk_image || matches!(spec.mode, BuildMode::Image | BuildMode::Package | BuildMode::Disk) {
        total += 1;
    }
    total
}

/// Combine a build's phase with its observed task markers into the step the
/// client will see.
#[must_use]
pub fn aggregate(
    phase: ImageBuildPhase,
    spec: &ImageBuildSpec,
    observations: Vec<PodObservation>,
    push_task_exists: bool,
    flash_task_exists: bool,
    cluster_registry_route_exists: bool,
) -> ProgressStep {
    let mut markers: Vec<TaskMarker> = observations
        .into_iter()
        .map(PodObservation::into_marker)
        .collect();
    markers.sort_by_key(|m| m.pod_start_time);

    let active_stage = markers.last().map(|m| m.stage.clone());
    let combined_done: u64 = markers.iter().map(|m| m.done).sum();
    let mut combined_total: u64 = markers.iter().map(|m| m.total).sum();

    if combined_total == 0 {
        combined_total = estimate_total(spec, cluster_registry_route_exists);
    }

    let reported_push = markers.iter().any(|m| m.task_name == "push-disk-artifact");
    let reported_flash = markers.iter().any(|m| m.task_name == "flash-image");
    if push_task_exists && !reported_push {
        combined_total += 1;
    }
    if flash_task_exists && !reported_flash {
        combined_total += 1;
    }

    match phase {
        ImageBuildPhase::Empty | ImageBuildPhase::Pending | ImageBuildPhase::Uploading => {
            ProgressStep {
                stage: "Waiting to start".to_string(),
                done: 0,
                total: combined_total,
            }
        }
        ImageBuildPhase::Building | ImageBuildPhase::Running => {
            if let Some(stage) = active_stage {
                ProgressStep {
                    stage,
                    done: combined_done.min(combined_total),
                    total: combined_total,
                }
            } else {
                ProgressStep {
                    stage: "Starting build".to_string(),
                    done: 0,
                    total: combined_total,
                }
            }
        }
        ImageBuildPhase::Pushing => ProgressStep {
            stage: "Pushing artifact".to_string(),
            done: combined_done.min(combined_total),
            total: combined_total,
        },
        ImageBuildPhase::Flashing => {
            let done = if reported_push {
                combined_done + 1
            } else {
                combined_done
            };
            ProgressStep {
                stage: "Flashing device".to_string(),
                done: done.min(combined_total),
                total: combined_total,
            }
        }
        ImageBuildPhase::Completed => ProgressStep {
            stage: "Complete".to_string(),
            done: combined_total,
            total: combined_total,
        },
        ImageBuildPhase::Failed => ProgressStep {
            stage: active_stage.unwrap_or_else(|| "Failed".to_string()),
            done: 0,
            total: combined_total,
        },
    }
}

/// Clamp a client-observed progress step so `done`/`total` never decrease.
/// Pure state-tracking; the server-side cache below is a separate, unrelated
/// concern.
#[derive(Debug, Default, Clone)]
pub struct MonotonicProgress {
    highest_done: u64,
    highest_total: u64,
}

impl MonotonicProgress {
    #[must_use]
    pub fn observe(&mut self, step: ProgressStep) -> ProgressStep {
        self.highest_done = self.highest_done.max(step.done);
        self.highest_total = self.highest_total.max(step.total);
        ProgressStep {
            stage: step.stage,
            done: self.highest_done,
            total: self.highest_total,
        }
    }
}

/// Per-pipeline-run marker cache: 10-second TTL, bounded to 256 entries.
/// `moka` evicts on its own schedule.
pub struct ProgressCache {
    inner: Cache<String, Vec<TaskMarker>>,
}

impl Default for ProgressCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(256)
                .time_to_live(Duration::from_secs(10))
                .build(),
        }
    }

    #[must_use]
    pub fn get(&self, pipeline_run_name: &str) -> Option<Vec<TaskMarker>> {
        self.inner.get(pipeline_run_name)
    }

    pub fn insert(&self, pipeline_run_name: String, markers: Vec<TaskMarker>) {
        self.inner.insert(pipeline_run_name, markers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use automotive_build_types::BuildMode;

    fn minimal_spec(mode: BuildMode) -> ImageBuildSpec {
        ImageBuildSpec {
            mode,
            distro: "autosd".to_string(),
            target: "qemu".to_string(),
            architecture: Some("amd64".to_string()),
            export_format: "qcow2".to_string(),
            manifest: Some("content: {}".to_string()),
            manifest_file_name: None,
            container_ref: None,
            container_push: None,
            export_oci: None,
            build_disk_image: false,
            builder_image: None,
            storage_class: None,
            custom_defs: vec![],
            aib_extra_args: vec![],
            publishers: vec![],
            serve_artifact: false,
            input_files_server: false,
            flash_enabled: false,
        }
    }

    #[test]
    fn parses_well_formed_annotation() {
        assert_eq!(
            parse_marker_annotation("building|2|5"),
            Some(("building".to_string(), 2, 5))
        );
    }

    #[test]
    fn ignores_malformed_annotation() {
        assert_eq!(parse_marker_annotation("not-a-marker"), None);
        assert_eq!(parse_marker_annotation("stage|notanumber|5"), None);
    }

    #[test]
    fn estimate_adds_builder_prep_without_explicit_builder_image() {
        let spec = minimal_spec(BuildMode::Bootc);
        assert_eq!(estimate_total(&spec, true), 5);
    }

    #[test]
    fn estimate_adds_only_pull_with_explicit_builder_image() {
        let mut spec = minimal_spec(BuildMode::Bootc);
        spec.builder_image = Some("quay.io/org/builder:latest".to_string());
        assert_eq!(estimate_total(&spec, true), 4);
    }

    #[test]
    fn pending_phase_is_waiting_to_start_with_zero_done() {
        let spec = minimal_spec(BuildMode::Bootc);
        let step = aggregate(ImageBuildPhase::Pending, &spec, vec![], false, false, true);
        assert_eq!(step.stage, "Waiting to start");
        assert_eq!(step.done, 0);
    }

    #[test]
    fn completed_phase_is_full_bar() {
        let spec = minimal_spec(BuildMode::Bootc);
        let step = aggregate(ImageBuildPhase::Completed, &spec, vec![], false, false, true);
        assert_eq!(step.done, step.total);
    }

    #[test]
    fn monotonic_progress_never_decreases() {
        let mut tracker = MonotonicProgress::default();
        let first = tracker.observe(ProgressStep {
            stage: "building".to_string(),
            done: 3,
            total: 5,
        });
        assert_eq!((first.done, first.total), (3, 5));
        let second = tracker.observe(ProgressStep {
            stage: "building".to_string(),
            done: 1,
            total: 4,
        });
        assert_eq!((second.done, second.total), (3, 5));
    }
}

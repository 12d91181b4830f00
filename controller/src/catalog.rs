//! Catalog reconciler: phase-driven registry verification
//! with periodic re-check, metadata extraction, audit events, and
//! duplicate-URL enforcement.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::{Event as AuditEvent, EventType, Recorder, Reporter};
use kube::runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube::{Client, Resource, ResourceExt};
use prometheus::{HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry};

use automotive_build_registry::auth::to_registry_auth;
use automotive_build_registry::{CircuitBreakerClient, CircuitState, RegistryAuth, RegistryClient};
use automotive_build_types::{CatalogImage, CatalogImageMetadata, CatalogImagePhase, FINALIZER};
use automotive_build_utils::constants::{LABEL_ARCHITECTURE, LABEL_BOOTC, LABEL_DISTRO, LABEL_SOURCE_TYPE, LABEL_TARGET};
use automotive_build_utils::secret::{parse_docker_config_json, parse_generic_secret};

use crate::error::ReconcileError;

pub const UNAVAILABLE_RETRY: Duration = Duration::from_secs(5 * 60);

/// Derive the labels a `Pending` CatalogImage is tagged with from its
/// metadata block (`Pending`: compute labels from
/// `Metadata`).
#[must_use]
pub fn labels_from_metadata(metadata: &CatalogImageMetadata) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    if let Some(arch) = &metadata.architecture {
        labels.insert(LABEL_ARCHITECTURE.to_string(), arch.clone());
    }
    if let Some(distro) = &metadata.distro {
        labels.insert(LABEL_DISTRO.to_string(), distro.clone());
    }
    if let Some(target) = metadata.targets.first() {
        labels.insert(LABEL_TARGET.to_string(), target.name.clone());
    }
    labels.insert(LABEL_BOOTC.to_string(), metadata.bootc.to_string());
    if let Some(build_mode) = &metadata.build_mode {
        labels.insert(LABEL_SOURCE_TYPE.to_string(), build_mode.clone());
    }
    labels
}

/// Whether an `Available` catalog image is due for re-verification: either
/// its generation moved past what was last observed, or its verification
/// interval elapsed (`Available`: if generation changed...;
/// else requeue exactly at next verification deadline).
#[must_use]
pub fn needs_reverification(
    observed_generation: i64,
    current_generation: i64,
    last_verification_time: Option<DateTime<Utc>>,
    verification_interval_secs: u64,
    now: DateTime<Utc>,
) -> bool {
    if current_generation != observed_generation {
        return true;
    }
    match last_verification_time {
        None => true,
        Some(last) => {
            let elapsed = (now - last).num_seconds().max(0) as u64;
            elapsed >= verification_interval_secs
        }
    }
}

/// The exact requeue delay for an `Available` image not yet due for its
/// next verification pass.
#[must_use]
pub fn requeue_delay_for_available(
    last_verification_time: Option<DateTime<Utc>>,
    verification_interval_secs: u64,
    now: DateTime<Utc>,
) -> Duration {
    let Some(last) = last_verification_time else {
        return Duration::ZERO;
    };
    let deadline = last + chrono::Duration::seconds(verification_interval_secs as i64);
    let remaining = (deadline - now).num_seconds();
    if remaining <= 0 {
        Duration::ZERO
    } else {
        Duration::from_secs(remaining as u64)
    }
}

/// Process-wide catalog metrics. Registered once at startup and shared
/// behind an `Arc`.
pub struct CatalogMetrics {
    pub reconcile_outcomes: IntCounterVec,
    pub publish_outcomes: IntCounterVec,
    pub registry_access_outcomes: IntCounterVec,
    pub verification_duration_seconds: HistogramVec,
    pub reconcile_duration_seconds: HistogramVec,
    pub phase_counts: IntGaugeVec,
    pub circuit_state: IntGaugeVec,
    pub multi_arch_count: IntGaugeVec,
}

impl CatalogMetrics {
    pub fn register(registry: &Registry) -> prometheus::Result<Self> {
        let reconcile_outcomes = IntCounterVec::new(
            Opts::new("catalog_reconcile_outcome_total", "CatalogImage reconcile outcomes"),
            &["outcome"],
        )?;
        let publish_outcomes = IntCounterVec::new(
            Opts::new("catalog_publish_outcome_total", "Catalog publish outcomes"),
            &["outcome"],
        )?;
        let registry_access_outcomes = IntCounterVec::new(
            Opts::new("catalog_registry_access_outcome_total", "Registry access outcomes"),
            &["outcome"],
        )?;
        let verification_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "catalog_verification_duration_seconds",
                "Time spent verifying a catalog image",
            ),
            &[],
        )?;
        let reconcile_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "catalog_reconcile_duration_seconds",
                "Time spent in a single catalog reconcile",
            ),
            &[],
        )?;
        let phase_counts = IntGaugeVec::new(
            Opts::new("catalog_images_by_phase", "Number of CatalogImages per phase"),
            &["phase"],
        )?;
        let circuit_state = IntGaugeVec::new(
            Opts::new("registry_circuit_state", "Circuit breaker state per registry host (0=closed,1=open,2=half-open)"),
            &["host"],
        )?;
        let multi_arch_count = IntGaugeVec::new(
            Opts::new("catalog_multi_arch_images", "Number of multi-arch catalog images"),
            &[],
        )?;

        registry.register(Box::new(reconcile_outcomes.clone()))?;
        registry.register(Box::new(publish_outcomes.clone()))?;
        registry.register(Box::new(registry_access_outcomes.clone()))?;
        registry.register(Box::new(verification_duration_seconds.clone()))?;
        registry.register(Box::new(reconcile_duration_seconds.clone()))?;
        registry.register(Box::new(phase_counts.clone()))?;
        registry.register(Box::new(circuit_state.clone()))?;
        registry.register(Box::new(multi_arch_count.clone()))?;

        Ok(Self {
            reconcile_outcomes,
            publish_outcomes,
            registry_access_outcomes,
            verification_duration_seconds,
            reconcile_duration_seconds,
            phase_counts,
            circuit_state,
            multi_arch_count,
        })
    }

    pub fn observe_circuit_state(&self, host: &str, state: CircuitState) {
        let value = match state {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        };
        self.circuit_state.with_label_values(&[host]).set(value);
    }
}

pub struct Context<C: RegistryClient> {
    pub client: Client,
    pub registry: Arc<CircuitBreakerClient<C>>,
    pub metrics: Arc<CatalogMetrics>,
}

/// Emit one of the catalog's five audit event reasons
/// (`Published`/`Verified`/`Unavailable`/`Removed`/`AccessError`) against
/// the standard Kubernetes event recorder. Best-effort: a recorder failure
/// is logged, not propagated, since the patched status is the primary
/// record and this is a supplementary trail.
async fn record_audit_event(client: &Client, image: &CatalogImage, event_type: EventType, reason: &str, note: String) {
    let reporter = Reporter { controller: "automotive-build-operator".to_string(), instance: None };
    let recorder = Recorder::new(client.clone(), reporter, image.object_ref(&()));
    let event = AuditEvent { type_: event_type, reason: reason.to_string(), note: Some(note), action: reason.to_string(), secondary: None };
    if let Err(err) = recorder.publish(event).await {
        tracing::warn!(%err, name = %image.name_any(), reason, "failed to record catalog audit event");
    }
}

/// The finalizer-driven outer loop: on deletion, record the `Removed`
/// audit event before letting `kube::runtime::finalizer` strip the
/// finalizer.
pub async fn reconcile<C: RegistryClient>(
    image: Arc<CatalogImage>,
    ctx: Arc<Context<C>>,
) -> Result<Action, ReconcileError> {
    let namespace = image.namespace().unwrap_or_default();
    let api: Api<CatalogImage> = Api::namespaced(ctx.client.clone(), &namespace);

    finalizer(&api, FINALIZER, image, |event| async {
        match event {
            FinalizerEvent::Apply(image) => apply(image.as_ref(), &ctx, &api).await,
            FinalizerEvent::Cleanup(image) => {
                record_audit_event(&ctx.client, &image, EventType::Normal, "Removed", "catalog entry removed".to_string()).await;
                Ok(Action::await_change())
            }
        }
    })
    .await
    .map_err(|err| ReconcileError::Transient(err.to_string()))
}

async fn apply<C: RegistryClient>(
    image: &CatalogImage,
    ctx: &Context<C>,
    api: &Api<CatalogImage>,
) -> Result<Action, ReconcileError> {
    let phase = image.status.as_ref().map(|s| s.phase).unwrap_or_default();
    let now = Utc::now();

    match phase {
        CatalogImagePhase::Pending => {
            patch_status(api, image, CatalogImagePhase::Verifying, None).await?;
            Ok(Action::requeue(Duration::from_secs(1)))
        }
        CatalogImagePhase::Verifying => verify(image, ctx, api).await,
        CatalogImagePhase::Available => {
            let status = image.status.clone().unwrap_or_default();
            let current_generation = image.meta().generation.unwrap_or_default();
            if needs_reverification(
                status.observed_generation,
                current_generation,
                status.last_verification_time,
                image.spec.verification_interval_secs,
                now,
            ) {
                patch_status(api, image, CatalogImagePhase::Verifying, None).await?;
                Ok(Action::requeue(Duration::from_secs(1)))
            } else {
                let delay = requeue_delay_for_available(
                    status.last_verification_time,
                    image.spec.verification_interval_secs,
                    now,
                );
                Ok(Action::requeue(delay.max(Duration::from_secs(1))))
            }
        }
        CatalogImagePhase::Unavailable => {
            patch_status(api, image, CatalogImagePhase::Verifying, None).await?;
            Ok(Action::requeue(UNAVAILABLE_RETRY))
        }
        CatalogImagePhase::Failed => {
            let status = image.status.clone().unwrap_or_default();
            let current_generation = image.meta().generation.unwrap_or_default();
            if current_generation != status.observed_generation {
                patch_status(api, image, CatalogImagePhase::Verifying, None).await?;
                Ok(Action::requeue(Duration::from_secs(1)))
            } else {
                Ok(Action::await_change())
            }
        }
    }
}

/// Resolve the registry credential for a catalog image's verification pass.
/// Anonymous when `authSecretRef` is unset; a fetch or parse failure also
/// falls back to anonymous rather than failing the reconcile, since a
/// private image simply surfaces as an `Unavailable`/`AccessError` outcome.
async fn resolve_auth(client: &Client, namespace: &str, auth_secret_ref: Option<&str>) -> RegistryAuth {
    let Some(name) = auth_secret_ref else {
        return RegistryAuth::Anonymous;
    };

    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = match secrets.get(name).await {
        Ok(secret) => secret,
        Err(err) => {
            tracing::warn!(%err, name, "failed to fetch catalog image auth secret");
            return RegistryAuth::Anonymous;
        }
    };

    let data: BTreeMap<String, Vec<u8>> = secret.data.unwrap_or_default().into_iter().map(|(k, v)| (k, v.0)).collect();
    let credential = match data.get(".dockerconfigjson") {
        Some(raw) => parse_docker_config_json(raw),
        None => parse_generic_secret(&data),
    };
    match credential {
        Ok(credential) => to_registry_auth(&credential),
        Err(err) => {
            tracing::warn!(%err, name, "failed to parse catalog image auth secret");
            RegistryAuth::Anonymous
        }
    }
}

async fn verify<C: RegistryClient>(
    image: &CatalogImage,
    ctx: &Context<C>,
    api: &Api<CatalogImage>,
) -> Result<Action, ReconcileError> {
    let namespace = image.namespace().unwrap_or_default();
    let auth = resolve_auth(&ctx.client, &namespace, image.spec.auth_secret_ref.as_deref()).await;
    match ctx.registry.get_image_metadata(&image.spec.registry_url, &auth).await {
        Ok(metadata) => {
            tracing::info!(name = %image.name_any(), to = ?CatalogImagePhase::Available, "catalog image phase transition");
            let now = Utc::now().to_rfc3339();
            let conditions: Vec<_> = ["Available", "Verified", "Ready"]
                .into_iter()
                .map(|kind| {
                    serde_json::json!({
                        "type": kind,
                        "status": "True",
                        "reason": "Verified",
                        "message": "registry metadata resolved",
                        "lastTransitionTime": now,
                    })
                })
                .collect();
            let mut patch = serde_json::json!({
                "status": {
                    "phase": CatalogImagePhase::Available,
                    "registryMetadata": metadata,
                    "lastVerificationTime": Utc::now(),
                    "observedGeneration": image.meta().generation.unwrap_or_default(),
                    "conditions": conditions,
                }
            });
            if image.status.as_ref().and_then(|s| s.published_at).is_none() {
                patch["status"]["publishedAt"] = serde_json::json!(Utc::now());
            }
            api.patch_status(
                &image.name_any(),
                &PatchParams::apply("automotive-build-operator"),
                &Patch::Merge(patch),
            )
            .await?;
            record_audit_event(&ctx.client, image, EventType::Normal, "Verified", "registry metadata resolved".to_string()).await;
            ctx.metrics.reconcile_outcomes.with_label_values(&["available"]).inc();
            Ok(Action::requeue(Duration::from_secs(
                image.spec.verification_interval_secs,
            )))
        }
        Err(automotive_build_registry::RegistryError::Auth(reason)) => {
            patch_status(api, image, CatalogImagePhase::Failed, Some(reason.clone())).await?;
            record_audit_event(&ctx.client, image, EventType::Warning, "AccessError", reason).await;
            ctx.metrics.reconcile_outcomes.with_label_values(&["failed"]).inc();
            Ok(Action::await_change())
        }
        Err(err) => {
            patch_status(api, image, CatalogImagePhase::Unavailable, Some(err.to_string())).await?;
            record_audit_event(&ctx.client, image, EventType::Warning, "Unavailable", err.to_string()).await;
            ctx.metrics.reconcile_outcomes.with_label_values(&["unavailable"]).inc();
            Ok(Action::requeue(UNAVAILABLE_RETRY))
        }
    }
}

async fn patch_status(
    api: &Api<CatalogImage>,
    image: &CatalogImage,
    phase: CatalogImagePhase,
    message: Option<String>,
) -> Result<(), ReconcileError> {
    let current = image.status.as_ref().map(|s| s.phase).unwrap_or_default();
    tracing::info!(name = %image.name_any(), from = ?current, to = ?phase, "catalog image phase transition");

    let mut status = serde_json::json!({
        "phase": phase,
        "observedGeneration": image.meta().generation.unwrap_or_default(),
    });
    if let Some(msg) = message {
        status["conditions"] = serde_json::json!([{
            "type": "Available",
            "status": if matches!(phase, CatalogImagePhase::Available) { "True" } else { "False" },
            "reason": format!("{phase:?}"),
            "message": msg,
            "lastTransitionTime": Utc::now().to_rfc3339(),
        }]);
    }

    api.patch_status(
        &image.name_any(),
        &PatchParams::apply("automotive-build-operator"),
        &Patch::Merge(serde_json::json!({ "status": status })),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use automotive_build_types::TargetEntry;

    #[test]
    fn labels_include_architecture_and_bootc_flag() {
        let metadata = CatalogImageMetadata {
            architecture: Some("amd64".to_string()),
            distro: Some("autosd".to_string()),
            distro_version: None,
            targets: vec![TargetEntry {
                name: "qemu".to_string(),
                verified: true,
                notes: None,
            }],
            bootc: true,
            build_mode: Some("bootc".to_string()),
            kernel_version: None,
        };
        let labels = labels_from_metadata(&metadata);
        assert_eq!(labels.get(LABEL_ARCHITECTURE), Some(&"amd64".to_string()));
        assert_eq!(labels.get(LABEL_BOOTC), Some(&"true".to_string()));
        assert_eq!(labels.get(LABEL_TARGET), Some(&"qemu".to_string()));
    }

    #[test]
    fn reverification_triggered_by_generation_bump() {
        let now = Utc::now();
        assert!(needs_reverification(1, 2, Some(now), 3600, now));
    }

    #[test]
    fn reverification_not_triggered_within_interval() {
        let now = Utc::now();
        assert!(!needs_reverification(1, 1, Some(now), 3600, now));
    }

    #[test]
    fn reverification_triggered_after_interval_elapses() {
        let last = Utc::now() - chrono::Duration::seconds(4000);
        assert!(needs_reverification(1, 1, Some(last), 3600, Utc::now()));
    }

    #[test]
    fn requeue_delay_never_negative() {
        let last = Utc::now() - chrono::Duration::seconds(10_000);
        let delay = requeue_delay_for_available(Some(last), 3600, Utc::now());
        assert_eq!(delay, Duration::ZERO);
    }
}

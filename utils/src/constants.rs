//! Label, annotation, and environment-variable names used across the
//! reconcilers and the API server. Centralized so a rename only ever
//! touches one file.

// Standard labels applied to every operator-managed derived object.
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_PART_OF: &str = "app.kubernetes.io/part-of";
pub const LABEL_RESOURCE_TYPE: &str = "automotive.sdv.cloud.redhat.com/resource-type";

pub const MANAGED_BY_VALUE: &str = "automotive-dev-operator";
pub const PART_OF_VALUE: &str = "automotive-dev";

// Catalog metadata labels (derived from CatalogImage.spec.metadata in Pending).
pub const LABEL_ARCHITECTURE: &str = "architecture";
pub const LABEL_DISTRO: &str = "distro";
pub const LABEL_TARGET: &str = "target";
pub const LABEL_BOOTC: &str = "bootc";
pub const LABEL_SOURCE_TYPE: &str = "source-type";

// Progress annotation written by worker pods.
pub const ANNOTATION_PROGRESS: &str = "automotive.sdv.cloud.redhat.com/progress";

// Annotation recording the resolved caller identity on created requests.
pub const ANNOTATION_REQUESTED_BY: &str = "automotive.sdv.cloud.redhat.com/requested-by";

// Annotation a client sets on an ImageBuild/ContainerBuild once an upload finished.
pub const ANNOTATION_UPLOADS_COMPLETE: &str = "automotive.sdv.cloud.redhat.com/uploads-complete";

// Label used to guard safe-update of the shared sealed Task definition.
pub const LABEL_TASK_MANAGED_BY: &str = "automotive.sdv.cloud.redhat.com/managed-by";

// Selector labels used to find worker pods.
pub const LABEL_PIPELINE_RUN: &str = "tekton.dev/pipelineRun";
pub const LABEL_MEMBER_OF: &str = "tekton.dev/memberOf";
pub const LABEL_MEMBER_OF_TASKS: &str = "tasks";
pub const LABEL_BUILDRUN_NAME: &str = "buildrun.shipwright.io/name";

// Environment variables.
pub const ENV_INTERNAL_JWT_ISSUER: &str = "INTERNAL_JWT_ISSUER";
pub const ENV_INTERNAL_JWT_AUDIENCE: &str = "INTERNAL_JWT_AUDIENCE";
pub const ENV_INTERNAL_JWT_KEY: &str = "INTERNAL_JWT_KEY";
pub const ENV_BUILD_API_NAMESPACE: &str = "BUILD_API_NAMESPACE";
pub const ENV_OPERATOR_IMAGE: &str = "OPERATOR_IMAGE";
pub const ENV_PORT: &str = "PORT";
pub const ENV_KUBECONFIG: &str = "KUBECONFIG";
pub const ENV_CONTAINER_TOOL: &str = "CONTAINER_TOOL";

// Well-known hosts.
pub const INTERNAL_REGISTRY_HOST: &str = "image-registry.openshift-image-registry.svc:5000";

// Names inside the "source-local" waiter container that the upload broker
// pipes a tarball into.
pub const SOURCE_LOCAL_CONTAINER_SUBSTR: &str = "source-local";
pub const WORKSPACE_SOURCE_PATH: &str = "/workspace/source";

// Derived-name limits (RFC 1123 subdomain limit used throughout Kubernetes).
pub const MAX_DERIVED_NAME_LEN: usize = 63;
pub const DERIVED_NAME_HASH_PREFIX_LEN: usize = 8;

//! `kube::CustomResource` types and the process-wide operator config for
//! the automotive build control plane.

pub mod catalog_image;
pub mod common;
pub mod container_build;
pub mod image_build;
pub mod image_sealed;
pub mod operator_config;

pub use catalog_image::{
    CatalogImage, CatalogImageMetadata, CatalogImagePhase, CatalogImageSpec, CatalogImageStatus,
    PlatformVariant, RegistryMetadata, TargetEntry, FINALIZER,
};
pub use common::{Condition, Publisher, RegistryDestination};
pub use container_build::{ContainerBuild, ContainerBuildPhase, ContainerBuildSpec, ContainerBuildStatus};
pub use image_build::{BuildMode, ImageBuild, ImageBuildPhase, ImageBuildSpec, ImageBuildStatus};
pub use image_sealed::{ImageSealed, ImageSealedPhase, ImageSealedSpec, ImageSealedStatus, SealedOperation};
pub use operator_config::{JumpstarterTarget, OidcIssuer, OperatorConfig};

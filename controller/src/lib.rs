//! Reconcilers and shared in-cluster plumbing for the automotive build
//! control plane.

pub mod catalog;
pub mod container_build;
pub mod error;
pub mod image_build;
pub mod image_sealed;
pub mod labels;
pub mod progress;
pub mod upload_broker;

pub use error::ReconcileError;

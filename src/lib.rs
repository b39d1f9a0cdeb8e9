//! Promotes container images between registries according to declarative
//! manifests
//!
//! A promotion manifest names one source registry, any number of destination
//! registries, and the images (by digest, with the tags each digest should
//! carry) that must be present in every destination. The promoter reads the
//! live inventory of every registry involved, diffs it against the manifests,
//! and applies the minimal set of copy and tag mutations that reconciles the
//! two, with bounded parallelism and per-edge failure accounting.

#[macro_use] extern crate lazy_static;

pub mod errors;
pub mod image;
pub mod inventory;
pub mod manifest;
pub mod pipeline;
pub mod plan;
pub mod registry;
pub mod snapshot;
pub mod sync;

pub use crate::{
    errors::{ImageError, ManifestError, PlanError, PromoteError, RegistryError, SnapshotError},
    image::{ContentDigest, ImageName, RegistryName, Tag},
    inventory::{MasterInventory, RegistryInventory, RepoInventory},
    manifest::{Manifest, ManifestImage, RegistryContext},
    pipeline::PromotionResults,
    plan::{Plan, PlanOptions, PromotionEdge, TagOp},
    registry::{
        Auth, Credential, DryRun, InventorySource, MemoryRegistry, OpExecutor, RegistryClient,
        RegistryClientBuilder, RegistryOp,
    },
    snapshot::SnapshotFormat,
    sync::{SyncContext, SyncOptions, DEFAULT_THREADS},
};

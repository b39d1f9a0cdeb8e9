//! Error types you might see while planning or applying image promotions

use crate::{
    image::{ContentDigest, ImageName, RegistryName, Tag},
    plan::PromotionEdge,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("invalid image reference format: {0}")]
    InvalidReferenceFormat(String),
}

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("manifest io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("manifest reference error: {0}")]
    Reference(#[from] ImageError),

    #[error("manifest names no source registry")]
    NoSource,

    #[error("manifest names more than one source registry, {0} and {1}")]
    MultipleSources(RegistryName, RegistryName),

    #[error("registry {registry} is declared with service account {left} in one manifest and {right} in another")]
    ServiceAccountConflict {
        registry: RegistryName,
        left: String,
        right: String,
    },
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("network request error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid reference in registry response: {0}")]
    Reference(#[from] ImageError),

    #[error("registry response for {0} carries no content digest")]
    MissingDigestHeader(String),

    #[error("digest {digest} not present in {registry}/{image}")]
    DigestAbsent {
        registry: RegistryName,
        image: ImageName,
        digest: ContentDigest,
    },

    #[error("tag {tag} not present in {registry}/{image}")]
    TagAbsent {
        registry: RegistryName,
        image: ImageName,
        tag: Tag,
    },

    #[error("unexpected status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("malformed upload location {0}")]
    BadUploadLocation(String),

    #[error("token service at {0} returned no token")]
    MissingToken(String),

    #[error("registry {0} is unreachable")]
    Unreachable(RegistryName),
}

/// A whole plan was refused before execution
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("tag {tag} in {registry}/{image} is claimed by both {first} and {second}")]
    TagCollision {
        registry: RegistryName,
        image: ImageName,
        tag: Tag,
        first: ContentDigest,
        second: ContentDigest,
    },
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("yaml rendering error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("unknown snapshot format: {0}")]
    UnknownFormat(String),
}

/// Everything that can go wrong during one promotion run
///
/// `Manifest` and `Plan` are fatal and abort the run before any mutation.
/// The remaining variants are recorded per registry or per edge while the
/// run continues around them.
#[derive(Error, Debug)]
pub enum PromoteError {
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("failed to read inventory of {registry}: {source}")]
    Read {
        registry: RegistryName,
        source: RegistryError,
    },

    #[error("source {registry}/{image} does not contain {digest}")]
    SourceMissing {
        registry: RegistryName,
        image: ImageName,
        digest: ContentDigest,
    },

    #[error("tag {tag} in {registry}/{image} points at {current}, refusing to move it to {wanted}")]
    MoveForbidden {
        registry: RegistryName,
        image: ImageName,
        tag: Tag,
        current: ContentDigest,
        wanted: ContentDigest,
    },

    #[error("failed to apply {edge}: {message}")]
    Exec { edge: PromotionEdge, message: String },

    #[error("cancelled before {0} could be applied")]
    Cancelled(PromotionEdge),
}

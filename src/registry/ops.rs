//! Deferred registry mutations and the interfaces that run them

use crate::{
    errors::RegistryError,
    image::{ContentDigest, ImageName, RegistryName, Tag},
    inventory::RegistryInventory,
    plan::{PromotionEdge, TagOp},
};
use async_trait::async_trait;
use std::fmt;

/// A single registry write, described but not yet performed
///
/// Producing an operation is pure; only handing it to an [OpExecutor] has
/// effects. This split is what makes dry runs and in-memory substitution
/// possible without any mocking machinery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryOp {
    /// Copy image content by digest from one registry to another
    ///
    /// Copying a digest the destination already holds is a successful
    /// no-op; content addresses make repetition harmless.
    Copy {
        src_registry: RegistryName,
        src_image: ImageName,
        dst_registry: RegistryName,
        dst_image: ImageName,
        digest: ContentDigest,
    },

    /// Bind a tag to a digest that is already present at the registry,
    /// replacing whatever the tag pointed at before
    SetTag {
        registry: RegistryName,
        image: ImageName,
        digest: ContentDigest,
        tag: Tag,
    },

    /// Remove a tag binding; the underlying digest is unaffected
    DeleteTag {
        registry: RegistryName,
        image: ImageName,
        tag: Tag,
    },

    /// Remove an image by digest along with any tags still pointing at it
    DeleteDigest {
        registry: RegistryName,
        image: ImageName,
        digest: ContentDigest,
    },
}

impl fmt::Display for RegistryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryOp::Copy {
                src_registry,
                src_image,
                dst_registry,
                dst_image,
                digest,
            } => write!(
                f,
                "copy {}/{}@{} => {}/{}",
                src_registry, src_image, digest, dst_registry, dst_image
            ),
            RegistryOp::SetTag {
                registry,
                image,
                digest,
                tag,
            } => write!(f, "tag {}/{}:{} => {}", registry, image, tag, digest),
            RegistryOp::DeleteTag {
                registry,
                image,
                tag,
            } => write!(f, "untag {}/{}:{}", registry, image, tag),
            RegistryOp::DeleteDigest {
                registry,
                image,
                digest,
            } => write!(f, "delete {}/{}@{}", registry, image, digest),
        }
    }
}

/// Produce the operations that realize one promotion edge
///
/// `dst_has_digest` reflects the destination inventory observed before
/// planning; when the content is already there, only the tag needs to
/// change hands. Within the returned sequence, order is significant: a
/// copy always precedes the tag binding that depends on it.
pub fn edge_ops(edge: &PromotionEdge, dst_has_digest: bool) -> Vec<RegistryOp> {
    let mut ops = Vec::new();
    match edge.op {
        TagOp::Add | TagOp::Move => {
            if !dst_has_digest {
                ops.push(RegistryOp::Copy {
                    src_registry: edge.src_registry.clone(),
                    src_image: edge.src_image.clone(),
                    dst_registry: edge.dst_registry.clone(),
                    dst_image: edge.dst_image.clone(),
                    digest: edge.digest.clone(),
                });
            }
            if let Some(tag) = &edge.tag {
                ops.push(RegistryOp::SetTag {
                    registry: edge.dst_registry.clone(),
                    image: edge.dst_image.clone(),
                    digest: edge.digest.clone(),
                    tag: tag.clone(),
                });
            }
        }
        TagOp::Delete => match &edge.tag {
            Some(tag) => ops.push(RegistryOp::DeleteTag {
                registry: edge.dst_registry.clone(),
                image: edge.dst_image.clone(),
                tag: tag.clone(),
            }),
            None => ops.push(RegistryOp::DeleteDigest {
                registry: edge.dst_registry.clone(),
                image: edge.dst_image.clone(),
                digest: edge.digest.clone(),
            }),
        },
        TagOp::Keep => (),
    }
    ops
}

/// Runs deferred registry operations
///
/// Implemented by the network client, by [DryRun], and by
/// [crate::registry::MemoryRegistry].
#[async_trait]
pub trait OpExecutor: Send + Sync {
    async fn execute(&self, op: &RegistryOp) -> Result<(), RegistryError>;
}

/// Observes what a registry currently holds
#[async_trait]
pub trait InventorySource: Send + Sync {
    /// Read the complete inventory of one registry
    ///
    /// Failures inside a single repository are logged and skipped; only a
    /// failure to enumerate the registry at all is an error.
    async fn read_registry(
        &self,
        registry: &RegistryName,
    ) -> Result<RegistryInventory, RegistryError>;
}

/// Logs every operation it is asked to run, and runs none of them
pub struct DryRun;

#[async_trait]
impl OpExecutor for DryRun {
    async fn execute(&self, op: &RegistryOp) -> Result<(), RegistryError> {
        log::info!("dry run: {}", op);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(op: TagOp, tag: Option<&str>) -> PromotionEdge {
        PromotionEdge {
            src_registry: "gcr.io/src".parse().unwrap(),
            src_image: "foo".parse().unwrap(),
            digest: format!("sha256:{}", "a".repeat(64)).parse().unwrap(),
            dst_registry: "gcr.io/dst".parse().unwrap(),
            dst_image: "foo".parse().unwrap(),
            tag: tag.map(|t| t.parse().unwrap()),
            op,
        }
    }

    #[test]
    fn add_edge_copies_then_tags() {
        let ops = edge_ops(&edge(TagOp::Add, Some("v1")), false);
        assert_eq!(ops.len(), 2);
        assert!(matches!(ops[0], RegistryOp::Copy { .. }));
        assert!(matches!(ops[1], RegistryOp::SetTag { .. }));
    }

    #[test]
    fn present_content_only_needs_the_tag() {
        let ops = edge_ops(&edge(TagOp::Add, Some("v1")), true);
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0], RegistryOp::SetTag { .. }));
    }

    #[test]
    fn untagged_add_is_a_bare_copy() {
        let ops = edge_ops(&edge(TagOp::Add, None), false);
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0], RegistryOp::Copy { .. }));

        // nothing at all when the content is already present
        assert!(edge_ops(&edge(TagOp::Add, None), true).is_empty());
    }

    #[test]
    fn delete_edges_pick_their_operation_by_form() {
        let ops = edge_ops(&edge(TagOp::Delete, Some("old")), true);
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0], RegistryOp::DeleteTag { .. }));

        let ops = edge_ops(&edge(TagOp::Delete, None), true);
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0], RegistryOp::DeleteDigest { .. }));
    }

    #[test]
    fn keep_edges_do_nothing() {
        assert!(edge_ops(&edge(TagOp::Keep, Some("v1")), true).is_empty());
    }
}

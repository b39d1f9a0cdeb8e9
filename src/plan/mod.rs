//! Reconciliation planning between declared manifests and observed
//! registries
//!
//! The planner walks every manifest, compares each desired (image, digest,
//! tag) against what the destination registry actually holds, and emits the
//! minimal deduplicated set of [PromotionEdge]s that closes the gap. The
//! same manifests and the same observed inventories always produce the same
//! plan, in the same order.


use crate::{
    errors::{PlanError, PromoteError},
    image::{ContentDigest, ImageName, RegistryName, Tag},
    inventory::MasterInventory,
    manifest::Manifest,
};
use std::{
    cmp::{Ord, Ordering, PartialOrd},
    collections::{BTreeMap, BTreeSet},
    fmt,
};

/// What a promotion edge does to the destination tag
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TagOp {
    /// Bind a tag which is currently unbound, copying the digest first if
    /// the destination does not hold it yet
    Add,
    /// Reassign a tag that currently points at a different digest; only
    /// planned when moves are explicitly permitted
    Move,
    /// The destination already agrees with the manifest; never executed
    Keep,
    /// Remove destination content no manifest references
    Delete,
}

impl fmt::Display for TagOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TagOp::Add => "add",
            TagOp::Move => "move",
            TagOp::Keep => "keep",
            TagOp::Delete => "delete",
        };
        write!(f, "{}", s)
    }
}

/// One atomic planned mutation of a destination registry
///
/// An edge is fully self-describing; executing it needs no state beyond the
/// fields here. Two edges are equal iff all seven fields are equal. A
/// `tag` of None promotes or deletes untagged content. Delete edges point
/// their source fields at the destination itself, which is where the doomed
/// digest was observed.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PromotionEdge {
    pub src_registry: RegistryName,
    pub src_image: ImageName,
    pub digest: ContentDigest,
    pub dst_registry: RegistryName,
    pub dst_image: ImageName,
    pub tag: Option<Tag>,
    pub op: TagOp,
}

impl fmt::Display for PromotionEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}@{} => {}/{}",
            self.src_registry, self.src_image, self.digest, self.dst_registry, self.dst_image
        )?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        write!(f, " ({})", self.op)
    }
}

impl Ord for PromotionEdge {
    fn cmp(&self, other: &Self) -> Ordering {
        (
            &self.dst_registry,
            &self.dst_image,
            &self.digest,
            &self.tag,
            &self.op,
            &self.src_registry,
            &self.src_image,
        )
            .cmp(&(
                &other.dst_registry,
                &other.dst_image,
                &other.digest,
                &other.tag,
                &other.op,
                &other.src_registry,
                &other.src_image,
            ))
    }
}

impl PartialOrd for PromotionEdge {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Options controlling how a plan is computed
#[derive(Clone, Copy, Debug, Default)]
pub struct PlanOptions {
    /// Allow edges that reassign an existing tag to a different digest
    pub permit_moves: bool,

    /// Emit delete edges for destination digests of manifest-managed images
    /// that no manifest references
    pub thin: bool,
}

/// A deduplicated set of promotion edges in deterministic order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Plan {
    edges: BTreeSet<PromotionEdge>,
}

impl Plan {
    pub fn iter(&self) -> impl Iterator<Item = &PromotionEdge> {
        self.edges.iter()
    }

    pub fn into_edges(self) -> Vec<PromotionEdge> {
        self.edges.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Compute the promotion plan for a set of manifests against observed
/// inventories
///
/// Returns the plan together with the per-edge errors for candidates that
/// were dropped: tag reassignments that were not permitted, and edges whose
/// source content was never observed. A plan in which two surviving edges
/// would write the same destination tag is refused outright.
pub fn plan(
    manifests: &[Manifest],
    inv: &MasterInventory,
    options: PlanOptions,
) -> Result<(Plan, Vec<PromoteError>), PlanError> {
    let mut candidates = BTreeSet::new();
    let mut dropped = Vec::new();

    for manifest in manifests {
        let src = match manifest.source() {
            Some(src) => src,
            None => continue,
        };
        for dst in manifest.destinations() {
            let observed = inv.registry(&dst.name);
            for image in &manifest.images {
                let repo = observed.and_then(|observed| observed.image(&image.name));
                for (digest, tags) in &image.dmap {
                    if tags.is_empty() {
                        // Untagged content still gets promoted once
                        if !repo.map_or(false, |repo| repo.has_digest(digest)) {
                            candidates.insert(PromotionEdge {
                                src_registry: src.name.clone(),
                                src_image: image.name.clone(),
                                digest: digest.clone(),
                                dst_registry: dst.name.clone(),
                                dst_image: image.name.clone(),
                                tag: None,
                                op: TagOp::Add,
                            });
                        }
                        continue;
                    }
                    for tag in tags {
                        let bound = repo.and_then(|repo| repo.digest_of_tag(tag));
                        let op = match bound {
                            Some(bound) if bound == digest => {
                                log::debug!(
                                    "{}/{}:{} already points at {}",
                                    dst.name,
                                    image.name,
                                    tag,
                                    digest
                                );
                                continue;
                            }
                            Some(bound) => {
                                if !options.permit_moves {
                                    log::error!(
                                        "{}/{}:{} points at {}, not moving it to {}",
                                        dst.name,
                                        image.name,
                                        tag,
                                        bound,
                                        digest
                                    );
                                    dropped.push(PromoteError::MoveForbidden {
                                        registry: dst.name.clone(),
                                        image: image.name.clone(),
                                        tag: tag.clone(),
                                        current: bound.clone(),
                                        wanted: digest.clone(),
                                    });
                                    continue;
                                }
                                TagOp::Move
                            }
                            None => TagOp::Add,
                        };
                        candidates.insert(PromotionEdge {
                            src_registry: src.name.clone(),
                            src_image: image.name.clone(),
                            digest: digest.clone(),
                            dst_registry: dst.name.clone(),
                            dst_image: image.name.clone(),
                            tag: Some(tag.clone()),
                            op,
                        });
                    }
                }
            }
            if options.thin {
                thin_edges(manifests, &dst.name, inv, &mut candidates);
            }
        }
    }

    let validated = validate_sources(candidates, inv, &mut dropped);
    let plan = claim_tags(validated)?;
    Ok((plan, dropped))
}

/// Delete edges for observed destination digests no manifest references
///
/// Only images that some manifest manages are considered; content the
/// manifests have never heard of is left alone even in thin mode.
fn thin_edges(
    manifests: &[Manifest],
    dst: &RegistryName,
    inv: &MasterInventory,
    candidates: &mut BTreeSet<PromotionEdge>,
) {
    let observed = match inv.registry(dst) {
        Some(observed) => observed,
        None => return,
    };
    let mut wanted: BTreeMap<&ImageName, BTreeSet<&ContentDigest>> = BTreeMap::new();
    for manifest in manifests {
        for image in &manifest.images {
            wanted
                .entry(&image.name)
                .or_default()
                .extend(image.dmap.keys());
        }
    }
    for (image, digests) in &wanted {
        let repo = match observed.image(image) {
            Some(repo) => repo,
            None => continue,
        };
        for (digest, _) in repo.iter() {
            if !digests.contains(digest) {
                log::info!("thin mode: {}/{}@{} is unreferenced", dst, image, digest);
                candidates.insert(PromotionEdge {
                    src_registry: dst.clone(),
                    src_image: (*image).clone(),
                    digest: digest.clone(),
                    dst_registry: dst.clone(),
                    dst_image: (*image).clone(),
                    tag: None,
                    op: TagOp::Delete,
                });
            }
        }
    }
}

/// Drop candidates whose source content was never observed
///
/// A candidate that survives is backed by an observation of its source
/// triple; nothing is ever promoted on faith.
fn validate_sources(
    candidates: BTreeSet<PromotionEdge>,
    inv: &MasterInventory,
    dropped: &mut Vec<PromoteError>,
) -> BTreeSet<PromotionEdge> {
    let mut validated = BTreeSet::new();
    for edge in candidates {
        if inv.has_digest(&edge.src_registry, &edge.src_image, &edge.digest) {
            validated.insert(edge);
        } else {
            log::error!("dropping {}: source content was not observed", edge);
            dropped.push(PromoteError::SourceMissing {
                registry: edge.src_registry,
                image: edge.src_image,
                digest: edge.digest,
            });
        }
    }
    validated
}

/// Enforce that no two edges write the same destination tag
///
/// Two manifests promoting the same digest to the same tag collapse to a
/// single edge per binding; two manifests claiming the same tag for
/// different digests refuse the whole plan, since executing either order
/// would silently clobber the other.
fn claim_tags(candidates: BTreeSet<PromotionEdge>) -> Result<Plan, PlanError> {
    let mut claims: BTreeMap<(RegistryName, ImageName, Tag), ContentDigest> = BTreeMap::new();
    let mut edges = BTreeSet::new();
    for edge in candidates {
        let tag = match &edge.tag {
            None => {
                edges.insert(edge);
                continue;
            }
            Some(tag) => tag,
        };
        let key = (
            edge.dst_registry.clone(),
            edge.dst_image.clone(),
            tag.clone(),
        );
        match claims.get(&key) {
            None => {
                claims.insert(key, edge.digest.clone());
                edges.insert(edge);
            }
            Some(existing) if existing == &edge.digest => {
                log::debug!("dropping redundant edge {}", edge);
            }
            Some(existing) => {
                return Err(PlanError::TagCollision {
                    registry: edge.dst_registry.clone(),
                    image: edge.dst_image.clone(),
                    tag: tag.clone(),
                    first: existing.clone(),
                    second: edge.digest.clone(),
                });
            }
        }
    }
    Ok(Plan { edges })
}

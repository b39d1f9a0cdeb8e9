//! In-memory inventories of what registries actually hold
//!
//! Inventories are observations: they are populated from registry reads
//! before planning, treated as read-only afterward, and never persisted.
//! All maps are ordered so that walking an inventory is deterministic.

use crate::image::{ContentDigest, ImageName, RegistryName, Tag};
use std::collections::{BTreeMap, BTreeSet};

/// Digest to tag-set mapping for a single image
///
/// Two distinct tags pointing at the same digest are equal citizens;
/// neither is the "name" of the digest, and the set never collapses to a
/// scalar. A digest with no tags is still present content.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RepoInventory {
    digests: BTreeMap<ContentDigest, BTreeSet<Tag>>,
}

impl RepoInventory {
    pub fn new() -> Self {
        RepoInventory::default()
    }

    /// Record a digest and any tags observed pointing at it
    ///
    /// Tags accumulate across calls; recording a digest twice unions the
    /// tag sets.
    pub fn record<I>(&mut self, digest: ContentDigest, tags: I)
    where
        I: IntoIterator<Item = Tag>,
    {
        self.digests.entry(digest).or_default().extend(tags);
    }

    pub fn has_digest(&self, digest: &ContentDigest) -> bool {
        self.digests.contains_key(digest)
    }

    pub fn tags_of(&self, digest: &ContentDigest) -> Option<&BTreeSet<Tag>> {
        self.digests.get(digest)
    }

    /// The digest a tag currently points at, if the tag is bound at all
    pub fn digest_of_tag(&self, tag: &Tag) -> Option<&ContentDigest> {
        self.digests
            .iter()
            .find(|(_, tags)| tags.contains(tag))
            .map(|(digest, _)| digest)
    }

    /// Bind a tag to a digest already present here, unbinding it from any
    /// digest it pointed at before
    ///
    /// Returns false when the digest is not present; a tag may only point
    /// at existing content.
    pub fn set_tag(&mut self, digest: &ContentDigest, tag: &Tag) -> bool {
        if !self.digests.contains_key(digest) {
            return false;
        }
        for tags in self.digests.values_mut() {
            tags.remove(tag);
        }
        self.digests
            .get_mut(digest)
            .unwrap()
            .insert(tag.clone());
        true
    }

    /// Remove a tag binding, leaving the underlying digest in place
    pub fn delete_tag(&mut self, tag: &Tag) -> bool {
        for tags in self.digests.values_mut() {
            if tags.remove(tag) {
                return true;
            }
        }
        false
    }

    /// Remove a digest along with every tag still pointing at it
    pub fn delete_digest(&mut self, digest: &ContentDigest) -> bool {
        self.digests.remove(digest).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ContentDigest, &BTreeSet<Tag>)> {
        self.digests.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }
}

/// The observed state of one registry: every image and what it holds
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistryInventory {
    images: BTreeMap<ImageName, RepoInventory>,
}

impl RegistryInventory {
    pub fn new() -> Self {
        RegistryInventory::default()
    }

    pub fn image(&self, name: &ImageName) -> Option<&RepoInventory> {
        self.images.get(name)
    }

    pub fn image_mut(&mut self, name: &ImageName) -> &mut RepoInventory {
        self.images.entry(name.clone()).or_default()
    }

    /// Record one observed digest under an image name
    pub fn record<I>(&mut self, name: &ImageName, digest: ContentDigest, tags: I)
    where
        I: IntoIterator<Item = Tag>,
    {
        self.image_mut(name).record(digest, tags);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ImageName, &RepoInventory)> {
        self.images.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }
}

/// Observed state of every registry involved in a promotion run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MasterInventory {
    registries: BTreeMap<RegistryName, RegistryInventory>,
}

impl MasterInventory {
    pub fn new() -> Self {
        MasterInventory::default()
    }

    pub fn registry(&self, name: &RegistryName) -> Option<&RegistryInventory> {
        self.registries.get(name)
    }

    pub fn registry_mut(&mut self, name: &RegistryName) -> &mut RegistryInventory {
        self.registries.entry(name.clone()).or_default()
    }

    /// Replace everything known about one registry with a fresh observation
    pub fn set_registry(&mut self, name: RegistryName, observed: RegistryInventory) {
        self.registries.insert(name, observed);
    }

    /// Record one observed digest under a registry and image name
    pub fn record<I>(
        &mut self,
        registry: &RegistryName,
        image: &ImageName,
        digest: ContentDigest,
        tags: I,
    ) where
        I: IntoIterator<Item = Tag>,
    {
        self.registry_mut(registry).record(image, digest, tags);
    }

    /// Does this registry hold this digest under this image name?
    pub fn has_digest(
        &self,
        registry: &RegistryName,
        image: &ImageName,
        digest: &ContentDigest,
    ) -> bool {
        self.registry(registry)
            .and_then(|observed| observed.image(image))
            .map_or(false, |repo| repo.has_digest(digest))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RegistryName, &RegistryInventory)> {
        self.registries.iter()
    }
}

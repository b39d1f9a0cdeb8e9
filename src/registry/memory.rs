//! An in-memory registry for previews and tests
//!
//! Holds a whole [MasterInventory] behind a lock and implements the same
//! read and write interfaces as the network client, with the same
//! semantics: copies are idempotent, tags bind exclusively, deleting a
//! digest takes its tags along. This is the substitution point the
//! deferred-operation design exists for; no mocking framework required.

use crate::{
    errors::RegistryError,
    image::{ContentDigest, RegistryName},
    inventory::{MasterInventory, RegistryInventory},
    registry::ops::{InventorySource, OpExecutor, RegistryOp},
};
use async_trait::async_trait;
use std::{
    collections::BTreeSet,
    sync::{Mutex, MutexGuard},
};

#[derive(Default)]
pub struct MemoryRegistry {
    inventory: Mutex<MasterInventory>,
    unreadable: Mutex<BTreeSet<RegistryName>>,
    uncopyable: Mutex<BTreeSet<ContentDigest>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        MemoryRegistry::default()
    }

    /// Start from existing contents instead of empty registries
    pub fn with_inventory(inventory: MasterInventory) -> Self {
        MemoryRegistry {
            inventory: Mutex::new(inventory),
            ..MemoryRegistry::default()
        }
    }

    /// Clone the complete current contents
    pub fn contents(&self) -> MasterInventory {
        self.lock_inventory().clone()
    }

    /// Make every future read of one registry fail
    ///
    /// Exercises the partial-failure paths that a live network produces on
    /// its own.
    pub fn refuse_reads(&self, registry: RegistryName) {
        self.unreadable
            .lock()
            .expect("flag lock poisoned")
            .insert(registry);
    }

    /// Make every future copy of one digest fail
    pub fn refuse_copies(&self, digest: ContentDigest) {
        self.uncopyable
            .lock()
            .expect("flag lock poisoned")
            .insert(digest);
    }

    fn lock_inventory(&self) -> MutexGuard<'_, MasterInventory> {
        self.inventory.lock().expect("inventory lock poisoned")
    }
}

#[async_trait]
impl InventorySource for MemoryRegistry {
    async fn read_registry(
        &self,
        registry: &RegistryName,
    ) -> Result<RegistryInventory, RegistryError> {
        if self
            .unreadable
            .lock()
            .expect("flag lock poisoned")
            .contains(registry)
        {
            return Err(RegistryError::Unreachable(registry.clone()));
        }
        Ok(self
            .lock_inventory()
            .registry(registry)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl OpExecutor for MemoryRegistry {
    async fn execute(&self, op: &RegistryOp) -> Result<(), RegistryError> {
        match op {
            RegistryOp::Copy {
                src_registry,
                src_image,
                dst_registry,
                dst_image,
                digest,
            } => {
                if self
                    .uncopyable
                    .lock()
                    .expect("flag lock poisoned")
                    .contains(digest)
                {
                    return Err(RegistryError::Unreachable(dst_registry.clone()));
                }
                let mut inventory = self.lock_inventory();
                if inventory.has_digest(dst_registry, dst_image, digest) {
                    // content addresses make repeat copies harmless
                    return Ok(());
                }
                if !inventory.has_digest(src_registry, src_image, digest) {
                    return Err(RegistryError::DigestAbsent {
                        registry: src_registry.clone(),
                        image: src_image.clone(),
                        digest: digest.clone(),
                    });
                }
                inventory.record(dst_registry, dst_image, digest.clone(), vec![]);
                Ok(())
            }
            RegistryOp::SetTag {
                registry,
                image,
                digest,
                tag,
            } => {
                let mut inventory = self.lock_inventory();
                let repo = inventory.registry_mut(registry).image_mut(image);
                if repo.set_tag(digest, tag) {
                    Ok(())
                } else {
                    Err(RegistryError::DigestAbsent {
                        registry: registry.clone(),
                        image: image.clone(),
                        digest: digest.clone(),
                    })
                }
            }
            RegistryOp::DeleteTag {
                registry,
                image,
                tag,
            } => {
                let mut inventory = self.lock_inventory();
                let repo = inventory.registry_mut(registry).image_mut(image);
                if repo.delete_tag(tag) {
                    Ok(())
                } else {
                    Err(RegistryError::TagAbsent {
                        registry: registry.clone(),
                        image: image.clone(),
                        tag: tag.clone(),
                    })
                }
            }
            RegistryOp::DeleteDigest {
                registry,
                image,
                digest,
            } => {
                let mut inventory = self.lock_inventory();
                let repo = inventory.registry_mut(registry).image_mut(image);
                if repo.delete_digest(digest) {
                    Ok(())
                } else {
                    Err(RegistryError::DigestAbsent {
                        registry: registry.clone(),
                        image: image.clone(),
                        digest: digest.clone(),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{ImageName, Tag};

    fn digest(hex: char) -> ContentDigest {
        ContentDigest::parse(&format!("sha256:{}", String::from(hex).repeat(64))).unwrap()
    }

    fn registry(s: &str) -> RegistryName {
        s.parse().unwrap()
    }

    fn image(s: &str) -> ImageName {
        s.parse().unwrap()
    }

    fn tag(s: &str) -> Tag {
        s.parse().unwrap()
    }

    fn copy_op() -> RegistryOp {
        RegistryOp::Copy {
            src_registry: registry("gcr.io/src"),
            src_image: image("foo"),
            dst_registry: registry("gcr.io/dst"),
            dst_image: image("foo"),
            digest: digest('a'),
        }
    }

    #[tokio::test]
    async fn copy_moves_content_and_is_idempotent() {
        let memory = MemoryRegistry::new();
        {
            let mut inventory = memory.lock_inventory();
            inventory.record(&registry("gcr.io/src"), &image("foo"), digest('a'), vec![]);
        }

        memory.execute(&copy_op()).await.unwrap();
        assert!(memory
            .contents()
            .has_digest(&registry("gcr.io/dst"), &image("foo"), &digest('a')));

        // a second copy of the same digest changes nothing and succeeds
        let before = memory.contents();
        memory.execute(&copy_op()).await.unwrap();
        assert_eq!(memory.contents(), before);
    }

    #[tokio::test]
    async fn copy_requires_source_content() {
        let memory = MemoryRegistry::new();
        let result = memory.execute(&copy_op()).await;
        assert!(matches!(result, Err(RegistryError::DigestAbsent { .. })));
    }

    #[tokio::test]
    async fn set_tag_requires_destination_content() {
        let memory = MemoryRegistry::new();
        let op = RegistryOp::SetTag {
            registry: registry("gcr.io/dst"),
            image: image("foo"),
            digest: digest('a'),
            tag: tag("v1"),
        };
        assert!(matches!(
            memory.execute(&op).await,
            Err(RegistryError::DigestAbsent { .. })
        ));

        {
            let mut inventory = memory.lock_inventory();
            inventory.record(&registry("gcr.io/dst"), &image("foo"), digest('a'), vec![]);
        }
        memory.execute(&op).await.unwrap();
        let contents = memory.contents();
        let repo = contents
            .registry(&registry("gcr.io/dst"))
            .unwrap()
            .image(&image("foo"))
            .unwrap();
        assert_eq!(repo.digest_of_tag(&tag("v1")), Some(&digest('a')));
    }

    #[tokio::test]
    async fn induced_failures_surface_as_errors() {
        let memory = MemoryRegistry::new();
        {
            let mut inventory = memory.lock_inventory();
            inventory.record(&registry("gcr.io/src"), &image("foo"), digest('a'), vec![]);
        }
        memory.refuse_copies(digest('a'));
        assert!(memory.execute(&copy_op()).await.is_err());

        memory.refuse_reads(registry("gcr.io/src"));
        assert!(memory
            .read_registry(&registry("gcr.io/src"))
            .await
            .is_err());
    }
}

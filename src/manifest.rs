//! Declarative promotion manifests
//!
//! A manifest names the registries involved in a promotion and the images,
//! digests, and tags that must be present in every destination. Manifests
//! are parsed from YAML, validated once, and immutable afterward. Loading
//! files from disk is the caller's concern; the promoter only sees text.

use crate::{
    errors::ManifestError,
    image::{ContentDigest, ImageName, RegistryName, Tag},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How the promoter talks to one registry and whether it may act as the
/// source of a manifest
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryContext {
    pub name: RegistryName,

    /// Identity used for writes to this registry, resolved through the
    /// ambient credential store
    #[serde(
        rename = "service-account",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub service_account: Option<String>,

    #[serde(default)]
    pub src: bool,
}

/// One image and the digests (with their desired tags) it must provide
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestImage {
    pub name: ImageName,

    /// Desired digests, each with the tags that should point at it in every
    /// destination. An empty tag list promotes the digest untagged.
    #[serde(default)]
    pub dmap: BTreeMap<ContentDigest, Vec<Tag>>,
}

/// The declarative desired state for one source and its destinations
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub registries: Vec<RegistryContext>,

    #[serde(default)]
    pub images: Vec<ManifestImage>,
}

impl Manifest {
    /// Parse and validate one YAML manifest
    pub fn parse_yaml(text: &str) -> Result<Self, ManifestError> {
        let manifest: Manifest = serde_yaml::from_str(text)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check that exactly one registry is marked as the source
    pub fn validate(&self) -> Result<(), ManifestError> {
        let mut sources = self.registries.iter().filter(|registry| registry.src);
        let first = sources.next().ok_or(ManifestError::NoSource)?;
        match sources.next() {
            None => Ok(()),
            Some(second) => Err(ManifestError::MultipleSources(
                first.name.clone(),
                second.name.clone(),
            )),
        }
    }

    /// The registry every promotion in this manifest draws from
    pub fn source(&self) -> Option<&RegistryContext> {
        self.registries.iter().find(|registry| registry.src)
    }

    /// The registries this manifest promotes into
    pub fn destinations(&self) -> impl Iterator<Item = &RegistryContext> {
        self.registries.iter().filter(|registry| !registry.src)
    }
}

/// Merge the registry declarations of several manifests, deduplicated by
/// name
///
/// Two manifests may reference the same registry; they must then agree on
/// its service account, or leave it unset. Disagreement is fatal before any
/// mutation happens. The `src` marker is an or across manifests, since a
/// registry may be the source of one manifest and a destination of another.
pub fn merge_registries(
    manifests: &[Manifest],
) -> Result<Vec<RegistryContext>, ManifestError> {
    let mut merged: BTreeMap<RegistryName, RegistryContext> = BTreeMap::new();
    for manifest in manifests {
        for registry in &manifest.registries {
            match merged.get_mut(&registry.name) {
                None => {
                    merged.insert(registry.name.clone(), registry.clone());
                }
                Some(existing) => {
                    match (&existing.service_account, &registry.service_account) {
                        (Some(left), Some(right)) if left != right => {
                            return Err(ManifestError::ServiceAccountConflict {
                                registry: registry.name.clone(),
                                left: left.clone(),
                                right: right.clone(),
                            });
                        }
                        (None, Some(account)) => {
                            existing.service_account = Some(account.clone());
                        }
                        _ => (),
                    }
                    existing.src = existing.src || registry.src;
                }
            }
        }
    }
    Ok(merged.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "
registries:
  - name: gcr.io/src-project
    src: true
  - name: gcr.io/dst-project
    service-account: promoter@dst-project.iam.gserviceaccount.com
images:
  - name: my-image
    dmap:
      \"sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\": [\"v1.0.0\", \"latest\"]
      \"sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb\": []
";

    #[test]
    fn parse_sample_manifest() {
        let manifest = Manifest::parse_yaml(SAMPLE).unwrap();
        assert_eq!(manifest.registries.len(), 2);
        assert_eq!(
            manifest.source().unwrap().name,
            "gcr.io/src-project".parse().unwrap()
        );
        let destinations: Vec<_> = manifest.destinations().collect();
        assert_eq!(destinations.len(), 1);
        assert_eq!(
            destinations[0].service_account.as_deref(),
            Some("promoter@dst-project.iam.gserviceaccount.com")
        );

        assert_eq!(manifest.images.len(), 1);
        let image = &manifest.images[0];
        assert_eq!(image.name, "my-image".parse().unwrap());
        let tagged = image
            .dmap
            .get(&format!("sha256:{}", "a".repeat(64)).parse().unwrap())
            .unwrap();
        assert_eq!(tagged.len(), 2);
        let untagged = image
            .dmap
            .get(&format!("sha256:{}", "b".repeat(64)).parse().unwrap())
            .unwrap();
        assert!(untagged.is_empty());
    }

    #[test]
    fn manifest_must_name_one_source() {
        let no_source = "
registries:
  - name: gcr.io/dst-project
images: []
";
        assert!(matches!(
            Manifest::parse_yaml(no_source),
            Err(ManifestError::NoSource)
        ));

        let two_sources = "
registries:
  - name: gcr.io/one
    src: true
  - name: gcr.io/two
    src: true
images: []
";
        assert!(matches!(
            Manifest::parse_yaml(two_sources),
            Err(ManifestError::MultipleSources(_, _))
        ));
    }

    #[test]
    fn malformed_references_are_rejected() {
        let bad_digest = "
registries:
  - name: gcr.io/src
    src: true
images:
  - name: my-image
    dmap:
      \"sha256:nothex\": []
";
        assert!(matches!(
            Manifest::parse_yaml(bad_digest),
            Err(ManifestError::Yaml(_))
        ));
    }

    #[test]
    fn merge_detects_service_account_conflicts() {
        let left = Manifest::parse_yaml(SAMPLE).unwrap();
        let mut right = left.clone();
        right.registries[1].service_account = Some("other@example.com".to_string());

        let merged = merge_registries(&[left.clone(), left.clone()]).unwrap();
        assert_eq!(merged.len(), 2);

        assert!(matches!(
            merge_registries(&[left, right]),
            Err(ManifestError::ServiceAccountConflict { .. })
        ));
    }

    #[test]
    fn merge_is_an_or_over_src_markers() {
        let first = Manifest::parse_yaml(
            "
registries:
  - name: gcr.io/a
    src: true
  - name: gcr.io/b
images: []
",
        )
        .unwrap();
        let second = Manifest::parse_yaml(
            "
registries:
  - name: gcr.io/b
    src: true
  - name: gcr.io/c
images: []
",
        )
        .unwrap();

        let merged = merge_registries(&[first, second]).unwrap();
        assert_eq!(merged.len(), 3);
        let b = merged
            .iter()
            .find(|registry| registry.name == "gcr.io/b".parse().unwrap())
            .unwrap();
        assert!(b.src);
    }
}

//! Network client speaking the registry HTTP protocol
//!
//! Reads enumerate repositories and their digest/tag bindings; writes are
//! dispatched through [OpExecutor] so that the pipeline never knows whether
//! it is talking to a real server. Copies move content by digest: the
//! manifest is fetched from the source, referenced blobs are mounted or
//! uploaded at the destination, and the manifest bytes are put back
//! verbatim, so multi-architecture manifest lists survive the trip without
//! being decomposed. Registries that answer with a bearer challenge get
//! the stored credential traded for a short-lived token and the request
//! retried.

use crate::{
    errors::RegistryError,
    image::{ContentDigest, ImageName, RegistryName, Tag},
    inventory::{RegistryInventory, RepoInventory},
    registry::{
        auth::{parse_bearer_challenge, Auth, BearerChallenge, Credential},
        ops::{InventorySource, OpExecutor, RegistryOp},
        RegistryClientBuilder,
    },
};
use async_trait::async_trait;
use futures_util::{stream::FuturesUnordered, StreamExt};
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use url::Url;

const CATALOG_PAGE_SIZE: usize = 1000;

mod media_types {
    pub const MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
    pub const MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
    pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

    /// Accept header offering every manifest form we can copy
    pub const ACCEPT: &str = concat!(
        "application/vnd.docker.distribution.manifest.v2+json",
        ", application/vnd.docker.distribution.manifest.list.v2+json",
        ", application/vnd.oci.image.manifest.v1+json",
        ", application/vnd.oci.image.index.v1+json",
    );
}

fn is_manifest_list(media_type: &str) -> bool {
    media_type == media_types::MANIFEST_LIST || media_type == media_types::OCI_INDEX
}

#[derive(Deserialize)]
struct CatalogPage {
    #[serde(default)]
    repositories: Vec<String>,
}

#[derive(Deserialize)]
struct TagListing {
    #[serde(default)]
    tags: Option<Vec<String>>,

    /// Extended listing some registries return: digest to metadata map,
    /// which also surfaces untagged content
    #[serde(default)]
    manifest: Option<HashMap<String, ManifestMeta>>,
}

#[derive(Deserialize)]
struct ManifestMeta {
    #[serde(default)]
    tag: Vec<String>,
}

#[derive(Deserialize)]
struct ManifestBody {
    config: Option<DescriptorRef>,
    #[serde(default)]
    layers: Vec<DescriptorRef>,
}

#[derive(Deserialize)]
struct DescriptorRef {
    digest: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Registry clients can read inventories and apply promotion mutations
///
/// Each client includes settings like credentials and timeouts. One client
/// can be used against multiple registries concurrently.
#[derive(Clone)]
pub struct RegistryClient {
    network: Client,
    auth: Auth,
    service_accounts: HashMap<RegistryName, String>,
    use_service_account: bool,
}

impl RegistryClient {
    /// Construct a new registry client with default options
    pub fn new() -> Result<RegistryClient, RegistryError> {
        RegistryClient::builder().build()
    }

    /// Construct a registry client with custom options
    pub fn builder() -> RegistryClientBuilder {
        RegistryClientBuilder::new()
    }

    /// Return the default `User-Agent` that we use if no other is set
    pub fn default_user_agent() -> &'static str {
        concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))
    }

    pub(crate) fn from_parts(
        network: Client,
        auth: Auth,
        service_accounts: HashMap<RegistryName, String>,
        use_service_account: bool,
    ) -> Self {
        RegistryClient {
            network,
            auth,
            service_accounts,
            use_service_account,
        }
    }

    fn manifest_url(&self, registry: &RegistryName, image: &ImageName, reference: &str) -> String {
        format!(
            "{}/v2/{}/manifests/{}",
            registry.api_base(),
            registry.repository_path(image),
            reference
        )
    }

    fn blob_url(&self, registry: &RegistryName, image: &ImageName, digest: &ContentDigest) -> String {
        format!(
            "{}/v2/{}/blobs/{}",
            registry.api_base(),
            registry.repository_path(image),
            digest
        )
    }

    /// Attach credentials appropriate for a write to this registry
    ///
    /// When service-account selection is on and the registry declared one,
    /// the ambient token for that account wins over the plain registry
    /// credential.
    fn write_auth(&self, registry: &RegistryName, request: RequestBuilder) -> RequestBuilder {
        if self.use_service_account {
            if let Some(account) = self.service_accounts.get(registry) {
                match self.auth.token_for_account(account) {
                    Some(token) => return request.bearer_auth(token),
                    None => log::warn!("no ambient token for service account {}", account),
                }
            }
        }
        self.auth.apply(registry, request)
    }

    /// Trade our credential for a short-lived token at the challenge realm
    async fn fetch_token(
        &self,
        registry: &RegistryName,
        challenge: &BearerChallenge,
    ) -> Result<String, RegistryError> {
        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(service) = &challenge.service {
            query.push(("service", service));
        }
        if let Some(scope) = &challenge.scope {
            query.push(("scope", scope));
        }
        let mut request = self.network.get(&challenge.realm).query(&query);
        if let Some(Credential::Basic { username, password }) = self.auth.credential(registry) {
            request = request.basic_auth(username, password.as_ref());
        }
        log::debug!("fetching token from {}", challenge.realm);
        let response: TokenResponse = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        response
            .token
            .or(response.access_token)
            .ok_or_else(|| RegistryError::MissingToken(challenge.realm.clone()))
    }

    /// Send a request, answering one bearer challenge if the registry
    /// issues it
    async fn send_authenticated(
        &self,
        registry: &RegistryName,
        request: RequestBuilder,
    ) -> Result<Response, RegistryError> {
        let retry = request.try_clone();
        let response = request.send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        let challenge = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_bearer_challenge);
        let (retry, challenge) = match (retry, challenge) {
            (Some(retry), Some(challenge)) => (retry, challenge),
            // no retryable body or no bearer challenge; let the caller see
            // the denial as it stands
            _ => return Ok(response),
        };
        let token = self.fetch_token(registry, &challenge).await?;
        Ok(retry.bearer_auth(token).send().await?)
    }

    async fn catalog(&self, registry: &RegistryName) -> Result<Vec<String>, RegistryError> {
        let mut repositories: Vec<String> = Vec::new();
        let mut last: Option<String> = None;
        loop {
            let mut url = format!(
                "{}/v2/_catalog?n={}",
                registry.api_base(),
                CATALOG_PAGE_SIZE
            );
            if let Some(last) = &last {
                url.push_str("&last=");
                url.push_str(last);
            }
            log::debug!("listing {}", url);
            let page: CatalogPage = self
                .send_authenticated(registry, self.auth.apply(registry, self.network.get(&url)))
                .await?
                .error_for_status()?
                .json()
                .await?;
            let count = page.repositories.len();
            repositories.extend(page.repositories);
            if count < CATALOG_PAGE_SIZE {
                break;
            }
            last = repositories.last().cloned();
        }
        Ok(repositories)
    }

    /// The digest a tag points at right now, if the tag exists
    async fn resolve_tag(
        &self,
        registry: &RegistryName,
        image: &ImageName,
        tag: &Tag,
    ) -> Result<Option<ContentDigest>, RegistryError> {
        let url = self.manifest_url(registry, image, tag.as_str());
        let request = self
            .network
            .head(&url)
            .header(header::ACCEPT, media_types::ACCEPT);
        let response = self
            .send_authenticated(registry, self.auth.apply(registry, request))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status()?;
        match response.headers().get("docker-content-digest") {
            None => Err(RegistryError::MissingDigestHeader(url)),
            Some(value) => {
                let value = value
                    .to_str()
                    .map_err(|_| RegistryError::MissingDigestHeader(url.clone()))?;
                Ok(Some(ContentDigest::parse(value)?))
            }
        }
    }

    /// Read every digest and tag one repository holds
    pub async fn read_repository(
        &self,
        registry: &RegistryName,
        image: &ImageName,
    ) -> Result<RepoInventory, RegistryError> {
        let url = format!(
            "{}/v2/{}/tags/list",
            registry.api_base(),
            registry.repository_path(image)
        );
        let response = self
            .send_authenticated(registry, self.auth.apply(registry, self.network.get(&url)))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            // listed in the catalog but nothing pushed yet
            return Ok(RepoInventory::new());
        }
        let listing: TagListing = response.error_for_status()?.json().await?;

        let mut repo = RepoInventory::new();
        match listing.manifest {
            Some(manifest) => {
                // the extended listing covers untagged digests too
                for (digest, meta) in manifest {
                    let digest = ContentDigest::parse(&digest)?;
                    let mut tags = Vec::new();
                    for tag in meta.tag {
                        tags.push(Tag::parse(&tag)?);
                    }
                    repo.record(digest, tags);
                }
            }
            None => {
                for tag in listing.tags.unwrap_or_default() {
                    let tag = Tag::parse(&tag)?;
                    match self.resolve_tag(registry, image, &tag).await? {
                        Some(digest) => repo.record(digest, vec![tag]),
                        None => {
                            log::warn!("{}/{}:{} vanished while reading", registry, image, tag)
                        }
                    }
                }
            }
        }
        Ok(repo)
    }

    async fn manifest_exists(
        &self,
        registry: &RegistryName,
        image: &ImageName,
        digest: &ContentDigest,
    ) -> Result<bool, RegistryError> {
        let request = self
            .network
            .head(&self.manifest_url(registry, image, digest.as_str()))
            .header(header::ACCEPT, media_types::ACCEPT);
        let response = self
            .send_authenticated(registry, self.auth.apply(registry, request))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        response.error_for_status()?;
        Ok(true)
    }

    async fn try_fetch_manifest(
        &self,
        registry: &RegistryName,
        image: &ImageName,
        reference: &str,
    ) -> Result<Option<(Vec<u8>, String)>, RegistryError> {
        let url = self.manifest_url(registry, image, reference);
        let request = self
            .network
            .get(&url)
            .header(header::ACCEPT, media_types::ACCEPT);
        let response = self
            .send_authenticated(registry, self.auth.apply(registry, request))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status()?;
        let media_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(media_types::MANIFEST_V2)
            .to_owned();
        let bytes = response.bytes().await?.to_vec();
        Ok(Some((bytes, media_type)))
    }

    async fn fetch_manifest(
        &self,
        registry: &RegistryName,
        image: &ImageName,
        digest: &ContentDigest,
    ) -> Result<(Vec<u8>, String), RegistryError> {
        match self
            .try_fetch_manifest(registry, image, digest.as_str())
            .await?
        {
            Some(found) => Ok(found),
            None => Err(RegistryError::DigestAbsent {
                registry: registry.clone(),
                image: image.clone(),
                digest: digest.clone(),
            }),
        }
    }

    async fn put_manifest(
        &self,
        registry: &RegistryName,
        image: &ImageName,
        reference: &str,
        media_type: &str,
        bytes: Vec<u8>,
    ) -> Result<(), RegistryError> {
        let url = self.manifest_url(registry, image, reference);
        log::debug!("putting {}", url);
        let request = self
            .network
            .put(&url)
            .header(header::CONTENT_TYPE, media_type)
            .body(bytes);
        self.send_authenticated(registry, self.write_auth(registry, request))
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn blob_exists(
        &self,
        registry: &RegistryName,
        image: &ImageName,
        digest: &ContentDigest,
    ) -> Result<bool, RegistryError> {
        let request = self.network.head(&self.blob_url(registry, image, digest));
        let response = self
            .send_authenticated(registry, self.auth.apply(registry, request))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        response.error_for_status()?;
        Ok(true)
    }

    async fn fetch_blob(
        &self,
        registry: &RegistryName,
        image: &ImageName,
        digest: &ContentDigest,
    ) -> Result<Vec<u8>, RegistryError> {
        let url = self.blob_url(registry, image, digest);
        log::debug!("downloading {}", url);
        let response = self
            .send_authenticated(registry, self.auth.apply(registry, self.network.get(&url)))
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    fn resolve_location(
        &self,
        registry: &RegistryName,
        location: &str,
    ) -> Result<String, RegistryError> {
        if location.starts_with("http://") || location.starts_with("https://") {
            return Ok(location.to_owned());
        }
        let base = Url::parse(&format!("{}/", registry.api_base()))
            .map_err(|_| RegistryError::BadUploadLocation(location.to_owned()))?;
        let joined = base
            .join(location)
            .map_err(|_| RegistryError::BadUploadLocation(location.to_owned()))?;
        Ok(joined.to_string())
    }

    async fn upload_blob(
        &self,
        registry: &RegistryName,
        image: &ImageName,
        digest: &ContentDigest,
        data: Vec<u8>,
    ) -> Result<(), RegistryError> {
        let start = format!(
            "{}/v2/{}/blobs/uploads/",
            registry.api_base(),
            registry.repository_path(image)
        );
        let response = self
            .send_authenticated(registry, self.write_auth(registry, self.network.post(&start)))
            .await?
            .error_for_status()?;
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| RegistryError::BadUploadLocation(start.clone()))?;
        let upload = self.resolve_location(registry, location)?;
        let separator = if upload.contains('?') { '&' } else { '?' };
        let put = format!("{}{}digest={}", upload, separator, digest);
        log::debug!("uploading {} bytes to {}", data.len(), put);
        let request = self
            .network
            .put(&put)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(data);
        self.send_authenticated(registry, self.write_auth(registry, request))
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Make one blob present at the destination, mounting it across
    /// repositories when both registry roots live on the same server
    async fn ensure_blob(
        &self,
        src_registry: &RegistryName,
        src_image: &ImageName,
        dst_registry: &RegistryName,
        dst_image: &ImageName,
        digest: &ContentDigest,
    ) -> Result<(), RegistryError> {
        if self.blob_exists(dst_registry, dst_image, digest).await? {
            return Ok(());
        }
        if src_registry.host_str() == dst_registry.host_str()
            && src_registry.port() == dst_registry.port()
        {
            let url = format!(
                "{}/v2/{}/blobs/uploads/?mount={}&from={}",
                dst_registry.api_base(),
                dst_registry.repository_path(dst_image),
                digest,
                src_registry.repository_path(src_image)
            );
            let response = self
                .send_authenticated(
                    dst_registry,
                    self.write_auth(dst_registry, self.network.post(&url)),
                )
                .await?;
            if response.status() == StatusCode::CREATED {
                log::debug!("mounted {} into {}/{}", digest, dst_registry, dst_image);
                return Ok(());
            }
            // the server opened an upload session instead; fall through to
            // a plain transfer
        }
        let data = self.fetch_blob(src_registry, src_image, digest).await?;
        self.upload_blob(dst_registry, dst_image, digest, data)
            .await
    }

    async fn copy(
        &self,
        src_registry: &RegistryName,
        src_image: &ImageName,
        dst_registry: &RegistryName,
        dst_image: &ImageName,
        digest: &ContentDigest,
    ) -> Result<(), RegistryError> {
        if self.manifest_exists(dst_registry, dst_image, digest).await? {
            log::debug!(
                "{}/{}@{} already present, copy is a no-op",
                dst_registry,
                dst_image,
                digest
            );
            return Ok(());
        }
        let (bytes, media_type) = self.fetch_manifest(src_registry, src_image, digest).await?;
        if is_manifest_list(&media_type) {
            // manifest lists travel opaquely; their children are never
            // enumerated here
            log::debug!("{} is a manifest list, copying it verbatim", digest);
        } else {
            let body: ManifestBody = serde_json::from_slice(&bytes)?;
            let mut blobs = Vec::new();
            if let Some(config) = body.config {
                blobs.push(config.digest);
            }
            blobs.extend(body.layers.into_iter().map(|layer| layer.digest));
            for blob in blobs {
                let blob = ContentDigest::parse(&blob)?;
                self.ensure_blob(src_registry, src_image, dst_registry, dst_image, &blob)
                    .await?;
            }
        }
        self.put_manifest(dst_registry, dst_image, digest.as_str(), &media_type, bytes)
            .await
    }

    async fn set_tag(
        &self,
        registry: &RegistryName,
        image: &ImageName,
        digest: &ContentDigest,
        tag: &Tag,
    ) -> Result<(), RegistryError> {
        // re-put the destination's own manifest bytes under the tag; the
        // digest must already be present here
        let (bytes, media_type) = self.fetch_manifest(registry, image, digest).await?;
        self.put_manifest(registry, image, tag.as_str(), &media_type, bytes)
            .await
    }

    async fn delete_tag(
        &self,
        registry: &RegistryName,
        image: &ImageName,
        tag: &Tag,
    ) -> Result<(), RegistryError> {
        let url = self.manifest_url(registry, image, tag.as_str());
        let response = self
            .send_authenticated(registry, self.write_auth(registry, self.network.delete(&url)))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RegistryError::TagAbsent {
                registry: registry.clone(),
                image: image.clone(),
                tag: tag.clone(),
            });
        }
        response.error_for_status()?;
        Ok(())
    }

    async fn delete_digest(
        &self,
        registry: &RegistryName,
        image: &ImageName,
        digest: &ContentDigest,
    ) -> Result<(), RegistryError> {
        let url = self.manifest_url(registry, image, digest.as_str());
        let response = self
            .send_authenticated(registry, self.write_auth(registry, self.network.delete(&url)))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RegistryError::DigestAbsent {
                registry: registry.clone(),
                image: image.clone(),
                digest: digest.clone(),
            });
        }
        response.error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl InventorySource for RegistryClient {
    async fn read_registry(
        &self,
        registry: &RegistryName,
    ) -> Result<RegistryInventory, RegistryError> {
        let repositories = self.catalog(registry).await?;
        let mut inventory = RegistryInventory::new();
        let mut tasks = FuturesUnordered::new();
        for path in repositories {
            let image = match registry.relative_image(&path) {
                Some(image) => image,
                None => {
                    log::trace!("{} is outside registry {}", path, registry);
                    continue;
                }
            };
            tasks.push(async move {
                let contents = self.read_repository(registry, &image).await;
                (image, contents)
            });
        }
        while let Some((image, contents)) = tasks.next().await {
            match contents {
                Ok(repo) => {
                    *inventory.image_mut(&image) = repo;
                }
                Err(err) => {
                    // one bad repository never hides the rest
                    log::error!("failed to read {}/{}: {}", registry, image, err);
                }
            }
        }
        log::info!("read {} images from {}", inventory.len(), registry);
        Ok(inventory)
    }
}

#[async_trait]
impl OpExecutor for RegistryClient {
    async fn execute(&self, op: &RegistryOp) -> Result<(), RegistryError> {
        log::debug!("executing {}", op);
        match op {
            RegistryOp::Copy {
                src_registry,
                src_image,
                dst_registry,
                dst_image,
                digest,
            } => {
                self.copy(src_registry, src_image, dst_registry, dst_image, digest)
                    .await
            }
            RegistryOp::SetTag {
                registry,
                image,
                digest,
                tag,
            } => self.set_tag(registry, image, digest, tag).await,
            RegistryOp::DeleteTag {
                registry,
                image,
                tag,
            } => self.delete_tag(registry, image, tag).await,
            RegistryOp::DeleteDigest {
                registry,
                image,
                digest,
            } => self.delete_digest(registry, image, digest).await,
        }
    }
}

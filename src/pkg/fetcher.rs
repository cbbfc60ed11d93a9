//! Registry access for package images.
//!
//! The engine needs three registry calls: resolve a reference to a manifest
//! digest, list the tags of a repository, and download the package stream
//! stored in an image. [`RegistryFetcher`] implements them against the OCI
//! distribution API; [`NopFetcher`] answers every call with nothing.

use async_trait::async_trait;
use flate2::read::GzDecoder;
use reqwest::header::{ACCEPT, HeaderMap};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::io::Read;
use tokio_retry::RetryIf;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{debug, warn};

use crate::config::RegistryConfig;
use crate::constants::{REGISTRY_MAX_ATTEMPTS, REGISTRY_MAX_RETRY_DELAY, STREAM_FILE};
use crate::core::PkgError;
use crate::pkg::reference::{DEFAULT_REGISTRY, ImageReference};

/// Host actually serving the default registry.
const DEFAULT_REGISTRY_HOST: &str = "registry-1.docker.io";

const MANIFEST_MEDIA_TYPES: &str = "application/vnd.oci.image.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json";

const DIGEST_HEADER: &str = "Docker-Content-Digest";

/// Registry operations used by the engine.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Hex digest of the manifest `reference` points at.
    async fn head(&self, reference: &ImageReference, secrets: &[String]) -> Result<String, PkgError>;

    /// All tags of the repository of `reference`, as the registry spells them.
    async fn tags(&self, reference: &ImageReference, secrets: &[String])
    -> Result<Vec<String>, PkgError>;

    /// The package stream stored in the image.
    async fn fetch(&self, reference: &ImageReference, secrets: &[String]) -> Result<String, PkgError>;
}

/// A fetcher that finds nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopFetcher;

#[async_trait]
impl Fetcher for NopFetcher {
    async fn head(&self, _: &ImageReference, _: &[String]) -> Result<String, PkgError> {
        Ok(String::new())
    }

    async fn tags(&self, _: &ImageReference, _: &[String]) -> Result<Vec<String>, PkgError> {
        Ok(Vec::new())
    }

    async fn fetch(&self, _: &ImageReference, _: &[String]) -> Result<String, PkgError> {
        Ok(String::new())
    }
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    layers: Vec<Descriptor>,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    digest: String,
}

/// One failed request attempt.
struct AttemptError {
    transient: bool,
    error: PkgError,
}

/// OCI distribution API client.
#[derive(Debug, Clone)]
pub struct RegistryFetcher {
    client: Client,
    config: RegistryConfig,
}

impl RegistryFetcher {
    pub fn new(config: RegistryConfig) -> Result<Self, PkgError> {
        let client = Client::builder()
            .user_agent(concat!("ctlpkg/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PkgError::Registry {
                url: String::new(),
                reason: format!("cannot build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            config,
        })
    }

    fn base_url(&self, reference: &ImageReference) -> String {
        let registry = reference.registry();
        let scheme = if self.config.is_insecure(registry) {
            "http"
        } else {
            "https"
        };
        let host = if registry == DEFAULT_REGISTRY {
            DEFAULT_REGISTRY_HOST
        } else {
            registry
        };
        format!("{scheme}://{host}/v2/{}", reference.repository())
    }

    fn request(&self, method: Method, url: &str, secrets: &[String]) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match self.config.credentials_for(secrets.iter().map(String::as_str)) {
            Some(creds) => builder.basic_auth(&creds.username, Some(&creds.password)),
            None => builder,
        }
    }

    /// Send a request, retrying transport failures and server errors.
    async fn send(
        &self,
        method: Method,
        url: &str,
        secrets: &[String],
        headers: HeaderMap,
    ) -> Result<Response, PkgError> {
        let strategy = ExponentialBackoff::from_millis(10)
            .max_delay(REGISTRY_MAX_RETRY_DELAY)
            .factor(2)
            .take(REGISTRY_MAX_ATTEMPTS - 1);

        let attempt = || {
            let request = self.request(method.clone(), url, secrets).headers(headers.clone());
            async move {
                let response = request.send().await.map_err(|e| AttemptError {
                    transient: true,
                    error: registry_error(url, e.to_string()),
                })?;

                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }
                let transient = status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
                if transient {
                    debug!(url, %status, "Registry request failed, will retry");
                }
                Err(AttemptError {
                    transient,
                    error: registry_error(url, format!("unexpected status {status}")),
                })
            }
        };

        RetryIf::spawn(strategy, attempt, |e: &AttemptError| e.transient)
            .await
            .map_err(|e| e.error)
    }

    async fn manifest(&self, reference: &ImageReference, secrets: &[String]) -> Result<Manifest, PkgError> {
        let url = format!("{}/manifests/{}", self.base_url(reference), reference.identifier().as_str());
        let response = self.send(Method::GET, &url, secrets, manifest_headers()).await?;
        response
            .json::<Manifest>()
            .await
            .map_err(|e| registry_error(&url, format!("invalid manifest: {e}")))
    }
}

fn registry_error(url: &str, reason: impl Into<String>) -> PkgError {
    PkgError::Registry {
        url: url.to_string(),
        reason: reason.into(),
    }
}

fn manifest_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = MANIFEST_MEDIA_TYPES.parse() {
        headers.insert(ACCEPT, value);
    }
    headers
}

/// Extract [`STREAM_FILE`] from a gzip'd tar layer.
fn extract_stream(layer: &[u8]) -> Result<String, PkgError> {
    let mut archive = tar::Archive::new(GzDecoder::new(layer));
    for entry in archive.entries()? {
        let mut entry = entry?;
        let is_stream = entry.path()?.file_name().is_some_and(|name| name == STREAM_FILE);
        if is_stream {
            let mut stream = String::new();
            entry.read_to_string(&mut stream)?;
            return Ok(stream);
        }
    }
    Err(PkgError::Parse {
        reason: format!("package image layer has no {STREAM_FILE}"),
    })
}

#[async_trait]
impl Fetcher for RegistryFetcher {
    async fn head(&self, reference: &ImageReference, secrets: &[String]) -> Result<String, PkgError> {
        let url = format!("{}/manifests/{}", self.base_url(reference), reference.identifier().as_str());
        let response = self.send(Method::HEAD, &url, secrets, manifest_headers()).await?;

        let digest = response
            .headers()
            .get(DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| registry_error(&url, format!("response has no {DIGEST_HEADER} header")))?;

        let hex = digest.split_once(':').map_or(digest, |(_, hex)| hex);
        Ok(hex.to_string())
    }

    async fn tags(&self, reference: &ImageReference, secrets: &[String]) -> Result<Vec<String>, PkgError> {
        let url = format!("{}/tags/list", self.base_url(reference));
        let response = self.send(Method::GET, &url, secrets, HeaderMap::new()).await?;
        let list = response
            .json::<TagList>()
            .await
            .map_err(|e| registry_error(&url, format!("invalid tag list: {e}")))?;
        Ok(list.tags.unwrap_or_default())
    }

    async fn fetch(&self, reference: &ImageReference, secrets: &[String]) -> Result<String, PkgError> {
        let manifest = self.manifest(reference, secrets).await?;
        let Some(layer) = manifest.layers.first() else {
            return Err(PkgError::Parse {
                reason: format!("package image {reference} has no layers"),
            });
        };

        let url = format!("{}/blobs/{}", self.base_url(reference), layer.digest);
        let bytes = self
            .send(Method::GET, &url, secrets, HeaderMap::new())
            .await?
            .bytes()
            .await
            .map_err(|e| registry_error(&url, e.to_string()))?;

        if let Some(expected) = layer.digest.strip_prefix("sha256:") {
            let actual = hex::encode(Sha256::digest(&bytes));
            if actual != expected {
                warn!(%reference, expected, %actual, "Package layer digest mismatch");
                return Err(registry_error(&url, "layer digest mismatch"));
            }
        }

        tokio::task::spawn_blocking(move || extract_stream(&bytes))
            .await
            .map_err(|e| PkgError::Parse {
                reason: format!("layer extraction failed: {e}"),
            })?
    }
}

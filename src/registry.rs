// Copyright 2026 the spm authors. MIT license.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::LocalBoxFuture;
use futures::future::Shared;
use futures::FutureExt;
use parking_lot::Mutex;
use semver::Version;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::http_util::HttpClient;
use crate::http_util::HttpError;
use crate::resolution::Reference;

pub const DEFAULT_REGISTRY_URL: &str = "https://registry.yarnpkg.com";

#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("Error fetching '{url}'.")]
  Fetch {
    url: Url,
    #[source]
    source: HttpError,
  },
  #[error("Error reading '{}'.", .path.display())]
  ReadLocal {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Malformed registry response for '{name}'.")]
  ParseVersions {
    name: String,
    #[source]
    source: serde_json::Error,
  },
  #[error("Invalid registry url for '{name}'.")]
  InvalidPackageUrl {
    name: String,
    #[source]
    source: url::ParseError,
  },
  #[error("Cannot fetch a tarball for '{name}@{reference}'.")]
  NotFetchable { name: String, reference: String },
  #[error("{message}")]
  LoadFailed { message: String },
}

/// Formats an error the way anyhow's alternate form does, so a failure
/// surfaced out of the shared cache keeps its full chain.
fn error_chain(err: &dyn std::error::Error) -> String {
  let mut text = err.to_string();
  let mut maybe_source = err.source();
  while let Some(source) = maybe_source {
    text.push_str(": ");
    text.push_str(&source.to_string());
    maybe_source = source.source();
  }
  text
}

/// The registry as the resolver and installer see it. The separation
/// exists so resolution tests can run against an in-memory fake.
#[async_trait(?Send)]
pub trait RegistryApi: std::fmt::Debug {
  /// All published versions of the package, in no particular order.
  async fn package_versions(
    &self,
    name: &str,
  ) -> Result<Arc<Vec<Version>>, RegistryError>;

  /// The tarball bytes behind an exact reference (version, url or path).
  async fn fetch_tarball(
    &self,
    name: &str,
    reference: &Reference,
  ) -> Result<Arc<Vec<u8>>, RegistryError>;
}

type VersionsResult = Result<Arc<Vec<Version>>, Arc<RegistryError>>;
type TarballResult = Result<Arc<Vec<u8>>, Arc<RegistryError>>;

#[derive(Debug, Clone)]
enum CacheItem<T: Clone> {
  Pending(Shared<LocalBoxFuture<'static, T>>),
  Resolved(T),
}

/// Talks to the configured registry over http. Version listings and
/// tarballs are memoized for the lifetime of the process; concurrent
/// requests for the same key share one in-flight future.
#[derive(Debug, Clone)]
pub struct HttpRegistry(Arc<HttpRegistryInner>);

#[derive(Debug)]
struct HttpRegistryInner {
  client: HttpClient,
  registry_url: Url,
  versions_cache: Mutex<HashMap<String, CacheItem<VersionsResult>>>,
  tarball_cache: Mutex<HashMap<String, CacheItem<TarballResult>>>,
}

#[derive(Debug, Deserialize)]
struct PackageDocument {
  #[serde(default)]
  versions: HashMap<String, serde::de::IgnoredAny>,
}

impl HttpRegistry {
  pub fn new() -> Result<Self, HttpError> {
    // the constant is statically known to parse
    let registry_url = Url::parse(DEFAULT_REGISTRY_URL).unwrap();
    Self::with_registry_url(registry_url)
  }

  pub fn with_registry_url(registry_url: Url) -> Result<Self, HttpError> {
    Ok(Self(Arc::new(HttpRegistryInner {
      client: HttpClient::new()?,
      registry_url,
      versions_cache: Default::default(),
      tarball_cache: Default::default(),
    })))
  }
}

impl HttpRegistryInner {
  fn package_url(&self, name: &str) -> Result<Url, RegistryError> {
    self.registry_url.join(name).map_err(|source| {
      RegistryError::InvalidPackageUrl {
        name: name.to_string(),
        source,
      }
    })
  }

  fn tarball_url(
    &self,
    name: &str,
    version: &Version,
  ) -> Result<Url, RegistryError> {
    self
      .registry_url
      .join(&format!("{name}/-/{name}-{version}.tgz"))
      .map_err(|source| RegistryError::InvalidPackageUrl {
        name: name.to_string(),
        source,
      })
  }

  async fn download(&self, url: Url) -> Result<Vec<u8>, RegistryError> {
    log::debug!("Downloading {}", url);
    self
      .client
      .download(url.clone())
      .await
      .map_err(|source| RegistryError::Fetch { url, source })
  }

  async fn fetch_versions(
    &self,
    name: &str,
  ) -> Result<Vec<Version>, RegistryError> {
    let url = self.package_url(name)?;
    let bytes = self.download(url).await?;
    let document: PackageDocument = serde_json::from_slice(&bytes).map_err(
      |source| RegistryError::ParseVersions {
        name: name.to_string(),
        source,
      },
    )?;
    let mut versions = Vec::with_capacity(document.versions.len());
    for version in document.versions.keys() {
      match Version::parse(version) {
        Ok(version) => versions.push(version),
        Err(err) => log::debug!(
          "Ignoring unparseable version '{}' of '{}': {}",
          version,
          name,
          err
        ),
      }
    }
    Ok(versions)
  }

  async fn fetch_tarball(
    &self,
    name: &str,
    reference: &Reference,
  ) -> Result<Vec<u8>, RegistryError> {
    match reference {
      Reference::Path(path) => tokio::fs::read(path).await.map_err(|source| {
        RegistryError::ReadLocal {
          path: path.clone(),
          source,
        }
      }),
      Reference::Exact(version) => {
        let url = self.tarball_url(name, version)?;
        self.download(url).await
      }
      Reference::Url(url) => self.download(url.clone()).await,
      Reference::Range { .. } | Reference::Root => {
        Err(RegistryError::NotFetchable {
          name: name.to_string(),
          reference: reference.to_string(),
        })
      }
    }
  }

  async fn cached_versions(self: &Arc<Self>, name: &str) -> VersionsResult {
    let (created, future) = {
      let mut cache = self.versions_cache.lock();
      match cache.get(name) {
        Some(CacheItem::Resolved(result)) => return result.clone(),
        Some(CacheItem::Pending(future)) => (false, future.clone()),
        None => {
          let future = {
            let inner = self.clone();
            let name = name.to_string();
            async move {
              inner
                .fetch_versions(&name)
                .await
                .map(Arc::new)
                .map_err(Arc::new)
            }
            .boxed_local()
            .shared()
          };
          cache.insert(name.to_string(), CacheItem::Pending(future.clone()));
          (true, future)
        }
      }
    };

    let result = future.await;
    if created {
      // replace the pending entry so the future can be dropped
      self
        .versions_cache
        .lock()
        .insert(name.to_string(), CacheItem::Resolved(result.clone()));
    }
    result
  }

  async fn cached_tarball(
    self: &Arc<Self>,
    name: &str,
    reference: &Reference,
  ) -> TarballResult {
    let key = format!("{name}@{reference}");
    let (created, future) = {
      let mut cache = self.tarball_cache.lock();
      match cache.get(&key) {
        Some(CacheItem::Resolved(result)) => return result.clone(),
        Some(CacheItem::Pending(future)) => (false, future.clone()),
        None => {
          let future = {
            let inner = self.clone();
            let name = name.to_string();
            let reference = reference.clone();
            async move {
              inner
                .fetch_tarball(&name, &reference)
                .await
                .map(Arc::new)
                .map_err(Arc::new)
            }
            .boxed_local()
            .shared()
          };
          cache.insert(key.clone(), CacheItem::Pending(future.clone()));
          (true, future)
        }
      }
    };

    let result = future.await;
    if created {
      self
        .tarball_cache
        .lock()
        .insert(key, CacheItem::Resolved(result.clone()));
    }
    result
  }
}

#[async_trait(?Send)]
impl RegistryApi for HttpRegistry {
  async fn package_versions(
    &self,
    name: &str,
  ) -> Result<Arc<Vec<Version>>, RegistryError> {
    self.0.cached_versions(name).await.map_err(|err| {
      RegistryError::LoadFailed {
        message: error_chain(&*err),
      }
    })
  }

  async fn fetch_tarball(
    &self,
    name: &str,
    reference: &Reference,
  ) -> Result<Arc<Vec<u8>>, RegistryError> {
    self.0.cached_tarball(name, reference).await.map_err(|err| {
      RegistryError::LoadFailed {
        message: error_chain(&*err),
      }
    })
  }
}

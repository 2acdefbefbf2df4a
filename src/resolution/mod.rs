// Copyright 2026 the spm authors. MIT license.

mod common;
pub mod hoist;
mod reference;

use std::sync::Arc;

use futures::future::join_all;
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use thiserror::Error;

pub use reference::Descriptor;
pub use reference::Reference;
pub use reference::ReferenceParseError;

use crate::package_json::PackageJson;
use crate::package_json::PACKAGE_MANIFEST_FILENAME;
use crate::progress_bar::ProgressBar;
use crate::registry::RegistryApi;
use crate::registry::RegistryError;
use crate::tarball;
use crate::tarball::TarballError;

#[derive(Debug, Error)]
pub enum ResolutionError {
  #[error(transparent)]
  UnsatisfiedRange(#[from] common::VersionReqNotMatched),
  #[error(transparent)]
  InvalidReference(#[from] ReferenceParseError),
  #[error(transparent)]
  Registry(#[from] RegistryError),
  #[error("Error extracting the manifest of '{descriptor}'.")]
  ManifestRead {
    descriptor: String,
    #[source]
    source: TarballError,
  },
  #[error("Error parsing the manifest of '{descriptor}'.")]
  ManifestParse {
    descriptor: String,
    #[source]
    source: serde_json::Error,
  },
}

/// A dependency pinned to a concrete source, with everything below it
/// resolved. The root node carries the [`Reference::Root`] sentinel and
/// is never fetched.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedNode {
  pub name: String,
  pub reference: Reference,
  pub children: Vec<ResolvedNode>,
}

/// The name → pinned reference scope threaded down through resolution.
/// Extending pushes a frame that shares the parent chain, so concurrent
/// sibling branches never observe each other's pins and a child scope
/// shadows its ancestors.
#[derive(Clone, Debug, Default)]
pub struct AvailableSet(Option<Arc<AvailableFrame>>);

#[derive(Debug)]
struct AvailableFrame {
  parent: Option<Arc<AvailableFrame>>,
  name: String,
  reference: Reference,
}

impl AvailableSet {
  pub fn get(&self, name: &str) -> Option<&Reference> {
    let mut maybe_frame = self.0.as_deref();
    while let Some(frame) = maybe_frame {
      if frame.name == name {
        return Some(&frame.reference);
      }
      maybe_frame = frame.parent.as_deref();
    }
    None
  }

  pub fn with(&self, name: String, reference: Reference) -> Self {
    Self(Some(Arc::new(AvailableFrame {
      parent: self.0.clone(),
      name,
      reference,
    })))
  }
}

/// A descriptor is already satisfied when an enclosing scope pinned the
/// same name to the same reference, or to an exact version matching the
/// descriptor's range.
fn is_satisfied(descriptor: &Descriptor, available: &AvailableSet) -> bool {
  let Some(available_reference) = available.get(&descriptor.name) else {
    return false;
  };
  if available_reference == &descriptor.reference {
    return true;
  }
  if let Reference::Range { req, .. } = &descriptor.reference {
    if let Reference::Exact(version) = available_reference {
      return req.matches(version);
    }
  }
  false
}

#[derive(Debug)]
pub struct Resolver {
  registry: Arc<dyn RegistryApi>,
  progress: ProgressBar,
}

impl Resolver {
  pub fn new(registry: Arc<dyn RegistryApi>, progress: ProgressBar) -> Self {
    Self { registry, progress }
  }

  /// Pins a range reference to the highest published version satisfying
  /// it. Every other reference shape passes through untouched, without a
  /// registry round trip.
  pub async fn pin_reference(
    &self,
    descriptor: Descriptor,
  ) -> Result<Descriptor, ResolutionError> {
    match &descriptor.reference {
      Reference::Range { text, req } => {
        let versions =
          self.registry.package_versions(&descriptor.name).await?;
        let version = common::resolve_best_version(req, versions.iter())
          .ok_or_else(|| common::VersionReqNotMatched {
            package_name: descriptor.name.clone(),
            version_req: text.clone(),
          })?;
        Ok(Descriptor::new(
          descriptor.name,
          Reference::Exact(version.clone()),
        ))
      }
      _ => Ok(descriptor),
    }
  }

  /// Reads the dependency list out of the package's own manifest.
  pub async fn read_dependencies(
    &self,
    descriptor: &Descriptor,
  ) -> Result<Vec<Descriptor>, ResolutionError> {
    let tarball_bytes = self
      .registry
      .fetch_tarball(&descriptor.name, &descriptor.reference)
      .await?;
    let manifest_bytes = tarball::read_one_file(
      &tarball_bytes,
      PACKAGE_MANIFEST_FILENAME,
      descriptor.reference.strip_components(),
    )
    .map_err(|source| ResolutionError::ManifestRead {
      descriptor: descriptor.to_string(),
      source,
    })?;
    let manifest = PackageJson::parse(&manifest_bytes).map_err(|source| {
      ResolutionError::ManifestParse {
        descriptor: descriptor.to_string(),
        source,
      }
    })?;
    parse_dependencies(&manifest)
  }

  /// Resolves the whole tree below `descriptor` (itself already pinned),
  /// fanning out over `dependencies` concurrently. Every branch extends
  /// its own copy of `available`, and branches that an enclosing scope
  /// already satisfies are pruned.
  pub fn resolve_tree(
    &self,
    descriptor: Descriptor,
    dependencies: Vec<Descriptor>,
    available: AvailableSet,
  ) -> LocalBoxFuture<'_, Result<ResolvedNode, ResolutionError>> {
    async move {
      let mut branches = Vec::with_capacity(dependencies.len());
      for dependency in dependencies {
        if is_satisfied(&dependency, &available) {
          log::debug!("'{}' already satisfied by an enclosing scope", dependency);
          continue;
        }
        self.progress.add_total(1);
        let available = available.clone();
        branches.push(async move {
          let pinned = self.pin_reference(dependency).await?;
          let transitive = self.read_dependencies(&pinned).await?;
          let available =
            available.with(pinned.name.clone(), pinned.reference.clone());
          let node = self.resolve_tree(pinned, transitive, available).await?;
          self.progress.tick();
          Ok::<_, ResolutionError>(node)
        });
      }
      // join every branch, then surface the first error
      let mut children = Vec::with_capacity(branches.len());
      for result in join_all(branches).await {
        children.push(result?);
      }
      Ok(ResolvedNode {
        name: descriptor.name,
        reference: descriptor.reference,
        children,
      })
    }
    .boxed_local()
  }

  /// Resolves the dependency tree of the root project manifest.
  pub async fn resolve_manifest(
    &self,
    manifest: &PackageJson,
  ) -> Result<ResolvedNode, ResolutionError> {
    let name = manifest
      .name
      .clone()
      .unwrap_or_else(|| "root".to_string());
    let dependencies = parse_dependencies(manifest)?;
    self
      .resolve_tree(
        Descriptor::new(name, Reference::Root),
        dependencies,
        AvailableSet::default(),
      )
      .await
  }
}

fn parse_dependencies(
  manifest: &PackageJson,
) -> Result<Vec<Descriptor>, ResolutionError> {
  manifest
    .dependencies
    .iter()
    .map(|(name, reference)| {
      Ok(Descriptor::new(
        name.clone(),
        Reference::parse(name, reference)?,
      ))
    })
    .collect()
}

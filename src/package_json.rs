// Copyright 2026 the spm authors. MIT license.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

/// Manifest of the root project, expected in the project directory.
pub const PROJECT_MANIFEST_FILENAME: &str = "spm-package.json";
/// Manifest carried inside every package tarball.
pub const PACKAGE_MANIFEST_FILENAME: &str = "package.json";

#[derive(Debug, Error)]
pub enum PackageJsonLoadError {
  #[error("Error reading '{}'.", .0.display())]
  Reading(PathBuf, #[source] std::io::Error),
  #[error("Error parsing '{}'.", .0.display())]
  Parsing(PathBuf, #[source] serde_json::Error),
}

/// The subset of a package manifest that the installer consumes. Anything
/// else in the document is ignored.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PackageJson {
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub dependencies: BTreeMap<String, String>,
  #[serde(default)]
  pub bin: Option<PackageJsonBins>,
  #[serde(default)]
  pub scripts: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum PackageJsonBins {
  Bin(String),
  Bins(BTreeMap<String, String>),
}

impl PackageJson {
  pub fn parse(data: &[u8]) -> Result<Self, serde_json::Error> {
    serde_json::from_slice(data)
  }

  pub fn load_from_path(path: &Path) -> Result<Self, PackageJsonLoadError> {
    let data = std::fs::read(path)
      .map_err(|source| PackageJsonLoadError::Reading(path.to_path_buf(), source))?;
    Self::parse(&data)
      .map_err(|source| PackageJsonLoadError::Parsing(path.to_path_buf(), source))
  }

  /// Returns the name of the default bin entry for this package.
  /// This is the package name without the organization (`@org/`), if any.
  pub fn default_bin_name(&self) -> Option<&str> {
    self.name.as_deref().map(|name| {
      name
        .rsplit_once('/')
        .map(|(_, name)| name)
        .unwrap_or(name)
    })
  }

  /// The `bin` field normalized to a map of shim name to in-package path.
  pub fn bin_entries(&self) -> BTreeMap<String, String> {
    match &self.bin {
      Some(PackageJsonBins::Bin(script)) => match self.default_bin_name() {
        Some(name) => BTreeMap::from([(name.to_string(), script.clone())]),
        None => {
          log::warn!(
            "{} Ignoring string 'bin' entry of a package without a name.",
            crate::colors::yellow("Warning")
          );
          BTreeMap::new()
        }
      },
      Some(PackageJsonBins::Bins(bins)) => bins.clone(),
      None => BTreeMap::new(),
    }
  }
}

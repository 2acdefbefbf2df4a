// Copyright 2026 the spm authors. MIT license.

use semver::Version;
use semver::VersionReq;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Could not find package '{package_name}' matching '{version_req}'.")]
pub struct VersionReqNotMatched {
  pub package_name: String,
  pub version_req: String,
}

/// Picks the highest of `versions` satisfying `version_req` under
/// standard semver precedence.
pub fn resolve_best_version<'a>(
  version_req: &VersionReq,
  versions: impl Iterator<Item = &'a Version>,
) -> Option<&'a Version> {
  let mut maybe_best_version: Option<&Version> = None;
  for version in versions {
    if version_req.matches(version) {
      let is_best_version = maybe_best_version
        .as_ref()
        .map(|best_version| (*best_version).cmp(version).is_lt())
        .unwrap_or(true);
      if is_best_version {
        maybe_best_version = Some(version);
      }
    }
  }
  maybe_best_version
}

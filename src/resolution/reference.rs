// Copyright 2026 the spm authors. MIT license.

use std::fmt;
use std::path::PathBuf;

use semver::Version;
use semver::VersionReq;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
#[error("Invalid reference '{reference}' for package '{name}'.")]
pub struct ReferenceParseError {
  pub name: String,
  pub reference: String,
  #[source]
  pub source: url::ParseError,
}

/// Where a package comes from. Parsed once at manifest ingestion so the
/// rest of the pipeline dispatches on shape instead of re-inspecting
/// strings.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Reference {
  /// The root project itself. Never fetched or extracted.
  Root,
  Exact(Version),
  Range { text: String, req: VersionReq },
  Url(Url),
  Path(PathBuf),
}

impl Reference {
  pub fn parse(
    name: &str,
    reference: &str,
  ) -> Result<Self, ReferenceParseError> {
    if reference.starts_with('/')
      || reference.starts_with("./")
      || reference.starts_with("../")
    {
      return Ok(Self::Path(PathBuf::from(reference)));
    }
    if let Ok(version) = Version::parse(reference) {
      return Ok(Self::Exact(version));
    }
    if let Ok(req) = VersionReq::parse(reference) {
      return Ok(Self::Range {
        text: reference.to_string(),
        req,
      });
    }
    match Url::parse(reference) {
      Ok(url) => Ok(Self::Url(url)),
      Err(source) => Err(ReferenceParseError {
        name: name.to_string(),
        reference: reference.to_string(),
        source,
      }),
    }
  }

  pub fn is_root(&self) -> bool {
    matches!(self, Self::Root)
  }

  pub fn is_range(&self) -> bool {
    matches!(self, Self::Range { .. })
  }

  /// Registry and url tarballs wrap their contents in a top level
  /// `package/` directory; local tarballs do not.
  pub fn strip_components(&self) -> usize {
    match self {
      Self::Path(_) => 0,
      _ => 1,
    }
  }
}

impl fmt::Display for Reference {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Root => Ok(()),
      Self::Exact(version) => write!(f, "{}", version),
      Self::Range { text, .. } => write!(f, "{}", text),
      Self::Url(url) => write!(f, "{}", url),
      Self::Path(path) => write!(f, "{}", path.display()),
    }
  }
}

/// A dependency as declared: a package name plus a reference.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Descriptor {
  pub name: String,
  pub reference: Reference,
}

impl Descriptor {
  pub fn new(name: String, reference: Reference) -> Self {
    Self { name, reference }
  }
}

impl fmt::Display for Descriptor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}@{}", self.name, self.reference)
  }
}

// Copyright 2026 the spm authors. MIT license.

use std::collections::HashSet;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;

use flate2::read::GzDecoder;
use tar::Archive;
use tar::EntryType;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TarballError {
  #[error("Could not find '{filename}' in archive.")]
  EntryNotFound { filename: String },
  #[error("Extracted path '{}' was not in the output directory.", .path.display())]
  PathEscape { path: PathBuf },
  #[error(transparent)]
  Io(#[from] std::io::Error),
}

const GZIP_MAGIC_BYTES: [u8; 2] = [0x1f, 0x8b];

/// Registry tarballs are gzipped, local ones may be plain tar. Sniff the
/// magic bytes instead of trusting the file name.
fn entry_reader(data: &[u8]) -> Box<dyn Read + '_> {
  if data.starts_with(&GZIP_MAGIC_BYTES) {
    Box::new(GzDecoder::new(data))
  } else {
    Box::new(data)
  }
}

/// Normalizes a tar entry header name: leading slashes are dropped, then
/// the first `strip_components` path segments are removed. `None` means
/// the name does not survive the strip (too few segments, or nothing
/// left) and the entry is to be skipped.
fn strip_entry_name(name: &str, strip_components: usize) -> Option<String> {
  let components = name
    .split('/')
    .filter(|component| !component.is_empty())
    .collect::<Vec<_>>();
  if components.len() < strip_components {
    return None;
  }
  let stripped = components[strip_components..].join("/");
  if stripped.is_empty() {
    None
  } else {
    Some(stripped)
  }
}

/// Streams the archive and returns the contents of the entry whose
/// stripped name equals `filename`. Entries before the match are consumed
/// as the iterator advances past their data.
pub fn read_one_file(
  data: &[u8],
  filename: &str,
  strip_components: usize,
) -> Result<Vec<u8>, TarballError> {
  let mut archive = Archive::new(entry_reader(data));
  for entry in archive.entries()? {
    let mut entry = entry?;
    let name = entry.path()?.to_string_lossy().into_owned();
    let Some(stripped) = strip_entry_name(&name, strip_components) else {
      continue;
    };
    if stripped == filename {
      let mut contents = Vec::new();
      entry.read_to_end(&mut contents)?;
      return Ok(contents);
    }
  }
  Err(TarballError::EntryNotFound {
    filename: filename.to_string(),
  })
}

/// Unpacks every entry into `output_folder` with `strip_components`
/// leading path segments removed from each entry name.
pub fn extract_all(
  data: &[u8],
  output_folder: &Path,
  strip_components: usize,
) -> Result<(), TarballError> {
  fs::create_dir_all(output_folder)?;
  let output_folder = fs::canonicalize(output_folder)?;
  let mut archive = Archive::new(entry_reader(data));
  archive.set_overwrite(true);
  archive.set_preserve_permissions(true);
  let mut created_dirs = HashSet::new();

  for entry in archive.entries()? {
    let mut entry = entry?;
    let name = entry.path()?.to_string_lossy().into_owned();
    let entry_type = entry.header().entry_type();
    let Some(stripped) = strip_entry_name(&name, strip_components) else {
      continue;
    };
    let absolute_path = output_folder.join(&stripped);
    let dir_path = if entry_type == EntryType::Directory {
      absolute_path.as_path()
    } else {
      absolute_path.parent().unwrap()
    };
    if created_dirs.insert(dir_path.to_path_buf()) {
      fs::create_dir_all(dir_path)?;
      let canonicalized_dir = fs::canonicalize(dir_path)?;
      if !canonicalized_dir.starts_with(&output_folder) {
        return Err(TarballError::PathEscape {
          path: canonicalized_dir,
        });
      }
    }
    if entry_type == EntryType::Regular {
      entry.unpack(&absolute_path)?;
    }
  }
  Ok(())
}

#[cfg(test)]
pub mod test {
  use std::io::Write;

  use super::*;

  pub fn build_tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, contents) in entries {
      if let Some(dir_path) = path.strip_suffix('/') {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        header.set_mode(0o755);
        header.set_cksum();
        builder
          .append_data(&mut header, format!("{dir_path}/"), &[] as &[u8])
          .unwrap();
      } else {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, *contents).unwrap();
      }
    }
    builder.into_inner().unwrap()
  }

  pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(
      Vec::new(),
      flate2::Compression::default(),
    );
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
  }

  #[test]
  fn test_strip_entry_name() {
    assert_eq!(
      strip_entry_name("package/lib/index.js", 1),
      Some("lib/index.js".to_string())
    );
    assert_eq!(
      strip_entry_name("/package/index.js", 1),
      Some("index.js".to_string())
    );
    assert_eq!(strip_entry_name("index.js", 0), Some("index.js".to_string()));
    // exactly strip_components segments leaves nothing
    assert_eq!(strip_entry_name("package/", 1), None);
    assert_eq!(strip_entry_name("package", 1), None);
    // fewer segments than strip_components
    assert_eq!(strip_entry_name("package/index.js", 3), None);
    assert_eq!(strip_entry_name("", 0), None);
  }

  #[test]
  fn test_read_one_file_gzipped() {
    let tarball = gzip(&build_tar(&[
      ("package/", &[]),
      ("package/package.json", b"{\"name\":\"a\"}"),
      ("package/index.js", b"module.exports = 1;"),
    ]));
    let contents = read_one_file(&tarball, "package.json", 1).unwrap();
    assert_eq!(contents, b"{\"name\":\"a\"}");
  }

  #[test]
  fn test_read_one_file_plain_tar_passthrough() {
    let tarball = build_tar(&[("package.json", b"{}")]);
    let contents = read_one_file(&tarball, "package.json", 0).unwrap();
    assert_eq!(contents, b"{}");
  }

  #[test]
  fn test_read_one_file_not_found() {
    let tarball = gzip(&build_tar(&[("package/index.js", b"x")]));
    let err = read_one_file(&tarball, "package.json", 1).unwrap_err();
    assert_eq!(err.to_string(), "Could not find 'package.json' in archive.");
  }

  #[test]
  fn test_read_one_file_not_found_when_underflowing_strip() {
    // the only entry has exactly one segment, so stripping one leaves
    // nothing to match
    let tarball = gzip(&build_tar(&[("package.json", b"{}")]));
    assert!(read_one_file(&tarball, "package.json", 1).is_err());
  }

  #[test]
  fn test_extract_all_round_trip() {
    let temp_dir = tempfile::tempdir().unwrap();
    let tarball = gzip(&build_tar(&[
      ("package/", &[]),
      ("package/package.json", b"{\"name\":\"a\"}"),
      ("package/lib/", &[]),
      ("package/lib/index.js", b"module.exports = 1;"),
    ]));
    extract_all(&tarball, temp_dir.path(), 1).unwrap();
    assert_eq!(
      fs::read(temp_dir.path().join("package.json")).unwrap(),
      b"{\"name\":\"a\"}"
    );
    assert_eq!(
      fs::read(temp_dir.path().join("lib/index.js")).unwrap(),
      b"module.exports = 1;"
    );
    // the wrapper directory itself must not be materialized
    assert!(!temp_dir.path().join("package").exists());
  }

  #[test]
  fn test_extract_all_no_strip() {
    let temp_dir = tempfile::tempdir().unwrap();
    let tarball = build_tar(&[("index.js", b"x")]);
    extract_all(&tarball, temp_dir.path(), 0).unwrap();
    assert_eq!(fs::read(temp_dir.path().join("index.js")).unwrap(), b"x");
  }

  #[test]
  fn test_extract_then_read_matches() {
    let temp_dir = tempfile::tempdir().unwrap();
    let files: &[(&str, &[u8])] =
      &[("a.txt", b"alpha"), ("nested/b.txt", b"beta")];
    let tarball = build_tar(files);
    extract_all(&tarball, temp_dir.path(), 0).unwrap();
    for (path, contents) in files {
      assert_eq!(&fs::read(temp_dir.path().join(path)).unwrap(), contents);
      assert_eq!(&read_one_file(&tarball, path, 0).unwrap(), contents);
    }
  }
}

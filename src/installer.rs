// Copyright 2026 the spm authors. MIT license.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use thiserror::Error;

use crate::colors;
use crate::package_json::PackageJson;
use crate::package_json::PackageJsonLoadError;
use crate::package_json::PACKAGE_MANIFEST_FILENAME;
use crate::progress_bar::ProgressBar;
use crate::registry::RegistryApi;
use crate::registry::RegistryError;
use crate::resolution::ResolvedNode;
use crate::tarball;
use crate::tarball::TarballError;

/// Name of the per-package store directory that dependencies nest under.
pub const STORE_DIR_NAME: &str = "spm_node_modules";
/// Name of the directory holding executable shims, inside the store.
pub const BIN_DIR_NAME: &str = ".bin";

/// Lifecycle phases, in the order they run for one package.
const LIFECYCLE_PHASES: [&str; 3] = ["preinstall", "install", "postinstall"];

#[derive(Debug, Error)]
pub enum InstallError {
  #[error(transparent)]
  Registry(#[from] RegistryError),
  #[error("Error extracting '{descriptor}' into '{}'.", .path.display())]
  Extract {
    descriptor: String,
    path: PathBuf,
    #[source]
    source: TarballError,
  },
  #[error(transparent)]
  Manifest(#[from] PackageJsonLoadError),
  #[error("Creating '{}'", .path.display())]
  Creating {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Setting permissions on '{}'", .path.display())]
  Permissions {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Can't set up '{name}' bin at {}", .path.display())]
  SetUpBin {
    name: String,
    path: PathBuf,
    #[source]
    source: Box<InstallError>,
  },
  #[error("Removing existing bin symlink at '{}'", .path.display())]
  RemoveBinSymlink {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Building PATH for the {phase} script of '{descriptor}'.")]
  ScriptPath {
    phase: &'static str,
    descriptor: String,
    #[source]
    source: std::env::JoinPathsError,
  },
  #[error("Error running the {phase} script of '{descriptor}'.")]
  ScriptSpawn {
    phase: &'static str,
    descriptor: String,
    #[source]
    source: std::io::Error,
  },
  #[error("The {phase} script of '{descriptor}' failed: {status}.")]
  ScriptFailed {
    phase: &'static str,
    descriptor: String,
    status: std::process::ExitStatus,
  },
  #[error(transparent)]
  Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub struct Installer {
  registry: Arc<dyn RegistryApi>,
  progress: ProgressBar,
}

impl Installer {
  pub fn new(registry: Arc<dyn RegistryApi>, progress: ProgressBar) -> Self {
    Self { registry, progress }
  }

  /// Installs the resolved tree rooted at `cwd`: extracts this node when
  /// it is not the root sentinel, then concurrently installs each child
  /// under `cwd/spm_node_modules/<name>`, wires up its bin shims and runs
  /// its lifecycle scripts. A child's own subtree is fully installed
  /// before its shims and scripts fire.
  pub fn install_tree<'a>(
    &'a self,
    node: &'a ResolvedNode,
    cwd: PathBuf,
  ) -> LocalBoxFuture<'a, Result<(), InstallError>> {
    async move {
      if !node.reference.is_root() {
        let tarball_bytes = self
          .registry
          .fetch_tarball(&node.name, &node.reference)
          .await?;
        tarball::extract_all(
          &tarball_bytes,
          &cwd,
          node.reference.strip_components(),
        )
        .map_err(|source| InstallError::Extract {
          descriptor: format!("{}@{}", node.name, node.reference),
          path: cwd.clone(),
          source,
        })?;
      }

      let store_dir = cwd.join(STORE_DIR_NAME);
      let mut installs = Vec::with_capacity(node.children.len());
      for child in &node.children {
        self.progress.add_total(1);
        let child_cwd = store_dir.join(&child.name);
        let cwd = cwd.clone();
        installs.push(async move {
          self.install_tree(child, child_cwd.clone()).await?;
          let manifest = PackageJson::load_from_path(
            &child_cwd.join(PACKAGE_MANIFEST_FILENAME),
          )?;
          self.link_bins(&manifest, &child_cwd, &cwd)?;
          self.run_lifecycle_scripts(child, &manifest, &child_cwd).await?;
          self.progress.tick();
          Ok::<_, InstallError>(())
        });
      }
      for result in join_all(installs).await {
        result?;
      }
      Ok(())
    }
    .boxed_local()
  }

  /// Creates a relative symlink in the parent's `.bin` directory for
  /// every bin entry the package declares.
  fn link_bins(
    &self,
    manifest: &PackageJson,
    package_path: &Path,
    parent_cwd: &Path,
  ) -> Result<(), InstallError> {
    let bin_entries = manifest.bin_entries();
    if bin_entries.is_empty() {
      return Ok(());
    }
    let bin_dir = parent_cwd.join(STORE_DIR_NAME).join(BIN_DIR_NAME);
    // siblings race to create this; mkdir-if-absent keeps it idempotent
    std::fs::create_dir_all(&bin_dir).map_err(|source| {
      InstallError::Creating {
        path: bin_dir.clone(),
        source,
      }
    })?;
    for (bin_name, bin_script) in &bin_entries {
      set_up_bin_entry(bin_name, bin_script, package_path, &bin_dir)?;
    }
    Ok(())
  }

  /// Runs the package's lifecycle scripts sequentially, each with the
  /// package directory as cwd and its own `.bin` directory first on PATH.
  async fn run_lifecycle_scripts(
    &self,
    node: &ResolvedNode,
    manifest: &PackageJson,
    package_path: &Path,
  ) -> Result<(), InstallError> {
    for phase in LIFECYCLE_PHASES {
      let Some(script) = manifest.scripts.get(phase) else {
        continue;
      };
      log::debug!("Running the {} script of '{}'", phase, node.name);
      let descriptor = format!("{}@{}", node.name, node.reference);
      let status = lifecycle_command(script, package_path)
        .map_err(|source| InstallError::ScriptPath {
          phase,
          descriptor: descriptor.clone(),
          source,
        })?
        .status()
        .await
        .map_err(|source| InstallError::ScriptSpawn {
          phase,
          descriptor: descriptor.clone(),
          source,
        })?;
      if !status.success() {
        return Err(InstallError::ScriptFailed {
          phase,
          descriptor,
          status,
        });
      }
    }
    Ok(())
  }
}

fn lifecycle_command(
  script: &str,
  package_path: &Path,
) -> Result<tokio::process::Command, std::env::JoinPathsError> {
  let bin_dir = package_path.join(STORE_DIR_NAME).join(BIN_DIR_NAME);
  let path_var = std::env::var_os("PATH").unwrap_or_default();
  let path_value = std::env::join_paths(
    std::iter::once(bin_dir).chain(std::env::split_paths(&path_var)),
  )?;
  let mut command = shell_command(script);
  command.current_dir(package_path).env("PATH", path_value);
  Ok(command)
}

#[cfg(unix)]
fn shell_command(script: &str) -> tokio::process::Command {
  let mut command = tokio::process::Command::new("sh");
  command.arg("-c").arg(script);
  command
}

#[cfg(windows)]
fn shell_command(script: &str) -> tokio::process::Command {
  let mut command = tokio::process::Command::new("cmd");
  command.arg("/C").arg(script);
  command
}

fn warn_missing_entrypoint(
  bin_name: &str,
  package_path: &Path,
  entrypoint: &Path,
) {
  log::warn!(
    "{} Trying to set up '{}' bin for \"{}\", but the entry point \"{}\" doesn't exist.",
    colors::yellow("Warning"),
    bin_name,
    package_path.display(),
    entrypoint.display()
  );
}

#[cfg(unix)]
/// Make the file at `path` executable if it exists.
/// Returns `true` if the file exists, `false` otherwise.
fn make_executable_if_exists(path: &Path) -> Result<bool, InstallError> {
  use std::io;
  use std::os::unix::fs::PermissionsExt;
  let mut perms = match std::fs::metadata(path) {
    Ok(metadata) => metadata.permissions(),
    Err(err) => {
      if err.kind() == io::ErrorKind::NotFound {
        return Ok(false);
      }
      return Err(err.into());
    }
  };
  if perms.mode() & 0o111 == 0 {
    // if the original file is not executable, make it executable
    perms.set_mode(perms.mode() | 0o111);
    std::fs::set_permissions(path, perms).map_err(|source| {
      InstallError::Permissions {
        path: path.to_path_buf(),
        source,
      }
    })?;
  }
  Ok(true)
}

#[cfg(unix)]
fn set_up_bin_entry(
  bin_name: &str,
  bin_script: &str,
  package_path: &Path,
  bin_dir: &Path,
) -> Result<(), InstallError> {
  use std::io;
  use std::os::unix::fs::symlink;
  let link = bin_dir.join(bin_name);
  let original = package_path.join(bin_script);

  let found = make_executable_if_exists(&original).map_err(|source| {
    InstallError::SetUpBin {
      name: bin_name.to_string(),
      path: original.clone(),
      source: Box::new(source),
    }
  })?;
  if !found {
    warn_missing_entrypoint(bin_name, package_path, &original);
    return Ok(());
  }

  let original_relative =
    pathdiff::diff_paths(&original, bin_dir).unwrap_or(original);

  if let Err(err) = symlink(&original_relative, &link) {
    if err.kind() == io::ErrorKind::AlreadyExists {
      // remove and retry
      std::fs::remove_file(&link).map_err(|source| {
        InstallError::RemoveBinSymlink {
          path: link.clone(),
          source,
        }
      })?;
      symlink(&original_relative, &link).map_err(|source| {
        InstallError::SetUpBin {
          name: bin_name.to_string(),
          path: original_relative.clone(),
          source: Box::new(source.into()),
        }
      })?;
      return Ok(());
    }
    return Err(InstallError::SetUpBin {
      name: bin_name.to_string(),
      path: original_relative,
      source: Box::new(err.into()),
    });
  }

  Ok(())
}

#[cfg(windows)]
fn set_up_bin_entry(
  bin_name: &str,
  bin_script: &str,
  package_path: &Path,
  bin_dir: &Path,
) -> Result<(), InstallError> {
  // no symlinks without elevation; a cmd shim calls the target in place
  let mut cmd_shim = bin_dir.join(bin_name);
  cmd_shim.set_extension("cmd");
  let target = package_path.join(bin_script);
  let shim = format!("@\"{}\" %*\r\n", target.display());
  std::fs::write(&cmd_shim, shim).map_err(|source| InstallError::SetUpBin {
    name: bin_name.to_string(),
    path: cmd_shim.clone(),
    source: Box::new(source.into()),
  })?;
  Ok(())
}

#[cfg(all(test, unix))]
mod test {
  use std::collections::BTreeMap;
  use std::fs;

  use pretty_assertions::assert_eq;

  use super::*;
  use crate::progress_bar::ProgressBar;
  use crate::registry::test_registry::TestRegistry;
  use crate::resolution::AvailableSet;
  use crate::resolution::Descriptor;
  use crate::resolution::Reference;
  use crate::resolution::Resolver;

  struct TestEnv {
    registry: Arc<TestRegistry>,
    install_dir: tempfile::TempDir,
  }

  impl TestEnv {
    fn new(registry: TestRegistry) -> Self {
      Self {
        registry: Arc::new(registry),
        install_dir: tempfile::tempdir().unwrap(),
      }
    }

    fn install_path(&self) -> PathBuf {
      self.install_dir.path().canonicalize().unwrap()
    }

    async fn install(
      &self,
      dependencies: &[(&str, &str)],
    ) -> Result<(), InstallError> {
      let resolver = Resolver::new(
        self.registry.clone(),
        ProgressBar::new("Resolve"),
      );
      let dependencies = dependencies
        .iter()
        .map(|(name, reference)| {
          Descriptor::new(
            name.to_string(),
            Reference::parse(name, reference).unwrap(),
          )
        })
        .collect();
      let mut tree = resolver
        .resolve_tree(
          Descriptor::new("root".to_string(), Reference::Root),
          dependencies,
          AvailableSet::default(),
        )
        .await
        .unwrap();
      crate::resolution::hoist::optimize_tree(&mut tree);
      let installer =
        Installer::new(self.registry.clone(), ProgressBar::new("Link"));
      installer.install_tree(&tree, self.install_path()).await
    }
  }

  #[tokio::test]
  async fn leaf_install_creates_no_bin_dir() {
    let registry = TestRegistry::default();
    registry.ensure_package_version("package-a", "1.0.0");
    let env = TestEnv::new(registry);

    env.install(&[("package-a", "1.0.0")]).await.unwrap();

    let package_dir =
      env.install_path().join(STORE_DIR_NAME).join("package-a");
    assert!(package_dir.join(PACKAGE_MANIFEST_FILENAME).exists());
    assert!(!env
      .install_path()
      .join(STORE_DIR_NAME)
      .join(BIN_DIR_NAME)
      .exists());
  }

  #[tokio::test]
  async fn nested_dependency_lands_in_nested_store() {
    let registry = TestRegistry::default();
    registry.ensure_package_version("package-a", "1.0.0");
    registry.ensure_package_version("package-b", "1.0.0");
    registry.ensure_package_version("package-b", "2.0.0");
    registry.add_dependency(("package-a", "1.0.0"), ("package-b", "^2"));
    let env = TestEnv::new(registry);

    // the root pins package-b@1, so package-a's copy cannot hoist
    env
      .install(&[("package-a", "1.0.0"), ("package-b", "1.0.0")])
      .await
      .unwrap();

    let store = env.install_path().join(STORE_DIR_NAME);
    assert!(store.join("package-b/package.json").exists());
    assert!(store
      .join("package-a")
      .join(STORE_DIR_NAME)
      .join("package-b/package.json")
      .exists());
  }

  #[tokio::test]
  async fn bin_entries_become_relative_executable_symlinks() {
    let registry = TestRegistry::default();
    registry.ensure_package_version("package-a", "1.0.0");
    registry.set_bin(
      ("package-a", "1.0.0"),
      BTreeMap::from([("tool", "cli.sh")]),
    );
    registry.add_file(
      ("package-a", "1.0.0"),
      "cli.sh",
      b"#!/bin/sh\necho tool-ran\n",
    );
    let env = TestEnv::new(registry);

    env.install(&[("package-a", "1.0.0")]).await.unwrap();

    let store = env.install_path().join(STORE_DIR_NAME);
    let link = store.join(BIN_DIR_NAME).join("tool");
    let target = fs::read_link(&link).unwrap();
    assert!(target.is_relative());
    assert_eq!(
      link.parent().unwrap().join(&target).canonicalize().unwrap(),
      store.join("package-a/cli.sh")
    );
    // the entrypoint was made executable
    use std::os::unix::fs::PermissionsExt;
    let mode = fs::metadata(store.join("package-a/cli.sh"))
      .unwrap()
      .permissions()
      .mode();
    assert_ne!(mode & 0o111, 0);
  }

  #[tokio::test]
  async fn missing_bin_entrypoint_is_tolerated() {
    let registry = TestRegistry::default();
    registry.ensure_package_version("package-a", "1.0.0");
    registry.set_bin(
      ("package-a", "1.0.0"),
      BTreeMap::from([("tool", "does-not-exist.sh")]),
    );
    let env = TestEnv::new(registry);

    env.install(&[("package-a", "1.0.0")]).await.unwrap();

    let link = env
      .install_path()
      .join(STORE_DIR_NAME)
      .join(BIN_DIR_NAME)
      .join("tool");
    assert!(!link.exists());
  }

  #[tokio::test]
  async fn lifecycle_scripts_run_in_order_with_bin_on_path() {
    let registry = TestRegistry::default();
    registry.ensure_package_version("package-a", "1.0.0");
    registry.set_script(
      ("package-a", "1.0.0"),
      "preinstall",
      "echo pre >> phases.txt",
    );
    registry.set_script(
      ("package-a", "1.0.0"),
      "install",
      "echo install >> phases.txt && touch installed && echo \"$PATH\" > path.txt",
    );
    registry.set_script(
      ("package-a", "1.0.0"),
      "postinstall",
      "echo post >> phases.txt",
    );
    let env = TestEnv::new(registry);

    env.install(&[("package-a", "1.0.0")]).await.unwrap();

    let package_dir =
      env.install_path().join(STORE_DIR_NAME).join("package-a");
    assert!(package_dir.join("installed").exists());
    assert_eq!(
      fs::read_to_string(package_dir.join("phases.txt")).unwrap(),
      "pre\ninstall\npost\n"
    );
    let path_seen =
      fs::read_to_string(package_dir.join("path.txt")).unwrap();
    let expected_prefix = format!(
      "{}:",
      package_dir.join(STORE_DIR_NAME).join(BIN_DIR_NAME).display()
    );
    assert!(
      path_seen.starts_with(&expected_prefix),
      "PATH '{path_seen}' does not start with '{expected_prefix}'"
    );
  }

  #[tokio::test]
  async fn failing_script_aborts_the_install() {
    let registry = TestRegistry::default();
    registry.ensure_package_version("package-a", "1.0.0");
    registry.set_script(("package-a", "1.0.0"), "install", "exit 3");
    let env = TestEnv::new(registry);

    let err = env.install(&[("package-a", "1.0.0")]).await.unwrap_err();
    match err {
      InstallError::ScriptFailed {
        phase, descriptor, ..
      } => {
        assert_eq!(phase, "install");
        assert_eq!(descriptor, "package-a@1.0.0");
      }
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[tokio::test]
  async fn installs_from_a_local_tarball_path() {
    // local tarballs are plain files with no `package/` wrapper and no
    // gzip requirement
    let registry = TestRegistry::default();
    let env = TestEnv::new(registry);

    let tarball = crate::tarball::test::build_tar(&[
      (
        "package.json",
        br#"{ "name": "local-pkg", "version": "0.0.1" }"#,
      ),
      ("data.txt", b"hello"),
    ]);
    let tarball_path = env.install_dir.path().join("local-pkg.tar");
    fs::write(&tarball_path, tarball).unwrap();

    env
      .install(&[("local-pkg", tarball_path.to_str().unwrap())])
      .await
      .unwrap();

    let package_dir =
      env.install_path().join(STORE_DIR_NAME).join("local-pkg");
    assert!(package_dir.join(PACKAGE_MANIFEST_FILENAME).exists());
    assert_eq!(fs::read(package_dir.join("data.txt")).unwrap(), b"hello");
  }
}

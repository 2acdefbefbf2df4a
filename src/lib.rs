// Copyright 2026 the spm authors. MIT license.

pub mod colors;
mod flags;
mod http_util;
mod installer;
mod logger;
mod package_json;
mod progress_bar;
mod registry;
mod resolution;
mod tarball;

use std::sync::Arc;

use anyhow::Context;
use anyhow::Error as AnyError;

use crate::flags::Flags;
use crate::installer::Installer;
use crate::package_json::PackageJson;
use crate::package_json::PROJECT_MANIFEST_FILENAME;
use crate::progress_bar::ProgressBar;
use crate::registry::HttpRegistry;
use crate::registry::RegistryApi;
use crate::resolution::Resolver;

pub fn main() {
  let args: Vec<_> = std::env::args_os().collect();
  let flags = match flags::flags_from_vec(args) {
    Ok(flags) => flags,
    Err(err) => err.exit(),
  };
  logger::init(flags.log_level);

  let runtime = tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
    .unwrap();
  match runtime.block_on(run(&flags)) {
    Ok(()) => {}
    Err(err) => exit_for_error(err),
  }
}

fn exit_for_error(err: AnyError) -> ! {
  // the error chain goes to stdout so callers capturing the installer's
  // output see the failure reason
  println!("{}: {:?}", colors::red_bold("error"), err);
  std::process::exit(1);
}

async fn run(flags: &Flags) -> Result<(), AnyError> {
  let project_dir =
    std::fs::canonicalize(&flags.project_dir).with_context(|| {
      format!(
        "Error resolving project directory '{}'.",
        flags.project_dir.display()
      )
    })?;
  let install_dir = match &flags.install_dir {
    Some(dir) => {
      std::fs::create_dir_all(dir).with_context(|| {
        format!("Error creating install directory '{}'.", dir.display())
      })?;
      std::fs::canonicalize(dir).with_context(|| {
        format!("Error resolving install directory '{}'.", dir.display())
      })?
    }
    None => project_dir.clone(),
  };

  let manifest_path = project_dir.join(PROJECT_MANIFEST_FILENAME);
  let manifest = PackageJson::load_from_path(&manifest_path)?;

  let registry: Arc<dyn RegistryApi> = Arc::new(HttpRegistry::new()?);

  let mut tree = {
    let progress = ProgressBar::new("Resolve");
    let resolver = Resolver::new(registry.clone(), progress.clone());
    let tree = resolver.resolve_manifest(&manifest).await?;
    progress.finish();
    tree
  };
  resolution::hoist::optimize_tree(&mut tree);

  {
    let progress = ProgressBar::new("Link");
    let installer = Installer::new(registry, progress.clone());
    installer.install_tree(&tree, install_dir).await?;
    progress.finish();
  }

  log::info!(
    "{} {} package(s).",
    colors::green("Installed"),
    count_packages(&tree)
  );
  Ok(())
}

fn count_packages(tree: &resolution::ResolvedNode) -> usize {
  tree
    .children
    .iter()
    .map(|child| 1 + count_packages(child))
    .sum()
}

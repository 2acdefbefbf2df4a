// Copyright 2026 the spm authors. MIT license.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::value_parser;
use clap::Arg;
use clap::ArgMatches;
use clap::Command;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Flags {
  pub project_dir: PathBuf,
  pub install_dir: Option<PathBuf>,
  pub log_level: Option<log::Level>,
}

pub fn flags_from_vec(args: Vec<OsString>) -> clap::error::Result<Flags> {
  let matches = clap_root().try_get_matches_from(args)?;
  Ok(flags_from_matches(&matches))
}

fn clap_root() -> Command {
  Command::new("spm")
    .version(env!("CARGO_PKG_VERSION"))
    .about(
      "Installs the dependencies declared in spm-package.json into \
       spm_node_modules",
    )
    .arg(
      Arg::new("project-dir")
        .help("Directory containing spm-package.json (defaults to cwd)")
        .value_parser(value_parser!(PathBuf))
        .required(false),
    )
    .arg(
      Arg::new("install-dir")
        .help("Directory to install into (defaults to the project directory)")
        .value_parser(value_parser!(PathBuf))
        .required(false),
    )
    .arg(
      Arg::new("log-level")
        .short('L')
        .long("log-level")
        .help("Set log level")
        .value_parser(["trace", "debug", "info", "warn", "error"]),
    )
}

fn flags_from_matches(matches: &ArgMatches) -> Flags {
  let log_level =
    matches
      .get_one::<String>("log-level")
      .map(|level| match level.as_str() {
        "trace" => log::Level::Trace,
        "debug" => log::Level::Debug,
        "info" => log::Level::Info,
        "warn" => log::Level::Warn,
        _ => log::Level::Error,
      });
  Flags {
    project_dir: matches
      .get_one::<PathBuf>("project-dir")
      .cloned()
      .unwrap_or_else(|| PathBuf::from(".")),
    install_dir: matches.get_one::<PathBuf>("install-dir").cloned(),
    log_level,
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn flags_from_str_vec(args: &[&str]) -> Flags {
    flags_from_vec(args.iter().map(|arg| OsString::from(*arg)).collect())
      .unwrap()
  }

  #[test]
  fn no_args_defaults_to_cwd() {
    let flags = flags_from_str_vec(&["spm"]);
    assert_eq!(
      flags,
      Flags {
        project_dir: PathBuf::from("."),
        install_dir: None,
        log_level: None,
      }
    );
  }

  #[test]
  fn project_and_install_dirs() {
    let flags = flags_from_str_vec(&["spm", "./app", "/tmp/out"]);
    assert_eq!(flags.project_dir, PathBuf::from("./app"));
    assert_eq!(flags.install_dir, Some(PathBuf::from("/tmp/out")));
  }

  #[test]
  fn log_level() {
    let flags = flags_from_str_vec(&["spm", "-L", "debug"]);
    assert_eq!(flags.log_level, Some(log::Level::Debug));
  }

  #[test]
  fn unknown_flag_errors() {
    let result =
      flags_from_vec(vec![OsString::from("spm"), OsString::from("--bogus")]);
    assert!(result.is_err());
  }
}

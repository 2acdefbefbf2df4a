// Copyright 2026 the spm authors. MIT license.

use std::io::Write;

use crate::colors;

pub fn init(maybe_level: Option<log::Level>) {
  let log_level = maybe_level.unwrap_or(log::Level::Info);
  env_logger::Builder::from_env(
    env_logger::Env::new()
      // Use `SPM_LOG` and `SPM_LOG_STYLE` instead of the `RUST_` prefix
      .filter_or("SPM_LOG", log_level.to_level_filter().to_string())
      .write_style("SPM_LOG_STYLE"),
  )
  .write_style(if colors::use_color() {
    env_logger::WriteStyle::Auto
  } else {
    env_logger::WriteStyle::Never
  })
  .format(|buf, record| {
    if record.level() <= log::Level::Info {
      // Print ERROR, WARN and INFO logs as they are
      writeln!(buf, "{}", record.args())
    } else {
      // Add a prefix to DEBUG and TRACE logs
      writeln!(
        buf,
        "{} {} - {}",
        record.level(),
        record.target(),
        record.args()
      )
    }
  })
  .init();
}

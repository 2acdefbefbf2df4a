// Copyright 2026 the spm authors. MIT license.

use std::env;
use std::fmt;
use std::io::Write;

use once_cell::sync::Lazy;
use termcolor::Ansi;
use termcolor::Color::Green;
use termcolor::Color::Red;
use termcolor::Color::Yellow;
use termcolor::ColorSpec;
use termcolor::WriteColor;

static NO_COLOR: Lazy<bool> = Lazy::new(|| env::var_os("NO_COLOR").is_some());

pub fn use_color() -> bool {
  !(*NO_COLOR)
}

fn style(s: &str, colorspec: ColorSpec) -> impl fmt::Display {
  if !use_color() {
    return String::from(s);
  }
  let mut v = Vec::new();
  let mut ansi_writer = Ansi::new(&mut v);
  ansi_writer.set_color(&colorspec).unwrap();
  ansi_writer.write_all(s.as_bytes()).unwrap();
  ansi_writer.reset().unwrap();
  String::from_utf8_lossy(&v).into_owned()
}

pub fn red_bold(s: &str) -> impl fmt::Display {
  let mut style_spec = ColorSpec::new();
  style_spec.set_fg(Some(Red)).set_bold(true);
  style(s, style_spec)
}

pub fn green(s: &str) -> impl fmt::Display {
  let mut style_spec = ColorSpec::new();
  style_spec.set_fg(Some(Green));
  style(s, style_spec)
}

pub fn yellow(s: &str) -> impl fmt::Display {
  let mut style_spec = ColorSpec::new();
  style_spec.set_fg(Some(Yellow));
  style(s, style_spec)
}

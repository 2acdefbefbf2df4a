// Copyright 2026 the spm authors. MIT license.

use std::io::IsTerminal;
use std::io::Write;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::colors;

/// Tracks unit-of-work completion during resolution and linking. Clones
/// share one underlying tracker: callers bump `total` when scheduling a
/// unit of work and `tick` when it completes.
///
/// On a TTY the bar renders in place on stderr; otherwise updates fall
/// back to the logger. `finish` clears the in-place render and also runs
/// when the last handle drops, so an aborted run never leaks a partial
/// line.
#[derive(Clone, Debug)]
pub struct ProgressBar {
  inner: Arc<ProgressBarInner>,
}

#[derive(Debug)]
struct ProgressBarInner {
  prompt: &'static str,
  total: AtomicU64,
  pos: AtomicU64,
  state: Mutex<RenderState>,
}

#[derive(Debug)]
struct RenderState {
  is_tty: bool,
  rendered: bool,
  finished: bool,
}

impl ProgressBar {
  pub fn new(prompt: &'static str) -> Self {
    Self {
      inner: Arc::new(ProgressBarInner {
        prompt,
        total: Default::default(),
        pos: Default::default(),
        state: Mutex::new(RenderState {
          is_tty: std::io::stderr().is_terminal(),
          rendered: false,
          finished: false,
        }),
      }),
    }
  }

  pub fn add_total(&self, count: u64) {
    self.inner.total.fetch_add(count, Ordering::Relaxed);
    self.inner.render();
  }

  pub fn tick(&self) {
    self.inner.pos.fetch_add(1, Ordering::Relaxed);
    self.inner.render();
  }

  pub fn finish(&self) {
    self.inner.finish();
  }
}

impl ProgressBarInner {
  fn render(&self) {
    let mut state = self.state.lock();
    if state.finished {
      return;
    }
    let pos = self.pos.load(Ordering::Relaxed);
    let total = self.total.load(Ordering::Relaxed);
    if state.is_tty {
      let mut stderr = std::io::stderr();
      // clear to the end of the line in case the previous render was wider
      let _ = write!(
        stderr,
        "\r{} [{}/{}]\x1b[0K",
        colors::green(self.prompt),
        pos,
        total
      );
      let _ = stderr.flush();
      state.rendered = true;
    } else {
      log::debug!("{} [{}/{}]", self.prompt, pos, total);
    }
  }

  fn finish(&self) {
    let mut state = self.state.lock();
    if state.finished {
      return;
    }
    state.finished = true;
    if state.is_tty && state.rendered {
      let mut stderr = std::io::stderr();
      let _ = write!(stderr, "\r\x1b[0K");
      let _ = stderr.flush();
    }
    log::debug!(
      "{} finished ({} of {})",
      self.prompt,
      self.pos.load(Ordering::Relaxed),
      self.total.load(Ordering::Relaxed)
    );
  }
}

impl Drop for ProgressBarInner {
  fn drop(&mut self) {
    self.finish();
  }
}

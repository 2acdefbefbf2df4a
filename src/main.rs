// Copyright 2026 the spm authors. MIT license.

pub fn main() {
  // We have a lib.rs and main.rs in order to be able
  // to run the unit tests without building a binary.
  //
  // Prefer to keep this file simple and mostly empty.
  spm::main()
}

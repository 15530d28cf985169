//! Library wrapper around the `strata` CLI implementation.
//!
//! `cargo test -p strata-cli --lib` typechecks the CLI without building the
//! binary test suite, so the binary crate root is compiled here as a module.

#[allow(dead_code)]
#[path = "main.rs"]
mod main_bin;

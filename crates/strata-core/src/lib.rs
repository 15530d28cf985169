//! Core shared types for Strata.
//!
//! This crate is intentionally small: coordinates, path normalization, the
//! collaborator contracts the engine consumes (settings, console) and a few
//! filesystem helpers shared by the persistence layers.

mod console;
mod fs;
mod id;
mod path;
mod settings;

pub use console::{ConsoleLevel, ConsoleSink, MemoryConsole, TracingConsole};
pub use fs::{atomic_write, file_mtime_millis, now_millis, remove_dir_best_effort};
pub use id::MavenId;
pub use path::{canonical_path, normalize_path, normalize_path_or_url, to_system_independent};
pub use settings::{SettingsProvider, StaticSettings};

use std::any::Any;

/// Render a panic payload (as returned by `catch_unwind`) for logging.
pub fn panic_payload_to_str(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

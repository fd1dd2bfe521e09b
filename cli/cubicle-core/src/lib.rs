//! Small, dependency-light helpers shared by the rest of the Cubicle
//! workspace: host-path newtypes, symlink-safe filesystem primitives, and
//! human-oriented size/time formatting.
//!
//! Kept separate from `cubicle-sdk` so it can be depended on by both the SDK
//! and the CLI without pulling in the SDK's domain types.

pub mod bytes;
pub mod fs_util;
pub mod host_path;
pub mod time_fmt;

pub use bytes::Bytes;
pub use fs_util::DirSummary;
pub use host_path::HostPath;
pub use time_fmt::rel_time;

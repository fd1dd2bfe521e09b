pub mod environment;
pub mod error;
pub mod names;
pub mod packages;
pub mod paths;
pub mod randname;
pub mod runner;
pub mod scheduler;
pub mod seed_cache;
#[cfg(test)]
mod test_support;

pub use environment::{Engine, EnvironmentListing, PackageListing, default_packages};
pub use error::{Error, Result};
pub use names::{EnvironmentName, NameError, PackageName};
pub use packages::{Package, PackageIndex};
pub use paths::Paths;
pub use randname::RandomNameGenerator;
pub use runner::{EnvFilesSummary, EnvironmentExists, Runner, RunnerCommand};
pub use runner::bubblewrap::Bubblewrap;
pub use runner::docker::Docker;
pub use scheduler::{BuildScheduler, DEFAULT_STALE_AFTER};
pub use seed_cache::SeedCache;

pub mod bubblewrap;
pub mod docker;

use cubicle_core::{DirSummary, HostPath};

use crate::error::Result;
use crate::names::EnvironmentName;

/// What's known on disk about an environment. Refines a plain boolean
/// existence check: a `home` or `work` directory can persist alone after a
/// crash mid-`purge`, and the two halves need different recovery.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EnvironmentExists {
    NoEnvironment,
    PartiallyExists,
    FullyExists,
}

/// The disk footprint of one environment's paired directories, for `list`.
#[derive(Clone, Debug)]
pub struct EnvFilesSummary {
    pub home_dir_path: Option<HostPath>,
    pub home_dir: DirSummary,
    pub work_dir_path: Option<HostPath>,
    pub work_dir: DirSummary,
}

/// What to do once inside a freshly (re)created sandbox.
pub enum RunnerCommand {
    /// Drop the user into an interactive shell.
    Interactive,
    /// Stream `seeds` in, then run `script` (the shared dev-init script).
    Init {
        seeds: Vec<HostPath>,
        script: HostPath,
    },
    /// Run a single command non-interactively.
    Exec(Vec<String>),
}

/// The two sandbox backends (namespace-based and container-based) behind a
/// common interface. All paths are host paths; sandbox-side layout is each
/// implementation's own business.
pub trait Runner {
    /// Creates empty, paired home/work directories for a brand new environment.
    fn create(&self, name: &EnvironmentName) -> Result<()>;

    fn exists(&self, name: &EnvironmentName) -> Result<EnvironmentExists>;

    /// Stops any running sandbox process/container for this environment,
    /// without touching its files.
    fn stop(&self, name: &EnvironmentName) -> Result<()>;

    fn list(&self) -> Result<Vec<EnvironmentName>>;

    fn files_summary(&self, name: &EnvironmentName) -> Result<EnvFilesSummary>;

    /// Discards the home directory (and any running sandbox state) while
    /// keeping the work directory, then recreates an empty home.
    fn reset(&self, name: &EnvironmentName) -> Result<()>;

    /// Discards both directories entirely.
    fn purge(&self, name: &EnvironmentName) -> Result<()>;

    fn run(&self, name: &EnvironmentName, command: &RunnerCommand) -> Result<()>;
}

pub(crate) fn shell_join(args: &[String]) -> String {
    args.iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '='))
    {
        arg.to_owned()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_join_quotes_only_when_needed() {
        assert_eq!(shell_join(&[String::from("./test.sh")]), "./test.sh");
        assert_eq!(
            shell_join(&[String::from("echo"), String::from("a b")]),
            "echo 'a b'"
        );
        assert_eq!(
            shell_join(&[String::from("it's")]),
            "'it'\\''s'"
        );
    }
}

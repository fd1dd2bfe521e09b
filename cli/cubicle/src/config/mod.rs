use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use cubicle_core::HostPath;
use cubicle_sdk::{Bubblewrap, DEFAULT_STALE_AFTER, Docker, Engine, Paths, Runner};
use serde::Deserialize;
use xdg::BaseDirectories;

/// The optional `config.toml` layer: a runner override, a staleness window,
/// and path overrides. Every field is optional since the CLI works fine
/// with no config file at all (`.RUNNER` and the default staleness window
/// cover the common case). CLI flags/environment variables, once read,
/// always win over whatever's in the file.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct FileConfig {
    runner: Option<String>,
    stale_after_secs: Option<u64>,
    script_dir: Option<String>,
}

fn config_file_path() -> Result<HostPath> {
    let dirs = BaseDirectories::with_prefix("cubicle").context("resolving XDG base directories")?;
    Ok(HostPath::new(dirs.get_config_home()).join("config.toml"))
}

fn read_file_config() -> Result<FileConfig> {
    let path = config_file_path()?;
    let source = config::Config::builder()
        .add_source(
            config::File::from(path.into_path_buf())
                .format(config::FileFormat::Toml)
                .required(false),
        )
        .build()
        .context("reading config.toml")?;
    match source.try_deserialize() {
        Ok(config) => Ok(config),
        Err(config::ConfigError::NotFound(_)) => Ok(FileConfig::default()),
        Err(e) => Err(e).context("parsing config.toml"),
    }
}

/// Picks the directory holding `dev-init.sh`, `seccomp.bpf`, `seccomp.json`,
/// `Dockerfile.in` and `.RUNNER`: `$CUBICLE_SCRIPT_DIR` if set, else
/// `config.toml`'s `script-dir`, else `$XDG_CONFIG_HOME/cubicle`.
fn script_dir(file_config: &FileConfig) -> Result<HostPath> {
    if let Some(dir) = std::env::var_os("CUBICLE_SCRIPT_DIR") {
        return Ok(HostPath::new(dir));
    }
    if let Some(dir) = &file_config.script_dir {
        return Ok(HostPath::new(dir));
    }
    let dirs = BaseDirectories::with_prefix("cubicle").context("resolving XDG base directories")?;
    Ok(HostPath::new(dirs.get_config_home()))
}

/// How long a built package seed is trusted without rebuilding:
/// `$CUBICLE_STALE_AFTER_SECS` if set, else `config.toml`'s
/// `stale-after-secs`, else the twelve-hour default.
fn stale_after(file_config: &FileConfig) -> Result<Duration> {
    if let Ok(secs) = std::env::var("CUBICLE_STALE_AFTER_SECS") {
        let secs: u64 = secs
            .trim()
            .parse()
            .with_context(|| format!("$CUBICLE_STALE_AFTER_SECS={secs:?} is not a number of seconds"))?;
        return Ok(Duration::from_secs(secs));
    }
    if let Some(secs) = file_config.stale_after_secs {
        return Ok(Duration::from_secs(secs));
    }
    Ok(DEFAULT_STALE_AFTER)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum RunnerKind {
    Bubblewrap,
    Docker,
}

impl FromStr for RunnerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "bubblewrap" => Ok(Self::Bubblewrap),
            "docker" => Ok(Self::Docker),
            other => bail!("unknown runner {other:?}, expected 'bubblewrap' or 'docker'"),
        }
    }
}

/// Which runner to use: `$CUBICLE_RUNNER` if set, else `config.toml`'s
/// `runner`, else the single-line `.RUNNER` marker file left by whichever
/// installer set this machine up.
fn read_runner_kind(paths: &Paths, file_config: &FileConfig) -> Result<RunnerKind> {
    if let Ok(runner) = std::env::var("CUBICLE_RUNNER") {
        return RunnerKind::from_str(&runner);
    }
    if let Some(runner) = &file_config.runner {
        return RunnerKind::from_str(runner);
    }
    let marker = paths.runner_marker();
    let contents = std::fs::read_to_string(marker.as_path())
        .with_context(|| format!("runner should be set to 'bubblewrap' or 'docker' in {marker}"))?;
    RunnerKind::from_str(&contents)
}

fn login_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| String::from("/bin/sh"))
}

fn login_user() -> Result<String> {
    if let Ok(user) = std::env::var("USER") {
        return Ok(user);
    }
    let passwd = nix::unistd::User::from_uid(nix::unistd::getuid())
        .context("looking up the current user")?;
    let passwd = passwd.context("no passwd entry for the current uid")?;
    Ok(passwd.name)
}

fn build_runner(paths: &Paths, file_config: &FileConfig) -> Result<Box<dyn Runner>> {
    let home = HostPath::new(std::env::var("HOME").context("$HOME is not set")?);
    match read_runner_kind(paths, file_config)? {
        RunnerKind::Bubblewrap => Ok(Box::new(Bubblewrap::new(paths, home, login_shell()))),
        RunnerKind::Docker => Ok(Box::new(Docker::new(paths, home, login_user()?))),
    }
}

/// Resolves host paths, reads `config.toml`/`.RUNNER`, discovers the
/// package index, and wires together the engine the rest of the CLI drives.
pub fn build_engine() -> Result<Engine> {
    let file_config = read_file_config()?;
    let script_dir = script_dir(&file_config)?;
    let code_package_dir = script_dir.join("packages");
    let paths = Paths::discover(script_dir, code_package_dir).context("resolving cubicle paths")?;
    let runner = build_runner(&paths, &file_config)?;
    let stale_after = stale_after(&file_config)?;
    Engine::new(paths, runner, stale_after).context("discovering packages")
}

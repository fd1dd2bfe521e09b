mod enter;
mod exec;
mod list;
mod new;
mod packages;
mod purge;
mod reset;
mod tmp;

use std::collections::BTreeSet;
use std::str::FromStr;

use anyhow::{Result, anyhow, bail};
use bpaf::Bpaf;
use cubicle_sdk::{Engine, PackageIndex, PackageName};

fn vec_len<T>(x: Vec<T>) -> usize {
    Vec::len(&x)
}

/// `-v`/`-vv`/`-q`, affecting how much `tracing` output reaches stderr.
#[derive(Bpaf, Clone, Copy, Debug)]
pub enum Verbosity {
    Verbose(
        /// Increase logging verbosity; repeat for more detail.
        #[bpaf(short('v'), long("verbose"), req_flag(()), many, map(vec_len))]
        usize,
    ),

    /// Only log errors.
    #[bpaf(short, long)]
    Quiet,
}

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity::Verbose(0)
    }
}

/// Output format shared by `list` and `packages`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Format {
    #[default]
    Default,
    Json,
    Names,
}

impl FromStr for Format {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "default" => Ok(Self::Default),
            "json" => Ok(Self::Json),
            "names" => Ok(Self::Names),
            other => Err(anyhow!("invalid format {other:?} (expected default, json or names)")),
        }
    }
}

#[derive(Bpaf, Clone, Debug)]
#[bpaf(options, descr("Manage sandboxed development environments"))]
pub struct CubicleCli(#[bpaf(external(cubicle_args))] pub CubicleArgs);

#[derive(Bpaf, Clone, Debug)]
pub struct CubicleArgs {
    #[bpaf(external, fallback(Default::default()))]
    pub verbosity: Verbosity,
    #[bpaf(external(command))]
    pub command: Command,
}

#[derive(Bpaf, Clone, Debug)]
pub enum Command {
    /// Run a shell in an existing environment
    #[bpaf(command)]
    Enter(#[bpaf(external(enter::args))] enter::Args),

    /// Run a command in an existing environment
    #[bpaf(command)]
    Exec(#[bpaf(external(exec::args))] exec::Args),

    /// Show help information
    #[bpaf(command)]
    Help,

    /// Show existing environments
    #[bpaf(command)]
    List(#[bpaf(external(list::args))] list::Args),

    /// Create a new environment
    #[bpaf(command)]
    New(#[bpaf(external(new::args))] new::Args),

    /// Show available packages
    #[bpaf(command)]
    Packages(#[bpaf(external(packages::args))] packages::Args),

    /// Delete an environment and its work directory
    #[bpaf(command)]
    Purge(#[bpaf(external(purge::args))] purge::Args),

    /// Recreate an environment, keeping its work directory
    #[bpaf(command)]
    Reset(#[bpaf(external(reset::args))] reset::Args),

    /// Create and enter a new temporary environment
    #[bpaf(command)]
    Tmp(#[bpaf(external(tmp::args))] tmp::Args),
}

impl Command {
    pub fn handle(self, engine: &Engine) -> Result<()> {
        match self {
            Command::Enter(args) => enter::run(args, engine),
            Command::Exec(args) => exec::run(args, engine),
            Command::Help => {
                display_help();
                Ok(())
            }
            Command::List(args) => list::run(args, engine),
            Command::New(args) => new::run(args, engine),
            Command::Packages(args) => packages::run(args, engine),
            Command::Purge(args) => purge::run(args, engine),
            Command::Reset(args) => reset::run(args, engine),
            Command::Tmp(args) => tmp::run(args, engine),
        }
    }
}

/// Parses a package `SPEC` (`"none"` or a comma-separated list) against the
/// known package index, implicitly unioning in `auto`.
fn parse_package_spec(raw: &str, index: &PackageIndex) -> Result<BTreeSet<PackageName>> {
    if raw == "none" {
        return Ok(BTreeSet::new());
    }

    let mut packages = BTreeSet::new();
    for name in raw.split(',') {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let package =
            PackageName::from_str(name).map_err(|e| anyhow!("invalid package name {name:?}: {e}"))?;
        if index.get(&package).is_err() {
            let options = index.names().map(|n| n.as_str()).collect::<Vec<_>>().join(", ");
            bail!("invalid package {name:?} (use 'none' or comma-separated list from {options})");
        }
        packages.insert(package);
    }
    packages.insert(PackageName::auto());
    Ok(packages)
}

/// `--packages` for `new`/`tmp`: defaults to `default_packages()` when unset.
pub(crate) fn package_spec_or_default(raw: Option<&str>, index: &PackageIndex) -> Result<BTreeSet<PackageName>> {
    match raw {
        Some(raw) => parse_package_spec(raw, index),
        None => Ok(cubicle_sdk::default_packages()),
    }
}

/// `--packages` for `reset`: `None` means "keep whatever `packages.txt` says".
pub(crate) fn optional_package_spec(
    raw: Option<&str>,
    index: &PackageIndex,
) -> Result<Option<BTreeSet<PackageName>>> {
    raw.map(|raw| parse_package_spec(raw, index)).transpose()
}

/// Prints the top-level `--help` text, as if the user had run
/// `cubicle --help`.
fn display_help() {
    let args: Vec<&str> = vec!["--help"];
    match cubicle_cli().run_inner(&*args) {
        Ok(_) => unreachable!("--help always short-circuits parsing"),
        Err(bpaf::ParseFailure::Stdout(doc, _)) => crate::utils::message::plain(doc),
        Err(bpaf::ParseFailure::Stderr(err)) => crate::utils::message::error(err),
        Err(bpaf::ParseFailure::Completion(comp)) => print!("{comp}"),
    }
}

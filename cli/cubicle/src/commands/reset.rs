use std::str::FromStr;

use anyhow::Result;
use bpaf::Bpaf;
use cubicle_sdk::{Engine, EnvironmentName};

use crate::commands::optional_package_spec;

#[derive(Bpaf, Clone, Debug)]
pub struct Args {
    /// Remove the home directory and do not recreate it
    #[bpaf(long("clean"), switch)]
    clean: bool,

    /// Comma-separated names of packages to inject into the home directory
    #[bpaf(long("packages"), argument("SPEC"))]
    packages: Option<String>,

    /// Environment name(s)
    #[bpaf(positional("NAME"), some("must specify at least one environment name"))]
    names: Vec<String>,
}

pub fn run(args: Args, engine: &Engine) -> Result<()> {
    let packages = optional_package_spec(args.packages.as_deref(), engine.packages())?;
    for raw in args.names {
        let name = EnvironmentName::from_str(&raw)?;
        engine.reset_environment(&name, packages.clone(), args.clean)?;
    }
    Ok(())
}

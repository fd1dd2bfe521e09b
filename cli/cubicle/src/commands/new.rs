use std::str::FromStr;

use anyhow::Result;
use bpaf::Bpaf;
use cubicle_sdk::{Engine, EnvironmentName};

use crate::commands::package_spec_or_default;
use crate::utils::message;

#[derive(Bpaf, Clone, Debug)]
pub struct Args {
    /// Run a shell in the new environment
    #[bpaf(long("enter"), switch)]
    enter: bool,

    /// Comma-separated names of packages to inject into the home directory
    #[bpaf(long("packages"), argument("SPEC"))]
    packages: Option<String>,

    /// Environment name
    #[bpaf(positional("NAME"))]
    name: String,
}

pub fn run(args: Args, engine: &Engine) -> Result<()> {
    let name = EnvironmentName::from_str(&args.name)?;
    let packages = package_spec_or_default(args.packages.as_deref(), engine.packages())?;
    engine.new_environment(&name, packages)?;
    message::created(format!("environment {name}"));
    if args.enter {
        engine.enter_environment(&name)?;
    }
    Ok(())
}

use std::str::FromStr;

use anyhow::Result;
use bpaf::Bpaf;
use cubicle_sdk::{Engine, EnvironmentName};

#[derive(Bpaf, Clone, Debug)]
pub struct Args {
    /// Environment name(s)
    #[bpaf(positional("NAME"), some("must specify at least one environment name"))]
    names: Vec<String>,
}

pub fn run(args: Args, engine: &Engine) -> Result<()> {
    for raw in args.names {
        let name = EnvironmentName::from_str(&raw)?;
        engine.purge_environment(&name, false)?;
    }
    Ok(())
}

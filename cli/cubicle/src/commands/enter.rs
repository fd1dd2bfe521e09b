use std::str::FromStr;

use anyhow::Result;
use bpaf::Bpaf;
use cubicle_sdk::{Engine, EnvironmentName};

#[derive(Bpaf, Clone, Debug)]
pub struct Args {
    /// Environment name
    #[bpaf(positional("NAME"))]
    name: String,
}

pub fn run(args: Args, engine: &Engine) -> Result<()> {
    let name = EnvironmentName::from_str(&args.name)?;
    engine.enter_environment(&name)?;
    Ok(())
}

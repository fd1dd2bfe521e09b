use std::str::FromStr;

use anyhow::Result;
use bpaf::Bpaf;
use cubicle_sdk::{Engine, EnvironmentName};

#[derive(Bpaf, Clone, Debug)]
pub struct Args {
    /// Environment name
    #[bpaf(positional("NAME"))]
    name: String,

    /// Command to run (use "--" before it to disambiguate from NAME)
    #[bpaf(positional("COMMAND"))]
    command: String,

    /// Arguments to the command
    #[bpaf(positional("ARG"), many)]
    args: Vec<String>,
}

pub fn run(args: Args, engine: &Engine) -> Result<()> {
    let name = EnvironmentName::from_str(&args.name)?;
    let mut command = vec![args.command];
    command.extend(args.args);
    engine.exec_environment(&name, command)?;
    Ok(())
}

use anyhow::Result;
use bpaf::Bpaf;
use cubicle_sdk::Engine;

use crate::commands::package_spec_or_default;

#[derive(Bpaf, Clone, Debug)]
pub struct Args {
    /// Comma-separated names of packages to inject into the home directory
    #[bpaf(long("packages"), argument("SPEC"))]
    packages: Option<String>,
}

pub fn run(args: Args, engine: &Engine) -> Result<()> {
    let packages = package_spec_or_default(args.packages.as_deref(), engine.packages())?;
    engine.create_enter_tmp_environment(packages)?;
    Ok(())
}

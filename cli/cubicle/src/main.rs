use std::process::ExitCode;

use bpaf::{Args, Parser};

mod commands;
mod config;
mod utils;

use commands::{CubicleArgs, CubicleCli, cubicle_cli};
use utils::{logger, message};

fn main() -> ExitCode {
    let verbosity = {
        let verbosity_parser = commands::verbosity();
        let other = bpaf::any("_", Some::<String>).many();
        bpaf::construct!(verbosity_parser, other)
            .map(|(v, _)| v)
            .to_options()
            .run_inner(Args::current_args())
            .unwrap_or_default()
    };
    logger::init_logger(verbosity);

    let args = cubicle_cli().run_inner(Args::current_args());
    let CubicleCli(args): CubicleCli = match args {
        Ok(cli) => cli,
        Err(bpaf::ParseFailure::Stdout(msg, _)) => {
            print!("{msg}");
            return ExitCode::from(0);
        }
        Err(bpaf::ParseFailure::Stderr(msg)) => {
            eprint!("{msg}");
            return ExitCode::from(1);
        }
        Err(bpaf::ParseFailure::Completion(c)) => {
            print!("{c}");
            return ExitCode::from(0);
        }
    };

    logger::init_logger(args.verbosity);

    match run(args) {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            message::error(format!("{e:#}"));
            ExitCode::from(1)
        }
    }
}

fn run(args: CubicleArgs) -> anyhow::Result<()> {
    let engine = config::build_engine()?;
    args.command.handle(&engine)
}

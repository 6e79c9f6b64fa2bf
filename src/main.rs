use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;
use log::debug;

use xlsx_kwfilter::{RunConfig, cli::Cli};

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(cli.log_level()))
        .format_timestamp(None)
        .init();

    let config = match RunConfig::try_from(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {e}", e.category());
            return ExitCode::from(e.exit_code());
        }
    };
    debug!("{config:?}");

    match xlsx_kwfilter::run(&config) {
        Ok(summary) => {
            println!("{summary}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}

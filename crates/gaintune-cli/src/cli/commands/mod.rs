use super::args::*;

pub mod config;
pub mod decode;
pub(crate) mod run;
pub(crate) mod sweep;

use crate::exit_codes::SUCCESS;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let config_path = cli.config;
    match cli.cmd {
        Command::Run(args) => run::run(args, config_path.as_deref()).await,
        Command::Sweep(args) => sweep::run(args, config_path.as_deref()).await,
        Command::Decode(args) => decode::run(args, config_path.as_deref()),
        Command::Config(args) => config::run(args, config_path.as_deref()),
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(SUCCESS)
        }
    }
}

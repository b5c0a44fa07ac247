use std::path::PathBuf;
use structopt::StructOpt;

mod commands;
mod config;

use commands::Command;
use config::StrataConfig;

#[derive(StructOpt, Debug)]
#[structopt(name = "strata", about = "Inspect and maintain a strata resource database")]
pub struct StrataArgs {
    #[structopt(name = "config", long, parse(from_os_str), default_value = "strata.json")]
    pub config: PathBuf,
    // Overrides database_root from the config
    #[structopt(name = "root", long, parse(from_os_str))]
    pub root: Option<PathBuf>,
    #[structopt(name = "trace", long)]
    pub trace: bool,
    #[structopt(subcommand)]
    pub command: Command,
}

fn main() {
    let args = StrataArgs::from_args();

    // Setup logging
    env_logger::Builder::default()
        .write_style(env_logger::WriteStyle::Always)
        .filter_level(if args.trace {
            log::LevelFilter::Trace
        } else {
            log::LevelFilter::Info
        })
        .init();

    let result = StrataConfig::load(&args.config).and_then(|mut config| {
        if let Some(root) = &args.root {
            config.database_root = root.clone();
        }
        commands::run(&config, &args.command, &mut std::io::stdout())
    });

    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

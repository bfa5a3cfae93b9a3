use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use std::process;
use tracing::{error, Level};

mod cmd;
mod reports;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(global = true, long, default_value_t = false)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Search(cmd::search::SearchArgs),
}

fn main() {
    // Raw matches tell user-typed flags apart from defaults.
    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

    let level = if cli.debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    let result = match cli.command {
        Commands::Search(args) => {
            let sub_matches = matches
                .subcommand_matches("search")
                .unwrap_or_else(|| unreachable!("clap dispatched the search subcommand"));
            cmd::search::run(args, sub_matches)
        }
    };

    if let Err(e) = result {
        error!("❌ {}", e);
        process::exit(1);
    }
}

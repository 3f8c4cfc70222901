//! CLI entry point for podbridge.

mod app;
mod build_info;
mod cli;

use clap::{CommandFactory, Parser};
use crossterm::style::{Color, Stylize};
use podbridge::logging::init_logging;

#[tokio::main]
async fn main() {
    let args = cli::Args::parse();

    if args.version {
        println!("{}", build_info::version_text());
        return;
    }

    let Some(command) = args.command else {
        let _ = cli::Args::command().print_help();
        println!();
        std::process::exit(64);
    };

    init_logging(args.verbose);

    match app::run(command, args.config.as_deref()).await {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {e}", "error:".with(Color::Red).bold());
            std::process::exit(e.exit_code());
        }
    }
}

use clap::Parser;
use tracing::error;

use cou::cli::{Cli, Commands};
use cou::commands;
use cou::error::CouError;
use cou::{logging, ui};

// one logical thread: parallel steps interleave cooperatively, so the plan
// tree needs no locking
#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    let quiet = cli.quiet;

    if let Err(err) = run(cli).await {
        match &err {
            CouError::Cancelled | CouError::Aborted => println!("{err}"),
            _ => {
                error!("{err}");
                if !quiet {
                    ui::print_error(&err.to_string());
                }
            }
        }
        std::process::exit(err.exit_code());
    }
}

async fn run(cli: Cli) -> Result<(), CouError> {
    match cli.command {
        Commands::Plan { options } => {
            let ctx = options.into_context(false)?;
            logging::setup(&ctx.settings.data_dir, cli.quiet, cli.verbose);
            commands::plan::execute(&ctx, cli.quiet).await
        }
        Commands::Upgrade {
            options,
            auto_approve,
        } => {
            let ctx = options.into_context(auto_approve)?;
            logging::setup(&ctx.settings.data_dir, cli.quiet, cli.verbose);
            commands::upgrade::execute(&ctx, cli.quiet).await
        }
    }
}

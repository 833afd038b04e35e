mod cli;
mod commands;
mod formatting;
mod settings;

use std::process::ExitCode;

use cli::Commands;
use commands::{run_fetch, run_render, run_serve};

#[tokio::main]
async fn main() -> ExitCode {
    run().await
}

async fn run() -> ExitCode {
    let args = cli::parse();

    match args.command {
        Commands::Serve(serve) => run_serve(args.config, args.verbose, serve).await,
        Commands::Render {
            input,
            options,
            viewport,
            output,
        } => run_render(args.config, args.verbose, input, options, viewport, output).await,
        Commands::Fetch { url, output } => run_fetch(args.config, args.verbose, url, output).await,
    }
}

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use formctl::edit::{CheckArgs, EditArgs, EditHandler, WidgetsArgs};
use schemaform::SessionOptions;

/// Check, inspect and edit documents bound to a JSON Schema.
#[derive(Parser, Debug)]
#[command(name = "formctl", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a document against its schema.
    Check(CheckArgs),
    /// List the widgets a form for the document would show.
    Widgets(WidgetsArgs),
    /// Apply edits to a document and save it.
    Edit(EditArgs),
    /// Print the JSON Schema of the session options file.
    OptionsSchema,
}

fn main() -> anyhow::Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check(args) => {
            let ctx = args.doc.context()?;
            if !EditHandler::handle_check(&ctx, args.format)? {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Widgets(args) => {
            let ctx = args.doc.context()?;
            EditHandler::handle_widgets(&ctx, args.format)?;
        }
        Commands::Edit(args) => {
            let ctx = args.doc.context()?;
            EditHandler::handle_edit(&ctx, &args)?;
        }
        Commands::OptionsSchema => {
            let schema = schemars::schema_for!(SessionOptions);
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
    }

    Ok(ExitCode::SUCCESS)
}

//! Command handlers.
//!
//! Every command opens a [`schemaform::Session`] over the document through
//! [`FormContext`] and reports what the session says about it.

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::{Args, ValueEnum};
use colored::Colorize;
use schemaform::{ActionOutcome, ActionRequest, FieldPath, Value};

use crate::{
    ctx::FormContext,
    utils::{Assignment, describe_widget, parse_path, print_errors},
};

/// How results are printed.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Colored, human readable.
    #[default]
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Arguments naming a document and how to interpret it.
#[derive(Args, Debug, Clone, Default)]
pub struct DocumentArgs {
    /// Document to work on, `.json` or `.toml`.
    pub document: PathBuf,
    /// JSON Schema of the document. Defaults to `<stem>-schema.json` beside it.
    #[arg(short, long)]
    pub schema: Option<PathBuf>,
    /// TOML file with session options.
    #[arg(short, long)]
    pub options: Option<PathBuf>,
}

impl DocumentArgs {
    pub fn context(&self) -> Result<FormContext> {
        FormContext::new(
            self.document.clone(),
            self.schema.clone(),
            self.options.clone(),
        )
    }
}

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    #[command(flatten)]
    pub doc: DocumentArgs,
    #[arg(short, long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

#[derive(Args, Debug, Clone)]
pub struct WidgetsArgs {
    #[command(flatten)]
    pub doc: DocumentArgs,
    #[arg(short, long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

/// Scripted edits. They run in a fixed order: resets, assignments, adds,
/// copies, then removals from the highest index down.
#[derive(Args, Debug, Clone, Default)]
pub struct EditArgs {
    #[command(flatten)]
    pub doc: DocumentArgs,
    /// Assign a value, e.g. `--set radius=5` or `--set tags='["a"]'`.
    #[arg(long = "set", value_name = "PATH=VALUE")]
    pub sets: Vec<Assignment>,
    /// Append to an array, or insert before an element path like `rows.1`.
    #[arg(long, value_name = "PATH", value_parser = parse_path)]
    pub add: Vec<FieldPath>,
    /// Duplicate an array element right after itself.
    #[arg(long, value_name = "PATH", value_parser = parse_path)]
    pub copy: Vec<FieldPath>,
    /// Delete an array element.
    #[arg(long, value_name = "PATH", value_parser = parse_path)]
    pub remove: Vec<FieldPath>,
    /// Put a field back to its schema default.
    #[arg(long, value_name = "PATH", value_parser = parse_path)]
    pub reset: Vec<FieldPath>,
    /// Confirm deletions.
    #[arg(short, long)]
    pub yes: bool,
    /// Print the edited document instead of saving it.
    #[arg(long)]
    pub dry_run: bool,
}

/// Handlers behind the subcommands.
pub struct EditHandler;

impl EditHandler {
    /// Validates the document. Returns whether it is free of errors.
    pub fn handle_check(ctx: &FormContext, format: OutputFormat) -> Result<bool> {
        let session = ctx.open_session()?;
        let errors = session.errors();
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(errors)?),
            OutputFormat::Text if errors.is_empty() => {
                println!(
                    "{}",
                    format!("{} is valid", ctx.paths.document.display()).green()
                );
            }
            OutputFormat::Text => {
                println!(
                    "{}",
                    format!(
                        "{} has {} error(s):",
                        ctx.paths.document.display(),
                        errors.len()
                    )
                    .red()
                );
                print_errors(errors.nodes());
            }
        }
        Ok(errors.is_empty())
    }

    /// Lists the widgets a form for the document would show.
    pub fn handle_widgets(ctx: &FormContext, format: OutputFormat) -> Result<()> {
        let session = ctx.open_session()?;
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(session.tree())?),
            OutputFormat::Text => {
                for descriptor in session.tree().walk() {
                    println!("{}", describe_widget(descriptor));
                }
            }
        }
        Ok(())
    }

    /// Applies the edits in `args` and saves the document.
    ///
    /// # Errors
    ///
    /// Fails when an edit is rejected, a deletion is not confirmed, or the
    /// edited document does not validate.
    pub fn handle_edit(ctx: &FormContext, args: &EditArgs) -> Result<()> {
        let mut session = ctx.open_session()?;

        let model = session.engine().model().clone();
        session.register_action(
            "reset",
            Arc::new(move |path: &FieldPath, _current: Option<&Value>| -> Result<Value> {
                let field = model
                    .field_at(path)
                    .ok_or_else(|| anyhow!("no field at {path}"))?;
                Ok(model.default_value(field, true).unwrap_or(Value::Null))
            }),
        );

        for path in &args.reset {
            session.dispatch(ActionRequest::custom("reset", path.clone()))?;
            println!("reset {}", path.to_string().cyan());
        }
        for assignment in &args.sets {
            session.set_value(&assignment.path, assignment.value.clone())?;
            if let Some(err) = session.errors().first(&assignment.path) {
                println!("{} {}", "warning:".yellow(), err);
            }
        }
        for path in &args.add {
            if let ActionOutcome::Added(added) = session.dispatch(ActionRequest::add(path.clone()))? {
                println!("added {}", added.to_string().cyan());
            }
        }
        for path in &args.copy {
            if let ActionOutcome::Copied(copied) = session.dispatch(ActionRequest::copy(path.clone()))? {
                println!("copied {} to {}", path, copied.to_string().cyan());
            }
        }

        let mut removals = args.remove.clone();
        removals.sort();
        removals.dedup();
        for path in removals.iter().rev() {
            let mut outcome = session.dispatch(ActionRequest::delete(path.clone()))?;
            if let ActionOutcome::ConfirmationRequired(_) = outcome {
                if !args.yes {
                    session.dismiss()?;
                    bail!("deleting {path} needs confirmation, pass --yes");
                }
                outcome = session.confirm()?;
            }
            if let ActionOutcome::Deleted { path, removed } = outcome {
                println!("removed {} ({removed})", path.to_string().cyan());
            }
        }

        if args.dry_run {
            println!("{}", serde_json::to_string_pretty(&session.document())?);
            if !session.errors().is_empty() {
                println!("{}", "validation errors:".red());
                print_errors(session.errors().nodes());
            }
            return Ok(());
        }

        if !session.is_dirty() && ctx.paths.document.exists() {
            println!("no changes to {}", ctx.paths.document.display());
            return Ok(());
        }

        let mut store = ctx.store()?;
        match session.save_to(&mut store)? {
            ActionOutcome::Saved => {
                println!(
                    "{}",
                    format!("saved {}", ctx.paths.document.display()).green()
                );
                Ok(())
            }
            ActionOutcome::ValidationBlocked(nodes) => {
                println!("{}", "document not saved:".red());
                print_errors(&nodes);
                bail!("{} validation error(s)", nodes.len())
            }
            other => bail!("unexpected save outcome {other:?}"),
        }
    }
}

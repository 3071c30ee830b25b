//! Command-line interface for mongoport
//!
//! This module handles:
//! - Command-line argument parsing using clap
//! - Configuration loading and merging with arguments
//! - Dispatch of the export, import, schema and config subcommands

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::codec::Form;
use crate::config::{Config, LogLevel};
use crate::error::Result;
use crate::executor::ConflictPolicy;
use crate::schema::SchemaFormat;

/// mongoport - export, import and document MongoDB databases
#[derive(Parser, Debug)]
#[command(
    name = "mongoport",
    version,
    about = "Export, import and document MongoDB databases",
    long_about = "Exports collections to portable JSON Lines or binary files (optionally packed
into a single archive), imports them back with per-collection conflict policies,
and renders inferred collection schemas as JSON, YAML or Markdown."
)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    pub config_file: Option<PathBuf>,

    /// Quiet mode (errors only, no progress bar)
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Verbose mode (detailed logging)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Very verbose mode (trace logging)
    #[arg(long = "vv", global = true)]
    pub very_verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Connection arguments shared by the data commands
#[derive(clap::Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// MongoDB connection URI (overrides the configuration file)
    #[arg(long, value_name = "URI")]
    pub uri: Option<String>,

    /// Database name
    #[arg(long = "db", value_name = "NAME")]
    pub database: String,

    /// Connection timeout in seconds
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,
}

/// Subcommands for mongoport
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export collections to per-collection files or an archive
    Export {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Collection to export (repeatable; all collections when omitted)
        #[arg(long = "collection", value_name = "NAME")]
        collections: Vec<String>,

        /// Output directory, or archive file with --compress
        #[arg(long, value_name = "PATH")]
        out: PathBuf,

        /// File form (text, binary)
        #[arg(long, value_name = "FORM")]
        form: Option<Form>,

        /// Pack the export into a single archive
        #[arg(long)]
        compress: bool,

        /// Documents per batch
        #[arg(long, value_name = "N")]
        batch_size: Option<u32>,
    },

    /// Import an export directory, archive or single collection file
    Import {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Directory, archive or collection file to import
        #[arg(value_name = "SOURCE")]
        source: PathBuf,

        /// Conflict policy for one collection, as NAME=skip|overwrite|merge (repeatable)
        #[arg(long = "policy", value_name = "NAME=POLICY", value_parser = parse_policy_override)]
        policies: Vec<(String, ConflictPolicy)>,

        /// Conflict policy for collections without --policy
        #[arg(long, value_name = "POLICY", default_value = "skip")]
        default_policy: ConflictPolicy,

        /// Documents per batch
        #[arg(long, value_name = "N")]
        batch_size: Option<u32>,
    },

    /// Infer collection schemas and render them
    Schema {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Output file (standard output when omitted)
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,

        /// Output format (json, yaml, markdown, markdown-plain)
        #[arg(long, value_name = "FORMAT")]
        format: Option<SchemaFormat>,

        /// Documents sampled per collection
        #[arg(long, value_name = "N")]
        sample_size: Option<u64>,

        /// Collection to document (repeatable; all collections when omitted)
        #[arg(long = "collection", value_name = "NAME")]
        collections: Vec<String>,
    },

    /// Print the effective configuration as TOML
    Config,
}

/// Parse `NAME=POLICY`; the collection name may itself contain `=`.
fn parse_policy_override(value: &str) -> std::result::Result<(String, ConflictPolicy), String> {
    let (name, policy) = value
        .rsplit_once('=')
        .ok_or_else(|| format!("expected NAME=POLICY, got '{value}'"))?;
    if name.is_empty() {
        return Err(format!("missing collection name in '{value}'"));
    }
    Ok((name.to_string(), policy.parse()?))
}

/// CLI interface handler
pub struct CliInterface {
    /// Parsed command-line arguments
    args: CliArgs,

    /// Configuration with argument overrides applied
    config: Config,
}

impl CliInterface {
    /// Parse the process arguments and load the configuration
    pub fn new() -> Result<Self> {
        Self::from_args(CliArgs::parse())
    }

    /// Build from already parsed arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let mut config = Config::load(args.config_file.as_deref())?;
        Self::apply_args_to_config(&mut config, &args);
        config.validate()?;
        Ok(Self { args, config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn args(&self) -> &CliArgs {
        &self.args
    }

    /// Configuration file in effect, if any
    pub fn config_path(&self) -> Option<PathBuf> {
        match &self.args.config_file {
            Some(path) => Some(path.clone()),
            None => Some(Config::default_path()).filter(|p| p.is_file()),
        }
    }

    /// Whether to draw progress bars
    pub fn show_progress(&self) -> bool {
        !self.args.quiet
    }

    /// Apply CLI arguments to configuration
    fn apply_args_to_config(config: &mut Config, args: &CliArgs) {
        Self::apply_logging_args(config, args);
        Self::apply_command_args(config, &args.command);
    }

    fn apply_logging_args(config: &mut Config, args: &CliArgs) {
        config.logging.level = if args.very_verbose {
            LogLevel::Trace
        } else if args.verbose {
            LogLevel::Debug
        } else if args.quiet {
            LogLevel::Error
        } else {
            config.logging.level
        };
    }

    fn apply_command_args(config: &mut Config, command: &Commands) {
        let connection = match command {
            Commands::Export {
                connection,
                form,
                compress,
                batch_size,
                ..
            } => {
                if let Some(form) = form {
                    config.transfer.form = *form;
                }
                config.transfer.compress |= *compress;
                if let Some(n) = batch_size {
                    config.transfer.batch_size = *n;
                }
                connection
            }
            Commands::Import {
                connection,
                batch_size,
                ..
            } => {
                if let Some(n) = batch_size {
                    config.transfer.batch_size = *n;
                }
                connection
            }
            Commands::Schema {
                connection,
                format,
                sample_size,
                ..
            } => {
                if let Some(format) = format {
                    config.schema.format = *format;
                }
                if let Some(n) = sample_size {
                    config.schema.sample_size = *n;
                }
                connection
            }
            Commands::Config => return,
        };

        if let Some(uri) = &connection.uri {
            config.connection.uri = uri.clone();
        }
        if let Some(timeout) = connection.timeout {
            config.connection.timeout = timeout;
        }
    }
}

//! mongoport - MongoDB data portability
//!
//! Exports databases to portable files, imports them back under explicit
//! conflict policies, and documents collection schemas.
//!
//! # Usage
//!
//! ```bash
//! # Export every collection as JSON Lines
//! mongoport export --db shop --out shop-backup
//!
//! # Restore an archive, overwriting existing users
//! mongoport import --db shop shop-backup.zip --policy users=overwrite
//!
//! # Document the schema as Markdown
//! mongoport schema --db shop --out shop-schema.md
//! ```

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use mongoport::cli::{CliInterface, commands};
use mongoport::error::Result;

/// Application entry point
#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Main application logic
///
/// 1. Parse command-line arguments and load configuration
/// 2. Initialize logging
/// 3. Install the Ctrl+C handler
/// 4. Run the subcommand
///
/// # Returns
/// * `Result<i32>` - Process exit code
async fn run() -> Result<i32> {
    let cli = CliInterface::new()?;
    initialize_logging(&cli);

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let ctrl_c_handle = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => token.cancel(),
            Err(err) => eprintln!("Failed to listen for Ctrl+C: {}", err),
        }
    });

    let result = commands::execute(&cli, shutdown).await;
    ctrl_c_handle.abort();
    result
}

/// Initialize logging from the effective configuration
///
/// `RUST_LOG` takes precedence over the configured level when set.
///
/// # Arguments
/// * `cli` - CLI interface with the merged logging settings
fn initialize_logging(cli: &CliInterface) {
    let logging = &cli.config().logging;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.to_tracing_level().to_string()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.timestamps {
        subscriber.init();
    } else {
        subscriber.without_time().init();
    }
}

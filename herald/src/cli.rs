use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::{Herald, config::find_config_file, run};

/// Deliver scheduled broadcasts
#[derive(Parser, Debug)]
#[command(name = "herald")]
#[command(about = "Deliver scheduled broadcasts", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Process every due schedule once, then exit
    Sweep,
    /// Print the effective configuration without connecting to anything
    CheckConfig,
}

impl Cli {
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or the sweep
    /// itself fails. Failed schedules do not make the sweep fail.
    pub async fn run(self) -> anyhow::Result<()> {
        let path = find_config_file(self.config.as_deref())?;
        let config = Herald::load(&path)?;

        match self.command {
            Command::CheckConfig => {
                println!("# {}", path.display());
                println!("{}", config.redacted().to_pretty()?);
                Ok(())
            }
            Command::Sweep => run::sweep(config).await.map(|_| ()),
        }
    }
}

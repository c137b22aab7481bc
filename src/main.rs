//! eureka - encrypt a file or folder for someone with a one-time key.
//!
//! Thin command-line caller of the library. Results for the user go to
//! stdout (the key) and stderr (messages, logs).

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use eureka::audit::FileAuditSink;
use eureka::pipeline::DEFAULT_RESTORE_DIR;
use eureka::{Pipeline, PipelineOptions, SymmetricKey};

/// Encrypt a file or folder with a one-time key, or decrypt it again
#[derive(Parser)]
#[command(name = "eureka", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Directory that receives the .encrypted file
    #[arg(long, global = true, env = "EUREKA_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Directory to decrypt into; must not exist yet
    #[arg(long, global = true, env = "EUREKA_RESTORE_DIR", default_value = DEFAULT_RESTORE_DIR)]
    restore_dir: PathBuf,

    /// Append a JSON line per completed operation to this file
    #[arg(long, global = true, env = "EUREKA_AUDIT_LOG")]
    audit_log: Option<PathBuf>,

    /// Log each archived and restored entry
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a file or folder and print the one-time key
    Encrypt {
        /// File or folder to encrypt
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },

    /// Decrypt an .encrypted file
    Decrypt {
        /// The .encrypted file
        #[arg(value_name = "PATH")]
        path: PathBuf,

        /// 256-bit hexadecimal key (prompted for when omitted)
        #[arg(short, long)]
        key: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "eureka=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let mut pipeline = Pipeline::new(PipelineOptions {
        output_dir: cli.output_dir,
        restore_dir: cli.restore_dir,
    });

    if let Some(path) = &cli.audit_log {
        let sink = FileAuditSink::new(path)
            .with_context(|| format!("cannot open audit log {}", path.display()))?;
        pipeline.add_audit_sink(Box::new(sink));
    }

    match cli.command {
        Commands::Encrypt { path } => {
            let sealed = pipeline
                .seal_path(&path)
                .with_context(|| format!("cannot encrypt {}", path.display()))?;
            eprintln!("File encrypted at {}", sealed.output.display());
            eprintln!("Your recipient will need eureka to decrypt the file.");
            eprintln!("In a different secure channel, pass the following one-time key to your recipient.");
            println!("{}", sealed.key.to_hex().as_str());
        }
        Commands::Decrypt { path, key } => {
            let hex_key = match key {
                Some(key) => Zeroizing::new(key),
                None => prompt_key()?,
            };
            let key = SymmetricKey::parse(hex_key.trim())?;
            let restored = pipeline.open_path(&path, &key)?;
            eprintln!("File decrypted at {}", restored.display());
        }
    }

    Ok(())
}

fn prompt_key() -> Result<Zeroizing<String>> {
    eprint!("Enter 256-bit hexadecimal key: ");
    io::stderr().flush()?;
    let mut line = Zeroizing::new(String::new());
    io::stdin()
        .read_line(&mut line)
        .context("couldn't read the key")?;
    Ok(line)
}

//! cyclecare-offline CLI - encrypted offline record storage
//!
//! Every invocation is one session: commands that read or write encrypted
//! payloads first set up the session key from a password (or a random key
//! with `--random-key`).

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::error::Error as StdError;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use cyclecare_offline::config::{self, DATA_DIR_ENV, StoreConfig};
use cyclecare_offline::export;
use cyclecare_offline::passphrase::{PasswordReader, ReaderPasswordReader, TerminalPasswordReader};
use cyclecare_offline::{
    DecryptedRecords, ErrorCategory, ErrorKind, FileKeyValueStore, OfflineError, OfflineRecord,
    OfflineStore, RecordType, Result,
};

#[derive(Parser)]
#[command(name = "cyclecare-offline")]
#[command(version)]
#[command(about = "Encrypted offline storage for CycleCare records.", long_about = None)]
struct Cli {
    /// Directory holding the offline store
    #[arg(long, global = true, value_name = "DIR", env = DATA_DIR_ENV)]
    data_dir: Option<PathBuf>,

    /// Read password from stdin instead of from terminal
    #[arg(long, global = true)]
    passphrase_stdin: bool,

    /// Use a random session key instead of a password
    ///
    /// Records encrypted this way cannot be read by any later invocation.
    #[arg(long, global = true, conflicts_with = "passphrase_stdin")]
    random_key: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that secure offline storage is available
    Probe,

    /// Create the salt if needed and verify the password can derive a key
    Init,

    /// Insert or replace a record
    #[command(alias = "s")]
    Store {
        /// Record id; an existing record with this id is replaced
        #[arg(long)]
        id: String,

        /// Record type: cycle, symptom, nutrition, remedy or emergency
        #[arg(long = "type", value_name = "TYPE")]
        record_type: RecordType,

        /// Payload as JSON
        #[arg(long, value_name = "JSON")]
        data: String,

        /// Creation time (RFC 3339); defaults to now
        #[arg(long, value_name = "TIME")]
        timestamp: Option<DateTime<Utc>>,

        /// Store the payload without encrypting it
        #[arg(long)]
        plain: bool,
    },

    /// Print all records, decrypted
    #[command(alias = "ls")]
    List {
        /// Print records as stored, without decrypting
        #[arg(long)]
        raw: bool,
    },

    /// Print records not yet synced, decrypted
    Unsynced,

    /// Mark records as synced
    MarkSynced {
        /// Ids of acknowledged records
        #[arg(required = true, value_name = "ID")]
        ids: Vec<String>,
    },

    /// Show storage used against the quota
    Usage,

    /// Write a decrypted backup of all records
    Export {
        /// Output file; defaults to cyclecare-backup-<date>.json in the current directory
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Delete all records and the salt
    Clear,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cyclecare_offline=warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", error_chain(&e));
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let dir = config::resolve_data_dir(cli.data_dir.clone())?;
    let medium = FileKeyValueStore::open(&dir)?;
    let mut store = OfflineStore::with_config(medium, StoreConfig::default());
    let session = cli.session();

    match cli.command {
        Commands::Probe => {
            store.ensure_available()?;
            println!("offline mode available ({})", dir.display());
            Ok(())
        }
        Commands::Init => {
            open_session(&mut store, &session)?;
            println!("encryption initialized");
            Ok(())
        }
        Commands::Store {
            id,
            record_type,
            data,
            timestamp,
            plain,
        } => {
            let payload: serde_json::Value = serde_json::from_str(&data).map_err(|e| {
                OfflineError::with_kind_and_source(
                    ErrorCategory::User,
                    ErrorKind::Serialization,
                    "--data is not valid JSON",
                    e,
                )
            })?;
            let mut record = OfflineRecord::new(id, record_type, payload);
            if let Some(timestamp) = timestamp {
                record = record.with_timestamp(timestamp);
            }
            if plain {
                record = record.plaintext();
            }
            open_session(&mut store, &session)?;
            store.store_record(record)
        }
        Commands::List { raw: true } => print_json(&store.get_raw_records()?),
        Commands::List { raw: false } => {
            open_session(&mut store, &session)?;
            print_decrypted(store.get_decrypted_records()?)
        }
        Commands::Unsynced => {
            open_session(&mut store, &session)?;
            print_decrypted(store.get_unsynced_records()?)
        }
        Commands::MarkSynced { ids } => {
            let changed = store.mark_synced(&ids)?;
            println!("{} record(s) marked synced", changed);
            Ok(())
        }
        Commands::Usage => {
            let usage = store.get_storage_usage()?;
            let percent = if usage.available > 0 {
                usage.used as f64 / usage.available as f64 * 100.0
            } else {
                0.0
            };
            println!(
                "{} of {} bytes used ({:.2}%)",
                usage.used, usage.available, percent
            );
            Ok(())
        }
        Commands::Export { output } => {
            open_session(&mut store, &session)?;
            let bundle = export::export_records(&store)?;
            let path = output.unwrap_or_else(|| PathBuf::from(bundle.backup_file_name()));
            bundle.write_to(&path)?;
            if bundle.skipped > 0 {
                eprintln!(
                    "warning: {} record(s) could not be decrypted and were not exported",
                    bundle.skipped
                );
            }
            println!("exported {} record(s) to {}", bundle.data.len(), path.display());
            Ok(())
        }
        Commands::Clear => {
            store.clear_all()?;
            println!("offline data cleared");
            Ok(())
        }
    }
}

enum Session {
    Random,
    Stdin,
    Terminal,
}

impl Cli {
    fn session(&self) -> Session {
        if self.random_key {
            Session::Random
        } else if self.passphrase_stdin {
            Session::Stdin
        } else {
            Session::Terminal
        }
    }
}

fn open_session(store: &mut OfflineStore<FileKeyValueStore>, session: &Session) -> Result<()> {
    store.ensure_available()?;
    let mut reader: Box<dyn PasswordReader> = match session {
        Session::Random => return store.initialize_encryption(None),
        Session::Stdin => Box::new(ReaderPasswordReader::new(Box::new(std::io::stdin()))),
        Session::Terminal => Box::new(TerminalPasswordReader::new()),
    };
    let password = reader.read_password()?;
    store.initialize_encryption(Some(password.as_str()))
}

fn print_decrypted(result: DecryptedRecords) -> Result<()> {
    if !result.is_complete() {
        for failure in &result.failures {
            eprintln!("warning: skipped record {}: {}", failure.id, failure.reason);
        }
        eprintln!(
            "warning: {} record(s) could not be decrypted (wrong password or corrupt data)",
            result.failed_count()
        );
    }
    print_json(&result.records)
}

fn print_json(records: &[OfflineRecord]) -> Result<()> {
    let json = serde_json::to_string_pretty(records).map_err(|e| {
        OfflineError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Serialization,
            "failed to format records",
            e,
        )
    })?;
    println!("{}", json);
    Ok(())
}

fn error_chain(err: &OfflineError) -> String {
    let mut out = err.to_string();
    let mut source = StdError::source(err);
    while let Some(inner) = source {
        out.push_str(": ");
        out.push_str(&inner.to_string());
        source = inner.source();
    }
    out
}

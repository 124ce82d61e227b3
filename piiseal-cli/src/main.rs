//! `piiseal` CLI tool for key management, single-value operations and
//! offline tenant migration.

#![warn(clippy::pedantic, clippy::nursery)]

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use piiseal::prelude::*;
use piiseal_key_file::FileKeySource;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "piiseal")]
#[command(about = "piiseal key management and migration CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Where the encryption key comes from.
#[derive(Args)]
struct KeyArgs {
    /// TOML settings file (environment variables still override it)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// File holding the secret, instead of PII_ENCKEY
    #[arg(short, long)]
    key_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new key file
    Keygen {
        /// Output file for the key
        #[arg(short, long, default_value = "./piiseal.key")]
        output: PathBuf,
    },
    /// Resolve and validate the configured key
    CheckKey {
        #[command(flatten)]
        key: KeyArgs,
    },
    /// Encrypt a single value
    Encrypt {
        value: String,
        #[command(flatten)]
        key: KeyArgs,
    },
    /// Decrypt a single token
    Decrypt {
        token: String,
        #[command(flatten)]
        key: KeyArgs,
    },
    /// Print the lookup hash of a value
    Hash { value: String },
    /// Enable or disable encryption for a tenant in a JSON snapshot
    Migrate {
        /// Snapshot file, rewritten in place
        #[arg(short, long)]
        snapshot: PathBuf,
        /// Tenant to migrate
        #[arg(short, long)]
        tenant: String,
        /// Optional field the tenant has opted into encrypting (repeatable)
        #[arg(long = "opt-in", value_name = "FIELD")]
        opt_in: Vec<String>,
        #[command(flatten)]
        direction: Direction,
        #[command(flatten)]
        key: KeyArgs,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct Direction {
    /// Encrypt the tenant's owners
    #[arg(long)]
    enable: bool,
    /// Decrypt the tenant's owners
    #[arg(long)]
    disable: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen { output } => {
            FileKeySource::init(&output).with_context(|| format!("writing {}", output.display()))?;
            println!("Key written to: {}", output.display());
        }
        Commands::CheckKey { key } => {
            let cipher = build_cipher(&key)?;
            let resolved = cipher.key_provider().get_key().context("resolving encryption key")?;
            println!("Key OK: AES-{}", resolved.len() * 8);
        }
        Commands::Encrypt { value, key } => {
            let cipher = build_cipher(&key)?;
            println!("{}", cipher.try_encrypt(&value)?);
        }
        Commands::Decrypt { token, key } => {
            let cipher = build_cipher(&key)?;
            if !FieldCipher::is_encrypted(Some(&token)) {
                bail!("not an encrypted value: expected the {} prefix", piiseal::token::CIPHERTEXT_PREFIX);
            }
            println!("{}", cipher.try_decrypt(&token)?);
        }
        Commands::Hash { value } => {
            if let Some(hash) = lookup_hash(Some(&value)) {
                println!("{hash}");
            }
        }
        Commands::Migrate { snapshot, tenant, opt_in, direction, key } => {
            let cipher = build_cipher(&key)?;
            let report = migrate(&snapshot, &TenantId::from(tenant), &opt_in, direction.enable, &cipher)?;
            print_report(&report);
            if !report.failures.is_empty() {
                bail!("{} owner(s) failed verification and were left unchanged", report.failures.len());
            }
        }
    }

    Ok(())
}

fn load_settings(args: &KeyArgs) -> Result<Settings> {
    match &args.config {
        Some(path) => Ok(Settings::load(path)?),
        None => Ok(Settings::from_env()),
    }
}

fn build_cipher(args: &KeyArgs) -> Result<FieldCipher> {
    let settings = load_settings(args)?;
    let provider = match &args.key_file {
        Some(path) => {
            let mut source = FileKeySource::new(path)?;
            if let Some(seed) = settings.database_url {
                source = source.with_seed(seed);
            }
            KeyProvider::new(source)
        }
        None => KeyProvider::new(settings.key_source()),
    };
    Ok(FieldCipher::new(Arc::new(provider)))
}

fn migrate(
    path: &Path,
    tenant: &TenantId,
    opt_in: &[String],
    enable: bool,
    cipher: &FieldCipher,
) -> Result<MigrationReport> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let snapshot: MemorySnapshot =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    let store = MemoryStore::from_snapshot(snapshot);

    // Opt-ins live outside the snapshot; without them optional fields stay in plaintext
    let settings = InMemoryTenantSettings::new();
    for field in opt_in {
        settings.set_field_opt_in(tenant, field.as_str(), true)?;
    }
    let report = Migrator::new(&store, cipher, &settings).set_tenant_encryption(tenant, enable)?;

    let json = serde_json::to_string_pretty(&store.snapshot()?)?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    tracing::info!(path = %path.display(), tenant = %tenant, "snapshot rewritten");
    Ok(report)
}

fn print_report(report: &MigrationReport) {
    println!("Owners visited:           {}", report.owners_visited);
    println!("Fields changed:           {}", report.fields_changed);
    println!("Service accounts skipped: {}", report.skipped_service_accounts);
    println!("Already hashed, skipped:  {}", report.skipped_hashed);
    for failure in &report.failures {
        println!("FAILED: {failure}");
    }
}

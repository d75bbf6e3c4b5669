//! pagecrypt: encrypt, decrypt and rekey paged database files
//!
//! Commands:
//!   encrypt <in> <out>     - encrypt a plaintext database image
//!   decrypt <in> <out>     - decrypt an encrypted database image
//!   rekey <file> [-o out]  - re-encrypt a database under a new passphrase
//!   config show            - display current configuration
//!
//! Passphrases come from PAGECRYPT_PASSPHRASE / PAGECRYPT_NEW_PASSPHRASE or
//! an interactive prompt. Outputs are written to a temp file and renamed into
//! place, so a failed run never leaves a half-written database.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};

use pagecrypt_core::PagecryptConfig;
use pagecrypt_crypto::{Codec, EncryptedPager, MemoryPageStore};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "pagecrypt",
    version,
    about = "Page-level database encryption",
    long_about = "pagecrypt: encrypt, decrypt and rekey paged database files with a passphrase"
)]
struct Cli {
    /// Path to pagecrypt.toml configuration file
    #[arg(long, short = 'c', env = "PAGECRYPT_CONFIG", default_value = "pagecrypt.toml")]
    config: PathBuf,

    /// Log level or filter directive (overrides config)
    #[arg(long, env = "PAGECRYPT_LOG")]
    log: Option<String>,

    /// Log output format (overrides config)
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    /// Page size in bytes (overrides config)
    #[arg(long)]
    page_size: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt a plaintext database image
    Encrypt {
        input: PathBuf,
        output: PathBuf,
    },

    /// Decrypt an encrypted database image
    Decrypt {
        input: PathBuf,
        output: PathBuf,
    },

    /// Re-encrypt a database under a new passphrase
    ///
    /// Either every page is rewritten under the new key or the file is left
    /// untouched. A wrong current passphrase cannot be detected, so when
    /// rekeying in place the previous file is kept as `<file>.bak`.
    Rekey {
        file: PathBuf,
        /// Write the rekeyed database here and leave <file> as it is
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn from_config(format: &str) -> Self {
        if format.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = PagecryptConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli
        .log_format
        .unwrap_or_else(|| LogFormat::from_config(&config.log.format));
    init_logging(&level, format);

    if let Some(page_size) = cli.page_size {
        config.codec.page_size = page_size;
    }

    match cli.command {
        Commands::Encrypt { input, output } => {
            let passphrase = passphrase_from_env_or_prompt("PAGECRYPT_PASSPHRASE", "Passphrase: ", true)?;
            cmd_encrypt(&config, &input, &output, &passphrase)
        }
        Commands::Decrypt { input, output } => {
            let passphrase = passphrase_from_env_or_prompt("PAGECRYPT_PASSPHRASE", "Passphrase: ", false)?;
            cmd_decrypt(&config, &input, &output, &passphrase)
        }
        Commands::Rekey { file, output } => {
            let old = passphrase_from_env_or_prompt("PAGECRYPT_PASSPHRASE", "Current passphrase: ", false)?;
            let new = passphrase_from_env_or_prompt("PAGECRYPT_NEW_PASSPHRASE", "New passphrase: ", true)?;
            cmd_rekey(&config, &file, output.as_deref(), &old, &new)
        }
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    // logs go to stderr so `config show` output stays clean
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Passphrases ───────────────────────────────────────────────────────────────

fn passphrase_from_env_or_prompt(var: &str, prompt: &str, confirm: bool) -> Result<SecretString> {
    if let Ok(value) = std::env::var(var) {
        tracing::debug!("using passphrase from {var}");
        return check_passphrase(SecretString::from(value));
    }

    let first = SecretString::from(
        rpassword::prompt_password(prompt).context("reading passphrase from terminal")?,
    );
    if confirm {
        let second = SecretString::from(
            rpassword::prompt_password("Confirm passphrase: ")
                .context("reading passphrase from terminal")?,
        );
        if first.expose_secret() != second.expose_secret() {
            anyhow::bail!("passphrases do not match");
        }
    }
    check_passphrase(first)
}

fn check_passphrase(passphrase: SecretString) -> Result<SecretString> {
    if passphrase.expose_secret().is_empty() {
        anyhow::bail!("passphrase must not be empty");
    }
    Ok(passphrase)
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn cmd_encrypt(
    config: &PagecryptConfig,
    input: &Path,
    output: &Path,
    passphrase: &SecretString,
) -> Result<()> {
    let plain = read_image(input, config.codec.page_size)?;

    let codec = Codec::with_passphrase(
        config.codec.profile.clone(),
        passphrase.expose_secret().as_bytes(),
    )?;
    let empty = MemoryPageStore::new(config.codec.page_size)?;
    let mut pager = EncryptedPager::new(empty, codec)?;
    let pages = pager.import_plaintext(&plain)?;

    write_atomic(output, pager.store().as_bytes())?;
    println!("Encrypted {pages} pages: {} -> {}", input.display(), output.display());
    Ok(())
}

fn cmd_decrypt(
    config: &PagecryptConfig,
    input: &Path,
    output: &Path,
    passphrase: &SecretString,
) -> Result<()> {
    let encrypted = read_image(input, config.codec.page_size)?;
    let mut pager = EncryptedPager::open(
        encrypted,
        config.codec.profile.clone(),
        passphrase.expose_secret().as_bytes(),
    )?;

    let mut plain = MemoryPageStore::new(config.codec.page_size)?;
    let pages = pager.export_plaintext(&mut plain)?;

    write_atomic(output, plain.as_bytes())?;
    println!("Decrypted {pages} pages: {} -> {}", input.display(), output.display());
    Ok(())
}

fn cmd_rekey(
    config: &PagecryptConfig,
    file: &Path,
    output: Option<&Path>,
    old: &SecretString,
    new: &SecretString,
) -> Result<()> {
    let store = read_image(file, config.codec.page_size)?;
    let mut pager = EncryptedPager::open(
        store,
        config.codec.profile.clone(),
        old.expose_secret().as_bytes(),
    )?;

    let report = pager
        .rekey(new.expose_secret().as_bytes())
        .with_context(|| format!("rekeying {}", file.display()))?;

    match output {
        Some(output) => {
            write_atomic(output, pager.store().as_bytes())?;
            println!(
                "Rekeyed {} pages: {} -> {}",
                report.pages,
                file.display(),
                output.display()
            );
        }
        None => {
            let backup = sibling(file, ".bak");
            std::fs::copy(file, &backup).with_context(|| {
                format!("backing up {} -> {}", file.display(), backup.display())
            })?;
            write_atomic(file, pager.store().as_bytes())?;
            println!(
                "Rekeyed {} pages: {} (previous version kept at {})",
                report.pages,
                file.display(),
                backup.display()
            );
        }
    }
    Ok(())
}

fn cmd_config_show(config: &PagecryptConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── File I/O ──────────────────────────────────────────────────────────────────

fn read_image(path: &Path, page_size: usize) -> Result<MemoryPageStore> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    tracing::debug!(bytes = data.len(), page_size, "read database image");
    MemoryPageStore::from_bytes(page_size, data)
        .with_context(|| format!("loading pages from {}", path.display()))
}

/// `path` with `suffix` appended to its file name.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Write to a sibling temp file, then rename over `path`.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = sibling(path, ".tmp");

    std::fs::write(&tmp_path, data)
        .with_context(|| format!("writing temp file: {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("renaming {} -> {}", tmp_path.display(), path.display()))?;
    Ok(())
}

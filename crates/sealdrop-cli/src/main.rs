//! sealdrop: local end of encrypted file sharing
//!
//! Commands:
//!   keygen                       - print fresh key material
//!   encrypt <input> [-o out]     - encrypt a file under fresh key material
//!   decrypt <input> -o <out> ... - decrypt a file with passphrase, IV and salt

mod files;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::{ExposeSecret, SecretString};
use sealdrop_core::config::SealdropConfig;
use sealdrop_crypto::{Iv, KdfParams, KeyMaterial, MaterialOptions, Salt, StreamOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "sealdrop",
    version,
    about = "End-to-end encrypted file sharing",
    long_about = "sealdrop: encrypt files locally before sharing, and decrypt what was shared with you"
)]
struct Cli {
    /// Path to sealdrop.toml configuration file (crypto parameters)
    #[arg(long, short = 'c', env = "SEALDROP_CONFIG", default_value = "/etc/sealdrop/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate and print fresh key material
    Keygen {
        /// Omit the salt (passphrase feeds HKDF directly)
        #[arg(long)]
        no_salt: bool,
        /// Also generate an access password
        #[arg(long)]
        access_password: bool,
    },

    /// Encrypt a file under freshly generated key material
    ///
    /// Prints the passphrase, IV and salt the recipient needs.
    Encrypt {
        /// Plaintext file
        input: PathBuf,
        /// Ciphertext destination (default: <input>.sdrp)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Decrypt a file
    ///
    /// Nothing is written unless the whole file authenticates.
    Decrypt {
        /// Ciphertext file
        input: PathBuf,
        /// Plaintext destination
        #[arg(long, short = 'o')]
        output: PathBuf,
        /// Passphrase (hex, as printed by `encrypt`)
        #[arg(long, env = "SEALDROP_PASSPHRASE", hide_env_values = true)]
        passphrase: String,
        /// IV (32 hex chars)
        #[arg(long)]
        iv: String,
        /// Salt (32 hex chars); omit for unsalted ciphertext
        #[arg(long)]
        salt: Option<String>,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;
    config.validate().context("invalid configuration")?;

    let opts = StreamOptions {
        chunk_size: config.crypto.chunk_size(),
        kdf: KdfParams::from(&config.crypto),
    };

    match cli.command {
        Commands::Keygen {
            no_salt,
            access_password,
        } => cmd_keygen(no_salt, access_password),
        Commands::Encrypt { input, output } => {
            let output = output.unwrap_or_else(|| default_output(&input));
            tokio::task::spawn_blocking(move || cmd_encrypt(&input, &output, &opts)).await?
        }
        Commands::Decrypt {
            input,
            output,
            passphrase,
            iv,
            salt,
        } => {
            let passphrase = SecretString::from(passphrase);
            tokio::task::spawn_blocking(move || {
                cmd_decrypt(&input, &output, &passphrase, &iv, salt.as_deref(), &opts)
            })
            .await?
        }
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<SealdropConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))
    } else {
        Ok(SealdropConfig::default())
    }
}

fn default_output(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(".sdrp");
    PathBuf::from(name)
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::with_template(
        "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
    ) {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

// ── `sealdrop keygen` ─────────────────────────────────────────────────────────

fn cmd_keygen(no_salt: bool, access_password: bool) -> Result<()> {
    let material = KeyMaterial::generate(MaterialOptions {
        salt: !no_salt,
        access_password,
    })?;
    print_material(&material);
    Ok(())
}

fn print_material(material: &KeyMaterial) {
    println!("  passphrase: {}", material.passphrase.expose_secret());
    println!("  iv:         {}", material.iv.to_hex());
    match &material.salt {
        Some(salt) => println!("  salt:       {}", salt.to_hex()),
        None => println!("  salt:       (none)"),
    }
    if let Some(pw) = &material.access_password {
        println!("  access:     {}", pw.expose_secret());
    }
}

// ── `sealdrop encrypt` ────────────────────────────────────────────────────────

fn cmd_encrypt(input: &Path, output: &Path, opts: &StreamOptions) -> Result<()> {
    let material = KeyMaterial::generate(MaterialOptions::default())?;
    let pb = make_progress_bar("encrypt");
    let done = files::encrypt_file(input, output, material, opts, &pb)?;

    println!("Encrypted:");
    println!("  input:  {} ({})", input.display(), fmt_bytes(done.plaintext_bytes));
    println!("  output: {} ({})", output.display(), fmt_bytes(done.ciphertext_bytes));
    println!();
    println!("Share these with the recipient (separately from the file):");
    print_material(&done.material);
    Ok(())
}

// ── `sealdrop decrypt` ────────────────────────────────────────────────────────

fn cmd_decrypt(
    input: &Path,
    output: &Path,
    passphrase: &SecretString,
    iv: &str,
    salt: Option<&str>,
    opts: &StreamOptions,
) -> Result<()> {
    let iv = Iv::from_hex(iv).context("parsing --iv")?;
    let salt = salt
        .map(Salt::from_hex)
        .transpose()
        .context("parsing --salt")?;

    let pb = make_progress_bar("decrypt");
    let bytes = files::decrypt_file(input, output, passphrase, &iv, salt.as_ref(), opts, &pb)?;

    println!("Decrypted:");
    println!("  output: {}", output.display());
    println!("  bytes:  {}", fmt_bytes(bytes));
    Ok(())
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

//! Whole-file encrypt/decrypt used by the `encrypt` and `decrypt` commands

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use secrecy::SecretString;
use sealdrop_crypto::{decrypt_stream, encrypt_stream, Iv, KeyMaterial, Salt, StreamOptions};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

pub struct Encrypted {
    pub material: KeyMaterial,
    pub plaintext_bytes: u64,
    pub ciphertext_bytes: u64,
}

/// Encrypt `input` into `output` under fresh key material.
///
/// The output only appears once it is complete.
pub fn encrypt_file(
    input: &Path,
    output: &Path,
    material: KeyMaterial,
    opts: &StreamOptions,
    pb: &ProgressBar,
) -> Result<Encrypted> {
    let file = File::open(input).with_context(|| format!("opening {}", input.display()))?;
    let plaintext_bytes = file.metadata()?.len();
    pb.set_length(plaintext_bytes);

    let mut tmp = staging_file(output)?;
    let mut ciphertext_bytes = 0u64;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        let pieces = encrypt_stream(
            pb.wrap_read(BufReader::new(file)),
            &material.passphrase,
            &material.iv,
            material.salt.as_ref(),
            opts,
        )?;
        for piece in pieces {
            let piece = piece.with_context(|| format!("encrypting {}", input.display()))?;
            writer.write_all(&piece)?;
            ciphertext_bytes += piece.len() as u64;
        }
        writer.flush()?;
    }

    tmp.persist(output)
        .with_context(|| format!("writing {}", output.display()))?;
    pb.finish_and_clear();

    Ok(Encrypted {
        material,
        plaintext_bytes,
        ciphertext_bytes,
    })
}

/// Decrypt `input` into `output`. On any failure `output` is left untouched.
pub fn decrypt_file(
    input: &Path,
    output: &Path,
    passphrase: &SecretString,
    iv: &Iv,
    salt: Option<&Salt>,
    opts: &StreamOptions,
    pb: &ProgressBar,
) -> Result<u64> {
    let file = File::open(input).with_context(|| format!("opening {}", input.display()))?;
    pb.set_length(file.metadata()?.len());

    let mut tmp = staging_file(output)?;
    let written = decrypt_stream(
        pb.wrap_read(BufReader::new(file)),
        BufWriter::new(tmp.as_file_mut()),
        passphrase,
        iv,
        salt,
        opts,
    )
    .with_context(|| format!("decrypting {}", input.display()))?;

    tmp.persist(output)
        .with_context(|| format!("writing {}", output.display()))?;
    pb.finish_and_clear();
    Ok(written)
}

/// Temp file next to `output` so the final rename stays on one filesystem
fn staging_file(output: &Path) -> Result<NamedTempFile> {
    let dir = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    NamedTempFile::new_in(dir).with_context(|| format!("creating temp file in {}", dir.display()))
}

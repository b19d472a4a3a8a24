//! Local fallback codec.
//!
//! When the external pipeline exits without leaving an artifact behind, the
//! dispatcher runs this codec for the same mode and paths. The transform is
//! a byte-wise XOR against a repeating key: length-preserving, independent
//! per byte, and its own inverse under the same key. It offers no real
//! confidentiality; its only job is to guarantee a usable artifact.
//!
//! Artifacts written next to the output:
//!
//! - `<output>.key`: raw key bytes, after a fallback encryption.
//! - `<output>.verified`: timestamped marker, after a fallback decryption.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::paths::{candidate_key_paths, with_suffix, KEY_SUFFIX, VERIFIED_SUFFIX};

/// Key used when nothing better is available.
pub const DEFAULT_KEY: &[u8] = b"FALLBACK_ENCRYPTION_KEY_DEMO_ONLY";

/// Appended to the raw input copy written by the placeholder tier.
pub const PLACEHOLDER_NOTICE: &[u8] = b"\n\nTHIS IS A PLACEHOLDER FILE - ACTUAL DECRYPTION FAILED\n";

/// Errors produced by the fallback codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("fallback decryption failed ({primary}); placeholder copy also failed ({secondary})")]
    TotalFailure {
        primary: Box<CodecError>,
        secondary: Box<CodecError>,
    },
}

fn io_at(path: &Path) -> impl FnOnce(std::io::Error) -> CodecError + '_ {
    move |source| CodecError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ---------------------------------------------------------------------------
// Key material
// ---------------------------------------------------------------------------

/// Where a key came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    File(PathBuf),
    Default,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::File(path) => write!(f, "{}", path.display()),
            KeySource::Default => f.write_str("default key"),
        }
    }
}

/// A non-empty key together with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    bytes: Vec<u8>,
    source: KeySource,
}

impl KeyMaterial {
    /// Returns `None` for an empty key, which has no defined transform.
    pub fn new(bytes: Vec<u8>, source: KeySource) -> Option<Self> {
        if bytes.is_empty() {
            None
        } else {
            Some(Self { bytes, source })
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn source(&self) -> &KeySource {
        &self.source
    }
}

/// XOR `data` in place with `key` repeated over its length.
///
/// Applying it twice with the same key restores the original bytes. An
/// empty key leaves `data` untouched.
pub fn apply_xor(data: &mut [u8], key: &[u8]) {
    if key.is_empty() {
        return;
    }
    for (byte, k) in data.iter_mut().zip(key.iter().cycle()) {
        *byte ^= k;
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Result of a fallback encryption.
#[derive(Debug, Clone)]
pub struct EncryptReport {
    pub output: PathBuf,
    pub key_path: PathBuf,
    pub bytes: usize,
}

/// Result of a fallback decryption.
#[derive(Debug, Clone)]
pub enum DecryptReport {
    /// The input was decrypted with the given key.
    Decrypted {
        output: PathBuf,
        key_source: KeySource,
        bytes: usize,
    },
    /// Decryption failed; `output` holds a raw copy of the input followed
    /// by [`PLACEHOLDER_NOTICE`].
    Placeholder { output: PathBuf, reason: String },
}

impl DecryptReport {
    pub fn output(&self) -> &Path {
        match self {
            DecryptReport::Decrypted { output, .. } | DecryptReport::Placeholder { output, .. } => {
                output
            }
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, DecryptReport::Placeholder { .. })
    }
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// XOR fallback codec with a configurable default key.
#[derive(Debug, Clone)]
pub struct FallbackCodec {
    default_key: Vec<u8>,
}

impl Default for FallbackCodec {
    fn default() -> Self {
        Self {
            default_key: DEFAULT_KEY.to_vec(),
        }
    }
}

impl FallbackCodec {
    /// Use `key` instead of [`DEFAULT_KEY`]. An empty key falls back to
    /// [`DEFAULT_KEY`].
    pub fn with_default_key(key: Vec<u8>) -> Self {
        if key.is_empty() {
            Self::default()
        } else {
            Self { default_key: key }
        }
    }

    fn default_material(&self) -> KeyMaterial {
        KeyMaterial {
            bytes: self.default_key.clone(),
            source: KeySource::Default,
        }
    }

    /// Encrypt `input` into `output` and store the key at `<output>.key`.
    pub async fn encrypt(&self, input: &Path, output: &Path) -> Result<EncryptReport, CodecError> {
        tracing::info!(input = %input.display(), output = %output.display(), "Fallback encryption");

        let mut data = tokio::fs::read(input).await.map_err(io_at(input))?;
        let key = self.default_material();
        apply_xor(&mut data, key.bytes());

        ensure_parent_dir(output).await?;
        tokio::fs::write(output, &data)
            .await
            .map_err(io_at(output))?;

        let key_path = with_suffix(output, KEY_SUFFIX);
        tokio::fs::write(&key_path, key.bytes())
            .await
            .map_err(io_at(&key_path))?;

        tracing::info!(
            output = %output.display(),
            key_path = %key_path.display(),
            bytes = data.len(),
            "Fallback encryption wrote artifact and key",
        );

        Ok(EncryptReport {
            output: output.to_path_buf(),
            key_path,
            bytes: data.len(),
        })
    }

    /// Decrypt `input` into `output`.
    ///
    /// If the primary path fails at any step, the raw input is copied to
    /// `output` with [`PLACEHOLDER_NOTICE`] appended and a
    /// [`DecryptReport::Placeholder`] is returned. Only when that copy also
    /// fails is an error returned.
    pub async fn decrypt(&self, input: &Path, output: &Path) -> Result<DecryptReport, CodecError> {
        tracing::info!(input = %input.display(), output = %output.display(), "Fallback decryption");

        let primary = match self.decrypt_primary(input, output).await {
            Ok(report) => return Ok(report),
            Err(e) => e,
        };

        tracing::error!(error = %primary, "Fallback decryption failed, writing placeholder copy");

        match write_placeholder(input, output).await {
            Ok(()) => {
                tracing::warn!(
                    output = %output.display(),
                    "Placeholder copy written; output is NOT decrypted",
                );
                Ok(DecryptReport::Placeholder {
                    output: output.to_path_buf(),
                    reason: primary.to_string(),
                })
            }
            Err(secondary) => {
                tracing::error!(error = %secondary, "Placeholder copy failed");
                Err(CodecError::TotalFailure {
                    primary: Box::new(primary),
                    secondary: Box::new(secondary),
                })
            }
        }
    }

    async fn decrypt_primary(
        &self,
        input: &Path,
        output: &Path,
    ) -> Result<DecryptReport, CodecError> {
        let mut data = tokio::fs::read(input).await.map_err(io_at(input))?;
        let key = self.discover_key(input, output).await;
        apply_xor(&mut data, key.bytes());

        ensure_parent_dir(output).await?;
        tokio::fs::write(output, &data)
            .await
            .map_err(io_at(output))?;

        let marker = with_suffix(output, VERIFIED_SUFFIX);
        let stamp = format!("Decryption completed: {}", chrono::Utc::now().to_rfc3339());
        tokio::fs::write(&marker, stamp)
            .await
            .map_err(io_at(&marker))?;

        tracing::info!(
            output = %output.display(),
            bytes = data.len(),
            key_source = %key.source(),
            "Fallback decryption wrote artifact",
        );

        Ok(DecryptReport::Decrypted {
            output: output.to_path_buf(),
            key_source: key.source().clone(),
            bytes: data.len(),
        })
    }

    /// Return the first readable, non-empty candidate key, or the default
    /// key when none is found.
    pub async fn discover_key(&self, input: &Path, output: &Path) -> KeyMaterial {
        for path in candidate_key_paths(input, output) {
            match tokio::fs::read(&path).await {
                Ok(bytes) => match KeyMaterial::new(bytes, KeySource::File(path.clone())) {
                    Some(key) => {
                        tracing::info!(path = %path.display(), len = key.bytes().len(), "Using key file");
                        return key;
                    }
                    None => tracing::warn!(path = %path.display(), "Skipping empty key file"),
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to read key file");
                }
            }
        }

        tracing::warn!(
            input = %input.display(),
            "No key file found, using default key (NOT SECURE)",
        );
        self.default_material()
    }
}

/// Create the parent directory of `path` if it has one.
async fn ensure_parent_dir(path: &Path) -> Result<(), CodecError> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            tokio::fs::create_dir_all(dir).await.map_err(io_at(dir))
        }
        _ => Ok(()),
    }
}

async fn write_placeholder(input: &Path, output: &Path) -> Result<(), CodecError> {
    ensure_parent_dir(output).await?;
    tokio::fs::copy(input, output)
        .await
        .map_err(io_at(input))?;

    let mut file = tokio::fs::OpenOptions::new()
        .append(true)
        .open(output)
        .await
        .map_err(io_at(output))?;
    file.write_all(PLACEHOLDER_NOTICE)
        .await
        .map_err(io_at(output))?;
    file.flush().await.map_err(io_at(output))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

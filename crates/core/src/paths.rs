//! Output-path and key-path resolution.
//!
//! Pure functions: nothing here touches the filesystem. Callers decide
//! which of the returned candidates actually exist.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::types::{Mode, DECRYPTED_SUFFIX, ENCRYPTED_SUFFIX};

/// Suffix of a key artifact stored next to the file it belongs to.
pub const KEY_SUFFIX: &str = ".key";

/// Suffix of the marker written after a fallback decryption.
pub const VERIFIED_SUFFIX: &str = ".verified";

/// Shared key file looked up next to the input.
pub const SHARED_KEY_FILE: &str = "encryption_key.bin";

/// Append `suffix` to the full path, e.g. `a/b.pdf` + `.key` -> `a/b.pdf.key`.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// Whether the file name ends with `.encrypted`.
pub fn has_encrypted_suffix(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(ENCRYPTED_SUFFIX))
}

/// Strip a trailing `.encrypted` from the file name.
///
/// Returns `None` when the suffix is absent or would leave an empty name.
pub fn strip_encrypted_suffix(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(ENCRYPTED_SUFFIX)?;
    if stem.is_empty() {
        return None;
    }
    Some(path.with_file_name(stem))
}

/// Insert `.decrypted` before the final extension, or append it when the
/// file name has none: `notes.txt` -> `notes.decrypted.txt`, `notes` ->
/// `notes.decrypted`.
fn insert_decrypted_marker(path: &Path) -> PathBuf {
    match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => {
            let mut name = stem.to_owned();
            name.push(DECRYPTED_SUFFIX);
            name.push(".");
            name.push(ext);
            path.with_file_name(name)
        }
        _ => with_suffix(path, DECRYPTED_SUFFIX),
    }
}

/// Compute the output path of a job.
///
/// An empty or absent `requested` path means "derive it from the input".
/// The result never equals `input`.
pub fn resolve_output_path(input: &Path, mode: Mode, requested: Option<&Path>) -> PathBuf {
    let requested = requested.filter(|p| !p.as_os_str().is_empty());

    match (mode, requested) {
        (Mode::Encrypt, None) => with_suffix(input, ENCRYPTED_SUFFIX),
        (Mode::Encrypt, Some(out)) => {
            let out = if has_encrypted_suffix(out) {
                out.to_path_buf()
            } else {
                with_suffix(out, ENCRYPTED_SUFFIX)
            };
            if out == input {
                with_suffix(&out, ENCRYPTED_SUFFIX)
            } else {
                out
            }
        }
        (Mode::Decrypt, None) => {
            strip_encrypted_suffix(input).unwrap_or_else(|| insert_decrypted_marker(input))
        }
        (Mode::Decrypt, Some(out)) if out == input => with_suffix(input, DECRYPTED_SUFFIX),
        (Mode::Decrypt, Some(out)) => out.to_path_buf(),
    }
}

/// Ordered key-file candidates for a fallback decryption.
///
/// 1. `<output>.key` (written by a fallback encryption targeting this name)
/// 2. `encryption_key.bin` next to the input
/// 3. `<input>.key`
/// 4. `<input without .encrypted>.key`
///
/// Duplicates are removed, keeping the earliest position. The first
/// candidate that exists on disk wins.
pub fn candidate_key_paths(input: &Path, output: &Path) -> Vec<PathBuf> {
    let sibling = input
        .parent()
        .map(|dir| dir.join(SHARED_KEY_FILE))
        .unwrap_or_else(|| PathBuf::from(SHARED_KEY_FILE));

    let stripped = strip_encrypted_suffix(input).unwrap_or_else(|| input.to_path_buf());

    let ordered = [
        with_suffix(output, KEY_SUFFIX),
        sibling,
        with_suffix(input, KEY_SUFFIX),
        with_suffix(&stripped, KEY_SUFFIX),
    ];

    let mut candidates: Vec<PathBuf> = Vec::with_capacity(ordered.len());
    for path in ordered {
        if !candidates.contains(&path) {
            candidates.push(path);
        }
    }
    candidates
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    // -- resolve_output_path --------------------------------------------------

    #[test]
    fn encrypt_default_appends_suffix() {
        let out = resolve_output_path(&p("report.pdf"), Mode::Encrypt, None);
        assert_eq!(out, p("report.pdf.encrypted"));
    }

    #[test]
    fn decrypt_default_strips_suffix() {
        let out = resolve_output_path(&p("report.pdf.encrypted"), Mode::Decrypt, None);
        assert_eq!(out, p("report.pdf"));
    }

    #[test]
    fn decrypt_default_without_extension_appends_marker() {
        let out = resolve_output_path(&p("notes"), Mode::Decrypt, None);
        assert_eq!(out, p("notes.decrypted"));
    }

    #[test]
    fn decrypt_default_inserts_marker_before_extension() {
        let out = resolve_output_path(&p("dir/notes.txt"), Mode::Decrypt, None);
        assert_eq!(out, p("dir/notes.decrypted.txt"));
    }

    #[test]
    fn decrypt_default_ignores_dots_in_directories() {
        let out = resolve_output_path(&p("v1.2/notes"), Mode::Decrypt, None);
        assert_eq!(out, p("v1.2/notes.decrypted"));
    }

    #[test]
    fn empty_requested_path_is_treated_as_absent() {
        let out = resolve_output_path(&p("a.bin"), Mode::Encrypt, Some(Path::new("")));
        assert_eq!(out, p("a.bin.encrypted"));
    }

    #[test]
    fn encrypt_requested_gets_suffix_once() {
        let out = resolve_output_path(&p("a.bin"), Mode::Encrypt, Some(Path::new("out/b")));
        assert_eq!(out, p("out/b.encrypted"));

        let out = resolve_output_path(
            &p("a.bin"),
            Mode::Encrypt,
            Some(Path::new("out/b.encrypted")),
        );
        assert_eq!(out, p("out/b.encrypted"));
    }

    #[test]
    fn encrypt_requested_equal_to_input_is_redirected() {
        let input = p("a.encrypted");
        let out = resolve_output_path(&input, Mode::Encrypt, Some(&input));
        assert_ne!(out, input);
        assert_eq!(out, p("a.encrypted.encrypted"));
    }

    #[test]
    fn decrypt_requested_equal_to_input_is_redirected() {
        for input in ["a.encrypted", "notes", "dir/x.pdf", ".hidden"] {
            let input = p(input);
            let out = resolve_output_path(&input, Mode::Decrypt, Some(&input));
            assert_ne!(out, input, "must not overwrite {}", input.display());
            assert_eq!(out, with_suffix(&input, ".decrypted"));
        }
    }

    #[test]
    fn decrypt_requested_distinct_path_is_kept() {
        let out = resolve_output_path(
            &p("a.encrypted"),
            Mode::Decrypt,
            Some(Path::new("plain/a.txt")),
        );
        assert_eq!(out, p("plain/a.txt"));
    }

    #[test]
    fn bare_suffix_file_name_is_not_stripped_to_nothing() {
        let input = p("dir/.encrypted");
        let out = resolve_output_path(&input, Mode::Decrypt, None);
        assert_ne!(out, input);
        assert_eq!(out, p("dir/.encrypted.decrypted"));
    }

    // -- candidate_key_paths --------------------------------------------------

    #[test]
    fn key_candidates_follow_precedence() {
        let candidates = candidate_key_paths(&p("d/out.encrypted"), &p("d/out"));
        assert_eq!(
            candidates,
            vec![
                p("d/out.key"),
                p("d/encryption_key.bin"),
                p("d/out.encrypted.key"),
            ]
        );
    }

    #[test]
    fn key_candidates_keep_all_four_when_distinct() {
        let candidates = candidate_key_paths(&p("in/a.pdf.encrypted"), &p("out/a.pdf"));
        assert_eq!(
            candidates,
            vec![
                p("out/a.pdf.key"),
                p("in/encryption_key.bin"),
                p("in/a.pdf.encrypted.key"),
                p("in/a.pdf.key"),
            ]
        );
    }

    #[test]
    fn key_candidates_for_unsuffixed_input_skip_duplicate() {
        let candidates = candidate_key_paths(&p("blob"), &p("blob.decrypted"));
        assert_eq!(
            candidates,
            vec![
                p("blob.decrypted.key"),
                p("encryption_key.bin"),
                p("blob.key"),
            ]
        );
    }
}

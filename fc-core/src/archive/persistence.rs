//! Archive file format: `FCAP` magic, format version, canonical JSON.
//!
//! Saves are atomic (write-temp-then-rename) so a failed write leaves the
//! previous file intact. Backups are full copies suffixed
//! `.bak.<unix_seconds>`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use fc_types::error::{ErrorKind, FcError, Result};

use super::profile::Profile;

/// Leading four bytes of every archive file.
pub const MAGIC: [u8; 4] = *b"FCAP";

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Serialize a profile to archive bytes.
///
/// The payload is canonical: values live in ordered maps, so the same
/// logical profile always produces byte-identical output.
pub fn encode(profile: &Profile) -> Vec<u8> {
    let payload = serde_json::to_vec(profile).expect("profile serialization cannot fail");
    let mut bytes = Vec::with_capacity(8 + payload.len());
    bytes.extend_from_slice(&MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&payload);
    bytes
}

/// Parse archive bytes back into a raw (not yet validated) profile.
pub fn decode(bytes: &[u8]) -> Result<Profile> {
    if bytes.len() < 8 || bytes[..4] != MAGIC {
        return Err(FcError::new(ErrorKind::Corrupted, "bad archive magic"));
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != FORMAT_VERSION {
        return Err(FcError::new(
            ErrorKind::Corrupted,
            format!("unsupported archive format version {}", version),
        ));
    }
    let payload = std::str::from_utf8(&bytes[8..])
        .map_err(|e| FcError::new(ErrorKind::EncodingIssue, format!("non-UTF-8 payload: {}", e)))?;
    serde_json::from_str(payload)
        .map_err(|e| FcError::new(ErrorKind::Corrupted, format!("undecodable payload: {}", e)))
}

/// Atomically write archive bytes to `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = tmp_path(path);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write a timestamped backup next to `path`; returns the backup path.
pub fn write_backup(path: &Path, bytes: &[u8]) -> Result<PathBuf> {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let backup = PathBuf::from(format!("{}.bak.{}", path.display(), secs));
    fs::write(&backup, bytes)?;
    Ok(backup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::profile::default_profile;

    #[test]
    fn encode_decode_roundtrip() {
        let profile = default_profile();
        let bytes = encode(&profile);
        assert_eq!(&bytes[..4], b"FCAP");
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, profile);
    }

    #[test]
    fn encode_is_deterministic() {
        let a = encode(&default_profile());
        let b = encode(&default_profile());
        assert_eq!(a, b);
    }

    #[test]
    fn bad_magic_is_corrupted() {
        let mut bytes = encode(&default_profile());
        bytes[0] = b'X';
        let err = decode(&bytes).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Corrupted);
    }

    #[test]
    fn bad_utf8_is_encoding_issue() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&[0xFF, 0xFE, 0x00]);
        let err = decode(&bytes).unwrap_err();
        assert_eq!(err.kind, ErrorKind::EncodingIssue);
    }

    #[test]
    fn unsupported_version_is_corrupted() {
        let mut bytes = encode(&default_profile());
        bytes[4] = 99;
        let err = decode(&bytes).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Corrupted);
    }

    #[test]
    fn atomic_write_replaces_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.fc");
        write_atomic(&path, &encode(&default_profile())).unwrap();
        let first = fs::read(&path).unwrap();
        write_atomic(&path, &first).unwrap();
        assert_eq!(fs::read(&path).unwrap(), first);
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn backup_path_is_timestamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.fc");
        let backup = write_backup(&path, b"hello").unwrap();
        let name = backup.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("profile.fc.bak."));
        assert_eq!(fs::read(&backup).unwrap(), b"hello");
    }
}

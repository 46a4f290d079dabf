//! Versioned bitcode framing for persisted artifacts.
//!
//! Layout: `[record version][BITCODE_PREFIX][bitcode payload]`.

use std::fs;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::constants::artifacts::BITCODE_PREFIX;
use crate::errors::LinkerError;

/// Encode `value` behind a version byte and the bitcode prefix.
pub fn encode_record<T: Serialize>(version: u8, value: &T) -> Result<Vec<u8>, LinkerError> {
    let payload = bitcode::serialize(value)
        .map_err(|err| LinkerError::Codec(format!("failed to encode record: {err}")))?;
    let mut buf = Vec::with_capacity(2 + payload.len());
    buf.push(version);
    buf.push(BITCODE_PREFIX);
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decode a record written by [`encode_record`], checking version and prefix.
pub fn decode_record<T: DeserializeOwned>(version: u8, bytes: &[u8]) -> Result<T, LinkerError> {
    match bytes.first().copied() {
        Some(found) if found == version => {}
        Some(found) => {
            return Err(LinkerError::Codec(format!(
                "record version mismatch (expected {version}, found {found})"
            )));
        }
        None => return Err(LinkerError::Codec("empty record".to_string())),
    }
    if bytes.get(1).copied() != Some(BITCODE_PREFIX) {
        return Err(LinkerError::Codec(
            "bitcode payload missing expected prefix".to_string(),
        ));
    }
    bitcode::deserialize(&bytes[2..])
        .map_err(|err| LinkerError::Codec(format!("corrupt record: {err}")))
}

/// Write an encoded record, creating parent directories as needed.
pub fn write_record<T: Serialize>(path: &Path, version: u8, value: &T) -> Result<(), LinkerError> {
    ensure_parent_dir(path)?;
    fs::write(path, encode_record(version, value)?)?;
    Ok(())
}

/// Read a record; a missing file becomes `MissingArtifact` naming `kind`.
pub fn read_record<T: DeserializeOwned>(
    path: &Path,
    version: u8,
    kind: &'static str,
) -> Result<T, LinkerError> {
    if !path.is_file() {
        return Err(LinkerError::MissingArtifact {
            kind,
            path: path.to_path_buf(),
        });
    }
    decode_record(version, &fs::read(path)?)
}

pub(crate) fn ensure_parent_dir(path: &Path) -> Result<(), LinkerError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

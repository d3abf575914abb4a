use crate::ops::StoreCore;
use anyhow::{bail, Context as _, Result};
use fs_err::{self as fs, File, OpenOptions};
use serde::{Deserialize, Serialize};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::info;

const MAX_HEADER_LEN: usize = 1024;

/// Snapshot file header to identify format and version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub magic: [u8; 4],  // "TDKV"
    pub version: u32,    // Format version
    pub created_at: i64, // Unix millis when the snapshot was taken
    pub checksum: u32,   // CRC32 of the encoded body
}

impl SnapshotHeader {
    const MAGIC: [u8; 4] = *b"TDKV";
    const VERSION: u32 = 1;

    fn for_body(body: &[u8]) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            created_at: chrono::Utc::now().timestamp_millis(),
            checksum: crc32fast::hash(body),
        }
    }

    fn validate(&self, body: &[u8]) -> Result<()> {
        if self.magic != Self::MAGIC {
            bail!("Invalid snapshot magic header");
        }
        if self.version != Self::VERSION {
            bail!(
                "Unsupported snapshot version: expected {}, found {}",
                Self::VERSION,
                self.version
            );
        }
        let computed = crc32fast::hash(body);
        if computed != self.checksum {
            bail!(
                "Snapshot checksum mismatch: expected {:08x}, found {:08x}",
                self.checksum,
                computed
            );
        }
        Ok(())
    }
}

/// Write the store core to `path` atomically (temp file + rename).
///
/// Layout: u32 LE header length, bincode header, bincode body.
pub fn write_snapshot(path: &Path, core: &StoreCore) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let body = bincode::serde::encode_to_vec(core, bincode::config::standard())
        .context("Failed to encode snapshot body")?;
    let header = SnapshotHeader::for_body(&body);
    let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
        .context("Failed to encode snapshot header")?;
    let header_len = header_bytes.len() as u32;

    let tmp_path = path.with_extension("snapshot.tmp");
    {
        let mut writer = BufWriter::new(
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?,
        );
        writer.write_all(&header_len.to_le_bytes())?;
        writer.write_all(&header_bytes)?;
        writer.write_all(&body)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    fs::rename(&tmp_path, path)?;

    if let Some(parent) = path.parent() {
        if let Ok(dir_file) = File::open(parent) {
            let _ = dir_file.sync_all();
        }
    }

    info!(
        n_kvs = core.data().len(),
        pending = core.outbox().len(),
        "Persisted snapshot to {}",
        path.display()
    );
    Ok(())
}

/// Read a snapshot back. A missing file is not an error.
pub fn read_snapshot(path: &Path) -> Result<Option<StoreCore>> {
    if !path.exists() {
        return Ok(None);
    }

    let mut reader = BufReader::new(File::open(path)?);
    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .context("Failed to read snapshot header length")?;
    let header_len = u32::from_le_bytes(len_bytes) as usize;
    if header_len > MAX_HEADER_LEN {
        bail!("Snapshot header too large: {header_len} bytes");
    }

    let mut header_bytes = vec![0u8; header_len];
    reader
        .read_exact(&mut header_bytes)
        .context("Failed to read snapshot header")?;
    let (header, _): (SnapshotHeader, _) =
        bincode::serde::decode_from_slice(&header_bytes, bincode::config::standard())
            .context("Failed to deserialize snapshot header")?;

    let mut body = Vec::new();
    reader.read_to_end(&mut body)?;
    header.validate(&body)?;

    let (core, _): (StoreCore, _) =
        bincode::serde::decode_from_slice(&body, bincode::config::standard())
            .context("Failed to deserialize snapshot")?;

    info!(
        n_kvs = core.data().len(),
        pending = core.outbox().len(),
        "Loaded snapshot from {}",
        path.display()
    );
    Ok(Some(core))
}

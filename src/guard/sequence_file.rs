//! Receiver-side sequence file (§4.5, §6): the local durable record of the
//! last successfully placed order's sequence number. Written via
//! write-then-flush to a temp file and renamed over the live file so a
//! crash mid-write never corrupts the live record — the exact "temp-rename
//! pattern" the external-interfaces section calls acceptable.

use anyhow::{bail, Context, Result};
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const RECORD_LEN: usize = 8 + 4; // u64 sequence + u32 CRC32 trailer

/// Durable, single-writer-per-process record of `last_accepted_sequence`
/// (§5 "Receiver sequence file: single-writer within a receiver process").
pub struct SequenceFile {
    path: PathBuf,
}

impl SequenceFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the persisted sequence, or `0` if the file does not yet exist
    /// (a fresh receiver has never placed an order).
    pub fn load(&self) -> Result<u64> {
        if !self.path.exists() {
            return Ok(0);
        }
        let mut buf = Vec::with_capacity(RECORD_LEN);
        std::fs::File::open(&self.path)
            .context("open sequence file")?
            .read_to_end(&mut buf)
            .context("read sequence file")?;
        if buf.len() != RECORD_LEN {
            bail!("sequence file has unexpected length {} (want {RECORD_LEN})", buf.len());
        }
        let sequence = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let stored_crc = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let computed_crc = crc32fast::hash(&buf[0..8]);
        if stored_crc != computed_crc {
            bail!("sequence file checksum mismatch: stored corrupt state");
        }
        Ok(sequence)
    }

    /// Persist `sequence`, flushing before returning (§4.5 guard invariant:
    /// "persists `n` to local durable storage before placing the order").
    pub fn store(&self, sequence: u64) -> Result<()> {
        let mut buf = Vec::with_capacity(RECORD_LEN);
        buf.extend_from_slice(&sequence.to_le_bytes());
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        let tmp_path = tmp_path_for(&self.path);
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)
                .context("open temp sequence file")?;
            file.write_all(&buf).context("write temp sequence file")?;
            file.flush().context("flush temp sequence file")?;
            file.sync_all().context("fsync temp sequence file")?;
        }
        std::fs::rename(&tmp_path, &self.path).context("rename temp sequence file over live file")?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_file_loads_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        let file = SequenceFile::new(dir.path().join("seq.bin"));
        assert_eq!(file.load().unwrap(), 0);
    }

    #[test]
    fn store_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let file = SequenceFile::new(dir.path().join("seq.bin"));
        file.store(42).unwrap();
        assert_eq!(file.load().unwrap(), 42);

        file.store(43).unwrap();
        assert_eq!(file.load().unwrap(), 43);
    }

    #[test]
    fn corrupted_file_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seq.bin");
        let file = SequenceFile::new(&path);
        file.store(7).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        assert!(file.load().is_err());
    }
}

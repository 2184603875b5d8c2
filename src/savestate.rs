//! Savestate files on disk.
//!
//! A savestate holds one full state snapshot with a small header:
//!
//! ```text
//! magic    [u8; 4]   b"CWSS"
//! version  u32 le
//! length   u32 le    state size in bytes
//! checksum u64 le    xxh3 of the state bytes
//! state    [u8; length]
//! ```
//!
//! Writes go through a temporary file and a rename so a crash mid-write
//! never leaves a half-written state behind. Reads are strict: anything
//! that does not parse exactly is `InvalidData`, never a best-effort state.

use std::ffi::OsString;
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use xxhash_rust::xxh3::xxh3_64;

use crate::snapshot::StateSnapshot;

pub const SAVESTATE_MAGIC: [u8; 4] = *b"CWSS";
pub const SAVESTATE_VERSION: u32 = 1;
/// Upper bound on a savestate's payload. Anything larger is corruption.
pub const MAX_STATE_SIZE: usize = 16 * 1024 * 1024;

const HEADER_LEN: usize = 4 + 4 + 4 + 8;

fn read_u32_le(cursor: &mut io::Cursor<&[u8]>) -> Option<u32> {
    let mut buf = [0u8; 4];
    cursor.read_exact(&mut buf).ok()?;
    Some(u32::from_le_bytes(buf))
}

fn read_u64_le(cursor: &mut io::Cursor<&[u8]>) -> Option<u64> {
    let mut buf = [0u8; 8];
    cursor.read_exact(&mut buf).ok()?;
    Some(u64::from_le_bytes(buf))
}

fn invalid(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Write a snapshot to `path` atomically.
pub fn write(path: &Path, snapshot: &StateSnapshot) -> io::Result<()> {
    if snapshot.len() > MAX_STATE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "state exceeds MAX_STATE_SIZE",
        ));
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = match path.file_name() {
        Some(name) => {
            let mut tmp_name = OsString::from(name);
            tmp_name.push(".tmp");
            path.with_file_name(tmp_name)
        }
        None => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "savestate path has no file name",
            ))
        }
    };

    let mut out = Vec::with_capacity(HEADER_LEN + snapshot.len());
    out.extend_from_slice(&SAVESTATE_MAGIC);
    out.extend_from_slice(&SAVESTATE_VERSION.to_le_bytes());
    out.extend_from_slice(&(snapshot.len() as u32).to_le_bytes());
    out.extend_from_slice(&xxh3_64(snapshot.data()).to_le_bytes());
    out.extend_from_slice(snapshot.data());

    {
        let mut f = fs::File::create(&tmp_path)?;
        f.write_all(&out)?;
        f.sync_all()?;
    }

    #[cfg(windows)]
    {
        if path.exists() {
            // Windows rename fails if destination exists.
            fs::remove_file(path)?;
        }
    }

    fs::rename(&tmp_path, path)?;
    log::info!("savestate written: {} ({} bytes)", path.display(), snapshot.len());
    Ok(())
}

/// Read a snapshot back from `path`.
pub fn read(path: &Path) -> io::Result<StateSnapshot> {
    let bytes = fs::read(path)?;
    let mut cursor = io::Cursor::new(bytes.as_slice());

    let mut magic = [0u8; 4];
    cursor
        .read_exact(&mut magic)
        .map_err(|_| invalid("savestate file is truncated"))?;
    if magic != SAVESTATE_MAGIC {
        return Err(invalid("not a savestate file"));
    }

    let version = read_u32_le(&mut cursor).ok_or_else(|| invalid("savestate file is truncated"))?;
    if version != SAVESTATE_VERSION {
        return Err(invalid("unsupported savestate version"));
    }

    let length = read_u32_le(&mut cursor).ok_or_else(|| invalid("savestate file is truncated"))?
        as usize;
    if length > MAX_STATE_SIZE {
        return Err(invalid("savestate length exceeds MAX_STATE_SIZE"));
    }

    let checksum =
        read_u64_le(&mut cursor).ok_or_else(|| invalid("savestate file is truncated"))?;

    let mut data = vec![0u8; length];
    cursor
        .read_exact(&mut data)
        .map_err(|_| invalid("savestate file is truncated"))?;
    if xxh3_64(&data) != checksum {
        return Err(invalid("savestate checksum mismatch"));
    }

    Ok(StateSnapshot::from_data(data))
}

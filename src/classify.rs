// src/classify.rs

//! Console vs interactive classification of executables.
//!
//! Script extensions are always console programs. Anything else is judged
//! by its PE header: the optional header's `Subsystem` field is `3` for
//! console (CUI) programs and `2` for windowed (GUI) ones. The byte offsets
//! below must stay exactly as they are.
//!
//! Every failure resolves to [`ExecutableKind::Interactive`]: capturing a
//! windowed program's output would leave an unused pipe open.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::types::ExecutableKind;

/// Extensions launched through an interpreter; always captured.
pub const SCRIPT_EXTENSIONS: &[&str] = &["bat", "cmd", "py", "sh"];

const DOS_HEADER_LEN: usize = 64;
const DOS_MAGIC: &[u8; 2] = b"MZ";
const PE_POINTER_OFFSET: usize = 60;
const PE_SIGNATURE: &[u8; 4] = b"PE\0\0";
const COFF_HEADER_LEN: i64 = 20;
const SUBSYSTEM_OFFSET: i64 = 68;
const SUBSYSTEM_CONSOLE: u16 = 3;

/// Classify the file at `path`.
pub fn classify(path: &Path) -> ExecutableKind {
    if has_script_extension(path) {
        return ExecutableKind::Console;
    }

    match File::open(path) {
        Ok(file) => classify_reader(file),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "cannot open executable; treating as interactive");
            ExecutableKind::Interactive
        }
    }
}

/// [`classify`] for async callers: header reads run on the blocking pool.
pub async fn classify_file(path: PathBuf) -> ExecutableKind {
    if has_script_extension(&path) {
        return ExecutableKind::Console;
    }
    match tokio::task::spawn_blocking(move || classify(&path)).await {
        Ok(kind) => kind,
        Err(e) => {
            debug!(error = %e, "classification task failed; treating as interactive");
            ExecutableKind::Interactive
        }
    }
}

/// Classify from raw bytes (header inspection only, no extension check).
pub fn classify_reader<R: Read + Seek>(mut reader: R) -> ExecutableKind {
    match read_subsystem(&mut reader) {
        Ok(Some(SUBSYSTEM_CONSOLE)) => ExecutableKind::Console,
        Ok(Some(subsystem)) => {
            debug!(subsystem, "non-console PE subsystem");
            ExecutableKind::Interactive
        }
        Ok(None) => {
            debug!("not a PE image");
            ExecutableKind::Interactive
        }
        Err(e) => {
            debug!(error = %e, "PE header unreadable");
            ExecutableKind::Interactive
        }
    }
}

pub fn has_script_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            SCRIPT_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// `Ok(None)` when a signature does not match, `Err` on short reads.
fn read_subsystem<R: Read + Seek>(reader: &mut R) -> io::Result<Option<u16>> {
    let mut dos_header = [0u8; DOS_HEADER_LEN];
    reader.read_exact(&mut dos_header)?;
    if &dos_header[..2] != DOS_MAGIC {
        return Ok(None);
    }

    let pe_offset = u32::from_le_bytes([
        dos_header[PE_POINTER_OFFSET],
        dos_header[PE_POINTER_OFFSET + 1],
        dos_header[PE_POINTER_OFFSET + 2],
        dos_header[PE_POINTER_OFFSET + 3],
    ]);
    reader.seek(SeekFrom::Start(u64::from(pe_offset)))?;

    let mut signature = [0u8; 4];
    reader.read_exact(&mut signature)?;
    if &signature != PE_SIGNATURE {
        return Ok(None);
    }

    reader.seek(SeekFrom::Current(COFF_HEADER_LEN))?;
    reader.seek(SeekFrom::Current(SUBSYSTEM_OFFSET))?;

    let mut subsystem = [0u8; 2];
    reader.read_exact(&mut subsystem)?;
    Ok(Some(u16::from_le_bytes(subsystem)))
}

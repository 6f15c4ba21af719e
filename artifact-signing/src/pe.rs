// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Portable executable detection. */

use {
    log::debug,
    std::{
        io::{Read, Seek, SeekFrom},
        path::Path,
    },
};

/// Offset of the `e_lfanew` field in the DOS header.
const PE_POINTER_OFFSET: usize = 0x3c;

/// Test whether a given filesystem path is a portable executable image.
///
/// Classification reads the leading bytes: the DOS `MZ` stub, the
/// pointer at offset 0x3c, and the `PE\0\0` signature it points at. The
/// file extension is never consulted. Files that cannot be opened or
/// read are treated as not-PE.
pub fn path_is_pe(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();

    match read_pe_signature(path) {
        Ok(is_pe) => is_pe,
        Err(e) => {
            debug!("unable to probe {}: {}", path.display(), e);
            false
        }
    }
}

fn read_pe_signature(path: &Path) -> std::io::Result<bool> {
    let mut fh = std::fs::File::open(path)?;

    let mut dos_header = [0u8; 0x40];
    let count = fh.read(&mut dos_header)?;
    if count < dos_header.len() {
        return Ok(false);
    }

    if dos_header[0] != b'M' || dos_header[1] != b'Z' {
        return Ok(false);
    }

    let pe_offset = u32::from_le_bytes([
        dos_header[PE_POINTER_OFFSET],
        dos_header[PE_POINTER_OFFSET + 1],
        dos_header[PE_POINTER_OFFSET + 2],
        dos_header[PE_POINTER_OFFSET + 3],
    ]);

    fh.seek(SeekFrom::Start(pe_offset as u64))?;

    let mut signature = [0u8; 4];
    let count = fh.read(&mut signature)?;

    Ok(count == signature.len() && signature == *b"PE\0\0")
}

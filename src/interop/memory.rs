//! Bounded reads and string decoding over guest linear memory.
//!
//! Every helper asks the memory for its size right before touching it.
//! Guests can grow their memory at any host call, so a size cached
//! earlier in the call is never trusted.

use crate::error::{Result, SandboxError};
use crate::runtime::{check_range, LinearMemory};
use serde::{Deserialize, Serialize};

/// Longest NUL-terminated string the C decoder scans for.
pub const MAX_C_STRING: usize = 64 * 1024;

/// Converts a guest pointer or length to `usize`, rejecting negatives.
///
/// # Errors
///
/// Returns an invalid argument error for negative values.
pub fn guest_usize(value: i32, argument: &str) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| SandboxError::invalid_argument(argument, format!("{value} is negative")))
}

/// Copies `len` bytes at `ptr` out of guest memory.
///
/// # Errors
///
/// Returns an invalid argument error for negative inputs and an out of
/// bounds error when the range does not fit the current memory.
pub fn read_guest_bytes(memory: &dyn LinearMemory, ptr: i32, len: i32) -> Result<Vec<u8>> {
    let offset = guest_usize(ptr, "ptr")?;
    let len = guest_usize(len, "len")?;
    check_range(offset, len, memory.size())?;
    let mut buf = vec![0; len];
    memory.read(offset, &mut buf)?;
    Ok(buf)
}

/// Copies `data` into guest memory at `ptr`.
///
/// # Errors
///
/// Same as [`read_guest_bytes`].
pub fn write_guest_bytes(memory: &dyn LinearMemory, ptr: i32, data: &[u8]) -> Result<()> {
    let offset = guest_usize(ptr, "ptr")?;
    check_range(offset, data.len(), memory.size())?;
    memory.write(offset, data)
}

/// How guest strings are laid out in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StringDecoder {
    /// UTF-16LE code units; the byte length is the `u32` stored at `ptr - 4`.
    #[default]
    #[serde(rename = "assemblyscript")]
    AssemblyScript,
    /// NUL-terminated UTF-8.
    #[serde(rename = "c_string")]
    CString,
}

impl StringDecoder {
    /// Decodes the string at `ptr`.
    ///
    /// # Errors
    ///
    /// Returns an out of bounds error if the string runs past the end of
    /// memory and an invalid argument error if it is not valid text.
    pub fn decode(&self, memory: &dyn LinearMemory, ptr: i32) -> Result<String> {
        match self {
            Self::AssemblyScript => decode_assemblyscript(memory, ptr),
            Self::CString => decode_c_string(memory, ptr),
        }
    }
}

fn decode_assemblyscript(memory: &dyn LinearMemory, ptr: i32) -> Result<String> {
    let offset = guest_usize(ptr, "ptr")?;
    let header = offset
        .checked_sub(4)
        .ok_or_else(|| SandboxError::invalid_argument("ptr", "string pointer has no length header"))?;

    let mut len_bytes = [0u8; 4];
    check_range(header, 4, memory.size())?;
    memory.read(header, &mut len_bytes)?;
    let byte_len = u32::from_le_bytes(len_bytes) as usize;
    if byte_len % 2 != 0 {
        return Err(SandboxError::invalid_argument(
            "string",
            format!("UTF-16 byte length {byte_len} is odd"),
        ));
    }

    check_range(offset, byte_len, memory.size())?;
    let mut raw = vec![0u8; byte_len];
    memory.read(offset, &mut raw)?;

    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units)
        .map_err(|e| SandboxError::invalid_argument("string", "invalid UTF-16").with_source(e))
}

fn decode_c_string(memory: &dyn LinearMemory, ptr: i32) -> Result<String> {
    let offset = guest_usize(ptr, "ptr")?;
    let size = memory.size();
    check_range(offset, 0, size)?;

    let window = (size - offset).min(MAX_C_STRING + 1);
    let mut raw = vec![0u8; window];
    memory.read(offset, &mut raw)?;

    let Some(end) = raw.iter().position(|b| *b == 0) else {
        return Err(if window > MAX_C_STRING {
            SandboxError::invalid_argument("string", format!("longer than {MAX_C_STRING} bytes"))
        } else {
            SandboxError::out_of_bounds(offset as u64, window as u64 + 1, size as u64)
        });
    };
    raw.truncate(end);
    String::from_utf8(raw)
        .map_err(|e| SandboxError::invalid_argument("string", "invalid UTF-8").with_source(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::StubMemory;

    fn memory_with(offset: usize, data: &[u8]) -> StubMemory {
        let memory = StubMemory::new(1);
        memory.write(offset, data).unwrap();
        memory
    }

    #[test]
    fn read_guest_bytes_within_bounds() {
        let memory = memory_with(100, b"abc");
        assert_eq!(read_guest_bytes(&memory, 100, 3).unwrap(), b"abc");
    }

    #[test]
    fn read_claiming_length_past_memory_fails() {
        let memory = StubMemory::new(1);
        let err = read_guest_bytes(&memory, 16, 70_000).unwrap_err();
        assert!(err.is_out_of_bounds());
    }

    #[test]
    fn read_sees_grown_memory() {
        let memory = StubMemory::new(1);
        assert!(read_guest_bytes(&memory, 65_000, 1_000).is_err());
        memory.grow(1);
        assert!(read_guest_bytes(&memory, 65_000, 1_000).is_ok());
    }

    #[test]
    fn negative_pointer_is_invalid_argument() {
        let memory = StubMemory::new(1);
        assert!(read_guest_bytes(&memory, -1, 4).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn decodes_assemblyscript_string() {
        let mut block = 8u32.to_le_bytes().to_vec();
        block.extend("lock".encode_utf16().flat_map(u16::to_le_bytes));
        let memory = memory_with(60, &block);
        let s = StringDecoder::AssemblyScript.decode(&memory, 64).unwrap();
        assert_eq!(s, "lock");
    }

    #[test]
    fn assemblyscript_length_past_memory_fails() {
        let memory = memory_with(60, &0x0010_0000u32.to_le_bytes());
        let err = StringDecoder::AssemblyScript.decode(&memory, 64).unwrap_err();
        assert!(err.is_out_of_bounds());
    }

    #[test]
    fn assemblyscript_pointer_without_header_fails() {
        let memory = StubMemory::new(1);
        assert!(StringDecoder::AssemblyScript.decode(&memory, 2).is_err());
    }

    #[test]
    fn decodes_c_string() {
        let memory = memory_with(32, b"scope-a\0junk");
        assert_eq!(StringDecoder::CString.decode(&memory, 32).unwrap(), "scope-a");
    }

    #[test]
    fn unterminated_c_string_at_end_of_memory_fails() {
        let memory = memory_with(65_532, b"abcd");
        let err = StringDecoder::CString.decode(&memory, 65_532).unwrap_err();
        assert!(err.is_out_of_bounds());
    }

    #[test]
    fn decoder_names_in_config() {
        #[derive(Deserialize)]
        struct Wrapper {
            decoder: StringDecoder,
        }
        let w: Wrapper = toml::from_str("decoder = \"c_string\"").unwrap();
        assert_eq!(w.decoder, StringDecoder::CString);
        let w: Wrapper = toml::from_str("decoder = \"assemblyscript\"").unwrap();
        assert_eq!(w.decoder, StringDecoder::AssemblyScript);
    }
}

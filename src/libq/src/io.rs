use std::io::{self, Read, Write};
use std::os::unix::io::RawFd;

pub const STDIN_FD: RawFd = 0;
pub const STDOUT_FD: RawFd = 1;
pub const STDERR_FD: RawFd = 2;

pub const DEV_NULL: &str = "/dev/null";

/// The byte order used when reading or writing fixed size integers
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Endianness {
    Little,
    Big,
}

/// Reads exactly four bytes from `reader` and interprets them as a u32 in the given byte order
pub fn read_u32<T: Read>(reader: &mut T, endianness: &Endianness) -> Result<u32, io::Error> {
    let mut buffer = [0; 4];
    reader.read_exact(&mut buffer)?;
    return Ok(match endianness {
        Endianness::Little => u32::from_le_bytes(buffer),
        Endianness::Big => u32::from_be_bytes(buffer),
    });
}

/// Writes `value` to `writer` as four bytes in the given byte order
pub fn write_u32<T: Write>(writer: &mut T, value: u32, endianness: &Endianness) -> Result<(), io::Error> {
    let bytes = match endianness {
        Endianness::Little => value.to_le_bytes(),
        Endianness::Big => value.to_be_bytes(),
    };

    return writer.write_all(&bytes);
}

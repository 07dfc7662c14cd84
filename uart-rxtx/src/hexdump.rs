//! Hex dump in the layout of ESP-IDF's `ESP_LOG_BUFFER_HEXDUMP`
//!
//! ```text
//! 0x20001f40   48 65 6c 6c 6f 20 4d 61  68 65 6e 64 65 72 0d 0a  |Hello Mahender..|
//! ```

use core::{fmt, slice::Chunks};

/// Bytes per line
pub const BYTES_PER_LINE: usize = 16;

/// One line of a hex dump
pub struct Line<'a> {
    address: usize,
    bytes: &'a [u8],
}

impl fmt::Display for Line<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x} ", self.address)?;

        for i in 0..BYTES_PER_LINE {
            if i % 8 == 0 {
                f.write_str(" ")?;
            }

            match self.bytes.get(i) {
                Some(byte) => write!(f, " {:02x}", byte)?,
                None => f.write_str("   ")?,
            }
        }

        f.write_str("  |")?;
        for &byte in self.bytes {
            let c = if byte.is_ascii_graphic() || byte == b' ' {
                char::from(byte)
            } else {
                '.'
            };
            write!(f, "{}", c)?;
        }
        f.write_str("|")
    }
}

/// Iterator over the lines of a hex dump
pub struct Lines<'a> {
    address: usize,
    chunks: Chunks<'a, u8>,
}

impl<'a> Iterator for Lines<'a> {
    type Item = Line<'a>;

    fn next(&mut self) -> Option<Line<'a>> {
        let bytes = self.chunks.next()?;
        let line = Line {
            address: self.address,
            bytes,
        };
        self.address = self.address.wrapping_add(BYTES_PER_LINE);
        Some(line)
    }
}

/// Dumps `bytes`, labelling the first line with `address`
pub fn lines(address: usize, bytes: &[u8]) -> Lines<'_> {
    Lines {
        address,
        chunks: bytes.chunks(BYTES_PER_LINE),
    }
}

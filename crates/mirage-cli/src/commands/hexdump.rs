//! Hexdump command implementation.
//!
//! Displays raw memory bytes in traditional hexdump format, useful for
//! checking record layouts against a live target.
//!
//! # Output Format
//!
//! ```text
//! 0x000: 48 65 6C 6C 6F 20 57 6F  72 6C 64 00 00 00 00 00  |Hello World.....|
//! ```

use anyhow::Result;
use mirage_core::{Address, Config, MemoryReader, ReadMemory};

use super::ProcessSelector;

/// Run the hexdump command
pub fn run(
    config: &Config,
    selector: &ProcessSelector,
    address: u64,
    size: usize,
    ascii: bool,
) -> Result<()> {
    let process = selector.open()?;
    let reader = MemoryReader::with_window(process, config.memory.window());
    let bytes = reader.read_bytes(Address::new(address), size)?;

    println!("Hexdump at 0x{:X} ({} bytes):", address, size);
    println!();
    for line in format_lines(&bytes, ascii) {
        println!("{}", line);
    }

    Ok(())
}

fn format_lines(bytes: &[u8], ascii: bool) -> Vec<String> {
    bytes
        .chunks(16)
        .enumerate()
        .map(|(i, chunk)| format_line(i * 16, chunk, ascii))
        .collect()
}

fn format_line(offset: usize, chunk: &[u8], ascii: bool) -> String {
    let mut line = format!("0x{:03X}: ", offset);

    for j in 0..16 {
        if j == 8 {
            line.push(' ');
        }
        match chunk.get(j) {
            Some(byte) => line.push_str(&format!("{:02X} ", byte)),
            None => line.push_str("   "),
        }
    }

    if ascii {
        line.push_str(" |");
        for byte in chunk {
            if (0x20..0x7F).contains(byte) {
                line.push(*byte as char);
            } else {
                line.push('.');
            }
        }
        for _ in chunk.len()..16 {
            line.push(' ');
        }
        line.push('|');
    }

    line
}

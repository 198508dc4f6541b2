use log::warn;

use crate::nom_parser::TERMINATOR;

// Commands are short, anything longer than this without a terminator is line noise.
const MAX_LEN: usize = 64;

/// Receive buffer collecting bus bytes until a complete command is available.
#[derive(Debug)]
pub(crate) struct Buffer {
    data: Vec<u8>,
    read_pos: usize,
}

impl Buffer {
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(MAX_LEN),
            read_pos: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len() - self.read_pos
    }

    pub fn consume(&mut self, len: usize) {
        assert!(len <= self.len());
        self.read_pos += len;
    }

    pub fn write(&mut self, bytes: &[u8]) {
        if self.read_pos == self.data.len() {
            self.clear();
        }
        let write_pos = self.data.len();
        self.data.extend_from_slice(bytes);
        for byte in self.data[write_pos..].iter_mut() {
            if *byte > 0x7f {
                *byte = 0; // map all non-ASCII bytes to NUL
            }
        }
        let tail = self.tail_start();
        let tail_len = self.data.len() - tail;
        if tail_len > MAX_LEN {
            // keep the newest bytes, a terminator may still follow them
            let excess = tail_len - MAX_LEN;
            warn!("Receive buffer overflow, dropping {} bytes", excess);
            self.data.drain(tail..tail + excess);
        }
    }

    /// Drop the unterminated bytes after the last complete frame. Returns the number
    /// of bytes dropped.
    pub fn discard_partial(&mut self) -> usize {
        let tail = self.tail_start();
        let dropped = self.data.len() - tail;
        self.data.truncate(tail);
        dropped
    }

    // Start of the bytes following the last terminator.
    fn tail_start(&self) -> usize {
        self.as_ref()
            .iter()
            .rposition(|&b| b == TERMINATOR)
            .map_or(self.read_pos, |pos| self.read_pos + pos + 1)
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.read_pos = 0;
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        &self.data[self.read_pos..]
    }
}

//! Fixed-capacity, always NUL-terminated page buffer.

use std::fmt;
use std::io::{self, Read};

/// Byte buffer that never grows past the capacity it was allocated with.
///
/// One byte is always reserved for the terminator, so at most
/// `capacity - 1` bytes of content are held. Appends that do not fit are
/// cut short and flag the buffer as truncated.
pub struct RenderBuffer {
    data: Box<[u8]>,
    len: usize,
    truncated: bool,
}

impl RenderBuffer {
    /// Allocates without aborting on out-of-memory.
    pub fn try_with_capacity(capacity: usize) -> anyhow::Result<Self> {
        if capacity == 0 {
            anyhow::bail!("render buffer needs room for the terminator");
        }
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|e| anyhow::anyhow!("render buffer allocation of {} bytes failed: {}", capacity, e))?;
        data.resize(capacity, 0);
        Ok(Self {
            data: data.into_boxed_slice(),
            len: 0,
            truncated: false,
        })
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Free content bytes left, terminator excluded.
    pub fn remaining(&self) -> usize {
        self.capacity() - 1 - self.len
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Content followed by its terminator.
    pub fn as_bytes_with_nul(&self) -> &[u8] {
        &self.data[..=self.len]
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.truncated = false;
        self.terminate();
    }

    /// Appends as much of `bytes` as fits and returns how many were taken.
    pub fn extend_truncating(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.remaining());
        self.data[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.len += n;
        if n < bytes.len() {
            self.truncated = true;
        }
        self.terminate();
        n
    }

    /// Reads `reader` to end of file into the free space.
    ///
    /// Content past the capacity is drained and discarded.
    pub fn fill_from<R: Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        let mut taken = 0;
        loop {
            let end = self.capacity() - 1;
            if self.len == end {
                break;
            }
            match reader.read(&mut self.data[self.len..end]) {
                Ok(0) => {
                    self.terminate();
                    return Ok(taken);
                }
                Ok(n) => {
                    self.len += n;
                    taken += n;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.terminate();
                    return Err(e);
                }
            }
        }

        let mut scratch = [0u8; 64];
        loop {
            match reader.read(&mut scratch) {
                Ok(0) => break,
                Ok(_) => self.truncated = true,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.terminate();
                    return Err(e);
                }
            }
        }
        self.terminate();
        Ok(taken)
    }

    /// Target of `write!`, which therefore cannot fail here.
    ///
    /// A `Display` impl reporting an error marks the page truncated.
    pub fn write_fmt(&mut self, args: fmt::Arguments<'_>) {
        if fmt::Write::write_fmt(self, args).is_err() {
            self.truncated = true;
        }
    }

    fn terminate(&mut self) {
        self.data[self.len] = 0;
        let last = self.data.len() - 1;
        self.data[last] = 0;
    }
}

/// Text is cut at a character boundary once the buffer is full.
impl fmt::Write for RenderBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.remaining();
        if s.len() <= room {
            self.extend_truncating(s.as_bytes());
        } else {
            let mut cut = room;
            while !s.is_char_boundary(cut) {
                cut -= 1;
            }
            self.extend_truncating(&s.as_bytes()[..cut]);
            self.truncated = true;
        }
        Ok(())
    }
}

impl fmt::Debug for RenderBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RenderBuffer {{ {} of {} bytes, truncated: {} }}",
            self.len,
            self.capacity(),
            self.truncated
        )
    }
}

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::CHUNK_SIZE_BYTES;

/// The async counterpart of [`crate::BoundedLine`]; kept as a separate type
/// so the sync reader has no tokio dependency even with the `tokio` feature
/// enabled elsewhere in the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsyncBoundedLineResult {
    Line {
        line_number: usize,
        bytes: Vec<u8>,
    },
    LineTooLong {
        line_number: usize,
        observed_bytes: usize,
        max_line_bytes: usize,
    },
    IoError {
        line_number: usize,
    },
    Eof,
}

/// Reads newline-terminated lines from an [`AsyncRead`] with the same
/// bounded-memory discard behavior as [`crate::SyncBoundedLineReader`].
///
/// Used for both the control socket (where a line is a protocol reply) and
/// the tor process's stdout/stderr pipes (where a line is a log message).
pub struct AsyncBoundedLineReader<R: AsyncRead + Unpin> {
    inner: R,
    max_line_bytes: usize,
    chunk: Vec<u8>,
    chunk_pos: usize,
    chunk_len: usize,
    line_number: usize,
    current: Vec<u8>,
    discarding: bool,
    discarded_bytes: usize,
    eof: bool,
}

impl<R: AsyncRead + Unpin> AsyncBoundedLineReader<R> {
    pub fn new(inner: R, max_line_bytes: usize) -> Self {
        Self {
            inner,
            max_line_bytes,
            chunk: vec![0u8; CHUNK_SIZE_BYTES],
            chunk_pos: 0,
            chunk_len: 0,
            line_number: 0,
            current: Vec::new(),
            discarding: false,
            discarded_bytes: 0,
            eof: false,
        }
    }

    async fn fill_chunk(&mut self) -> std::io::Result<bool> {
        self.chunk_pos = 0;
        self.chunk_len = self.inner.read(&mut self.chunk).await?;
        Ok(self.chunk_len > 0)
    }

    async fn next_byte(&mut self) -> std::io::Result<Option<u8>> {
        if self.chunk_pos >= self.chunk_len {
            if self.eof {
                return Ok(None);
            }
            if !self.fill_chunk().await? {
                self.eof = true;
                return Ok(None);
            }
        }
        let b = self.chunk[self.chunk_pos];
        self.chunk_pos += 1;
        Ok(Some(b))
    }

    fn push_byte(&mut self, b: u8) {
        if self.discarding {
            self.discarded_bytes += 1;
            return;
        }
        if self.current.len() >= self.max_line_bytes {
            self.discarding = true;
            self.discarded_bytes = self.current.len() + 1;
            self.current.clear();
            return;
        }
        self.current.push(b);
    }

    fn take_line(&mut self) -> AsyncBoundedLineResult {
        self.line_number += 1;
        if self.discarding {
            let observed_bytes = self.discarded_bytes;
            self.discarding = false;
            self.discarded_bytes = 0;
            self.current.clear();
            return AsyncBoundedLineResult::LineTooLong {
                line_number: self.line_number,
                observed_bytes,
                max_line_bytes: self.max_line_bytes,
            };
        }
        let mut bytes = std::mem::take(&mut self.current);
        if bytes.last() == Some(&b'\n') {
            bytes.pop();
            if bytes.last() == Some(&b'\r') {
                bytes.pop();
            }
        }
        AsyncBoundedLineResult::Line {
            line_number: self.line_number,
            bytes,
        }
    }

    /// Reads the next line, returning `Eof` once the stream and any trailing
    /// partial state have been fully drained.
    pub async fn next_line(&mut self) -> AsyncBoundedLineResult {
        loop {
            match self.next_byte().await {
                Ok(Some(b)) => {
                    self.push_byte(b);
                    if b == b'\n' {
                        return self.take_line();
                    }
                }
                Ok(None) => {
                    if !self.current.is_empty() || self.discarding {
                        return self.take_line();
                    }
                    return AsyncBoundedLineResult::Eof;
                }
                Err(_) => {
                    self.line_number += 1;
                    self.current.clear();
                    self.discarding = false;
                    self.eof = true;
                    return AsyncBoundedLineResult::IoError {
                        line_number: self.line_number,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn short_lines_round_trip() {
        let input: &[u8] = b"one\r\ntwo\nthree";
        let mut reader = AsyncBoundedLineReader::new(input, 1024);
        assert_eq!(
            reader.next_line().await,
            AsyncBoundedLineResult::Line {
                line_number: 1,
                bytes: b"one".to_vec()
            }
        );
        assert_eq!(
            reader.next_line().await,
            AsyncBoundedLineResult::Line {
                line_number: 2,
                bytes: b"two".to_vec()
            }
        );
        assert_eq!(
            reader.next_line().await,
            AsyncBoundedLineResult::Line {
                line_number: 3,
                bytes: b"three".to_vec()
            }
        );
        assert_eq!(reader.next_line().await, AsyncBoundedLineResult::Eof);
    }

    #[tokio::test]
    async fn oversized_line_is_discarded_and_iteration_continues() {
        let mut data = vec![b'a'; 20];
        data.push(b'\n');
        data.extend_from_slice(b"ok\n");
        let mut reader = AsyncBoundedLineReader::new(data.as_slice(), 8);
        match reader.next_line().await {
            AsyncBoundedLineResult::LineTooLong {
                line_number,
                observed_bytes,
                max_line_bytes,
            } => {
                assert_eq!(line_number, 1);
                assert_eq!(max_line_bytes, 8);
                assert!(observed_bytes > max_line_bytes);
            }
            other => panic!("expected LineTooLong, got {other:?}"),
        }
        assert_eq!(
            reader.next_line().await,
            AsyncBoundedLineResult::Line {
                line_number: 2,
                bytes: b"ok".to_vec()
            }
        );
        assert_eq!(reader.next_line().await, AsyncBoundedLineResult::Eof);
    }
}

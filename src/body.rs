use std::io::{self, Read, Seek, SeekFrom};

use bytes::Bytes;

/// Readers that can be rewound to a remembered position.
pub trait SeekableRead: Read + Seek + Send {}

impl<T: Read + Seek + Send> SeekableRead for T {}

/// Request payload with replay support for retries.
///
/// In-memory and seekable bodies are marked once before the first attempt and
/// always rewind to that position. Buffered streams keep up to `read_limit`
/// bytes after their mark so they can be replayed; they are re-marked at the
/// start of every attempt. Plain streams cannot be replayed and disable retry
/// for the call.
pub struct RequestBody {
    kind: BodyKind,
}

enum BodyKind {
    Empty,
    Bytes {
        data: Bytes,
        position: usize,
        mark: usize,
    },
    Seekable {
        reader: Box<dyn SeekableRead>,
        mark: u64,
    },
    Buffered {
        reader: Box<dyn Read + Send>,
        replay: Vec<u8>,
        position: usize,
        read_limit: usize,
        mark_valid: bool,
    },
    Stream(Box<dyn Read + Send>),
}

impl RequestBody {
    pub fn empty() -> Self {
        Self {
            kind: BodyKind::Empty,
        }
    }

    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Self {
            kind: BodyKind::Bytes {
                data: data.into(),
                position: 0,
                mark: 0,
            },
        }
    }

    pub fn seekable(reader: impl SeekableRead + 'static) -> Self {
        Self {
            kind: BodyKind::Seekable {
                reader: Box::new(reader),
                mark: 0,
            },
        }
    }

    pub fn buffered_stream(reader: impl Read + Send + 'static, read_limit: usize) -> Self {
        Self {
            kind: BodyKind::Buffered {
                reader: Box::new(reader),
                replay: Vec::new(),
                position: 0,
                read_limit,
                mark_valid: false,
            },
        }
    }

    pub fn stream(reader: impl Read + Send + 'static) -> Self {
        Self {
            kind: BodyKind::Stream(Box::new(reader)),
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.kind {
            BodyKind::Empty => true,
            BodyKind::Bytes { data, .. } => data.is_empty(),
            _ => false,
        }
    }

    /// Whether the body can be sent again after a failed attempt.
    pub fn is_repeatable(&self) -> bool {
        !matches!(self.kind, BodyKind::Stream(_))
    }

    pub(crate) fn remarks_every_attempt(&self) -> bool {
        matches!(self.kind, BodyKind::Buffered { .. })
    }

    /// Known length of the remaining in-memory payload.
    pub fn content_length(&self) -> Option<u64> {
        match &self.kind {
            BodyKind::Empty => Some(0),
            BodyKind::Bytes { data, position, .. } => {
                Some(data.len().saturating_sub(*position) as u64)
            }
            _ => None,
        }
    }

    pub(crate) fn mark(&mut self) -> io::Result<()> {
        match &mut self.kind {
            BodyKind::Empty | BodyKind::Stream(_) => Ok(()),
            BodyKind::Bytes { position, mark, .. } => {
                *mark = *position;
                Ok(())
            }
            BodyKind::Seekable { reader, mark } => {
                *mark = reader.stream_position()?;
                Ok(())
            }
            BodyKind::Buffered {
                replay,
                position,
                mark_valid,
                ..
            } => {
                replay.drain(..*position);
                *position = 0;
                *mark_valid = true;
                Ok(())
            }
        }
    }

    pub(crate) fn reset(&mut self) -> io::Result<()> {
        match &mut self.kind {
            BodyKind::Empty | BodyKind::Stream(_) => Ok(()),
            BodyKind::Bytes { position, mark, .. } => {
                *position = *mark;
                Ok(())
            }
            BodyKind::Seekable { reader, mark } => {
                reader.seek(SeekFrom::Start(*mark))?;
                Ok(())
            }
            BodyKind::Buffered {
                position,
                mark_valid,
                read_limit,
                ..
            } => {
                if !*mark_valid {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("resetting to invalid mark: more than {read_limit} bytes were read"),
                    ));
                }
                *position = 0;
                Ok(())
            }
        }
    }

    /// Reads the rest of the payload from the current position.
    pub fn read_remaining(&mut self) -> io::Result<Bytes> {
        if let BodyKind::Bytes { data, position, .. } = &mut self.kind {
            let remaining = data.slice(*position..);
            *position = data.len();
            return Ok(remaining);
        }
        let mut collected = Vec::new();
        self.read_to_end(&mut collected)?;
        Ok(Bytes::from(collected))
    }
}

impl Default for RequestBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            BodyKind::Empty => "empty",
            BodyKind::Bytes { .. } => "bytes",
            BodyKind::Seekable { .. } => "seekable",
            BodyKind::Buffered { .. } => "buffered_stream",
            BodyKind::Stream(_) => "stream",
        };
        formatter
            .debug_struct("RequestBody")
            .field("kind", &kind)
            .field("content_length", &self.content_length())
            .finish()
    }
}

impl From<Bytes> for RequestBody {
    fn from(data: Bytes) -> Self {
        Self::bytes(data)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(data: Vec<u8>) -> Self {
        Self::bytes(data)
    }
}

impl From<String> for RequestBody {
    fn from(data: String) -> Self {
        Self::bytes(data)
    }
}

impl From<&'static str> for RequestBody {
    fn from(data: &'static str) -> Self {
        Self::bytes(Bytes::from_static(data.as_bytes()))
    }
}

impl Read for RequestBody {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        match &mut self.kind {
            BodyKind::Empty => Ok(0),
            BodyKind::Bytes { data, position, .. } => {
                let remaining = &data[*position..];
                let read = remaining.len().min(buffer.len());
                buffer[..read].copy_from_slice(&remaining[..read]);
                *position += read;
                Ok(read)
            }
            BodyKind::Seekable { reader, .. } => reader.read(buffer),
            BodyKind::Buffered {
                reader,
                replay,
                position,
                read_limit,
                mark_valid,
            } => {
                if *position < replay.len() {
                    let available = &replay[*position..];
                    let read = available.len().min(buffer.len());
                    buffer[..read].copy_from_slice(&available[..read]);
                    *position += read;
                    return Ok(read);
                }

                let read = reader.read(buffer)?;
                if *mark_valid {
                    if replay.len() + read > *read_limit {
                        *mark_valid = false;
                        replay.clear();
                        *position = 0;
                    } else {
                        replay.extend_from_slice(&buffer[..read]);
                        *position = replay.len();
                    }
                }
                Ok(read)
            }
            BodyKind::Stream(reader) => reader.read(buffer),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};

    use super::RequestBody;

    fn drain(body: &mut RequestBody) -> Vec<u8> {
        let mut collected = Vec::new();
        body.read_to_end(&mut collected).expect("body should read");
        collected
    }

    #[test]
    fn bytes_body_replays_from_mark() {
        let mut body = RequestBody::from("payload");
        body.mark().expect("mark should succeed");
        assert_eq!(drain(&mut body), b"payload");
        body.reset().expect("reset should succeed");
        assert_eq!(drain(&mut body), b"payload");
        assert!(body.is_repeatable());
    }

    #[test]
    fn seekable_body_rewinds_to_marked_position() {
        let mut cursor = Cursor::new(b"headerpayload".to_vec());
        cursor.set_position(6);
        let mut body = RequestBody::seekable(cursor);
        body.mark().expect("mark should succeed");
        assert_eq!(drain(&mut body), b"payload");
        body.reset().expect("reset should succeed");
        assert_eq!(drain(&mut body), b"payload");
    }

    #[test]
    fn buffered_stream_replays_within_read_limit() {
        let mut body = RequestBody::buffered_stream(Cursor::new(b"abcdef".to_vec()), 16);
        body.mark().expect("mark should succeed");
        assert_eq!(drain(&mut body), b"abcdef");
        body.reset().expect("reset should succeed");
        body.mark().expect("re-mark should succeed");
        assert_eq!(drain(&mut body), b"abcdef");
    }

    #[test]
    fn buffered_stream_refuses_reset_past_read_limit() {
        let mut body = RequestBody::buffered_stream(Cursor::new(vec![7_u8; 64]), 8);
        body.mark().expect("mark should succeed");
        assert_eq!(drain(&mut body).len(), 64);
        let error = body.reset().expect_err("reset past read limit should fail");
        assert_eq!(error.kind(), std::io::ErrorKind::InvalidInput);
    }

    #[test]
    fn plain_stream_is_not_repeatable() {
        let body = RequestBody::stream(Cursor::new(b"once".to_vec()));
        assert!(!body.is_repeatable());
        assert_eq!(body.content_length(), None);
    }
}

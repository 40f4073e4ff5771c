//! Bounded capture of a child's output stream.

use tokio::io::{AsyncRead, AsyncReadExt};

const CHUNK_SIZE: usize = 8 * 1024;

/// Bytes read from one stream, cut at the ceiling.
#[derive(Debug, Default)]
pub struct CapturedStream {
    pub bytes: Vec<u8>,
    /// The stream produced more than the ceiling
    pub truncated: bool,
}

impl CapturedStream {
    /// Lossy UTF-8. When truncated, a partial trailing character is dropped
    /// so the text never exceeds the ceiling.
    pub fn into_string(self) -> String {
        let mut bytes = self.bytes;
        if self.truncated {
            let valid = match std::str::from_utf8(&bytes) {
                Ok(_) => bytes.len(),
                Err(e) if e.error_len().is_none() => e.valid_up_to(),
                Err(_) => bytes.len(),
            };
            bytes.truncate(valid);
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Read until EOF or until more than `limit` bytes arrive.
///
/// Returns as soon as the limit is crossed so the caller can stop the
/// producer; the stream is not drained further.
pub async fn capture_bounded<R>(mut reader: R, limit: usize) -> std::io::Result<CapturedStream>
where
    R: AsyncRead + Unpin,
{
    let mut captured = CapturedStream::default();
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(captured);
        }
        let room = limit - captured.bytes.len();
        if n > room {
            captured.bytes.extend_from_slice(&buf[..room]);
            captured.truncated = true;
            return Ok(captured);
        }
        captured.bytes.extend_from_slice(&buf[..n]);
    }
}

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{ELEM_SIZE, LEN_TYPE_SIZE, LenType, MAX_FRAME_LEN};

/// The receiving end handle of the communication.
#[derive(Debug)]
pub struct OnoReceiver<R: AsyncRead + Unpin> {
    rx: R,
}

impl<R: AsyncRead + Unpin> OnoReceiver<R> {
    /// Creates a new `OnoReceiver` instance.
    ///
    /// # Arguments
    /// * `rx` - The underlying reader.
    pub(super) fn new(rx: R) -> Self {
        Self { rx }
    }

    /// Waits to receive the single frame of this channel.
    ///
    /// Blocks until the declared amount of elements has arrived. If the writer
    /// goes away before that, the call fails with `UnexpectedEof` instead of
    /// returning a truncated vector.
    ///
    /// # Returns
    /// A result object that returns the vector on success or `io::Error` on failure.
    pub async fn recv(mut self) -> io::Result<Vec<f64>> {
        let mut size_buf = [0; LEN_TYPE_SIZE];
        self.rx.read_exact(&mut size_buf).await?;
        let len = LenType::from_be_bytes(size_buf);

        let len = usize::try_from(len)
            .ok()
            .filter(|len| *len <= MAX_FRAME_LEN)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("declared frame length {len} exceeds {MAX_FRAME_LEN}"),
                )
            })?;

        let mut body = vec![0; len * ELEM_SIZE];
        self.rx.read_exact(&mut body).await?;

        let values = body
            .chunks_exact(ELEM_SIZE)
            .map(|chunk| {
                let mut bytes = [0; ELEM_SIZE];
                bytes.copy_from_slice(chunk);
                f64::from_be_bytes(bytes)
            })
            .collect();

        Ok(values)
    }
}

//! The implementation of the sending end of the one-shot protocol.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{ELEM_SIZE, LEN_TYPE_SIZE, LenType};

/// The sending end handle of the communication.
#[derive(Debug)]
pub struct OnoSender<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
}

impl<W: AsyncWrite + Unpin> OnoSender<W> {
    /// Creates a new `OnoSender` instance.
    ///
    /// # Arguments
    /// * `tx` - The underlying writer.
    pub(super) fn new(tx: W) -> Self {
        Self { tx }
    }

    /// Sends `values` as the single frame of this channel and closes the write side.
    ///
    /// The whole frame is encoded up front and written with one `write_all`, so
    /// the receiver never observes a header without its elements unless the
    /// underlying stream fails mid-way.
    ///
    /// # Arguments
    /// * `values` - The vector to deliver.
    ///
    /// # Returns
    /// A result object that returns `io::Error` on failure.
    pub async fn send(mut self, values: &[f64]) -> io::Result<()> {
        let mut buf = Vec::with_capacity(LEN_TYPE_SIZE + values.len() * ELEM_SIZE);
        buf.extend_from_slice(&(values.len() as LenType).to_be_bytes());
        for value in values {
            buf.extend_from_slice(&value.to_be_bytes());
        }

        self.tx.write_all(&buf).await?;
        self.tx.flush().await?;
        self.tx.shutdown().await
    }
}

//! One-shot, length-prefixed transport for numeric vectors.
//!
//! A frame is an unsigned 64 bit big endian element count followed by exactly
//! that many big endian `f64` values. Each channel carries a single frame: the
//! sender is consumed by [`OnoSender::send`] and the receiver by
//! [`OnoReceiver::recv`].

mod receiver;
mod sender;

use tokio::io::{self, AsyncRead, AsyncWrite, DuplexStream};

pub use receiver::OnoReceiver;
pub use sender::OnoSender;

type LenType = u64;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();
const ELEM_SIZE: usize = size_of::<f64>();

/// The largest element count a receiver will accept in a frame header.
pub const MAX_FRAME_LEN: usize = 1 << 24;

/// The in-memory buffer size used by [`one_shot`].
pub const DEFAULT_CAPACITY: usize = 4096;

/// Creates both `OnoReceiver` and `OnoSender` channel parts.
///
/// Given a writer and reader creates and returns both ends of the communication.
///
/// # Arguments
/// * `rx` - An async readable.
/// * `tx` - An async writable.
///
/// # Returns
/// A communication stream in the form of an ono receiver and sender.
pub fn channel<R, W>(rx: R, tx: W) -> (OnoReceiver<R>, OnoSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (OnoReceiver::new(rx), OnoSender::new(tx))
}

/// Creates an in-memory one-shot link using the default buffer size.
///
/// # Returns
/// The producer and consumer ends of a fresh link.
pub fn one_shot() -> (OnoSender<DuplexStream>, OnoReceiver<DuplexStream>) {
    one_shot_with_capacity(DEFAULT_CAPACITY)
}

/// Creates an in-memory one-shot link.
///
/// Frames larger than `capacity` are delivered in fragments, the receiver
/// reassembles them before returning.
///
/// # Arguments
/// * `capacity` - The amount of bytes buffered between both ends.
///
/// # Returns
/// The producer and consumer ends of a fresh link.
pub fn one_shot_with_capacity(capacity: usize) -> (OnoSender<DuplexStream>, OnoReceiver<DuplexStream>) {
    let (producer, consumer) = io::duplex(capacity.max(1));
    (OnoSender::new(producer), OnoReceiver::new(consumer))
}

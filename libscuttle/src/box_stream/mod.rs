//! Box stream: authenticated encryption over a raw byte channel
//!
//! [`codec`] holds the I/O-free frame state machines; [`stream`] wraps them
//! around tokio readers and writers.

pub mod codec;
pub mod stream;

pub use codec::{BoxDecoder, BoxEncoder, Decoded, HEADER_LEN, MAX_FRAME_BODY};
pub use stream::{BoxStream, BoxStreamReader, BoxStreamWriter};

//! Random object contents.

use std::pin::Pin;
use std::{io, task};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tokio::io::{AsyncRead, ReadBuf};

/// Randomized contents of an object.
///
/// The bytes come from a cryptographically secure generator seeded by the operating system, so
/// the storage service cannot compress or deduplicate them. Reading yields exactly `len` bytes,
/// followed by EOF.
#[derive(Debug)]
pub struct Payload {
    /// The number of bytes left to read.
    len: u64,
    /// The RNG used to fill the payload with random bytes.
    rng: StdRng,
}

impl Payload {
    /// Creates a payload of `len` random bytes.
    pub fn random(len: u64) -> Self {
        Self {
            len,
            rng: StdRng::from_os_rng(),
        }
    }
}

impl AsyncRead for Payload {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> task::Poll<io::Result<()>> {
        let len_to_fill = (buf.remaining() as u64).min(self.len) as usize;

        let fill_buf = buf.initialize_unfilled_to(len_to_fill);
        self.rng.fill_bytes(fill_buf);

        self.len -= len_to_fill as u64;
        buf.advance(len_to_fill);

        task::Poll::Ready(Ok(()))
    }
}

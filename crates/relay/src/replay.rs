use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use bytes::BytesMut;
use tokio::io::{AsyncRead, ReadBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Recording,
    Replaying,
}

/// Makes a read-once source readable twice.
///
/// While recording, every byte handed to the caller is also kept in an
/// internal buffer. After [`ReplayBuffer::start_replay`], reads first drain
/// that buffer in the original order and then continue from the underlying
/// source without buffering anything further. There is no second replay.
#[derive(Debug)]
pub struct ReplayBuffer<R> {
    inner: R,
    recorded: BytesMut,
    mode: Mode,
}

impl<R> ReplayBuffer<R> {
    pub fn new(inner: R) -> Self {
        ReplayBuffer {
            inner,
            recorded: BytesMut::new(),
            mode: Mode::Recording,
        }
    }

    /// Switch to replay mode. Calling this more than once has no effect.
    pub fn start_replay(&mut self) {
        if self.mode == Mode::Recording {
            log::debug!("replay buffer: replaying {} recorded bytes", self.recorded.len());
            self.mode = Mode::Replaying;
        }
    }

    pub fn is_replaying(&self) -> bool {
        self.mode == Mode::Replaying
    }

    /// Bytes recorded and not yet replayed
    pub fn buffered_len(&self) -> usize {
        self.recorded.len()
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ReplayBuffer<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        match this.mode {
            Mode::Recording => {
                let before = buf.filled().len();
                ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
                this.recorded.extend_from_slice(&buf.filled()[before..]);
                Poll::Ready(Ok(()))
            }
            Mode::Replaying => {
                if !this.recorded.is_empty() && buf.remaining() > 0 {
                    let n = buf.remaining().min(this.recorded.len());
                    let chunk = this.recorded.split_to(n);
                    buf.put_slice(&chunk);
                    if this.recorded.is_empty() {
                        // Release the allocation, the prefix is never needed again
                        this.recorded = BytesMut::new();
                    }
                    return Poll::Ready(Ok(()));
                }
                Pin::new(&mut this.inner).poll_read(cx, buf)
            }
        }
    }
}

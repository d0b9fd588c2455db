//! Buffering adapters over a raw byte transport: `receive(max_bytes)`,
//! `receive_exactly(n)`, `receive_until(delimiter, max_bytes)`, all built
//! on top of whatever bytes are already sitting in the read-ahead buffer
//! in front of the transport.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;

use crate::error::{Error, Result};

/// A transport that can be polled for more bytes. `receive_raw` is the
/// underlying, unbuffered read: it may return fewer bytes than a caller
/// eventually wants, and an empty result means the peer is done sending.
pub trait ByteReceiveSource {
    fn receive_raw(&self) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + '_>>;
}

/// A transport that can also be written to.
pub trait ByteSendSource: ByteReceiveSource {
    fn send_raw(&self, data: Vec<u8>) -> Pin<Box<dyn Future<Output = Result<()>> + '_>>;
}

/// Wraps any [`ByteReceiveSource`] with a read-ahead buffer, so callers
/// can ask for an exact byte count or a delimiter without caring how the
/// underlying transport chunks its reads.
pub struct BufferedByteReceiveStream<S> {
    pub(crate) source: S,
    buffer: RefCell<VecDeque<u8>>,
}

impl<S: ByteReceiveSource> BufferedByteReceiveStream<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            buffer: RefCell::new(VecDeque::new()),
        }
    }

    /// The bytes already read from the transport but not yet consumed.
    pub fn buffer(&self) -> Vec<u8> {
        self.buffer.borrow().iter().copied().collect()
    }

    fn take(&self, n: usize) -> Vec<u8> {
        self.buffer.borrow_mut().drain(..n).collect()
    }

    /// Reads one more chunk from the transport into the buffer. Returns
    /// `false` at end of stream.
    async fn fill(&self) -> Result<bool> {
        let chunk = self.source.receive_raw().await?;
        if chunk.is_empty() {
            return Ok(false);
        }
        self.buffer.borrow_mut().extend(chunk);
        Ok(true)
    }

    /// Returns up to `max_bytes`, or fewer if that's all that's
    /// available. Raises `EndOfStream` if nothing at all is left.
    pub async fn receive(&self, max_bytes: usize) -> Result<Vec<u8>> {
        if self.buffer.borrow().is_empty() && !self.fill().await? {
            return Err(Error::EndOfStream);
        }
        let n = max_bytes.min(self.buffer.borrow().len());
        Ok(self.take(n))
    }

    /// Returns exactly `n` bytes, reading as many chunks from the
    /// transport as necessary. Raises `EndOfStream` if the transport
    /// runs dry first; any bytes already read stay buffered for the
    /// next call.
    pub async fn receive_exactly(&self, n: usize) -> Result<Vec<u8>> {
        while self.buffer.borrow().len() < n {
            if !self.fill().await? {
                return Err(Error::EndOfStream);
            }
        }
        Ok(self.take(n))
    }

    /// Returns the bytes up to (not including) the first occurrence of
    /// `delimiter`, consuming the delimiter itself. Raises
    /// `DelimiterNotFound(max_bytes)` if it hasn't appeared within
    /// `max_bytes`, `EndOfStream` if the transport runs dry first.
    pub async fn receive_until(&self, delimiter: &[u8], max_bytes: usize) -> Result<Vec<u8>> {
        loop {
            let found = {
                let buf = self.buffer.borrow();
                find_subslice(&buf, delimiter)
            };
            if let Some(pos) = found {
                if pos > max_bytes {
                    return Err(Error::DelimiterNotFound(max_bytes));
                }
                let line = self.take(pos);
                self.buffer.borrow_mut().drain(..delimiter.len());
                return Ok(line);
            }
            if self.buffer.borrow().len() > max_bytes {
                return Err(Error::DelimiterNotFound(max_bytes));
            }
            if !self.fill().await? {
                return Err(Error::EndOfStream);
            }
        }
    }
}

fn find_subslice(haystack: &VecDeque<u8>, needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    let len = haystack.len();
    if needle.len() > len {
        return None;
    }
    'outer: for start in 0..=(len - needle.len()) {
        for (i, &b) in needle.iter().enumerate() {
            if haystack[start + i] != b {
                continue 'outer;
            }
        }
        return Some(start);
    }
    None
}

/// A [`BufferedByteReceiveStream`] over a transport that can also send,
/// forwarding writes straight through to the underlying source.
pub struct BufferedByteStream<S> {
    inner: BufferedByteReceiveStream<S>,
}

impl<S: ByteSendSource> BufferedByteStream<S> {
    pub fn new(source: S) -> Self {
        Self {
            inner: BufferedByteReceiveStream::new(source),
        }
    }

    pub fn buffer(&self) -> Vec<u8> {
        self.inner.buffer()
    }

    pub async fn receive(&self, max_bytes: usize) -> Result<Vec<u8>> {
        self.inner.receive(max_bytes).await
    }

    pub async fn receive_exactly(&self, n: usize) -> Result<Vec<u8>> {
        self.inner.receive_exactly(n).await
    }

    pub async fn receive_until(&self, delimiter: &[u8], max_bytes: usize) -> Result<Vec<u8>> {
        self.inner.receive_until(delimiter, max_bytes).await
    }

    pub async fn send(&self, data: Vec<u8>) -> Result<()> {
        self.inner.source.send_raw(data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    struct ScriptedSource {
        chunks: StdRefCell<VecDeque<Vec<u8>>>,
    }

    impl ScriptedSource {
        fn new(chunks: Vec<&[u8]>) -> Self {
            Self {
                chunks: StdRefCell::new(chunks.into_iter().map(|c| c.to_vec()).collect()),
            }
        }
    }

    impl ByteReceiveSource for ScriptedSource {
        fn receive_raw(&self) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + '_>> {
            let chunk = self.chunks.borrow_mut().pop_front().unwrap_or_default();
            Box::pin(async move { Ok(chunk) })
        }
    }

    #[test]
    fn find_subslice_locates_delimiter_across_no_chunking() {
        let mut buf = VecDeque::new();
        buf.extend(b"GET / HTTP/1.1\r\n".iter().copied());
        assert_eq!(find_subslice(&buf, b"\r\n"), Some(14));
    }

    #[test]
    fn find_subslice_handles_missing_delimiter() {
        let mut buf = VecDeque::new();
        buf.extend(b"no newline here".iter().copied());
        assert_eq!(find_subslice(&buf, b"\r\n"), None);
    }

    fn block_on_test<F: Future>(mut fut: F) -> F::Output {
        use std::task::{RawWaker, RawWakerVTable, Waker};
        fn noop(_: *const ()) {}
        fn clone(_: *const ()) -> RawWaker {
            RawWaker::new(std::ptr::null(), &VTABLE)
        }
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
        let waker = unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) };
        let mut cx = std::task::Context::from_waker(&waker);
        let mut fut = unsafe { Pin::new_unchecked(&mut fut) };
        loop {
            if let std::task::Poll::Ready(v) = fut.as_mut().poll(&mut cx) {
                return v;
            }
        }
    }

    #[test]
    fn receive_exactly_spans_multiple_chunks() {
        let source = ScriptedSource::new(vec![b"ab", b"cd", b"ef"]);
        let stream = BufferedByteReceiveStream::new(source);
        let got = block_on_test(stream.receive_exactly(5));
        assert_eq!(got.unwrap(), b"abcde");
        assert_eq!(stream.buffer(), b"f");
    }

    #[test]
    fn receive_until_finds_delimiter_split_across_chunks() {
        let source = ScriptedSource::new(vec![b"hel", b"lo\r", b"\nworld"]);
        let stream = BufferedByteReceiveStream::new(source);
        let got = block_on_test(stream.receive_until(b"\r\n", 64));
        assert_eq!(got.unwrap(), b"hello");
        assert_eq!(stream.buffer(), b"world");
    }
}

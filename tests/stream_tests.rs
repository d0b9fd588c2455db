mod common;

use ringrt::{create_memory_object_stream, run, Error};
use ringrt::{BufferedByteReceiveStream, ByteReceiveSource};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;

#[test]
fn memory_channel_delivers_every_item_then_end_of_stream() {
    common::setup_tracing();

    let result = run(async {
        let (tx, rx) = create_memory_object_stream::<u32>(Some(4));
        for i in 0..5u32 {
            tx.send(i).await?;
        }
        tx.close();

        let mut received = Vec::new();
        loop {
            match rx.receive().await {
                Ok(item) => received.push(item),
                Err(Error::EndOfStream) => break,
                Err(e) => return Err(e),
            }
        }
        assert_eq!(received, vec![0, 1, 2, 3, 4]);
        Ok(())
    });

    result.unwrap();
}

#[test]
fn closing_all_receivers_breaks_a_blocked_sender() {
    common::setup_tracing();

    let result = run(async {
        let (tx, rx) = create_memory_object_stream::<u32>(Some(1));
        tx.send(1).await?;
        rx.close();
        match tx.send(2).await {
            Err(Error::BrokenResource) => Ok(()),
            other => panic!("expected BrokenResource, got {other:?}"),
        }
    });

    result.unwrap();
}

struct SlicedSource {
    chunks: RefCell<VecDeque<Vec<u8>>>,
}

impl SlicedSource {
    fn new(data: &[u8], chunk_len: usize) -> Self {
        let chunks = data
            .chunks(chunk_len)
            .map(|c| c.to_vec())
            .collect::<VecDeque<_>>();
        Self {
            chunks: RefCell::new(chunks),
        }
    }
}

impl ByteReceiveSource for SlicedSource {
    fn receive_raw(&self) -> Pin<Box<dyn Future<Output = ringrt::Result<Vec<u8>>> + '_>> {
        let chunk = self.chunks.borrow_mut().pop_front().unwrap_or_default();
        Box::pin(async move { Ok(chunk) })
    }
}

#[test]
fn receive_until_frames_request_lines_fed_in_small_slices() {
    common::setup_tracing();

    let result = run(async {
        let source = SlicedSource::new(b"GET / HTTP/1.1\r\nhost: x\r\n\r\n", 5);
        let stream = BufferedByteReceiveStream::new(source);

        let line1 = stream.receive_until(b"\r\n", 65536).await?;
        assert_eq!(line1, b"GET / HTTP/1.1");

        let line2 = stream.receive_until(b"\r\n", 65536).await?;
        assert_eq!(line2, b"host: x");

        let line3 = stream.receive_until(b"\r\n", 65536).await?;
        assert_eq!(line3, b"");

        Ok(())
    });

    result.unwrap();
}

#[test]
fn receive_exactly_leaves_the_remainder_buffered() {
    common::setup_tracing();

    let result = run(async {
        let source = SlicedSource::new(b"abcdef", 2);
        let stream = BufferedByteReceiveStream::new(source);
        let got = stream.receive_exactly(4).await?;
        assert_eq!(got, b"abcd");
        assert_eq!(stream.buffer(), b"ef");
        Ok(())
    });

    result.unwrap();
}

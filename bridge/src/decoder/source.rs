//! Blocking reader over body chunks delivered through a channel.

use std::io::{self, Read};

use bytes::{Buf, Bytes};
use tokio::sync::mpsc;

/// Adapts a stream of byte chunks into [`std::io::Read`].
///
/// Reads block on the channel, so this must only be used off the async
/// runtime (e.g. inside `spawn_blocking`). A closed channel reads as EOF; an
/// error item is returned once and the reader then reports EOF.
pub struct ChannelReader {
    // ---
    rx: mpsc::Receiver<io::Result<Bytes>>,
    current: Bytes,
}

impl ChannelReader {
    // ---
    pub fn new(rx: mpsc::Receiver<io::Result<Bytes>>) -> Self {
        // ---
        Self {
            rx,
            current: Bytes::new(),
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // ---
        if buf.is_empty() {
            return Ok(0);
        }

        while self.current.is_empty() {
            match self.rx.blocking_recv() {
                Some(Ok(chunk)) => self.current = chunk,
                Some(Err(e)) => {
                    self.rx.close();
                    return Err(e);
                }
                None => return Ok(0),
            }
        }

        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current.advance(n);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_reads_across_chunks_until_close() {
        // ---
        let (tx, rx) = mpsc::channel(8);
        for chunk in [&b"RIFF"[..], &b""[..], &b"....WAVE"[..]] {
            tx.try_send(Ok(Bytes::copy_from_slice(chunk)))
                .expect("channel has room");
        }
        drop(tx);

        let mut reader = ChannelReader::new(rx);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).expect("read succeeds");
        assert_eq!(out, b"RIFF....WAVE");
    }

    #[test]
    fn test_surfaces_transport_errors() {
        // ---
        let (tx, rx) = mpsc::channel(8);
        tx.try_send(Ok(Bytes::from_static(b"ab"))).expect("room");
        tx.try_send(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")))
            .expect("room");

        let mut reader = ChannelReader::new(rx);
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).expect("first chunk"), 2);
        let err = reader.read(&mut buf).expect_err("error surfaces");
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(reader.read(&mut buf).expect("then EOF"), 0);
    }
}

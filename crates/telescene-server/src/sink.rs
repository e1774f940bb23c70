//! Byte sinks behind connections.
//!
//! A connection serialises packets; the sink moves the bytes. TCP sinks
//! write without blocking and give up on a persistently full send buffer,
//! dropping the connection rather than stalling the server thread. File
//! sinks block, and finalise the replay prelude on close.

use std::{
    fs::OpenOptions,
    io::{self, BufWriter, Write},
    net::{Shutdown, TcpStream},
    path::Path,
    thread,
    time::Duration,
};

use telescene_proto::{ServerInfoMessage, replay};

/// Destination for a connection's outgoing bytes.
pub(crate) trait Sink: Send {
    /// Write all of `bytes`.
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Flush buffered bytes towards the peer.
    fn flush(&mut self) -> io::Result<()>;

    /// Close the sink; `frame_count` finalises file sinks.
    fn close(&mut self, frame_count: u32);

    /// True until the sink has failed or been closed.
    fn is_open(&self) -> bool;

    /// Peer address or file path, for logging.
    fn address(&self) -> String;
}

/// Socket sink with bounded-retry non-blocking writes.
pub(crate) struct TcpSink {
    stream: TcpStream,
    address: String,
    open: bool,
}

impl TcpSink {
    /// Writes stall at most this long before the connection is dropped.
    const WRITE_STALL_LIMIT: Duration = Duration::from_millis(500);

    pub(crate) fn new(stream: TcpStream) -> io::Result<Self> {
        let address =
            stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown".to_string());
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        Ok(Self { stream, address, open: true })
    }
}

impl Sink for TcpSink {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        if !self.open {
            return Err(io::ErrorKind::NotConnected.into());
        }
        let mut written = 0;
        let mut stalled = Duration::ZERO;
        while written < bytes.len() {
            match self.stream.write(&bytes[written..]) {
                Ok(0) => {
                    self.open = false;
                    return Err(io::ErrorKind::WriteZero.into());
                }
                Ok(n) => {
                    written += n;
                    stalled = Duration::ZERO;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    // Full send buffer: a slow client gets a short grace
                    // period, then the connection is dropped.
                    if stalled >= Self::WRITE_STALL_LIMIT {
                        self.open = false;
                        return Err(io::ErrorKind::TimedOut.into());
                    }
                    let step = Duration::from_millis(2);
                    thread::sleep(step);
                    stalled += step;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.open = false;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }

    fn close(&mut self, _frame_count: u32) {
        if self.open {
            let _ = self.stream.shutdown(Shutdown::Both);
            self.open = false;
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn address(&self) -> String {
        self.address.clone()
    }
}

/// Replay file sink: blocking writes, prelude on open, frame-count patch
/// and `End` terminator on close.
pub(crate) struct FileSink {
    file: BufWriter<std::fs::File>,
    path: String,
    open: bool,
}

impl FileSink {
    pub(crate) fn create(path: &Path, info: &ServerInfoMessage) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let mut file = BufWriter::new(file);
        replay::initialise_stream(&mut file, info)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        Ok(Self { file, path: path.display().to_string(), open: true })
    }
}

impl Sink for FileSink {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        if !self.open {
            return Err(io::ErrorKind::NotConnected.into());
        }
        self.file.write_all(bytes).inspect_err(|_| self.open = false)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }

    fn close(&mut self, frame_count: u32) {
        if !self.open {
            return;
        }
        self.open = false;
        // The End control has already been written by the connection; only
        // the frame-count prelude needs patching.
        if let Err(e) = replay::finalise_stream(&mut self.file, frame_count)
            .and_then(|()| self.file.flush().map_err(Into::into))
        {
            tracing::warn!(path = %self.path, "failed to finalise replay stream: {e}");
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn address(&self) -> String {
        self.path.clone()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Captures written bytes for connection tests.
    #[derive(Clone, Default)]
    pub(crate) struct MemorySink {
        pub bytes: Arc<Mutex<Vec<u8>>>,
        pub fail_writes: Arc<Mutex<bool>>,
        open: Arc<Mutex<bool>>,
    }

    impl MemorySink {
        pub(crate) fn new() -> Self {
            let sink = Self::default();
            *sink.open.lock().unwrap() = true;
            sink
        }

        pub(crate) fn contents(&self) -> Vec<u8> {
            self.bytes.lock().unwrap().clone()
        }
    }

    impl Sink for MemorySink {
        fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
            if *self.fail_writes.lock().unwrap() {
                *self.open.lock().unwrap() = false;
                return Err(io::ErrorKind::BrokenPipe.into());
            }
            self.bytes.lock().unwrap().extend_from_slice(bytes);
            Ok(())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn close(&mut self, _frame_count: u32) {
            *self.open.lock().unwrap() = false;
        }

        fn is_open(&self) -> bool {
            *self.open.lock().unwrap()
        }

        fn address(&self) -> String {
            "memory".to_string()
        }
    }
}

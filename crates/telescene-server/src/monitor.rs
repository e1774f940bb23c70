//! Connection monitor: listen socket, accept loop, pending hand-off.
//!
//! In asynchronous mode a dedicated thread binds the listen socket
//! (falling back through a small port range), accepts clients in a 50 ms
//! poll loop, and parks new connections on a pending list. The server
//! thread adopts them via [`crate::Server::commit_connections`]. In
//! synchronous mode the embedder drives [`ConnectionMonitor::poll_once`]
//! from its own thread instead.

use std::{
    net::TcpListener,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU8, AtomicU16, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    connection::{ClientConnection, Connection},
    error::ServerError,
    settings::ServerSettings,
    sink::TcpSink,
};

/// How the monitor looks for new clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionMode {
    /// Not monitoring.
    None = 0,
    /// The embedder calls [`ConnectionMonitor::poll_once`] itself.
    Synchronous = 1,
    /// A dedicated thread runs the accept loop.
    Asynchronous = 2,
}

impl ConnectionMode {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Synchronous,
            2 => Self::Asynchronous,
            _ => Self::None,
        }
    }
}

/// Sleep between accept polls on the monitor thread.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

struct MonitorShared {
    settings: ServerSettings,
    listener: Mutex<Option<TcpListener>>,
    pending: Mutex<Vec<Box<dyn Connection>>>,
    mode: AtomicU8,
    quit: AtomicBool,
    running: AtomicBool,
    port: AtomicU16,
    failed: AtomicBool,
}

impl MonitorShared {
    fn listen(&self) -> Result<u16, ServerError> {
        let mut guard = self.listener.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(listener) = guard.as_ref() {
            return Ok(listener.local_addr().map(|a| a.port()).unwrap_or(0));
        }

        let first = self.settings.listen_port;
        let last = first.saturating_add(self.settings.port_range);
        for port in first..=last {
            if let Ok(listener) = TcpListener::bind(("0.0.0.0", port)) {
                listener.set_nonblocking(true)?;
                let bound = listener.local_addr().map(|a| a.port()).unwrap_or(port);
                *guard = Some(listener);
                self.port.store(bound, Ordering::Release);
                return Ok(bound);
            }
        }
        Err(ServerError::ListenFailure { first, last })
    }

    /// Accept any waiting clients onto the pending list.
    fn accept_step(&self) {
        let guard = self.listener.lock().unwrap_or_else(|e| e.into_inner());
        let Some(listener) = guard.as_ref() else {
            return;
        };
        loop {
            match listener.accept() {
                Ok((stream, addr)) => match TcpSink::new(stream) {
                    Ok(sink) => {
                        tracing::debug!(%addr, "accepted client connection");
                        let connection: Box<dyn Connection> =
                            Box::new(ClientConnection::new(sink, self.settings.clone()));
                        self.pending.lock().unwrap_or_else(|e| e.into_inner()).push(connection);
                    }
                    Err(e) => tracing::warn!(%addr, "failed to configure client socket: {e}"),
                },
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!("accept failed: {e}");
                    break;
                }
            }
        }
    }

    fn stop_listening(&self) {
        self.port.store(0, Ordering::Release);
        *self.listener.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn run(&self) {
        if self.listen().is_err() {
            self.failed.store(true, Ordering::Release);
            self.stop_listening();
            return;
        }
        self.running.store(true, Ordering::Release);

        while !self.quit.load(Ordering::Acquire) {
            self.accept_step();
            thread::sleep(ACCEPT_POLL_INTERVAL);
        }

        self.running.store(false, Ordering::Release);
        self.stop_listening();
        self.mode.store(ConnectionMode::None as u8, Ordering::Release);
    }
}

/// Accepts new clients and hands them to the server thread.
pub struct ConnectionMonitor {
    shared: Arc<MonitorShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionMonitor {
    pub(crate) fn new(settings: ServerSettings) -> Self {
        Self {
            shared: Arc::new(MonitorShared {
                settings,
                listener: Mutex::new(None),
                pending: Mutex::new(Vec::new()),
                mode: AtomicU8::new(ConnectionMode::None as u8),
                quit: AtomicBool::new(false),
                running: AtomicBool::new(false),
                port: AtomicU16::new(0),
                failed: AtomicBool::new(false),
            }),
            thread: Mutex::new(None),
        }
    }

    /// Current monitoring mode.
    #[must_use]
    pub fn mode(&self) -> ConnectionMode {
        ConnectionMode::from_u8(self.shared.mode.load(Ordering::Acquire))
    }

    /// True while the accept loop is live.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Port actually bound, zero when not listening.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.shared.port.load(Ordering::Acquire)
    }

    /// Start monitoring in `mode`.
    ///
    /// Asynchronous start waits up to the configured timeout for the
    /// worker thread to report ready.
    ///
    /// # Errors
    ///
    /// [`ServerError::AlreadyRunning`] on a mode change while running,
    /// [`ServerError::ListenFailure`] when no port binds, and
    /// [`ServerError::StartTimeout`] when the worker does not come up.
    pub fn start(&self, mode: ConnectionMode) -> Result<(), ServerError> {
        let current = self.mode();
        if current == mode {
            return Ok(());
        }
        if current != ConnectionMode::None {
            return Err(ServerError::AlreadyRunning);
        }

        match mode {
            ConnectionMode::None => Ok(()),
            ConnectionMode::Synchronous => {
                self.shared.listen()?;
                self.shared.running.store(true, Ordering::Release);
                self.shared.mode.store(mode as u8, Ordering::Release);
                Ok(())
            }
            ConnectionMode::Asynchronous => {
                self.shared.quit.store(false, Ordering::Release);
                self.shared.failed.store(false, Ordering::Release);
                let shared = Arc::clone(&self.shared);
                let handle = thread::Builder::new()
                    .name("telescene-monitor".to_string())
                    .spawn(move || shared.run())?;
                *self.thread.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

                let timeout = Duration::from_millis(self.shared.settings.async_timeout_ms);
                let start = Instant::now();
                loop {
                    if self.shared.failed.load(Ordering::Acquire) {
                        self.join();
                        let first = self.shared.settings.listen_port;
                        return Err(ServerError::ListenFailure {
                            first,
                            last: first.saturating_add(self.shared.settings.port_range),
                        });
                    }
                    if self.shared.running.load(Ordering::Acquire) {
                        self.shared.mode.store(mode as u8, Ordering::Release);
                        return Ok(());
                    }
                    if start.elapsed() >= timeout {
                        self.shared.quit.store(true, Ordering::Release);
                        self.join();
                        return Err(ServerError::StartTimeout {
                            timeout_ms: self.shared.settings.async_timeout_ms,
                        });
                    }
                    thread::yield_now();
                }
            }
        }
    }

    /// Stop monitoring. The asynchronous worker finishes its current poll
    /// iteration, then joins.
    pub fn stop(&self) {
        match self.mode() {
            ConnectionMode::None => {}
            ConnectionMode::Synchronous => {
                self.shared.running.store(false, Ordering::Release);
                self.shared.stop_listening();
                self.shared.mode.store(ConnectionMode::None as u8, Ordering::Release);
            }
            ConnectionMode::Asynchronous => {
                self.shared.quit.store(true, Ordering::Release);
                self.join();
            }
        }
    }

    /// One synchronous accept step; a no-op in other modes.
    pub fn poll_once(&self) {
        if self.mode() == ConnectionMode::Synchronous {
            self.shared.accept_step();
        }
    }

    /// Number of connections waiting to be committed.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub(crate) fn drain_pending(&self) -> Vec<Box<dyn Connection>> {
        std::mem::take(&mut *self.shared.pending.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn join(&self) {
        if let Some(handle) = self.thread.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ConnectionMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpStream;

    use super::*;

    fn test_settings() -> ServerSettings {
        // Port zero binds an ephemeral port, keeping tests isolated.
        ServerSettings { listen_port: 0, port_range: 0, ..ServerSettings::default() }
    }

    #[test]
    fn async_monitor_accepts_a_client() {
        let monitor = ConnectionMonitor::new(test_settings());
        monitor.start(ConnectionMode::Asynchronous).unwrap();
        assert!(monitor.is_running());
        let port = monitor.port();
        assert_ne!(port, 0);

        let _client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while monitor.pending_count() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(monitor.pending_count(), 1);

        monitor.stop();
        assert!(!monitor.is_running());
        assert_eq!(monitor.mode(), ConnectionMode::None);
    }

    #[test]
    fn synchronous_monitor_polls_on_demand() {
        let monitor = ConnectionMonitor::new(test_settings());
        monitor.start(ConnectionMode::Synchronous).unwrap();
        let port = monitor.port();

        let _client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while monitor.pending_count() == 0 && Instant::now() < deadline {
            monitor.poll_once();
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(monitor.pending_count(), 1);
        monitor.stop();
    }

    #[test]
    fn starting_twice_in_same_mode_is_idempotent() {
        let monitor = ConnectionMonitor::new(test_settings());
        monitor.start(ConnectionMode::Asynchronous).unwrap();
        monitor.start(ConnectionMode::Asynchronous).unwrap();
        assert!(matches!(
            monitor.start(ConnectionMode::Synchronous),
            Err(ServerError::AlreadyRunning)
        ));
        monitor.stop();
    }
}

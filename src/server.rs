//! Single-controller TCP service.
//!
//! The listener accepts on one port and tracks at most one active
//! session; a newly arrived controller replaces the previous one. All
//! shared state lives in the [`Server`] value: the provider capability,
//! the diagnostic flag, and the mutex-guarded socket slots.

use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{info, warn};

use crate::error::Error;
use crate::provider::MemoryProvider;
use crate::session;

/// Port the service listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 9178;

/// Accept-poll quantum; stop() takes effect within one of these.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Enable diagnostic mode via `CEQP_TEST_ENV` (`1`, `true`, `yes` or
/// `on`, case-insensitive).
pub fn diagnostic_from_env() -> bool {
    std::env::var("CEQP_TEST_ENV").is_ok_and(|v| {
        matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Shared {
    provider: Arc<dyn MemoryProvider>,
    diagnostic: bool,
    running: AtomicBool,
    listener: Mutex<Option<TcpListener>>,
    active: Mutex<Option<TcpStream>>,
}

pub struct Server {
    shared: Arc<Shared>,
    acceptor: Option<JoinHandle<()>>,
}

impl Server {
    pub fn new(provider: Arc<dyn MemoryProvider>, diagnostic: bool) -> Self {
        Server {
            shared: Arc::new(Shared {
                provider,
                diagnostic,
                running: AtomicBool::new(false),
                listener: Mutex::new(None),
                active: Mutex::new(None),
            }),
            acceptor: None,
        }
    }

    /// Bind `0.0.0.0:port` and spawn the accept loop. A no-op when the
    /// server is already running.
    pub fn start(&mut self, port: u16) -> Result<(), Error> {
        if self.shared.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let listener = bind_listener(port)?;
        let local = listener.local_addr()?;
        *lock(&self.shared.listener) = Some(listener);
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("ceqp-accept".to_string())
            .spawn(move || accept_loop(&shared))
            .map_err(Error::Io)?;
        self.acceptor = Some(handle);

        info!(%local, "listening");
        Ok(())
    }

    /// Stop accepting, close the active session, and join the worker.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        lock(&self.shared.listener).take();
        if let Some(handle) = self.acceptor.take() {
            let _ = handle.join();
        }
        info!("stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Bound address while running; lets callers bind port 0 and
    /// discover the assigned port.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.shared.listener)
            .as_ref()
            .and_then(|l| l.local_addr().ok())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

fn bind_listener(port: u16) -> Result<TcpListener, std::io::Error> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&addr.into())?;
    socket.listen(4)?;
    let listener: TcpListener = socket.into();
    // Non-blocking accept so the loop can observe stop() at the poll
    // quantum.
    listener.set_nonblocking(true)?;
    Ok(listener)
}

fn accept_loop(shared: &Arc<Shared>) {
    let mut worker: Option<JoinHandle<()>> = None;

    while shared.running.load(Ordering::SeqCst) {
        let accepted = match lock(&shared.listener).as_ref() {
            Some(listener) => match listener.accept() {
                Ok(pair) => Some(pair),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => None,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    None
                }
            },
            None => break,
        };

        let Some((stream, peer)) = accepted else {
            std::thread::sleep(ACCEPT_POLL);
            continue;
        };

        info!(%peer, "controller connected");
        if let Err(e) = configure(&stream) {
            warn!(%peer, error = %e, "socket setup failed");
            continue;
        }

        // Single-controller policy: the newcomer displaces any session
        // still active.
        match stream.try_clone() {
            Ok(tracked) => {
                if let Some(previous) = lock(&shared.active).replace(tracked) {
                    let _ = previous.shutdown(Shutdown::Both);
                }
            }
            Err(e) => {
                warn!(%peer, error = %e, "could not track session socket");
                continue;
            }
        }
        if let Some(handle) = worker.take() {
            let _ = handle.join();
        }

        let session_shared = Arc::clone(shared);
        let spawned = std::thread::Builder::new()
            .name("ceqp-session".to_string())
            .spawn(move || {
                session::serve(
                    stream,
                    session_shared.provider.as_ref(),
                    session_shared.diagnostic,
                )
            });
        match spawned {
            Ok(handle) => worker = Some(handle),
            Err(e) => warn!(%peer, error = %e, "session thread failed"),
        }
    }

    if let Some(stream) = lock(&shared.active).take() {
        let _ = stream.shutdown(Shutdown::Both);
    }
    if let Some(handle) = worker.take() {
        let _ = handle.join();
    }
}

fn configure(stream: &TcpStream) -> Result<(), std::io::Error> {
    // Sockets accepted from a non-blocking listener must go back to
    // blocking for the session loop's deadline-based reads.
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(session::IO_TIMEOUT))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::provider::ArenaProvider;
    use std::time::Duration;

    fn start_server() -> (Server, SocketAddr) {
        let mut provider = ArenaProvider::new(0x1000, 0x1000);
        provider.add_module("game.exe", 0x1000);
        let mut server = Server::new(Arc::new(provider), false);
        server.start(0).unwrap();
        let addr = server.local_addr().unwrap();
        (server, addr)
    }

    #[test]
    fn start_is_idempotent() {
        let (mut server, addr) = start_server();
        server.start(0).unwrap();
        assert_eq!(server.local_addr().unwrap(), addr);
        server.stop();
        assert!(!server.is_running());
    }

    #[test]
    fn serves_a_controller() {
        let (mut server, addr) = start_server();
        let mut client = Client::connect(addr).unwrap();
        client.ping().unwrap();
        client.write_memory(0x1200, &[1, 2, 3]).unwrap();
        assert_eq!(client.read_memory(0x1200, 3).unwrap(), [1, 2, 3]);
        server.stop();
    }

    #[test]
    fn new_controller_displaces_previous() {
        let (mut server, addr) = start_server();

        let mut first = Client::connect(addr).unwrap();
        first.ping().unwrap();

        let mut second = Client::connect(addr).unwrap();
        // Give the accept loop a poll quantum to swap sessions.
        std::thread::sleep(Duration::from_millis(200));
        second.ping().unwrap();

        assert!(first.ping().is_err());
        second.ping().unwrap();
        server.stop();
    }

    #[test]
    fn stop_tears_down_active_session() {
        let (mut server, addr) = start_server();
        let mut client = Client::connect(addr).unwrap();
        client.ping().unwrap();
        server.stop();
        assert!(client.ping().is_err());
    }
}

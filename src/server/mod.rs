//! RESP server over a [`MemoryStore`]
//!
//! Speaks the subset of the Redis protocol the stats collector uses, so a
//! [`RespStore`](crate::store::RespStore) or any Redis client can talk to it.

pub mod connection;

pub use connection::ConnectionHandler;

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::store::MemoryStore;

pub struct StatsServer {
    config: ServerConfig,
    store: Arc<MemoryStore>,
}

impl StatsServer {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }

    /// Serve an existing store, shared with in-process collectors.
    pub fn with_store(config: ServerConfig, store: Arc<MemoryStore>) -> Self {
        debug_assert!(!config.bind.is_empty(), "Server address cannot be empty");
        StatsServer { config, store }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Bind the configured address and serve forever.
    pub async fn run(self) -> io::Result<()> {
        let listener = TcpListener::bind(&self.config.bind).await?;
        self.serve(listener, std::future::pending()).await
    }

    /// Accept connections on `listener` until `shutdown` resolves.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = listener.local_addr()?;
        info!(
            %addr,
            auth = self.config.require_pass.is_some(),
            "stats server listening"
        );
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(%addr, "stats server shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        let handler = ConnectionHandler::new(
                            stream,
                            Arc::clone(&self.store),
                            peer.to_string(),
                            self.config.require_pass.clone(),
                        );
                        tokio::spawn(handler.run());
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
            }
        }
    }

    /// Serve on a dedicated thread with its own runtime.
    ///
    /// The address is bound before returning, so a `127.0.0.1:0` bind is
    /// immediately connectable through [`ServerHandle::addr`].
    pub fn spawn(self) -> io::Result<ServerHandle> {
        let listener = std::net::TcpListener::bind(&self.config.bind)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("stats-server".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = match TcpListener::from_std(listener) {
                        Ok(listener) => listener,
                        Err(e) => {
                            error!("Failed to register listener: {}", e);
                            return;
                        }
                    };
                    let shutdown = async {
                        let _ = shutdown_rx.await;
                    };
                    if let Err(e) = self.serve(listener, shutdown).await {
                        error!("Stats server failed: {}", e);
                    }
                });
            })?;

        Ok(ServerHandle {
            addr,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

/// A server running on its own thread. Dropping it stops the server.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::time::Duration;

    fn local() -> ServerConfig {
        ServerConfig {
            bind: "127.0.0.1:0".to_string(),
            ..Default::default()
        }
    }

    fn roundtrip(stream: &mut TcpStream, request: &[u8]) -> String {
        stream.write_all(request).unwrap();
        let mut buf = [0u8; 512];
        let n = stream.read(&mut buf).unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    fn connect(handle: &ServerHandle) -> TcpStream {
        let stream = TcpStream::connect(handle.addr()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
    }

    #[test]
    fn test_ping_and_incr() {
        let handle = StatsServer::new(local()).spawn().unwrap();
        let mut stream = connect(&handle);
        assert_eq!(roundtrip(&mut stream, b"*1\r\n$4\r\nPING\r\n"), "+PONG\r\n");
        assert_eq!(
            roundtrip(&mut stream, b"*3\r\n$6\r\nINCRBY\r\n$1\r\nk\r\n$2\r\n15\r\n"),
            ":15\r\n"
        );
        assert_eq!(
            roundtrip(&mut stream, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n"),
            "$2\r\n15\r\n"
        );
    }

    #[test]
    fn test_require_pass() {
        let config = ServerConfig {
            require_pass: Some("secret".to_string()),
            ..local()
        };
        let handle = StatsServer::new(config).spawn().unwrap();
        let mut stream = connect(&handle);
        assert!(roundtrip(&mut stream, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n").starts_with("-NOAUTH"));
        assert!(
            roundtrip(&mut stream, b"*2\r\n$4\r\nAUTH\r\n$5\r\nwrong\r\n").starts_with("-WRONGPASS")
        );
        assert_eq!(
            roundtrip(&mut stream, b"*2\r\n$4\r\nAUTH\r\n$6\r\nsecret\r\n"),
            "+OK\r\n"
        );
        assert_eq!(
            roundtrip(&mut stream, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n"),
            "$-1\r\n"
        );
    }

    #[test]
    fn test_exec_aborts_after_queue_error() {
        let handle = StatsServer::new(local()).spawn().unwrap();
        let mut stream = connect(&handle);
        assert_eq!(roundtrip(&mut stream, b"*1\r\n$5\r\nMULTI\r\n"), "+OK\r\n");
        assert!(roundtrip(&mut stream, b"*1\r\n$3\r\nGET\r\n").starts_with("-ERR wrong number"));
        assert_eq!(
            roundtrip(&mut stream, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n"),
            "+QUEUED\r\n"
        );
        assert!(roundtrip(&mut stream, b"*1\r\n$4\r\nEXEC\r\n").starts_with("-EXECABORT"));
        assert!(keyspace_is_empty(&mut stream));
    }

    fn keyspace_is_empty(stream: &mut TcpStream) -> bool {
        roundtrip(stream, b"*2\r\n$4\r\nKEYS\r\n$1\r\n*\r\n") == "*0\r\n"
    }
}

use std::{
    io::{self, ErrorKind},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use log::{info, warn};

use crate::{
    config::ServerConfig,
    connection::{AdmitError, ConnectionManager},
    executor::QueryExecutor,
    users::UserDirectory,
};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Tells a listening [`Server`] to stop. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Server {
    listener: TcpListener,
    manager: ConnectionManager,
    signal: ShutdownSignal,
}

impl Server {
    pub fn bind(
        config: ServerConfig,
        users: Arc<dyn UserDirectory>,
        executor: Arc<dyn QueryExecutor>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(config.listen_addr)?;
        Ok(Self {
            listener,
            manager: ConnectionManager::new(config, users, executor),
            signal: ShutdownSignal::default(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Accepts connections until the shutdown signal fires, then closes every
    /// live connection and waits for the sessions to end.
    pub fn listen(self) -> io::Result<()> {
        // Polled so the loop can observe the shutdown signal.
        self.listener.set_nonblocking(true)?;
        self.manager.start_reaper()?;
        info!("listening at {}", self.local_addr()?);

        while !self.signal.is_triggered() {
            match self.listener.accept() {
                Ok((stream, addr)) => self.accept(stream, addr),
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL_INTERVAL),
                Err(e) => warn!("broken connection: {e:?}"),
            }
        }

        info!("shutting down");
        self.manager.shutdown();
        let stats = self.manager.statistics();
        info!(
            "served {} connections ({} rejected, {} reclaimed) over {:.2?}",
            stats.total_admitted, stats.total_rejected, stats.total_reclaimed, stats.uptime
        );
        Ok(())
    }

    fn accept(&self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nonblocking(false).and_then(|_| stream.set_nodelay(true)) {
            warn!("could not configure connection from {addr}: {e}");
            return;
        }

        match self.manager.admit(stream, addr) {
            Ok(_) | Err(AdmitError::Capacity(_)) => {}
            Err(e) => warn!("failed to start session for {addr}: {e}"),
        }
    }
}

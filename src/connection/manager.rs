use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc, Mutex, PoisonError,
        mpsc::{self, RecvTimeoutError},
    },
    thread::{self, JoinHandle},
};

use log::{debug, info, warn};
use thiserror::Error;

use crate::{
    config::ServerConfig,
    executor::QueryExecutor,
    protocol::{
        PoolError, ProtocolSession, Transport,
        codec::write_packet,
        error::CapacityError,
        response::ErrPacket,
        thread::ThreadPool,
    },
    users::UserDirectory,
};

use super::registry::{ConnectionHandle, ConnectionRecord, Registry, Statistics};

#[derive(Debug, Error)]
pub enum AdmitError {
    #[error(transparent)]
    Capacity(#[from] CapacityError),
    #[error("connection setup failed: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

struct Reaper {
    stop: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

/// Admits transports and runs one session per connection.
pub struct ConnectionManager {
    config: ServerConfig,
    registry: Arc<Registry>,
    users: Arc<dyn UserDirectory>,
    executor: Arc<dyn QueryExecutor>,
    pool: ThreadPool,
    reaper: Mutex<Option<Reaper>>,
}

impl ConnectionManager {
    pub fn new(
        config: ServerConfig,
        users: Arc<dyn UserDirectory>,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        let max_connections = config.max_connections.max(1);
        Self {
            registry: Arc::new(Registry::new(config.max_connections)),
            pool: ThreadPool::new(max_connections),
            reaper: Mutex::new(None),
            config,
            users,
            executor,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn statistics(&self) -> Statistics {
        self.registry.statistics()
    }

    /// Registers the transport and starts its session on the worker pool.
    ///
    /// A transport refused for capacity never sees a greeting: it gets a
    /// single error packet (unless `notify_rejected` is off) and is closed.
    pub fn admit<T: Transport>(
        &self,
        transport: T,
        client_addr: SocketAddr,
    ) -> Result<ConnectionRecord, AdmitError> {
        let closer = transport.closer()?;

        let record = match self.registry.admit(Arc::clone(&closer), client_addr) {
            Ok(record) => record,
            Err(e) => {
                let mut transport = transport;
                if self.config.notify_rejected {
                    let packet = ErrPacket::from(&e).encode();
                    if let Err(e) = write_packet(&mut transport, &packet, 0) {
                        debug!("could not notify rejected client {client_addr}: {e}");
                    }
                }
                closer.close();
                return Err(e.into());
            }
        };

        let session = ProtocolSession::new(
            transport,
            ConnectionHandle::new(record.id, Arc::clone(&self.registry)),
            Arc::clone(&self.users),
            Arc::clone(&self.executor),
            self.config.server_version.as_str(),
        );
        // On failure the dropped job takes the session, and with it the
        // registry record, down too.
        self.pool.execute(move || {
            session.run();
        })?;

        Ok(record)
    }

    /// Starts the background sweep reclaiming idle connections. Calling it
    /// again while the sweep runs has no effect.
    pub fn start_reaper(&self) -> io::Result<()> {
        let mut reaper = self.reaper.lock().unwrap_or_else(PoisonError::into_inner);
        if reaper.is_some() {
            return Ok(());
        }

        let (stop, stopped) = mpsc::channel::<()>();
        let registry = Arc::clone(&self.registry);
        let idle_timeout = self.config.idle_timeout;
        let interval = self.config.reclaim_interval;

        let thread = thread::Builder::new()
            .name("floe-reaper".to_string())
            .spawn(move || {
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            registry.reclaim_idle(idle_timeout);
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("reaper stopped");
            })?;

        info!(
            "reclaiming connections idle for more than {:?} every {:?}",
            idle_timeout, interval
        );
        *reaper = Some(Reaper { stop, thread });
        Ok(())
    }

    fn stop_reaper(&self) {
        let reaper = self
            .reaper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(Reaper { stop, thread }) = reaper {
            drop(stop);
            if thread.join().is_err() {
                warn!("reaper thread panicked");
            }
        }
    }

    /// Refuses new connections, closes every live one and waits for their
    /// sessions to wind down.
    pub fn shutdown(&self) {
        self.registry.shutdown();
        self.stop_reaper();
        self.pool.shutdown();
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

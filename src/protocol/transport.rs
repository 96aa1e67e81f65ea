use std::{
    io::{self, Read, Write},
    net::{Shutdown, TcpStream},
    sync::Arc,
};

/// Handle able to force a transport closed from another thread.
///
/// Closing unblocks any reader or writer parked on the transport; a blocked
/// read then observes end-of-stream.
pub trait Closer: Send + Sync {
    fn close(&self);
}

/// Byte stream a [`ProtocolSession`](super::ProtocolSession) runs over.
pub trait Transport: Read + Write + Send + 'static {
    fn closer(&self) -> io::Result<Arc<dyn Closer>>;
}

impl Closer for TcpStream {
    fn close(&self) {
        // Already-closed sockets report NotConnected; nothing left to do.
        let _ = self.shutdown(Shutdown::Both);
    }
}

impl Transport for TcpStream {
    fn closer(&self) -> io::Result<Arc<dyn Closer>> {
        Ok(Arc::new(self.try_clone()?))
    }
}

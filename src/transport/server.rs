use std::future::Future;
use std::io;

use bytes::BytesMut;
use tokio::io::{Interest, Ready};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::outbound::Outbound;
use crate::broker::{ConnectionId, SharedBroker, lock_broker};
use crate::commands::{self, Flow};
use crate::protocol::{RequestFramer, Status, response};

/// Bytes reserved in the read buffer before each read.
const READ_CHUNK: usize = 16 * 1024;

/// A non-blocking socket driven by readiness, implemented for the tokio
/// TCP and unix streams.
pub trait ReadyStream: Send + Sync + 'static {
    fn ready(&self, interest: Interest) -> impl Future<Output = io::Result<Ready>> + Send;
    fn try_read_buf(&self, buf: &mut BytesMut) -> io::Result<usize>;
    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;
}

macro_rules! ready_stream {
    ($stream:ty) => {
        impl ReadyStream for $stream {
            fn ready(&self, interest: Interest) -> impl Future<Output = io::Result<Ready>> + Send {
                <$stream>::ready(self, interest)
            }

            fn try_read_buf(&self, buf: &mut BytesMut) -> io::Result<usize> {
                <$stream>::try_read_buf(self, buf)
            }

            fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
                <$stream>::try_write(self, buf)
            }
        }
    };
}

ready_stream!(TcpStream);
#[cfg(unix)]
ready_stream!(tokio::net::UnixStream);

/// Accepts TCP clients until the listener fails.
pub async fn serve_tcp(listener: TcpListener, broker: SharedBroker, max_request_size: usize) {
    info!("Listening on tcp://{}", display_addr(listener.local_addr()));

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Failed to accept TCP connection: {e}");
                continue;
            }
        };
        if refuse_over_capacity(&broker) {
            continue;
        }
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {peer}: {e}");
        }
        tokio::spawn(handle_connection(
            broker.clone(),
            stream,
            peer.to_string(),
            max_request_size,
        ));
    }
}

#[cfg(unix)]
pub async fn serve_unix(
    listener: tokio::net::UnixListener,
    broker: SharedBroker,
    max_request_size: usize,
) {
    info!("Listening on unix socket {:?}", listener.local_addr().ok());

    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(e) => {
                warn!("Failed to accept unix connection: {e}");
                continue;
            }
        };
        if refuse_over_capacity(&broker) {
            continue;
        }
        tokio::spawn(handle_connection(
            broker.clone(),
            stream,
            "unix".to_string(),
            max_request_size,
        ));
    }
}

fn display_addr(addr: io::Result<std::net::SocketAddr>) -> String {
    addr.map(|a| a.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string())
}

fn refuse_over_capacity(broker: &SharedBroker) -> bool {
    let broker = lock_broker(broker);
    if broker.at_capacity() {
        warn!(
            "Refusing connection: {} clients already connected",
            broker.connection_count()
        );
        return true;
    }
    false
}

/// Runs one client connection until the peer leaves, the transport fails,
/// the client disconnects or the broker drops the connection.
pub async fn handle_connection<S: ReadyStream>(
    broker: SharedBroker,
    stream: S,
    peer: String,
    max_request_size: usize,
) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let conn = lock_broker(&broker).register_connection(tx);
    info!("{conn} connected from {peer}");

    let mut framer = RequestFramer::new(max_request_size);
    let mut outbound = Outbound::new();

    loop {
        let interest = if outbound.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        };

        tokio::select! {
            ready = stream.ready(interest) => {
                let ready = match ready {
                    Ok(ready) => ready,
                    Err(e) => {
                        debug!("{conn} socket error: {e}");
                        break;
                    }
                };

                if ready.is_writable() {
                    if let Err(e) = outbound.write_to(|buf| stream.try_write(buf)) {
                        debug!("{conn} write failed: {e}");
                        break;
                    }
                }

                if ready.is_readable() {
                    framer.buffer_mut().reserve(READ_CHUNK);
                    match stream.try_read_buf(framer.buffer_mut()) {
                        Ok(0) => {
                            debug!("{conn} closed by peer");
                            break;
                        }
                        Ok(_) => {
                            if dispatch_buffered(&broker, conn, &mut framer) == Flow::Close {
                                debug!("{conn} requested disconnect");
                                break;
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                        Err(e) => {
                            debug!("{conn} read failed: {e}");
                            break;
                        }
                    }
                }
            }
            object = rx.recv() => match object {
                Some(object) => outbound.push(object),
                None => {
                    debug!("{conn} dropped by the broker");
                    break;
                }
            },
        }
    }

    lock_broker(&broker).remove_connection(conn);
    info!("{conn} disconnected");
}

/// Dispatches every complete request in the framer's buffer under a single
/// lock acquisition.
fn dispatch_buffered(broker: &SharedBroker, conn: ConnectionId, framer: &mut RequestFramer) -> Flow {
    let mut broker = lock_broker(broker);
    if !broker.is_connected(conn) {
        return Flow::Close;
    }
    broker.touch(conn);

    loop {
        match framer.next_frame() {
            Ok(Some(frame)) => {
                if commands::dispatch(&mut broker, conn, frame) == Flow::Close {
                    return Flow::Close;
                }
            }
            Ok(None) => return Flow::Continue,
            Err(err) => {
                warn!("{conn} sent a bad request: {err}");
                if !err.noack() {
                    broker.send_to(conn, response::status(err.opcode(), Status::BadPacket));
                }
            }
        }
    }
}

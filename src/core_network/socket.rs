use log::trace;
use mio::net::TcpStream;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{SocketAddr, SocketAddrV4};

/// Which half of opening a socket went wrong.
#[derive(Debug)]
pub enum OpenError {
    Create(io::Error),
    Connect(io::Error),
}

/// Creates a non-blocking TCP socket and starts connecting it to `addr`.
///
/// The connect is only initiated here; completion is signalled by the socket becoming
/// writable and must be confirmed with [`check_connected`].
pub fn open_nonblocking(addr: SocketAddrV4) -> Result<TcpStream, OpenError> {
    let socket =
        Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).map_err(OpenError::Create)?;
    socket.set_nonblocking(true).map_err(OpenError::Create)?;

    if let Err(e) = socket.connect(&SockAddr::from(SocketAddr::V4(addr))) {
        if !is_in_progress(&e) {
            return Err(OpenError::Connect(e));
        }
    }
    trace!("Connect to {} in progress", addr);

    Ok(TcpStream::from_std(std::net::TcpStream::from(socket)))
}

/// Inspects a socket that reported writability after a non-blocking connect.
///
/// Returns `Ok(true)` once connected, `Ok(false)` if the connect is still pending and the
/// pending socket error otherwise.
pub fn check_connected(stream: &TcpStream) -> io::Result<bool> {
    if let Some(e) = stream.take_error()? {
        return Err(e);
    }
    match stream.peer_addr() {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
        Err(e) => Err(e),
    }
}

/// Errors that only mean "try again on the next readiness event".
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn is_in_progress(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }
    #[cfg(unix)]
    if err.raw_os_error() == Some(libc::EINPROGRESS) {
        return true;
    }
    false
}

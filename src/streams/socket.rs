//! Raw socket streams: [`Server`] (bind + listen + accept) and
//! [`Connection`] (the result of `connect` or `Server::accept`).

use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::io::RawFd;
use std::pin::Pin;

use crate::buffer::Buffer;
use crate::config::{DEFAULT_RECV_SIZE, DEFAULT_SOCKET_BACKLOG};
use crate::error::{Error, Result};
use crate::io_future::IoOpFuture;
use crate::op::{Completion, Operation};
use crate::streams::buffered::{ByteReceiveSource, ByteSendSource};

async fn create_socket(addr: &SocketAddr) -> Result<RawFd> {
    match IoOpFuture::new(Operation::socket_create(addr)).await? {
        Completion::SocketCreated { fd } => Ok(fd),
        other => unreachable!("socket_create produced {other:?}"),
    }
}

async fn close_fd(fd: RawFd) -> Result<()> {
    match IoOpFuture::new(Operation::Close { fd }).await? {
        Completion::Closed => Ok(()),
        other => unreachable!("close produced {other:?}"),
    }
}

/// Binds, sets `SO_REUSEADDR`, and listens. Closes the socket on any
/// failure partway through setup, so a successful bind followed by a
/// failed listen doesn't leak the descriptor.
pub async fn create_server(addr: SocketAddr) -> Result<Server> {
    let fd = create_socket(&addr).await?;
    if let Err(e) = setup_server(fd, addr).await {
        let _ = close_fd(fd).await;
        return Err(e);
    }
    Ok(Server { fd })
}

async fn setup_server(fd: RawFd, addr: SocketAddr) -> Result<()> {
    match IoOpFuture::new(Operation::SocketSetOpt { fd }).await? {
        Completion::SocketOptSet => {}
        other => unreachable!("setsockopt produced {other:?}"),
    }
    match IoOpFuture::new(Operation::SocketBind { fd, addr }).await? {
        Completion::SocketBound => {}
        other => unreachable!("bind produced {other:?}"),
    }
    match IoOpFuture::new(Operation::SocketListen {
        fd,
        backlog: DEFAULT_SOCKET_BACKLOG,
    })
    .await?
    {
        Completion::SocketListening => Ok(()),
        other => unreachable!("listen produced {other:?}"),
    }
}

/// Connects to `addr`, closing the socket if the connect itself fails.
pub async fn connect(addr: SocketAddr) -> Result<Connection> {
    let fd = create_socket(&addr).await?;
    match IoOpFuture::new(Operation::SocketConnect { fd, addr }).await {
        Ok(Completion::SocketConnected) => Ok(Connection { fd }),
        Ok(other) => unreachable!("connect produced {other:?}"),
        Err(e) => {
            let _ = close_fd(fd).await;
            Err(e)
        }
    }
}

/// A listening socket.
pub struct Server {
    fd: RawFd,
}

impl Server {
    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }

    /// The address actually bound, including the port the kernel assigned
    /// when `create_server` was called with port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockname(self.fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len)
        };
        if ret != 0 {
            return Err(Error::os(
                std::io::Error::last_os_error().raw_os_error().unwrap_or(0),
            ));
        }
        sockaddr_storage_to_socket_addr(&storage)
    }

    pub async fn accept(&self) -> Result<Connection> {
        match IoOpFuture::new(Operation::SocketAccept { fd: self.fd }).await? {
            Completion::SocketAccepted { fd } => Ok(Connection { fd }),
            other => unreachable!("accept produced {other:?}"),
        }
    }

    pub async fn close(self) -> Result<()> {
        close_fd(self.fd).await
    }
}

/// An established connection, either accepted by a [`Server`] or opened
/// with [`connect`].
pub struct Connection {
    fd: RawFd,
}

impl Connection {
    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }

    /// Reads up to [`DEFAULT_RECV_SIZE`] bytes. An empty result means the
    /// peer has sent its FIN; `BufferedByteReceiveStream` is the layer
    /// that turns that into an `EndOfStream` error.
    pub async fn receive(&self) -> Result<Vec<u8>> {
        let op = Operation::SocketRecv {
            fd: self.fd,
            buf: Buffer::new_zeroed(DEFAULT_RECV_SIZE),
        };
        match IoOpFuture::new(op).await? {
            Completion::SocketReceived { data } => Ok(data.into_vec()),
            other => unreachable!("recv produced {other:?}"),
        }
    }

    /// Sends `data`, looping until the kernel has accepted every byte.
    pub async fn send(&self, data: Vec<u8>) -> Result<()> {
        let mut offset = 0;
        while offset < data.len() {
            let op = Operation::SocketSend {
                fd: self.fd,
                buf: Buffer::from_vec(data[offset..].to_vec()),
            };
            let sent = match IoOpFuture::new(op).await? {
                Completion::SocketSent { bytes } => bytes,
                other => unreachable!("send produced {other:?}"),
            };
            if sent == 0 {
                return Err(Error::BrokenResource);
            }
            offset += sent;
        }
        Ok(())
    }

    pub async fn close(self) -> Result<()> {
        close_fd(self.fd).await
    }
}

fn sockaddr_storage_to_socket_addr(storage: &libc::sockaddr_storage) -> Result<SocketAddr> {
    match storage.ss_family as i32 {
        libc::AF_INET => {
            let sin = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
            let port = u16::from_be(sin.sin_port);
            Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }
        libc::AF_INET6 => {
            let sin6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            let port = u16::from_be(sin6.sin6_port);
            Ok(SocketAddr::V6(SocketAddrV6::new(
                ip,
                port,
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        family => Err(Error::runtime(format!("unsupported address family {family}"))),
    }
}

impl ByteReceiveSource for Connection {
    fn receive_raw(&self) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + '_>> {
        Box::pin(self.receive())
    }
}

impl ByteSendSource for Connection {
    fn send_raw(&self, data: Vec<u8>) -> Pin<Box<dyn Future<Output = Result<()>> + '_>> {
        Box::pin(self.send(data))
    }
}

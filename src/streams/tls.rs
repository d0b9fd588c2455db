//! A TLS stream adapter, wrapping any `ByteSendSource` transport with a
//! `rustls` connection. Handshake runs on `wrap_client`/`wrap_server`;
//! `close` attempts a clean `close_notify` under a shielded, short
//! deadline before giving up.

use std::cell::RefCell;
use std::future::Future;
use std::io::{BufReader, Read, Write};
use std::pin::Pin;
use std::sync::Arc;

use rustls::{Certificate, ClientConfig, ClientConnection, PrivateKey, ServerConfig, ServerConnection};

use crate::config::TLS_CLOSE_TIMEOUT_SECS;
use crate::deadline::move_on_after;
use crate::error::{Error, Result};
use crate::streams::buffered::{ByteReceiveSource, ByteSendSource};

/// A client config trusting the platform's native root store, falling back
/// to the bundled Mozilla roots if the platform store can't be read (e.g.
/// a minimal container with no system CA bundle).
pub fn default_client_config() -> Arc<ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    match rustls_native_certs::load_native_certs() {
        Ok(certs) => {
            for cert in certs {
                let _ = roots.add(&Certificate(cert.0));
            }
        }
        Err(_) => {
            roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
                rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
                    ta.subject,
                    ta.spki,
                    ta.name_constraints,
                )
            }));
        }
    }
    Arc::new(
        ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}

/// Builds a server config from a PEM certificate chain and private key.
pub fn load_server_config(cert_pem: &[u8], key_pem: &[u8]) -> Result<Arc<ServerConfig>> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_pem))
        .map_err(|e| Error::Tls(e.to_string()))?
        .into_iter()
        .map(Certificate)
        .collect();
    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut BufReader::new(key_pem))
        .map_err(|e| Error::Tls(e.to_string()))?;
    let key = keys
        .pop()
        .ok_or_else(|| Error::Tls("no private key found in PEM input".into()))?;
    let config = ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, PrivateKey(key))
        .map_err(tls_err)?;
    Ok(Arc::new(config))
}

enum Role {
    Client(ClientConnection),
    Server(ServerConnection),
}

impl Role {
    fn is_handshaking(&self) -> bool {
        match self {
            Role::Client(c) => c.is_handshaking(),
            Role::Server(c) => c.is_handshaking(),
        }
    }

    fn wants_write(&self) -> bool {
        match self {
            Role::Client(c) => c.wants_write(),
            Role::Server(c) => c.wants_write(),
        }
    }

    fn write_tls(&mut self, wr: &mut dyn Write) -> std::io::Result<usize> {
        match self {
            Role::Client(c) => c.write_tls(wr),
            Role::Server(c) => c.write_tls(wr),
        }
    }

    fn read_tls(&mut self, rd: &mut dyn Read) -> std::io::Result<usize> {
        match self {
            Role::Client(c) => c.read_tls(rd),
            Role::Server(c) => c.read_tls(rd),
        }
    }

    fn process_new_packets(&mut self) -> std::result::Result<(), rustls::Error> {
        match self {
            Role::Client(c) => c.process_new_packets().map(|_| ()),
            Role::Server(c) => c.process_new_packets().map(|_| ()),
        }
    }

    fn reader_read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Role::Client(c) => c.reader().read(buf),
            Role::Server(c) => c.reader().read(buf),
        }
    }

    fn writer_write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Role::Client(c) => c.writer().write_all(buf),
            Role::Server(c) => c.writer().write_all(buf),
        }
    }

    fn send_close_notify(&mut self) {
        match self {
            Role::Client(c) => c.send_close_notify(),
            Role::Server(c) => c.send_close_notify(),
        }
    }
}

fn tls_err(e: rustls::Error) -> Error {
    Error::Tls(e.to_string())
}

fn tls_io_err(e: std::io::Error) -> Error {
    Error::Tls(e.to_string())
}

/// A TLS-wrapped transport. Plaintext goes in and out through
/// [`receive`](TlsStream::receive)/[`send`](TlsStream::send); the raw
/// ciphertext travels over the wrapped `S`.
pub struct TlsStream<S> {
    transport: S,
    conn: RefCell<Role>,
}

impl<S: ByteSendSource> TlsStream<S> {
    /// Wraps `transport` as a TLS client and completes the handshake.
    pub async fn wrap_client(
        transport: S,
        server_name: rustls::ServerName,
        config: Arc<ClientConfig>,
    ) -> Result<Self> {
        let conn = ClientConnection::new(config, server_name).map_err(tls_err)?;
        let stream = Self {
            transport,
            conn: RefCell::new(Role::Client(conn)),
        };
        stream.handshake().await?;
        Ok(stream)
    }

    /// Wraps `transport` as a TLS server and completes the handshake.
    pub async fn wrap_server(transport: S, config: Arc<ServerConfig>) -> Result<Self> {
        let conn = ServerConnection::new(config).map_err(tls_err)?;
        let stream = Self {
            transport,
            conn: RefCell::new(Role::Server(conn)),
        };
        stream.handshake().await?;
        Ok(stream)
    }

    async fn flush_tls(&self) -> Result<()> {
        loop {
            if !self.conn.borrow().wants_write() {
                return Ok(());
            }
            let mut buf = Vec::new();
            self.conn
                .borrow_mut()
                .write_tls(&mut buf)
                .map_err(tls_io_err)?;
            if buf.is_empty() {
                return Ok(());
            }
            self.transport.send_raw(buf).await?;
        }
    }

    /// Reads one chunk of ciphertext off the transport and feeds it to
    /// the TLS state machine. Returns `false` at end of stream.
    async fn pump_read(&self) -> Result<bool> {
        let chunk = self.transport.receive_raw().await?;
        if chunk.is_empty() {
            return Ok(false);
        }
        let mut cursor = &chunk[..];
        self.conn
            .borrow_mut()
            .read_tls(&mut cursor)
            .map_err(tls_io_err)?;
        self.conn
            .borrow_mut()
            .process_new_packets()
            .map_err(tls_err)?;
        Ok(true)
    }

    async fn handshake(&self) -> Result<()> {
        while self.conn.borrow().is_handshaking() {
            self.flush_tls().await?;
            if self.conn.borrow().is_handshaking() && !self.pump_read().await? {
                return Err(Error::EndOfStream);
            }
        }
        self.flush_tls().await
    }

    /// Reads up to `max_bytes` of plaintext, pumping ciphertext off the
    /// transport as needed. An empty result means the peer closed.
    pub async fn receive(&self, max_bytes: usize) -> Result<Vec<u8>> {
        loop {
            let mut buf = vec![0u8; max_bytes];
            let n = match self.conn.borrow_mut().reader_read(&mut buf) {
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => 0,
                Err(e) => return Err(tls_io_err(e)),
            };
            if n > 0 {
                buf.truncate(n);
                return Ok(buf);
            }
            if !self.pump_read().await? {
                return Ok(Vec::new());
            }
        }
    }

    /// Encrypts and sends `data`.
    pub async fn send(&self, data: Vec<u8>) -> Result<()> {
        self.conn
            .borrow_mut()
            .writer_write_all(&data)
            .map_err(tls_io_err)?;
        self.flush_tls().await
    }

    /// Sends `close_notify` and waits briefly for the peer's own
    /// shutdown record, then returns regardless. Never leaves the
    /// connection half-shutdown indefinitely.
    pub async fn close(&self) -> Result<()> {
        self.conn.borrow_mut().send_close_notify();
        let _ = move_on_after(TLS_CLOSE_TIMEOUT_SECS, true, self.flush_tls()).await?;
        Ok(())
    }
}

impl<S: ByteSendSource> ByteReceiveSource for TlsStream<S> {
    fn receive_raw(&self) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + '_>> {
        Box::pin(self.receive(crate::config::DEFAULT_RECV_SIZE))
    }
}

impl<S: ByteSendSource> ByteSendSource for TlsStream<S> {
    fn send_raw(&self, data: Vec<u8>) -> Pin<Box<dyn Future<Output = Result<()>> + '_>> {
        Box::pin(self.send(data))
    }
}

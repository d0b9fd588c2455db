//! Runtime tunables.
//!
//! Kept as plain constants rather than a config file or environment
//! variables: the runtime has no persisted state and no CLI surface.

/// Fixed depth of the submission/completion ring.
pub const RING_DEPTH: u32 = 32;

/// Default `listen()` backlog for `create_server`.
pub const DEFAULT_SOCKET_BACKLOG: i32 = 128;

/// Default read size for `Connection::receive` when the caller doesn't ask
/// for a specific amount.
pub const DEFAULT_RECV_SIZE: usize = 65536;

/// Permission bits used for file opens with the `c` (create) mode flag.
pub const FILE_CREATE_MODE: u32 = 0o660;

/// Default buffered-byte-stream max read chunk for `receive`.
pub const DEFAULT_BUFFERED_READ: usize = 65536;

/// Initial capacity for the loop's task map, to cut down on early rehashes.
pub const INITIAL_TASK_CAPACITY: usize = 128;

/// How long `TlsStream::close` waits for the peer's close_notify before
/// giving up and closing the transport anyway.
pub const TLS_CLOSE_TIMEOUT_SECS: f64 = 3.0;

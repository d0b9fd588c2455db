//! Stream types built on top of the raw kernel ops in [`crate::op`]:
//! an in-process memory channel, a read-ahead buffering adapter, raw
//! socket connections, and a TLS adapter over any of the above.

pub mod buffered;
pub mod memory;
pub mod socket;
pub mod tls;

pub use buffered::{BufferedByteReceiveStream, BufferedByteStream, ByteReceiveSource, ByteSendSource};
pub use memory::{create_memory_object_stream, MemoryReceiver, MemorySender};
pub use socket::{connect, create_server, Connection, Server};
pub use tls::{default_client_config, load_server_config, TlsStream};

mod common;

use ringrt::{connect, create_server, run, spawn};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

#[test]
fn client_sends_and_server_echoes() {
    common::setup_tracing();

    let result = run(async {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 0);
        let server = create_server(addr).await?;
        let bound = server.local_addr()?;

        let server_task = spawn(async move {
            let conn = server.accept().await?;
            let data = conn.receive().await?;
            conn.send(data).await?;
            conn.close().await?;
            server.close().await?;
            Ok(())
        });

        let client = connect(bound).await?;
        client.send(b"hello".to_vec()).await?;
        let echoed = client.receive().await?;
        assert_eq!(echoed, b"hello");
        client.close().await?;

        server_task.await?;
        Ok(())
    });

    result.unwrap();
}

//! Server-wide shutdown scenario from spec §8 scenario 6: the `X` verb
//! drains every channel and the accept loop returns.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use serialbridge::server;

const PORT: u16 = 18453;

#[tokio::test]
async fn x_verb_shuts_the_whole_server_down() {
    let server_handle = tokio::spawn(server::run(PORT));

    // give the listener a moment to bind before connecting
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = TcpStream::connect(("127.0.0.1", PORT)).await.unwrap();
    client.write_all(b"X\n").await.unwrap();

    let mut buf = [0u8; 16];
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"OK\n");

    let result = tokio::time::timeout(Duration::from_secs(3), server_handle)
        .await
        .expect("server should shut down promptly after X")
        .unwrap();
    assert!(result.is_ok());
}

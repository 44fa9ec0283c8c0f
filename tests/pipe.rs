//! Byte-mover scenarios from spec §8: round-trip forwarding in both
//! directions, and the stuck-peer termination path.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use serialbridge::channel::{Channel, Role};
use serialbridge::pipe;
use serialbridge::ErrorKind;

use common::{AlwaysEmptySerial, FakeSerial};

async fn connected_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).await.unwrap();
    let (server, _) = listener.accept().await.unwrap();
    (client, server)
}

#[tokio::test]
async fn bytes_from_socket_reach_the_device() {
    let (mut client, mut server_stream) = connected_pair().await;
    let (fake, _device_tx, mut host_rx) = FakeSerial::new();
    let serial = Arc::new(tokio::sync::Mutex::new(Box::new(fake) as Box<dyn serialbridge::SerialPort>));
    let channel = Channel::new(0, "127.0.0.1:1".parse().unwrap(), Role::Data);

    let channel_for_pipe = channel.clone();
    let handle = tokio::spawn(async move { pipe::run(&channel_for_pipe, &mut server_stream, serial).await });

    client.write_all(b"hello serial").await.unwrap();
    let forwarded = host_rx.recv().await.unwrap();
    assert_eq!(forwarded, b"hello serial");

    channel.request_stop();
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
}

#[tokio::test]
async fn bytes_from_device_reach_the_socket() {
    let (mut client, mut server_stream) = connected_pair().await;
    let (fake, device_tx, _host_rx) = FakeSerial::new();
    let serial = Arc::new(tokio::sync::Mutex::new(Box::new(fake) as Box<dyn serialbridge::SerialPort>));
    let channel = Channel::new(0, "127.0.0.1:1".parse().unwrap(), Role::Data);

    let channel_for_pipe = channel.clone();
    let handle = tokio::spawn(async move { pipe::run(&channel_for_pipe, &mut server_stream, serial).await });

    device_tx.send(b"from the wire".to_vec()).unwrap();
    let mut buf = [0u8; 64];
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"from the wire");

    channel.request_stop();
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
}

#[tokio::test]
async fn stuck_serial_peer_fails_the_channel() {
    let (client, mut server_stream) = connected_pair().await;
    let serial = Arc::new(tokio::sync::Mutex::new(
        Box::new(AlwaysEmptySerial) as Box<dyn serialbridge::SerialPort>,
    ));
    let channel = Channel::new(0, "127.0.0.1:1".parse().unwrap(), Role::Data);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        pipe::run(&channel, &mut server_stream, serial),
    )
    .await
    .expect("pipe should terminate well before the timeout")
    .expect_err("a permanently empty-but-readable device must fail the channel");

    assert_eq!(result.kind(), ErrorKind::PeerStalled);
    drop(client);
}

#[tokio::test]
async fn socket_eof_ends_the_channel_cleanly() {
    let (client, mut server_stream) = connected_pair().await;
    let (fake, _device_tx, _host_rx) = FakeSerial::new();
    let serial = Arc::new(tokio::sync::Mutex::new(Box::new(fake) as Box<dyn serialbridge::SerialPort>));
    let channel = Channel::new(0, "127.0.0.1:1".parse().unwrap(), Role::Data);

    drop(client);
    let result = tokio::time::timeout(
        Duration::from_secs(2),
        pipe::run(&channel, &mut server_stream, serial),
    )
    .await
    .unwrap();
    assert!(result.is_ok());
}

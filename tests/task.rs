//! Spec §8 scenarios 3 and 4: multiple data channels sharing one owner's
//! serial port, and the owner-death cascade that tears the whole fan-out
//! down. This is the part spec.md §1 calls out as the hard part of the
//! system, so it gets its own coverage beyond the lower-level `pipe`/
//! `protocol` unit tests.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use serialbridge::channel::ChannelHandle;
use serialbridge::registry::Registry;
use serialbridge::server::Shutdown;
use serialbridge::{task, SerialPort};

use common::FakeSerial;

async fn connected_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).await.unwrap();
    let (server, _) = listener.accept().await.unwrap();
    (client, server)
}

/// Connects a socket pair, spawns a `ChannelTask` on the server side, and
/// waits for it to register so the test can grab its `ChannelHandle` and
/// mutate it directly (standing in for what a real `O`/`A` command over the
/// wire would do).
async fn spawn_channel_task(
    registry: &Arc<Registry>,
    shutdown: &Shutdown,
) -> (TcpStream, ChannelHandle, JoinHandle<()>) {
    let before: HashSet<u64> = registry.snapshot().await.iter().map(|c| c.id).collect();
    let (client, server_stream) = connected_pair().await;
    let peer = server_stream.peer_addr().unwrap();
    let handle = tokio::spawn(task::run(server_stream, peer, registry.clone(), shutdown.clone()));

    let channel = loop {
        if let Some(c) = registry.snapshot().await.into_iter().find(|c| !before.contains(&c.id)) {
            break c;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    (client, channel, handle)
}

#[tokio::test]
async fn owner_death_cascades_to_borrowers_and_pipes_terminate() {
    let registry = Arc::new(Registry::new());
    let (shutdown, _rx) = Shutdown::new();

    let (owner_client, owner_channel, owner_handle) = spawn_channel_task(&registry, &shutdown).await;
    let (fake, _device_tx, _host_rx) = FakeSerial::new();
    owner_channel.set_owned(Arc::new(tokio::sync::Mutex::new(Box::new(fake) as Box<dyn SerialPort>)));

    let (b1_client, b1_channel, b1_handle) = spawn_channel_task(&registry, &shutdown).await;
    b1_channel.set_attached(owner_channel.serial().unwrap());

    let (b2_client, b2_channel, b2_handle) = spawn_channel_task(&registry, &shutdown).await;
    b2_channel.set_attached(owner_channel.serial().unwrap());

    assert_eq!(registry.len().await, 3);

    // Give both borrowers' control loops a chance to notice role=Data and
    // fall through into their pipe loop before the owner dies.
    tokio::time::sleep(Duration::from_millis(1100)).await;

    // Kill the owner's connection: its control loop sees EOF, returns with
    // role still Control, and task::run runs the mark-borrowers cascade.
    drop(owner_client);
    tokio::time::timeout(Duration::from_secs(2), owner_handle)
        .await
        .expect("owner task should exit promptly on disconnect")
        .unwrap();

    // Both borrowers must observe running=false and return within about one
    // tick of the owner closing the device (spec §8 scenario 4: "within 1s").
    tokio::time::timeout(Duration::from_secs(3), b1_handle)
        .await
        .expect("borrower 1 should terminate after owner death")
        .unwrap();
    tokio::time::timeout(Duration::from_secs(3), b2_handle)
        .await
        .expect("borrower 2 should terminate after owner death")
        .unwrap();

    assert_eq!(registry.len().await, 0);
    drop(b1_client);
    drop(b2_client);
}

#[tokio::test]
async fn dual_data_channels_share_the_device_and_both_forward_to_it() {
    let registry = Arc::new(Registry::new());
    let (shutdown, _rx) = Shutdown::new();

    let (owner_client, owner_channel, owner_handle) = spawn_channel_task(&registry, &shutdown).await;
    let (fake, _device_tx, mut host_rx) = FakeSerial::new();
    owner_channel.set_owned(Arc::new(tokio::sync::Mutex::new(Box::new(fake) as Box<dyn SerialPort>)));

    let (mut b1_client, b1_channel, b1_handle) = spawn_channel_task(&registry, &shutdown).await;
    b1_channel.set_attached(owner_channel.serial().unwrap());

    let (mut b2_client, b2_channel, b2_handle) = spawn_channel_task(&registry, &shutdown).await;
    b2_channel.set_attached(owner_channel.serial().unwrap());

    assert!(Arc::ptr_eq(
        &b1_channel.serial().unwrap(),
        &b2_channel.serial().unwrap()
    ));

    tokio::time::sleep(Duration::from_millis(1100)).await;

    b1_client.write_all(b"from-b1").await.unwrap();
    b2_client.write_all(b"from-b2").await.unwrap();

    let mut seen = vec![host_rx.recv().await.unwrap(), host_rx.recv().await.unwrap()];
    seen.sort();
    assert_eq!(seen, vec![b"from-b1".to_vec(), b"from-b2".to_vec()]);

    owner_channel.request_stop();
    b1_channel.request_stop();
    b2_channel.request_stop();
    drop(owner_client);
    drop(b1_client);
    drop(b2_client);

    let _ = tokio::time::timeout(Duration::from_secs(2), owner_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(2), b1_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(2), b2_handle).await;
}

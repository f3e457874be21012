//! Complete transfers: handshake plus transfer loop, from a file or any other byte source, to
//!  a file or any other byte sink.

use std::net::SocketAddr;
use std::path::Path;
use anyhow::Context;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite, BufWriter};
use tracing::info;
use crate::config::TransferConfig;
use crate::handshake::{accept, initiate};
use crate::random::RngRandom;
use crate::receive_loop::{receive_loop, ReceiveStats};
use crate::send_loop::{send_loop, SendStats};
use crate::socket::DatagramSocket;

/// Sends the first `bytes_to_transfer` bytes of the file at `path` to a receiver listening at
///  `peer_addr`. If the file is shorter, its actual length is transferred instead.
pub async fn send_file<S: DatagramSocket + ?Sized>(
    socket: &S,
    peer_addr: SocketAddr,
    path: impl AsRef<Path>,
    bytes_to_transfer: u64,
    config: &TransferConfig,
) -> anyhow::Result<SendStats> {
    let path = path.as_ref();

    let mut file = File::open(path).await
        .with_context(|| format!("opening {} for reading", path.display()))?;
    let file_len = file.metadata().await
        .with_context(|| format!("reading metadata of {}", path.display()))?
        .len();

    let bytes_to_transfer = if bytes_to_transfer > file_len {
        info!("{} has only {} bytes - transferring those instead of {}", path.display(), file_len, bytes_to_transfer);
        file_len
    }
    else {
        bytes_to_transfer
    };

    send_from(socket, peer_addr, &mut file, bytes_to_transfer, config).await
}

/// Receives a transfer into the file at `path`, which is created or truncated before waiting
///  for a sender. `write_rate` limits the average write rate in bytes per second, 0 meaning
///  unlimited.
pub async fn receive_file<S: DatagramSocket + ?Sized>(
    socket: &S,
    path: impl AsRef<Path>,
    write_rate: u64,
    config: &TransferConfig,
) -> anyhow::Result<ReceiveStats> {
    let path = path.as_ref();

    let file = File::create(path).await
        .with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    receive_into(socket, &mut writer, write_rate, config).await
        .with_context(|| format!("receiving into {}", path.display()))
}

pub async fn send_from<S, R>(
    socket: &S,
    peer_addr: SocketAddr,
    source: &mut R,
    bytes_to_transfer: u64,
    config: &TransferConfig,
) -> anyhow::Result<SendStats>
where
    S: DatagramSocket + ?Sized,
    R: AsyncRead + Unpin + ?Sized,
{
    config.validate()?;
    let session = initiate::<RngRandom, S>(socket, peer_addr, config).await?;
    send_loop(socket, &session, source, bytes_to_transfer, config).await
}

pub async fn receive_into<S, W>(
    socket: &S,
    sink: &mut W,
    write_rate: u64,
    config: &TransferConfig,
) -> anyhow::Result<ReceiveStats>
where
    S: DatagramSocket + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    config.validate()?;
    let accepted = accept::<RngRandom, S>(socket, config).await?;
    receive_loop(socket, &accepted.session, accepted.early_data, sink, write_rate, config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::net::UdpSocket;
    use uuid::Uuid;
    use crate::send_loop::RetriesExhausted;
    use crate::test_util::channel_socket::{ChannelSocket, Fault};

    /// deletes the file when dropped
    struct TempFile(PathBuf);
    impl TempFile {
        fn new() -> TempFile {
            TempFile(std::env::temp_dir().join(format!("udpxfer-test-{}", Uuid::new_v4())))
        }
        fn with_content(content: &[u8]) -> TempFile {
            let result = TempFile::new();
            std::fs::write(&result.0, content).unwrap();
            result
        }
        fn content(&self) -> Vec<u8> {
            std::fs::read(&self.0).unwrap()
        }
    }
    impl Drop for TempFile {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    fn source_data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    async fn bind_loopback() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").await.unwrap()
    }

    async fn transfer_over_udp(source: &TempFile, destination: &TempFile, bytes_to_transfer: u64) -> (SendStats, ReceiveStats) {
        let receiver_socket = bind_loopback().await;
        let receiver_addr = receiver_socket.local_addr().unwrap();
        let destination_path = destination.0.clone();
        let receiver = tokio::spawn(async move {
            receive_file(&receiver_socket, destination_path, 0, &TransferConfig::default()).await
        });

        let sender_socket = bind_loopback().await;
        let send_stats = tokio::time::timeout(
            Duration::from_secs(30),
            send_file(&sender_socket, receiver_addr, &source.0, bytes_to_transfer, &TransferConfig::default()),
        ).await.unwrap().unwrap();

        let receive_stats = tokio::time::timeout(Duration::from_secs(30), receiver)
            .await.unwrap().unwrap().unwrap();
        (send_stats, receive_stats)
    }

    #[tokio::test]
    async fn test_20000_bytes_over_udp() {
        let data = source_data(20_000);
        let source = TempFile::with_content(&data);
        let destination = TempFile::new();

        let (send_stats, receive_stats) = transfer_over_udp(&source, &destination, 20_000).await;

        assert_eq!(destination.content(), data);
        assert_eq!(send_stats.bytes_sent, 20_000);
        assert_eq!(send_stats.packets_sent, 3);
        assert_eq!(receive_stats.bytes_written, 20_000);
        assert_eq!(receive_stats.packets_written, 3);
    }

    #[tokio::test]
    async fn test_prefix_over_udp() {
        let data = source_data(20_000);
        let source = TempFile::with_content(&data);
        let destination = TempFile::new();

        transfer_over_udp(&source, &destination, 12_345).await;

        assert_eq!(destination.content(), data[..12_345].to_vec());
    }

    #[tokio::test]
    async fn test_clamped_to_file_len() {
        let data = source_data(1000);
        let source = TempFile::with_content(&data);
        let destination = TempFile::new();

        let (send_stats, _) = transfer_over_udp(&source, &destination, 5000).await;

        assert_eq!(destination.content(), data);
        assert_eq!(send_stats.bytes_sent, 1000);
    }

    #[tokio::test]
    async fn test_empty_transfer() {
        let source = TempFile::with_content(&source_data(1000));
        // existing content is truncated
        let destination = TempFile::with_content(b"previous content");

        let (send_stats, receive_stats) = transfer_over_udp(&source, &destination, 0).await;

        assert!(destination.content().is_empty());
        assert_eq!(send_stats.packets_sent, 1);
        assert_eq!(receive_stats.packets_written, 1);
    }

    #[tokio::test]
    async fn test_sender_started_first() {
        let data = source_data(10_000);
        let source = TempFile::with_content(&data);
        let destination = TempFile::new();

        // reserve a port, then release it for the receiver to bind later
        let receiver_addr = bind_loopback().await.local_addr().unwrap();

        let source_path = source.0.clone();
        let sender = tokio::spawn(async move {
            let sender_socket = bind_loopback().await;
            send_file(&sender_socket, receiver_addr, source_path, 10_000, &TransferConfig::default()).await
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        let receiver_socket = UdpSocket::bind(receiver_addr).await.unwrap();
        let receive_stats = tokio::time::timeout(
            Duration::from_secs(30),
            receive_file(&receiver_socket, &destination.0, 0, &TransferConfig::default()),
        ).await.unwrap().unwrap();

        let send_stats = tokio::time::timeout(Duration::from_secs(30), sender)
            .await.unwrap().unwrap().unwrap();

        assert_eq!(destination.content(), data);
        assert_eq!(send_stats.bytes_sent, 10_000);
        assert_eq!(receive_stats.bytes_written, 10_000);
    }

    #[tokio::test]
    async fn test_missing_source_file() {
        let socket = bind_loopback().await;
        let missing = TempFile::new();
        let result = send_file(&socket, "127.0.0.1:9".parse().unwrap(), &missing.0, 100, &TransferConfig::default()).await;

        let message = format!("{:#}", result.unwrap_err());
        assert!(message.starts_with("opening"), "{}", message);
    }

    #[tokio::test]
    async fn test_invalid_config() {
        let socket = bind_loopback().await;
        let source = TempFile::with_content(&source_data(10));
        let config = TransferConfig {
            max_payload_len: 0,
            ..TransferConfig::default()
        };
        assert!(send_file(&socket, "127.0.0.1:9".parse().unwrap(), &source.0, 10, &config).await.is_err());
    }

    fn sender_addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 1000))
    }
    fn receiver_addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 2000))
    }

    fn small_packets() -> TransferConfig {
        TransferConfig {
            max_payload_len: 1000,
            ..TransferConfig::default()
        }
    }

    async fn transfer_over_channel(sender_socket: ChannelSocket, receiver_socket: ChannelSocket, data: &[u8]) -> (SendStats, ReceiveStats, Vec<u8>) {
        let receiver = tokio::spawn(async move {
            let mut sink: Vec<u8> = Vec::new();
            let stats = receive_into(&receiver_socket, &mut sink, 0, &small_packets()).await.unwrap();
            (stats, sink)
        });

        let send_stats = send_from(&sender_socket, receiver_addr(), &mut Cursor::new(data), data.len() as u64, &small_packets()).await.unwrap();
        let (receive_stats, sink) = receiver.await.unwrap();
        (send_stats, receive_stats, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_lossy_channel() {
        let (sender_socket, receiver_socket) = ChannelSocket::pair(sender_addr(), receiver_addr());
        let mut sender_counter = 0;
        let sender_socket = sender_socket.with_fault(move |_| {
            sender_counter += 1;
            if sender_counter % 3 == 0 { Fault::Drop } else { Fault::Deliver }
        });
        let mut receiver_counter = 0;
        let receiver_socket = receiver_socket.with_fault(move |_| {
            receiver_counter += 1;
            if receiver_counter % 4 == 0 { Fault::Drop } else { Fault::Deliver }
        });

        let data = source_data(25_500);
        let (send_stats, receive_stats, sink) = transfer_over_channel(sender_socket, receiver_socket, &data).await;

        assert_eq!(sink, data);
        assert_eq!(send_stats.packets_sent, 26);
        assert!(send_stats.retransmissions > 0);
        assert_eq!(receive_stats.packets_written, 26);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicating_channel() {
        let (sender_socket, receiver_socket) = ChannelSocket::pair(sender_addr(), receiver_addr());
        let mut counter = 0;
        // Syn, Ack, then the second data packet is duplicated
        let sender_socket = sender_socket.with_fault(move |_| {
            counter += 1;
            if counter == 4 { Fault::Duplicate } else { Fault::Deliver }
        });

        let data = source_data(10_000);
        let (send_stats, receive_stats, sink) = transfer_over_channel(sender_socket, receiver_socket, &data).await;

        assert_eq!(sink, data);
        assert_eq!(receive_stats.packets_written, 10);
        assert!(receive_stats.duplicates_discarded > 0);
        assert!(send_stats.retransmissions > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receiver_disappears() {
        let (sender_socket, receiver_socket) = ChannelSocket::pair(sender_addr(), receiver_addr());
        let sender_log = sender_socket.send_log();

        let receiver = tokio::spawn(async move {
            accept::<RngRandom, _>(&receiver_socket, &small_packets()).await.unwrap();
            // the socket is dropped here
        });

        let data = source_data(5000);
        let result = send_from(&sender_socket, receiver_addr(), &mut Cursor::new(&data), 5000, &small_packets()).await;
        receiver.await.unwrap();

        assert!(result.unwrap_err().downcast_ref::<RetriesExhausted>().is_some());

        // Syn, Ack, then the first data packet and its three retransmissions - and nothing more
        let log = sender_log.snapshot();
        assert_eq!(log.len(), 6);
        assert!(log[2..].iter().all(|s| s.data == log[2].data));
        assert_eq!(log[5].at - log[2].at, Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_final_ack_strands_sender() {
        let (sender_socket, receiver_socket) = ChannelSocket::pair(sender_addr(), receiver_addr());
        let mut counter = 0;
        // SynAck, then the DataAck for the only data packet
        let receiver_socket = receiver_socket.with_fault(move |_| {
            counter += 1;
            if counter == 2 { Fault::Drop } else { Fault::Deliver }
        });

        let receiver = tokio::spawn(async move {
            let mut sink: Vec<u8> = Vec::new();
            let result = receive_into(&receiver_socket, &mut sink, 0, &small_packets()).await;
            (result, sink)
        });

        let data = source_data(10);
        let send_result = send_from(&sender_socket, receiver_addr(), &mut Cursor::new(&data), 10, &small_packets()).await;
        let (receive_result, sink) = receiver.await.unwrap();

        assert_eq!(receive_result.unwrap().packets_written, 1);
        assert_eq!(sink, data);
        assert!(send_result.unwrap_err().downcast_ref::<RetriesExhausted>().is_some());
    }
}

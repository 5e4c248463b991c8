mod common;

use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use common::EchoServer;
use mill_rdma::{interrupt, Error, ProtocolFamily, Provider, ReadOutcome};

#[test]
fn test_socket_adaptor_echo() {
    let server = EchoServer::start(Duration::ZERO);
    let provider = Provider::default();
    let mut socket = provider.open_socket(ProtocolFamily::Inet).unwrap();
    socket
        .connect_timeout(server.addr(), Duration::from_secs(5))
        .unwrap();
    assert!(socket.is_connected());

    let payload: Vec<u8> = (0..=255u8).cycle().take(64 * 1024).collect();
    let writer = {
        let payload = payload.clone();
        let channel = socket.channel().clone();
        thread::spawn(move || channel.write(&payload).unwrap())
    };

    let mut echoed = vec![0u8; payload.len()];
    socket.read_exact(&mut echoed).unwrap();
    assert_eq!(writer.join().unwrap(), payload.len());
    assert_eq!(echoed, payload);

    socket.shutdown_output().unwrap();
    let mut rest = Vec::new();
    socket.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());
}

#[test]
fn test_close_unblocks_reader() {
    let server = EchoServer::start(Duration::ZERO);
    let provider = Provider::default();
    let channel = provider.open_socket_channel(ProtocolFamily::Inet).unwrap();
    channel.connect(server.addr()).unwrap();

    let reader = {
        let channel = channel.clone();
        thread::spawn(move || channel.read(&mut [0u8; 16]))
    };
    thread::sleep(Duration::from_millis(100));
    channel.close();

    match reader.join().unwrap() {
        Err(err) => assert!(matches!(err, Error::AsynchronousClose)),
        Ok(outcome) => panic!("read returned {:?} after close", outcome),
    }
}

#[test]
fn test_close_unblocks_accept() {
    let provider = Provider::default();
    let server = provider
        .open_server_socket_channel(ProtocolFamily::Inet)
        .unwrap();
    server.bind(Some("127.0.0.1:0".parse().unwrap()), None).unwrap();

    let acceptor = {
        let server = server.clone();
        thread::spawn(move || server.accept().map(|accepted| accepted.is_some()))
    };
    thread::sleep(Duration::from_millis(100));
    server.close();

    match acceptor.join().unwrap() {
        Err(err) => assert!(matches!(err, Error::AsynchronousClose)),
        Ok(accepted) => panic!("accept returned {} after close", accepted),
    }
}

#[test]
fn test_close_unblocks_writer() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let provider = Provider::default();
    let channel = provider.open_socket_channel(ProtocolFamily::Inet).unwrap();
    channel.connect(listener.local_addr().unwrap()).unwrap();
    // accepted but never read, so the send path fills up
    let (_peer, _) = listener.accept().unwrap();

    let writer = {
        let channel = channel.clone();
        thread::spawn(move || channel.write(&vec![0x5a; 64 * 1024 * 1024]))
    };
    thread::sleep(Duration::from_millis(200));
    channel.close();

    match writer.join().unwrap() {
        Err(err) => assert!(matches!(err, Error::AsynchronousClose)),
        Ok(written) => panic!("write returned {} after close", written),
    }
}

#[test]
fn test_interrupt_closes_channel() {
    let server = EchoServer::start(Duration::ZERO);
    let provider = Provider::default();
    let channel = provider.open_socket_channel(ProtocolFamily::Inet).unwrap();
    channel.connect(server.addr()).unwrap();

    let (tx, rx) = std::sync::mpsc::channel();
    let reader = {
        let channel = channel.clone();
        thread::spawn(move || {
            tx.send(interrupt::current()).unwrap();
            let result = channel.read(&mut [0u8; 16]);
            (result, interrupt::interrupted())
        })
    };
    let target = rx.recv().unwrap();
    thread::sleep(Duration::from_millis(100));
    target.interrupt();

    let (result, status) = reader.join().unwrap();
    assert!(matches!(result, Err(Error::ClosedByInterrupt)));
    assert!(status);
    assert!(!channel.is_open());
}

#[test]
fn test_server_adaptor_accepts() {
    let provider = Provider::default();
    let server = provider.open_server_socket(ProtocolFamily::Inet).unwrap();
    let addr = server
        .bind(Some("127.0.0.1:0".parse().unwrap()), Some(8))
        .unwrap();

    let client = {
        let provider = provider.clone();
        thread::spawn(move || {
            let mut socket = provider.open_socket(ProtocolFamily::Inet).unwrap();
            socket.connect(addr).unwrap();
            socket.write_all(b"over rdma").unwrap();
            socket.local_addr().unwrap().unwrap()
        })
    };

    let (mut accepted, peer) = server.accept().unwrap();
    let mut buf = [0u8; 9];
    accepted.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"over rdma");
    assert_eq!(client.join().unwrap(), peer);
}

#[test]
fn test_eof_after_peer_close() {
    let provider = Provider::default();
    let server = provider
        .open_server_socket_channel(ProtocolFamily::Inet)
        .unwrap();
    let addr = server.bind(Some("127.0.0.1:0".parse().unwrap()), None).unwrap();

    let client = provider.open_socket_channel(ProtocolFamily::Inet).unwrap();
    client.connect(addr).unwrap();
    let accepted = server.accept().unwrap().unwrap();
    accepted.close();

    assert_eq!(
        client.read(&mut [0u8; 8]).unwrap(),
        ReadOutcome::EndOfStream
    );
}

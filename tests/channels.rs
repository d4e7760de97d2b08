/*
 * mnio - non-blocking channels, byte buffers and a readiness selector
 * This is free and unencumbered software released into the public domain.
 */
mod common;

use std::time::Duration;

use mnio_rs::{ByteBuffer, DatagramChannel, Interest, ListeningChannel, NioError, ReadStatus, RegistrationError};
use mnio_rs::{GatheringByteChannel, ReadableByteChannel, ScatteringByteChannel, SelectableChannel, Selector, StreamChannel, WritableByteChannel};

use common::{eventually, init_logger, loopback, non_blocking, stream_pair};

#[test]
fn test_empty_read_returns_zero() {
    init_logger();
    let (_client, server) = stream_pair();
    let mut server = non_blocking(server);
    let mut buffer = ByteBuffer::allocate(16);
    assert_eq!(server.read(&mut buffer).unwrap(), ReadStatus::Read(0));
    assert_eq!(buffer.position(), 0);
}

#[test]
fn test_end_of_stream_is_reported_once() {
    init_logger();
    let (mut client, server) = stream_pair();
    let mut server = non_blocking(server);
    client.write(&mut ByteBuffer::from(&b"bye"[..])).unwrap();
    client.shutdown_output().unwrap();

    let mut buffer = ByteBuffer::allocate(16);
    eventually(|| match server.read(&mut buffer).unwrap() {
        ReadStatus::EndOfStream => Some(()),
        ReadStatus::Read(_) => None,
    });
    buffer.flip();
    assert_eq!(buffer.readable(), b"bye");
    assert!(matches!(server.read(&mut buffer), Err(NioError::ClosedChannel)));
}

#[test]
fn test_blocking_read_times_out() {
    init_logger();
    let (_client, mut server) = stream_pair();
    assert!(server.is_blocking());
    server.set_blocking_timeout(Some(Duration::from_millis(100)));
    let mut buffer = ByteBuffer::allocate(16);
    assert!(matches!(server.read(&mut buffer), Err(NioError::TimedOut)));
}

#[test]
fn test_blocking_read_waits_for_data() {
    init_logger();
    let (mut client, mut server) = stream_pair();
    let writer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        client.write(&mut ByteBuffer::from(&b"late"[..])).unwrap();
        client
    });
    let mut buffer = ByteBuffer::allocate(16);
    let status = server.read(&mut buffer).unwrap();
    assert!(status.count() > 0);
    drop(writer.join().unwrap());
}

#[test]
fn test_scatter_gather() {
    init_logger();
    let (mut client, mut server) = stream_pair();
    let mut sources = [ByteBuffer::from(&b"ab"[..]), ByteBuffer::from(&b"cde"[..])];
    assert_eq!(client.write_gathering(&mut sources).unwrap(), 5);
    assert!(sources.iter().all(|buffer| !buffer.has_remaining()));

    let mut targets = [ByteBuffer::allocate(2), ByteBuffer::allocate(3)];
    let mut total = 0;
    while total < 5 {
        total += server.read_scattering(&mut targets).unwrap().count();
    }
    for target in targets.iter_mut() {
        target.flip();
    }
    assert_eq!(targets[0].readable(), b"ab");
    assert_eq!(targets[1].readable(), b"cde");
}

#[test]
fn test_non_blocking_connect() {
    init_logger();
    let mut listener = ListeningChannel::bind(loopback()).unwrap();
    let mut client = StreamChannel::connect_nonblocking(listener.local_addr().unwrap()).unwrap();
    assert!(!client.is_blocking());
    eventually(|| client.finish_connect().unwrap().then_some(()));
    assert!(client.is_connected());
    assert!(!client.is_connection_pending());
    let accepted = listener.accept().unwrap().unwrap();
    assert_eq!(accepted.peer_addr().unwrap(), client.local_addr().unwrap());
}

#[test]
fn test_closed_channel() {
    init_logger();
    let (mut client, _server) = stream_pair();
    client.close();
    client.close();
    assert!(!client.is_open());
    assert!(matches!(client.write(&mut ByteBuffer::from(&b"x"[..])), Err(NioError::ClosedChannel)));
    assert!(matches!(client.read(&mut ByteBuffer::allocate(1)), Err(NioError::ClosedChannel)));
    assert!(matches!(client.configure_blocking(false), Err(NioError::ClosedChannel)));
}

#[test]
fn test_blocking_mode_while_registered() {
    init_logger();
    let mut selector = Selector::<()>::new().unwrap();
    let (_client, server) = stream_pair();
    let mut server = non_blocking(server);
    selector.register(&mut server, Interest::READABLE, ()).unwrap();
    assert!(matches!(server.configure_blocking(true), Err(NioError::Registration(RegistrationError::Blocking))));
    server.cancel();
    server.configure_blocking(true).unwrap();
}

#[test]
fn test_datagram_round_trip() {
    init_logger();
    let mut receiver = DatagramChannel::bind(loopback()).unwrap();
    let mut sender = DatagramChannel::bind(loopback()).unwrap();
    let sent = sender.send(&mut ByteBuffer::from(&b"payload"[..]), receiver.local_addr().unwrap()).unwrap();
    assert_eq!(sent, 7);

    let mut buffer = ByteBuffer::allocate(64);
    let peer = receiver.receive(&mut buffer).unwrap();
    assert_eq!(peer, Some(sender.local_addr().unwrap()));
    buffer.flip();
    assert_eq!(buffer.readable(), b"payload");
}

#[test]
fn test_datagram_receive_without_data() {
    init_logger();
    let mut socket = non_blocking(DatagramChannel::open().unwrap());
    let mut buffer = ByteBuffer::allocate(8);
    assert_eq!(socket.receive(&mut buffer).unwrap(), None);
}

#[test]
fn test_connected_datagram() {
    init_logger();
    let mut first = DatagramChannel::bind(loopback()).unwrap();
    let mut second = DatagramChannel::bind(loopback()).unwrap();
    first.connect(second.local_addr().unwrap()).unwrap();
    second.connect(first.local_addr().unwrap()).unwrap();
    assert!(first.is_connected());

    first.write(&mut ByteBuffer::from(&b"ping"[..])).unwrap();
    let mut buffer = ByteBuffer::allocate(8);
    assert_eq!(second.read(&mut buffer).unwrap(), ReadStatus::Read(4));
}

#[cfg(unix)]
#[test]
fn test_pipe() {
    init_logger();
    let (mut sink, source) = mnio_rs::pipe().unwrap();
    let mut source = non_blocking(source);
    let mut buffer = ByteBuffer::allocate(16);
    assert_eq!(source.read(&mut buffer).unwrap(), ReadStatus::Read(0));

    assert_eq!(sink.write(&mut ByteBuffer::from(&b"hello"[..])).unwrap(), 5);
    sink.close();
    assert_eq!(source.read(&mut buffer).unwrap(), ReadStatus::Read(5));
    assert_eq!(source.read(&mut buffer).unwrap(), ReadStatus::EndOfStream);
    assert!(matches!(source.read(&mut buffer), Err(NioError::ClosedChannel)));
}

#[cfg(unix)]
#[test]
fn test_pipe_interest_is_one_sided() {
    init_logger();
    let mut selector = Selector::<()>::new().unwrap();
    let (sink, source) = mnio_rs::pipe().unwrap();
    let (mut sink, mut source) = (non_blocking(sink), non_blocking(source));
    assert!(selector.register(&mut sink, Interest::READABLE, ()).is_err());
    assert!(selector.register(&mut source, Interest::WRITABLE, ()).is_err());
    selector.register(&mut sink, Interest::WRITABLE, ()).unwrap();
    selector.register(&mut source, Interest::READABLE, ()).unwrap();
}

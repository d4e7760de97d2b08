/*
 * mnio - non-blocking channels, byte buffers and a readiness selector
 * This is free and unencumbered software released into the public domain.
 */
#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use mnio_rs::{ListeningChannel, SelectableChannel, StreamChannel};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn loopback() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
}

/// A connected pair of stream channels, both in blocking mode.
pub fn stream_pair() -> (StreamChannel, StreamChannel) {
    let mut listener = ListeningChannel::bind(loopback()).unwrap();
    listener.set_blocking_timeout(Some(Duration::from_secs(10)));
    let client = StreamChannel::connect(listener.local_addr().unwrap()).unwrap();
    let server = listener.accept().unwrap().unwrap();
    (client, server)
}

pub fn non_blocking<C: SelectableChannel>(mut channel: C) -> C {
    channel.configure_blocking(false).unwrap();
    channel
}

/// Retries `op` until it yields a value, for at most five seconds.
pub fn eventually<T, F: FnMut() -> Option<T>>(mut op: F) -> T {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(value) = op() {
            return value;
        }
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}

/*
 * mnio - non-blocking channels, byte buffers and a readiness selector
 * This is free and unencumbered software released into the public domain.
 */
mod common;

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};

use mnio_rs::{ByteBuffer, FileChannel, MapMode, NioError, ReadStatus};
use mnio_rs::{GatheringByteChannel, ReadableByteChannel, ScatteringByteChannel, WritableByteChannel};

use tempfile::{tempdir, NamedTempFile};

use common::{init_logger, stream_pair};

fn read_write() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true);
    options
}

fn file_with(content: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_read_and_write_at_position() {
    init_logger();
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.bin");
    let mut channel = FileChannel::open(&path, &read_write()).unwrap();

    assert_eq!(channel.write(&mut ByteBuffer::from(&b"0123456789"[..])).unwrap(), 10);
    assert_eq!(channel.position().unwrap(), 10);
    assert_eq!(channel.size().unwrap(), 10);

    channel.set_position(4).unwrap();
    let mut buffer = ByteBuffer::allocate(3);
    assert_eq!(channel.read(&mut buffer).unwrap(), ReadStatus::Read(3));
    buffer.flip();
    assert_eq!(buffer.readable(), b"456");

    channel.set_position(10).unwrap();
    buffer.clear();
    assert_eq!(channel.read(&mut buffer).unwrap(), ReadStatus::EndOfStream);
    assert_eq!(channel.read(&mut buffer).unwrap(), ReadStatus::EndOfStream);
}

#[test]
fn test_truncate() {
    init_logger();
    let file = file_with(b"abcdefgh");
    let mut channel = FileChannel::open(file.path(), &read_write()).unwrap();
    channel.set_position(6).unwrap();
    channel.truncate(4).unwrap();
    assert_eq!(channel.size().unwrap(), 4);
    assert_eq!(channel.position().unwrap(), 4);
    channel.truncate(100).unwrap();
    assert_eq!(channel.size().unwrap(), 4);
    channel.force(true).unwrap();
}

#[test]
fn test_scatter_gather() {
    init_logger();
    let dir = tempdir().unwrap();
    let mut channel = FileChannel::open(dir.path().join("parts.bin"), &read_write()).unwrap();
    let mut parts = [ByteBuffer::from(&b"head"[..]), ByteBuffer::from(&b"body"[..])];
    assert_eq!(channel.write_gathering(&mut parts).unwrap(), 8);

    channel.set_position(0).unwrap();
    let mut targets = [ByteBuffer::allocate(4), ByteBuffer::allocate(4)];
    assert_eq!(channel.read_scattering(&mut targets).unwrap(), ReadStatus::Read(8));
    targets[1].flip();
    assert_eq!(targets[1].readable(), b"body");
}

#[test]
fn test_transfer_between_files() {
    init_logger();
    let source_file = file_with(b"the quick brown fox");
    let dir = tempdir().unwrap();
    let target_path = dir.path().join("copy.txt");

    let mut source = FileChannel::open(source_file.path(), &read_write()).unwrap();
    let mut target = FileChannel::open(&target_path, &read_write()).unwrap();
    assert_eq!(source.transfer_to(4, 11, &mut target).unwrap(), 11);
    assert_eq!(source.position().unwrap(), 0);
    assert_eq!(source.transfer_to(100, 5, &mut target).unwrap(), 0);
    drop(target);
    assert_eq!(fs::read(&target_path).unwrap(), b"quick brown");

    let mut copy = FileChannel::open(&target_path, &read_write()).unwrap();
    assert_eq!(copy.transfer_from(&mut source, 0, 3).unwrap(), 3);
    assert_eq!(copy.position().unwrap(), 0);
    drop(copy);
    assert_eq!(fs::read(&target_path).unwrap(), b"theck brown");
}

#[test]
fn test_transfer_to_socket() {
    init_logger();
    let file = file_with(b"file content over a socket");
    let mut channel = FileChannel::open(file.path(), &read_write()).unwrap();
    let (mut client, mut server) = stream_pair();
    assert_eq!(channel.transfer_to(0, 1024, &mut client).unwrap(), 26);
    drop(client);

    let dir = tempdir().unwrap();
    let mut sink = FileChannel::open(dir.path().join("received"), &read_write()).unwrap();
    let total = sink.transfer_from(&mut server, 0, 1024).unwrap();
    assert_eq!(total, 26);
    assert_eq!(sink.size().unwrap(), 26);
}

#[test]
fn test_map_read_write() {
    init_logger();
    let file = file_with(b"mapped!");
    let channel = FileChannel::open(file.path(), &read_write()).unwrap();
    let mut mapped = channel.map(MapMode::ReadWrite, 0, 16).unwrap();
    assert!(mapped.is_direct());
    assert_eq!(mapped.capacity(), 16);
    assert_eq!(channel.size().unwrap(), 16);
    assert_eq!(mapped.get(7).unwrap(), b"mapped!");

    mapped.put(b"+more").unwrap();
    mapped.force().unwrap();
    assert_eq!(&fs::read(file.path()).unwrap()[..12], b"mapped!+more");
}

#[test]
fn test_map_read_only_and_private() {
    init_logger();
    let file = file_with(b"constant");
    let channel = FileChannel::open(file.path(), &read_write()).unwrap();

    let mut read_only = channel.map(MapMode::ReadOnly, 0, 8).unwrap();
    assert!(read_only.is_read_only());
    assert!(matches!(read_only.put(b"x"), Err(NioError::ReadOnlyBuffer)));
    assert_eq!(read_only.get(8).unwrap(), b"constant");

    let mut private = channel.map(MapMode::Private, 0, 8).unwrap();
    private.put(b"CON").unwrap();
    assert_eq!(fs::read(file.path()).unwrap(), b"constant");

    assert_eq!(channel.map(MapMode::ReadOnly, 0, 0).unwrap().capacity(), 0);
}

#[test]
fn test_map_past_largest_offset() {
    init_logger();
    let file = file_with(b"tiny");
    let channel = FileChannel::open(file.path(), &read_write()).unwrap();
    for mode in [MapMode::ReadOnly, MapMode::ReadWrite, MapMode::Private] {
        let error = channel.map(mode, u64::MAX - 4, 16).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidInput);
    }
    assert_eq!(channel.size().unwrap(), 4);
}

#[test]
fn test_closed_file_channel() {
    init_logger();
    let file = file_with(b"x");
    let mut channel = FileChannel::open(file.path(), &read_write()).unwrap();
    channel.close();
    assert!(!channel.is_open());
    assert!(matches!(channel.size(), Err(NioError::ClosedChannel)));
    assert!(matches!(channel.read(&mut ByteBuffer::allocate(1)), Err(NioError::ClosedChannel)));
}

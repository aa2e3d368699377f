// SPDX-License-Identifier: BUSL-1.1

use super::*;

fn collect(ring: &RingBuffer, offset: u64) -> Option<Vec<u8>> {
    ring.read_from(offset).map(|(a, b)| {
        let mut v = a.to_vec();
        v.extend_from_slice(b);
        v
    })
}

#[test]
fn empty_read() {
    let ring = RingBuffer::new(16);
    assert_eq!(collect(&ring, 0), Some(vec![]));
    assert_eq!(ring.available_from(0), 0);
}

#[test]
fn sequential_writes() {
    let mut ring = RingBuffer::new(16);
    ring.write(b"hello");
    ring.write(b" world");

    assert_eq!(collect(&ring, 0), Some(b"hello world".to_vec()));
    assert_eq!(collect(&ring, 5), Some(b" world".to_vec()));
    assert_eq!(ring.available_from(0), 11);
    assert_eq!(ring.total_written(), 11);
}

#[test]
fn wrap_around() {
    let mut ring = RingBuffer::new(8);
    ring.write(b"abcdef");
    ring.write(b"ghij");

    assert_eq!(collect(&ring, 0), None);
    assert_eq!(collect(&ring, 1), None);
    assert_eq!(collect(&ring, 2), Some(b"cdefghij".to_vec()));
    assert_eq!(collect(&ring, 6), Some(b"ghij".to_vec()));
    assert_eq!(ring.available_from(2), 8);
}

#[test]
fn offset_too_new() {
    let mut ring = RingBuffer::new(16);
    ring.write(b"abc");
    assert_eq!(collect(&ring, 4), None);
    assert_eq!(ring.available_from(4), 0);
}

#[test]
fn recent_returns_most_recent_span() {
    let mut ring = RingBuffer::new(8);
    ring.write(b"abcdef");
    ring.write(b"ghij");
    assert_eq!(ring.recent(4), b"ghij".to_vec());
    assert_eq!(ring.recent(100), b"cdefghij".to_vec());
}

#[test]
fn recent_on_empty_buffer() {
    let ring = RingBuffer::new(16);
    assert_eq!(ring.recent(10), Vec::<u8>::new());
}

#[test]
fn overwrite_full_buffer() {
    let mut ring = RingBuffer::new(4);
    ring.write(b"abcd");
    ring.write(b"efgh");
    assert_eq!(collect(&ring, 0), None);
    assert_eq!(collect(&ring, 4), Some(b"efgh".to_vec()));
}

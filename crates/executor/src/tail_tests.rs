// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn captures_everything_under_capacity() {
    let buf = TailBuf::new(64);
    let mut w = TailWriter::new(Vec::new(), buf.clone());
    w.write_all(b"hello ").unwrap();
    w.write_all(b"world").unwrap();
    assert_eq!(buf.contents(), "hello world");
}

#[test]
fn keeps_only_the_last_bytes() {
    let buf = TailBuf::new(5);
    let mut w = TailWriter::new(Vec::new(), buf.clone());
    w.write_all(b"abcdefghij").unwrap();
    assert_eq!(buf.contents(), "fghij");
}

#[test]
fn inner_writer_still_sees_all_bytes() {
    let buf = TailBuf::new(3);
    let mut sink = Vec::new();
    {
        let mut w = TailWriter::new(&mut sink, buf.clone());
        w.write_all(b"0123456789").unwrap();
    }
    assert_eq!(sink, b"0123456789");
}

#[test]
fn annotate_appends_tail() {
    let buf = TailBuf::new(64);
    let mut w = TailWriter::new(Vec::new(), buf.clone());
    w.write_all(b"permission denied\n").unwrap();

    let msg = buf.annotate("exit status 1");
    assert!(msg.starts_with("exit status 1"));
    assert!(msg.contains("permission denied"));
}

#[test]
fn annotate_without_output_is_passthrough() {
    let buf = TailBuf::new(64);
    assert_eq!(buf.annotate("exit status 1"), "exit status 1");
}

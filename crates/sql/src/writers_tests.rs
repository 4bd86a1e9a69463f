// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::TimeZone;

fn cols(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn jsonl_one_object_per_line() {
    let mut out = Vec::new();
    {
        let mut w = JsonlWriter::new(&mut out);
        w.write_header(&cols(&["id", "name", "note"])).unwrap();
        w.write_row(&[Value::Int(1), Value::Text("a".into()), Value::Null]).unwrap();
        w.write_row(&[Value::Int(2), Value::Text("b".into()), Value::Text("x".into())]).unwrap();
        w.close().unwrap();
    }
    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["id"], 1);
    assert_eq!(first["name"], "a");
    assert!(first["note"].is_null());
}

#[test]
fn jsonl_converts_special_scalars() {
    let t = chrono::Utc.with_ymd_and_hms(2026, 5, 1, 8, 30, 0).unwrap();
    let mut out = Vec::new();
    {
        let mut w = JsonlWriter::new(&mut out);
        w.write_header(&cols(&["bytes", "when", "flag"])).unwrap();
        w.write_row(&[
            Value::Bytes(b"raw".to_vec()),
            Value::Timestamp(t),
            Value::Bool(true),
        ])
        .unwrap();
        w.close().unwrap();
    }
    let row: serde_json::Value =
        serde_json::from_str(String::from_utf8(out).unwrap().lines().next().unwrap()).unwrap();
    assert_eq!(row["bytes"], "raw");
    assert_eq!(row["when"], "2026-05-01T08:30:00Z");
    assert_eq!(row["flag"], true);
}

#[test]
fn json_buffers_and_pretty_prints_at_close() {
    let mut out = Vec::new();
    {
        let mut w = JsonWriter::new(&mut out);
        w.write_header(&cols(&["id"])).unwrap();
        w.write_row(&[Value::Int(1)]).unwrap();
        w.write_row(&[Value::Int(2)]).unwrap();
        w.close().unwrap();
    }
    let parsed: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(parsed, serde_json::json!([{"id": 1}, {"id": 2}]));
    // Pretty printed: multi-line output.
    assert!(String::from_utf8(out).unwrap().lines().count() > 2);
}

#[test]
fn csv_with_header_and_null_string() {
    let mut out = Vec::new();
    {
        let mut w = CsvWriter::new(&mut out, true, "NULL");
        w.write_header(&cols(&["id", "city"])).unwrap();
        w.write_row(&[Value::Int(1), Value::Text("NYC".into())]).unwrap();
        w.write_row(&[Value::Int(2), Value::Null]).unwrap();
        w.close().unwrap();
    }
    let text = String::from_utf8(out).unwrap();
    assert_eq!(text, "id,city\n1,NYC\n2,NULL\n");
}

#[test]
fn csv_without_header() {
    let mut out = Vec::new();
    {
        let mut w = CsvWriter::new(&mut out, false, "");
        w.write_header(&cols(&["a", "b"])).unwrap();
        w.write_row(&[Value::Text("x".into()), Value::Text("has,comma".into())]).unwrap();
        w.close().unwrap();
    }
    assert_eq!(String::from_utf8(out).unwrap(), "x,\"has,comma\"\n");
}

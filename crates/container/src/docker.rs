// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Docker Engine API driver: hand-rolled HTTP/1.1 over the Unix socket.
//!
//! Request/response endpoints use one connection each with
//! `Connection: close`; streaming endpoints (logs, exec, pull) decode the
//! chunked body incrementally and select on cancellation.

use crate::demux::StreamDemuxer;
use crate::error::ContainerError;
use crate::runtime::{
    ContainerRuntime, ContainerSpec, ContainerState, ExecSpec, ImageInfo, LogSink, Platform,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;

const DEFAULT_SOCKET: &str = "/var/run/docker.sock";
const API_PREFIX: &str = "/v1.41";

/// Docker Engine API client.
pub struct DockerApi {
    socket: PathBuf,
}

impl DockerApi {
    pub fn new() -> Self {
        Self { socket: PathBuf::from(DEFAULT_SOCKET) }
    }

    pub fn with_socket(socket: impl Into<PathBuf>) -> Self {
        Self { socket: socket.into() }
    }

    async fn connect(&self) -> Result<UnixStream, ContainerError> {
        Ok(UnixStream::connect(&self.socket).await?)
    }

    /// One request/response round trip; returns (status, body).
    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
    ) -> Result<(u16, Vec<u8>), ContainerError> {
        let mut stream = self.connect().await?;
        let payload = body.map(serde_json::to_vec).transpose()?;
        let mut request = format!(
            "{method} {API_PREFIX}{path} HTTP/1.1\r\nHost: docker\r\nConnection: close\r\n"
        );
        if let Some(payload) = &payload {
            request.push_str("Content-Type: application/json\r\n");
            request.push_str(&format!("Content-Length: {}\r\n", payload.len()));
        }
        request.push_str("\r\n");
        stream.write_all(request.as_bytes()).await?;
        if let Some(payload) = &payload {
            stream.write_all(payload).await?;
        }

        let mut reader = BufReader::new(stream);
        let (status, headers) = read_head(&mut reader).await?;
        let body = read_body(&mut reader, &headers).await?;
        Ok((status, body))
    }

    /// Request whose response body is a stream; chunks are handed to
    /// `on_chunk` until EOF or cancellation.
    async fn stream_request(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
        cancel: &CancellationToken,
        mut on_chunk: impl FnMut(&[u8]) -> std::io::Result<()>,
    ) -> Result<(), ContainerError> {
        let mut stream = self.connect().await?;
        let payload = body.map(serde_json::to_vec).transpose()?;
        let mut request = format!("{method} {API_PREFIX}{path} HTTP/1.1\r\nHost: docker\r\n");
        if let Some(payload) = &payload {
            request.push_str("Content-Type: application/json\r\n");
            request.push_str(&format!("Content-Length: {}\r\n", payload.len()));
        }
        request.push_str("\r\n");
        stream.write_all(request.as_bytes()).await?;
        if let Some(payload) = &payload {
            stream.write_all(payload).await?;
        }

        let mut reader = BufReader::new(stream);
        let (status, headers) = read_head(&mut reader).await?;
        // 101 is the hijacked exec stream; 200 a regular streamed body.
        if status >= 300 {
            let body = read_body(&mut reader, &headers).await?;
            return Err(api_error(status, &body));
        }
        let chunked = headers_chunked(&headers);

        let mut buf = [0u8; 16 * 1024];
        let mut chunk_remaining: usize = 0;
        loop {
            if chunked && chunk_remaining == 0 {
                let mut line = String::new();
                let n = tokio::select! {
                    n = reader.read_line(&mut line) => n?,
                    _ = cancel.cancelled() => return Ok(()),
                };
                if n == 0 {
                    return Ok(());
                }
                let size = usize::from_str_radix(line.trim(), 16)
                    .map_err(|_| ContainerError::Protocol(format!("bad chunk size {line:?}")))?;
                if size == 0 {
                    return Ok(());
                }
                chunk_remaining = size + 2; // include trailing CRLF
            }

            let want = if chunked { chunk_remaining.min(buf.len()) } else { buf.len() };
            let n = tokio::select! {
                n = reader.read(&mut buf[..want]) => n?,
                _ = cancel.cancelled() => return Ok(()),
            };
            if n == 0 {
                return Ok(());
            }
            let data = if chunked {
                // Strip the CRLF terminating a chunk.
                let body_len = n.min(chunk_remaining.saturating_sub(2));
                chunk_remaining -= n;
                &buf[..body_len]
            } else {
                &buf[..n]
            };
            if !data.is_empty() {
                on_chunk(data)?;
            }
        }
    }

    async fn json_request(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ContainerError> {
        let (status, bytes) = self.request(method, path, body).await?;
        if status >= 300 {
            return Err(api_error(status, &bytes));
        }
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn empty_request(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
    ) -> Result<(), ContainerError> {
        let (status, bytes) = self.request(method, path, body).await?;
        if status >= 300 {
            return Err(api_error(status, &bytes));
        }
        Ok(())
    }
}

impl Default for DockerApi {
    fn default() -> Self {
        Self::new()
    }
}

fn api_error(status: u16, body: &[u8]) -> ContainerError {
    let message = serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| v["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string());
    ContainerError::Api { status, message }
}

async fn read_head(
    reader: &mut BufReader<UnixStream>,
) -> Result<(u16, Vec<(String, String)>), ContainerError> {
    let mut status_line = String::new();
    reader.read_line(&mut status_line).await?;
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| ContainerError::Protocol(format!("bad status line {status_line:?}")))?;

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 || line == "\r\n" || line == "\n" {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }
    Ok((status, headers))
}

fn headers_chunked(headers: &[(String, String)]) -> bool {
    headers
        .iter()
        .any(|(k, v)| k == "transfer-encoding" && v.to_ascii_lowercase().contains("chunked"))
}

fn header_content_length(headers: &[(String, String)]) -> Option<usize> {
    headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.parse().ok())
}

async fn read_body(
    reader: &mut BufReader<UnixStream>,
    headers: &[(String, String)],
) -> Result<Vec<u8>, ContainerError> {
    if headers_chunked(headers) {
        let mut out = Vec::new();
        loop {
            let mut line = String::new();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                break;
            }
            let size = usize::from_str_radix(line.trim(), 16)
                .map_err(|_| ContainerError::Protocol(format!("bad chunk size {line:?}")))?;
            if size == 0 {
                break;
            }
            let mut chunk = vec![0u8; size + 2];
            reader.read_exact(&mut chunk).await?;
            chunk.truncate(size);
            out.extend_from_slice(&chunk);
        }
        return Ok(out);
    }
    if let Some(len) = header_content_length(headers) {
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;
        return Ok(body);
    }
    let mut body = Vec::new();
    reader.read_to_end(&mut body).await?;
    Ok(body)
}

/// Minimal query-component percent encoding.
fn query_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

/// Split an image reference into (repository, tag).
fn split_reference(image: &str) -> (&str, &str) {
    match image.rfind(':') {
        Some(at) if !image[at + 1..].contains('/') => (&image[..at], &image[at + 1..]),
        _ => (image, "latest"),
    }
}

fn state_from_inspect(v: &Value) -> ContainerState {
    let state = &v["State"];
    ContainerState {
        running: state["Running"].as_bool().unwrap_or(false),
        status: state["Status"].as_str().unwrap_or_default().to_string(),
        exit_code: state["ExitCode"].as_i64(),
        health: state["Health"]["Status"].as_str().map(str::to_string),
    }
}

#[async_trait]
impl ContainerRuntime for DockerApi {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
        let mut body = json!({
            "Image": spec.image,
            "Env": spec.env,
            "HostConfig": { "Binds": spec.binds },
        });
        if let Some(cmd) = &spec.cmd {
            body["Cmd"] = json!(cmd);
        }
        if let Some(entrypoint) = &spec.entrypoint {
            body["Entrypoint"] = json!(entrypoint);
        }
        if let Some(user) = &spec.user {
            body["User"] = json!(user);
        }
        if let Some(dir) = &spec.working_dir {
            body["WorkingDir"] = json!(dir);
        }

        let mut path = "/containers/create".to_string();
        let mut sep = '?';
        if let Some(name) = &spec.name {
            path.push_str(&format!("{sep}name={}", query_escape(name)));
            sep = '&';
        }
        if let Some(platform) = &spec.platform {
            path.push_str(&format!("{sep}platform={}", query_escape(&platform.to_string())));
        }

        let v = self.json_request("POST", &path, Some(&body)).await?;
        v["Id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ContainerError::Protocol("create response missing Id".to_string()))
    }

    async fn start_container(&self, id: &str) -> Result<(), ContainerError> {
        self.empty_request("POST", &format!("/containers/{id}/start"), None).await
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerState, ContainerError> {
        let v = self.json_request("GET", &format!("/containers/{id}/json"), None).await?;
        Ok(state_from_inspect(&v))
    }

    async fn stop_container(&self, id: &str, signal: Option<&str>) -> Result<(), ContainerError> {
        let path = match signal {
            Some(sig) => format!("/containers/{id}/stop?signal={}", query_escape(sig)),
            None => format!("/containers/{id}/stop"),
        };
        self.empty_request("POST", &path, None).await
    }

    async fn kill_container(&self, id: &str, signal: &str) -> Result<(), ContainerError> {
        let path = format!("/containers/{id}/kill?signal={}", query_escape(signal));
        self.empty_request("POST", &path, None).await
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), ContainerError> {
        let path = format!("/containers/{id}?force={force}");
        self.empty_request("DELETE", &path, None).await
    }

    async fn wait_container(&self, id: &str) -> Result<i64, ContainerError> {
        let path = format!("/containers/{id}/wait?condition=not-running");
        let v = self.json_request("POST", &path, None).await?;
        Ok(v["StatusCode"].as_i64().unwrap_or(-1))
    }

    async fn stream_logs(
        &self,
        id: &str,
        follow: bool,
        sink: &mut (dyn LogSink + '_),
        cancel: &CancellationToken,
    ) -> Result<(), ContainerError> {
        let path = format!("/containers/{id}/logs?follow={follow}&stdout=true&stderr=true");
        let mut demux = StreamDemuxer::new();
        self.stream_request("GET", &path, None, cancel, |chunk| demux.feed(chunk, sink))
            .await
    }

    async fn exec(
        &self,
        id: &str,
        spec: &ExecSpec,
        sink: &mut (dyn LogSink + '_),
        cancel: &CancellationToken,
    ) -> Result<i64, ContainerError> {
        let mut create = json!({
            "AttachStdout": true,
            "AttachStderr": true,
            "Cmd": spec.cmd,
            "Env": spec.env,
            "Privileged": spec.privileged,
            "Tty": spec.tty,
        });
        if let Some(user) = &spec.user {
            create["User"] = json!(user);
        }
        if let Some(dir) = &spec.working_dir {
            create["WorkingDir"] = json!(dir);
        }
        let v = self
            .json_request("POST", &format!("/containers/{id}/exec"), Some(&create))
            .await?;
        let exec_id = v["Id"]
            .as_str()
            .ok_or_else(|| ContainerError::Protocol("exec create missing Id".to_string()))?
            .to_string();

        let start = json!({"Detach": false, "Tty": spec.tty});
        let mut demux = StreamDemuxer::new();
        let tty = spec.tty;
        self.stream_request(
            "POST",
            &format!("/exec/{exec_id}/start"),
            Some(&start),
            cancel,
            |chunk| {
                // A TTY stream is raw; otherwise it is header-framed.
                if tty {
                    sink.stdout_chunk(chunk)
                } else {
                    demux.feed(chunk, sink)
                }
            },
        )
        .await?;

        let v = self.json_request("GET", &format!("/exec/{exec_id}/json"), None).await?;
        Ok(v["ExitCode"].as_i64().unwrap_or(-1))
    }

    async fn pull_image(
        &self,
        image: &str,
        platform: Option<&Platform>,
    ) -> Result<(), ContainerError> {
        let (repo, tag) = split_reference(image);
        let mut path = format!(
            "/images/create?fromImage={}&tag={}",
            query_escape(repo),
            query_escape(tag)
        );
        if let Some(platform) = platform {
            path.push_str(&format!("&platform={}", query_escape(&platform.to_string())));
        }
        // Progress records stream back as JSON lines; the last one carries
        // any error.
        let mut last = Vec::new();
        let cancel = CancellationToken::new();
        self.stream_request("POST", &path, None, &cancel, |chunk| {
            last.extend_from_slice(chunk);
            if last.len() > 64 * 1024 {
                let keep = last.len() - 16 * 1024;
                last.drain(..keep);
            }
            Ok(())
        })
        .await?;
        for line in String::from_utf8_lossy(&last).lines() {
            if let Ok(v) = serde_json::from_str::<Value>(line) {
                if let Some(message) = v["error"].as_str() {
                    return Err(ContainerError::Pull {
                        image: image.to_string(),
                        message: message.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn list_images(&self, reference: &str) -> Result<Vec<String>, ContainerError> {
        let filters = json!({"reference": [reference]}).to_string();
        let path = format!("/images/json?filters={}", query_escape(&filters));
        let v = self.json_request("GET", &path, None).await?;
        let ids = v
            .as_array()
            .map(|images| {
                images
                    .iter()
                    .filter_map(|img| img["Id"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Ok(ids)
    }

    async fn inspect_image(&self, image: &str) -> Result<ImageInfo, ContainerError> {
        let v = self
            .json_request("GET", &format!("/images/{}/json", query_escape(image)), None)
            .await?;
        let os = v["Os"].as_str().unwrap_or("linux");
        let arch = v["Architecture"].as_str().unwrap_or_default();
        let variant = v["Variant"].as_str().map(str::to_string);
        Ok(ImageInfo {
            platform: Platform::new(os, arch, variant),
            has_healthcheck: !v["Config"]["Healthcheck"].is_null(),
        })
    }

    async fn host_platform(&self) -> Result<Platform, ContainerError> {
        let v = self.json_request("GET", "/version", None).await?;
        let os = v["Os"].as_str().unwrap_or("linux");
        let arch = v["Arch"].as_str().unwrap_or("amd64");
        Ok(Platform::new(os, arch, None))
    }
}

#[cfg(test)]
#[path = "docker_tests.rs"]
mod docker_tests;

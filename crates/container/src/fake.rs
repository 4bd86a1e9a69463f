// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted in-memory container runtime for tests.

use crate::error::ContainerError;
use crate::runtime::{
    ContainerRuntime, ContainerSpec, ContainerState, ExecSpec, ImageInfo, LogSink, Platform,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tokio_util::sync::CancellationToken;

/// One scripted log chunk: (is_stderr, payload).
pub type LogChunk = (bool, Vec<u8>);

#[derive(Default)]
struct FakeState {
    created: Vec<ContainerSpec>,
    started: Vec<String>,
    stopped: Vec<(String, Option<String>)>,
    killed: Vec<(String, String)>,
    removed: Vec<(String, bool)>,
    pulled: Vec<String>,
    execs: Vec<ExecSpec>,
    /// Inspect results popped per call; the last entry repeats.
    inspect_script: VecDeque<ContainerState>,
    /// Image id → info for the local image store.
    images: HashMap<String, ImageInfo>,
    image_ids: Vec<String>,
    logs: Vec<LogChunk>,
    exec_exit_codes: VecDeque<i64>,
    wait_exit_code: i64,
    host: Platform,
    next_id: u32,
}

/// Fake [`ContainerRuntime`] recording calls and replaying scripted
/// state. Inspect results pop from a queue so tests can model a container
/// moving through created → running → exited.
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                host: Platform::new("linux", "amd64", None),
                wait_exit_code: 0,
                ..FakeState::default()
            }),
        }
    }

    pub fn script_inspect(&self, states: impl IntoIterator<Item = ContainerState>) {
        self.state.lock().inspect_script.extend(states);
    }

    pub fn script_running(&self) {
        self.script_inspect([ContainerState {
            running: true,
            status: "running".to_string(),
            exit_code: None,
            health: None,
        }]);
    }

    pub fn add_local_image(&self, id: &str, info: ImageInfo) {
        let mut state = self.state.lock();
        state.image_ids.push(id.to_string());
        state.images.insert(id.to_string(), info);
    }

    pub fn script_logs(&self, chunks: impl IntoIterator<Item = LogChunk>) {
        self.state.lock().logs.extend(chunks);
    }

    pub fn script_exec_exit(&self, code: i64) {
        self.state.lock().exec_exit_codes.push_back(code);
    }

    pub fn set_wait_exit(&self, code: i64) {
        self.state.lock().wait_exit_code = code;
    }

    pub fn set_host_platform(&self, platform: Platform) {
        self.state.lock().host = platform;
    }

    pub fn created(&self) -> Vec<ContainerSpec> {
        self.state.lock().created.clone()
    }

    pub fn pulled(&self) -> Vec<String> {
        self.state.lock().pulled.clone()
    }

    pub fn stopped(&self) -> Vec<(String, Option<String>)> {
        self.state.lock().stopped.clone()
    }

    pub fn killed(&self) -> Vec<(String, String)> {
        self.state.lock().killed.clone()
    }

    pub fn removed(&self) -> Vec<(String, bool)> {
        self.state.lock().removed.clone()
    }

    pub fn execs(&self) -> Vec<ExecSpec> {
        self.state.lock().execs.clone()
    }

    pub fn started(&self) -> Vec<String> {
        self.state.lock().started.clone()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
        let mut state = self.state.lock();
        state.created.push(spec.clone());
        state.next_id += 1;
        Ok(format!("fake-{}", state.next_id))
    }

    async fn start_container(&self, id: &str) -> Result<(), ContainerError> {
        self.state.lock().started.push(id.to_string());
        Ok(())
    }

    async fn inspect_container(&self, _id: &str) -> Result<ContainerState, ContainerError> {
        let mut state = self.state.lock();
        if state.inspect_script.len() > 1 {
            Ok(state.inspect_script.pop_front().unwrap_or_default())
        } else {
            Ok(state.inspect_script.front().cloned().unwrap_or_default())
        }
    }

    async fn stop_container(&self, id: &str, signal: Option<&str>) -> Result<(), ContainerError> {
        let mut state = self.state.lock();
        state.stopped.push((id.to_string(), signal.map(str::to_string)));
        // A stopped fake container reports not-running from now on.
        state.inspect_script.clear();
        state.inspect_script.push_back(ContainerState {
            running: false,
            status: "exited".to_string(),
            exit_code: Some(0),
            health: None,
        });
        Ok(())
    }

    async fn kill_container(&self, id: &str, signal: &str) -> Result<(), ContainerError> {
        self.state.lock().killed.push((id.to_string(), signal.to_string()));
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), ContainerError> {
        self.state.lock().removed.push((id.to_string(), force));
        Ok(())
    }

    async fn wait_container(&self, _id: &str) -> Result<i64, ContainerError> {
        Ok(self.state.lock().wait_exit_code)
    }

    async fn stream_logs(
        &self,
        _id: &str,
        _follow: bool,
        sink: &mut (dyn LogSink + '_),
        cancel: &CancellationToken,
    ) -> Result<(), ContainerError> {
        let chunks = self.state.lock().logs.clone();
        for (is_stderr, payload) in chunks {
            if cancel.is_cancelled() {
                return Ok(());
            }
            if is_stderr {
                sink.stderr_chunk(&payload)?;
            } else {
                sink.stdout_chunk(&payload)?;
            }
        }
        Ok(())
    }

    async fn exec(
        &self,
        _id: &str,
        spec: &ExecSpec,
        sink: &mut (dyn LogSink + '_),
        _cancel: &CancellationToken,
    ) -> Result<i64, ContainerError> {
        let (chunks, code) = {
            let mut state = self.state.lock();
            state.execs.push(spec.clone());
            (state.logs.clone(), state.exec_exit_codes.pop_front().unwrap_or(0))
        };
        for (is_stderr, payload) in chunks {
            if is_stderr {
                sink.stderr_chunk(&payload)?;
            } else {
                sink.stdout_chunk(&payload)?;
            }
        }
        Ok(code)
    }

    async fn pull_image(
        &self,
        image: &str,
        _platform: Option<&Platform>,
    ) -> Result<(), ContainerError> {
        self.state.lock().pulled.push(image.to_string());
        Ok(())
    }

    async fn list_images(&self, _reference: &str) -> Result<Vec<String>, ContainerError> {
        Ok(self.state.lock().image_ids.clone())
    }

    async fn inspect_image(&self, image: &str) -> Result<ImageInfo, ContainerError> {
        self.state.lock().images.get(image).cloned().ok_or_else(|| ContainerError::Api {
            status: 404,
            message: format!("no such image: {image}"),
        })
    }

    async fn host_platform(&self) -> Result<Platform, ContainerError> {
        Ok(self.state.lock().host.clone())
    }
}

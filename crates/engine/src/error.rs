// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduler error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid dag: {0}")]
    Dag(#[from] skein_core::DagError),
    #[error("router on step {step}: {source}")]
    Router {
        step: String,
        source: skein_core::RouterError,
    },
    #[error("step {step}: {message}")]
    Step { step: String, message: String },
    #[error("handler {handler} failed: {message}")]
    Handler { handler: String, message: String },
    #[error("step {step} is not waiting for approval")]
    NotWaiting { step: String },
    #[error("no sub-dag runner configured (step {step} references dag {dag})")]
    NoSubDagRunner { step: String, dag: String },
    #[error("run cancelled")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

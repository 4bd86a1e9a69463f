// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-run connection manager and the cross-run global pool.

use crate::driver::{Cleanup, ConnectConfig, Driver, SqlConnection};
use crate::error::SqlError;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

/// First backoff delay for connect retries.
pub const CONNECT_BACKOFF_START: Duration = Duration::from_millis(500);
/// Backoff cap.
pub const CONNECT_BACKOFF_CAP: Duration = Duration::from_secs(2);
/// Connect attempts before giving up.
pub const CONNECT_MAX_ATTEMPTS: u32 = 30;
/// Ping deadline per attempt.
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

struct Slot {
    conn: Box<dyn SqlConnection>,
    cleanup: Option<Cleanup>,
}

struct ManagerInner {
    driver: Arc<dyn Driver>,
    cfg: ConnectConfig,
    slot: Arc<tokio::sync::Mutex<Option<Slot>>>,
    refs: Mutex<usize>,
    closed: AtomicBool,
    max_open: AtomicU32,
    max_idle: AtomicU32,
}

/// Reference-counted single logical handle. When refs drop to zero the
/// handle closes and the driver cleanup runs exactly once.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

/// Exclusive lease on the manager's connection.
pub struct ConnGuard {
    guard: OwnedMutexGuard<Option<Slot>>,
}

impl ConnGuard {
    pub fn conn(&mut self) -> &mut dyn SqlConnection {
        match self.guard.as_mut() {
            Some(slot) => slot.conn.as_mut(),
            None => unreachable!("guard handed out by a connected manager"),
        }
    }
}

impl ConnectionManager {
    pub fn new(driver: Arc<dyn Driver>, cfg: ConnectConfig) -> Self {
        let max_open = cfg.max_open_conns;
        let max_idle = cfg.max_idle_conns;
        Self {
            inner: Arc::new(ManagerInner {
                driver,
                cfg,
                slot: Arc::new(tokio::sync::Mutex::new(None)),
                refs: Mutex::new(0),
                closed: AtomicBool::new(false),
                max_open: AtomicU32::new(max_open),
                max_idle: AtomicU32::new(max_idle),
            }),
        }
    }

    /// Take a reference, connecting (with retry) on first use.
    pub async fn acquire(&self) -> Result<(), SqlError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(SqlError::Closed);
        }
        {
            let mut slot = self.inner.slot.lock().await;
            if slot.is_none() {
                *slot = Some(connect_with_retry(&self.inner.driver, &self.inner.cfg).await?);
            }
        }
        *self.inner.refs.lock() += 1;
        Ok(())
    }

    /// Lease the connection for a sequence of calls.
    pub async fn conn(&self) -> Result<ConnGuard, SqlError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(SqlError::Closed);
        }
        let guard = self.inner.slot.clone().lock_owned().await;
        if guard.is_none() {
            return Err(SqlError::Closed);
        }
        Ok(ConnGuard { guard })
    }

    /// Drop a reference; the last one closes the handle.
    pub async fn release(&self) {
        let last = {
            let mut refs = self.inner.refs.lock();
            if *refs > 0 {
                *refs -= 1;
            }
            *refs == 0
        };
        if last {
            self.close().await;
        }
    }

    /// Close regardless of references; cleanup runs exactly once.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut slot = self.inner.slot.lock().await;
        if let Some(mut slot) = slot.take() {
            if let Err(e) = slot.conn.close().await {
                tracing::warn!(error = %e, "connection close failed");
            }
            if let Some(cleanup) = slot.cleanup.take() {
                cleanup();
            }
        }
    }

    pub fn ref_count(&self) -> usize {
        *self.inner.refs.lock()
    }

    pub fn max_open(&self) -> u32 {
        self.inner.max_open.load(Ordering::SeqCst)
    }

    pub fn set_max_open(&self, n: u32) {
        self.inner.max_open.store(n, Ordering::SeqCst);
        // Idle connections can never exceed the open cap.
        let idle = self.inner.max_idle.load(Ordering::SeqCst);
        if idle > n {
            self.inner.max_idle.store(n, Ordering::SeqCst);
        }
    }
}

/// Connect and ping with exponential backoff to tolerate slow
/// dependency startup.
async fn connect_with_retry(
    driver: &Arc<dyn Driver>,
    cfg: &ConnectConfig,
) -> Result<Slot, SqlError> {
    let mut delay = CONNECT_BACKOFF_START;
    let mut last_error = String::new();
    for attempt in 1..=CONNECT_MAX_ATTEMPTS {
        match driver.connect(cfg).await {
            Ok((mut conn, cleanup)) => {
                match tokio::time::timeout(PING_TIMEOUT, conn.ping()).await {
                    Ok(Ok(())) => return Ok(Slot { conn, cleanup }),
                    Ok(Err(e)) => last_error = e.to_string(),
                    Err(_) => last_error = format!("ping timed out after {PING_TIMEOUT:?}"),
                }
                let _ = conn.close().await;
                if let Some(cleanup) = cleanup {
                    cleanup();
                }
            }
            Err(e) => last_error = e.to_string(),
        }
        tracing::debug!(attempt, error = %last_error, "connect attempt failed");
        if attempt < CONNECT_MAX_ATTEMPTS {
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(CONNECT_BACKOFF_CAP);
        }
    }
    Err(SqlError::Connect { attempts: CONNECT_MAX_ATTEMPTS, message: last_error })
}

/// Key pools by a digest prefix so credentials never appear in keys.
pub fn dsn_key(dsn: &str) -> String {
    let digest = Sha256::digest(dsn.as_bytes());
    let mut out = String::with_capacity(16);
    for b in &digest[..8] {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

struct PoolEntry {
    manager: ConnectionManager,
    refs: usize,
}

/// Process-wide pool for worker mode: one manager per DSN, with the
/// global `max_open_conns` budget redistributed as DSNs appear.
pub struct GlobalPool {
    max_open: u32,
    pools: Mutex<HashMap<String, PoolEntry>>,
}

impl GlobalPool {
    pub fn new(max_open: u32) -> Self {
        Self { max_open, pools: Mutex::new(HashMap::new()) }
    }

    /// Get (or create) the pool for a DSN. New pools connect and ping
    /// before registration; existing ones only bump the refcount.
    pub async fn acquire(
        &self,
        driver: Arc<dyn Driver>,
        cfg: ConnectConfig,
    ) -> Result<ConnectionManager, SqlError> {
        let key = dsn_key(&cfg.dsn);
        {
            let mut pools = self.pools.lock();
            if let Some(entry) = pools.get_mut(&key) {
                entry.refs += 1;
                return Ok(entry.manager.clone());
            }
        }

        let manager = ConnectionManager::new(driver, cfg);
        manager.acquire().await?;

        let mut pools = self.pools.lock();
        // A racing creator may have won; prefer the registered one.
        if let Some(entry) = pools.get_mut(&key) {
            entry.refs += 1;
            let existing = entry.manager.clone();
            drop(pools);
            manager.release().await;
            return Ok(existing);
        }
        pools.insert(key, PoolEntry { manager: manager.clone(), refs: 1 });
        redistribute(self.max_open, &pools);
        Ok(manager)
    }

    /// Drop a reference. Pools are reused until [`GlobalPool::close_all`];
    /// limits are not re-expanded on release.
    pub fn release(&self, dsn: &str) {
        let mut pools = self.pools.lock();
        if let Some(entry) = pools.get_mut(&dsn_key(dsn)) {
            if entry.refs > 0 {
                entry.refs -= 1;
            }
        }
    }

    pub async fn close_all(&self) {
        let managers: Vec<ConnectionManager> = {
            let mut pools = self.pools.lock();
            pools.drain().map(|(_, e)| e.manager).collect()
        };
        for manager in managers {
            manager.close().await;
        }
    }

    pub fn pool_count(&self) -> usize {
        self.pools.lock().len()
    }

    /// Current per-pool open cap for a DSN (test/introspection hook).
    pub fn pool_max_open(&self, dsn: &str) -> Option<u32> {
        self.pools.lock().get(&dsn_key(dsn)).map(|e| e.manager.max_open())
    }

    pub fn pool_refs(&self, dsn: &str) -> Option<usize> {
        self.pools.lock().get(&dsn_key(dsn)).map(|e| e.refs)
    }
}

/// `per = max(1, floor(global / count))`, so the sum never exceeds the
/// global cap while every pool keeps at least one connection.
fn redistribute(global_max: u32, pools: &HashMap<String, PoolEntry>) {
    if pools.is_empty() {
        return;
    }
    let per = (global_max / pools.len() as u32).max(1);
    for entry in pools.values() {
        entry.manager.set_max_open(per);
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod pool_tests;

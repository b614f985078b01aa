//! On-disk TTL cache for TDX responses, backed by sled.

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use sled::Db;
use std::path::Path;
use tracing::{debug, warn};
use xxhash_rust::xxh64::xxh64;

pub struct ResponseCache {
    db: Db,
    ttl_seconds: i64,
}

impl ResponseCache {
    pub fn open(dir: &Path, ttl_seconds: u64) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create cache dir {}", dir.display()))?;
        let db = sled::open(dir).context("Failed to open response cache")?;
        Ok(Self {
            db,
            ttl_seconds: i64::try_from(ttl_seconds).unwrap_or(i64::MAX),
        })
    }

    fn key(namespace: &str, request: &str) -> [u8; 8] {
        let mut material = Vec::with_capacity(namespace.len() + request.len() + 1);
        material.extend_from_slice(namespace.as_bytes());
        material.push(0);
        material.extend_from_slice(request.as_bytes());
        xxh64(&material, 0).to_be_bytes()
    }

    /// Cached value if present and younger than the TTL.
    pub fn get(&self, namespace: &str, request: &str) -> Option<Value> {
        self.get_at(namespace, request, Utc::now().timestamp())
    }

    fn get_at(&self, namespace: &str, request: &str, now: i64) -> Option<Value> {
        let raw = match self.db.get(Self::key(namespace, request)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Cache read failed: {}", e);
                return None;
            }
        };
        if raw.len() < 8 {
            return None;
        }
        let mut stamp = [0u8; 8];
        stamp.copy_from_slice(&raw[..8]);
        let stored_at = i64::from_be_bytes(stamp);
        if now.saturating_sub(stored_at) > self.ttl_seconds {
            debug!("Cache entry for {} expired", namespace);
            return None;
        }
        serde_json::from_slice(&raw[8..]).ok()
    }

    pub fn put(&self, namespace: &str, request: &str, value: &Value) -> Result<()> {
        self.put_at(namespace, request, value, Utc::now().timestamp())
    }

    fn put_at(&self, namespace: &str, request: &str, value: &Value, now: i64) -> Result<()> {
        let mut raw = now.to_be_bytes().to_vec();
        raw.extend(serde_json::to_vec(value)?);
        self.db.insert(Self::key(namespace, request), raw)?;
        self.db.flush()?;
        Ok(())
    }
}

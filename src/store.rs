//! Object store trait definition
//!
//! This module defines the ObjectStore trait the extractor, loader and meta
//! file processing use to reach a bucket. Each bucket gets its own instance,
//! created once per run and passed explicitly to every stage.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Trait for listing, reading and writing objects by key
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List every key starting with `prefix` (all pages)
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Read an object. A missing key yields `EtlError::ObjectNotFound`.
    async fn get_object(&self, key: &str) -> Result<Bytes>;

    /// Create or replace an object
    async fn put_object(&self, key: &str, body: Bytes) -> Result<()>;
}

#[cfg(test)]
pub(crate) use memory::MemoryStore;

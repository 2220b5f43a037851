use crate::link::LinkIdentity;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("shared table handle is invalid")]
    InvalidHandle,
    #[error("update of key {key} rejected: {reason}")]
    Rejected { key: u32, reason: String },
}

/// 快速路径可见的键值表，键为接口索引，写入语义为 upsert
pub trait MetricTable: Send + 'static {
    fn update(&mut self, key: u32, value: u64) -> Result<(), TableError>;
}

impl<T: MetricTable + ?Sized> MetricTable for Box<T> {
    fn update(&mut self, key: u32, value: u64) -> Result<(), TableError> {
        (**self).update(key, value)
    }
}

/// 进程内的表，clone 之后共享同一份数据
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    entries: Arc<DashMap<u32, u64>>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: u32) -> Option<u64> {
        self.entries.get(&key).map(|v| *v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl MetricTable for MemoryTable {
    fn update(&mut self, key: u32, value: u64) -> Result<(), TableError> {
        self.entries.insert(key, value);
        Ok(())
    }
}

/// 共享表的唯一写者
pub struct Publisher<T> {
    table: T,
}

impl<T: MetricTable> Publisher<T> {
    pub fn new(table: T) -> Self {
        Self { table }
    }

    pub fn publish(&mut self, link: &LinkIdentity, value: u64) -> Result<(), TableError> {
        self.table.update(link.index, value)?;
        debug!("published {} = {}", link, value);
        Ok(())
    }
}

use crate::{event::EventSource, metric::MetricTable, route::ProgramRef};
use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to relax resource limits: {0}")]
    Privilege(#[source] std::io::Error),
    #[error("fast path object {0} does not exist")]
    Missing(Utf8PathBuf),
    #[error("failed to open {path}: {reason}")]
    Open { path: Utf8PathBuf, reason: String },
}

/// 已加载的快速路径：挂到路由上的程序、共享表和诊断事件源
pub struct FastPath<T, E> {
    pub program: ProgramRef,
    pub table: T,
    pub events: E,
}

pub trait FastPathLoader {
    type Table: MetricTable;
    type Events: EventSource;

    fn relax_limits(&self) -> Result<(), LoadError>;

    /// 失败时不能留下半加载的状态
    fn load(&self) -> Result<FastPath<Self::Table, Self::Events>, LoadError>;
}

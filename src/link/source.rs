use super::LinkStats;
use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
    #[error("unexpected content {value:?} in {path}")]
    Parse { path: Utf8PathBuf, value: String },
    #[error("link query failed: {0}")]
    Query(String),
}

/// 链路枚举，每次调用返回所有接口的当前累计计数
pub trait LinkSource: Send + 'static {
    fn list(&mut self) -> Result<Vec<LinkStats>, LinkError>;
}

impl<T: LinkSource + ?Sized> LinkSource for Box<T> {
    fn list(&mut self) -> Result<Vec<LinkStats>, LinkError> {
        (**self).list()
    }
}

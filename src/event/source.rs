use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventSourceError {
    /// 到期没有记录，可以直接重试
    #[error("read deadline exceeded")]
    DeadlineExceeded,
    #[error("event source transport failure: {0}")]
    Transport(#[from] std::io::Error),
}

/// 快速路径的诊断记录来源
///
/// `read` 会阻塞，最多阻塞到 `deadline`，期间无法从外部打断。
pub trait EventSource: Send + 'static {
    fn read(&mut self, deadline: Duration) -> Result<Bytes, EventSourceError>;
}

impl<T: EventSource + ?Sized> EventSource for Box<T> {
    fn read(&mut self, deadline: Duration) -> Result<Bytes, EventSourceError> {
        (**self).read(deadline)
    }
}

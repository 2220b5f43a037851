use std::borrow::Cow;
use tracing::info;

pub trait EventSink: Send + 'static {
    fn record(&mut self, record: &[u8]);
}

impl<T: EventSink + ?Sized> EventSink for Box<T> {
    fn record(&mut self, record: &[u8]) {
        (**self).record(record)
    }
}

/// 快速路径写出的是 C 字符串，去掉末尾的 NUL
pub fn render(record: &[u8]) -> Cow<'_, str> {
    let end = record
        .iter()
        .rposition(|b| *b != 0)
        .map_or(0, |last| last + 1);
    String::from_utf8_lossy(&record[..end])
}

/// 按 `fastpath` target 输出到 tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&mut self, record: &[u8]) {
        info!(target: "fastpath", "{}", render(record));
    }
}

use std::{fmt::Display, time::Instant};

/// 接口索引加名字，索引是发布到共享表时用的键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkIdentity {
    pub index: u32,
    pub name: String,
}

impl LinkIdentity {
    pub fn new(index: u32, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
        }
    }
}

impl Display for LinkIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name, self.index)
    }
}

/// 累计字节计数，接口重置时可能回退
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub tx_bytes: u64,
    pub rx_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkStats {
    pub identity: LinkIdentity,
    pub counters: Counters,
}

impl LinkStats {
    pub fn new(index: u32, name: impl Into<String>, tx_bytes: u64, rx_bytes: u64) -> Self {
        Self {
            identity: LinkIdentity::new(index, name),
            counters: Counters { tx_bytes, rx_bytes },
        }
    }
}

/// 上一次观测到的计数，作为下一个 tick 的基线
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSample {
    pub counter: u64,
    pub taken_at: Instant,
}

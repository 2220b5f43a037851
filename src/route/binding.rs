use camino::{Utf8Path, Utf8PathBuf};
use ipnetwork::IpNetwork;
use std::{fmt::Display, net::IpAddr};

/// 挂在路由上的快速路径程序，目前只支持 bpffs 里 pin 住的程序
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramRef {
    Pinned(Utf8PathBuf),
}

impl ProgramRef {
    pub fn pinned(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Pinned(path.into())
    }

    pub fn path(&self) -> &Utf8Path {
        match self {
            ProgramRef::Pinned(path) => path,
        }
    }
}

impl Display for ProgramRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgramRef::Pinned(path) => write!(f, "pinned {}", path),
        }
    }
}

/// 激活快速路径的内核路由，同一时间最多只有一条
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteBinding {
    pub prefix: IpNetwork,
    pub gateway: IpAddr,
    pub program: ProgramRef,
    pub priority: u32,
}

impl Display for RouteBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} encap bpf xmit {} via {} metric {}",
            self.prefix, self.program, self.gateway, self.priority
        )
    }
}

use super::RouteBinding;
use camino::Utf8PathBuf;
use std::process::Command;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("failed to run {binary}: {source}")]
    Spawn {
        binary: Utf8PathBuf,
        source: std::io::Error,
    },
    #[error("route {op} rejected (exit {status:?}): {stderr}")]
    Rejected {
        op: &'static str,
        status: Option<i32>,
        stderr: String,
    },
}

/// 只有生命周期管理器会调用
pub trait RouteInstaller: Send + 'static {
    fn add(&mut self, binding: &RouteBinding) -> Result<(), RouteError>;
    fn del(&mut self, binding: &RouteBinding) -> Result<(), RouteError>;
}

impl<T: RouteInstaller + ?Sized> RouteInstaller for Box<T> {
    fn add(&mut self, binding: &RouteBinding) -> Result<(), RouteError> {
        (**self).add(binding)
    }

    fn del(&mut self, binding: &RouteBinding) -> Result<(), RouteError> {
        (**self).del(binding)
    }
}

/// 调用 iproute2 的 `ip route`，程序通过 `encap bpf xmit pinned` 挂上去
#[derive(Debug, Clone)]
pub struct IpRoute {
    binary: Utf8PathBuf,
}

impl Default for IpRoute {
    fn default() -> Self {
        Self::new("ip")
    }
}

impl IpRoute {
    pub fn new(binary: impl Into<Utf8PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn add_args(binding: &RouteBinding) -> Vec<String> {
        let mut args = Self::head("add", binding);
        args.extend(
            ["encap", "bpf", "xmit", "pinned", binding.program.path().as_str()]
                .map(String::from),
        );
        args.extend(Self::tail(binding));
        args
    }

    // 删除时只按前缀、网关和 metric 匹配
    pub fn del_args(binding: &RouteBinding) -> Vec<String> {
        let mut args = Self::head("del", binding);
        args.extend(Self::tail(binding));
        args
    }

    fn head(op: &str, binding: &RouteBinding) -> Vec<String> {
        let family = if binding.prefix.is_ipv4() { "-4" } else { "-6" };
        vec![
            family.into(),
            "route".into(),
            op.into(),
            binding.prefix.to_string(),
        ]
    }

    fn tail(binding: &RouteBinding) -> [String; 4] {
        [
            "via".into(),
            binding.gateway.to_string(),
            "metric".into(),
            binding.priority.to_string(),
        ]
    }

    fn exec(&self, op: &'static str, args: Vec<String>) -> Result<(), RouteError> {
        debug!("{} {}", self.binary, args.join(" "));
        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .map_err(|source| RouteError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(RouteError::Rejected {
                op,
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

impl RouteInstaller for IpRoute {
    fn add(&mut self, binding: &RouteBinding) -> Result<(), RouteError> {
        self.exec("add", Self::add_args(binding))
    }

    fn del(&mut self, binding: &RouteBinding) -> Result<(), RouteError> {
        self.exec("del", Self::del_args(binding))
    }
}

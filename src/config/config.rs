use crate::{
    ewma::{Ewma, EwmaError},
    metric::{MetricPolicy, PolicyParseError},
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config as Layers, ConfigError, Environment, File, Value};
use ipnetwork::{IpNetwork, IpNetworkError};
use serde::{Deserialize, Serialize};
use std::{
    net::{AddrParseError, IpAddr},
    time::Duration,
};
use thiserror::Error;

const ENV_PREFIX: &str = "SRV6_STEER";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Load(#[from] ConfigError),
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("sampling interval must be greater than 0")]
    ZeroInterval,
    #[error("drain deadline must be greater than 0")]
    ZeroDrainDeadline,
    #[error("max consecutive failures must be greater than 0")]
    ZeroFailureBudget,
    #[error(transparent)]
    Span(#[from] EwmaError),
    #[error(transparent)]
    Policy(#[from] PolicyParseError),
    #[error("invalid prefix {input:?}: {source}")]
    Prefix {
        input: String,
        source: IpNetworkError,
    },
    #[error("invalid gateway {input:?}: {source}")]
    Gateway {
        input: String,
        source: AddrParseError,
    },
    #[error("gateway {gateway} and prefix {prefix} are in different address families")]
    FamilyMismatch { prefix: IpNetwork, gateway: IpAddr },
    #[error("config dir was not found")]
    ConfigDirNotFound,
    #[error("path is not valid utf-8: {0}")]
    NonUtf8Path(String),
}

/// 未校验的原始配置，来自配置文件、环境变量与命令行三层
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub prefix: Option<String>,
    pub gateway: Option<String>,
    pub interval_ms: Option<u64>,
    pub ema_span: i64,
    pub policy: String,
    pub priority: u32,
    pub drain_deadline_ms: u64,
    pub max_consecutive_failures: u32,
    pub log_raw_stats: bool,
    pub log_raw_ema: bool,
    pub archive_dir: Utf8PathBuf,
    pub pin_dir: Utf8PathBuf,
    pub sysfs_root: Utf8PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            prefix: None,
            gateway: None,
            interval_ms: None,
            ema_span: 100,
            policy: MetricPolicy::default().to_string(),
            priority: 1,
            drain_deadline_ms: 500,
            max_consecutive_failures: 5,
            log_raw_stats: false,
            log_raw_ema: false,
            archive_dir: Utf8PathBuf::from("."),
            pin_dir: Utf8PathBuf::from("/sys/fs/bpf/srv6_steer"),
            sysfs_root: Utf8PathBuf::from("/sys/class/net"),
        }
    }
}

/// 命令行给出的覆盖项，`None` 表示不覆盖
#[derive(Debug, Default, Clone)]
pub struct Overrides(Vec<(&'static str, Value)>);

impl Overrides {
    pub fn set<V: Into<Value>>(mut self, key: &'static str, value: Option<V>) -> Self {
        if let Some(value) = value {
            self.0.push((key, value.into()));
        }
        self
    }
}

impl Settings {
    /// 文件 < 环境变量 < 命令行
    pub fn load(path: Option<&Utf8Path>, overrides: Overrides) -> Result<Self, SettingsError> {
        let mut builder = Layers::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path.as_std_path()).required(false));
        }
        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));
        for (key, value) in overrides.0 {
            builder = builder.set_override(key, value)?;
        }
        Ok(builder.build()?.try_deserialize::<Settings>()?)
    }

    pub fn validate(self) -> Result<Config, SettingsError> {
        let prefix_str = self.prefix.ok_or(SettingsError::Missing("prefix"))?;
        let prefix = prefix_str
            .parse::<IpNetwork>()
            .map_err(|source| SettingsError::Prefix {
                input: prefix_str.clone(),
                source,
            })?;
        let gateway_str = self.gateway.ok_or(SettingsError::Missing("gateway"))?;
        let gateway = gateway_str
            .parse::<IpAddr>()
            .map_err(|source| SettingsError::Gateway {
                input: gateway_str.clone(),
                source,
            })?;
        if prefix.is_ipv4() != gateway.is_ipv4() {
            return Err(SettingsError::FamilyMismatch { prefix, gateway });
        }
        let interval = match self.interval_ms.ok_or(SettingsError::Missing("interval_ms"))? {
            0 => return Err(SettingsError::ZeroInterval),
            ms => Duration::from_millis(ms),
        };
        Ewma::new(self.ema_span)?;
        if self.drain_deadline_ms == 0 {
            return Err(SettingsError::ZeroDrainDeadline);
        }
        if self.max_consecutive_failures == 0 {
            return Err(SettingsError::ZeroFailureBudget);
        }
        Ok(Config {
            prefix,
            gateway,
            interval,
            ema_span: self.ema_span,
            policy: self.policy.parse()?,
            priority: self.priority,
            drain_deadline: Duration::from_millis(self.drain_deadline_ms),
            max_consecutive_failures: self.max_consecutive_failures,
            archive: ArchiveConfig {
                raw_stats: self.log_raw_stats,
                raw_ema: self.log_raw_ema,
                dir: self.archive_dir,
            },
            pin_dir: self.pin_dir,
            sysfs_root: self.sysfs_root,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveConfig {
    pub raw_stats: bool,
    pub raw_ema: bool,
    pub dir: Utf8PathBuf,
}

/// 启动前校验完毕，之后只读
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub prefix: IpNetwork,
    pub gateway: IpAddr,
    pub interval: Duration,
    pub ema_span: i64,
    pub policy: MetricPolicy,
    pub priority: u32,
    pub drain_deadline: Duration,
    pub max_consecutive_failures: u32,
    pub archive: ArchiveConfig,
    pub pin_dir: Utf8PathBuf,
    pub sysfs_root: Utf8PathBuf,
}

use crate::config::ArchiveConfig;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufWriter, Write},
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Encode(#[from] serde_json::Error),
}

pub fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

#[derive(Serialize)]
struct StatsLine<'a> {
    timestamp: u64,
    counters: &'a BTreeMap<u32, u64>,
}

#[derive(Serialize)]
struct EmaLine<'a> {
    timestamp: u64,
    ema: &'a BTreeMap<u32, f64>,
}

struct NdjsonWriter {
    path: Utf8PathBuf,
    inner: BufWriter<File>,
}

impl NdjsonWriter {
    fn create(path: Utf8PathBuf) -> Result<Self, ArchiveError> {
        let file = File::create(&path).map_err(|source| ArchiveError::Io {
            path: path.clone(),
            source,
        })?;
        info!("archiving raw metrics to {}", path);
        Ok(Self {
            path,
            inner: BufWriter::new(file),
        })
    }

    fn append<T: Serialize>(&mut self, line: &T) -> Result<(), ArchiveError> {
        serde_json::to_writer(&mut self.inner, line)?;
        self.inner
            .write_all(b"\n")
            .and_then(|_| self.inner.flush())
            .map_err(|source| ArchiveError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

/// 原始计数和平滑值的 NDJSON 归档，每个 tick 一行
#[derive(Default)]
pub struct RawArchive {
    stats: Option<NdjsonWriter>,
    ema: Option<NdjsonWriter>,
}

impl RawArchive {
    pub fn create(config: &ArchiveConfig) -> Result<Self, ArchiveError> {
        let ts = unix_nanos() / 1_000_000_000;
        let path = |enabled: bool, name: &str| {
            enabled.then(|| config.dir.join(format!("{name}_{ts}.ndjson")))
        };
        Self::open(path(config.raw_stats, "raw_stats"), path(config.raw_ema, "raw_ema"))
    }

    /// 直接指定两个文件，`None` 表示不写
    pub fn open(
        stats: Option<Utf8PathBuf>,
        ema: Option<Utf8PathBuf>,
    ) -> Result<Self, ArchiveError> {
        Ok(Self {
            stats: stats.map(NdjsonWriter::create).transpose()?,
            ema: ema.map(NdjsonWriter::create).transpose()?,
        })
    }

    /// 启动没走完时删掉已经建好的文件
    pub fn discard(self) {
        for writer in [self.stats, self.ema].into_iter().flatten() {
            let NdjsonWriter { path, inner } = writer;
            drop(inner);
            if let Err(err) = std::fs::remove_file(&path) {
                warn!("failed to remove unused archive {}: {}", path, err);
            }
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.stats.is_some() || self.ema.is_some()
    }

    pub fn stats_path(&self) -> Option<&Utf8Path> {
        self.stats.as_ref().map(|w| w.path.as_path())
    }

    pub fn ema_path(&self) -> Option<&Utf8Path> {
        self.ema.as_ref().map(|w| w.path.as_path())
    }

    pub fn record_stats(
        &mut self,
        timestamp: u64,
        counters: &BTreeMap<u32, u64>,
    ) -> Result<(), ArchiveError> {
        match self.stats.as_mut() {
            Some(writer) => writer.append(&StatsLine {
                timestamp,
                counters,
            }),
            None => Ok(()),
        }
    }

    pub fn record_ema(
        &mut self,
        timestamp: u64,
        ema: &BTreeMap<u32, f64>,
    ) -> Result<(), ArchiveError> {
        match self.ema.as_mut() {
            Some(writer) => writer.append(&EmaLine { timestamp, ema }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::Builder;

    #[test]
    fn writes_one_line_per_record() -> Result<()> {
        let dir = Builder::new().tempdir()?;
        let config = ArchiveConfig {
            raw_stats: true,
            raw_ema: true,
            dir: dir.path().to_path_buf().try_into()?,
        };
        let mut archive = RawArchive::create(&config)?;
        assert!(archive.is_enabled());

        let counters = BTreeMap::from([(2u32, 1500u64), (3, 42)]);
        archive.record_stats(7, &counters)?;
        archive.record_stats(8, &counters)?;
        archive.record_ema(7, &BTreeMap::from([(2u32, 12.5f64)]))?;

        let stats = std::fs::read_to_string(archive.stats_path().unwrap())?;
        let lines: Vec<_> = stats.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0])?;
        assert_eq!(first["timestamp"], 7);
        assert_eq!(first["counters"]["2"], 1500);

        let ema = std::fs::read_to_string(archive.ema_path().unwrap())?;
        let line: serde_json::Value = serde_json::from_str(ema.trim())?;
        assert_eq!(line["ema"]["2"], 12.5);
        Ok(())
    }

    #[test]
    fn disabled_archive_is_noop() -> Result<()> {
        let mut archive = RawArchive::disabled();
        assert!(!archive.is_enabled());
        archive.record_stats(1, &BTreeMap::new())?;
        archive.record_ema(1, &BTreeMap::new())?;
        Ok(())
    }

    #[test]
    fn discard_removes_files() -> Result<()> {
        let dir = Builder::new().tempdir()?;
        let config = ArchiveConfig {
            raw_stats: true,
            raw_ema: true,
            dir: dir.path().to_path_buf().try_into()?,
        };
        let archive = RawArchive::create(&config)?;
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 2);
        archive.discard();
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[test]
    fn unwritable_dir_fails_at_create() {
        let config = ArchiveConfig {
            raw_stats: true,
            raw_ema: false,
            dir: "/definitely/not/here".into(),
        };
        assert!(matches!(
            RawArchive::create(&config),
            Err(ArchiveError::Io { .. })
        ));
    }
}

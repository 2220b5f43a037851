//! bpffs 里 pin 住的快速路径对象
//!
//! 程序和 map 由外部的加载器 pin 到同一个目录下，这里只负责打开。
use super::raise_memlock_rlimit;
use crate::{
    event::{EventSource, EventSourceError},
    lifecycle::{FastPath, FastPathLoader, LoadError},
    metric::{MetricTable, TableError},
    route::ProgramRef,
};
use aya::{
    maps::{
        HashMap as BpfHashMap, Map, MapData,
        perf::{PerfEventArray, PerfEventArrayBuffer},
    },
    util::online_cpus,
};
use bytes::{Bytes, BytesMut};
use camino::{Utf8Path, Utf8PathBuf};
use std::{collections::VecDeque, fmt::Display, io, os::fd::AsRawFd, time::Duration};
use tracing::{debug, warn};

pub const PROGRAM_PIN: &str = "prog";
pub const TABLE_PIN: &str = "bw_bits_per_sec";
pub const EVENTS_PIN: &str = "log_entries";

const SCRATCH_BUFFERS: usize = 16;
const SCRATCH_CAPACITY: usize = 256;

fn open_error(path: &Utf8Path, err: impl Display) -> LoadError {
    LoadError::Open {
        path: path.to_owned(),
        reason: err.to_string(),
    }
}

fn open_pinned(path: &Utf8Path) -> Result<MapData, LoadError> {
    if !path.exists() {
        return Err(LoadError::Missing(path.to_owned()));
    }
    MapData::from_pin(path.as_std_path()).map_err(|err| open_error(path, err))
}

/// 链路 index 到带宽的共享 hash map
pub struct PinnedTable {
    map: BpfHashMap<MapData, u32, u64>,
}

impl PinnedTable {
    pub fn open(path: &Utf8Path) -> Result<Self, LoadError> {
        let map = BpfHashMap::try_from(Map::HashMap(open_pinned(path)?))
            .map_err(|err| open_error(path, err))?;
        Ok(Self { map })
    }
}

impl MetricTable for PinnedTable {
    fn update(&mut self, key: u32, value: u64) -> Result<(), TableError> {
        self.map
            .insert(key, value, 0)
            .map_err(|err| TableError::Rejected {
                key,
                reason: err.to_string(),
            })
    }
}

/// 每个 CPU 一个 perf 缓冲区，用 poll 等待任意一个可读
pub struct PerfEvents {
    buffers: Vec<PerfEventArrayBuffer<MapData>>,
    scratch: Vec<BytesMut>,
    pending: VecDeque<Bytes>,
}

impl PerfEvents {
    pub fn open(path: &Utf8Path) -> Result<Self, LoadError> {
        let mut array = PerfEventArray::try_from(Map::PerfEventArray(open_pinned(path)?))
            .map_err(|err| open_error(path, err))?;
        let cpus = online_cpus().map_err(|err| open_error(path, err))?;
        let buffers = cpus
            .into_iter()
            .map(|cpu| array.open(cpu, None))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| open_error(path, err))?;
        debug!("opened {} perf buffers from {}", buffers.len(), path);
        Ok(Self {
            buffers,
            scratch: vec![BytesMut::with_capacity(SCRATCH_CAPACITY); SCRATCH_BUFFERS],
            pending: VecDeque::new(),
        })
    }

    fn poll(&self, deadline: Duration) -> io::Result<bool> {
        let mut fds: Vec<libc::pollfd> = self
            .buffers
            .iter()
            .map(|buffer| libc::pollfd {
                fd: buffer.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();
        let timeout = deadline.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
        // SAFETY: fds 在调用期间有效，长度和 nfds 一致
        let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
        match ret {
            0 => Ok(false),
            n if n > 0 => Ok(true),
            _ => {
                let err = io::Error::last_os_error();
                // 被信号打断当作超时，由上层决定是否继续
                if err.kind() == io::ErrorKind::Interrupted {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        for buffer in self.buffers.iter_mut() {
            while buffer.readable() {
                let events = buffer.read_events(&mut self.scratch).map_err(io::Error::other)?;
                if events.lost > 0 {
                    warn!("fast path dropped {} diagnostic records", events.lost);
                }
                for record in self.scratch.iter_mut().take(events.read) {
                    self.pending.push_back(record.split().freeze());
                }
            }
        }
        Ok(())
    }
}

impl EventSource for PerfEvents {
    fn read(&mut self, deadline: Duration) -> Result<Bytes, EventSourceError> {
        if let Some(record) = self.pending.pop_front() {
            return Ok(record);
        }
        if !self.poll(deadline)? {
            return Err(EventSourceError::DeadlineExceeded);
        }
        self.fill()?;
        self.pending
            .pop_front()
            .ok_or(EventSourceError::DeadlineExceeded)
    }
}

/// 从 pin 目录打开 `prog`、`bw_bits_per_sec` 和 `log_entries`
#[derive(Debug, Clone)]
pub struct PinnedLoader {
    pin_dir: Utf8PathBuf,
}

impl PinnedLoader {
    pub fn new(pin_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            pin_dir: pin_dir.into(),
        }
    }
}

impl FastPathLoader for PinnedLoader {
    type Table = PinnedTable;
    type Events = PerfEvents;

    fn relax_limits(&self) -> Result<(), LoadError> {
        raise_memlock_rlimit().map_err(LoadError::Privilege)
    }

    fn load(&self) -> Result<FastPath<PinnedTable, PerfEvents>, LoadError> {
        let program = self.pin_dir.join(PROGRAM_PIN);
        if !program.exists() {
            return Err(LoadError::Missing(program));
        }
        // 先开表再开事件源，任一失败时已打开的 fd 随 drop 释放
        let table = PinnedTable::open(&self.pin_dir.join(TABLE_PIN))?;
        let events = PerfEvents::open(&self.pin_dir.join(EVENTS_PIN))?;
        Ok(FastPath {
            program: ProgramRef::pinned(program),
            table,
            events,
        })
    }
}

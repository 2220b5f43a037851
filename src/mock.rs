//! 测试用的假协作者
use crate::{
    config::{Config, valid_settings},
    event::{EventSink, EventSource, EventSourceError, render},
    lifecycle::{FastPath, FastPathLoader, LoadError},
    link::{LinkError, LinkSource, LinkStats},
    metric::{MemoryTable, MetricTable, TableError},
    route::{ProgramRef, RouteBinding, RouteError, RouteInstaller},
};
use bytes::Bytes;
use rustc_hash::FxHashSet;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

pub fn mock_config() -> Config {
    valid_settings().validate().unwrap()
}

/// 按脚本返回枚举结果，脚本用完后重复最后一次成功的结果
pub struct ScriptedLinks {
    script: VecDeque<Result<Vec<LinkStats>, LinkError>>,
    last: Vec<LinkStats>,
}

impl ScriptedLinks {
    pub fn new(script: Vec<Result<Vec<LinkStats>, LinkError>>) -> Self {
        Self {
            script: script.into(),
            last: Vec::new(),
        }
    }
}

impl LinkSource for ScriptedLinks {
    fn list(&mut self) -> Result<Vec<LinkStats>, LinkError> {
        match self.script.pop_front() {
            Some(Ok(links)) => {
                self.last = links.clone();
                Ok(links)
            }
            Some(Err(err)) => Err(err),
            None => Ok(self.last.clone()),
        }
    }
}

/// 指定的键写入时报错，其余写进内存表
#[derive(Clone, Default)]
pub struct FlakyTable {
    inner: MemoryTable,
    rejected: Arc<FxHashSet<u32>>,
}

impl FlakyTable {
    pub fn rejecting(keys: impl IntoIterator<Item = u32>) -> Self {
        Self {
            inner: MemoryTable::new(),
            rejected: Arc::new(keys.into_iter().collect()),
        }
    }

    pub fn inner(&self) -> &MemoryTable {
        &self.inner
    }
}

impl MetricTable for FlakyTable {
    fn update(&mut self, key: u32, value: u64) -> Result<(), TableError> {
        if self.rejected.contains(&key) {
            return Err(TableError::Rejected {
                key,
                reason: "map is full".into(),
            });
        }
        self.inner.update(key, value)
    }
}

enum Step {
    Record(Bytes),
    Fail,
}

/// 脚本用完后每次读取都睡满 deadline 再超时，`flood` 模式下无限产出同一条记录
pub struct ScriptedEvents {
    steps: VecDeque<Step>,
    flood: Option<Bytes>,
}

impl ScriptedEvents {
    pub fn records<I, R>(records: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Bytes>,
    {
        Self {
            steps: records.into_iter().map(|r| Step::Record(r.into())).collect(),
            flood: None,
        }
    }

    pub fn flood(record: impl Into<Bytes>) -> Self {
        Self {
            steps: VecDeque::new(),
            flood: Some(record.into()),
        }
    }

    pub fn then_fail(mut self) -> Self {
        self.steps.push_back(Step::Fail);
        self
    }
}

impl EventSource for ScriptedEvents {
    fn read(&mut self, deadline: Duration) -> Result<Bytes, EventSourceError> {
        match self.steps.pop_front() {
            Some(Step::Record(record)) => Ok(record),
            Some(Step::Fail) => Err(std::io::Error::other("perf ring buffer gone").into()),
            None => match &self.flood {
                Some(record) => Ok(record.clone()),
                None => {
                    std::thread::sleep(deadline);
                    Err(EventSourceError::DeadlineExceeded)
                }
            },
        }
    }
}

#[derive(Clone, Default)]
pub struct CollectSink {
    records: Arc<Mutex<Vec<String>>>,
}

impl CollectSink {
    pub fn records(&self) -> Vec<String> {
        self.records.lock().unwrap().clone()
    }
}

impl EventSink for CollectSink {
    fn record(&mut self, record: &[u8]) {
        self.records.lock().unwrap().push(render(record).into_owned());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOp {
    Add,
    Del,
}

/// 记录所有路由操作，可以让 add 或 del 失败
#[derive(Clone, Default)]
pub struct RecordingRoutes {
    ops: Arc<Mutex<Vec<(RouteOp, RouteBinding)>>>,
    fail_add: bool,
    fail_del: bool,
}

impl RecordingRoutes {
    pub fn failing_add() -> Self {
        Self {
            fail_add: true,
            ..Default::default()
        }
    }

    pub fn failing_del() -> Self {
        Self {
            fail_del: true,
            ..Default::default()
        }
    }

    pub fn ops(&self) -> Vec<RouteOp> {
        self.ops.lock().unwrap().iter().map(|(op, _)| *op).collect()
    }

    pub fn bindings(&self) -> Vec<RouteBinding> {
        self.ops.lock().unwrap().iter().map(|(_, b)| b.clone()).collect()
    }
}

impl RouteInstaller for RecordingRoutes {
    fn add(&mut self, binding: &RouteBinding) -> Result<(), RouteError> {
        if self.fail_add {
            return Err(RouteError::Rejected {
                op: "add",
                status: Some(2),
                stderr: "RTNETLINK answers: File exists".into(),
            });
        }
        self.ops.lock().unwrap().push((RouteOp::Add, binding.clone()));
        Ok(())
    }

    fn del(&mut self, binding: &RouteBinding) -> Result<(), RouteError> {
        self.ops.lock().unwrap().push((RouteOp::Del, binding.clone()));
        if self.fail_del {
            return Err(RouteError::Rejected {
                op: "del",
                status: Some(2),
                stderr: "RTNETLINK answers: No such process".into(),
            });
        }
        Ok(())
    }
}

/// 内存表加脚本事件源，`loads` 记录加载次数
pub struct MockLoader {
    pub table: MemoryTable,
    pub fail_relax: bool,
    pub fail_load: bool,
    events: Mutex<Option<ScriptedEvents>>,
    pub loads: Arc<Mutex<u32>>,
}

impl MockLoader {
    pub fn new(events: ScriptedEvents) -> Self {
        Self {
            table: MemoryTable::new(),
            fail_relax: false,
            fail_load: false,
            events: Mutex::new(Some(events)),
            loads: Arc::default(),
        }
    }

    pub fn idle() -> Self {
        Self::new(ScriptedEvents::records::<_, &str>([]))
    }
}

impl FastPathLoader for MockLoader {
    type Table = MemoryTable;
    type Events = ScriptedEvents;

    fn relax_limits(&self) -> Result<(), LoadError> {
        if self.fail_relax {
            return Err(LoadError::Privilege(std::io::Error::from_raw_os_error(1)));
        }
        Ok(())
    }

    fn load(&self) -> Result<FastPath<MemoryTable, ScriptedEvents>, LoadError> {
        if self.fail_load {
            return Err(LoadError::Missing("/sys/fs/bpf/srv6_steer/prog".into()));
        }
        *self.loads.lock().unwrap() += 1;
        let events = self
            .events
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| LoadError::Missing("events already taken".into()))?;
        Ok(FastPath {
            program: ProgramRef::pinned("/sys/fs/bpf/srv6_steer/prog"),
            table: self.table.clone(),
            events,
        })
    }
}

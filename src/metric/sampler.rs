use super::{ArchiveError, Delta, MetricPolicy, MetricTable, Publisher, RawArchive, TableError, unix_nanos};
use crate::{
    config::Config,
    ewma::{Ewma, EwmaError},
    lifecycle::ShutdownSignal,
    link::{LinkError, LinkIdentity, LinkSample, LinkSource},
};
use rustc_hash::{FxHashMap, FxHashSet};
use std::{
    collections::{BTreeMap, hash_map::Entry},
    time::Duration,
};
use thiserror::Error;
use tokio::{
    sync::oneshot,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error(transparent)]
    Links(#[from] LinkError),
    #[error("{failed} of {attempted} metric updates failed, last: {source}")]
    Publish {
        failed: usize,
        attempted: usize,
        source: TableError,
    },
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Span(#[from] EwmaError),
    #[error("giving up after {count} consecutive failed ticks: {last}")]
    TooManyFailures { count: u32, last: Box<SamplerError> },
}

/// 单条链路在一个 tick 内的结果，首个 tick 只有基线，`delta` 为 `None`
#[derive(Debug, Clone, PartialEq)]
pub struct LinkReading {
    pub link: LinkIdentity,
    pub delta: Option<Delta>,
    pub smoothed: Option<f64>,
    pub published: Option<u64>,
}

#[derive(Debug, Default)]
pub struct TickReport {
    pub tick: u64,
    pub readings: Vec<LinkReading>,
}

impl TickReport {
    pub fn reading(&self, index: u32) -> Option<&LinkReading> {
        self.readings.iter().find(|r| r.link.index == index)
    }

    pub fn published(&self) -> usize {
        self.readings.iter().filter(|r| r.published.is_some()).count()
    }
}

struct LinkState {
    sample: LinkSample,
    ema: Ewma,
}

/// 定时读取链路计数，算速率，平滑后写入共享表
///
/// 每条链路的基线与估计器只由这里持有，tick 之间不会并发。
pub struct Sampler<L, T> {
    links: L,
    publisher: Publisher<T>,
    policy: MetricPolicy,
    estimator: Ewma,
    interval: Duration,
    max_failures: u32,
    states: FxHashMap<u32, LinkState>,
    tick: u64,
    archive: RawArchive,
}

impl<L: LinkSource, T: MetricTable> Sampler<L, T> {
    pub fn new(config: &Config, links: L, table: T) -> Result<Self, SamplerError> {
        Ok(Self {
            links,
            publisher: Publisher::new(table),
            policy: config.policy,
            estimator: Ewma::new(config.ema_span)?,
            interval: config.interval,
            max_failures: config.max_consecutive_failures,
            states: FxHashMap::default(),
            tick: 0,
            archive: RawArchive::disabled(),
        })
    }

    pub fn with_archive(mut self, archive: RawArchive) -> Self {
        self.archive = archive;
        self
    }

    pub fn tracked_links(&self) -> usize {
        self.states.len()
    }

    /// 时间取自读完计数的那一刻，测试里由暂停的 tokio 时钟驱动
    pub fn tick(&mut self) -> Result<TickReport, SamplerError> {
        self.tick += 1;
        let tick = self.tick;
        let policy = self.policy;
        let observed = self.links.list()?;
        let now = Instant::now().into_std();

        let mut report = TickReport {
            tick,
            readings: Vec::with_capacity(observed.len()),
        };
        let mut seen = FxHashSet::default();
        let mut counters = BTreeMap::new();
        let (mut attempted, mut failed, mut last_err) = (0, 0, None);

        for stats in observed {
            let link = stats.identity;
            let counter = policy.counter(&stats.counters);
            let sample = LinkSample {
                counter,
                taken_at: now,
            };
            seen.insert(link.index);
            counters.insert(link.index, counter);

            let state = match self.states.entry(link.index) {
                Entry::Vacant(entry) => {
                    debug!("baseline for {}: {}", link, counter);
                    entry.insert(LinkState {
                        sample,
                        ema: self.estimator.clone(),
                    });
                    report.readings.push(LinkReading {
                        link,
                        delta: None,
                        smoothed: None,
                        published: None,
                    });
                    continue;
                }
                Entry::Occupied(entry) => entry.into_mut(),
            };

            let elapsed = now.saturating_duration_since(state.sample.taken_at);
            let delta = policy.delta(state.sample.counter, counter, elapsed);
            state.sample = sample;

            let rate = match delta {
                Delta::Rate(rate) => rate,
                Delta::Reset { previous, current } => {
                    warn!(
                        "counter of {} went backwards ({} -> {}), treating rate as 0 and rebaselining",
                        link, previous, current
                    );
                    report.readings.push(LinkReading {
                        link,
                        delta: Some(delta),
                        smoothed: None,
                        published: None,
                    });
                    continue;
                }
            };
            let value = if policy.is_smoothed() {
                state.ema.update(rate)
            } else {
                rate
            };
            let out = policy.publishable(value);
            debug!("{}: {} -> {}", link, policy.describe(rate), out);

            attempted += 1;
            let published = match self.publisher.publish(&link, out) {
                Ok(()) => Some(out),
                Err(err) => {
                    warn!("failed to publish metric for {}: {}", link, err);
                    failed += 1;
                    last_err = Some(err);
                    None
                }
            };
            report.readings.push(LinkReading {
                link,
                delta: Some(delta),
                smoothed: policy.is_smoothed().then_some(value),
                published,
            });
        }

        // 从枚举里消失的链路连同估计器一起丢掉，再出现时重新建基线
        self.states.retain(|index, _| seen.contains(index));

        // 发布失败的 tick 也要归档
        let archived = self.archive_tick(&counters);
        if let Some(source) = last_err {
            if let Err(err) = archived {
                warn!("failed to archive tick {}: {}", tick, err);
            }
            return Err(SamplerError::Publish {
                failed,
                attempted,
                source,
            });
        }
        archived?;
        Ok(report)
    }

    fn archive_tick(&mut self, counters: &BTreeMap<u32, u64>) -> Result<(), ArchiveError> {
        if !self.archive.is_enabled() {
            return Ok(());
        }
        let ts = unix_nanos();
        self.archive.record_stats(ts, counters)?;
        let ema = self
            .states
            .iter()
            .filter_map(|(index, state)| state.ema.value().ok().map(|v| (*index, v)))
            .collect();
        self.archive.record_ema(ts, &ema)
    }

    /// 第一次采样在一个周期之后，之后每个周期一次，直到收到停止信号
    pub async fn run(
        mut self,
        shutdown: ShutdownSignal,
        ready: oneshot::Sender<()>,
    ) -> Result<(), SamplerError> {
        let start = Instant::now() + self.interval;
        let mut ticker = interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "metric sampler started: policy {}, interval {:?}",
            self.policy, self.interval
        );
        let _ = ready.send(());

        let mut failures = 0u32;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.fired() => {
                    info!("stopping metric sampler");
                    return Ok(());
                }
                _ = ticker.tick() => match self.tick() {
                    Ok(report) => {
                        failures = 0;
                        trace!("tick {}: {} links, {} published", report.tick, report.readings.len(), report.published());
                    }
                    Err(err) => {
                        failures += 1;
                        if failures >= self.max_failures {
                            error!("metric sampler failed {} ticks in a row: {}", failures, err);
                            return Err(SamplerError::TooManyFailures {
                                count: failures,
                                last: Box::new(err),
                            });
                        }
                        warn!("sampling tick failed ({}/{}): {}", failures, self.max_failures, err);
                    }
                }
            }
        }
    }
}

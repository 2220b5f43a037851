use super::{FastPath, FastPathLoader, LoadError, ShutdownSignal};
use crate::{
    config::Config,
    event::{DrainError, DrainLoop, EventSink, TracingSink},
    link::{LinkError, LinkSource},
    metric::{ArchiveError, RawArchive, Sampler, SamplerError},
    route::{RouteBinding, RouteError, RouteInstaller},
};
use std::{fmt::Display, sync::Arc};
use thiserror::Error;
use tokio::{
    sync::{oneshot, watch},
    task::{JoinError, JoinHandle},
};
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("startup link enumeration failed: {0}")]
    Inventory(#[source] LinkError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("failed to add route {binding}: {source}")]
    RouteInstall {
        binding: RouteBinding,
        source: RouteError,
    },
    #[error("{0} exited before it was ready")]
    NotReady(&'static str),
    #[error(transparent)]
    Sampler(#[from] SamplerError),
    #[error(transparent)]
    Drain(#[from] DrainError),
    #[error("{0} task failed: {1}")]
    Join(&'static str, #[source] JoinError),
    #[error("failed to delete route {binding}, it is still installed: {source}")]
    RouteRemove {
        binding: RouteBinding,
        source: RouteError,
    },
}

/// `Uninitialized → RouteInstalled → Running → Draining → RouteRemoved → Terminated`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    RouteInstalled,
    Running,
    Draining,
    RouteRemoved,
    Terminated,
}

impl Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// 装路由、起两个循环、等停止请求、收循环、删路由
///
/// 路由只由这里增删；只有安装成功过才会尝试删除，删除一定在两个循环都退出之后。
pub struct LifecycleManager<P, L, R> {
    config: Arc<Config>,
    loader: P,
    links: L,
    routes: R,
    sink: Box<dyn EventSink>,
    shutdown: ShutdownSignal,
    phase: watch::Sender<Phase>,
}

impl<P, L, R> LifecycleManager<P, L, R>
where
    P: FastPathLoader,
    L: LinkSource,
    R: RouteInstaller,
{
    pub fn new(config: Arc<Config>, loader: P, links: L, routes: R) -> Self {
        let (phase, _) = watch::channel(Phase::Uninitialized);
        Self {
            config,
            loader,
            links,
            routes,
            sink: Box::new(TracingSink),
            shutdown: ShutdownSignal::new(),
            phase,
        }
    }

    pub fn with_sink(mut self, sink: impl EventSink) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// `terminate` 完成即开始收尾；任一循环提前退出也会走同样的收尾流程
    pub async fn run<F>(self, terminate: F) -> Result<(), LifecycleError>
    where
        F: Future<Output = ()>,
    {
        let Self {
            config,
            loader,
            mut links,
            mut routes,
            sink,
            shutdown,
            phase,
        } = self;
        let enter = |next: Phase| {
            info!("lifecycle: {}", next);
            phase.send_replace(next);
        };

        // 这一段任何失败都直接返回，已经拿到的句柄随 drop 释放
        loader.relax_limits()?;
        let FastPath {
            program,
            table,
            events,
        } = loader.load()?;
        info!("loaded fast path program: {}", program);

        let inventory = links.list().map_err(LifecycleError::Inventory)?;
        for link in &inventory {
            info!("found link {}", link.identity);
        }
        let sampler = Sampler::new(&config, links, table)?;
        let archive = RawArchive::create(&config.archive)?;
        let drain = DrainLoop::new(events, sink, config.drain_deadline);

        let binding = RouteBinding {
            prefix: config.prefix,
            gateway: config.gateway,
            program,
            priority: config.priority,
        };
        if let Err(source) = routes.add(&binding) {
            archive.discard();
            return Err(LifecycleError::RouteInstall { binding, source });
        }
        let sampler = sampler.with_archive(archive);
        info!("added route: {}", binding);
        enter(Phase::RouteInstalled);

        let (sampler_ready, sampler_ready_rx) = oneshot::channel();
        let (drain_ready, drain_ready_rx) = oneshot::channel();
        let mut sampler_task = tokio::spawn(sampler.run(shutdown.clone(), sampler_ready));
        let mut drain_task = tokio::spawn(drain.run(shutdown.clone(), drain_ready));

        let (sampler_ready, drain_ready) = (sampler_ready_rx.await, drain_ready_rx.await);
        let mut not_ready = None;
        let (mut sampler_done, mut drain_done) = (None, None);
        match (sampler_ready, drain_ready) {
            (Ok(()), Ok(())) => {
                enter(Phase::Running);
                tokio::select! {
                    _ = terminate => info!("termination requested"),
                    res = &mut sampler_task => {
                        warn!("metric sampler exited while running");
                        sampler_done = Some(res);
                    }
                    res = &mut drain_task => {
                        warn!("event reader exited while running");
                        drain_done = Some(res);
                    }
                }
            }
            (Err(_), _) => not_ready = Some(LifecycleError::NotReady("metric sampler")),
            (_, Err(_)) => not_ready = Some(LifecycleError::NotReady("event reader")),
        }

        enter(Phase::Draining);
        shutdown.fire();
        let sampler_result = join("metric sampler", sampler_task, sampler_done).await;
        let drain_result = join("event reader", drain_task, drain_done).await;

        let removed = match routes.del(&binding) {
            Ok(()) => {
                info!("deleted route: {}", binding);
                enter(Phase::RouteRemoved);
                Ok(())
            }
            Err(source) => {
                error!(
                    "failed to delete route {}: {}; the route is still installed and must be removed by hand",
                    binding, source
                );
                Err(LifecycleError::RouteRemove { binding, source })
            }
        };
        enter(Phase::Terminated);

        if let Some(err) = not_ready {
            return Err(err);
        }
        sampler_result?;
        drain_result?;
        removed
    }
}

async fn join<T, E>(
    name: &'static str,
    task: JoinHandle<Result<T, E>>,
    done: Option<Result<Result<T, E>, JoinError>>,
) -> Result<T, LifecycleError>
where
    LifecycleError: From<E>,
{
    let result = match done {
        Some(result) => result,
        None => task.await,
    };
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            let err = LifecycleError::from(err);
            error!("{} stopped with error: {}", name, err);
            Err(err)
        }
        Err(err) => Err(LifecycleError::Join(name, err)),
    }
}

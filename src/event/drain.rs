use super::{EventSink, EventSource, EventSourceError};
use crate::lifecycle::ShutdownSignal;
use bytes::Bytes;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::{JoinError, spawn_blocking},
};
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum DrainError {
    #[error(transparent)]
    Source(#[from] EventSourceError),
    #[error("event reader task failed: {0}")]
    Reader(#[from] JoinError),
}

/// 把阻塞的事件源接到可取消的循环上
///
/// 读取放在 blocking 线程里，每次最多阻塞 `deadline`，通过容量为 1 的通道交给外层。
/// 外层退出前一定会等读取线程结束。
pub struct DrainLoop<E, S> {
    source: E,
    sink: S,
    deadline: Duration,
}

impl<E: EventSource, S: EventSink> DrainLoop<E, S> {
    pub fn new(source: E, sink: S, deadline: Duration) -> Self {
        Self {
            source,
            sink,
            deadline,
        }
    }

    pub async fn run(
        self,
        shutdown: ShutdownSignal,
        ready: oneshot::Sender<()>,
    ) -> Result<(), DrainError> {
        let Self {
            mut source,
            mut sink,
            deadline,
        } = self;
        let (tx, mut rx) = mpsc::channel::<Bytes>(1);
        let stop = Arc::new(AtomicBool::new(false));

        let reader = {
            let stop = stop.clone();
            spawn_blocking(move || -> Result<(), EventSourceError> {
                while !stop.load(Ordering::Acquire) {
                    match source.read(deadline) {
                        Ok(record) => {
                            // 接收端已经关掉，说明外层在停
                            if tx.blocking_send(record).is_err() {
                                break;
                            }
                        }
                        Err(EventSourceError::DeadlineExceeded) => continue,
                        Err(err) => return Err(err),
                    }
                }
                Ok(())
            })
        };
        info!("event reader started, read deadline {:?}", deadline);
        let _ = ready.send(());

        loop {
            tokio::select! {
                biased;
                _ = shutdown.fired() => {
                    info!("stopping event reader");
                    break;
                }
                record = rx.recv() => match record {
                    Some(record) => sink.record(&record),
                    None => break,
                }
            }
        }

        stop.store(true, Ordering::Release);
        drop(rx);
        reader.await?.inspect_err(|err| error!("event reader failed: {}", err))?;
        Ok(())
    }
}

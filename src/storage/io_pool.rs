//! 有界ワーカースレッドプール
//!
//! チャンクI/Oとリクエストディスパッチをそれぞれ固定サイズのスレッドプールで実行する。
//! 各タスクは `TaskHandle` (oneshot の Future) を返し、投入側はそれを await する。
//! 1タスクは1つのワーカー上で最後まで実行され、途中で他タスクと入れ替わらない。

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use futures::channel::oneshot;

use super::error::ChunkStorageError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// ワーカーあたりのキュー深さ
const QUEUE_DEPTH_PER_WORKER: usize = 64;

/// 固定サイズのタスクプール
pub struct TaskPool {
    name: String,
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskPool {
    /// `workers` 本のスレッドを持つプールを作成
    pub fn new(name: &str, workers: usize) -> std::io::Result<Self> {
        let workers = workers.max(1);
        let (sender, receiver) = crossbeam_channel::bounded::<Job>(workers * QUEUE_DEPTH_PER_WORKER);

        let mut handles = Vec::with_capacity(workers);
        for worker_idx in 0..workers {
            let rx: Receiver<Job> = receiver.clone();
            let handle = std::thread::Builder::new()
                .name(format!("{}-{}", name, worker_idx))
                .spawn(move || {
                    for job in rx.iter() {
                        // パニックしたタスクは送信側がドロップされ、待機側には PoolClosed が返る
                        if std::panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            tracing::error!("Task panicked on worker {}", worker_idx);
                        }
                    }
                })?;
            handles.push(handle);
        }

        tracing::debug!("Task pool {} started with {} workers", name, workers);

        Ok(Self {
            name: name.to_string(),
            sender: Some(sender),
            workers: handles,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// タスクを投入し、結果を受け取る Future を返す
    ///
    /// キューが満杯の場合は空きができるまでブロックする。
    pub fn submit<F, T>(&self, task: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            // 待機側が先に諦めていても結果は捨てるだけ
            let _ = tx.send(task());
        });

        if let Some(sender) = &self.sender {
            if sender.send(job).is_err() {
                tracing::warn!("Task pool {} is closed, dropping task", self.name);
            }
        }

        TaskHandle { receiver: rx }
    }

    /// キューを閉じ、実行中のタスクが終わるまで待つ
    pub fn shutdown(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("Worker of pool {} exited with panic", self.name);
            }
        }
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// 投入済みタスクの結果
pub struct TaskHandle<T> {
    receiver: oneshot::Receiver<T>,
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, ChunkStorageError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|res| res.map_err(|_| ChunkStorageError::PoolClosed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_submit_and_wait() {
        let pool = TaskPool::new("test-io", 2).unwrap();
        assert_eq!(pool.worker_count(), 2);

        let handles: Vec<_> = (0..16u64).map(|i| pool.submit(move || i * 2)).collect();
        let results = futures::executor::block_on(futures::future::join_all(handles));
        let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, (0..16u64).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_bounded_concurrency() {
        let pool = TaskPool::new("test-bound", 3).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..24)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                pool.submit(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(2));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        futures::executor::block_on(futures::future::join_all(handles));

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn test_panicking_task_reports_closed() {
        let pool = TaskPool::new("test-panic", 1).unwrap();
        let handle = pool.submit(|| -> u32 { panic!("boom") });
        let result = futures::executor::block_on(handle);
        assert!(matches!(result, Err(ChunkStorageError::PoolClosed)));

        // ワーカーは生き残っている
        let handle = pool.submit(|| 7u32);
        assert_eq!(futures::executor::block_on(handle).unwrap(), 7);
    }

    #[test]
    fn test_submit_after_shutdown() {
        let mut pool = TaskPool::new("test-shutdown", 1).unwrap();
        pool.shutdown();
        let handle = pool.submit(|| 1u32);
        assert!(futures::executor::block_on(handle).is_err());
    }
}

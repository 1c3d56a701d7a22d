//! 停止信号 + 致命错误传播
//! Shutdown signal shared by every stage; the first fatal error wins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::error;

use crate::error::PipelineError;

/// 所有阶段共享的停止信号
///
/// 触发时丢弃内部发送端, 所有 `sleep` 中的等待立即返回
pub struct Shutdown {
    flag: AtomicBool,
    notify_tx: Mutex<Option<Sender<()>>>,
    notify_rx: Receiver<()>,
    fatal: Mutex<Option<PipelineError>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            flag: AtomicBool::new(false),
            notify_tx: Mutex::new(Some(tx)),
            notify_rx: rx,
            fatal: Mutex::new(None),
        }
    }

    /// 请求停止 (幂等)
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// 记录致命错误并停止流水线; 只保留第一个错误
    pub fn fail(&self, err: PipelineError) {
        {
            let mut fatal = self.fatal.lock().unwrap_or_else(PoisonError::into_inner);
            if fatal.is_none() {
                error!("❌ 流水线致命错误: {err}");
                *fatal = Some(err);
            }
        }
        self.trigger();
    }

    pub fn take_error(&self) -> Option<PipelineError> {
        self.fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// 可中断睡眠; 完整睡满返回 true, 被停止信号唤醒返回 false
    pub fn sleep(&self, duration: Duration) -> bool {
        if self.is_triggered() {
            return false;
        }
        match self.notify_rx.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => !self.is_triggered(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_sleep_runs_full_duration_without_trigger() {
        let shutdown = Shutdown::new();
        assert!(shutdown.sleep(Duration::from_millis(5)));
    }

    #[test]
    fn test_trigger_wakes_sleeper() {
        let shutdown = Arc::new(Shutdown::new());
        let waker = shutdown.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            waker.trigger();
        });
        let start = Instant::now();
        assert!(!shutdown.sleep(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_first_error_wins() {
        let shutdown = Shutdown::new();
        shutdown.fail(PipelineError::DeviceLost("first".into()));
        shutdown.fail(PipelineError::Invariant("second".into()));
        assert!(shutdown.is_triggered());
        match shutdown.take_error() {
            Some(PipelineError::DeviceLost(msg)) => assert_eq!(msg, "first"),
            other => panic!("unexpected {other:?}"),
        }
    }
}

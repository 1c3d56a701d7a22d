//! 采集 → 推理 帧队列 (满时丢弃最旧帧)
//! Bounded single-producer/single-consumer frame queue with drop-oldest backpressure.
//!
//! 生产者额外持有一个接收端, 队列满时先弹出最旧帧再插入新帧,
//! 采集线程因此永远不会被慢速消费者阻塞。

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use super::source::Frame;
use crate::error::PipelineError;

/// 创建容量为 `capacity` 的帧队列
pub fn frame_queue(capacity: usize) -> Result<(FrameProducer, FrameConsumer), PipelineError> {
    if capacity == 0 {
        return Err(PipelineError::Invariant(
            "frame queue capacity must be at least 1".to_string(),
        ));
    }
    let (tx, rx) = bounded(capacity);
    Ok((
        FrameProducer {
            tx,
            evict: rx.clone(),
            capacity,
        },
        FrameConsumer { rx },
    ))
}

/// 生产端 (采集线程独占)
pub struct FrameProducer {
    tx: Sender<Frame>,
    evict: Receiver<Frame>,
    capacity: usize,
}

impl FrameProducer {
    /// 入队; 队列已满时返回被挤出的最旧帧
    pub fn push(&self, frame: Frame) -> Option<Frame> {
        let mut frame = frame;
        let mut evicted = None;
        loop {
            match self.tx.try_send(frame) {
                Ok(()) => return evicted,
                Err(TrySendError::Full(back)) => {
                    frame = back;
                    // 单生产者: 弹出一帧后必有空位; 若消费者恰好抢先取走, 直接重试
                    if evicted.is_none() {
                        evicted = self.evict.try_recv().ok();
                    }
                }
                // 自身持有接收端, 通道不会断开
                Err(TrySendError::Disconnected(_)) => return evicted,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// 消费端 (推理线程独占)
pub struct FrameConsumer {
    rx: Receiver<Frame>,
}

impl FrameConsumer {
    /// 有界等待下一帧 (FIFO, 最旧的存活帧先出)
    pub fn pop_timeout(&self, wait: Duration) -> Result<Frame, RecvTimeoutError> {
        self.rx.recv_timeout(wait)
    }

    pub fn try_pop(&self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

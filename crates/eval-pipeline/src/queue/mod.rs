use crate::utils::error::EvalError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use tracing::debug;

/// Everything a worker needs to run one evaluation without further lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub job_id: String,
    pub job_record_id: i64,
    pub job_title: String,
    pub cv_text: String,
    pub project_text: String,
    pub owner_id: i32,
}

/// One at-least-once delivery of a work item. The receipt ties ack/nack back
/// to the in-flight entry.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub receipt: u64,
    pub item: WorkItem,
}

/// FIFO work queue with at-least-once delivery. `dequeue` hands the item to
/// exactly one consumer; `ack` retires it, `nack` optionally puts it back at
/// the front for redelivery.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(&self, item: WorkItem) -> Result<(), EvalError>;
    async fn dequeue(&self) -> Option<Delivery>;
    async fn ack(&self, delivery: &Delivery);
    async fn nack(&self, delivery: Delivery, redeliver: bool);
}

struct QueueState {
    ready: VecDeque<Delivery>,
    in_flight: HashMap<u64, WorkItem>,
    next_receipt: u64,
}

/// Bounded in-process queue. Items survive a nack but not a process restart;
/// the stale-queued sweep at startup covers the restart case.
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
    capacity: usize,
}

impl InMemoryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                ready: VecDeque::new(),
                in_flight: HashMap::new(),
                next_receipt: 1,
            }),
            capacity: capacity.max(1),
        }
    }

    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.ready.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl WorkQueue for InMemoryQueue {
    async fn enqueue(&self, item: WorkItem) -> Result<(), EvalError> {
        let mut state = self.state.lock().await;
        if state.ready.len() >= self.capacity {
            return Err(EvalError::Transient(format!(
                "work queue full (capacity {})",
                self.capacity
            )));
        }
        let receipt = state.next_receipt;
        state.next_receipt += 1;
        debug!("Enqueued job {} (receipt {})", item.job_id, receipt);
        state.ready.push_back(Delivery { receipt, item });
        Ok(())
    }

    async fn dequeue(&self) -> Option<Delivery> {
        let mut state = self.state.lock().await;
        let delivery = state.ready.pop_front()?;
        state
            .in_flight
            .insert(delivery.receipt, delivery.item.clone());
        Some(delivery)
    }

    async fn ack(&self, delivery: &Delivery) {
        let mut state = self.state.lock().await;
        state.in_flight.remove(&delivery.receipt);
    }

    async fn nack(&self, delivery: Delivery, redeliver: bool) {
        let mut state = self.state.lock().await;
        state.in_flight.remove(&delivery.receipt);
        if redeliver {
            debug!("Redelivering job {}", delivery.item.job_id);
            state.ready.push_front(delivery);
        }
    }
}

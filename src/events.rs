//! # Job Events
//!
//! Lifecycle events broadcast over channels to whoever subscribes (the CLI
//! logs them; a UI layer would render them). Progress itself stays
//! pull-based through [`crate::job::JobExecutor::snapshot`].

use std::sync::Mutex;

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::datamodel::JobId;
use crate::job::CancelReason;

#[derive(Debug, Clone)]
pub enum JobEvent {
    Started { job_id: JobId, data_source: String },
    Completed { job_id: JobId },
    Cancelled { job_id: JobId, reason: CancelReason },
    ModuleError { job_id: JobId, module: String, message: String },
}

/// Fan-out of job events to any number of subscribers. Disconnected
/// subscribers are dropped on the next publish.
#[derive(Default)]
pub struct EventHub {
    subscribers: Mutex<Vec<Sender<JobEvent>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<JobEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    pub fn publish(&self, event: JobEvent) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::JobId;

    #[test]
    fn publish_reaches_every_subscriber() {
        let hub = EventHub::new();
        let a = hub.subscribe();
        let b = hub.subscribe();
        hub.publish(JobEvent::Completed { job_id: JobId(7) });
        assert!(matches!(a.try_recv(), Ok(JobEvent::Completed { job_id }) if job_id == JobId(7)));
        assert!(matches!(b.try_recv(), Ok(JobEvent::Completed { job_id }) if job_id == JobId(7)));
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let hub = EventHub::new();
        let rx = hub.subscribe();
        drop(rx);
        hub.publish(JobEvent::Completed { job_id: JobId(1) });
        assert!(hub.subscribers.lock().unwrap().is_empty());
    }
}

//! In-memory port bus.
//!
//! Models the kernel-owned channel fabric between cooperating processes:
//! numbered ports, each a FIFO of JSON frames. Servers drain their
//! well-known port; every client owns the port numbered by its origin id
//! and waits on it for replies.

use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
struct Port {
    queue: VecDeque<Value>,
    notify: Arc<Notify>,
}

/// Shared frame bus. Cheap to clone; clones address the same ports.
#[derive(Clone, Default)]
pub struct PortBus {
    ports: Arc<Mutex<HashMap<u64, Port>>>,
}

impl PortBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame to `port`, waking a waiting reader if any.
    pub fn post(&self, port: u64, frame: Value) {
        let notify = {
            let mut ports = self.ports.lock().expect("port bus poisoned");
            let entry = ports.entry(port).or_default();
            entry.queue.push_back(frame);
            entry.notify.clone()
        };
        notify.notify_one();
    }

    /// Take every pending frame off `port`.
    pub fn drain(&self, port: u64) -> Vec<Value> {
        let mut ports = self.ports.lock().expect("port bus poisoned");
        match ports.get_mut(&port) {
            Some(entry) => entry.queue.drain(..).collect(),
            None => Vec::new(),
        }
    }

    /// Pop the next frame from `port` without waiting.
    pub fn try_next(&self, port: u64) -> Option<Value> {
        let mut ports = self.ports.lock().expect("port bus poisoned");
        ports.get_mut(&port)?.queue.pop_front()
    }

    /// Wait up to `timeout` for the next frame on `port`.
    ///
    /// Each port is expected to have a single reader; a stored wakeup permit
    /// covers the race between checking the queue and going to sleep.
    pub async fn next_frame(&self, port: u64, timeout: Duration) -> Option<Value> {
        tokio::time::timeout(timeout, async {
            loop {
                let notify = {
                    let mut ports = self.ports.lock().expect("port bus poisoned");
                    let entry = ports.entry(port).or_default();
                    if let Some(frame) = entry.queue.pop_front() {
                        return frame;
                    }
                    entry.notify.clone()
                };
                notify.notified().await;
            }
        })
        .await
        .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_post_then_drain_preserves_order() {
        let bus = PortBus::new();
        bus.post(5, json!(1));
        bus.post(5, json!(2));
        bus.post(5, json!(3));

        assert_eq!(bus.drain(5), vec![json!(1), json!(2), json!(3)]);
        assert!(bus.drain(5).is_empty());
    }

    #[test]
    fn test_ports_are_independent() {
        let bus = PortBus::new();
        bus.post(1, json!("a"));
        bus.post(2, json!("b"));

        assert_eq!(bus.try_next(2), Some(json!("b")));
        assert_eq!(bus.try_next(1), Some(json!("a")));
        assert_eq!(bus.try_next(1), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_frame_returns_pending_frame() {
        let bus = PortBus::new();
        bus.post(9, json!("hello"));
        let frame = bus.next_frame(9, Duration::from_secs(1)).await;
        assert_eq!(frame, Some(json!("hello")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_frame_wakes_on_post() {
        let bus = PortBus::new();
        let reader = bus.clone();
        let task = tokio::spawn(async move { reader.next_frame(9, Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        bus.post(9, json!("late"));

        assert_eq!(task.await.unwrap(), Some(json!("late")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_frame_times_out() {
        let bus = PortBus::new();
        let start = tokio::time::Instant::now();
        let frame = bus.next_frame(9, Duration::from_secs(2)).await;
        assert_eq!(frame, None);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}

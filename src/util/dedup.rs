use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use crate::protocol::Message;

const DEFAULT_CAPACITY: usize = 32;

/// Remembers recently delivered messages and recognizes relayed copies of
/// them.
///
/// A repeater retransmits a message with its TTL decremented, so the same
/// logical message can arrive several times within one propagation window.
#[derive(Debug)]
pub struct DuplicateFilter {
    window: Duration,
    capacity: usize,
    recent: VecDeque<(Instant, Message)>,
}

impl DuplicateFilter {
    pub fn new(window: Duration) -> Self {
        DuplicateFilter {
            window,
            capacity: DEFAULT_CAPACITY,
            recent: VecDeque::with_capacity(DEFAULT_CAPACITY),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns true if `msg` duplicates a message seen within the window.
    /// Messages that are not duplicates are remembered.
    pub fn is_duplicate(&mut self, msg: &Message) -> bool {
        let now = Instant::now();
        while let Some((seen, _)) = self.recent.front() {
            if now.duration_since(*seen) > self.window {
                self.recent.pop_front();
            } else {
                break;
            }
        }

        if self.recent.iter().any(|(_, seen)| msg.is_duplicate_of(seen)) {
            return true;
        }

        if self.recent.len() == self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back((now, msg.clone()));
        false
    }
}

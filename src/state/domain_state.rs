use std::time::{Duration, Instant};

/// Per-domain timing state kept by the politeness plugins
///
/// Each plugin instance owns its own map of these; nothing here is shared
/// between plugins or engines.
#[derive(Debug, Clone, Default)]
pub struct DomainState {
    /// Number of requests let through to this domain
    pub request_count: u32,

    /// When the last request to this domain was let through
    pub last_request_time: Option<Instant>,

    /// Requests must not be sent before this instant (from `Retry-After`)
    pub blocked_until: Option<Instant>,
}

impl DomainState {
    /// Creates a DomainState with no history
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that a request was let through at `now`
    pub fn record_request(&mut self, now: Instant) {
        self.request_count += 1;
        self.last_request_time = Some(now);
    }

    /// Time left before `spacing` has elapsed since the last request
    ///
    /// The last request time may lie in the future when a slot has been
    /// reserved. Returns None if a request can be made now.
    pub fn time_until_next_request(&self, spacing: Duration, now: Instant) -> Option<Duration> {
        let next = self.last_request_time? + spacing;
        if next > now {
            Some(next - now)
        } else {
            None
        }
    }

    /// Blocks the domain until `until`, never shortening an existing block
    pub fn block_until(&mut self, until: Instant) {
        match self.blocked_until {
            Some(current) if current >= until => {}
            _ => self.blocked_until = Some(until),
        }
    }

    /// Remaining block time, clearing the block once it has passed
    pub fn remaining_block(&mut self, now: Instant) -> Option<Duration> {
        let until = self.blocked_until?;
        if until > now {
            Some(until - now)
        } else {
            self.blocked_until = None;
            None
        }
    }
}

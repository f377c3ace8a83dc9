//! No-response watchdog bookkeeping.
//!
//! Arming mints a ticket bound to the turn it was armed under. The timer itself
//! lives in the session driver; when it fires, the ticket is presented back and
//! accepted only if it is still the armed one. Turn-state re-validation happens in
//! the state machine at fire time, never from a value captured at arm time.

/// Handle for one arming of the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchdogTicket {
    pub id: u64,
    pub turn_id: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Watchdog {
    armed: Option<WatchdogTicket>,
    next_id: u64,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm for `turn_id`. Returns the new ticket and the one it displaced, if any.
    pub fn arm(&mut self, turn_id: u64) -> (WatchdogTicket, Option<WatchdogTicket>) {
        self.next_id += 1;
        let ticket = WatchdogTicket {
            id: self.next_id,
            turn_id,
        };
        let previous = self.armed.replace(ticket);
        (ticket, previous)
    }

    /// Cancel the pending arming, returning its ticket so the timer can be released.
    pub fn disarm(&mut self) -> Option<WatchdogTicket> {
        self.armed.take()
    }

    /// Consume `ticket` if it is the armed one. A ticket fires at most once.
    pub fn fire(&mut self, ticket: &WatchdogTicket) -> bool {
        if self.armed.as_ref() == Some(ticket) {
            self.armed = None;
            true
        } else {
            false
        }
    }
}

//! SID allocation and pending-exchange tracking for one connection.
//!
//! The registry maps each outstanding SID to its [`Exchange`]. Removing an
//! entry is the single point where an exchange becomes complete: whichever of
//! reply, timeout, error or cancellation removes it first owns the callback,
//! and every later attempt finds nothing.

use std::collections::HashMap;

use tokio::time::Instant;

use crate::error::{FinsError, Result};
use crate::exchange::{Exchange, ReplyCallback};

/// Lowest SID handed out; 0 is never used.
pub const MIN_SID: u8 = 1;

/// Highest SID handed out.
pub const MAX_SID: u8 = u8::MAX;

/// Number of usable SIDs.
pub const SID_SPACE: usize = (MAX_SID - MIN_SID) as usize + 1;

/// An exchange awaiting completion.
pub(crate) struct Pending {
    pub exchange: Exchange,
    pub deadline: Instant,
    pub started: Instant,
    pub on_reply: Option<ReplyCallback>,
    /// Set once the request frame has been written to the transport.
    pub sent: bool,
}

impl Pending {
    pub fn new(exchange: Exchange, started: Instant, deadline: Instant, on_reply: Option<ReplyCallback>) -> Self {
        Self {
            exchange,
            deadline,
            started,
            on_reply,
            sent: false,
        }
    }
}

/// SID to pending-exchange map, scoped to one connection.
#[derive(Default)]
pub(crate) struct SequenceRegistry {
    pending: HashMap<u8, Pending>,
    last_sid: u8,
}

impl SequenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next SID after the last one issued, skipping SIDs still outstanding.
    ///
    /// The counter advances even when the SID is never inserted, so SIDs are
    /// not reused before the range wraps.
    pub fn next_sid(&mut self) -> Result<u8> {
        if self.pending.len() >= SID_SPACE {
            return Err(FinsError::SidExhausted {
                outstanding: self.pending.len(),
            });
        }
        let mut sid = self.last_sid;
        loop {
            sid = if sid >= MAX_SID { MIN_SID } else { sid + 1 };
            if !self.pending.contains_key(&sid) {
                self.last_sid = sid;
                return Ok(sid);
            }
        }
    }

    /// Registers a pending exchange under its SID.
    ///
    /// # Errors
    ///
    /// `FinsError::SidCollision` if the SID is still held.
    pub fn insert(&mut self, pending: Pending) -> Result<()> {
        let sid = pending.exchange.sid;
        if self.pending.contains_key(&sid) {
            return Err(FinsError::SidCollision { sid });
        }
        self.pending.insert(sid, pending);
        Ok(())
    }

    /// Removes and returns the exchange for `sid`. Returns `None` if it
    /// already completed.
    pub fn complete(&mut self, sid: u8) -> Option<Pending> {
        self.pending.remove(&sid)
    }

    pub fn get(&self, sid: u8) -> Option<&Pending> {
        self.pending.get(&sid)
    }

    pub fn get_mut(&mut self, sid: u8) -> Option<&mut Pending> {
        self.pending.get_mut(&sid)
    }

    pub fn contains(&self, sid: u8) -> bool {
        self.pending.contains_key(&sid)
    }

    /// Removes every exchange whose deadline is at or before `now`, earliest first.
    pub fn take_expired(&mut self, now: Instant) -> Vec<Pending> {
        let expired: Vec<u8> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(sid, _)| *sid)
            .collect();
        let mut taken: Vec<Pending> = expired
            .into_iter()
            .filter_map(|sid| self.pending.remove(&sid))
            .collect();
        taken.sort_by_key(|p| p.deadline);
        taken
    }

    /// Removes every pending exchange, in SID issue order.
    pub fn drain(&mut self) -> Vec<Pending> {
        let mut all: Vec<Pending> = self.pending.drain().map(|(_, p)| p).collect();
        all.sort_by_key(|p| p.started);
        all
    }

    /// Number of exchanges sent and awaiting a reply.
    pub fn in_flight(&self) -> usize {
        self.pending.values().filter(|p| p.sent).count()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use super::*;
    use crate::command::{CommandOptions, Request};

    fn pending(sid: u8, deadline: Instant) -> Pending {
        let exchange = Exchange::new(sid, Request::status(CommandOptions::default()), None);
        Pending::new(exchange, Instant::now(), deadline, None)
    }

    fn issue(registry: &mut SequenceRegistry, deadline: Instant) -> u8 {
        let sid = registry.next_sid().unwrap();
        registry.insert(pending(sid, deadline)).unwrap();
        sid
    }

    #[test]
    fn test_sids_start_at_one_and_increase() {
        let mut registry = SequenceRegistry::new();
        let deadline = Instant::now() + Duration::from_secs(1);
        assert_eq!(issue(&mut registry, deadline), 1);
        assert_eq!(issue(&mut registry, deadline), 2);
        assert_eq!(issue(&mut registry, deadline), 3);
    }

    #[test]
    fn test_sids_unique_among_outstanding() {
        let mut registry = SequenceRegistry::new();
        let deadline = Instant::now() + Duration::from_secs(1);
        let mut seen = HashSet::new();
        for _ in 0..SID_SPACE {
            assert!(seen.insert(issue(&mut registry, deadline)));
        }
        assert!(!seen.contains(&0));
        assert!(matches!(
            registry.next_sid(),
            Err(FinsError::SidExhausted { outstanding: 255 })
        ));
    }

    #[test]
    fn test_wraparound_skips_outstanding() {
        let mut registry = SequenceRegistry::new();
        let deadline = Instant::now() + Duration::from_secs(1);
        for _ in 0..SID_SPACE {
            issue(&mut registry, deadline);
        }
        // free 2 and 200; 1 stays outstanding
        registry.complete(2).unwrap();
        registry.complete(200).unwrap();

        assert_eq!(registry.next_sid().unwrap(), 2);
        assert_eq!(registry.next_sid().unwrap(), 200);
    }

    #[test]
    fn test_insert_collision() {
        let mut registry = SequenceRegistry::new();
        let deadline = Instant::now() + Duration::from_secs(1);
        registry.insert(pending(7, deadline)).unwrap();
        assert!(matches!(
            registry.insert(pending(7, deadline)),
            Err(FinsError::SidCollision { sid: 7 })
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_complete_is_idempotent() {
        let mut registry = SequenceRegistry::new();
        let sid = issue(&mut registry, Instant::now() + Duration::from_secs(1));
        assert!(registry.complete(sid).is_some());
        assert!(registry.complete(sid).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_take_expired() {
        let mut registry = SequenceRegistry::new();
        let now = Instant::now();
        let late = issue(&mut registry, now + Duration::from_secs(10));
        let second = issue(&mut registry, now - Duration::from_millis(1));
        let first = issue(&mut registry, now - Duration::from_millis(5));

        let expired: Vec<u8> = registry
            .take_expired(now)
            .iter()
            .map(|p| p.exchange.sid)
            .collect();
        assert_eq!(expired, vec![first, second]);
        assert!(registry.contains(late));
        assert!(registry.take_expired(now).is_empty());
    }

    #[test]
    fn test_in_flight_counts_sent_only() {
        let mut registry = SequenceRegistry::new();
        let deadline = Instant::now() + Duration::from_secs(1);
        let a = issue(&mut registry, deadline);
        issue(&mut registry, deadline);
        registry.get_mut(a).unwrap().sent = true;
        assert_eq!(registry.in_flight(), 1);
        assert!(registry.get(a).unwrap().sent);
    }

    #[test]
    fn test_drain_empties() {
        let mut registry = SequenceRegistry::new();
        let deadline = Instant::now() + Duration::from_secs(1);
        issue(&mut registry, deadline);
        issue(&mut registry, deadline);
        assert_eq!(registry.drain().len(), 2);
        assert!(registry.is_empty());
    }
}

//! Matchmaking queue.
//!
//! Two-contestant pairing with bot fallback:
//!
//! - `enqueue` pairs with the oldest waiting entry, or parks the caller
//!   under a fresh ticket
//! - the caller arms a fallback timer for the ticket with [`Matchmaker::arm`]
//! - the timer claims its entry with [`Matchmaker::take`]; a cancel or a
//!   pairing that got there first makes `take` return `None`
//!
//! All mutations go through one mutex, so removal of an entry is observed
//! exactly once.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::task::AbortHandle;

use crate::session::SessionId;

pub type TicketId = u64;

/// Result of [`Matchmaker::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Paired with `partner`, who waited longest and takes slot A.
    Paired { partner: SessionId },
    /// Nobody waiting; parked under this ticket.
    Waiting(TicketId),
}

struct QueuedEntry {
    ticket: TicketId,
    session: SessionId,
    fallback: Option<AbortHandle>,
}

impl QueuedEntry {
    fn disarm(self) {
        if let Some(timer) = self.fallback {
            timer.abort();
        }
    }
}

#[derive(Default)]
struct Queue {
    entries: VecDeque<QueuedEntry>,
    next_ticket: TicketId,
}

/// Matchmaking service.
#[derive(Default)]
pub struct Matchmaker {
    queue: Mutex<Queue>,
}

impl Matchmaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair `session` with a waiting entry or park it.
    pub fn enqueue(&self, session: SessionId) -> Result<Enqueued, MatchmakerError> {
        let mut queue = self.queue.lock();
        if queue.entries.iter().any(|e| e.session == session) {
            return Err(MatchmakerError::AlreadyQueued(session));
        }

        if let Some(partner) = queue.entries.pop_front() {
            let partner_session = partner.session;
            partner.disarm();
            return Ok(Enqueued::Paired {
                partner: partner_session,
            });
        }

        queue.next_ticket += 1;
        let ticket = queue.next_ticket;
        queue.entries.push_back(QueuedEntry {
            ticket,
            session,
            fallback: None,
        });
        Ok(Enqueued::Waiting(ticket))
    }

    /// Attach the fallback timer for `ticket`. If the entry is already gone
    /// the timer is aborted on the spot.
    pub fn arm(&self, ticket: TicketId, timer: AbortHandle) {
        let mut queue = self.queue.lock();
        match queue.entries.iter_mut().find(|e| e.ticket == ticket) {
            Some(entry) => {
                if let Some(old) = entry.fallback.replace(timer) {
                    old.abort();
                }
            }
            None => timer.abort(),
        }
    }

    /// Claim a still-queued entry for the fallback path.
    pub fn take(&self, ticket: TicketId) -> Option<SessionId> {
        let mut queue = self.queue.lock();
        let pos = queue.entries.iter().position(|e| e.ticket == ticket)?;
        queue.entries.remove(pos).map(|e| e.session)
    }

    /// Remove `session` from the queue and disarm its timer.
    pub fn cancel(&self, session: SessionId) -> bool {
        let mut queue = self.queue.lock();
        let Some(pos) = queue.entries.iter().position(|e| e.session == session) else {
            return false;
        };
        if let Some(entry) = queue.entries.remove(pos) {
            entry.disarm();
        }
        true
    }

    pub fn is_queued(&self, session: SessionId) -> bool {
        self.queue.lock().entries.iter().any(|e| e.session == session)
    }

    pub fn len(&self) -> usize {
        self.queue.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().entries.is_empty()
    }
}

/// Matchmaking errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchmakerError {
    #[error("session already queued: {0}")]
    AlreadyQueued(SessionId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_waits_second_pairs() {
        let mm = Matchmaker::new();
        assert!(matches!(mm.enqueue(1), Ok(Enqueued::Waiting(_))));
        assert_eq!(mm.len(), 1);

        assert_eq!(mm.enqueue(2), Ok(Enqueued::Paired { partner: 1 }));
        assert!(mm.is_empty());
        assert!(!mm.is_queued(1));
    }

    #[test]
    fn test_taken_entry_is_not_paired() {
        let mm = Matchmaker::new();
        let Ok(Enqueued::Waiting(t1)) = mm.enqueue(1) else {
            panic!("expected waiting");
        };
        assert_eq!(mm.take(t1), Some(1));
        assert!(matches!(mm.enqueue(3), Ok(Enqueued::Waiting(_))));
        assert_eq!(mm.enqueue(4), Ok(Enqueued::Paired { partner: 3 }));
    }

    #[test]
    fn test_duplicate_enqueue_rejected() {
        let mm = Matchmaker::new();
        mm.enqueue(7).unwrap();
        assert_eq!(mm.enqueue(7), Err(MatchmakerError::AlreadyQueued(7)));
        assert_eq!(mm.len(), 1);
    }

    #[test]
    fn test_take_observed_once() {
        let mm = Matchmaker::new();
        let Ok(Enqueued::Waiting(ticket)) = mm.enqueue(1) else {
            panic!("expected waiting");
        };
        assert_eq!(mm.take(ticket), Some(1));
        assert_eq!(mm.take(ticket), None);
    }

    #[test]
    fn test_cancel_beats_fallback() {
        let mm = Matchmaker::new();
        let Ok(Enqueued::Waiting(ticket)) = mm.enqueue(1) else {
            panic!("expected waiting");
        };
        assert!(mm.cancel(1));
        assert!(!mm.cancel(1));
        assert_eq!(mm.take(ticket), None);
    }

    #[tokio::test]
    async fn test_cancel_aborts_timer() {
        let mm = Matchmaker::new();
        let Ok(Enqueued::Waiting(ticket)) = mm.enqueue(1) else {
            panic!("expected waiting");
        };
        let timer = tokio::spawn(tokio::time::sleep(Duration::from_secs(3600)));
        mm.arm(ticket, timer.abort_handle());

        mm.cancel(1);
        assert!(timer.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_pairing_aborts_partner_timer() {
        let mm = Matchmaker::new();
        let Ok(Enqueued::Waiting(ticket)) = mm.enqueue(1) else {
            panic!("expected waiting");
        };
        let timer = tokio::spawn(tokio::time::sleep(Duration::from_secs(3600)));
        mm.arm(ticket, timer.abort_handle());

        mm.enqueue(2).unwrap();
        assert!(timer.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_arm_after_removal_aborts() {
        let mm = Matchmaker::new();
        let Ok(Enqueued::Waiting(ticket)) = mm.enqueue(1) else {
            panic!("expected waiting");
        };
        mm.cancel(1);

        let timer = tokio::spawn(tokio::time::sleep(Duration::from_secs(3600)));
        mm.arm(ticket, timer.abort_handle());
        assert!(timer.await.unwrap_err().is_cancelled());
    }
}

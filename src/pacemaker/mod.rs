/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Round timeouts.
//!
//! # Liveness through round changes
//!
//! A sequence can only be committed if a quorum of validators spend long enough in the same round for
//! its proposer to propose and for the Prepares and Commits to go around. If the proposer of a round is
//! faulty, or the network is slow, this never happens, and the validators must give up on the round.
//!
//! Every validator therefore runs a round timer for the view it is in. When the timer of the current
//! view expires before the sequence is committed, the validator broadcasts a request to move to the
//! next round (a RoundChange). Once `f + 1` validators have requested a round, at least one honest
//! validator gave up on the current one, and everyone moves (see
//! [`QuorumTracker::add_round_change`](crate::pbft::tracker::QuorumTracker::add_round_change)).
//!
//! ## Exponentially increasing timeouts
//!
//! Round timeouts double with every round:
//!
//! ```text
//! timeout(round) = min(request_timeout * 2^round, max_request_timeout)
//! ```
//!
//! so that, after enough round changes, a round is long enough for a quorum of validators to overlap in
//! it even if their clocks and message delays differ. `max_request_timeout` caps how long a single
//! faulty proposer can stall the chain.
//!
//! A validator whose timer fires again while it is still in the same view keeps asking for a higher
//! round than the last one it asked for, and waits for the timeout of that requested round.

use std::{
    cmp::min,
    sync::mpsc::{self, RecvTimeoutError, Sender},
    thread,
    time::Duration,
};

use crate::{
    algorithm::InboundEvent,
    types::basic::{Round, View},
};

/// Computes the timeout of each round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeoutPolicy {
    request_timeout: Duration,
    max_request_timeout: Duration,
}

impl TimeoutPolicy {
    pub fn new(request_timeout: Duration, max_request_timeout: Duration) -> TimeoutPolicy {
        TimeoutPolicy {
            request_timeout,
            max_request_timeout,
        }
    }

    /// `min(request_timeout * 2^round, max_request_timeout)`.
    pub fn timeout(&self, round: Round) -> Duration {
        let exponent = u32::try_from(round.int()).unwrap_or(u32::MAX);
        match 2u32
            .checked_pow(exponent)
            .and_then(|factor| self.request_timeout.checked_mul(factor))
        {
            Some(timeout) => min(timeout, self.max_request_timeout),
            None => self.max_request_timeout,
        }
    }
}

/// Posts a [`InboundEvent::Timeout`] for a view into the consensus thread's inbound queue once the view's
/// timeout elapses, unless it is cancelled or re-armed first.
///
/// At most one timer is pending at a time. Each armed timer runs on its own short-lived thread, which
/// exits as soon as the timer is cancelled. A timeout that arrives after the consensus thread has moved
/// on from its view is ignored by the consensus thread.
pub(crate) struct RoundTimer {
    inbound: Option<Sender<InboundEvent>>,
    cancel: Option<Sender<()>>,
}

impl RoundTimer {
    /// Create a timer that is not attached to any inbound queue. Arming it does nothing until it is
    /// [attached](Self::attach).
    pub(crate) fn new() -> RoundTimer {
        RoundTimer {
            inbound: None,
            cancel: None,
        }
    }

    /// Post future timeouts into `inbound`.
    pub(crate) fn attach(&mut self, inbound: Sender<InboundEvent>) {
        self.inbound = Some(inbound)
    }

    /// Cancel the pending timer and stop posting timeouts.
    pub(crate) fn detach(&mut self) {
        self.cancel();
        self.inbound = None;
    }

    /// Cancel the pending timer, if any, and start a timer that expires for `view` after `duration`.
    pub(crate) fn arm(&mut self, view: View, duration: Duration) {
        self.cancel();
        let inbound = match &self.inbound {
            Some(inbound) => inbound.clone(),
            None => return,
        };

        let (cancel, cancelled) = mpsc::channel::<()>();
        thread::spawn(move || {
            // Both an explicit cancel and a dropped handle wake the thread up early.
            if let Err(RecvTimeoutError::Timeout) = cancelled.recv_timeout(duration) {
                let _ = inbound.send(InboundEvent::Timeout(view));
            }
        });
        self.cancel = Some(cancel);
    }

    /// Cancel the pending timer, if any.
    pub(crate) fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

impl Drop for RoundTimer {
    fn drop(&mut self) {
        self.cancel()
    }
}

#[test]
fn timeout_doubles_until_capped_test() {
    let policy = TimeoutPolicy::new(Duration::from_secs(1), Duration::from_secs(60));

    assert_eq!(policy.timeout(Round::new(0)), Duration::from_secs(1));
    assert_eq!(policy.timeout(Round::new(1)), Duration::from_secs(2));
    assert_eq!(policy.timeout(Round::new(5)), Duration::from_secs(32));
    assert_eq!(policy.timeout(Round::new(6)), Duration::from_secs(60));
    assert_eq!(policy.timeout(Round::new(40)), Duration::from_secs(60));
    assert_eq!(policy.timeout(Round::new(u64::MAX)), Duration::from_secs(60));
}

#[test]
fn round_timer_fires_once_unless_cancelled_test() {
    use crate::types::basic::Sequence;

    let (inbound, timeouts) = mpsc::channel();
    let mut timer = RoundTimer::new();
    timer.attach(inbound);

    let first = View::start_of(Sequence::new(1));
    let second = first.with_round(Round::new(1));

    // Re-arming cancels the first timer.
    timer.arm(first, Duration::from_millis(50));
    timer.arm(second, Duration::from_millis(50));
    match timeouts.recv_timeout(Duration::from_secs(5)) {
        Ok(InboundEvent::Timeout(view)) => assert_eq!(view, second),
        _ => panic!("expected a timeout for the second view"),
    }
    assert!(timeouts.recv_timeout(Duration::from_millis(200)).is_err());

    // A cancelled timer never fires.
    timer.arm(first, Duration::from_millis(50));
    timer.cancel();
    assert!(timeouts.recv_timeout(Duration::from_millis(200)).is_err());
}

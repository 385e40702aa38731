//! Exactly-once transition side effects for the ready screen.
//!
//! [`TransitionCoordinator`] is a synchronous state machine. It reads the
//! reconciled [`SessionView`] and connection events and answers with
//! [`Effect`]s for the controller to carry out. Every guard flag and pending
//! deadline lives in this struct and changes only through its methods, so an
//! effect is always decided against the latest state with no await in
//! between.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::protocol::SessionStatus;
use crate::store::SessionView;

/// Delay between losing the push channel and starting the poller.
pub const DEFAULT_FALLBACK_DELAY: Duration = Duration::from_millis(2000);

/// Grace window between everyone being ready and the confirm request.
pub const DEFAULT_READY_CONFIRM_DELAY: Duration = Duration::from_millis(3000);

/// Pause between observing `in_progress` and navigating to the match.
pub const DEFAULT_NAVIGATION_DELAY: Duration = Duration::from_millis(1000);

/// Delays used by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionTimings {
    /// See [`DEFAULT_FALLBACK_DELAY`].
    pub fallback_delay: Duration,
    /// See [`DEFAULT_READY_CONFIRM_DELAY`].
    pub ready_confirm_delay: Duration,
    /// See [`DEFAULT_NAVIGATION_DELAY`].
    pub navigation_delay: Duration,
}

impl Default for TransitionTimings {
    fn default() -> Self {
        Self {
            fallback_delay: DEFAULT_FALLBACK_DELAY,
            ready_confirm_delay: DEFAULT_READY_CONFIRM_DELAY,
            navigation_delay: DEFAULT_NAVIGATION_DELAY,
        }
    }
}

/// A side effect the controller must perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Start the fallback poller.
    StartPoller,
    /// Stop the fallback poller.
    StopPoller,
    /// Fetch the current status once to seed state after connecting.
    SeedFetch,
    /// Re-submit ready to the server so it can start the match.
    ConfirmReady,
    /// Navigate to the match screen.
    NavigateToMatch,
    /// Navigate to the "opponent disconnected" screen.
    NavigateToDisconnected,
}

/// Owner of the ready screen's guard flags.
#[derive(Debug)]
pub struct TransitionCoordinator {
    timings: TransitionTimings,
    has_navigated: bool,
    match_navigation_sent: bool,
    initial_fetch_done: bool,
    terminated: bool,
    pending_start: Option<Instant>,
    navigate_at: Option<Instant>,
    fallback_at: Option<Instant>,
}

impl TransitionCoordinator {
    /// Create a coordinator with no flags set and nothing scheduled.
    pub fn new(timings: TransitionTimings) -> Self {
        Self {
            timings,
            has_navigated: false,
            match_navigation_sent: false,
            initial_fetch_done: false,
            terminated: false,
            pending_start: None,
            navigate_at: None,
            fallback_at: None,
        }
    }

    /// React to a changed view.
    pub fn observe(&mut self, view: &SessionView, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.terminated {
            return effects;
        }

        match view.status {
            Some(SessionStatus::Cancelled) => {
                self.cancel_timers();
                self.terminated = true;
                if self.match_navigation_sent {
                    debug!("session cancelled after match navigation; ignoring");
                } else {
                    info!(session_id = view.session_id, "session cancelled");
                    effects.push(Effect::NavigateToDisconnected);
                }
            }
            Some(SessionStatus::InProgress) => {
                if self.pending_start.take().is_some() {
                    debug!("match started before confirm fired; confirm cancelled");
                }
                if !self.has_navigated {
                    self.has_navigated = true;
                    self.navigate_at = Some(now + self.timings.navigation_delay);
                    info!(session_id = view.session_id, "match starting");
                }
            }
            Some(SessionStatus::Waiting | SessionStatus::Ready) | None => {
                if view.all_ready && !self.has_navigated {
                    if self.pending_start.is_none() {
                        self.pending_start = Some(now + self.timings.ready_confirm_delay);
                        debug!(session_id = view.session_id, "all ready; confirm scheduled");
                    }
                } else if self.pending_start.take().is_some() {
                    debug!(session_id = view.session_id, "readiness lost; confirm cancelled");
                }
            }
        }

        effects
    }

    /// The push channel connected.
    pub fn on_connected(&mut self) -> Vec<Effect> {
        let mut effects = vec![Effect::StopPoller];
        self.fallback_at = None;
        if self.terminated {
            return effects;
        }
        if !self.initial_fetch_done {
            self.initial_fetch_done = true;
            effects.push(Effect::SeedFetch);
        }
        effects
    }

    /// The push channel disconnected, failed, or is still connecting.
    ///
    /// Schedules fallback activation unless one is already pending.
    pub fn on_connection_lost(&mut self, now: Instant) {
        if self.terminated || self.fallback_at.is_some() {
            return;
        }
        self.fallback_at = Some(now + self.timings.fallback_delay);
        debug!("fallback activation scheduled");
    }

    /// Earliest pending deadline, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        [self.pending_start, self.navigate_at, self.fallback_at]
            .into_iter()
            .flatten()
            .min()
    }

    /// Fire every deadline at or before `now`.
    ///
    /// `connected` is the push channel state at fire time.
    pub fn on_deadline(&mut self, now: Instant, connected: bool) -> Vec<Effect> {
        let mut effects = Vec::new();

        if take_due(&mut self.fallback_at, now) && !self.terminated {
            if connected {
                debug!("push channel came back; fallback activation skipped");
            } else {
                effects.push(Effect::StartPoller);
            }
        }

        if take_due(&mut self.pending_start, now) && !self.terminated && !self.has_navigated {
            effects.push(Effect::ConfirmReady);
        }

        if take_due(&mut self.navigate_at, now) && !self.terminated && !self.match_navigation_sent
        {
            self.match_navigation_sent = true;
            effects.push(Effect::NavigateToMatch);
        }

        effects
    }

    /// End the session without a navigation effect, e.g. after the user left.
    pub fn terminate(&mut self) {
        self.cancel_timers();
        self.terminated = true;
    }

    /// Cancel every pending deadline. Idempotent.
    pub fn cancel_timers(&mut self) {
        self.pending_start = None;
        self.navigate_at = None;
        self.fallback_at = None;
    }

    /// `true` once match navigation has been scheduled.
    pub fn has_navigated(&self) -> bool {
        self.has_navigated
    }

    /// `true` once the post-connect seed fetch has been issued.
    pub fn initial_fetch_done(&self) -> bool {
        self.initial_fetch_done
    }

    /// `true` while a ready confirm is scheduled.
    pub fn has_pending_start(&self) -> bool {
        self.pending_start.is_some()
    }

    /// `true` once the session reached its cancellation path.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

fn take_due(slot: &mut Option<Instant>, now: Instant) -> bool {
    match *slot {
        Some(at) if at <= now => {
            *slot = None;
            true
        }
        _ => false,
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn view(status: SessionStatus, all_ready: bool) -> SessionView {
        SessionView {
            status: Some(status),
            all_ready,
            ..SessionView::new(3)
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn all_ready_schedules_one_confirm() {
        let mut c = TransitionCoordinator::new(TransitionTimings::default());
        let t0 = Instant::now();

        assert!(c.observe(&view(SessionStatus::Ready, true), t0).is_empty());
        assert_eq!(c.next_deadline(), Some(t0 + ms(3000)));

        // A second all-ready view does not push the deadline back.
        c.observe(&view(SessionStatus::Ready, true), t0 + ms(500));
        assert_eq!(c.next_deadline(), Some(t0 + ms(3000)));

        assert!(c.on_deadline(t0 + ms(2999), true).is_empty());
        assert_eq!(c.on_deadline(t0 + ms(3000), true), vec![Effect::ConfirmReady]);
        assert!(!c.has_pending_start());
    }

    #[test]
    fn cancel_before_confirm_suppresses_it() {
        let mut c = TransitionCoordinator::new(TransitionTimings::default());
        let t0 = Instant::now();

        c.observe(&view(SessionStatus::Ready, true), t0);
        let effects = c.observe(&view(SessionStatus::Cancelled, true), t0 + ms(1000));
        assert_eq!(effects, vec![Effect::NavigateToDisconnected]);
        assert!(c.on_deadline(t0 + ms(5000), false).is_empty());
        assert!(c.is_terminated());
    }

    #[test]
    fn losing_readiness_cancels_confirm() {
        let mut c = TransitionCoordinator::new(TransitionTimings::default());
        let t0 = Instant::now();

        c.observe(&view(SessionStatus::Waiting, true), t0);
        assert!(c.has_pending_start());
        c.observe(&view(SessionStatus::Waiting, false), t0 + ms(100));
        assert!(!c.has_pending_start());
    }

    #[test]
    fn in_progress_navigates_exactly_once_after_pacing() {
        let mut c = TransitionCoordinator::new(TransitionTimings::default());
        let t0 = Instant::now();

        c.observe(&view(SessionStatus::Ready, true), t0);
        c.observe(&view(SessionStatus::InProgress, true), t0 + ms(100));
        assert!(c.has_navigated());
        assert!(!c.has_pending_start());
        c.observe(&view(SessionStatus::InProgress, true), t0 + ms(200));

        assert!(c.on_deadline(t0 + ms(1099), false).is_empty());
        assert_eq!(c.on_deadline(t0 + ms(1100), false), vec![Effect::NavigateToMatch]);

        c.observe(&view(SessionStatus::InProgress, true), t0 + ms(1200));
        assert_eq!(c.next_deadline(), None);
    }

    #[test]
    fn cancel_during_pacing_wins_over_match() {
        let mut c = TransitionCoordinator::new(TransitionTimings::default());
        let t0 = Instant::now();

        c.observe(&view(SessionStatus::InProgress, true), t0);
        let effects = c.observe(&view(SessionStatus::Cancelled, true), t0 + ms(500));
        assert_eq!(effects, vec![Effect::NavigateToDisconnected]);
        assert!(c.on_deadline(t0 + ms(2000), false).is_empty());
    }

    #[test]
    fn cancel_after_match_navigation_is_silent() {
        let mut c = TransitionCoordinator::new(TransitionTimings::default());
        let t0 = Instant::now();

        c.observe(&view(SessionStatus::InProgress, true), t0);
        c.on_deadline(t0 + ms(1000), true);
        assert!(c
            .observe(&view(SessionStatus::Cancelled, true), t0 + ms(1500))
            .is_empty());
    }

    #[test]
    fn terminate_silences_everything() {
        let mut c = TransitionCoordinator::new(TransitionTimings::default());
        let t0 = Instant::now();

        c.observe(&view(SessionStatus::Ready, true), t0);
        c.terminate();
        assert_eq!(c.next_deadline(), None);
        assert!(c
            .observe(&view(SessionStatus::Cancelled, true), t0)
            .is_empty());
        assert_eq!(c.on_connected(), vec![Effect::StopPoller]);
    }

    #[test]
    fn seed_fetch_only_on_first_connect() {
        let mut c = TransitionCoordinator::new(TransitionTimings::default());
        assert_eq!(c.on_connected(), vec![Effect::StopPoller, Effect::SeedFetch]);
        assert!(c.initial_fetch_done());
        assert_eq!(c.on_connected(), vec![Effect::StopPoller]);
    }

    #[test]
    fn fallback_rechecks_connection_at_fire_time() {
        let mut c = TransitionCoordinator::new(TransitionTimings::default());
        let t0 = Instant::now();

        c.on_connection_lost(t0);
        assert!(c.on_deadline(t0 + ms(2000), true).is_empty());

        c.on_connection_lost(t0 + ms(3000));
        assert_eq!(c.on_deadline(t0 + ms(5000), false), vec![Effect::StartPoller]);
    }

    #[test]
    fn connecting_clears_pending_fallback() {
        let mut c = TransitionCoordinator::new(TransitionTimings::default());
        let t0 = Instant::now();

        c.on_connection_lost(t0);
        c.on_connected();
        assert_eq!(c.next_deadline(), None);
    }
}

//! Link State Machine
//!
//! Defines the connection lifecycle of the primary device: valid phase
//! transitions, the bounded automatic retry policy and the watchdog that
//! catches attempts which neither succeed nor fail.
//!
//! The machine is pure. It never sleeps, spawns or talks to hardware; every
//! side effect is returned as a [`LinkAction`] for the driver to perform.
//! Timers come back in as events tagged with the generation (watchdog) or
//! epoch (deferred connect) they were issued under, so a timer that outlived
//! its attempt is recognised and dropped.

use crate::timing;
use std::time::Duration;

/// Lifecycle phase of the link to the primary device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LinkPhase {
    /// No attempt made yet
    #[default]
    Idle,
    /// Attempt outstanding, including retry backoff
    Connecting,
    /// Device is talking to us
    Connected,
    /// Gave up; waits for a manual retry
    Failed,
}

/// Why an automatic retry was scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCause {
    /// The RFCOMM channel could not be opened
    RfcommChannel,
    /// The attempt went silent and the watchdog fired
    Watchdog,
}

impl std::fmt::Display for RetryCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryCause::RfcommChannel => write!(f, "RFCOMM channel failure"),
            RetryCause::Watchdog => write!(f, "Watchdog timeout"),
        }
    }
}

/// What a deferred connect was scheduled for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectTrigger {
    /// One-shot connect after the radio came up
    AutoConnect,
    /// Backoff retry after a transient failure
    Retry(RetryCause),
}

/// Identifies one armed watchdog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogHandle {
    generation: u64,
}

impl WatchdogHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Events that can drive the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Connect requested (user or auto-connect)
    Connect,
    /// Manual retry after a failure; starts a fresh retry budget
    RetryConnect,
    /// Host radio reported enabled
    RadioEnabled,
    /// Result of polling the radio probe
    RadioStatus(bool),
    /// Transport delivered data (or reported the link up)
    DataReceived,
    /// Transport could not reach the device at all
    TransportFailed,
    /// Device reached but the RFCOMM channel failed to open
    RfcommChannelFailed,
    /// A watchdog timer expired
    WatchdogFired { generation: u64 },
    /// A deferred connect came due
    DeferredConnect { epoch: u64, trigger: ConnectTrigger },
}

/// Side effects requested by a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    /// Resolve the primary device and ask the transport to connect to it
    ConnectTransport,
    /// Ask the transport to abandon the current attempt
    DisconnectTransport,
    /// Start the watchdog; it must report back with `generation`
    ArmWatchdog { generation: u64, after: Duration },
    /// Stop the watchdog with `generation` if it has not fired yet
    CancelWatchdog { generation: u64 },
    /// Feed `DeferredConnect { epoch, trigger }` back after `after`
    ScheduleConnect {
        epoch: u64,
        after: Duration,
        trigger: ConnectTrigger,
    },
}

/// Result of feeding an event to the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    /// Event was accepted
    Applied {
        from: LinkPhase,
        to: LinkPhase,
        actions: Vec<LinkAction>,
    },
    /// Event has no effect in the current phase
    Ignored { phase: LinkPhase, event: LinkEvent },
}

impl TransitionResult {
    /// Actions the driver must perform, empty when ignored
    pub fn actions(&self) -> &[LinkAction] {
        match self {
            TransitionResult::Applied { actions, .. } => actions,
            TransitionResult::Ignored { .. } => &[],
        }
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, TransitionResult::Ignored { .. })
    }
}

/// Retry and timeout policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTiming {
    pub watchdog_timeout: Duration,
    pub max_auto_retries: u32,
    pub rfcomm_retry_delay: Duration,
    pub watchdog_retry_delay: Duration,
    pub auto_connect_delay: Duration,
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self {
            watchdog_timeout: Duration::from_millis(timing::WATCHDOG_TIMEOUT_MS),
            max_auto_retries: timing::MAX_AUTO_RETRIES,
            rfcomm_retry_delay: Duration::from_millis(timing::RFCOMM_RETRY_DELAY_MS),
            watchdog_retry_delay: Duration::from_millis(timing::WATCHDOG_RETRY_DELAY_MS),
            auto_connect_delay: Duration::from_millis(timing::AUTO_CONNECT_DELAY_MS),
        }
    }
}

impl LinkTiming {
    fn retry_delay(&self, cause: RetryCause) -> Duration {
        match cause {
            RetryCause::RfcommChannel => self.rfcomm_retry_delay,
            RetryCause::Watchdog => self.watchdog_retry_delay,
        }
    }
}

/// Observable state for presentation layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkStatus {
    pub phase: LinkPhase,
    /// True while an attempt or its retry backoff is in flight
    pub loading: bool,
    /// True once the coordinator gave up, until the next attempt
    pub connection_failed: bool,
    pub radio_on: bool,
    pub retry_count: u32,
}

/// The connection lifecycle state machine
#[derive(Debug, Clone)]
pub struct LinkStateMachine {
    timing: LinkTiming,
    phase: LinkPhase,
    retry_count: u32,
    has_auto_connected: bool,
    radio_on: bool,
    watchdog: Option<WatchdogHandle>,
    last_generation: u64,
    epoch: u64,
}

impl Default for LinkStateMachine {
    fn default() -> Self {
        Self::new(LinkTiming::default(), false)
    }
}

impl LinkStateMachine {
    /// Create a new state machine in Idle state
    pub fn new(timing: LinkTiming, radio_on: bool) -> Self {
        Self {
            timing,
            phase: LinkPhase::Idle,
            retry_count: 0,
            has_auto_connected: false,
            radio_on,
            watchdog: None,
            last_generation: 0,
            epoch: 0,
        }
    }

    pub fn phase(&self) -> LinkPhase {
        self.phase
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn has_auto_connected(&self) -> bool {
        self.has_auto_connected
    }

    pub fn radio_on(&self) -> bool {
        self.radio_on
    }

    /// The armed watchdog, if any
    pub fn watchdog(&self) -> Option<WatchdogHandle> {
        self.watchdog
    }

    /// Current epoch; deferred connects issued under an older epoch are stale
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn timing(&self) -> &LinkTiming {
        &self.timing
    }

    pub fn status(&self) -> LinkStatus {
        LinkStatus {
            phase: self.phase,
            loading: self.phase == LinkPhase::Connecting,
            connection_failed: self.phase == LinkPhase::Failed,
            radio_on: self.radio_on,
            retry_count: self.retry_count,
        }
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: LinkEvent) -> TransitionResult {
        use LinkPhase::*;

        let from = self.phase;
        let actions = match event {
            LinkEvent::Connect => {
                if self.phase == Connecting {
                    return self.ignore(event);
                }
                self.begin_attempt()
            }
            LinkEvent::RetryConnect => {
                if self.phase == Connecting {
                    return self.ignore(event);
                }
                self.has_auto_connected = false;
                self.retry_count = 0;
                self.begin_attempt()
            }
            LinkEvent::RadioEnabled => {
                self.radio_on = true;
                if self.has_auto_connected {
                    Vec::new()
                } else {
                    self.has_auto_connected = true;
                    let delay = self.timing.auto_connect_delay;
                    vec![self.schedule_connect(delay, ConnectTrigger::AutoConnect)]
                }
            }
            LinkEvent::RadioStatus(on) => {
                self.radio_on = on;
                Vec::new()
            }
            LinkEvent::DataReceived => {
                if self.phase == Connected {
                    return self.ignore(event);
                }
                let actions = self.cancel_watchdog();
                self.retry_count = 0;
                self.enter(Connected);
                actions
            }
            LinkEvent::TransportFailed => {
                if self.phase != Connecting {
                    return self.ignore(event);
                }
                let actions = self.cancel_watchdog();
                self.retry_count = 0;
                self.enter(Failed);
                actions
            }
            LinkEvent::RfcommChannelFailed => {
                if self.phase != Connecting {
                    return self.ignore(event);
                }
                let mut actions = self.cancel_watchdog();
                actions.extend(self.transient_failure(RetryCause::RfcommChannel));
                actions
            }
            LinkEvent::WatchdogFired { generation } => {
                let current = self.watchdog.map(|w| w.generation);
                if self.phase != Connecting || current != Some(generation) {
                    return self.ignore(event);
                }
                self.watchdog = None;
                let mut actions = Vec::new();
                let retry = self.transient_failure(RetryCause::Watchdog);
                if self.phase == Connecting {
                    // Abort the stuck attempt before the retry lands
                    actions.push(LinkAction::DisconnectTransport);
                }
                actions.extend(retry);
                actions
            }
            LinkEvent::DeferredConnect { epoch, trigger } => {
                if epoch != self.epoch {
                    return self.ignore(event);
                }
                match trigger {
                    ConnectTrigger::AutoConnect if self.phase == Connecting => {
                        return self.ignore(event);
                    }
                    ConnectTrigger::Retry(_) if self.phase != Connecting => {
                        return self.ignore(event);
                    }
                    _ => self.begin_attempt(),
                }
            }
        };

        TransitionResult::Applied {
            from,
            to: self.phase,
            actions,
        }
    }

    fn ignore(&self, event: LinkEvent) -> TransitionResult {
        TransitionResult::Ignored {
            phase: self.phase,
            event,
        }
    }

    fn enter(&mut self, phase: LinkPhase) {
        self.phase = phase;
        self.epoch += 1;
    }

    /// Start a connection attempt and arm a fresh watchdog
    fn begin_attempt(&mut self) -> Vec<LinkAction> {
        let mut actions = self.cancel_watchdog();
        self.has_auto_connected = true;
        self.enter(LinkPhase::Connecting);

        self.last_generation += 1;
        let generation = self.last_generation;
        self.watchdog = Some(WatchdogHandle { generation });

        actions.push(LinkAction::ConnectTransport);
        actions.push(LinkAction::ArmWatchdog {
            generation,
            after: self.timing.watchdog_timeout,
        });
        actions
    }

    fn cancel_watchdog(&mut self) -> Vec<LinkAction> {
        match self.watchdog.take() {
            Some(handle) => vec![LinkAction::CancelWatchdog {
                generation: handle.generation,
            }],
            None => Vec::new(),
        }
    }

    fn schedule_connect(&mut self, after: Duration, trigger: ConnectTrigger) -> LinkAction {
        self.epoch += 1;
        LinkAction::ScheduleConnect {
            epoch: self.epoch,
            after,
            trigger,
        }
    }

    /// Spend one retry from the budget, or give up once it is spent
    fn transient_failure(&mut self, cause: RetryCause) -> Vec<LinkAction> {
        if self.retry_count >= self.timing.max_auto_retries {
            self.retry_count = 0;
            self.enter(LinkPhase::Failed);
            return Vec::new();
        }

        self.retry_count += 1;
        let delay = self.timing.retry_delay(cause);
        vec![self.schedule_connect(delay, ConnectTrigger::Retry(cause))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected_machine() -> LinkStateMachine {
        let mut fsm = LinkStateMachine::default();
        fsm.process_event(LinkEvent::Connect);
        fsm.process_event(LinkEvent::DataReceived);
        fsm
    }

    fn scheduled(result: &TransitionResult) -> Option<(u64, ConnectTrigger)> {
        result.actions().iter().find_map(|a| match a {
            LinkAction::ScheduleConnect { epoch, trigger, .. } => Some((*epoch, *trigger)),
            _ => None,
        })
    }

    #[test]
    fn test_initial_state() {
        let fsm = LinkStateMachine::new(LinkTiming::default(), true);
        assert_eq!(fsm.phase(), LinkPhase::Idle);
        assert_eq!(fsm.retry_count(), 0);
        assert!(!fsm.has_auto_connected());
        assert!(fsm.radio_on());
        assert!(fsm.watchdog().is_none());
    }

    #[test]
    fn test_default_timing() {
        let timing = LinkTiming::default();
        assert_eq!(timing.watchdog_timeout, Duration::from_secs(5));
        assert_eq!(timing.max_auto_retries, 3);
        assert_eq!(timing.rfcomm_retry_delay, Duration::from_secs(2));
        assert_eq!(timing.watchdog_retry_delay, Duration::from_secs(1));
        assert_eq!(timing.auto_connect_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_connect_arms_watchdog() {
        let mut fsm = LinkStateMachine::default();
        let result = fsm.process_event(LinkEvent::Connect);

        let generation = fsm.watchdog().map(|w| w.generation()).unwrap();
        assert_eq!(
            result,
            TransitionResult::Applied {
                from: LinkPhase::Idle,
                to: LinkPhase::Connecting,
                actions: vec![
                    LinkAction::ConnectTransport,
                    LinkAction::ArmWatchdog {
                        generation,
                        after: Duration::from_secs(5),
                    },
                ],
            }
        );
        assert!(fsm.has_auto_connected());
        assert!(fsm.status().loading);
    }

    #[test]
    fn test_connect_while_connecting_is_noop() {
        let mut fsm = LinkStateMachine::default();
        fsm.process_event(LinkEvent::Connect);
        let watchdog = fsm.watchdog();
        let epoch = fsm.epoch();

        let result = fsm.process_event(LinkEvent::Connect);
        assert!(result.is_ignored());
        assert!(result.actions().is_empty());
        assert_eq!(fsm.watchdog(), watchdog);
        assert_eq!(fsm.epoch(), epoch);
    }

    #[test]
    fn test_data_received_connects_and_cancels_watchdog() {
        let mut fsm = LinkStateMachine::default();
        fsm.process_event(LinkEvent::Connect);
        fsm.process_event(LinkEvent::RfcommChannelFailed);
        let (epoch, trigger) = (fsm.epoch(), ConnectTrigger::Retry(RetryCause::RfcommChannel));
        fsm.process_event(LinkEvent::DeferredConnect { epoch, trigger });
        let generation = fsm.watchdog().unwrap().generation();

        let result = fsm.process_event(LinkEvent::DataReceived);
        assert_eq!(
            result.actions(),
            &[LinkAction::CancelWatchdog { generation }]
        );
        assert_eq!(fsm.phase(), LinkPhase::Connected);
        assert_eq!(fsm.retry_count(), 0);
        assert!(fsm.watchdog().is_none());
        assert!(!fsm.status().loading);
    }

    #[test]
    fn test_transport_failed_is_immediate() {
        let mut fsm = LinkStateMachine::default();
        fsm.process_event(LinkEvent::Connect);

        let result = fsm.process_event(LinkEvent::TransportFailed);
        assert!(matches!(
            result,
            TransitionResult::Applied { to: LinkPhase::Failed, .. }
        ));
        assert!(scheduled(&result).is_none());
        assert!(fsm.status().connection_failed);
        assert!(!fsm.status().loading);
        assert!(fsm.watchdog().is_none());
    }

    #[test]
    fn test_transport_failed_outside_attempt_is_ignored() {
        let mut fsm = connected_machine();
        assert!(fsm.process_event(LinkEvent::TransportFailed).is_ignored());
        assert_eq!(fsm.phase(), LinkPhase::Connected);
    }

    #[test]
    fn test_rfcomm_failure_schedules_retry() {
        let mut fsm = LinkStateMachine::default();
        fsm.process_event(LinkEvent::Connect);
        let generation = fsm.watchdog().unwrap().generation();

        let result = fsm.process_event(LinkEvent::RfcommChannelFailed);
        let epoch = fsm.epoch();
        assert_eq!(
            result.actions(),
            &[
                LinkAction::CancelWatchdog { generation },
                LinkAction::ScheduleConnect {
                    epoch,
                    after: Duration::from_secs(2),
                    trigger: ConnectTrigger::Retry(RetryCause::RfcommChannel),
                },
            ]
        );
        assert_eq!(fsm.phase(), LinkPhase::Connecting);
        assert_eq!(fsm.retry_count(), 1);
        assert!(fsm.status().loading);
    }

    #[test]
    fn test_fourth_rfcomm_failure_exhausts_budget() {
        let mut fsm = LinkStateMachine::default();
        fsm.process_event(LinkEvent::Connect);
        let mut connects = 1;

        for attempt in 1..=3 {
            let result = fsm.process_event(LinkEvent::RfcommChannelFailed);
            assert_eq!(fsm.retry_count(), attempt);
            let (epoch, trigger) = scheduled(&result).unwrap();
            let retry = fsm.process_event(LinkEvent::DeferredConnect { epoch, trigger });
            connects += retry
                .actions()
                .iter()
                .filter(|a| matches!(a, LinkAction::ConnectTransport))
                .count();
            assert_eq!(fsm.phase(), LinkPhase::Connecting);
        }

        let result = fsm.process_event(LinkEvent::RfcommChannelFailed);
        assert!(scheduled(&result).is_none());
        assert_eq!(connects, 4);
        assert_eq!(fsm.phase(), LinkPhase::Failed);
        assert_eq!(fsm.retry_count(), 0);
        assert!(fsm.status().connection_failed);
    }

    #[test]
    fn test_watchdog_retries_with_disconnect() {
        let mut fsm = LinkStateMachine::default();
        fsm.process_event(LinkEvent::Connect);
        let generation = fsm.watchdog().unwrap().generation();

        let result = fsm.process_event(LinkEvent::WatchdogFired { generation });
        let epoch = fsm.epoch();
        assert_eq!(
            result.actions(),
            &[
                LinkAction::DisconnectTransport,
                LinkAction::ScheduleConnect {
                    epoch,
                    after: Duration::from_secs(1),
                    trigger: ConnectTrigger::Retry(RetryCause::Watchdog),
                },
            ]
        );
        assert_eq!(fsm.retry_count(), 1);
        assert!(fsm.watchdog().is_none());
        assert!(fsm.status().loading);
    }

    #[test]
    fn test_watchdog_exhausts_budget() {
        let mut fsm = LinkStateMachine::default();
        fsm.process_event(LinkEvent::Connect);

        for _ in 0..3 {
            let generation = fsm.watchdog().unwrap().generation();
            let result = fsm.process_event(LinkEvent::WatchdogFired { generation });
            let (epoch, trigger) = scheduled(&result).unwrap();
            fsm.process_event(LinkEvent::DeferredConnect { epoch, trigger });
        }

        let generation = fsm.watchdog().unwrap().generation();
        let result = fsm.process_event(LinkEvent::WatchdogFired { generation });
        assert!(result.actions().is_empty());
        assert_eq!(fsm.phase(), LinkPhase::Failed);
        assert_eq!(fsm.retry_count(), 0);
    }

    #[test]
    fn test_mixed_failures_share_budget() {
        let mut fsm = LinkStateMachine::default();
        fsm.process_event(LinkEvent::Connect);

        let result = fsm.process_event(LinkEvent::RfcommChannelFailed);
        let (epoch, trigger) = scheduled(&result).unwrap();
        fsm.process_event(LinkEvent::DeferredConnect { epoch, trigger });

        let generation = fsm.watchdog().unwrap().generation();
        let result = fsm.process_event(LinkEvent::WatchdogFired { generation });
        assert_eq!(fsm.retry_count(), 2);
        let (epoch, trigger) = scheduled(&result).unwrap();
        fsm.process_event(LinkEvent::DeferredConnect { epoch, trigger });

        let result = fsm.process_event(LinkEvent::RfcommChannelFailed);
        assert_eq!(fsm.retry_count(), 3);
        let (epoch, trigger) = scheduled(&result).unwrap();
        fsm.process_event(LinkEvent::DeferredConnect { epoch, trigger });

        let generation = fsm.watchdog().unwrap().generation();
        fsm.process_event(LinkEvent::WatchdogFired { generation });
        assert_eq!(fsm.phase(), LinkPhase::Failed);
        assert_eq!(fsm.retry_count(), 0);
    }

    #[test]
    fn test_stale_watchdog_is_noop() {
        let mut fsm = LinkStateMachine::default();
        fsm.process_event(LinkEvent::Connect);
        let generation = fsm.watchdog().unwrap().generation();
        fsm.process_event(LinkEvent::DataReceived);

        let before = fsm.status();
        let result = fsm.process_event(LinkEvent::WatchdogFired { generation });
        assert!(result.is_ignored());
        assert_eq!(fsm.status(), before);
    }

    #[test]
    fn test_watchdog_from_previous_attempt_is_noop() {
        let mut fsm = LinkStateMachine::default();
        fsm.process_event(LinkEvent::Connect);
        let old = fsm.watchdog().unwrap().generation();
        fsm.process_event(LinkEvent::TransportFailed);
        fsm.process_event(LinkEvent::RetryConnect);

        let result = fsm.process_event(LinkEvent::WatchdogFired { generation: old });
        assert!(result.is_ignored());
        assert_eq!(fsm.retry_count(), 0);
        assert_ne!(fsm.watchdog().unwrap().generation(), old);
    }

    #[test]
    fn test_success_during_backoff_drops_retry() {
        let mut fsm = LinkStateMachine::default();
        fsm.process_event(LinkEvent::Connect);
        let result = fsm.process_event(LinkEvent::RfcommChannelFailed);
        let (epoch, trigger) = scheduled(&result).unwrap();

        fsm.process_event(LinkEvent::DataReceived);
        let result = fsm.process_event(LinkEvent::DeferredConnect { epoch, trigger });
        assert!(result.is_ignored());
        assert_eq!(fsm.phase(), LinkPhase::Connected);
    }

    #[test]
    fn test_radio_enabled_auto_connects_once() {
        let mut fsm = LinkStateMachine::default();
        let result = fsm.process_event(LinkEvent::RadioEnabled);
        assert!(fsm.radio_on());
        assert!(fsm.has_auto_connected());
        assert_eq!(fsm.phase(), LinkPhase::Idle);

        let (epoch, trigger) = scheduled(&result).unwrap();
        assert_eq!(trigger, ConnectTrigger::AutoConnect);
        fsm.process_event(LinkEvent::DeferredConnect { epoch, trigger });
        assert_eq!(fsm.phase(), LinkPhase::Connecting);

        fsm.process_event(LinkEvent::DataReceived);
        assert_eq!(fsm.phase(), LinkPhase::Connected);

        let again = fsm.process_event(LinkEvent::RadioEnabled);
        assert!(again.actions().is_empty());
        assert_eq!(fsm.phase(), LinkPhase::Connected);
    }

    #[test]
    fn test_manual_connect_supersedes_auto_connect() {
        let mut fsm = LinkStateMachine::default();
        let result = fsm.process_event(LinkEvent::RadioEnabled);
        let (epoch, trigger) = scheduled(&result).unwrap();

        fsm.process_event(LinkEvent::Connect);
        fsm.process_event(LinkEvent::DataReceived);

        let result = fsm.process_event(LinkEvent::DeferredConnect { epoch, trigger });
        assert!(result.is_ignored());
        assert_eq!(fsm.phase(), LinkPhase::Connected);
    }

    #[test]
    fn test_connect_marks_auto_connect_done() {
        let mut fsm = LinkStateMachine::default();
        fsm.process_event(LinkEvent::Connect);
        let result = fsm.process_event(LinkEvent::RadioEnabled);
        assert!(result.actions().is_empty());
    }

    #[test]
    fn test_retry_connect_from_failed() {
        let mut fsm = LinkStateMachine::default();
        fsm.process_event(LinkEvent::Connect);
        fsm.process_event(LinkEvent::TransportFailed);
        assert!(fsm.status().connection_failed);

        let result = fsm.process_event(LinkEvent::RetryConnect);
        assert!(matches!(
            result,
            TransitionResult::Applied {
                from: LinkPhase::Failed,
                to: LinkPhase::Connecting,
                ..
            }
        ));
        assert!(!fsm.status().connection_failed);
        assert_eq!(fsm.retry_count(), 0);
        assert!(fsm.watchdog().is_some());
    }

    #[test]
    fn test_retry_connect_restores_full_budget() {
        let mut fsm = LinkStateMachine::default();
        fsm.process_event(LinkEvent::Connect);
        for _ in 0..4 {
            let result = fsm.process_event(LinkEvent::RfcommChannelFailed);
            if let Some((epoch, trigger)) = scheduled(&result) {
                fsm.process_event(LinkEvent::DeferredConnect { epoch, trigger });
            }
        }
        assert_eq!(fsm.phase(), LinkPhase::Failed);

        fsm.process_event(LinkEvent::RetryConnect);
        fsm.process_event(LinkEvent::RfcommChannelFailed);
        assert_eq!(fsm.phase(), LinkPhase::Connecting);
        assert_eq!(fsm.retry_count(), 1);
    }

    #[test]
    fn test_retry_connect_while_connecting_is_noop() {
        let mut fsm = LinkStateMachine::default();
        fsm.process_event(LinkEvent::Connect);
        fsm.process_event(LinkEvent::RfcommChannelFailed);

        assert!(fsm.process_event(LinkEvent::RetryConnect).is_ignored());
        assert_eq!(fsm.retry_count(), 1);
    }

    #[test]
    fn test_data_from_failed_recovers() {
        let mut fsm = LinkStateMachine::default();
        fsm.process_event(LinkEvent::Connect);
        fsm.process_event(LinkEvent::TransportFailed);

        fsm.process_event(LinkEvent::DataReceived);
        assert_eq!(fsm.phase(), LinkPhase::Connected);
        assert!(!fsm.status().connection_failed);
    }

    #[test]
    fn test_radio_status_updates_flag() {
        let mut fsm = LinkStateMachine::new(LinkTiming::default(), true);
        fsm.process_event(LinkEvent::RadioStatus(false));
        assert!(!fsm.status().radio_on);
        assert_eq!(fsm.phase(), LinkPhase::Idle);
    }

    #[test]
    fn test_zero_retry_budget_fails_on_first_transient_failure() {
        let timing = LinkTiming {
            max_auto_retries: 0,
            ..Default::default()
        };
        let mut fsm = LinkStateMachine::new(timing, true);
        fsm.process_event(LinkEvent::Connect);
        fsm.process_event(LinkEvent::RfcommChannelFailed);
        assert_eq!(fsm.phase(), LinkPhase::Failed);
        assert_eq!(fsm.retry_count(), 0);
    }

    /// Events a driver could deliver next, with timers tagged as the driver would
    fn next_events(fsm: &LinkStateMachine) -> Vec<LinkEvent> {
        let generation = fsm.watchdog().map(|w| w.generation()).unwrap_or(0);
        vec![
            LinkEvent::Connect,
            LinkEvent::RetryConnect,
            LinkEvent::RadioEnabled,
            LinkEvent::DataReceived,
            LinkEvent::TransportFailed,
            LinkEvent::RfcommChannelFailed,
            LinkEvent::WatchdogFired { generation },
            LinkEvent::DeferredConnect {
                epoch: fsm.epoch(),
                trigger: ConnectTrigger::Retry(RetryCause::Watchdog),
            },
            LinkEvent::DeferredConnect {
                epoch: fsm.epoch(),
                trigger: ConnectTrigger::AutoConnect,
            },
        ]
    }

    fn check_invariants(fsm: &LinkStateMachine, result: &TransitionResult) {
        let max = fsm.timing().max_auto_retries;
        assert!(fsm.retry_count() <= max);
        if fsm.watchdog().is_some() {
            assert_eq!(fsm.phase(), LinkPhase::Connecting);
        }
        if fsm.phase() != LinkPhase::Connecting {
            assert_eq!(fsm.retry_count(), 0);
        }
        let arms = result
            .actions()
            .iter()
            .filter(|a| matches!(a, LinkAction::ArmWatchdog { .. }))
            .count();
        assert!(arms <= 1);
        let connects = result
            .actions()
            .iter()
            .filter(|a| matches!(a, LinkAction::ConnectTransport))
            .count();
        if connects > 0 {
            assert_eq!(fsm.phase(), LinkPhase::Connecting);
        }
    }

    fn explore(fsm: &LinkStateMachine, depth: usize) {
        if depth == 0 {
            return;
        }
        for event in next_events(fsm) {
            let was_connecting = fsm.phase() == LinkPhase::Connecting;
            let mut next = fsm.clone();
            let result = next.process_event(event);
            check_invariants(&next, &result);
            if was_connecting && event == LinkEvent::Connect {
                assert!(result.is_ignored());
            }
            explore(&next, depth - 1);
        }
    }

    #[test]
    fn test_invariants_hold_for_all_short_sequences() {
        explore(&LinkStateMachine::default(), 5);
    }
}

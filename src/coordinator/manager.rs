//! Connection coordinator with watchdog and bounded automatic retries

use super::config::CoordinatorConfig;
use crate::transport::{DeviceDirectory, RadioStateProbe, TransportService};
use earlink_shared::{
    ConnectTrigger, LinkAction, LinkError, LinkEvent, LinkPhase, LinkStateMachine, LinkStatus,
    TransitionResult,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Signals pushed into the coordinator by the transport and radio layers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSignal {
    /// Host radio was switched on
    RadioEnabled,
    /// Device sent data or the transport reported the link up
    DataReceived,
    /// Device could not be reached
    TransportFailed,
    /// Device reached but the RFCOMM channel failed to open
    RfcommChannelFailed,
    /// User asked to try again from the failure prompt
    UserRequestedRetry,
}

enum Command {
    Connect(oneshot::Sender<Result<(), LinkError>>),
    RetryConnect(oneshot::Sender<Result<(), LinkError>>),
    CheckRadioStatus(oneshot::Sender<bool>),
    Status(oneshot::Sender<LinkStatus>),
    Shutdown(oneshot::Sender<()>),
}

/// Everything the coordinator loop reacts to, in arrival order
enum Message {
    Signal(LinkSignal),
    Command(Command),
    WatchdogExpired { generation: u64 },
    ConnectDue { epoch: u64, trigger: ConnectTrigger },
}

/// Handle collaborators use to push signals into the coordinator
#[derive(Clone)]
pub struct SignalSender {
    tx: mpsc::Sender<Message>,
}

impl SignalSender {
    /// Queue a signal behind everything already waiting
    pub async fn send(&self, signal: LinkSignal) -> Result<(), LinkError> {
        self.tx
            .send(Message::Signal(signal))
            .await
            .map_err(|_| LinkError::CoordinatorClosed)
    }
}

/// The coordinator's inbox, created before the collaborators so they can be
/// handed a [`SignalSender`]
pub struct Mailbox {
    tx: mpsc::Sender<Message>,
    rx: mpsc::Receiver<Message>,
}

impl Mailbox {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self { tx, rx }
    }

    pub fn signals(&self) -> SignalSender {
        SignalSender {
            tx: self.tx.clone(),
        }
    }

    /// Next signal queued in the inbox, skipping anything else
    #[cfg(test)]
    pub(crate) async fn next_signal(&mut self) -> Option<LinkSignal> {
        loop {
            if let Message::Signal(signal) = self.rx.recv().await? {
                return Some(signal);
            }
        }
    }
}

/// External services the coordinator drives
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn DeviceDirectory>,
    pub transport: Arc<dyn TransportService>,
    pub radio: Arc<dyn RadioStateProbe>,
}

/// Handle to the running connection coordinator
#[derive(Clone)]
pub struct ConnectionCoordinator {
    inbox: mpsc::Sender<Message>,
    status_rx: watch::Receiver<LinkStatus>,
}

impl ConnectionCoordinator {
    /// Probe the radio and start the coordinator loop
    pub async fn spawn(
        config: CoordinatorConfig,
        mailbox: Mailbox,
        collaborators: Collaborators,
    ) -> Self {
        let radio_on = collaborators.radio.is_enabled().await;
        let machine = LinkStateMachine::new(config.timing, radio_on);
        let (status_tx, status_rx) = watch::channel(machine.status());

        let Mailbox { tx, rx } = mailbox;
        let actor = CoordinatorActor {
            machine,
            collaborators,
            inbox: tx.clone(),
            rx,
            status_tx,
            watchdog: None,
        };
        tokio::spawn(actor.run());

        Self {
            inbox: tx,
            status_rx,
        }
    }

    /// Start a connection attempt to the saved primary device.
    ///
    /// A no-op while an attempt is already in flight. Fails with
    /// [`LinkError::NoSavedDevice`] when nothing has been paired.
    pub async fn connect(&self) -> Result<(), LinkError> {
        self.request(Command::Connect).await?
    }

    /// Clear a failure and start over with a full retry budget
    pub async fn retry_connect(&self) -> Result<(), LinkError> {
        self.request(Command::RetryConnect).await?
    }

    /// Poll the radio probe and record the result
    pub async fn check_radio_status(&self) -> Result<bool, LinkError> {
        self.request(Command::CheckRadioStatus).await
    }

    /// Status after every message queued so far has been handled
    pub async fn status(&self) -> Result<LinkStatus, LinkError> {
        self.request(Command::Status).await
    }

    /// Last published status, without waiting on the coordinator
    pub fn current_status(&self) -> LinkStatus {
        *self.status_rx.borrow()
    }

    /// Subscribe to status changes
    pub fn subscribe(&self) -> watch::Receiver<LinkStatus> {
        self.status_rx.clone()
    }

    /// Get a sender for pushing link signals
    pub fn signals(&self) -> SignalSender {
        SignalSender {
            tx: self.inbox.clone(),
        }
    }

    /// Stop the coordinator loop; later commands fail with `CoordinatorClosed`
    pub async fn shutdown(&self) -> Result<(), LinkError> {
        self.request(Command::Shutdown).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, LinkError> {
        let (tx, rx) = oneshot::channel();
        self.inbox
            .send(Message::Command(command(tx)))
            .await
            .map_err(|_| LinkError::CoordinatorClosed)?;
        rx.await.map_err(|_| LinkError::CoordinatorClosed)
    }
}

/// Owns the state machine; every transition runs here, one message at a time
struct CoordinatorActor {
    machine: LinkStateMachine,
    collaborators: Collaborators,
    /// Loopback for timers
    inbox: mpsc::Sender<Message>,
    rx: mpsc::Receiver<Message>,
    status_tx: watch::Sender<LinkStatus>,
    /// Armed watchdog task and the generation it reports
    watchdog: Option<(u64, JoinHandle<()>)>,
}

impl CoordinatorActor {
    async fn run(mut self) {
        info!(
            "[LINK] Coordinator started (radio on: {})",
            self.machine.radio_on()
        );

        loop {
            let message = tokio::select! {
                message = self.rx.recv() => message,
                // Every handle and subscriber dropped
                _ = self.status_tx.closed() => None,
            };
            let Some(message) = message else { break };
            if !self.handle_message(message).await {
                break;
            }
        }

        if let Some((_, task)) = self.watchdog.take() {
            task.abort();
        }
        info!("[LINK] Coordinator stopped");
    }

    /// Returns false when the loop should stop
    async fn handle_message(&mut self, message: Message) -> bool {
        match message {
            Message::Signal(signal) => self.handle_signal(signal),
            Message::Command(command) => return self.handle_command(command).await,
            Message::WatchdogExpired { generation } => {
                if matches!(self.watchdog, Some((armed, _)) if armed == generation) {
                    self.watchdog = None;
                }
                self.apply(LinkEvent::WatchdogFired { generation });
            }
            Message::ConnectDue { epoch, trigger } => {
                self.apply(LinkEvent::DeferredConnect { epoch, trigger });
            }
        }
        true
    }

    fn handle_signal(&mut self, signal: LinkSignal) {
        debug!("[LINK] Signal: {:?}", signal);
        let event = match signal {
            LinkSignal::RadioEnabled => LinkEvent::RadioEnabled,
            LinkSignal::DataReceived => LinkEvent::DataReceived,
            LinkSignal::TransportFailed => LinkEvent::TransportFailed,
            LinkSignal::RfcommChannelFailed => LinkEvent::RfcommChannelFailed,
            LinkSignal::UserRequestedRetry => {
                if let Err(e) = self.retry_connect() {
                    error!("[LINK] Retry requested but cannot connect: {}", e);
                }
                return;
            }
        };
        self.apply(event);
    }

    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect(reply) => {
                let _ = reply.send(self.connect());
            }
            Command::RetryConnect(reply) => {
                let _ = reply.send(self.retry_connect());
            }
            Command::CheckRadioStatus(reply) => {
                let enabled = self.collaborators.radio.is_enabled().await;
                debug!("[RADIO] Radio enabled: {}", enabled);
                self.apply(LinkEvent::RadioStatus(enabled));
                let _ = reply.send(enabled);
            }
            Command::Status(reply) => {
                let _ = reply.send(self.machine.status());
            }
            Command::Shutdown(reply) => {
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn connect(&mut self) -> Result<(), LinkError> {
        if self.machine.phase() == LinkPhase::Connecting {
            debug!("[LINK] connect() skipped - attempt already in progress");
            return Ok(());
        }
        let device = self.collaborators.directory.primary()?;
        debug!("[LINK] Connect requested for {}", device);
        self.apply(LinkEvent::Connect);
        Ok(())
    }

    fn retry_connect(&mut self) -> Result<(), LinkError> {
        if self.machine.phase() == LinkPhase::Connecting {
            debug!("[LINK] retry_connect() skipped - attempt already in progress");
            return Ok(());
        }
        self.collaborators.directory.primary()?;
        info!("[LINK] Manual retry, retry budget reset");
        self.apply(LinkEvent::RetryConnect);
        Ok(())
    }

    /// Run an event through the state machine and perform its actions.
    /// Actions can produce follow-up events; those run before returning.
    fn apply(&mut self, event: LinkEvent) {
        let mut pending = VecDeque::from([event]);

        while let Some(event) = pending.pop_front() {
            match self.machine.process_event(event) {
                TransitionResult::Applied { from, to, actions } => {
                    if from != to {
                        if to == LinkPhase::Failed {
                            warn!("[LINK] {:?} -> Failed on {:?}", from, event);
                        } else {
                            info!("[LINK] {:?} -> {:?} on {:?}", from, to, event);
                        }
                    }
                    for action in actions {
                        if let Some(followup) = self.execute(action) {
                            pending.push_back(followup);
                        }
                    }
                }
                TransitionResult::Ignored { phase, event } => {
                    debug!("[LINK] Ignored {:?} while {:?}", event, phase);
                }
            }
        }

        self.publish_status();
    }

    fn execute(&mut self, action: LinkAction) -> Option<LinkEvent> {
        match action {
            LinkAction::ConnectTransport => match self.collaborators.directory.primary() {
                Ok(device) => {
                    info!(
                        "[TRANSPORT] Connecting to {} via {}",
                        device,
                        self.collaborators.transport.name()
                    );
                    self.collaborators.transport.connect(&device);
                }
                Err(e) => {
                    // Device vanished between validation and a scheduled retry
                    error!("[TRANSPORT] Cannot start attempt: {}", e);
                    return Some(LinkEvent::TransportFailed);
                }
            },
            LinkAction::DisconnectTransport => {
                info!("[TRANSPORT] Aborting stuck attempt");
                self.collaborators.transport.disconnect();
            }
            LinkAction::ArmWatchdog { generation, after } => {
                if self.machine.watchdog().map(|w| w.generation()) != Some(generation) {
                    return None;
                }
                if let Some((_, task)) = self.watchdog.take() {
                    task.abort();
                }
                let task = self.deliver_after(after, Message::WatchdogExpired { generation });
                self.watchdog = Some((generation, task));
                debug!("[WATCHDOG] #{} armed for {:?}", generation, after);
            }
            LinkAction::CancelWatchdog { generation } => {
                match self.watchdog.take() {
                    Some((armed, task)) if armed == generation => {
                        task.abort();
                        debug!("[WATCHDOG] #{} cancelled", generation);
                    }
                    other => self.watchdog = other,
                }
            }
            LinkAction::ScheduleConnect {
                epoch,
                after,
                trigger,
            } => {
                match trigger {
                    ConnectTrigger::AutoConnect => {
                        info!("[RADIO] Radio on, auto-connecting in {:?}", after);
                    }
                    ConnectTrigger::Retry(cause) => {
                        info!(
                            "[LINK] {}, auto-retry {}/{} in {:?}",
                            cause,
                            self.machine.retry_count(),
                            self.machine.timing().max_auto_retries,
                            after
                        );
                    }
                }
                // Not cancellable; the epoch check drops it if overtaken
                let _ = self.deliver_after(after, Message::ConnectDue { epoch, trigger });
            }
        }
        None
    }

    /// Post `message` back to our own inbox after `after`
    fn deliver_after(&self, after: Duration, message: Message) -> JoinHandle<()> {
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = inbox.send(message).await;
        })
    }

    fn publish_status(&self) {
        let status = self.machine.status();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

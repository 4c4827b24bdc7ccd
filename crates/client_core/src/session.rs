use std::{future, sync::Arc, time::Duration};

use shared::{
    domain::{PersistedRide, RideDetails, RideId, UserId},
    protocol::{ClientMessage, DriverRating, RideAck, RideRequestBody, RideSubmission, RideUpdate},
};
use storage::RideRecordStore;
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    api::RideApi,
    clock::Clock,
    error::RideError,
    event_source::{SourceSignal, WebSocketEventSource},
    lifecycle::{Effect, RideEvent, RideLifecycle, RideSnapshot, SubmissionTicket},
};

const COMMAND_CAPACITY: usize = 32;
const SIGNAL_CAPACITY: usize = 64;
const OUTBOUND_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub session_key: String,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Ride(#[from] RideError),
    #[error("ride session has stopped")]
    Closed,
}

enum Command {
    Request {
        details: RideDetails,
        reply: oneshot::Sender<Result<(), RideError>>,
    },
    Cancel {
        reply: oneshot::Sender<Result<(), RideError>>,
    },
    Reset {
        reply: oneshot::Sender<Result<(), RideError>>,
    },
    RateDriver {
        rating: u8,
        comment: Option<String>,
        reply: oneshot::Sender<Result<DriverRating, RideError>>,
    },
    Snapshot {
        reply: oneshot::Sender<RideSnapshot>,
    },
    Shutdown,
}

enum Completion {
    Submitted {
        ticket: SubmissionTicket,
        result: Result<RideSubmission, RideError>,
    },
    Resynced {
        result: Result<RideUpdate, RideError>,
    },
    RemoteCancelled {
        ride_id: RideId,
        result: Result<RideAck, RideError>,
    },
}

enum Input {
    Command(Option<Command>),
    Completion(Completion),
    Signal(Option<SourceSignal>),
    Timer,
}

/// Single task that owns the ride lifecycle. User commands, channel signals,
/// network completions and timer expiry are applied one at a time.
pub struct RideSession {
    lifecycle: RideLifecycle,
    clock: Arc<dyn Clock>,
    api: Arc<dyn RideApi>,
    store: Option<Arc<dyn RideRecordStore>>,
    config: SessionConfig,
    signals: Option<mpsc::Receiver<SourceSignal>>,
    source_task: Option<JoinHandle<()>>,
    outbound: Option<mpsc::Sender<ClientMessage>>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    last_persisted: Option<PersistedRide>,
}

#[derive(Clone)]
pub struct RideSessionHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<RideEvent>,
}

impl RideSession {
    pub fn new(
        lifecycle: RideLifecycle,
        clock: Arc<dyn Clock>,
        api: Arc<dyn RideApi>,
        config: SessionConfig,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            lifecycle,
            clock,
            api,
            store: None,
            config,
            signals: None,
            source_task: None,
            outbound: None,
            completions_tx,
            completions_rx,
            last_persisted: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn RideRecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_signals(
        mut self,
        signals: mpsc::Receiver<SourceSignal>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        self.signals = Some(signals);
        self.source_task = task;
        self
    }

    /// Frames for the real-time channel, such as driver ratings.
    pub fn with_outbound(mut self, outbound: mpsc::Sender<ClientMessage>) -> Self {
        self.outbound = Some(outbound);
        self
    }

    pub fn with_event_source(self, source: WebSocketEventSource) -> Self {
        let (tx, rx) = mpsc::channel(SIGNAL_CAPACITY);
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let task = source.spawn(tx, outbound_rx);
        self.with_signals(rx, Some(task)).with_outbound(outbound)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RideEvent> {
        self.lifecycle.subscribe()
    }

    /// Restores any persisted ride, then runs the session on its own task.
    pub async fn start(mut self) -> (RideSessionHandle, JoinHandle<()>) {
        self.restore().await;
        let (commands, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let handle = RideSessionHandle {
            commands,
            events: self.lifecycle.event_sender(),
        };
        let task = tokio::spawn(self.run(commands_rx));
        (handle, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!(session_key = %self.config.session_key, "session: started");
        loop {
            let wait = self.lifecycle.next_deadline().map(|deadline| {
                (deadline - self.clock.now())
                    .to_std()
                    .unwrap_or(Duration::ZERO)
            });
            let input = tokio::select! {
                command = commands.recv() => Input::Command(command),
                Some(completion) = self.completions_rx.recv() => Input::Completion(completion),
                signal = next_signal(&mut self.signals) => Input::Signal(signal),
                _ = sleep_for(wait) => Input::Timer,
            };

            match input {
                Input::Command(None) | Input::Command(Some(Command::Shutdown)) => break,
                Input::Command(Some(command)) => self.handle_command(command),
                Input::Completion(completion) => self.handle_completion(completion),
                Input::Signal(Some(signal)) => self.handle_signal(signal),
                Input::Signal(None) => {
                    debug!("session: event source closed");
                    self.signals = None;
                }
                Input::Timer => {
                    self.lifecycle.fire_due_timers();
                }
            }
            self.apply_effects();
            self.persist().await;
        }
        self.shutdown().await;
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Request { details, reply } => {
                let result = self.lifecycle.request(&details).map(|ticket| {
                    self.submit(ticket);
                });
                let _ = reply.send(result);
            }
            Command::Cancel { reply } => {
                let _ = reply.send(self.lifecycle.cancel());
            }
            Command::Reset { reply } => {
                let _ = reply.send(self.lifecycle.reset());
            }
            Command::RateDriver {
                rating,
                comment,
                reply,
            } => {
                let _ = reply.send(self.lifecycle.rate_driver(rating, comment));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.lifecycle.snapshot());
            }
            Command::Shutdown => {}
        }
    }

    fn submit(&self, ticket: SubmissionTicket) {
        let Some(ride) = self.lifecycle.ride() else {
            return;
        };
        let body = RideRequestBody {
            pickup: ride.pickup.clone(),
            destination: ride.destination.clone(),
            ride_type: ride.ride_type,
            passengers: ride.passengers,
            timestamp: ride.requested_at,
            user_id: self.config.user_id.clone(),
        };
        let api = Arc::clone(&self.api);
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = api.submit_ride(&body).await;
            let _ = completions.send(Completion::Submitted { ticket, result });
        });
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Submitted {
                ticket,
                result: Ok(submission),
            } => {
                self.lifecycle.confirm_submission(ticket, submission);
            }
            Completion::Submitted {
                ticket,
                result: Err(err),
            } => {
                self.lifecycle.fail_submission(ticket, &err);
            }
            Completion::Resynced { result: Ok(status) } => {
                self.lifecycle.resync(status);
            }
            Completion::Resynced { result: Err(err) } => {
                warn!("session: resync failed: {err}");
            }
            Completion::RemoteCancelled {
                ride_id,
                result: Ok(_),
            } => {
                info!(ride_id = %ride_id, "session: backend cancelled ride");
            }
            Completion::RemoteCancelled {
                ride_id,
                result: Err(err),
            } => {
                warn!(ride_id = %ride_id, "session: remote cancel failed: {err}");
            }
        }
    }

    fn handle_signal(&mut self, signal: SourceSignal) {
        match signal {
            SourceSignal::Event(event) => {
                self.lifecycle.on_remote_event(event);
            }
            SourceSignal::Connected { resumed } => {
                debug!(resumed, "session: event source connected");
                self.request_resync();
            }
            SourceSignal::Disconnected { reason } => {
                info!("session: event source disconnected: {reason}");
            }
            SourceSignal::GaveUp { attempts } => {
                self.lifecycle.report(&RideError::network(format!(
                    "lost real-time connection after {attempts} reconnect attempts"
                )));
            }
        }
    }

    /// Asks the backend for the current ride's status; events missed while
    /// disconnected are not redelivered.
    fn request_resync(&self) {
        let Some(ride) = self.lifecycle.ride() else {
            return;
        };
        let Some(ride_id) = ride.id.clone().filter(|_| ride.state.is_active()) else {
            return;
        };
        let api = Arc::clone(&self.api);
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = api.fetch_ride(&ride_id).await;
            let _ = completions.send(Completion::Resynced { result });
        });
    }

    fn apply_effects(&mut self) {
        for effect in self.lifecycle.take_effects() {
            match effect {
                Effect::CancelRemote(ride_id) => {
                    let api = Arc::clone(&self.api);
                    let completions = self.completions_tx.clone();
                    tokio::spawn(async move {
                        let result = api.cancel_ride(&ride_id).await;
                        let _ = completions.send(Completion::RemoteCancelled { ride_id, result });
                    });
                }
                Effect::Send(message) => match &self.outbound {
                    Some(outbound) => {
                        if let Err(err) = outbound.try_send(message) {
                            warn!("session: failed to queue client message: {err}");
                        }
                    }
                    None => debug!("session: no real-time channel; client message dropped"),
                },
            }
        }
    }

    async fn restore(&mut self) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let key = self.config.session_key.as_str();
        let record = match store.load_ride(key).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(err) => {
                warn!(session_key = key, "session: failed to load persisted ride: {err:#}");
                return;
            }
        };

        match self.lifecycle.restore(record.clone()) {
            Ok(true) => {
                self.last_persisted = Some(record);
            }
            Ok(false) => clear_record(&*store, key).await,
            Err(err) => {
                self.lifecycle.report(&err);
                clear_record(&*store, key).await;
            }
        }
    }

    async fn persist(&mut self) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let record = self.lifecycle.persisted_record();
        if record == self.last_persisted {
            return;
        }
        let key = self.config.session_key.as_str();
        match &record {
            Some(record) => {
                if let Err(err) = store.save_ride(key, record).await {
                    warn!(session_key = key, "session: failed to persist ride: {err:#}");
                    return;
                }
            }
            None => clear_record(&*store, key).await,
        }
        self.last_persisted = record;
    }

    async fn shutdown(&mut self) {
        self.persist().await;
        self.lifecycle.teardown();
        if let Some(task) = self.source_task.take() {
            task.abort();
        }
        info!(session_key = %self.config.session_key, "session: stopped");
    }
}

impl RideSessionHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<RideEvent> {
        self.events.subscribe()
    }

    pub async fn request(&self, details: RideDetails) -> Result<(), SessionError> {
        self.call(|reply| Command::Request { details, reply })
            .await?
            .map_err(SessionError::from)
    }

    pub async fn cancel(&self) -> Result<(), SessionError> {
        self.call(|reply| Command::Cancel { reply })
            .await?
            .map_err(SessionError::from)
    }

    pub async fn reset(&self) -> Result<(), SessionError> {
        self.call(|reply| Command::Reset { reply })
            .await?
            .map_err(SessionError::from)
    }

    pub async fn rate_driver(
        &self,
        rating: u8,
        comment: Option<String>,
    ) -> Result<DriverRating, SessionError> {
        self.call(|reply| Command::RateDriver {
            rating,
            comment,
            reply,
        })
        .await?
        .map_err(SessionError::from)
    }

    pub async fn snapshot(&self) -> Result<RideSnapshot, SessionError> {
        self.call(|reply| Command::Snapshot { reply }).await
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)
    }
}

async fn clear_record(store: &dyn RideRecordStore, key: &str) {
    if let Err(err) = store.clear_ride(key).await {
        warn!(session_key = key, "session: failed to clear persisted ride: {err:#}");
    }
}

async fn next_signal(signals: &mut Option<mpsc::Receiver<SourceSignal>>) -> Option<SourceSignal> {
    match signals {
        Some(rx) => rx.recv().await,
        None => future::pending().await,
    }
}

async fn sleep_for(wait: Option<Duration>) {
    match wait {
        Some(delay) => tokio::time::sleep(delay).await,
        None => future::pending().await,
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;

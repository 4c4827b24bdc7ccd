use std::{mem, sync::Arc, time::Duration as StdDuration};

use chrono::{DateTime, Duration, Utc};
use shared::{
    domain::{
        DriverId, DriverInfo, PersistedRide, RideDetails, RideId, RideState, RideType,
        MAX_DRIVER_RATING, MIN_DRIVER_RATING,
    },
    protocol::{
        ClientMessage, DriverLocationUpdate, DriverPayload, DriverRating, NotificationPayload,
        RideNotice, RideSubmission, RideUpdate, ServerEvent,
    },
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    clock::Clock,
    error::{ErrorKind, ErrorReport, RideAction, RideError},
    simulator::DriverSimulator,
    timers::{TimerId, TimerKind, TimerQueue},
};

const SEARCH_TICK_MILLIS: i64 = 1_000;
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleSettings {
    pub search_timeout: Option<StdDuration>,
    pub terminal_display: Option<StdDuration>,
    pub stale_after: StdDuration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            search_timeout: Some(StdDuration::from_secs(300)),
            terminal_display: Some(StdDuration::from_secs(5)),
            stale_after: StdDuration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ride {
    pub id: Option<RideId>,
    pub state: RideState,
    pub pickup: String,
    pub destination: String,
    pub ride_type: RideType,
    pub passengers: u32,
    pub requested_at: DateTime<Utc>,
    pub driver: Option<DriverInfo>,
    pub estimated_fare: Option<f64>,
    pub estimated_time: Option<String>,
    pub completed_duration: Option<Duration>,
    pub driver_rating: Option<u8>,
    pub last_status_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RideSnapshot {
    pub state: RideState,
    pub ride: Option<Ride>,
    pub search_elapsed_secs: Option<u64>,
    pub search_remaining_secs: Option<u64>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum RideEvent {
    StateChanged(RideSnapshot),
    SearchProgress {
        elapsed_secs: u64,
        remaining_secs: Option<u64>,
    },
    DriverLocation(DriverLocationUpdate),
    Notification(NotificationPayload),
    Error(ErrorReport),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    CancelRemote(RideId),
    Send(ClientMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubmissionTicket(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Accepted,
    Discarded { orphan: RideId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidRequest {
    pub pickup: String,
    pub destination: String,
    pub ride_type: RideType,
    pub passengers: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CancelOrigin {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy)]
struct SearchTracker {
    started_at: DateTime<Utc>,
    elapsed_secs: u64,
}

/// Authoritative client-side view of the current ride. A transition either
/// applies completely or returns an error with nothing changed.
pub struct RideLifecycle {
    clock: Arc<dyn Clock>,
    settings: LifecycleSettings,
    ride: Option<Ride>,
    timers: TimerQueue,
    state_timers: Vec<TimerId>,
    search: Option<SearchTracker>,
    simulator: Option<DriverSimulator>,
    pending_submission: Option<SubmissionTicket>,
    next_ticket: u64,
    effects: Vec<Effect>,
    events: broadcast::Sender<RideEvent>,
}

impl RideLifecycle {
    pub fn new(clock: Arc<dyn Clock>, settings: LifecycleSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            clock,
            settings,
            ride: None,
            timers: TimerQueue::default(),
            state_timers: Vec::new(),
            search: None,
            simulator: None,
            pending_submission: None,
            next_ticket: 0,
            effects: Vec::new(),
            events,
        }
    }

    pub fn with_simulator(mut self, simulator: DriverSimulator) -> Self {
        self.simulator = Some(simulator);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RideEvent> {
        self.events.subscribe()
    }

    pub fn event_sender(&self) -> broadcast::Sender<RideEvent> {
        self.events.clone()
    }

    pub fn report(&self, error: &RideError) {
        self.publish(RideEvent::Error(error.report()));
    }

    pub fn state(&self) -> RideState {
        self.ride
            .as_ref()
            .map(|ride| ride.state)
            .unwrap_or(RideState::Idle)
    }

    pub fn ride(&self) -> Option<&Ride> {
        self.ride.as_ref()
    }

    pub fn search_elapsed_secs(&self) -> Option<u64> {
        self.search.map(|tracker| tracker.elapsed_secs)
    }

    pub fn search_remaining_secs(&self) -> Option<u64> {
        let elapsed = self.search_elapsed_secs()?;
        let timeout = self.settings.search_timeout?;
        Some(timeout.as_secs().saturating_sub(elapsed))
    }

    pub fn snapshot(&self) -> RideSnapshot {
        RideSnapshot {
            state: self.state(),
            ride: self.ride.clone(),
            search_elapsed_secs: self.search_elapsed_secs(),
            search_remaining_secs: self.search_remaining_secs(),
            at: self.clock.now(),
        }
    }

    pub fn has_pending_submission(&self) -> bool {
        self.pending_submission.is_some()
    }

    pub fn take_effects(&mut self) -> Vec<Effect> {
        mem::take(&mut self.effects)
    }

    pub fn request(&mut self, details: &RideDetails) -> Result<SubmissionTicket, RideError> {
        if self.ride.is_some() {
            return Err(self.invalid(RideAction::Request));
        }
        let valid = validate_details(details)?;
        let now = self.clock.now();

        self.next_ticket += 1;
        let ticket = SubmissionTicket(self.next_ticket);
        self.pending_submission = Some(ticket);
        self.ride = Some(Ride {
            id: None,
            state: RideState::Searching,
            pickup: valid.pickup,
            destination: valid.destination,
            ride_type: valid.ride_type,
            passengers: valid.passengers,
            requested_at: now,
            driver: None,
            estimated_fare: None,
            estimated_time: None,
            completed_duration: None,
            driver_rating: None,
            last_status_at: now,
        });
        info!(ride_type = %valid.ride_type, "ride: requested, searching for a driver");
        self.enter_state(RideState::Searching);
        self.publish_state();
        Ok(ticket)
    }

    pub fn confirm_submission(
        &mut self,
        ticket: SubmissionTicket,
        submission: RideSubmission,
    ) -> SubmissionOutcome {
        let is_current = self.pending_submission == Some(ticket)
            && self.state() == RideState::Searching;
        if !is_current {
            warn!(
                ride_id = %submission.ride_id,
                state = %self.state(),
                "ride: discarding submission response for a superseded request"
            );
            self.effects
                .push(Effect::CancelRemote(submission.ride_id.clone()));
            return SubmissionOutcome::Discarded {
                orphan: submission.ride_id,
            };
        }

        self.pending_submission = None;
        if let Some(ride) = self.ride.as_mut() {
            ride.id = Some(submission.ride_id.clone());
            ride.estimated_fare = submission.estimated_fare;
            ride.estimated_time = submission.estimated_time;
        }
        info!(ride_id = %submission.ride_id, "ride: submission confirmed");
        if submission.status != RideState::Searching {
            debug!(
                ride_id = %submission.ride_id,
                status = %submission.status,
                "ride: submission reported a later status; waiting for ride_update"
            );
        }
        self.schedule_simulation();
        self.publish_state();
        SubmissionOutcome::Accepted
    }

    pub fn fail_submission(&mut self, ticket: SubmissionTicket, error: &RideError) -> bool {
        if self.pending_submission != Some(ticket) || self.state() != RideState::Searching {
            debug!("ride: ignoring failure of a superseded submission: {error}");
            return false;
        }
        warn!("ride: submission failed: {error}");
        self.pending_submission = None;
        self.clear();
        self.publish_state();
        self.publish(RideEvent::Error(error.report()));
        true
    }

    pub fn match_found(&mut self, driver: DriverInfo) -> Result<(), RideError> {
        if self.state() != RideState::Searching {
            return Err(self.invalid(RideAction::MatchFound));
        }
        let driver = normalize_driver(driver);
        info!(
            ride_id = self.ride_id_for_log(),
            driver = %driver.name,
            eta = %driver.eta,
            "ride: driver matched"
        );
        self.transition(RideState::Matched, |ride| ride.driver = Some(driver));
        Ok(())
    }

    pub fn driver_arrived(&mut self) -> Result<(), RideError> {
        if self.state() != RideState::Matched {
            return Err(self.invalid(RideAction::DriverArrived));
        }
        self.transition(RideState::EnRoute, |_| {});
        Ok(())
    }

    pub fn ride_completed(&mut self) -> Result<(), RideError> {
        if self.state() != RideState::EnRoute {
            return Err(self.invalid(RideAction::RideCompleted));
        }
        let now = self.clock.now();
        self.transition(RideState::Completed, |ride| {
            ride.driver = None;
            ride.completed_duration = Some(now - ride.requested_at);
        });
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), RideError> {
        self.cancel_from(CancelOrigin::Local)
    }

    /// Queues a post-ride rating for the driver. Only a completed ride with a
    /// backend id can be rated, once.
    pub fn rate_driver(
        &mut self,
        rating: u8,
        comment: Option<String>,
    ) -> Result<DriverRating, RideError> {
        if self.state() != RideState::Completed {
            return Err(self.invalid(RideAction::RateDriver));
        }
        if !(1..=5).contains(&rating) {
            return Err(RideError::validation(
                "rating",
                format!("rating must be between 1 and 5, got {rating}"),
            ));
        }
        let ride_id = self
            .ride
            .as_ref()
            .and_then(|ride| ride.id.clone())
            .ok_or_else(|| self.invalid(RideAction::RateDriver))?;
        let Some(ride) = self.ride.as_mut() else {
            return Err(RideError::InvalidTransition {
                action: RideAction::RateDriver,
                from: RideState::Idle,
            });
        };
        if ride.driver_rating.is_some() {
            return Err(RideError::validation("rating", "ride already rated"));
        }
        ride.driver_rating = Some(rating);
        let message = DriverRating {
            ride_id,
            rating,
            comment: comment
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty()),
        };
        info!(ride_id = %message.ride_id, rating, "ride: driver rated");
        self.effects
            .push(Effect::Send(ClientMessage::RateDriver(message.clone())));
        self.publish_state();
        Ok(message)
    }

    pub fn reset(&mut self) -> Result<(), RideError> {
        if !self.state().is_terminal() {
            return Err(self.invalid(RideAction::Reset));
        }
        info!(ride_id = self.ride_id_for_log(), "ride: reset to idle");
        self.clear();
        self.publish_state();
        Ok(())
    }

    /// Cancels every outstanding timer; the ride stays for a later restore.
    pub fn teardown(&mut self) {
        self.timers.cancel_all();
        self.state_timers.clear();
        self.search = None;
    }

    pub fn next_deadline(&mut self) -> Option<DateTime<Utc>> {
        self.timers.next_deadline()
    }

    pub fn fire_due_timers(&mut self) -> usize {
        let mut fired = 0;
        while let Some((id, kind)) = self.timers.pop_due(self.clock.now()) {
            self.state_timers.retain(|timer| *timer != id);
            fired += 1;
            self.on_timer(kind);
        }
        fired
    }

    /// Applies an event from the real-time channel or the simulator.
    /// Returns whether the ride state changed.
    pub fn on_remote_event(&mut self, event: ServerEvent) -> bool {
        if let Some(update) = event.ride_update() {
            return self.apply_ride_update(update);
        }
        match event {
            ServerEvent::DriverRated(notice) => {
                self.acknowledge_rating(notice);
                false
            }
            ServerEvent::DriverLocation(location) => {
                self.publish(RideEvent::DriverLocation(location));
                false
            }
            ServerEvent::Notification(notification) => {
                self.publish(RideEvent::Notification(notification));
                false
            }
            ServerEvent::Error(error) => {
                warn!(code = ?error.code, "channel: server reported error: {}", error.message);
                self.publish(RideEvent::Error(ErrorReport::new(
                    ErrorKind::Network,
                    error.message,
                )));
                false
            }
            other => {
                debug!(event = other.name(), "channel: control event");
                false
            }
        }
    }

    /// Steps through the transitions missed while disconnected.
    pub fn resync(&mut self, status: RideUpdate) -> bool {
        if !self.is_current_ride(&status.ride_id) {
            return false;
        }
        let before = self.state();
        if status.status == RideState::Cancelled {
            return self.cancel_from(CancelOrigin::Remote).is_ok();
        }
        let (Some(current), Some(target)) = (before.progress(), status.status.progress()) else {
            return false;
        };
        if target < current {
            warn!(
                ride_id = %status.ride_id,
                local = %before,
                remote = %status.status,
                "ride: backend reports an earlier status than the client; keeping local state"
            );
            return false;
        }

        let mut driver = Some((status.driver, status.eta));
        while let Some(progress) = self.state().progress() {
            if progress >= target {
                break;
            }
            let step = match self.state() {
                RideState::Searching => {
                    let (payload, eta) = driver.take().unwrap_or((None, None));
                    self.match_found(driver_from_payload(payload, eta))
                }
                RideState::Matched => self.driver_arrived(),
                RideState::EnRoute => self.ride_completed(),
                _ => break,
            };
            if let Err(err) = step {
                warn!("ride: resync stopped early: {err}");
                break;
            }
        }
        self.state() != before
    }

    pub fn persisted_record(&self) -> Option<PersistedRide> {
        let ride = self.ride.as_ref()?;
        Some(PersistedRide {
            ride_id: ride.id.clone(),
            status: ride.state,
            timestamp: ride.requested_at,
            pickup: ride.pickup.clone(),
            destination: ride.destination.clone(),
            ride_type: ride.ride_type,
            passengers: ride.passengers,
            driver: ride.driver.clone(),
            estimated_fare: ride.estimated_fare,
            estimated_time: ride.estimated_time.clone(),
        })
    }

    /// Stale records fail with [`RideError::StaleState`]; terminal or
    /// unconfirmed records are dropped. Either way the lifecycle stays Idle.
    pub fn restore(&mut self, record: PersistedRide) -> Result<bool, RideError> {
        if self.ride.is_some() {
            return Err(self.invalid(RideAction::Request));
        }
        let now = self.clock.now();
        let age = now - record.timestamp;
        let is_stale = Duration::from_std(self.settings.stale_after)
            .map(|limit| age > limit)
            .unwrap_or(false);
        if is_stale {
            info!(
                age_minutes = age.num_minutes(),
                "ride: discarding stale persisted ride"
            );
            return Err(RideError::StaleState {
                age_minutes: age.num_minutes(),
            });
        }
        if !record.status.is_active() {
            debug!(status = %record.status, "ride: persisted ride is not active; nothing to restore");
            return Ok(false);
        }
        let Some(ride_id) = record.ride_id else {
            warn!("ride: persisted ride was never confirmed by the backend; dropping it");
            return Ok(false);
        };

        let driver = if record.status.carries_driver() {
            record.driver.map(normalize_driver)
        } else {
            None
        };
        info!(ride_id = %ride_id, status = %record.status, "ride: restored from storage");
        self.ride = Some(Ride {
            id: Some(ride_id),
            state: record.status,
            pickup: record.pickup,
            destination: record.destination,
            ride_type: record.ride_type,
            passengers: record.passengers,
            requested_at: record.timestamp,
            driver,
            estimated_fare: record.estimated_fare,
            estimated_time: record.estimated_time,
            completed_duration: None,
            driver_rating: None,
            last_status_at: now,
        });
        self.enter_state(record.status);
        self.schedule_simulation();
        self.publish_state();
        Ok(true)
    }

    fn apply_ride_update(&mut self, update: RideUpdate) -> bool {
        if !self.is_current_ride(&update.ride_id) {
            debug!(ride_id = %update.ride_id, "channel: update for another ride ignored");
            return false;
        }
        let before = self.state();
        let status = update.status;
        let result = match status {
            RideState::Idle | RideState::Searching => Ok(()),
            RideState::Matched => self.match_found(driver_from_payload(update.driver, update.eta)),
            RideState::EnRoute => self.driver_arrived(),
            RideState::Completed => self.ride_completed(),
            RideState::Cancelled => self.cancel_from(CancelOrigin::Remote),
        };
        if let Err(err) = result {
            if status == before {
                debug!(status = %status, "channel: duplicate ride update ignored");
            } else {
                warn!(
                    ride_id = %update.ride_id,
                    local = %before,
                    remote = %status,
                    "channel: out-of-order ride update ignored: {err}"
                );
            }
            return false;
        }
        self.state() != before
    }

    fn acknowledge_rating(&mut self, notice: RideNotice) {
        if !self.is_current_ride(&notice.ride_id) {
            debug!(ride_id = %notice.ride_id, "channel: rating ack for another ride ignored");
            return;
        }
        self.publish(RideEvent::Notification(NotificationPayload {
            title: Some("Thanks for your feedback".into()),
            message: notice
                .message
                .unwrap_or_else(|| "Driver rated successfully".into()),
            kind: Some("driver_rated".into()),
        }));
    }

    fn cancel_from(&mut self, origin: CancelOrigin) -> Result<(), RideError> {
        if !self.state().is_active() {
            return Err(self.invalid(RideAction::Cancel));
        }
        self.pending_submission = None;
        if origin == CancelOrigin::Local {
            if let Some(id) = self.ride.as_ref().and_then(|ride| ride.id.clone()) {
                self.effects.push(Effect::CancelRemote(id));
            }
        }
        info!(
            ride_id = self.ride_id_for_log(),
            origin = ?origin,
            "ride: cancelled"
        );
        self.transition(RideState::Cancelled, |ride| ride.driver = None);
        Ok(())
    }

    fn transition(&mut self, to: RideState, update: impl FnOnce(&mut Ride)) {
        let now = self.clock.now();
        let Some(ride) = self.ride.as_mut() else {
            return;
        };
        let from = ride.state;
        update(ride);
        ride.state = to;
        ride.last_status_at = now;
        debug!(from = %from, to = %to, "ride: transition applied");
        self.enter_state(to);
        self.schedule_simulation();
        self.publish_state();
    }

    fn enter_state(&mut self, state: RideState) {
        for id in self.state_timers.drain(..) {
            self.timers.cancel(id);
        }
        self.search = None;
        let now = self.clock.now();

        match state {
            RideState::Searching => {
                let started_at = self
                    .ride
                    .as_ref()
                    .map(|ride| ride.requested_at)
                    .unwrap_or(now);
                self.search = Some(SearchTracker {
                    started_at,
                    elapsed_secs: elapsed_secs(started_at, now),
                });
                self.start_timer(
                    now.checked_add_signed(Duration::milliseconds(SEARCH_TICK_MILLIS)),
                    TimerKind::SearchTick,
                );
                if let Some(timeout) = self.settings.search_timeout {
                    self.start_timer(deadline_after(started_at, timeout), TimerKind::SearchTimeout);
                }
            }
            RideState::Completed | RideState::Cancelled => {
                if let Some(delay) = self.settings.terminal_display {
                    self.start_timer(deadline_after(now, delay), TimerKind::TerminalDisplay);
                }
            }
            RideState::Idle | RideState::Matched | RideState::EnRoute => {}
        }
    }

    fn schedule_simulation(&mut self) {
        let has_id = self.ride.as_ref().is_some_and(|ride| ride.id.is_some());
        let Some(simulator) = self.simulator.as_mut() else {
            return;
        };
        if !has_id {
            return;
        }
        let (delay, kind) = match self.ride.as_ref().map(|ride| ride.state) {
            Some(RideState::Searching) => (simulator.match_delay(), TimerKind::SimulatedMatch),
            Some(RideState::Matched) => (simulator.arrival_delay(), TimerKind::SimulatedArrival),
            Some(RideState::EnRoute) => {
                (simulator.completion_delay(), TimerKind::SimulatedCompletion)
            }
            _ => return,
        };
        let deadline = deadline_after(self.clock.now(), delay);
        self.start_timer(deadline, kind);
    }

    fn start_timer(&mut self, deadline: Option<DateTime<Utc>>, kind: TimerKind) {
        let Some(deadline) = deadline else {
            warn!(timer = ?kind, "ride: timer delay out of range; not scheduled");
            return;
        };
        let id = self.timers.schedule(deadline, kind);
        self.state_timers.push(id);
    }

    fn on_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::SearchTick => {
                if self.state() != RideState::Searching {
                    return;
                }
                let now = self.clock.now();
                if let Some(tracker) = self.search.as_mut() {
                    tracker.elapsed_secs = elapsed_secs(tracker.started_at, now);
                }
                self.start_timer(
                    now.checked_add_signed(Duration::milliseconds(SEARCH_TICK_MILLIS)),
                    TimerKind::SearchTick,
                );
                if let Some(elapsed_secs) = self.search_elapsed_secs() {
                    self.publish(RideEvent::SearchProgress {
                        elapsed_secs,
                        remaining_secs: self.search_remaining_secs(),
                    });
                }
            }
            TimerKind::SearchTimeout => {
                if self.cancel_from(CancelOrigin::Local).is_ok() {
                    self.publish(RideEvent::Notification(NotificationPayload {
                        title: Some("No drivers available".into()),
                        message: "No driver accepted the ride in time; it has been cancelled."
                            .into(),
                        kind: Some("ride_timeout".into()),
                    }));
                }
            }
            TimerKind::SimulatedMatch => self.simulate(RideState::Matched),
            TimerKind::SimulatedArrival => self.simulate(RideState::EnRoute),
            TimerKind::SimulatedCompletion => self.simulate(RideState::Completed),
            TimerKind::TerminalDisplay => {
                if self.state().is_terminal() {
                    let _ = self.reset();
                }
            }
        }
    }

    fn simulate(&mut self, status: RideState) {
        let Some(ride_id) = self.ride.as_ref().and_then(|ride| ride.id.clone()) else {
            return;
        };
        let Some(simulator) = self.simulator.as_mut() else {
            return;
        };
        let update = simulator.ride_update(&ride_id, status);
        self.on_remote_event(ServerEvent::RideUpdate(update));
    }

    fn clear(&mut self) {
        self.timers.cancel_all();
        self.state_timers.clear();
        self.search = None;
        self.ride = None;
    }

    fn is_current_ride(&self, ride_id: &RideId) -> bool {
        self.ride
            .as_ref()
            .and_then(|ride| ride.id.as_ref())
            .is_some_and(|current| current == ride_id)
    }

    fn invalid(&self, action: RideAction) -> RideError {
        RideError::InvalidTransition {
            action,
            from: self.state(),
        }
    }

    fn ride_id_for_log(&self) -> &str {
        self.ride
            .as_ref()
            .and_then(|ride| ride.id.as_ref())
            .map(RideId::as_str)
            .unwrap_or("pending")
    }

    fn publish_state(&self) {
        self.publish(RideEvent::StateChanged(self.snapshot()));
    }

    fn publish(&self, event: RideEvent) {
        let _ = self.events.send(event);
    }
}

/// Checks request input, reporting the first offending field.
pub fn validate_details(details: &RideDetails) -> Result<ValidRequest, RideError> {
    let pickup = details.pickup.trim();
    if pickup.is_empty() {
        return Err(RideError::validation("pickup", "pickup address is required"));
    }
    let destination = details.destination.trim();
    if destination.is_empty() {
        return Err(RideError::validation(
            "destination",
            "destination address is required",
        ));
    }
    if pickup.eq_ignore_ascii_case(destination) {
        return Err(RideError::validation(
            "destination",
            "destination must differ from pickup",
        ));
    }
    let ride_type = details
        .ride_type
        .parse::<RideType>()
        .map_err(|err| RideError::validation("rideType", err.to_string()))?;
    let passengers = u32::try_from(details.passengers)
        .ok()
        .filter(|count| *count > 0)
        .ok_or_else(|| {
            RideError::validation(
                "passengers",
                format!(
                    "passenger count must be a positive integer, got {}",
                    details.passengers
                ),
            )
        })?;

    Ok(ValidRequest {
        pickup: pickup.to_string(),
        destination: destination.to_string(),
        ride_type,
        passengers,
    })
}

pub(crate) fn driver_from_payload(payload: Option<DriverPayload>, eta: Option<String>) -> DriverInfo {
    let payload = payload.unwrap_or(DriverPayload {
        id: None,
        name: "Your driver".into(),
        rating: None,
        vehicle: None,
        eta: None,
    });
    normalize_driver(DriverInfo {
        id: payload.id.unwrap_or_else(|| DriverId::new("unknown")),
        name: payload.name,
        rating: payload.rating.unwrap_or(MAX_DRIVER_RATING),
        vehicle_description: payload
            .vehicle
            .unwrap_or_else(|| "Vehicle details pending".into()),
        eta: payload
            .eta
            .or(eta)
            .unwrap_or_else(|| "Arriving soon".into()),
    })
}

fn normalize_driver(mut driver: DriverInfo) -> DriverInfo {
    driver.rating = if driver.rating.is_nan() {
        MAX_DRIVER_RATING
    } else {
        driver.rating.clamp(MIN_DRIVER_RATING, MAX_DRIVER_RATING)
    };
    driver
}

fn elapsed_secs(since: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    u64::try_from((now - since).num_seconds()).unwrap_or(0)
}

fn deadline_after(at: DateTime<Utc>, delay: StdDuration) -> Option<DateTime<Utc>> {
    Duration::from_std(delay)
        .ok()
        .and_then(|delay| at.checked_add_signed(delay))
}

#[cfg(test)]
#[path = "tests/lifecycle_tests.rs"]
mod tests;

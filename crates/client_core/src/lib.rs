pub mod api;
pub mod clock;
pub mod error;
pub mod event_source;
pub mod fare;
pub mod lifecycle;
pub mod session;
pub mod simulator;
pub mod timers;

pub use api::{HttpApiSettings, HttpRideApi, RideApi, SimulatedRideApi};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ErrorKind, ErrorReport, RideAction, RideError};
pub use event_source::{EventSourceConfig, ReconnectPolicy, SourceSignal, WebSocketEventSource};
pub use lifecycle::{
    LifecycleSettings, Ride, RideEvent, RideLifecycle, RideSnapshot, SubmissionOutcome,
    SubmissionTicket,
};
pub use session::{RideSession, RideSessionHandle, SessionConfig, SessionError};
pub use simulator::{DelayRange, DriverSimulator, SimulationSettings};

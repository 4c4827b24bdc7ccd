use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(RideId);
id_newtype!(DriverId);
id_newtype!(UserId);

/// Client-observed state of the current ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RideState {
    #[default]
    Idle,
    #[serde(alias = "requested")]
    Searching,
    #[serde(alias = "accepted")]
    Matched,
    #[serde(rename = "enroute", alias = "in_progress", alias = "started")]
    EnRoute,
    Completed,
    Cancelled,
}

impl RideState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Searching, Matched or EnRoute.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Searching | Self::Matched | Self::EnRoute)
    }

    /// Whether a driver record may be attached in this state.
    pub fn carries_driver(self) -> bool {
        matches!(self, Self::Matched | Self::EnRoute)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Searching => "searching",
            Self::Matched => "matched",
            Self::EnRoute => "enroute",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Position along the forward path. Cancelled sits outside it.
    pub fn progress(self) -> Option<u8> {
        match self {
            Self::Idle => Some(0),
            Self::Searching => Some(1),
            Self::Matched => Some(2),
            Self::EnRoute => Some(3),
            Self::Completed => Some(4),
            Self::Cancelled => None,
        }
    }
}

impl fmt::Display for RideState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideType {
    Economy,
    Comfort,
    Premium,
}

impl RideType {
    pub const ALL: [RideType; 3] = [Self::Economy, Self::Comfort, Self::Premium];

    pub fn multiplier(self) -> f64 {
        match self {
            Self::Economy => 1.0,
            Self::Comfort => 1.3,
            Self::Premium => 1.8,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Economy => "economy",
            Self::Comfort => "comfort",
            Self::Premium => "premium",
        }
    }
}

impl fmt::Display for RideType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown ride type '{0}' (expected economy, comfort or premium)")]
pub struct UnknownRideType(pub String);

impl FromStr for RideType {
    type Err = UnknownRideType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|ride_type| ride_type.as_str() == normalized)
            .ok_or_else(|| UnknownRideType(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    Rider,
    Driver,
}

pub const MIN_DRIVER_RATING: f32 = 4.5;
pub const MAX_DRIVER_RATING: f32 = 5.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverInfo {
    pub id: DriverId,
    pub name: String,
    pub rating: f32,
    pub vehicle_description: String,
    /// Presentational only, e.g. "4 min".
    pub eta: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideDetails {
    pub pickup: String,
    pub destination: String,
    pub ride_type: String,
    pub passengers: i64,
}

/// Record kept in durable client storage for the current session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRide {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ride_id: Option<RideId>,
    pub status: RideState,
    pub timestamp: DateTime<Utc>,
    pub pickup: String,
    pub destination: String,
    pub ride_type: RideType,
    pub passengers: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<DriverInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_fare: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<String>,
}

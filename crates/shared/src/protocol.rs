use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{
    domain::{DriverId, RideId, RideState, RideType, UserId, UserType},
    error::{ApiError, ApiException},
};

/// Body of `POST /rides/request`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideRequestBody {
    pub pickup: String,
    pub destination: String,
    pub ride_type: RideType,
    pub passengers: u32,
    pub timestamp: DateTime<Utc>,
    pub user_id: UserId,
}

/// `{success, data|message}` envelope used by every HTTP action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Unwraps a response whose `data` is mandatory on success.
    pub fn into_result(self) -> Result<T, ApiException> {
        match self.into_optional()? {
            Some(data) => Ok(data),
            None => Err(ApiException::new("response is missing data")),
        }
    }

    /// Unwraps a response whose `data` may be absent on success.
    pub fn into_optional(self) -> Result<Option<T>, ApiException> {
        if self.success {
            Ok(self.data)
        } else {
            Err(ApiException::new(
                self.message
                    .unwrap_or_else(|| "unspecified server error".to_string()),
            ))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideSubmission {
    pub ride_id: RideId,
    #[serde(default = "searching")]
    pub status: RideState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_fare: Option<f64>,
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub estimated_time: Option<String>,
}

fn searching() -> RideState {
    RideState::Searching
}

/// `data` of cancel/accept/start/complete responses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideAck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ride_id: Option<RideId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RideState>,
}

/// Driver as sent by the backend; only `name` is guaranteed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<DriverId>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f32>,
    #[serde(
        default,
        alias = "vehicleDescription",
        skip_serializing_if = "Option::is_none"
    )]
    pub vehicle: Option<String>,
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub eta: Option<String>,
}

/// `ride_update` event, also the body of `GET /rides/{rideId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideUpdate {
    pub ride_id: RideId,
    pub status: RideState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<DriverPayload>,
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub eta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Per-transition notice (`ride_accepted`, `ride_started`, ...). The backend
/// sends snake_case keys here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideNotice {
    #[serde(alias = "ride_id")]
    pub ride_id: RideId,
    #[serde(default, alias = "driver_id", skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<DriverId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<DriverPayload>,
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub eta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RideNotice {
    pub fn into_update(self, status: RideState) -> RideUpdate {
        let driver = match (self.driver, self.driver_id) {
            (Some(mut driver), driver_id) => {
                driver.id = driver.id.or(driver_id);
                Some(driver)
            }
            (None, Some(driver_id)) => Some(DriverPayload {
                id: Some(driver_id),
                name: "Your driver".into(),
                rating: None,
                vehicle: None,
                eta: None,
            }),
            (None, None) => None,
        };
        RideUpdate {
            ride_id: self.ride_id,
            status,
            driver,
            eta: self.eta,
            message: self.message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverLocationUpdate {
    pub driver_id: DriverId,
    /// Opaque to the client; handed to the map renderer unchanged.
    pub location: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub message: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Frames received on the real-time channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected(StatusMessage),
    Authenticated(StatusMessage),
    RideUpdate(RideUpdate),
    RideAccepted(RideNotice),
    RideStarted(RideNotice),
    RideCompleted(RideNotice),
    RideCancelled(RideNotice),
    DriverRated(RideNotice),
    #[serde(alias = "driver_location_update")]
    DriverLocation(DriverLocationUpdate),
    Notification(NotificationPayload),
    Error(ApiError),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::Authenticated(_) => "authenticated",
            Self::RideUpdate(_) => "ride_update",
            Self::RideAccepted(_) => "ride_accepted",
            Self::RideStarted(_) => "ride_started",
            Self::RideCompleted(_) => "ride_completed",
            Self::RideCancelled(_) => "ride_cancelled",
            Self::DriverRated(_) => "driver_rated",
            Self::DriverLocation(_) => "driver_location",
            Self::Notification(_) => "notification",
            Self::Error(_) => "error",
        }
    }

    /// Status change carried by a ride event, whichever form it arrived in.
    pub fn ride_update(&self) -> Option<RideUpdate> {
        let (notice, status) = match self {
            Self::RideUpdate(update) => return Some(update.clone()),
            Self::RideAccepted(notice) => (notice, RideState::Matched),
            Self::RideStarted(notice) => (notice, RideState::EnRoute),
            Self::RideCompleted(notice) => (notice, RideState::Completed),
            Self::RideCancelled(notice) => (notice, RideState::Cancelled),
            _ => return None,
        };
        Some(notice.clone().into_update(status))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthHandshake {
    pub user_id: UserId,
    pub user_type: UserType,
    pub token: String,
}

/// Frames sent by the client on the real-time channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    Authenticate(AuthHandshake),
    RateDriver(DriverRating),
}

/// Post-ride rating, accepted by the backend once per completed ride.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverRating {
    pub ride_id: RideId,
    pub rating: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text),
        Some(Value::Number(minutes)) => Some(format!("{minutes} min")),
        Some(other) => Some(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_ride_update_with_partial_driver() {
        let raw = r#"{"event":"ride_update","data":{"rideId":"r-1","status":"matched","driver":{"name":"X"},"eta":4}}"#;
        let event: ServerEvent = serde_json::from_str(raw).expect("decode");
        let ServerEvent::RideUpdate(update) = event else {
            panic!("unexpected event: {event:?}");
        };
        assert_eq!(update.ride_id, RideId::new("r-1"));
        assert_eq!(update.status, RideState::Matched);
        assert_eq!(update.driver.expect("driver").name, "X");
        assert_eq!(update.eta.as_deref(), Some("4 min"));
    }

    #[test]
    fn accepts_backend_status_aliases() {
        for (raw, expected) in [
            ("\"requested\"", RideState::Searching),
            ("\"accepted\"", RideState::Matched),
            ("\"in_progress\"", RideState::EnRoute),
            ("\"enroute\"", RideState::EnRoute),
            ("\"cancelled\"", RideState::Cancelled),
        ] {
            let state: RideState = serde_json::from_str(raw).expect("status");
            assert_eq!(state, expected, "{raw}");
        }
    }

    #[test]
    fn decodes_legacy_driver_location_event_name() {
        let raw = r#"{"event":"driver_location_update","data":{"driverId":"d-7","location":{"lat":1.5,"lng":2.5}}}"#;
        let event: ServerEvent = serde_json::from_str(raw).expect("decode");
        assert_eq!(event.name(), "driver_location");
    }

    #[test]
    fn failure_envelope_surfaces_message() {
        let raw = r#"{"success":false,"message":"no drivers"}"#;
        let response: ApiResponse<RideSubmission> = serde_json::from_str(raw).expect("decode");
        let err = response.into_result().expect_err("must fail");
        assert_eq!(err.message, "no drivers");
    }

    #[test]
    fn submission_accepts_numeric_estimated_time() {
        let raw = r#"{"success":true,"data":{"rideId":"r-9","status":"searching","estimatedFare":6.25,"estimatedTime":12}}"#;
        let response: ApiResponse<RideSubmission> = serde_json::from_str(raw).expect("decode");
        let submission = response.into_result().expect("data");
        assert_eq!(submission.estimated_time.as_deref(), Some("12 min"));
        assert_eq!(submission.estimated_fare, Some(6.25));
    }

    #[test]
    fn decodes_backend_transition_events() {
        let accepted = r#"{"event":"ride_accepted","data":{"ride_id":"ride-1","driver_id":"d-4","message":"Your ride has been accepted!"}}"#;
        let event: ServerEvent = serde_json::from_str(accepted).expect("decode");
        assert_eq!(event.name(), "ride_accepted");
        let update = event.ride_update().expect("update");
        assert_eq!(update.ride_id, RideId::new("ride-1"));
        assert_eq!(update.status, RideState::Matched);
        let driver = update.driver.expect("driver");
        assert_eq!(driver.id, Some(DriverId::new("d-4")));
        assert_eq!(driver.name, "Your driver");

        for (raw, status) in [
            (
                r#"{"event":"ride_started","data":{"ride_id":"ride-1","message":"Your ride has started!"}}"#,
                RideState::EnRoute,
            ),
            (
                r#"{"event":"ride_completed","data":{"ride_id":"ride-1"}}"#,
                RideState::Completed,
            ),
            (
                r#"{"event":"ride_cancelled","data":{"ride_id":"ride-1","message":"Ride cancelled successfully"}}"#,
                RideState::Cancelled,
            ),
        ] {
            let event: ServerEvent = serde_json::from_str(raw).expect(raw);
            let update = event.ride_update().expect("update");
            assert_eq!(update.status, status, "{raw}");
            assert!(update.driver.is_none());
        }
    }

    #[test]
    fn rating_frame_uses_backend_field_names() {
        let frame = ClientMessage::RateDriver(DriverRating {
            ride_id: RideId::new("ride-1"),
            rating: 5,
            comment: None,
        });
        let text = serde_json::to_string(&frame).expect("encode");
        assert_eq!(
            text,
            r#"{"event":"rate_driver","data":{"ride_id":"ride-1","rating":5}}"#
        );
    }

    #[test]
    fn handshake_frame_uses_camel_case_fields() {
        let frame = ClientMessage::Authenticate(AuthHandshake {
            user_id: UserId::new("u-1"),
            user_type: UserType::Rider,
            token: "t".into(),
        });
        let text = serde_json::to_string(&frame).expect("encode");
        assert_eq!(
            text,
            r#"{"event":"authenticate","data":{"userId":"u-1","userType":"rider","token":"t"}}"#
        );
    }
}

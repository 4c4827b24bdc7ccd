use std::{collections::HashMap, sync::Mutex, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{RideId, RideState},
    protocol::{ApiResponse, RideAck, RideRequestBody, RideSubmission, RideUpdate},
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::RideError,
    fare::{estimate_fare, estimate_trip_minutes, format_minutes},
};

/// Backend operations on a single ride.
#[async_trait]
pub trait RideApi: Send + Sync {
    async fn submit_ride(&self, request: &RideRequestBody) -> Result<RideSubmission, RideError>;
    async fn cancel_ride(&self, ride_id: &RideId) -> Result<RideAck, RideError>;
    async fn accept_ride(&self, ride_id: &RideId) -> Result<RideAck, RideError>;
    async fn start_ride(&self, ride_id: &RideId) -> Result<RideAck, RideError>;
    async fn complete_ride(&self, ride_id: &RideId) -> Result<RideAck, RideError>;
    async fn fetch_ride(&self, ride_id: &RideId) -> Result<RideUpdate, RideError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpApiSettings {
    pub timeout: Duration,
    pub token: Option<String>,
}

impl Default for HttpApiSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            token: None,
        }
    }
}

pub struct HttpRideApi {
    http: Client,
    server_url: String,
    token: Option<String>,
}

impl HttpRideApi {
    pub fn new(server_url: impl Into<String>, settings: HttpApiSettings) -> Result<Self> {
        let server_url = server_url.into();
        if !(server_url.starts_with("http://") || server_url.starts_with("https://")) {
            anyhow::bail!("server_url must start with http:// or https://, got {server_url}");
        }
        let http = Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            server_url: server_url.trim_end_matches('/').to_string(),
            token: settings.token,
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn ride_action(&self, ride_id: &RideId, action: &str) -> Result<RideAck, RideError> {
        debug!(ride_id = %ride_id, action, "api: posting ride action");
        let response = self
            .authorize(
                self.http
                    .post(format!("{}/rides/{ride_id}/{action}", self.server_url)),
            )
            .send()
            .await?;
        let ack = read_optional_envelope::<RideAck>(response).await?;
        Ok(ack.unwrap_or_default())
    }
}

#[async_trait]
impl RideApi for HttpRideApi {
    async fn submit_ride(&self, request: &RideRequestBody) -> Result<RideSubmission, RideError> {
        let response = self
            .authorize(
                self.http
                    .post(format!("{}/rides/request", self.server_url))
                    .json(request),
            )
            .send()
            .await?;
        let submission: RideSubmission = read_envelope(response).await?;
        info!(ride_id = %submission.ride_id, "api: ride submitted");
        Ok(submission)
    }

    async fn cancel_ride(&self, ride_id: &RideId) -> Result<RideAck, RideError> {
        self.ride_action(ride_id, "cancel").await
    }

    async fn accept_ride(&self, ride_id: &RideId) -> Result<RideAck, RideError> {
        self.ride_action(ride_id, "accept").await
    }

    async fn start_ride(&self, ride_id: &RideId) -> Result<RideAck, RideError> {
        self.ride_action(ride_id, "start").await
    }

    async fn complete_ride(&self, ride_id: &RideId) -> Result<RideAck, RideError> {
        self.ride_action(ride_id, "complete").await
    }

    async fn fetch_ride(&self, ride_id: &RideId) -> Result<RideUpdate, RideError> {
        let response = self
            .authorize(
                self.http
                    .get(format!("{}/rides/{ride_id}", self.server_url)),
            )
            .send()
            .await?;
        read_envelope(response).await
    }
}

async fn read_envelope<T: DeserializeOwned>(response: Response) -> Result<T, RideError> {
    Ok(decode_envelope::<T>(response).await?.into_result()?)
}

async fn read_optional_envelope<T: DeserializeOwned>(
    response: Response,
) -> Result<Option<T>, RideError> {
    Ok(decode_envelope::<T>(response).await?.into_optional()?)
}

/// Failure envelopes are honoured whatever the HTTP status; anything else
/// that is not a 2xx becomes a network error carrying the status.
async fn decode_envelope<T: DeserializeOwned>(
    response: Response,
) -> Result<ApiResponse<T>, RideError> {
    let status = response.status();
    let body = response.bytes().await?;
    match serde_json::from_slice::<ApiResponse<T>>(&body) {
        Ok(envelope) => Ok(envelope),
        Err(err) if status.is_success() => Err(RideError::network(format!(
            "invalid response body: {err}"
        ))),
        Err(_) => Err(RideError::network(format!("server returned {status}"))),
    }
}

/// Offline backend: accepts every ride, quoting from a fixed trip length.
pub struct SimulatedRideApi {
    assumed_distance_miles: f64,
    rides: Mutex<HashMap<RideId, RideState>>,
}

impl SimulatedRideApi {
    pub fn new(assumed_distance_miles: f64) -> Self {
        Self {
            assumed_distance_miles,
            rides: Mutex::new(HashMap::new()),
        }
    }

    fn set_status(&self, ride_id: &RideId, status: RideState) -> Result<RideAck, RideError> {
        let mut rides = self
            .rides
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(current) = rides.get_mut(ride_id) else {
            return Err(RideError::network(format!("ride {ride_id} not found")));
        };
        *current = status;
        Ok(RideAck {
            ride_id: Some(ride_id.clone()),
            status: Some(status),
        })
    }
}

impl Default for SimulatedRideApi {
    fn default() -> Self {
        Self::new(5.0)
    }
}

#[async_trait]
impl RideApi for SimulatedRideApi {
    async fn submit_ride(&self, request: &RideRequestBody) -> Result<RideSubmission, RideError> {
        let fare = estimate_fare(request.ride_type, self.assumed_distance_miles)?;
        let minutes = estimate_trip_minutes(self.assumed_distance_miles)?;
        let ride_id = RideId::new(format!("sim-{}", Uuid::new_v4()));
        self.rides
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(ride_id.clone(), RideState::Searching);
        Ok(RideSubmission {
            ride_id,
            status: RideState::Searching,
            estimated_fare: Some(fare),
            estimated_time: Some(format_minutes(minutes)),
        })
    }

    async fn cancel_ride(&self, ride_id: &RideId) -> Result<RideAck, RideError> {
        self.set_status(ride_id, RideState::Cancelled)
    }

    async fn accept_ride(&self, ride_id: &RideId) -> Result<RideAck, RideError> {
        self.set_status(ride_id, RideState::Matched)
    }

    async fn start_ride(&self, ride_id: &RideId) -> Result<RideAck, RideError> {
        self.set_status(ride_id, RideState::EnRoute)
    }

    async fn complete_ride(&self, ride_id: &RideId) -> Result<RideAck, RideError> {
        self.set_status(ride_id, RideState::Completed)
    }

    async fn fetch_ride(&self, ride_id: &RideId) -> Result<RideUpdate, RideError> {
        let rides = self
            .rides
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let status = rides
            .get(ride_id)
            .copied()
            .ok_or_else(|| RideError::network(format!("ride {ride_id} not found")))?;
        Ok(RideUpdate {
            ride_id: ride_id.clone(),
            status,
            driver: None,
            eta: None,
            message: None,
        })
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;

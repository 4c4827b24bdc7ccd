use super::*;
use chrono::Duration;
use shared::domain::{DriverId, DriverInfo, RideId, RideType};

fn sample_record(timestamp: DateTime<Utc>) -> PersistedRide {
    PersistedRide {
        ride_id: Some(RideId::new("ride-42")),
        status: RideState::Matched,
        timestamp,
        pickup: "1 Market St".into(),
        destination: "Pier 39".into(),
        ride_type: RideType::Comfort,
        passengers: 2,
        driver: Some(DriverInfo {
            id: DriverId::new("d-1"),
            name: "Maria Lopez".into(),
            rating: 4.8,
            vehicle_description: "Toyota Camry - Silver".into(),
            eta: "4 min".into(),
        }),
        estimated_fare: Some(12.35),
        estimated_time: Some("14 min".into()),
    }
}

#[tokio::test]
async fn saves_and_loads_ride_per_session() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let record = sample_record(Utc::now());

    storage
        .save_ride("session-a", &record)
        .await
        .expect("save");

    let loaded = storage
        .load_ride("session-a")
        .await
        .expect("load")
        .expect("record present");
    assert_eq!(loaded, record);
    assert!(storage
        .load_ride("session-b")
        .await
        .expect("load other")
        .is_none());
}

#[tokio::test]
async fn save_overwrites_previous_record_for_session() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let mut record = sample_record(Utc::now());
    storage.save_ride("s", &record).await.expect("save");

    record.status = RideState::EnRoute;
    storage.save_ride("s", &record).await.expect("save again");

    let rides = storage.list_rides().await.expect("list");
    assert_eq!(rides.len(), 1);
    assert_eq!(rides[0].status, RideState::EnRoute);
    assert_eq!(rides[0].ride_id.as_deref(), Some("ride-42"));
}

#[tokio::test]
async fn clear_reports_whether_record_existed() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .save_ride("s", &sample_record(Utc::now()))
        .await
        .expect("save");

    assert!(storage.clear_ride("s").await.expect("clear"));
    assert!(!storage.clear_ride("s").await.expect("clear twice"));
    assert!(storage.load_ride("s").await.expect("load").is_none());
}

#[tokio::test]
async fn purges_only_records_older_than_cutoff() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let now = Utc::now();
    storage
        .save_ride("old", &sample_record(now - Duration::minutes(90)))
        .await
        .expect("save old");
    storage
        .save_ride("fresh", &sample_record(now - Duration::minutes(5)))
        .await
        .expect("save fresh");

    let purged = storage
        .purge_recorded_before(now - Duration::minutes(60))
        .await
        .expect("purge");
    assert_eq!(purged, 1);

    let remaining = storage.list_rides().await.expect("list");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].session_key, "fresh");
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[test]
fn memory_urls_have_no_parent_directory() {
    assert!(sqlite_path("sqlite::memory:").is_none());
    assert_eq!(
        sqlite_path("sqlite://./data/rides.db?mode=rwc"),
        Some(PathBuf::from("./data/rides.db"))
    );
}

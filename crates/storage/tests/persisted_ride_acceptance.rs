use chrono::Utc;
use shared::domain::{PersistedRide, RideState, RideType};
use storage::{RideRecordStore, Storage};

#[tokio::test]
async fn ride_record_survives_reopening_the_database_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("nested").join("rides.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let record = PersistedRide {
        ride_id: None,
        status: RideState::Searching,
        timestamp: Utc::now(),
        pickup: "A".into(),
        destination: "B".into(),
        ride_type: RideType::Economy,
        passengers: 1,
        driver: None,
        estimated_fare: None,
        estimated_time: None,
    };

    {
        let storage = Storage::new(&database_url).await.expect("db");
        storage
            .save_ride("currentRide", &record)
            .await
            .expect("save");
    }

    assert!(db_path.exists(), "database file should exist");

    let reopened = Storage::new(&database_url).await.expect("reopen");
    let loaded = reopened
        .load_ride("currentRide")
        .await
        .expect("load")
        .expect("record survives restart");
    assert_eq!(loaded, record);
}

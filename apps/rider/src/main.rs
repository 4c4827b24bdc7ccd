mod config;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use client_core::{
    fare, Clock, DriverSimulator, EventSourceConfig, HttpRideApi, RideEvent, RideLifecycle,
    RideSession, RideSessionHandle, RideSnapshot, SessionConfig, SimulatedRideApi,
    SimulationSettings, SystemClock, WebSocketEventSource,
};
use shared::{
    domain::{RideDetails, RideState, RideType, UserId, UserType},
    protocol::AuthHandshake,
};
use storage::{RideRecordStore, Storage};
use tokio::task::JoinHandle;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Settings;

#[derive(Parser, Debug)]
#[command(name = "rider", about = "Request and follow a ride from the terminal")]
struct Cli {
    /// Config file; defaults to ./rider.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Quote fares and trip time for a distance in miles.
    Estimate {
        #[arg(long)]
        distance: f64,
        #[arg(long)]
        ride_type: Option<String>,
    },
    /// Request a ride and follow it until it ends.
    Request {
        #[arg(long)]
        pickup: String,
        #[arg(long)]
        destination: String,
        #[arg(long, default_value = "economy")]
        ride_type: String,
        #[arg(long, default_value_t = 1)]
        passengers: i64,
        /// Use the offline backend and simulated drivers.
        #[arg(long)]
        simulate: bool,
        #[arg(long)]
        seed: Option<u64>,
        /// Rate the driver 1-5 once the ride completes.
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
        rate: Option<u8>,
    },
    /// Follow the ride persisted for this session.
    Resume {
        #[arg(long)]
        simulate: bool,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
        rate: Option<u8>,
    },
    /// Print the persisted ride for this session.
    Status,
    /// List every stored ride record.
    List,
    /// Delete records older than the staleness window.
    Purge {
        #[arg(long)]
        older_than_minutes: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    let mut settings = config::load_settings(cli.config.as_deref())?;
    if let Some(server_url) = cli.server_url {
        settings.server_url = server_url;
    }
    if let Some(database_url) = cli.database_url {
        settings.database_url = database_url;
    }

    match cli.command {
        Command::Estimate {
            distance,
            ride_type,
        } => estimate(distance, ride_type.as_deref()),
        Command::Request {
            pickup,
            destination,
            ride_type,
            passengers,
            simulate,
            seed,
            rate,
        } => {
            let details = RideDetails {
                pickup,
                destination,
                ride_type,
                passengers,
            };
            follow(&settings, Some(details), simulate, seed, rate).await
        }
        Command::Resume {
            simulate,
            seed,
            rate,
        } => follow(&settings, None, simulate, seed, rate).await,
        Command::Status => {
            let storage = open_storage(&settings).await?;
            match storage.load_ride(&settings.session_key).await? {
                Some(record) => {
                    let age = Utc::now() - record.timestamp;
                    println!("{}", serde_json::to_string_pretty(&record)?);
                    println!("requested {} minutes ago", age.num_minutes());
                }
                None => println!("no ride stored for session '{}'", settings.session_key),
            }
            Ok(())
        }
        Command::List => {
            let storage = open_storage(&settings).await?;
            for ride in storage.list_rides().await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    ride.session_key,
                    ride.ride_id.as_deref().unwrap_or("-"),
                    ride.status,
                    ride.recorded_at.to_rfc3339()
                );
            }
            Ok(())
        }
        Command::Purge { older_than_minutes } => {
            let storage = open_storage(&settings).await?;
            let minutes = older_than_minutes.unwrap_or(settings.stale_after_minutes);
            let cutoff = ChronoDuration::from_std(Duration::from_secs(minutes.saturating_mul(60)))
                .ok()
                .and_then(|window| Utc::now().checked_sub_signed(window))
                .context("purge window is out of range")?;
            let purged = storage.purge_recorded_before(cutoff).await?;
            println!("purged {purged} ride record(s) older than {minutes} minutes");
            Ok(())
        }
    }
}

fn estimate(distance: f64, ride_type: Option<&str>) -> Result<()> {
    let ride_types = match ride_type {
        Some(raw) => vec![raw.parse::<RideType>()?],
        None => RideType::ALL.to_vec(),
    };
    let minutes = fare::estimate_trip_minutes(distance)?;
    for ride_type in ride_types {
        let quote = fare::quote(ride_type, distance)?;
        println!(
            "{:<8} ${:>7.2}  (x{:.1})  about {}",
            ride_type.as_str(),
            quote.total,
            quote.multiplier,
            fare::format_minutes(minutes)
        );
    }
    Ok(())
}

async fn open_storage(settings: &Settings) -> Result<Storage> {
    let database_url = config::prepare_database_url(&settings.database_url)?;
    Storage::new(&database_url)
        .await
        .with_context(|| format!("failed to open ride storage at {database_url}"))
}

async fn follow(
    settings: &Settings,
    details: Option<RideDetails>,
    simulate: bool,
    seed: Option<u64>,
    mut rating: Option<u8>,
) -> Result<()> {
    let storage = Arc::new(open_storage(settings).await?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let lifecycle = RideLifecycle::new(Arc::clone(&clock), settings.lifecycle());
    let user_id = UserId::new(settings.user_id.clone());
    let session_config = SessionConfig {
        session_key: settings.session_key.clone(),
        user_id: user_id.clone(),
    };

    let session = if simulate {
        let lifecycle = lifecycle.with_simulator(DriverSimulator::new(SimulationSettings {
            seed,
            ..SimulationSettings::default()
        }));
        let api = SimulatedRideApi::new(settings.assumed_distance_miles);
        RideSession::new(lifecycle, clock, Arc::new(api), session_config)
    } else {
        let api = HttpRideApi::new(settings.server_url.clone(), settings.http())?;
        let source = WebSocketEventSource::new(EventSourceConfig {
            server_url: settings.server_url.clone(),
            path: settings.ws_path.clone(),
            handshake: AuthHandshake {
                user_id,
                user_type: UserType::Rider,
                token: settings.token.clone().unwrap_or_default(),
            },
            reconnect: settings.reconnect(),
        })?;
        RideSession::new(lifecycle, clock, Arc::new(api), session_config).with_event_source(source)
    }
    .with_store(storage);

    let mut events = BroadcastStream::new(session.subscribe());
    let (handle, task) = session.start().await;

    let snapshot = handle.snapshot().await?;
    match (details, snapshot.state) {
        (Some(details), RideState::Idle) => {
            if let Err(err) = handle.request(details).await {
                stop(&handle, task).await?;
                return Err(err.into());
            }
        }
        (Some(_), state) => println!("A ride is already {state}; following it instead."),
        (None, RideState::Idle) => {
            println!("No active ride to resume.");
            return stop(&handle, task).await;
        }
        (None, state) => {
            println!("Resuming ride ({state}).");
            render_snapshot(&snapshot);
        }
    }

    let stop_on_terminal = settings.terminal_display_secs == 0;
    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(lagged) => {
                        warn!("presenter fell behind: {lagged}");
                        continue;
                    }
                };
                if let RideEvent::StateChanged(snapshot) = &event {
                    if snapshot.state == RideState::Completed {
                        if let Some(stars) = rating.take() {
                            match handle.rate_driver(stars, None).await {
                                Ok(_) => println!("Rated your driver {stars}/5."),
                                Err(err) => warn!("rating rejected: {err}"),
                            }
                        }
                    }
                    if snapshot.state == RideState::Idle
                        || (stop_on_terminal && snapshot.state.is_terminal())
                    {
                        render(&event);
                        break;
                    }
                }
                render(&event);
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Cancelling ride...");
                if let Err(err) = handle.cancel().await {
                    warn!("cancel rejected: {err}");
                    break;
                }
            }
        }
    }

    stop(&handle, task).await
}

async fn stop(handle: &RideSessionHandle, task: JoinHandle<()>) -> Result<()> {
    handle.shutdown().await;
    task.await.context("ride session task failed")?;
    Ok(())
}

fn render(event: &RideEvent) {
    match event {
        RideEvent::StateChanged(snapshot) => render_snapshot(snapshot),
        RideEvent::SearchProgress {
            elapsed_secs,
            remaining_secs,
        } => {
            if elapsed_secs % 10 == 0 {
                match remaining_secs {
                    Some(remaining) => {
                        println!("Still searching ({elapsed_secs}s, {remaining}s left)")
                    }
                    None => println!("Still searching ({elapsed_secs}s)"),
                }
            }
        }
        RideEvent::DriverLocation(update) => {
            debug!(driver_id = %update.driver_id, location = %update.location, "driver moved");
        }
        RideEvent::Notification(notification) => match &notification.title {
            Some(title) => println!("[{title}] {}", notification.message),
            None => println!("{}", notification.message),
        },
        RideEvent::Error(report) => eprintln!("error ({:?}): {}", report.kind, report.message),
    }
}

fn render_snapshot(snapshot: &RideSnapshot) {
    let Some(ride) = &snapshot.ride else {
        println!("Ready for a new ride.");
        return;
    };
    match ride.state {
        RideState::Searching => match &ride.id {
            None => println!(
                "Searching for a {} driver from {} to {}...",
                ride.ride_type, ride.pickup, ride.destination
            ),
            Some(id) => println!(
                "Ride {id} confirmed: fare ${:.2}, about {}",
                ride.estimated_fare.unwrap_or_default(),
                ride.estimated_time.as_deref().unwrap_or("unknown")
            ),
        },
        RideState::Matched => {
            if let Some(driver) = &ride.driver {
                println!(
                    "{} ({:.1}) is coming in a {}, arriving in {}",
                    driver.name, driver.rating, driver.vehicle_description, driver.eta
                );
            }
        }
        RideState::EnRoute => println!("Your driver has arrived. Heading to {}.", ride.destination),
        RideState::Completed => match ride.completed_duration {
            Some(duration) => println!(
                "Arrived at {} after {} min.",
                ride.destination,
                duration.num_minutes()
            ),
            None => println!("Arrived at {}.", ride.destination),
        },
        RideState::Cancelled => println!("Ride cancelled."),
        RideState::Idle => println!("Ready for a new ride."),
    }
}

use beem_energy::config::{load_settings, Settings};
use beem_energy::setup::{logged_in_client, prepare_coordinator};
use beem_energy::{setup_entry, BeemSensor, JsonFileStore, SensorSet};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Settings file; `BEEM_*` environment variables override it.
    #[clap(long, env = "BEEM_CONFIG", default_value = "config/beem")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Poll the Beem API until interrupted (default).
    Run,

    /// Run a single refresh and print the combined snapshot.
    Snapshot,

    /// List the account's batteries and BeemBoxes.
    Devices,

    /// Print the monthly BeemBox summary.
    Summary {
        #[clap(long)]
        month: Option<u32>,
        #[clap(long)]
        year: Option<i32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let settings = load_settings(&args.config)?;
    let store = Arc::new(JsonFileStore::new(settings.state_file.clone()));

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(&settings, store).await,
        Command::Snapshot => {
            let mut coordinator = prepare_coordinator(&settings, store.clone(), store).await?;
            let snapshot = coordinator.refresh().await?;
            println!("{}", serde_json::to_string_pretty(&*snapshot)?);
            Ok(())
        }
        Command::Devices => {
            let mut client = logged_in_client(&settings, store.clone(), &*store).await?;
            let batteries = client.fetch_devices().await?;
            let beemboxes = client.fetch_boxes().await.unwrap_or_else(|e| {
                warn!(error = %e, "BeemBoxes unavailable");
                Vec::new()
            });
            let devices = json!({ "batteries": batteries, "beemboxes": beemboxes });
            println!("{}", serde_json::to_string_pretty(&devices)?);
            Ok(())
        }
        Command::Summary { month, year } => {
            let mut client = logged_in_client(&settings, store.clone(), &*store).await?;
            let summary = client.fetch_box_summary(month, year).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
    }
}

async fn run(settings: &Settings, store: Arc<JsonFileStore>) -> anyhow::Result<()> {
    info!("Starting Beem Energy poller");

    let mut registry = SensorSet::default();
    let entry = setup_entry(settings, store.clone(), store, &mut registry).await?;
    let sensors: Arc<Vec<BeemSensor>> = Arc::new(registry.into_sensors());
    info!(sensors = sensors.len(), "Sensors registered");

    let coordinator = entry.coordinator();
    log_sensors(&sensors, coordinator.data().as_deref());
    let logged = sensors.clone();
    coordinator.add_listener(move |snapshot| log_sensors(&logged, Some(snapshot)));

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, shutting down");
    entry.unload().await;
    Ok(())
}

fn log_sensors(sensors: &[BeemSensor], snapshot: Option<&beem_energy::Snapshot>) {
    for sensor in sensors {
        match sensor.native_value(snapshot) {
            Some(value) => debug!(
                sensor = %sensor.unique_id,
                value = %value,
                unit = sensor.unit.unwrap_or_default(),
                "Sensor value"
            ),
            None => debug!(sensor = %sensor.unique_id, "No reading"),
        }
    }
}

use acdm_core::models::FlightplanInput;
use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::time::{interval, Duration};

/// Feed a flight plan into a running acdm-server.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// acdm-server URL
    #[arg(long, default_value = "http://localhost:3080")]
    url: String,

    #[arg(long)]
    callsign: String,

    /// Departure airport (ICAO)
    #[arg(long)]
    origin: String,

    /// Destination airport (ICAO)
    #[arg(long, default_value = "")]
    destination: String,

    #[arg(long)]
    runway: Option<String>,

    #[arg(long)]
    sid: Option<String>,

    /// Estimated off-block time as HHMM
    #[arg(long)]
    eobt: Option<String>,

    #[arg(long, allow_hyphen_values = true)]
    lat: f64,

    #[arg(long, allow_hyphen_values = true)]
    lon: f64,

    /// Ground speed in knots
    #[arg(long, default_value_t = 0.0)]
    groundspeed: f64,

    /// Also add the origin to the active airports
    #[arg(long)]
    activate: bool,

    /// Resend the flight plan every N seconds
    #[arg(long)]
    repeat: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let client = Client::new();
    let base = args.url.trim_end_matches('/').to_string();

    if args.activate {
        activate_origin(&client, &base, &args.origin).await?;
    }

    let plan = FlightplanInput {
        callsign: args.callsign.clone(),
        origin: args.origin.clone(),
        destination: args.destination.clone(),
        runway: args.runway.clone(),
        sid: args.sid.clone(),
        eobt: args.eobt.clone(),
        latitude: args.lat,
        longitude: args.lon,
        groundspeed_kt: Some(args.groundspeed),
    };

    let Some(every) = args.repeat else {
        return send(&client, &base, &plan).await;
    };

    let mut ticker = interval(Duration::from_secs(every.max(1)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Stopped.");
                return Ok(());
            }
            _ = ticker.tick() => {
                if let Err(e) = send(&client, &base, &plan).await {
                    eprintln!("{:#}", e);
                }
            }
        }
    }
}

async fn activate_origin(client: &Client, base: &str, origin: &str) -> Result<()> {
    let current: Value = client
        .get(format!("{}/v1/airports", base))
        .send()
        .await
        .context("Failed to reach acdm-server")?
        .error_for_status()?
        .json()
        .await?;

    let mut airports: Vec<String> = current["airports"]
        .as_array()
        .map(|airports| {
            airports
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    airports.push(origin.to_string());

    let updated: Value = client
        .put(format!("{}/v1/airports", base))
        .json(&json!({ "airports": airports }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    println!("Active airports: {}", updated["airports"]);
    Ok(())
}

async fn send(client: &Client, base: &str, plan: &FlightplanInput) -> Result<()> {
    let response = client
        .post(format!("{}/v1/flightplans", base))
        .json(plan)
        .send()
        .await
        .context("Failed to reach acdm-server")?;

    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    if !status.is_success() {
        anyhow::bail!("Flight plan rejected ({}): {}", status, body["error"]);
    }

    println!("Queued flight plan for {}", body["callsign"]);
    if !body["movement"].is_null() {
        println!("Detected movement: {}", body["movement"]);
    }
    Ok(())
}

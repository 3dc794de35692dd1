//! Operator tool for geolink.
//!
//! Decodes stored locations, resolves campaign regions and inspects or
//! removes building-address links.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

use geolink::config::Config;
use geolink::models::LocationRecord;
use geolink::region::{MapboxGeocoder, RegionResolver};
use geolink::scylla::ScyllaStore;
use geolink::store::CampaignStore;
use geolink::{decode_point, BuildingAddressLinker, RegionError};

#[derive(Parser, Debug)]
#[command(name = "geolink")]
#[command(about = "Geometry decoding, region resolution and building-address links")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Mapbox access token (overrides the config file)
    #[arg(long, env = "MAPBOX_ACCESS_TOKEN", hide_env_values = true)]
    mapbox_token: Option<String>,

    /// ScyllaDB node (overrides the config file)
    #[arg(long)]
    scylla_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode a location record given as JSON and print the point
    Decode {
        /// e.g. '{"geometry":"0101000020E6100000..."}'
        json: String,
    },

    /// Resolve the region code of a stored campaign
    ResolveRegion {
        #[arg(long)]
        campaign: Uuid,

        /// Write the resolved code back when it changed
        #[arg(long)]
        persist: bool,
    },

    /// List the addresses linked to a building
    Links {
        #[arg(long)]
        campaign: Uuid,

        #[arg(long)]
        building: String,
    },

    /// Remove the link between an address and a building
    Unlink {
        #[arg(long)]
        campaign: Uuid,

        #[arg(long)]
        building: String,

        #[arg(long)]
        address: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::default(),
    };
    if let Some(token) = args.mapbox_token {
        config.geocoder.access_token = Some(token);
    }
    if let Some(url) = args.scylla_url {
        config.store.scylla_uri = url;
    }

    match args.command {
        Command::Decode { json } => {
            let record: LocationRecord =
                serde_json::from_str(&json).context("Location record is not valid JSON")?;
            match decode_point(&record) {
                Some(point) => println!("{}", serde_json::to_string(&point)?),
                None => println!("null"),
            }
        }

        Command::ResolveRegion { campaign, persist } => {
            let tables = config.regions.load_tables()?;
            let geocoder = MapboxGeocoder::new(&config.geocoder)?;
            if !geocoder.is_available() {
                info!("No Mapbox token configured, using local region tables only");
            }
            let resolver = RegionResolver::new(tables, geocoder);
            let store = ScyllaStore::new(&config.store.scylla_uri, &config.store.keyspace).await?;

            let result = if persist {
                resolver.resolve_campaign(&store, campaign).await?
            } else {
                let record = store
                    .get_campaign(campaign)
                    .await?
                    .ok_or(RegionError::CampaignNotFound(campaign))?;
                resolver
                    .resolve(
                        record.region.as_deref(),
                        record.territory_boundary.as_ref(),
                        record.bbox.as_ref(),
                    )
                    .await
            };
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Command::Links { campaign, building } => {
            let store = ScyllaStore::new(&config.store.scylla_uri, &config.store.keyspace).await?;
            let linker = BuildingAddressLinker::new(store, config.linker.clone());
            let listing = linker.list_building_addresses(campaign, &building).await?;
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }

        Command::Unlink {
            campaign,
            building,
            address,
        } => {
            let store = ScyllaStore::new(&config.store.scylla_uri, &config.store.keyspace).await?;
            let linker = BuildingAddressLinker::new(store, config.linker.clone());
            if linker.unlink_address(campaign, &building, address).await? {
                println!("Unlinked {} from {}", address, building);
            } else {
                println!("No link between {} and {}", address, building);
            }
        }
    }

    Ok(())
}

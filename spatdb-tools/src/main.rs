// SPDX-License-Identifier: AGPL-3.0-or-later
// SpatDB - On-Demand Spatial Omics Feature Platform
// Copyright (C) 2026 SpatDB Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! SpatDB administrative CLI
//!
//! Inventory, maintenance, and worker entry points against the feature
//! platform database. Connection parameters come from the environment
//! (`SINGLE_CELL_DATABASE_HOST` and friends).
//!
//! ## Usage
//!
//! ```bash
//! # Inspect what is loaded
//! spatdb list-studies
//! spatdb count-cells --study "Melanoma CyTOF"
//! spatdb status
//!
//! # Run a computation worker (one process per core)
//! spatdb ondemand start
//!
//! # Cache maintenance
//! spatdb assess-recreate-cache --study-file studies.txt
//! spatdb cache-subsample --study "Melanoma CyTOF"
//!
//! # Cleanup
//! spatdb delete-feature --specification 41
//! spatdb delete-feature --bulk-null --study "Melanoma CyTOF"
//! spatdb drop --study "Melanoma CyTOF"
//! spatdb drop-ondemand-computations --study "Melanoma CyTOF"
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use spatdb_core::study::BlobType;
use spatdb_core::EnvironmentConfig;
use spatdb_ondemand::{CacheAssessor, ComputationWorker, SubsampleWriter};
use spatdb_storage::{
    BlobIndex, DatabaseClient, FeatureRegistry, JobQueue, QueuePolicy, SweepThresholds,
};

/// SpatDB administrative CLI
#[derive(Parser)]
#[command(name = "spatdb")]
#[command(about = "Administrative operations for the SpatDB feature platform")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the studies known to the platform
    ListStudies,

    /// Per-sample and total cell counts of a study
    CountCells {
        /// Study name
        #[arg(short, long)]
        study: String,
    },

    /// Queue depth and blob inventory
    Status,

    /// Delete every cell blob of a study
    Drop {
        /// Study name
        #[arg(short, long)]
        study: String,
    },

    /// Delete every feature specification of a study, with its values
    /// and queue entries
    DropOndemandComputations {
        /// Study name
        #[arg(short, long)]
        study: String,
    },

    /// Delete one specification, or sweep defective ones
    DeleteFeature {
        /// Specification identifier to delete
        #[arg(long, conflicts_with = "bulk_null")]
        specification: Option<i32>,

        /// Sweep specifications with null or incomplete values
        #[arg(long)]
        bulk_null: bool,

        /// Study to sweep (required with --bulk-null)
        #[arg(short, long)]
        study: Option<String>,
    },

    /// On-demand computation processes
    #[command(subcommand)]
    Ondemand(OndemandCommands),

    /// Check blob inventories, rebuilding precompressed payloads where
    /// possible
    AssessRecreateCache {
        /// File with one study name per line
        #[arg(long)]
        study_file: PathBuf,
    },

    /// Build the representative subsample blob of a study
    CacheSubsample {
        /// Study name
        #[arg(short, long)]
        study: String,
    },
}

#[derive(Subcommand)]
enum OndemandCommands {
    /// Run a computation worker until interrupted
    Start,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = EnvironmentConfig::from_env().context("reading database environment")?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;
    runtime.block_on(run(cli.command, config))
}

async fn run(command: Commands, config: EnvironmentConfig) -> Result<()> {
    match command {
        Commands::ListStudies => {
            let db = DatabaseClient::connect(&config.database).await?;
            let blobs = BlobIndex::new(db.client());
            for study in blobs.studies().await? {
                println!("{study}");
            }
        }

        Commands::CountCells { study } => {
            let db = DatabaseClient::connect(&config.database).await?;
            let blobs = BlobIndex::new(db.client());
            let mut total: u64 = 0;
            for sample in blobs.samples_of_study(&study).await? {
                let count = blobs
                    .feature_matrix(&sample, BlobType::FeatureMatrix)
                    .await?
                    .len() as u64;
                println!("{sample}\t{count}");
                total += count;
            }
            println!("total\t{total}");
        }

        Commands::Status => {
            let db = DatabaseClient::connect(&config.database).await?;
            let queue = JobQueue::new(db.client(), QueuePolicy::default());
            let (pending, in_flight) = queue.status().await?;
            println!("queue: {pending} pending, {in_flight} in flight");
            let blobs = BlobIndex::new(db.client());
            for (blob_type, count) in blobs.counts_by_type().await? {
                println!("{blob_type}\t{count}");
            }
        }

        Commands::Drop { study } => {
            let db = DatabaseClient::connect(&config.database).await?;
            let blobs = BlobIndex::new(db.client());
            let samples = blobs.samples_of_study(&study).await?;
            let mut deleted: u64 = 0;
            for key in samples.iter().map(String::as_str).chain([study.as_str()]) {
                deleted += blobs.delete_of_specimen(key).await?;
            }
            println!("deleted {deleted} blobs of {study}");
        }

        Commands::DropOndemandComputations { study } => {
            let db = DatabaseClient::connect(&config.database).await?;
            let registry = FeatureRegistry::new(db.client());
            let specifications = registry.specifications_of_study(&study).await?;
            for specification in &specifications {
                registry.delete_specification(*specification).await?;
            }
            println!(
                "deleted {} specifications of {study}",
                specifications.len()
            );
        }

        Commands::DeleteFeature {
            specification,
            bulk_null,
            study,
        } => {
            let db = DatabaseClient::connect(&config.database).await?;
            let registry = FeatureRegistry::new(db.client());
            match (specification, bulk_null) {
                (Some(identifier), false) => {
                    registry.delete_specification(identifier).await?;
                    println!("deleted specification {identifier}");
                }
                (None, true) => {
                    let study =
                        study.context("--bulk-null requires --study")?;
                    let blobs = BlobIndex::new(db.client());
                    let expected = blobs.samples_of_study(&study).await?.len();
                    let analysis_study = registry.analysis_study_of(&study).await?;
                    let deleted = registry
                        .sweep_defective(&analysis_study, expected, SweepThresholds::default())
                        .await?;
                    println!("swept {} defective specifications", deleted.len());
                }
                _ => bail!("pass exactly one of --specification or --bulk-null"),
            }
        }

        Commands::Ondemand(OndemandCommands::Start) => {
            let worker = ComputationWorker::new(config);
            tokio::select! {
                outcome = worker.run() => outcome?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupt received, stopping worker");
                }
            }
        }

        Commands::AssessRecreateCache { study_file } => {
            let contents = std::fs::read_to_string(&study_file)
                .with_context(|| format!("reading {}", study_file.display()))?;
            let studies: Vec<String> = contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect();
            let db = DatabaseClient::connect(&config.database).await?;
            let assessor = CacheAssessor::new(&config, db.client());
            for assessment in assessor.assess_studies(&studies).await? {
                println!(
                    "{}\tservable={}\trecreated={}\tmissing={}",
                    assessment.study,
                    assessment.servable(),
                    assessment.recreated.len(),
                    assessment.missing_study_blobs.len() + assessment.missing_sample_blobs.len(),
                );
            }
        }

        Commands::CacheSubsample { study } => {
            let db = DatabaseClient::connect(&config.database).await?;
            let writer = SubsampleWriter::new(db.client());
            writer.write(&study).await?;
            println!("subsample written for {study}");
        }
    }
    Ok(())
}

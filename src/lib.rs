pub mod config;
pub mod error;
pub mod field;
pub mod forge_api;
pub mod inventory;
pub mod job;
pub mod parser;
pub mod randomizer;
pub mod resolver;
pub mod settings;

mod cli;

use clap::Parser;
use cli::{Cli, Command, InventoryArgs};
use inventory::StaticInventory;
use job::GenerationJob;
use rand::rngs::StdRng;
use rand::SeedableRng;
use randomizer::Randomizer;
use serde_json::json;
use settings::HostState;
use std::error::Error;

pub use error::{ApplyError, ConfigError, FieldError, ResolveError};
pub use field::Field;
pub use inventory::Inventory;
pub use resolver::{resolve, ParameterResolver, Resolution, ResolvedValue};

/// Entry point for the `forge-randomize` binary.
pub fn run() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let mut rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    match cli.command {
        Command::Resolve {
            field,
            spec,
            count,
            source,
        } => {
            let inventory = build_inventory(&source)?;
            let resolver = ParameterResolver::new(&inventory);
            for _ in 0..count {
                match resolver.resolve(field, &spec, &mut rng) {
                    Ok(Some(resolution)) => match resolution.prompt_word {
                        Some(word) => println!("{}\t{}", resolution.value, word),
                        None => println!("{}", resolution.value),
                    },
                    Ok(None) => {
                        log::info!("Empty spec, `{}` is not randomized", field);
                        break;
                    }
                    Err(error) => log::warn!("Skipping randomizing param `{}` -- {}", field, error),
                }
            }
        }
        Command::Batch {
            config: config_path,
            job,
            source,
        } => {
            let randomizer = Randomizer::new(config::load_randomize_config(&config_path)?)?;
            let inventory = build_inventory(&source)?;
            let mut host = load_host_state(&source);
            let mut job: GenerationJob = match job {
                Some(path) => config::load_file(&path)?,
                None => GenerationJob::default(),
            };

            job.prepare(&inventory, &mut rng);
            let process = randomizer.process(&mut job, &inventory, &mut rng);
            let batch = randomizer.process_batch(&mut job, &mut host, &inventory, &mut rng);
            let override_settings = batch.patch.to_override_settings();
            randomizer.postprocess(&mut host, &batch.snapshot);

            let output = json!({
                "job": job,
                "process": process,
                "batch": batch,
                "override_settings": override_settings,
                "job_count": host.job_count,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Inventory { source, output } => {
            let inventory = build_inventory(&source)?;
            match output {
                Some(path) => {
                    config::save_file(&path, &inventory)?;
                    log::info!("Saved inventory to {}", path.display());
                }
                None => println!("{}", serde_yaml::to_string(&inventory)?),
            }
        }
    }

    Ok(())
}

/// Merges every configured inventory source, file first.
fn build_inventory(source: &InventoryArgs) -> Result<StaticInventory, Box<dyn Error>> {
    let mut inventory = match &source.inventory {
        Some(path) => config::load_file::<StaticInventory>(path)?,
        None => StaticInventory::default(),
    };

    if let Some(base_url) = &source.base_url {
        match forge_api::fetch_inventory(base_url, source.api_key.as_deref()) {
            Ok(fetched) => inventory.merge(fetched),
            Err(error) => log::warn!("Failed to fetch inventory from {}: {}", base_url, error),
        }
    }

    if let Some(models_dir) = &source.models_dir {
        inventory.merge(StaticInventory::scan_models_dir(models_dir)?);
    }

    Ok(inventory)
}

fn load_host_state(source: &InventoryArgs) -> HostState {
    let Some(base_url) = &source.base_url else {
        return HostState::default();
    };

    forge_api::fetch_host_state(base_url, source.api_key.as_deref()).unwrap_or_else(|error| {
        log::warn!("Failed to read Forge options from {}: {}", base_url, error);
        HostState::default()
    })
}

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::field::Field;

/// Forge Randomize command line
#[derive(Parser, Debug)]
#[command(name = "forge-randomize")]
#[command(about = "Randomize Forge/A1111 generation parameters for each batch")]
pub struct Cli {
    /// Seed for the random draws; omit for a fresh seed every run
    #[arg(long, global = true, env = "FORGE_RANDOMIZE_SEED")]
    pub seed: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Draw values for a single field and print them
    Resolve {
        /// Field name, e.g. `cfg_scale` or `sd_model_checkpoint`
        field: Field,

        /// Range (`min,max,step`) or comma separated list, `*` for all
        spec: String,

        /// Number of draws
        #[arg(long, default_value_t = 1)]
        count: usize,

        #[command(flatten)]
        source: InventoryArgs,
    },

    /// Run one batch against a job file and print the randomized job
    Batch {
        /// Randomize config (YAML or JSON)
        #[arg(short, long, env = "FORGE_RANDOMIZE_CONFIG")]
        config: PathBuf,

        /// Job to randomize (YAML or JSON); defaults to an empty txt2img job
        #[arg(long)]
        job: Option<PathBuf>,

        #[command(flatten)]
        source: InventoryArgs,
    },

    /// Assemble the inventory and print or save it
    Inventory {
        #[command(flatten)]
        source: InventoryArgs,

        /// Write the inventory here instead of printing it
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Where sampler, checkpoint, hypernetwork and style lists come from. All
/// given sources are merged.
#[derive(Args, Debug, Clone, Default)]
pub struct InventoryArgs {
    /// Inventory file (YAML or JSON)
    #[arg(long, env = "FORGE_RANDOMIZE_INVENTORY")]
    pub inventory: Option<PathBuf>,

    /// Forge base URL, e.g. http://127.0.0.1:7860
    #[arg(long, env = "FORGE_BASE_URL")]
    pub base_url: Option<String>,

    /// Bearer token for a Forge instance behind auth
    #[arg(long, env = "FORGE_API_KEY")]
    pub api_key: Option<String>,

    /// Forge `models` folder to scan for checkpoints and hypernetworks
    #[arg(long, env = "FORGE_MODELS_DIR")]
    pub models_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_resolve_command() {
        let cli = Cli::try_parse_from(["forge-randomize", "--seed", "7", "resolve", "cfg_scale", "5,15,0.5", "--count", "3"])
            .unwrap();
        assert_eq!(cli.seed, Some(7));
        match cli.command {
            Command::Resolve { field, spec, count, .. } => {
                assert_eq!(field, Field::CfgScale);
                assert_eq!(spec, "5,15,0.5");
                assert_eq!(count, 3);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_field() {
        assert!(Cli::try_parse_from(["forge-randomize", "resolve", "bogus", "1"]).is_err());
    }

    #[test]
    fn parses_batch_sources() {
        let cli = Cli::try_parse_from([
            "forge-randomize",
            "batch",
            "-c",
            "randomize.yaml",
            "--inventory",
            "inventory.yaml",
            "--models-dir",
            "/models",
        ])
        .unwrap();
        match cli.command {
            Command::Batch { config, job, source } => {
                assert_eq!(config, PathBuf::from("randomize.yaml"));
                assert!(job.is_none());
                assert_eq!(source.inventory, Some(PathBuf::from("inventory.yaml")));
                assert_eq!(source.models_dir, Some(PathBuf::from("/models")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}

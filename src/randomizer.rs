//! Batch lifecycle: draw every configured field and apply it to the job.
//!
//! Mirrors the hook order of a web UI script: [`Randomizer::process`] runs
//! once before prompts are finalized (checkpoint and styles),
//! [`Randomizer::process_batch`] runs before each batch (job attributes,
//! host options, highres fix), and [`Randomizer::postprocess`] puts host
//! options back.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::FieldError;
use crate::field::{Field, FieldGroup};
use crate::inventory::Inventory;
use crate::job::{apply_field, GenerationTarget};
use crate::resolver::{resolve, Resolution, ResolvedValue};
use crate::settings::{HostState, SettingsPatch, SettingsSnapshot};

/// Used when highres fix gets switched on without a denoising spec.
pub const DEFAULT_HIRES_DENOISING_STRENGTH: f64 = 0.7;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomizeConfig {
    pub enabled: bool,
    /// Job attributes, e.g. `cfg_scale: "5,15,0.5"`.
    pub params: BTreeMap<Field, String>,
    /// Host options, checkpoint and styles.
    pub other: BTreeMap<Field, String>,
    pub hires: HiresConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HiresConfig {
    /// Probability from 0 to 1 of turning highres fix on for a batch.
    pub chance: String,
    pub denoising_strength: String,
    pub width: String,
    pub height: String,
}

impl RandomizeConfig {
    /// Checks every field sits in the section that knows how to apply it.
    pub fn validate(&self) -> Result<(), FieldError> {
        let sections = [(&self.params, FieldGroup::Param), (&self.other, FieldGroup::Other)];
        for (entries, expected) in sections {
            if let Some(field) = entries.keys().find(|field| field.group() != expected) {
                return Err(FieldError::WrongGroup {
                    field: *field,
                    expected,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FieldStatus {
    Applied { value: ResolvedValue },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldOutcome {
    pub field: Field,
    #[serde(flatten)]
    pub status: FieldStatus,
}

impl FieldOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self.status, FieldStatus::Applied { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessReport {
    /// Checkpoint the host should load before generating.
    pub checkpoint: Option<String>,
    pub prompt_word: Option<String>,
    pub outcomes: Vec<FieldOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HiresOutcome {
    Enabled { denoising_strength: f64 },
    Disabled,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub outcomes: Vec<FieldOutcome>,
    pub patch: SettingsPatch,
    /// Hand back to [`Randomizer::postprocess`] once the batch is done.
    pub snapshot: SettingsSnapshot,
    pub hires: Option<HiresOutcome>,
}

pub struct Randomizer {
    config: RandomizeConfig,
}

impl Randomizer {
    pub fn new(config: RandomizeConfig) -> Result<Self, FieldError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Picks the checkpoint and styles, then rebuilds the job's prompts.
    pub fn process<T, R>(&self, target: &mut T, inventory: &dyn Inventory, rng: &mut R) -> ProcessReport
    where
        T: GenerationTarget + ?Sized,
        R: Rng,
    {
        let mut report = ProcessReport::default();
        if !self.config.enabled {
            return report;
        }

        if let Some(spec) = self.config.other.get(&Field::Styles) {
            if let Some(resolution) = draw_and_apply(target, Field::Styles, spec, inventory, rng, &mut report.outcomes) {
                log::info!("Randomized styles to {}", resolution.value);
                target.restyle_prompts(inventory);
            }
        }

        if let Some(spec) = self.config.other.get(&Field::SdModelCheckpoint) {
            if let Some(resolution) =
                draw_and_apply(target, Field::SdModelCheckpoint, spec, inventory, rng, &mut report.outcomes)
            {
                if let ResolvedValue::Text(title) = &resolution.value {
                    log::info!("Randomized checkpoint to {}", title);
                    report.checkpoint = Some(title.clone());
                }
                if let Some(word) = &resolution.prompt_word {
                    target.add_prompt_word(word);
                }
                report.prompt_word = resolution.prompt_word;
            }
        }

        report
    }

    /// Randomizes job attributes, host options and highres fix for one batch.
    pub fn process_batch<T, R>(
        &self,
        target: &mut T,
        host: &mut HostState,
        inventory: &dyn Inventory,
        rng: &mut R,
    ) -> BatchReport
    where
        T: GenerationTarget + ?Sized,
        R: Rng,
    {
        let mut report = BatchReport::default();
        if !self.config.enabled {
            return report;
        }

        for (field, spec) in &self.config.params {
            let field = match field {
                Field::SamplerName if !target.supports_sampler_name() => Field::SamplerIndex,
                other => *other,
            };
            draw_and_apply(target, field, spec, inventory, rng, &mut report.outcomes);
        }

        for (field, spec) in &self.config.other {
            if !field.is_host_setting() {
                continue;
            }
            match resolve(*field, spec, inventory, rng) {
                Ok(None) => {}
                Ok(Some(resolution)) => {
                    report.patch.insert(*field, &resolution.value);
                    report.outcomes.push(applied(*field, &resolution));
                }
                Err(error) => {
                    log::warn!("Skipping randomizing param `{}` -- {}", field, error);
                    report.outcomes.push(skipped(*field, error.to_string()));
                }
            }
        }
        report.snapshot = host.apply(&report.patch);

        report.hires = self.randomize_hires(target, host, inventory, rng, &mut report.outcomes);

        log::info!(
            "Randomized {} of {} fields for batch",
            report.outcomes.iter().filter(|outcome| outcome.is_applied()).count(),
            report.outcomes.len()
        );
        report
    }

    /// Restores host options changed by [`Randomizer::process_batch`].
    pub fn postprocess(&self, host: &mut HostState, snapshot: &SettingsSnapshot) {
        if !snapshot.is_empty() {
            host.restore(snapshot);
        }
    }

    fn randomize_hires<T, R>(
        &self,
        target: &mut T,
        host: &mut HostState,
        inventory: &dyn Inventory,
        rng: &mut R,
        outcomes: &mut Vec<FieldOutcome>,
    ) -> Option<HiresOutcome>
    where
        T: GenerationTarget + ?Sized,
        R: Rng,
    {
        let hires = &self.config.hires;
        let chance_spec = hires.chance.trim();
        if chance_spec.is_empty() {
            return None;
        }

        let chance = chance_spec.parse::<f64>().unwrap_or_else(|_| {
            log::warn!("Invalid highres. chance `{}`, treating it as 0", chance_spec);
            0.0
        });
        let was_enabled = target.hires_enabled();

        let outcome = if rng.gen::<f64>() < chance {
            target.set_hires_enabled(true);
            target.set_firstphase_size(0, 0);

            let denoising = draw_and_apply(
                target,
                Field::DenoisingStrength,
                &hires.denoising_strength,
                inventory,
                rng,
                outcomes,
            );
            // An applied draw always has a numeric reading.
            let denoising_strength = match denoising.and_then(|resolution| resolution.value.as_f64()) {
                Some(value) => value,
                None => {
                    target.set_denoising_strength(DEFAULT_HIRES_DENOISING_STRENGTH);
                    DEFAULT_HIRES_DENOISING_STRENGTH
                }
            };

            draw_and_apply(target, Field::HiresWidth, &hires.width, inventory, rng, outcomes);
            draw_and_apply(target, Field::HiresHeight, &hires.height, inventory, rng, outcomes);

            HiresOutcome::Enabled { denoising_strength }
        } else {
            target.set_hires_enabled(false);
            HiresOutcome::Disabled
        };

        target.reinitialize(host);
        if was_enabled {
            // Setup counted the highres pass again on top of the first init.
            host.job_count = host.job_count.div_euclid(2);
        }

        Some(outcome)
    }
}

/// Resolves and applies one field, logging and recording failures.
fn draw_and_apply<T, R>(
    target: &mut T,
    field: Field,
    spec: &str,
    inventory: &dyn Inventory,
    rng: &mut R,
    outcomes: &mut Vec<FieldOutcome>,
) -> Option<Resolution>
where
    T: GenerationTarget + ?Sized,
    R: Rng,
{
    let resolution = match resolve(field, spec, inventory, rng) {
        Ok(Some(resolution)) => resolution,
        Ok(None) => return None,
        Err(error) => {
            log::warn!("Skipping randomizing param `{}` -- {}", field, error);
            outcomes.push(skipped(field, error.to_string()));
            return None;
        }
    };

    match apply_field(target, field, &resolution) {
        Ok(()) => {
            outcomes.push(applied(field, &resolution));
            Some(resolution)
        }
        Err(error) => {
            log::warn!("Failed to randomize param `{}` -- {}", field, error);
            outcomes.push(skipped(field, error.to_string()));
            None
        }
    }
}

fn applied(field: Field, resolution: &Resolution) -> FieldOutcome {
    FieldOutcome {
        field,
        status: FieldStatus::Applied {
            value: resolution.value.clone(),
        },
    }
}

fn skipped(field: Field, reason: String) -> FieldOutcome {
    FieldOutcome {
        field,
        status: FieldStatus::Skipped { reason },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{PromptStyle, StaticInventory, NONE_STYLE};
    use crate::job::GenerationJob;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn inventory() -> StaticInventory {
        StaticInventory {
            samplers: vec!["Euler".into(), "Euler a".into(), "DPM++ 2M".into()],
            checkpoints: vec!["modelA.safetensors [1111aaaa]".into()],
            hypernetworks: vec!["anime".into()],
            styles: vec![
                PromptStyle {
                    name: NONE_STYLE.into(),
                    ..PromptStyle::default()
                },
                PromptStyle {
                    name: "vivid".into(),
                    prompt: "vivid colors".into(),
                    negative_prompt: "dull".into(),
                },
            ],
        }
    }

    fn job() -> GenerationJob {
        let mut job = GenerationJob {
            prompt: "a cat".into(),
            batch_size: 2,
            seed: 10,
            ..GenerationJob::default()
        };
        job.prepare(&inventory(), &mut StdRng::seed_from_u64(0));
        job
    }

    fn config(params: &[(Field, &str)], other: &[(Field, &str)]) -> RandomizeConfig {
        RandomizeConfig {
            enabled: true,
            params: params.iter().map(|(f, s)| (*f, s.to_string())).collect(),
            other: other.iter().map(|(f, s)| (*f, s.to_string())).collect(),
            hires: HiresConfig::default(),
        }
    }

    #[test]
    fn test_disabled_config_changes_nothing() {
        let mut cfg = config(&[(Field::Steps, "10,50,1")], &[(Field::Styles, "*")]);
        cfg.enabled = false;
        let randomizer = Randomizer::new(cfg).unwrap();
        let mut job = job();
        let before = job.clone();
        let mut host = HostState::default();
        let mut rng = StdRng::seed_from_u64(1);

        randomizer.process(&mut job, &inventory(), &mut rng);
        let report = randomizer.process_batch(&mut job, &mut host, &inventory(), &mut rng);
        assert_eq!(job, before);
        assert!(report.outcomes.is_empty());
    }

    #[test]
    fn test_wrong_section_is_rejected() {
        let cfg = config(&[(Field::ClipStopAtLastLayers, "1,2,1")], &[]);
        assert_eq!(
            Randomizer::new(cfg).err(),
            Some(FieldError::WrongGroup {
                field: Field::ClipStopAtLastLayers,
                expected: FieldGroup::Param,
            })
        );
    }

    #[test]
    fn test_batch_applies_params_and_skips_bad_fields() {
        let randomizer = Randomizer::new(config(
            &[
                (Field::CfgScale, "5,15,0.5"),
                (Field::Steps, "20,10,1"),
                (Field::SamplerName, "Euler a, Euler"),
                (Field::Seed, "1,100,1"),
                (Field::Width, ""),
            ],
            &[],
        ))
        .unwrap();
        let mut job = job();
        let mut host = HostState::default();
        let report = randomizer.process_batch(&mut job, &mut host, &inventory(), &mut StdRng::seed_from_u64(5));

        assert!((5.0..=15.0).contains(&job.cfg_scale));
        assert_eq!(job.steps, 20);
        assert!(matches!(job.sampler_name.as_deref(), Some("Euler a") | Some("Euler")));
        assert!(job.all_seeds == vec![1, 1] || job.all_seeds == vec![100, 100]);
        assert_eq!(job.width, 512);

        assert_eq!(report.outcomes.len(), 4);
        let steps = report
            .outcomes
            .iter()
            .find(|outcome| outcome.field == Field::Steps)
            .unwrap();
        assert!(!steps.is_applied());
    }

    #[test]
    fn test_legacy_host_gets_sampler_index() {
        let randomizer = Randomizer::new(config(&[(Field::SamplerName, "dpm++ 2m")], &[])).unwrap();
        let mut job = GenerationJob {
            legacy_sampler_index: true,
            ..job()
        };
        randomizer.process_batch(
            &mut job,
            &mut HostState::default(),
            &inventory(),
            &mut StdRng::seed_from_u64(1),
        );
        assert_eq!(job.sampler_index, Some(2));
        assert_eq!(job.sampler_name.as_deref(), Some("Euler a"));
    }

    #[test]
    fn test_host_options_are_patched_and_restored() {
        let randomizer = Randomizer::new(config(
            &[],
            &[
                (Field::ClipStopAtLastLayers, "1,2,1"),
                (Field::EtaNoiseSeedDelta, "31337"),
                (Field::SdHypernetwork, "none"),
            ],
        ))
        .unwrap();
        let mut job = job();
        let mut host = HostState::default();
        host.options.insert("CLIP_stop_at_last_layers".into(), json!(1));
        let original = host.clone();

        let report = randomizer.process_batch(&mut job, &mut host, &inventory(), &mut StdRng::seed_from_u64(3));
        assert_eq!(report.patch.len(), 3);
        let clip = host.option("CLIP_stop_at_last_layers").cloned().unwrap();
        assert!(clip == json!(1) || clip == json!(2));
        assert_eq!(host.option("eta_noise_seed_delta"), Some(&json!(31337)));
        assert_eq!(host.option("sd_hypernetwork"), Some(&json!("None")));

        randomizer.postprocess(&mut host, &report.snapshot);
        assert_eq!(host, original);
    }

    #[test]
    fn test_process_sets_styles_and_checkpoint_word() {
        let randomizer = Randomizer::new(config(
            &[],
            &[(Field::Styles, "*"), (Field::SdModelCheckpoint, "modelA:sks")],
        ))
        .unwrap();
        let mut job = job();
        let report = randomizer.process(&mut job, &inventory(), &mut StdRng::seed_from_u64(2));

        assert_eq!(job.styles, vec!["vivid"]);
        assert_eq!(job.all_prompts, vec!["sks, a cat, vivid colors"; 2]);
        assert_eq!(job.all_negative_prompts, vec!["dull"; 2]);
        assert_eq!(report.checkpoint.as_deref(), Some("modelA.safetensors [1111aaaa]"));
        assert_eq!(job.sd_model_checkpoint.as_deref(), Some("modelA.safetensors [1111aaaa]"));
        assert_eq!(report.prompt_word.as_deref(), Some("sks"));
    }

    #[test]
    fn test_unknown_checkpoint_is_skipped() {
        let randomizer = Randomizer::new(config(&[], &[(Field::SdModelCheckpoint, "missing")])).unwrap();
        let mut job = job();
        let report = randomizer.process(&mut job, &inventory(), &mut StdRng::seed_from_u64(2));
        assert!(report.checkpoint.is_none());
        assert!(job.sd_model_checkpoint.is_none());
        assert_eq!(report.outcomes.len(), 1);
        assert!(!report.outcomes[0].is_applied());
    }

    #[test]
    fn test_hires_always_on_uses_default_denoising() {
        let mut cfg = config(&[], &[]);
        cfg.hires = HiresConfig {
            chance: "1".into(),
            width: "1024,1024,64".into(),
            ..HiresConfig::default()
        };
        let randomizer = Randomizer::new(cfg).unwrap();
        let mut job = job();
        let mut host = HostState::default();
        let report = randomizer.process_batch(&mut job, &mut host, &inventory(), &mut StdRng::seed_from_u64(1));

        assert_eq!(
            report.hires,
            Some(HiresOutcome::Enabled {
                denoising_strength: DEFAULT_HIRES_DENOISING_STRENGTH
            })
        );
        assert!(job.enable_hr);
        assert_eq!(job.denoising_strength, Some(DEFAULT_HIRES_DENOISING_STRENGTH));
        assert_eq!(job.width, 1024);
        assert_eq!(host.job_count, 2);
    }

    #[test]
    fn test_hires_drawn_denoising() {
        let mut cfg = config(&[], &[]);
        cfg.hires = HiresConfig {
            chance: "1".into(),
            denoising_strength: "0.4,0.6,0.1".into(),
            ..HiresConfig::default()
        };
        let randomizer = Randomizer::new(cfg).unwrap();
        let mut job = job();
        let report = randomizer.process_batch(
            &mut job,
            &mut HostState::default(),
            &inventory(),
            &mut StdRng::seed_from_u64(9),
        );
        let Some(HiresOutcome::Enabled { denoising_strength }) = report.hires else {
            panic!("highres fix should be enabled");
        };
        assert!((0.4..=0.6).contains(&denoising_strength));
        assert_eq!(job.denoising_strength, Some(denoising_strength));
    }

    #[test]
    fn test_hires_listed_denoising_is_kept() {
        let mut cfg = config(&[], &[]);
        cfg.hires = HiresConfig {
            chance: "1".into(),
            denoising_strength: "0.3, 0.4".into(),
            ..HiresConfig::default()
        };
        let randomizer = Randomizer::new(cfg).unwrap();
        for seed in 0..50 {
            let mut job = job();
            let report = randomizer.process_batch(
                &mut job,
                &mut HostState::default(),
                &inventory(),
                &mut StdRng::seed_from_u64(seed),
            );
            let Some(HiresOutcome::Enabled { denoising_strength }) = report.hires else {
                panic!("highres fix should be enabled");
            };
            assert!(denoising_strength == 0.3 || denoising_strength == 0.4);
            assert_eq!(job.denoising_strength, Some(denoising_strength));
            assert!(report.outcomes.iter().all(FieldOutcome::is_applied));
        }
    }

    #[test]
    fn test_hires_unparsable_denoising_falls_back_to_default() {
        let mut cfg = config(&[], &[]);
        cfg.hires = HiresConfig {
            chance: "1".into(),
            denoising_strength: "strong".into(),
            ..HiresConfig::default()
        };
        let randomizer = Randomizer::new(cfg).unwrap();
        let mut job = job();
        let report = randomizer.process_batch(
            &mut job,
            &mut HostState::default(),
            &inventory(),
            &mut StdRng::seed_from_u64(3),
        );
        assert_eq!(
            report.hires,
            Some(HiresOutcome::Enabled {
                denoising_strength: DEFAULT_HIRES_DENOISING_STRENGTH
            })
        );
        assert_eq!(job.denoising_strength, Some(DEFAULT_HIRES_DENOISING_STRENGTH));
        assert!(!report.outcomes[0].is_applied());
    }

    #[test]
    fn test_hires_off_halves_job_count_when_previously_on() {
        let mut cfg = config(&[], &[]);
        cfg.hires.chance = "0".into();
        let randomizer = Randomizer::new(cfg).unwrap();
        let mut job = GenerationJob {
            enable_hr: true,
            ..job()
        };
        let mut host = HostState {
            job_count: 4,
            ..HostState::default()
        };
        let report = randomizer.process_batch(&mut job, &mut host, &inventory(), &mut StdRng::seed_from_u64(1));
        assert_eq!(report.hires, Some(HiresOutcome::Disabled));
        assert!(!job.enable_hr);
        assert_eq!(host.job_count, 2);
    }

    #[test]
    fn test_hires_stays_on_keeps_job_count() {
        let mut cfg = config(&[], &[]);
        cfg.hires.chance = "1".into();
        let randomizer = Randomizer::new(cfg).unwrap();
        let mut job = GenerationJob {
            enable_hr: true,
            ..job()
        };
        let mut host = HostState {
            job_count: 2,
            ..HostState::default()
        };
        randomizer.process_batch(&mut job, &mut host, &inventory(), &mut StdRng::seed_from_u64(1));
        assert_eq!(host.job_count, 2);
    }

    #[test]
    fn test_blank_hires_chance_leaves_hires_alone() {
        let randomizer = Randomizer::new(config(&[], &[])).unwrap();
        let mut job = job();
        let report = randomizer.process_batch(
            &mut job,
            &mut HostState::default(),
            &inventory(),
            &mut StdRng::seed_from_u64(1),
        );
        assert!(report.hires.is_none());
        assert!(!job.enable_hr);
    }
}

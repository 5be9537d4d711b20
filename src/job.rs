//! The generation job that drawn values are written into.

use serde::{Deserialize, Serialize};

use crate::error::ApplyError;
use crate::field::Field;
use crate::inventory::Inventory;
use crate::resolver::{Resolution, ResolvedValue};
use crate::settings::HostState;

const HIRES_FIRSTPHASE_PIXELS: f64 = 512.0 * 512.0;
const LATENT_ALIGNMENT: f64 = 64.0;

/// Typed view of a txt2img processing object.
///
/// Host integrations implement this for their own job type; [`GenerationJob`]
/// is the built-in record used by the CLI and tests.
pub trait GenerationTarget {
    /// Hosts from before samplers were addressed by name return `false` and
    /// get `sampler_index` instead.
    fn supports_sampler_name(&self) -> bool {
        true
    }
    fn set_sampler_name(&mut self, name: String);
    fn set_sampler_index(&mut self, index: usize);

    fn seed_count(&self) -> usize;
    fn set_all_seeds(&mut self, seeds: Vec<i64>);

    fn set_cfg_scale(&mut self, value: f64);
    fn set_steps(&mut self, value: u32);
    fn set_width(&mut self, value: u32);
    fn set_height(&mut self, value: u32);

    fn hires_enabled(&self) -> bool;
    fn set_hires_enabled(&mut self, enabled: bool);
    fn set_firstphase_size(&mut self, width: u32, height: u32);
    fn set_denoising_strength(&mut self, value: f64);

    fn set_checkpoint(&mut self, title: String);
    fn set_styles(&mut self, styles: Vec<String>);

    /// Re-expands the per-image prompt lists from the base prompts and the
    /// current styles.
    fn restyle_prompts(&mut self, inventory: &dyn Inventory);

    /// Adds a checkpoint trigger word in front of every prompt.
    fn add_prompt_word(&mut self, word: &str);

    /// Re-runs the host's job setup after highres settings changed.
    fn reinitialize(&mut self, host: &mut HostState);
}

/// Writes a resolved value to the matching job attribute.
///
/// `seed` is broadcast over every image of the batch. Host-wide settings are
/// not job attributes and are rejected with [`ApplyError::NotAJobField`].
pub fn apply_field<T>(target: &mut T, field: Field, resolution: &Resolution) -> Result<(), ApplyError>
where
    T: GenerationTarget + ?Sized,
{
    let value = &resolution.value;
    match field {
        Field::SamplerName => target.set_sampler_name(as_text(field, value)?),
        Field::SamplerIndex => target.set_sampler_index(as_index(field, value)?),
        Field::Seed => {
            let seed = as_i64(field, value)?;
            let count = target.seed_count();
            target.set_all_seeds(vec![seed; count]);
        }
        Field::CfgScale => target.set_cfg_scale(as_f64(field, value)?),
        Field::Steps => target.set_steps(as_u32(field, value)?),
        Field::Width | Field::HiresWidth => target.set_width(as_u32(field, value)?),
        Field::Height | Field::HiresHeight => target.set_height(as_u32(field, value)?),
        Field::DenoisingStrength => target.set_denoising_strength(as_f64(field, value)?),
        Field::SdModelCheckpoint => target.set_checkpoint(as_text(field, value)?),
        Field::Styles => match value {
            ResolvedValue::Styles(styles) => target.set_styles(styles.clone()),
            ResolvedValue::Text(style) => target.set_styles(vec![style.clone()]),
            other => return Err(mismatch(field, "style list", other)),
        },
        Field::ClipStopAtLastLayers
        | Field::EtaNoiseSeedDelta
        | Field::UseScaleLatentForHiresFix
        | Field::SdHypernetwork
        | Field::SdHypernetworkStrength => return Err(ApplyError::NotAJobField(field)),
    }
    Ok(())
}

fn mismatch(field: Field, expected: &'static str, value: &ResolvedValue) -> ApplyError {
    ApplyError::TypeMismatch {
        field,
        expected,
        value: format!("{value:?}"),
    }
}

fn as_text(field: Field, value: &ResolvedValue) -> Result<String, ApplyError> {
    match value {
        ResolvedValue::Text(text) => Ok(text.clone()),
        other => Err(mismatch(field, "text", other)),
    }
}

fn as_f64(field: Field, value: &ResolvedValue) -> Result<f64, ApplyError> {
    value.as_f64().ok_or_else(|| mismatch(field, "number", value))
}

fn as_i64(field: Field, value: &ResolvedValue) -> Result<i64, ApplyError> {
    match value {
        ResolvedValue::Int(v) => Ok(*v),
        ResolvedValue::Text(text) => text
            .trim()
            .parse::<i64>()
            .map_err(|_| mismatch(field, "integer", value)),
        other => Err(mismatch(field, "integer", other)),
    }
}

fn as_u32(field: Field, value: &ResolvedValue) -> Result<u32, ApplyError> {
    let whole = as_f64(field, value).map_err(|_| mismatch(field, "positive integer", value))?;
    if whole.fract() != 0.0 || whole < 0.0 || whole > u32::MAX as f64 {
        return Err(mismatch(field, "positive integer", value));
    }
    Ok(whole as u32)
}

fn as_index(field: Field, value: &ResolvedValue) -> Result<usize, ApplyError> {
    match value {
        ResolvedValue::Int(v) if *v >= 0 => Ok(*v as usize),
        other => Err(mismatch(field, "sampler index", other)),
    }
}

/// A txt2img job as the web UI sets it up before scripts run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationJob {
    pub prompt: String,
    pub negative_prompt: String,
    pub styles: Vec<String>,
    pub batch_size: u32,
    pub n_iter: u32,
    pub all_prompts: Vec<String>,
    pub all_negative_prompts: Vec<String>,
    pub seed: i64,
    pub all_seeds: Vec<i64>,
    pub sampler_name: Option<String>,
    pub sampler_index: Option<usize>,
    /// Set for hosts that only understand `sampler_index`.
    pub legacy_sampler_index: bool,
    pub cfg_scale: f64,
    pub steps: u32,
    pub width: u32,
    pub height: u32,
    pub enable_hr: bool,
    pub firstphase_width: u32,
    pub firstphase_height: u32,
    pub denoising_strength: Option<f64>,
    pub sd_model_checkpoint: Option<String>,
}

impl Default for GenerationJob {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            negative_prompt: String::new(),
            styles: Vec::new(),
            batch_size: 1,
            n_iter: 1,
            all_prompts: Vec::new(),
            all_negative_prompts: Vec::new(),
            seed: -1,
            all_seeds: Vec::new(),
            sampler_name: Some("Euler a".to_string()),
            sampler_index: None,
            legacy_sampler_index: false,
            cfg_scale: 7.0,
            steps: 20,
            width: 512,
            height: 512,
            enable_hr: false,
            firstphase_width: 0,
            firstphase_height: 0,
            denoising_strength: None,
            sd_model_checkpoint: None,
        }
    }
}

impl GenerationJob {
    pub fn image_count(&self) -> usize {
        self.batch_size.max(1).saturating_mul(self.n_iter.max(1)) as usize
    }

    /// Fills the per-image prompt and seed lists the way the host does
    /// before handing the job to scripts. A seed of `-1` is drawn from `rng`.
    pub fn prepare<R: rand::Rng>(&mut self, inventory: &dyn Inventory, rng: &mut R) {
        if self.seed == -1 {
            self.seed = rng.gen_range(0..=u32::MAX as i64);
        }
        let count = self.image_count();
        self.all_seeds = (0..count as i64).map(|offset| self.seed.wrapping_add(offset)).collect();
        self.restyle_prompts(inventory);
    }
}

impl GenerationTarget for GenerationJob {
    fn supports_sampler_name(&self) -> bool {
        !self.legacy_sampler_index
    }

    fn set_sampler_name(&mut self, name: String) {
        self.sampler_name = Some(name);
    }

    fn set_sampler_index(&mut self, index: usize) {
        self.sampler_index = Some(index);
    }

    fn seed_count(&self) -> usize {
        self.all_seeds.len()
    }

    fn set_all_seeds(&mut self, seeds: Vec<i64>) {
        if let Some(first) = seeds.first() {
            self.seed = *first;
        }
        self.all_seeds = seeds;
    }

    fn set_cfg_scale(&mut self, value: f64) {
        self.cfg_scale = value;
    }

    fn set_steps(&mut self, value: u32) {
        self.steps = value;
    }

    fn set_width(&mut self, value: u32) {
        self.width = value;
    }

    fn set_height(&mut self, value: u32) {
        self.height = value;
    }

    fn hires_enabled(&self) -> bool {
        self.enable_hr
    }

    fn set_hires_enabled(&mut self, enabled: bool) {
        self.enable_hr = enabled;
    }

    fn set_firstphase_size(&mut self, width: u32, height: u32) {
        self.firstphase_width = width;
        self.firstphase_height = height;
    }

    fn set_denoising_strength(&mut self, value: f64) {
        self.denoising_strength = Some(value);
    }

    fn set_checkpoint(&mut self, title: String) {
        self.sd_model_checkpoint = Some(title);
    }

    fn set_styles(&mut self, styles: Vec<String>) {
        self.styles = styles;
    }

    fn restyle_prompts(&mut self, inventory: &dyn Inventory) {
        let count = self.image_count();
        let prompt = inventory.apply_styles_to_prompt(&self.prompt, &self.styles);
        let negative = inventory.apply_negative_styles_to_prompt(&self.negative_prompt, &self.styles);
        self.all_prompts = vec![prompt; count];
        self.all_negative_prompts = vec![negative; count];
    }

    fn add_prompt_word(&mut self, word: &str) {
        for prompt in &mut self.all_prompts {
            *prompt = if prompt.trim().is_empty() {
                word.to_string()
            } else {
                format!("{word}, {prompt}")
            };
        }
    }

    fn reinitialize(&mut self, host: &mut HostState) {
        if !self.enable_hr {
            return;
        }

        host.job_count = if host.job_count == -1 {
            i64::from(self.n_iter) * 2
        } else {
            host.job_count * 2
        };

        if (self.firstphase_width == 0 || self.firstphase_height == 0)
            && self.width > 0
            && self.height > 0
        {
            let width = f64::from(self.width);
            let height = f64::from(self.height);
            let scale = (HIRES_FIRSTPHASE_PIXELS / (width * height)).sqrt();
            self.firstphase_width = ((scale * width / LATENT_ALIGNMENT).ceil() * LATENT_ALIGNMENT) as u32;
            self.firstphase_height = ((scale * height / LATENT_ALIGNMENT).ceil() * LATENT_ALIGNMENT) as u32;
        }
    }
}

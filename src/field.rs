//! The closed set of generation parameters that can be randomized.
//!
//! Field names on the wire (config files, CLI) match the attribute and
//! option names the Forge/A1111 processing object uses, so a config written
//! for the original web UI extension keeps working.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::FieldError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum Field {
    SamplerName,
    SamplerIndex,
    Seed,
    CfgScale,
    Steps,
    Width,
    Height,
    DenoisingStrength,
    HiresWidth,
    HiresHeight,
    ClipStopAtLastLayers,
    EtaNoiseSeedDelta,
    UseScaleLatentForHiresFix,
    SdHypernetwork,
    SdHypernetworkStrength,
    SdModelCheckpoint,
    Styles,
}

/// Which part of the batch lifecycle a field is randomized in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldGroup {
    /// Plain attributes of the generation job.
    Param,
    /// Host settings, checkpoint and styles.
    Other,
    /// Highres fix second pass.
    Hires,
}

impl fmt::Display for FieldGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Param => "params",
            Self::Other => "other",
            Self::Hires => "hires",
        })
    }
}

impl Field {
    pub const ALL: [Field; 17] = [
        Field::SamplerName,
        Field::SamplerIndex,
        Field::Seed,
        Field::CfgScale,
        Field::Steps,
        Field::Width,
        Field::Height,
        Field::DenoisingStrength,
        Field::HiresWidth,
        Field::HiresHeight,
        Field::ClipStopAtLastLayers,
        Field::EtaNoiseSeedDelta,
        Field::UseScaleLatentForHiresFix,
        Field::SdHypernetwork,
        Field::SdHypernetworkStrength,
        Field::SdModelCheckpoint,
        Field::Styles,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::SamplerName => "sampler_name",
            Self::SamplerIndex => "sampler_index",
            Self::Seed => "seed",
            Self::CfgScale => "cfg_scale",
            Self::Steps => "steps",
            Self::Width => "width",
            Self::Height => "height",
            Self::DenoisingStrength => "denoising_strength",
            Self::HiresWidth => "hires_width",
            Self::HiresHeight => "hires_height",
            Self::ClipStopAtLastLayers => "CLIP_stop_at_last_layers",
            Self::EtaNoiseSeedDelta => "eta_noise_seed_delta",
            Self::UseScaleLatentForHiresFix => "use_scale_latent_for_hires_fix",
            Self::SdHypernetwork => "sd_hypernetwork",
            Self::SdHypernetworkStrength => "sd_hypernetwork_strength",
            Self::SdModelCheckpoint => "sd_model_checkpoint",
            Self::Styles => "styles",
        }
    }

    pub fn group(self) -> FieldGroup {
        match self {
            Self::SamplerName
            | Self::SamplerIndex
            | Self::Seed
            | Self::CfgScale
            | Self::Steps
            | Self::Width
            | Self::Height => FieldGroup::Param,
            Self::DenoisingStrength | Self::HiresWidth | Self::HiresHeight => FieldGroup::Hires,
            Self::ClipStopAtLastLayers
            | Self::EtaNoiseSeedDelta
            | Self::UseScaleLatentForHiresFix
            | Self::SdHypernetwork
            | Self::SdHypernetworkStrength
            | Self::SdModelCheckpoint
            | Self::Styles => FieldGroup::Other,
        }
    }

    /// Identity-like fields whose values are never read as `start,stop,step`.
    pub fn accepts_range(self) -> bool {
        !matches!(self, Self::Seed)
    }

    /// Fields that live in the host's process-wide options rather than on
    /// the job and therefore need restoring after the batch.
    pub fn is_host_setting(self) -> bool {
        matches!(
            self,
            Self::ClipStopAtLastLayers
                | Self::EtaNoiseSeedDelta
                | Self::UseScaleLatentForHiresFix
                | Self::SdHypernetwork
                | Self::SdHypernetworkStrength
        )
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Field {
    type Err = FieldError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        Field::ALL
            .iter()
            .copied()
            .find(|field| field.name() == trimmed)
            .or_else(|| {
                // Older configs wrote the CLIP option in lower case.
                Field::ALL
                    .iter()
                    .copied()
                    .find(|field| field.name().eq_ignore_ascii_case(trimmed))
            })
            .ok_or_else(|| FieldError::Unknown(trimmed.to_string()))
    }
}

impl TryFrom<String> for Field {
    type Error = FieldError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Field> for &'static str {
    fn from(field: Field) -> Self {
        field.name()
    }
}

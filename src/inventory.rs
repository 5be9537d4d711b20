//! Read-only catalogues the resolver draws `*` choices from and matches
//! names against.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use walkdir::WalkDir;

/// Reserved style entry the web UI always lists first.
pub const NONE_STYLE: &str = "None";
const PROMPT_PLACEHOLDER: &str = "{prompt}";
const CHECKPOINT_EXTENSIONS: &[&str] = &["safetensors", "ckpt", "gguf"];
const HYPERNETWORK_EXTENSIONS: &[&str] = &["pt"];

/// A saved prompt style as listed by `/sdapi/v1/prompt-styles`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptStyle {
    pub name: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
}

/// Everything the resolver may look up about the host.
pub trait Inventory {
    fn samplers(&self) -> &[String];

    /// Checkpoint titles, e.g. `sdxl_base.safetensors [31e35c80fc]`.
    fn checkpoints(&self) -> &[String];

    fn hypernetworks(&self) -> &[String];

    fn styles(&self) -> &[PromptStyle];

    /// Style names eligible for a `*` draw.
    fn selectable_styles(&self) -> Vec<&str> {
        self.styles()
            .iter()
            .map(|style| style.name.as_str())
            .filter(|name| *name != NONE_STYLE)
            .collect()
    }

    /// Exact title first, then the bare model name, then the shortest title
    /// containing `search`.
    fn closest_checkpoint_match(&self, search: &str) -> Option<String> {
        let search = search.trim();
        if search.is_empty() {
            return None;
        }
        let titles = self.checkpoints();

        if let Some(title) = titles.iter().find(|title| title.as_str() == search) {
            return Some(title.clone());
        }
        if let Some(title) = titles
            .iter()
            .find(|title| checkpoint_model_name(title) == strip_known_model_extension(search))
        {
            return Some(title.clone());
        }

        titles
            .iter()
            .filter(|title| title.contains(search))
            .min_by_key(|title| title.len())
            .cloned()
    }

    /// Shortest hypernetwork name containing `search`, ignoring case.
    fn closest_hypernetwork_match(&self, search: &str) -> Option<String> {
        let search = search.trim().to_lowercase();
        if search.is_empty() {
            return None;
        }
        self.hypernetworks()
            .iter()
            .filter(|name| name.to_lowercase().contains(&search))
            .min_by_key(|name| name.len())
            .cloned()
    }

    fn apply_styles_to_prompt(&self, prompt: &str, styles: &[String]) -> String {
        styles.iter().fold(prompt.to_string(), |acc, name| {
            match self.styles().iter().find(|style| &style.name == name) {
                Some(style) => merge_prompts(&style.prompt, &acc),
                None => acc,
            }
        })
    }

    fn apply_negative_styles_to_prompt(&self, prompt: &str, styles: &[String]) -> String {
        styles.iter().fold(prompt.to_string(), |acc, name| {
            match self.styles().iter().find(|style| &style.name == name) {
                Some(style) => merge_prompts(&style.negative_prompt, &acc),
                None => acc,
            }
        })
    }
}

/// Substitutes `prompt` into `style_prompt` at `{prompt}`, or appends the
/// style after the prompt.
pub fn merge_prompts(style_prompt: &str, prompt: &str) -> String {
    if style_prompt.contains(PROMPT_PLACEHOLDER) {
        return style_prompt.replace(PROMPT_PLACEHOLDER, prompt);
    }

    [prompt.trim(), style_prompt.trim()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// In-memory inventory, loadable from YAML/JSON or assembled from the Forge
/// API and local model folders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticInventory {
    #[serde(default)]
    pub samplers: Vec<String>,
    #[serde(default)]
    pub checkpoints: Vec<String>,
    #[serde(default)]
    pub hypernetworks: Vec<String>,
    #[serde(default)]
    pub styles: Vec<PromptStyle>,
}

impl Inventory for StaticInventory {
    fn samplers(&self) -> &[String] {
        &self.samplers
    }

    fn checkpoints(&self) -> &[String] {
        &self.checkpoints
    }

    fn hypernetworks(&self) -> &[String] {
        &self.hypernetworks
    }

    fn styles(&self) -> &[PromptStyle] {
        &self.styles
    }
}

impl StaticInventory {
    /// Folds `other` into `self`, keeping first occurrences.
    pub fn merge(&mut self, other: StaticInventory) {
        self.samplers = merge_unique_strings(std::mem::take(&mut self.samplers), other.samplers);
        self.checkpoints =
            merge_unique_strings(std::mem::take(&mut self.checkpoints), other.checkpoints);
        self.hypernetworks =
            merge_unique_strings(std::mem::take(&mut self.hypernetworks), other.hypernetworks);

        let mut seen: BTreeSet<String> = self.styles.iter().map(|s| s.name.clone()).collect();
        for style in other.styles {
            if seen.insert(style.name.clone()) {
                self.styles.push(style);
            }
        }
    }

    /// Builds checkpoint and hypernetwork lists from a Forge `models` folder
    /// (`Stable-diffusion/` and `hypernetworks/` beneath it, or a flat dir).
    pub fn scan_models_dir(models_dir: &Path) -> Result<Self, String> {
        let checkpoints_dir = models_dir.join("Stable-diffusion");
        let hypernetworks_dir = models_dir.join("hypernetworks");

        let checkpoints = if checkpoints_dir.is_dir() {
            scan_checkpoints_dir(&checkpoints_dir)?
        } else {
            scan_checkpoints_dir(models_dir)?
        };
        let hypernetworks = scan_hypernetworks_dir(&hypernetworks_dir)?;

        log::info!(
            "Scanned {} checkpoints and {} hypernetworks under {}",
            checkpoints.len(),
            hypernetworks.len(),
            models_dir.display()
        );

        Ok(Self {
            checkpoints,
            hypernetworks,
            ..Self::default()
        })
    }
}

/// Lists checkpoint files below `dir`, skipping folders that hold LoRA, VAE and other
/// auxiliary weights.
pub fn scan_checkpoints_dir(dir: &Path) -> Result<Vec<String>, String> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    if !dir.is_dir() {
        return Err(format!("Models path is not a directory: {}", dir.display()));
    }

    let blocked_segments = [
        "lora",
        "loras",
        "lycoris",
        "embeddings",
        "vae",
        "controlnet",
        "hypernetwork",
        "hypernetworks",
        "upscaler",
        "upscalers",
        "esrgan",
    ];

    let mut models = BTreeSet::new();
    for entry in WalkDir::new(dir).follow_links(false).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() || !has_extension(entry.path(), CHECKPOINT_EXTENSIONS) {
            continue;
        }

        let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        let normalized = relative.to_string_lossy().replace('\\', "/");
        let lowered = normalized.to_ascii_lowercase();
        if lowered
            .split('/')
            .rev()
            .skip(1)
            .any(|segment| blocked_segments.contains(&segment))
        {
            continue;
        }

        models.insert(normalized);
    }

    Ok(models.into_iter().collect())
}

/// Lists hypernetwork names (file stems) in `dir`.
pub fn scan_hypernetworks_dir(dir: &Path) -> Result<Vec<String>, String> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    if !dir.is_dir() {
        return Err(format!(
            "Hypernetworks path is not a directory: {}",
            dir.display()
        ));
    }

    let mut names = BTreeSet::new();
    for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() || !has_extension(entry.path(), HYPERNETWORK_EXTENSIONS) {
            continue;
        }
        if let Some(stem) = entry.path().file_stem().and_then(|value| value.to_str()) {
            names.insert(stem.to_string());
        }
    }

    Ok(names.into_iter().collect())
}

fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    path.extension()
        .and_then(|value| value.to_str())
        .map(|value| allowed.iter().any(|ext| value.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// `dir/model.safetensors [abc123]` -> `dir/model`.
fn checkpoint_model_name(title: &str) -> &str {
    let without_hash = match title.rfind(" [") {
        Some(pos) if title.ends_with(']') => &title[..pos],
        _ => title,
    };
    strip_known_model_extension(without_hash)
}

fn strip_known_model_extension(value: &str) -> &str {
    let lower = value.to_ascii_lowercase();
    for ext in CHECKPOINT_EXTENSIONS {
        let suffix = format!(".{ext}");
        if lower.ends_with(&suffix) {
            return &value[..value.len() - suffix.len()];
        }
    }
    value
}

fn merge_unique_strings(primary: Vec<String>, secondary: Vec<String>) -> Vec<String> {
    let mut merged = Vec::with_capacity(primary.len() + secondary.len());
    let mut seen = BTreeSet::new();

    for value in primary.into_iter().chain(secondary) {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_string()) {
            merged.push(trimmed.to_string());
        }
    }

    merged
}

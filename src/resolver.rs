//! Draws one concrete value for a field from its spec string.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::fmt;

use crate::error::ResolveError;
use crate::field::Field;
use crate::inventory::Inventory;
use crate::parser::{parse_spec, round_to, ListSpec, ParsedSpec, RangeSpec};

/// Separates a checkpoint name from the prompt word that goes with it, as in
/// `modelA:sks person`.
pub const PROMPT_WORD_DELIMITER: char = ':';
const HYPERNETWORK_DISABLE: &str = "none";
// Largest magnitude an f64 holds without losing integer precision.
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResolvedValue {
    Int(i64),
    Float(f64),
    Text(String),
    /// Always a single style; callers stack several style fields themselves.
    Styles(Vec<String>),
    /// Explicitly switch the setting off (hypernetwork `none`).
    Disabled,
}

impl fmt::Display for ResolvedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
            Self::Styles(values) => f.write_str(&values.join(", ")),
            Self::Disabled => f.write_str("None"),
        }
    }
}

impl ResolvedValue {
    /// Numeric reading of the value. Listed tokens are text, so they parse.
    pub fn as_f64(&self) -> Option<f64> {
        let parsed = match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(text) => text.trim().parse::<f64>().ok(),
            _ => None,
        };
        parsed.filter(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub value: ResolvedValue,
    /// Word to add to the prompt alongside a chosen checkpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_word: Option<String>,
}

impl Resolution {
    pub fn new(value: ResolvedValue) -> Self {
        Self {
            value,
            prompt_word: None,
        }
    }
}

/// Resolves fields against one inventory.
pub struct ParameterResolver<'a, I: Inventory + ?Sized> {
    inventory: &'a I,
}

impl<'a, I: Inventory + ?Sized> ParameterResolver<'a, I> {
    pub fn new(inventory: &'a I) -> Self {
        Self { inventory }
    }

    pub fn resolve<R: Rng>(
        &self,
        field: Field,
        spec: &str,
        rng: &mut R,
    ) -> Result<Option<Resolution>, ResolveError> {
        resolve(field, spec, self.inventory, rng)
    }
}

/// Draws a value for `field`.
///
/// `Ok(None)` means the spec was blank and the field is left alone. Errors
/// classify why a non-blank spec produced nothing; none of them are fatal.
pub fn resolve<I, R>(
    field: Field,
    spec: &str,
    inventory: &I,
    rng: &mut R,
) -> Result<Option<Resolution>, ResolveError>
where
    I: Inventory + ?Sized,
    R: Rng,
{
    let resolution = match parse_spec(spec, field.accepts_range()) {
        ParsedSpec::Empty => return Ok(None),
        ParsedSpec::Invalid(reason) => return Err(ResolveError::MalformedRange { field, reason }),
        ParsedSpec::Range(range) => Resolution::new(draw_range(&range, rng)),
        ParsedSpec::List(list) => resolve_list(field, &list, inventory, rng)?,
    };

    log::debug!("Resolved `{}` from `{}` to {}", field, spec.trim(), resolution.value);
    Ok(Some(resolution))
}

/// Uniform draw over `start + n * step`, integer when whole, otherwise
/// rounded to the step's declared decimals.
pub fn draw_range<R: Rng>(range: &RangeSpec, rng: &mut R) -> ResolvedValue {
    let index = rng.gen_range(0..=range.max_index());
    let value = range.value_at(index);

    if value.fract() == 0.0 && value.abs() <= MAX_EXACT_INT {
        ResolvedValue::Int(value as i64)
    } else {
        ResolvedValue::Float(round_to(value, range.decimals))
    }
}

fn resolve_list<I, R>(
    field: Field,
    list: &ListSpec<'_>,
    inventory: &I,
    rng: &mut R,
) -> Result<Resolution, ResolveError>
where
    I: Inventory + ?Sized,
    R: Rng,
{
    let value = match field {
        Field::SamplerName => {
            let known = inventory.samplers();
            let sampler = match list {
                ListSpec::All => choose_known(field, known, rng)?,
                ListSpec::Tokens(tokens) => {
                    let token = choose_token(field, tokens, rng)?;
                    known
                        .iter()
                        .find(|name| name.as_str() == token)
                        .ok_or_else(|| unknown(field, token))?
                }
            };
            ResolvedValue::Text(sampler.clone())
        }
        Field::SamplerIndex => {
            let known = inventory.samplers();
            if known.is_empty() {
                return Err(ResolveError::EmptyInventory { field });
            }
            let index = match list {
                ListSpec::All => rng.gen_range(0..known.len()),
                ListSpec::Tokens(tokens) => {
                    let token = choose_token(field, tokens, rng)?;
                    known
                        .iter()
                        .position(|name| name.eq_ignore_ascii_case(token))
                        .ok_or_else(|| unknown(field, token))?
                }
            };
            ResolvedValue::Int(index as i64)
        }
        Field::Seed => ResolvedValue::Int(parse_int_token(field, list, rng)?),
        Field::UseScaleLatentForHiresFix => match list {
            ListSpec::All => ResolvedValue::Int(rng.gen_range(0..=1)),
            ListSpec::Tokens(_) => ResolvedValue::Int(parse_int_token(field, list, rng)?),
        },
        Field::SdModelCheckpoint => return resolve_checkpoint(field, list, inventory, rng),
        Field::SdHypernetwork => match list {
            ListSpec::All => ResolvedValue::Text(choose_known(field, inventory.hypernetworks(), rng)?.clone()),
            ListSpec::Tokens(tokens) => {
                let token = choose_token(field, tokens, rng)?;
                if token.eq_ignore_ascii_case(HYPERNETWORK_DISABLE) {
                    ResolvedValue::Disabled
                } else {
                    ResolvedValue::Text(
                        inventory
                            .closest_hypernetwork_match(token)
                            .ok_or_else(|| unknown(field, token))?,
                    )
                }
            }
        },
        Field::Styles => {
            let style = match list {
                ListSpec::All => *inventory
                    .selectable_styles()
                    .choose(rng)
                    .ok_or(ResolveError::EmptyInventory { field })?,
                ListSpec::Tokens(tokens) => choose_token(field, tokens, rng)?,
            };
            ResolvedValue::Styles(vec![style.to_string()])
        }
        _ => match list {
            // Nothing to expand `*` into for plain fields.
            ListSpec::All => return Err(ResolveError::EmptyInventory { field }),
            ListSpec::Tokens(tokens) => ResolvedValue::Text(choose_token(field, tokens, rng)?.to_string()),
        },
    };

    Ok(Resolution::new(value))
}

fn resolve_checkpoint<I, R>(
    field: Field,
    list: &ListSpec<'_>,
    inventory: &I,
    rng: &mut R,
) -> Result<Resolution, ResolveError>
where
    I: Inventory + ?Sized,
    R: Rng,
{
    let tokens = match list {
        ListSpec::All => {
            let title = choose_known(field, inventory.checkpoints(), rng)?;
            return Ok(Resolution::new(ResolvedValue::Text(title.clone())));
        }
        ListSpec::Tokens(tokens) => tokens,
    };

    let token = choose_token(field, tokens, rng)?;
    let (name, prompt_word) = match token.split_once(PROMPT_WORD_DELIMITER) {
        Some((name, word)) => {
            let word = word.trim();
            (name.trim(), (!word.is_empty()).then(|| word.to_string()))
        }
        None => (token, None),
    };

    let title = inventory
        .closest_checkpoint_match(name)
        .ok_or_else(|| unknown(field, name))?;

    Ok(Resolution {
        value: ResolvedValue::Text(title),
        prompt_word,
    })
}

fn parse_int_token<R: Rng>(field: Field, list: &ListSpec<'_>, rng: &mut R) -> Result<i64, ResolveError> {
    let token = match list {
        ListSpec::All => crate::parser::WILDCARD,
        ListSpec::Tokens(tokens) => choose_token(field, tokens, rng)?,
    };
    token.parse::<i64>().map_err(|_| ResolveError::TypeMismatch {
        field,
        token: token.to_string(),
    })
}

/// Picks one non-blank listed token.
fn choose_token<'t, R: Rng>(field: Field, tokens: &[&'t str], rng: &mut R) -> Result<&'t str, ResolveError> {
    let candidates: Vec<&'t str> = tokens.iter().copied().filter(|token| !token.is_empty()).collect();
    candidates
        .choose(rng)
        .copied()
        .ok_or_else(|| unknown(field, ""))
}

fn choose_known<'k, R: Rng>(field: Field, known: &'k [String], rng: &mut R) -> Result<&'k String, ResolveError> {
    known.choose(rng).ok_or(ResolveError::EmptyInventory { field })
}

fn unknown(field: Field, token: &str) -> ResolveError {
    ResolveError::UnknownToken {
        field,
        token: token.to_string(),
    }
}

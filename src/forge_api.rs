use reqwest::{
    blocking::Client,
    header::{HeaderMap, HeaderValue, AUTHORIZATION},
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::time::Duration;

use crate::inventory::{PromptStyle, StaticInventory};
use crate::settings::HostState;

const SDAPI_PREFIX: &str = "/sdapi/v1";
const REQUEST_TIMEOUT_SECONDS: u64 = 60;
const NON_ROOT_SUFFIXES: [&str; 3] = ["/docs", SDAPI_PREFIX, "/sdapi"];

/// Builds an inventory from a running Forge/A1111 instance started with
/// `--api`.
///
/// Each list is fetched separately; an endpoint that fails (older builds
/// have no `hypernetworks` route, for instance) is logged and left empty.
pub fn fetch_inventory(
    base_url: &str,
    api_key: Option<&str>,
) -> Result<StaticInventory, Box<dyn Error + Send + Sync>> {
    let client = build_client(api_key)?;

    let samplers = fetch_list(&client, base_url, "samplers")
        .map(|entries| collect_named_options(&entries, &["name", "label"]));
    let checkpoints = fetch_list(&client, base_url, "sd-models")
        .map(|entries| collect_named_options(&entries, &["title", "model_name"]));
    let hypernetworks = fetch_list(&client, base_url, "hypernetworks")
        .map(|entries| collect_named_options(&entries, &["name"]));
    let styles = fetch_list(&client, base_url, "prompt-styles").map(|entries| collect_styles(&entries));

    let inventory = StaticInventory {
        samplers: or_warn(samplers, "samplers"),
        checkpoints: or_warn(checkpoints, "sd-models"),
        hypernetworks: or_warn(hypernetworks, "hypernetworks"),
        styles: or_warn(styles, "prompt-styles"),
    };

    log::info!(
        "Fetched Forge inventory from {}: {} samplers, {} checkpoints, {} hypernetworks, {} styles",
        normalize_base_url(base_url),
        inventory.samplers.len(),
        inventory.checkpoints.len(),
        inventory.hypernetworks.len(),
        inventory.styles.len()
    );

    Ok(inventory)
}

/// Reads the host's current options so a dry run can show what a batch
/// would overwrite and restore.
pub fn fetch_host_state(
    base_url: &str,
    api_key: Option<&str>,
) -> Result<HostState, Box<dyn Error + Send + Sync>> {
    let client = build_client(api_key)?;
    let endpoint = build_sdapi_endpoint(base_url, "options");
    let response = client.get(&endpoint).send()?;

    if !response.status().is_success() {
        return Err(std::io::Error::other(format!(
            "Request failed for {} with status {}",
            endpoint,
            response.status()
        ))
        .into());
    }

    let options: BTreeMap<String, Value> = response.json()?;
    Ok(HostState {
        options,
        ..HostState::default()
    })
}

fn or_warn<T: Default>(result: Result<T, Box<dyn Error + Send + Sync>>, endpoint: &str) -> T {
    result.unwrap_or_else(|error| {
        log::warn!("Forge `{}` list unavailable: {}", endpoint, error);
        T::default()
    })
}

fn fetch_list(
    client: &Client,
    base_url: &str,
    endpoint_name: &str,
) -> Result<Vec<Value>, Box<dyn Error + Send + Sync>> {
    let endpoint = build_sdapi_endpoint(base_url, endpoint_name);
    let response = client.get(&endpoint).send()?;

    if !response.status().is_success() {
        return Err(std::io::Error::other(format!(
            "Request failed for {} with status {}",
            endpoint,
            response.status()
        ))
        .into());
    }

    Ok(response.json()?)
}

fn collect_named_options(entries: &[Value], keys: &[&str]) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    let mut options = Vec::new();

    for entry in entries {
        let name = keys
            .iter()
            .find_map(|key| entry.get(*key).and_then(|value| value.as_str()));

        let Some(name) = name else {
            continue;
        };
        let trimmed = name.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_string()) {
            options.push(trimmed.to_string());
        }
    }

    options
}

fn collect_styles(entries: &[Value]) -> Vec<PromptStyle> {
    let text = |entry: &Value, key: &str| {
        entry
            .get(key)
            .and_then(|value| value.as_str())
            .unwrap_or_default()
            .to_string()
    };

    entries
        .iter()
        .filter_map(|entry| {
            let name = text(entry, "name");
            if name.trim().is_empty() {
                return None;
            }
            Some(PromptStyle {
                name,
                prompt: text(entry, "prompt"),
                negative_prompt: text(entry, "negative_prompt"),
            })
        })
        .collect()
}

fn build_sdapi_endpoint(base_url: &str, endpoint: &str) -> String {
    format!(
        "{}{SDAPI_PREFIX}/{}",
        normalize_base_url(base_url),
        endpoint.trim_start_matches('/')
    )
}

/// Reduces whatever the user pasted (the docs page, the API root) to the
/// server root.
fn normalize_base_url(base_url: &str) -> String {
    let mut root = base_url.trim().trim_end_matches('/');
    while let Some(stripped) = NON_ROOT_SUFFIXES
        .iter()
        .find_map(|suffix| root.strip_suffix(suffix))
    {
        root = stripped.trim_end_matches('/');
    }
    root.to_string()
}

/// Client for one inventory refresh. A blank key sends no auth header.
fn build_client(api_key: Option<&str>) -> Result<Client, Box<dyn Error + Send + Sync>> {
    let mut headers = HeaderMap::new();
    if let Some(token) = api_key.map(str::trim).filter(|token| !token.is_empty()) {
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}"))?);
    }

    Ok(Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
        .default_headers(headers)
        .build()?)
}

//! Environment resolution for connector registration
//!
//! Three sources can feed the env list handed to `connector init`, and the
//! first non-empty one wins as a whole list: the unit's workspace override,
//! a per-connector secret bundle from the host environment, and the plain
//! `envs` list from the test config. `$VAR` references in the winning list
//! are then expanded against the host environment.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use hubtest_common::{Error, Result, TestConfig};

/// Uppercase `$VAR` references eligible for expansion
static VAR_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$([A-Z_][A-Z0-9_]*)").expect("valid pattern"));

/// Ordered NAME=VALUE pairs ready for `--add-env`; duplicates are kept and
/// the consumer applies later entries last
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedEnvironment {
    pub entries: Vec<String>,
}

impl ResolvedEnvironment {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Name of the secret-bundle variable for a connector
pub fn secret_bundle_var(connector_name: &str) -> String {
    format!(
        "{}_CONFIG_OPTIONS_ENV",
        connector_name.to_uppercase().replace('-', "_")
    )
}

/// Resolve the env list for one connector against the host environment
pub fn resolve(config: &TestConfig, connector_name: &str) -> Result<ResolvedEnvironment> {
    resolve_with(config, connector_name, |name| std::env::var(name).ok())
}

/// Same as [`resolve`], with an injectable host-env lookup
pub fn resolve_with<F>(
    config: &TestConfig,
    connector_name: &str,
    lookup: F,
) -> Result<ResolvedEnvironment>
where
    F: Fn(&str) -> Option<String>,
{
    let bundle = lookup(&secret_bundle_var(connector_name)).filter(|v| !v.trim().is_empty());

    let (source, raw) = if let Some(envs) = config.workspace_env_override() {
        ("workspace override", envs.to_vec())
    } else if let Some(bundle) = bundle {
        ("secret bundle", parse_secret_bundle(&bundle, connector_name)?)
    } else {
        ("test config", config.envs.clone())
    };

    debug!(
        "Using {} environment for {} ({} entries)",
        source,
        connector_name,
        raw.len()
    );

    let entries = raw.iter().map(|entry| expand(entry, &lookup)).collect();
    Ok(ResolvedEnvironment { entries })
}

fn parse_secret_bundle(raw: &str, connector_name: &str) -> Result<Vec<String>> {
    serde_json::from_str(raw).map_err(|e| {
        Error::Validation(format!(
            "secret bundle {} is not a JSON string array: {}",
            secret_bundle_var(connector_name),
            e
        ))
    })
}

/// Expand `$VAR` references; unset names stay literal with a warning
fn expand<F>(entry: &str, lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    VAR_REF
        .replace_all(entry, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match lookup(name) {
                Some(value) => value,
                None => {
                    warn!("Environment variable {} is not set, keeping literal reference", name);
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

//! Requirements file (`prd.json`) parsing.
//!
//! The loop itself only needs the optional root `branchName` and a structural
//! sanity check; item contents are for the agent to read.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Map, Value};
use tracing::debug;

/// Completion flag names accepted on requirement items.
const FLAG_KEYS: [&str; 2] = ["passes", "passing"];

/// Summary of a parsed requirements file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirements {
    /// Root-level `branchName` as written, unless empty or whitespace-only.
    pub branch_name: Option<String>,
    /// Key of the first array whose items all carry a completion flag.
    pub items_key: Option<String>,
    pub total_items: usize,
    pub passing_items: usize,
}

impl Requirements {
    pub fn is_complete(&self) -> bool {
        self.items_key.is_some() && self.passing_items == self.total_items
    }
}

/// Read and parse a requirements file. Unreadable or malformed JSON is an error.
pub fn load_requirements(path: &Path) -> Result<Requirements> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    let requirements = parse_requirements(&value).with_context(|| format!("{}", path.display()))?;
    debug!(
        path = %path.display(),
        branch = ?requirements.branch_name,
        total = requirements.total_items,
        passing = requirements.passing_items,
        "loaded requirements"
    );
    Ok(requirements)
}

fn parse_requirements(value: &Value) -> Result<Requirements> {
    let root = value
        .as_object()
        .ok_or_else(|| anyhow!("requirements file must be a JSON object"))?;

    let branch_name = match root.get("branchName") {
        None | Some(Value::Null) => None,
        Some(Value::String(name)) if name.trim().is_empty() => None,
        Some(Value::String(name)) => Some(name.clone()),
        Some(other) => bail!("branchName must be a string, got {other}"),
    };

    let mut requirements = Requirements {
        branch_name,
        items_key: None,
        total_items: 0,
        passing_items: 0,
    };
    // Deterministic choice when several arrays qualify: first in key order.
    let mut keys: Vec<&String> = root.keys().collect();
    keys.sort();
    for key in keys {
        if let Some(Value::Array(items)) = root.get(key)
            && let Some(passing) = count_flagged(items)
        {
            requirements.items_key = Some(key.clone());
            requirements.total_items = items.len();
            requirements.passing_items = passing;
            break;
        }
    }
    Ok(requirements)
}

/// Count passing items, or `None` unless every item is an object with a boolean flag.
fn count_flagged(items: &[Value]) -> Option<usize> {
    if items.is_empty() {
        return None;
    }
    let mut passing = 0;
    for item in items {
        let flag = item.as_object().and_then(completion_flag)?;
        if flag {
            passing += 1;
        }
    }
    Some(passing)
}

fn completion_flag(item: &Map<String, Value>) -> Option<bool> {
    FLAG_KEYS
        .iter()
        .find_map(|key| item.get(*key).and_then(Value::as_bool))
}

/// Require at least one array of items carrying `passes`/`passing` booleans.
pub fn ensure_has_items(requirements: &Requirements, path: &Path) -> Result<()> {
    if requirements.items_key.is_none() {
        bail!(
            "{}: expected an array of items each with a boolean `passes` or `passing` field",
            path.display()
        );
    }
    Ok(())
}

// ── Firewall policy documents ──
//
// A policy is an ordered list of rule specifications, read once and
// never mutated during enforcement.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;

use fwenforcer_api::StorageClient;
use fwenforcer_api::storage::is_gcs_path;

use super::rule::FirewallRule;
use crate::error::PolicyError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FirewallPolicy {
    pub rules: Vec<FirewallRule>,
}

impl FirewallPolicy {
    pub fn new(rules: Vec<FirewallRule>) -> Self {
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FirewallRule> {
        self.rules.iter()
    }
}

impl<'a> IntoIterator for &'a FirewallPolicy {
    type Item = &'a FirewallRule;
    type IntoIter = std::slice::Iter<'a, FirewallRule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

fn is_yaml(location: &str) -> bool {
    let lower = location.to_ascii_lowercase();
    lower.ends_with(".yaml") || lower.ends_with(".yml")
}

/// Parse policy text. `.yaml` / `.yml` locations are read as YAML,
/// anything else as JSON. The document must be a list of rules.
pub fn parse_policy(text: &str, location: &str) -> Result<FirewallPolicy, PolicyError> {
    let parse_err = |e: &dyn std::fmt::Display| PolicyError::Parse {
        path: location.to_owned(),
        message: e.to_string(),
    };

    if is_yaml(location) {
        let doc: YamlValue = serde_yaml::from_str(text).map_err(|e| parse_err(&e))?;
        let found = match &doc {
            YamlValue::Sequence(_) => None,
            YamlValue::Mapping(_) | YamlValue::Tagged(_) => Some("object"),
            YamlValue::String(_) => Some("string"),
            YamlValue::Number(_) => Some("number"),
            YamlValue::Bool(_) => Some("bool"),
            YamlValue::Null => Some("null"),
        };
        if let Some(found) = found {
            return Err(PolicyError::InvalidParsedPolicyFile { found });
        }
        serde_yaml::from_value(doc).map_err(|e| parse_err(&e))
    } else {
        let doc: JsonValue = serde_json::from_str(text).map_err(|e| parse_err(&e))?;
        let found = match &doc {
            JsonValue::Array(_) => None,
            JsonValue::Object(_) => Some("object"),
            JsonValue::String(_) => Some("string"),
            JsonValue::Number(_) => Some("number"),
            JsonValue::Bool(_) => Some("bool"),
            JsonValue::Null => Some("null"),
        };
        if let Some(found) = found {
            return Err(PolicyError::InvalidParsedPolicyFile { found });
        }
        serde_json::from_value(doc).map_err(|e| parse_err(&e))
    }
}

/// Read a policy from a local path or a `gs://bucket/object` location.
pub async fn load_policy(
    location: &str,
    storage: Option<&StorageClient>,
) -> Result<FirewallPolicy, PolicyError> {
    let text = if is_gcs_path(location) {
        let storage = storage.ok_or_else(|| PolicyError::NoStorageClient {
            path: location.to_owned(),
        })?;
        storage
            .download_text(location)
            .await
            .map_err(|source| PolicyError::Download {
                path: location.to_owned(),
                source,
            })?
    } else {
        tokio::fs::read_to_string(location)
            .await
            .map_err(|source| PolicyError::Io {
                path: location.to_owned(),
                source,
            })?
    };

    parse_policy(&text, location)
}

//! # Merge
//!
//! Selects which fetched keys end up in the Secret and under which names.

use crate::provider::ExternalSecretData;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Apply an optional key mapping (target key -> source key) to fetched data
///
/// With no mapping, or an empty one, the fetched data is copied verbatim.
/// Otherwise only mapped keys are copied; a source key missing from the fetched
/// data is skipped, never defaulted.
#[must_use]
pub fn merge_payload(
    data: &ExternalSecretData,
    key_mapping: Option<&BTreeMap<String, String>>,
) -> BTreeMap<String, String> {
    let Some(mapping) = key_mapping.filter(|m| !m.is_empty()) else {
        return data.clone();
    };

    let mut merged = BTreeMap::new();
    for (target, source) in mapping {
        if let Some(value) = data.get(source) {
            debug!(source_key = source.as_str(), target_key = target.as_str(), "Mapped secret key");
            merged.insert(target.clone(), value.clone());
        } else {
            info!(
                source_key = source.as_str(),
                target_key = target.as_str(),
                "Source key not found in fetched secret, skipping"
            );
        }
    }
    merged
}

//! Identity and metadata policy for generated children.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ObjectReference;
use rand::Rng;

const SUFFIX_LENGTH: usize = 8;
const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Generates `<prefix>-<random suffix>` for a freshly created child. Suffixes
/// are 8 chars over [a-z0-9] (~41 bits); once a name is assigned it is
/// preserved across reconciles, so generation only ever happens once per
/// child slot.
pub fn generate_name(prefix: &str) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..SUFFIX_LENGTH)
        .map(|_| SUFFIX_ALPHABET[rng.random_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect();
    format!("{prefix}-{suffix}")
}

/// Merges two label/annotation maps. The second argument wins on key
/// collision; callers place the overriding side second.
pub fn merge_maps(
    base: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = base.clone();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// `Kind.group` of a reference, written bare as `Kind` for the core group.
pub fn group_kind(reference: &ObjectReference) -> String {
    let kind = reference.kind.clone().unwrap_or_default();
    let group = reference
        .api_version
        .as_deref()
        .and_then(|api_version| api_version.split_once('/'))
        .map(|(group, _version)| group)
        .unwrap_or_default();
    if group.is_empty() {
        kind
    } else {
        format!("{kind}.{group}")
    }
}

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::frame::canonical_labels;

static LEGEND_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*(.+?)\s*\}\}").unwrap());

/// Expand a legend template against a label set. `{{label}}` placeholders
/// become the label's value; labels missing from the set expand to the empty
/// string. A blank template falls back to the canonical label-set string.
pub fn format_legend(template: &str, labels: &BTreeMap<String, String>) -> String {
    if template.trim().is_empty() {
        return canonical_labels(labels);
    }

    LEGEND_FORMAT
        .replace_all(template, |caps: &regex::Captures| {
            labels
                .get(caps[1].trim())
                .map(String::as_str)
                .unwrap_or("")
                .to_string()
        })
        .into_owned()
}

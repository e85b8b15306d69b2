//! Qualification form extraction.
//!
//! Pulls the five lead-qualification fields out of free text in two passes:
//! a line-anchored `Label: value` pass, then per-field keyword fallbacks for
//! whatever is still empty. Merging and completeness checks live here too.

use std::sync::LazyLock;

use regex::Regex;

use crate::lead::FormFields;

/// Result of validating a parsed fragment against the stored one.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    /// Whether all five fields are non-empty after the merge.
    pub valid: bool,
    /// The merged fields (new values win over stored ones).
    pub merged: FormFields,
    /// Names of fields still empty, in canonical order.
    pub missing: Vec<&'static str>,
}

fn label_pattern(labels: &str) -> Regex {
    // A line of the form `LABEL...: value`; the label must open the line.
    Regex::new(&format!(r"(?im)^[ \t]*(?:{labels})[^:\n]*:[ \t]*(\S.*)$"))
        .expect("label pattern must compile")
}

static BIODATA_LINE: LazyLock<Regex> = LazyLock::new(|| label_pattern("nama|biodata|domisili"));
static SOURCE_LINE: LazyLock<Regex> = LazyLock::new(|| label_pattern("sumber|source|dari|info"));
static BUSINESS_LINE: LazyLock<Regex> =
    LazyLock::new(|| label_pattern("jenis bisnis|tipe bisnis|bisnis"));
static BUDGET_LINE: LazyLock<Regex> =
    LazyLock::new(|| label_pattern("budget|anggaran|modal|dana"));
static START_LINE: LazyLock<Regex> =
    LazyLock::new(|| label_pattern("kapan|mulai|start|timeline|rencana"));

static BUDGET_MILLIONS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:rp\.?\s*)?\d+(?:[.,]\d+)?\s*(?:juta|jt|million|m)\b")
        .expect("budget pattern must compile")
});
static BUDGET_BILLIONS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:rp\.?\s*)?\d+(?:[.,]\d+)?\s*(?:milyar|miliar|billion|b)\b")
        .expect("budget pattern must compile")
});
static BUDGET_PLAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)rp\.?\s*\d+(?:[.,]\d+)*").expect("budget pattern must compile")
});

const SOURCE_KEYWORDS: [&str; 11] = [
    "instagram", "facebook", "google", "tiktok", "youtube", "referral", "teman", "iklan", "ads",
    "website", "event",
];

const BUSINESS_KEYWORDS: [&str; 11] = [
    "fnb", "f&b", "retail", "service", "jasa", "makanan", "minuman", "food", "beverage",
    "fashion", "kuliner",
];

const START_KEYWORDS: [&str; 13] = [
    "bulan", "month", "minggu", "week", "tahun", "year", "segera", "asap", "immediately", "q1",
    "q2", "q3", "q4",
];

/// Words that signal form content, across all five fields. Used by the
/// submission heuristic and the intent classifier.
const FORM_KEYWORDS: [&str; 16] = [
    "nama", "biodata", "domisili", "sumber", "source", "jenis bisnis", "tipe bisnis", "bisnis",
    "budget", "anggaran", "modal", "dana", "mulai", "timeline", "rencana", "kapan",
];

/// Count distinct form keywords present in (lowercased) text.
pub(crate) fn form_keyword_count(lower: &str) -> usize {
    FORM_KEYWORDS.iter().filter(|kw| lower.contains(*kw)).count()
}

fn first_label_value(re: &Regex, text: &str) -> Option<String> {
    re.captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .find(|v| !v.is_empty())
}

/// The sentence (split on `.!?` and newlines) containing the first hit of
/// any keyword, trimmed.
fn sentence_with_keyword(text: &str, keywords: &[&str]) -> Option<String> {
    for sentence in text.split(['.', '!', '?', '\n']) {
        let lower = sentence.to_lowercase();
        if keywords.iter().any(|kw| lower.contains(kw)) {
            let trimmed = sentence.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

fn extract_budget(text: &str) -> Option<String> {
    for re in [&*BUDGET_MILLIONS, &*BUDGET_BILLIONS, &*BUDGET_PLAIN] {
        if let Some(m) = re.find(text) {
            return Some(m.as_str().trim().to_string());
        }
    }
    None
}

/// Parse free text into a partial form fragment.
///
/// Pass 1 matches labeled lines; pass 2 falls back to keyword heuristics
/// for fields pass 1 left empty. Fields with no evidence stay `None`.
pub fn parse(text: &str) -> FormFields {
    let mut fields = FormFields {
        biodata: first_label_value(&BIODATA_LINE, text),
        source_info: first_label_value(&SOURCE_LINE, text),
        business_type: first_label_value(&BUSINESS_LINE, text),
        budget: first_label_value(&BUDGET_LINE, text),
        start_plan: first_label_value(&START_LINE, text),
    };

    if fields.source_info.is_none() {
        fields.source_info = sentence_with_keyword(text, &SOURCE_KEYWORDS);
    }
    if fields.business_type.is_none() {
        fields.business_type = sentence_with_keyword(text, &BUSINESS_KEYWORDS);
    }
    if fields.budget.is_none() {
        fields.budget = extract_budget(text);
    }
    if fields.start_plan.is_none() {
        fields.start_plan = sentence_with_keyword(text, &START_KEYWORDS);
    }

    fields
}

/// Merge a parsed fragment over the stored one and check completeness.
pub fn validate(partial: &FormFields, existing: Option<&FormFields>) -> ValidationResult {
    let merged = match existing {
        Some(existing) => partial.merged_into(existing),
        None => partial.clone(),
    };
    let missing = merged.missing();
    ValidationResult {
        valid: missing.is_empty(),
        merged,
        missing,
    }
}

/// Whether free text looks like a form submission: at least two form
/// keywords, or any labeled line.
pub fn is_form_submission(text: &str) -> bool {
    let lower = text.to_lowercase();
    if form_keyword_count(&lower) >= 2 {
        return true;
    }
    [
        &*BIODATA_LINE,
        &*SOURCE_LINE,
        &*BUSINESS_LINE,
        &*BUDGET_LINE,
        &*START_LINE,
    ]
    .iter()
    .any(|re| re.is_match(text))
}

/// Human-facing label for a field name, matching the blank form template.
fn field_label(field: &str) -> &'static str {
    match field {
        "biodata" => "Nama, Domisili",
        "source_info" => "Sumber info",
        "business_type" => "Jenis bisnis",
        "budget" => "Budget",
        "start_plan" => "Rencana mulai",
        _ => "",
    }
}

/// User-visible checklist of fields still to fill. Empty input yields an
/// empty string.
pub fn explain_missing(missing: &[&str]) -> String {
    if missing.is_empty() {
        return String::new();
    }
    let mut out = String::from("Hampir selesai! Mohon lengkapi data berikut ya:\n");
    for field in missing {
        out.push_str("- ");
        out.push_str(field_label(field));
        out.push('\n');
    }
    out.push_str("\nBalas dengan format `Label: jawaban`.");
    out
}

/// Render captured fields back into labeled lines. Empty fields are
/// skipped; `parse` recovers the rendered fields unchanged.
pub fn render(fields: &FormFields) -> String {
    let mut lines = Vec::new();
    if let Some(v) = fields.biodata.as_deref() {
        lines.push(format!("Nama, Domisili: {v}"));
    }
    if let Some(v) = fields.source_info.as_deref() {
        lines.push(format!("Sumber info: {v}"));
    }
    if let Some(v) = fields.business_type.as_deref() {
        lines.push(format!("Jenis bisnis: {v}"));
    }
    if let Some(v) = fields.budget.as_deref() {
        lines.push(format!("Budget: {v}"));
    }
    if let Some(v) = fields.start_plan.as_deref() {
        lines.push(format!("Rencana mulai: {v}"));
    }
    lines.join("\n")
}

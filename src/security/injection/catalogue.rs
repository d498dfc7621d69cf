//! Declarative pattern catalogue for the injection detector.
//!
//! Each entry is `{id, category, weight, matcher}`. The detector evaluates
//! entries uniformly in catalogue order; adding a pattern never touches
//! control flow.

use regex::Regex;
use serde::Serialize;
use std::fmt;

/// Families of suspicious content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternCategory {
    /// "ignore previous instructions", "disregard all commands".
    InstructionOverride,
    /// Requests to dump the system prompt or credentials.
    PromptExfiltration,
    /// "you are now…", "act as…".
    IdentityHijack,
    /// Literal "system:" / "assistant:" prefixes and chat-template tokens.
    DelimiterSpoof,
    /// Tags, `javascript:` URLs, eval-like calls.
    ScriptInjection,
    /// Shell metacharacter chains.
    CommandInjection,
    SqlInjection,
    /// Percent, unicode-escape and HTML-entity encodings.
    EncodedPayload,
    /// The same short unit repeated many times in a row.
    Repetition,
}

impl fmt::Display for PatternCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InstructionOverride => "instruction_override",
            Self::PromptExfiltration => "prompt_exfiltration",
            Self::IdentityHijack => "identity_hijack",
            Self::DelimiterSpoof => "delimiter_spoof",
            Self::ScriptInjection => "script_injection",
            Self::CommandInjection => "command_injection",
            Self::SqlInjection => "sql_injection",
            Self::EncodedPayload => "encoded_payload",
            Self::Repetition => "repetition",
        };
        write!(f, "{s}")
    }
}

/// How an entry finds occurrences in a text.
#[derive(Debug, Clone)]
pub enum Matcher {
    Regex(Regex),
    /// A unit of `1..=max_unit` characters repeated back to back at least
    /// `min_repeats` times. Only primitive units count, so "aaaa" is reported
    /// once as "a" and not again as "aa".
    Repetition { max_unit: usize, min_repeats: usize },
}

impl Matcher {
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Matcher::Regex)
    }

    /// Matched substrings, in order of appearance, at most `limit` of them.
    pub fn find_all(&self, text: &str, limit: usize) -> Vec<String> {
        match self {
            Matcher::Regex(re) => re
                .find_iter(text)
                .take(limit)
                .map(|m| m.as_str().to_string())
                .collect(),
            Matcher::Repetition {
                max_unit,
                min_repeats,
            } => find_repetitions(text, *max_unit, *min_repeats, limit),
        }
    }
}

/// One catalogue entry.
#[derive(Debug, Clone)]
pub struct PatternEntry {
    pub id: String,
    pub category: PatternCategory,
    pub weight: u32,
    pub matcher: Matcher,
}

impl PatternEntry {
    pub fn new(
        id: impl Into<String>,
        category: PatternCategory,
        weight: u32,
        matcher: Matcher,
    ) -> Self {
        Self {
            id: id.into(),
            category,
            weight,
            matcher,
        }
    }
}

pub const OVERRIDE_WEIGHT: u32 = 10;
pub const IDENTITY_WEIGHT: u32 = 8;
pub const DELIMITER_WEIGHT: u32 = 5;
pub const SCRIPT_WEIGHT: u32 = 5;
pub const ENCODING_WEIGHT: u32 = 3;
pub const REPETITION_WEIGHT: u32 = 4;

/// Consecutive repeats of one unit before the repetition entry fires.
pub const REPETITION_THRESHOLD: usize = 16;

const BUILTIN_PATTERNS: &[(&str, PatternCategory, u32, &str)] = &[
    (
        "override.ignore_instructions",
        PatternCategory::InstructionOverride,
        OVERRIDE_WEIGHT,
        r"(?i)\b(?:ignore|disregard|forget|bypass|override)\s+(?:(?:all|any|the|your|of)\s+)*(?:(?:previous|prior|above|earlier|preceding|original|system)\s+|all\s+|any\s+|your\s+)(?:instructions?|commands?|directions?|rules|prompts?|guidelines)\b",
    ),
    (
        "override.new_instructions",
        PatternCategory::InstructionOverride,
        OVERRIDE_WEIGHT,
        r"(?i)\b(?:new|updated|real|actual)\s+(?:system\s+)?instructions?\s*:",
    ),
    (
        "exfiltration.system_prompt",
        PatternCategory::PromptExfiltration,
        OVERRIDE_WEIGHT,
        r"(?i)\b(?:reveal|show|print|display|repeat|output|leak|dump|tell\s+me)\s+(?:me\s+)?(?:your|the)\s+(?:system\s+|initial\s+|hidden\s+|original\s+|internal\s+)?(?:prompt|instructions|configuration|rules)\b",
    ),
    (
        "exfiltration.credentials",
        PatternCategory::PromptExfiltration,
        OVERRIDE_WEIGHT,
        r"(?i)\b(?:reveal|show|print|give|send|list)\b[^.\n]{0,30}\b(?:api[\s_-]?keys?|access[\s_-]?tokens?|secret[\s_-]?keys?|passwords?|credentials|environment\s+variables)\b",
    ),
    (
        "identity.you_are_now",
        PatternCategory::IdentityHijack,
        IDENTITY_WEIGHT,
        r"(?i)\byou\s+are\s+(?:now|no\s+longer)\b",
    ),
    (
        "identity.act_as",
        PatternCategory::IdentityHijack,
        IDENTITY_WEIGHT,
        r"(?i)\b(?:act\s+as|pretend\s+(?:to\s+be|you\s+are)|roleplay\s+as)\b",
    ),
    (
        "identity.jailbreak",
        PatternCategory::IdentityHijack,
        IDENTITY_WEIGHT,
        r"(?i)\b(?:jailbreak|jailbroken|dan\s+mode|developer\s+mode|do\s+anything\s+now)\b",
    ),
    (
        "delimiter.role_prefix",
        PatternCategory::DelimiterSpoof,
        DELIMITER_WEIGHT,
        r"(?im)^\s*(?:system|assistant|developer)\s*:",
    ),
    (
        "delimiter.chat_template",
        PatternCategory::DelimiterSpoof,
        DELIMITER_WEIGHT,
        r"(?i)<\|(?:im_start|im_end|system|endoftext)\|>|\[/?(?:inst|sys)\]|<<\s*/?sys\s*>>|###\s*(?:system|instruction)",
    ),
    (
        "script.tag",
        PatternCategory::ScriptInjection,
        SCRIPT_WEIGHT,
        r"(?i)<\s*/?\s*(?:script|iframe|object|embed|svg|img|style|link|meta|form)\b[^>]*>",
    ),
    (
        "script.url_scheme",
        PatternCategory::ScriptInjection,
        SCRIPT_WEIGHT,
        r"(?i)\b(?:javascript|vbscript)\s*:|\bdata\s*:\s*text/html",
    ),
    (
        "script.event_handler",
        PatternCategory::ScriptInjection,
        SCRIPT_WEIGHT,
        r"(?i)\bon(?:load|error|click|mouseover|focus|submit)\s*=",
    ),
    (
        "script.eval_call",
        PatternCategory::ScriptInjection,
        SCRIPT_WEIGHT,
        r"\b(?:eval|exec|Function|setTimeout|setInterval|__import__|popen)\s*\(",
    ),
    (
        "command.shell_chain",
        PatternCategory::CommandInjection,
        SCRIPT_WEIGHT,
        r"(?:;|&&|\|\|?)\s*(?:rm|curl|wget|bash|sh|nc|chmod|powershell|python)\b|\$\([^)]*\)",
    ),
    (
        "command.path_traversal",
        PatternCategory::CommandInjection,
        SCRIPT_WEIGHT,
        r"(?:\.\./){2,}|(?:\.\.\\){2,}",
    ),
    (
        "sql.union_select",
        PatternCategory::SqlInjection,
        SCRIPT_WEIGHT,
        r"(?i)\bunion\s+(?:all\s+)?select\b",
    ),
    (
        "sql.tautology",
        PatternCategory::SqlInjection,
        SCRIPT_WEIGHT,
        r"(?i)'\s*(?:or|and)\s+'?\d+'?\s*=\s*'?\d+",
    ),
    (
        "sql.destructive",
        PatternCategory::SqlInjection,
        SCRIPT_WEIGHT,
        r"(?i);\s*(?:drop|truncate|alter)\s+(?:table|database)\b|;\s*delete\s+from\b",
    ),
    (
        "encoded.percent",
        PatternCategory::EncodedPayload,
        ENCODING_WEIGHT,
        r"(?i)%(?:3c|3e|22|27|60|3b|7c)|%25[0-9a-f]{2}",
    ),
    (
        "encoded.unicode_escape",
        PatternCategory::EncodedPayload,
        ENCODING_WEIGHT,
        r"(?i)\\u00[0-9a-f]{2}|\\x[0-9a-f]{2}",
    ),
    (
        "encoded.html_entity",
        PatternCategory::EncodedPayload,
        ENCODING_WEIGHT,
        r"(?i)&(?:lt|gt|quot|apos);|&#x?[0-9a-f]{2,6};",
    ),
];

/// The built-in catalogue, in evaluation order.
pub fn default_catalogue() -> Vec<PatternEntry> {
    let mut entries: Vec<PatternEntry> = BUILTIN_PATTERNS
        .iter()
        .filter_map(|(id, category, weight, pattern)| match Matcher::regex(pattern) {
            Ok(matcher) => Some(PatternEntry::new(*id, *category, *weight, matcher)),
            Err(e) => {
                tracing::error!(pattern_id = %id, error = %e, "Skipping pattern that failed to compile");
                None
            }
        })
        .collect();

    entries.push(PatternEntry::new(
        "repetition.degenerate",
        PatternCategory::Repetition,
        REPETITION_WEIGHT,
        Matcher::Repetition {
            max_unit: 4,
            min_repeats: REPETITION_THRESHOLD,
        },
    ));
    entries
}

fn find_repetitions(text: &str, max_unit: usize, min_repeats: usize, limit: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    let mut found = Vec::new();
    if min_repeats < 2 {
        return found;
    }

    for unit in 1..=max_unit {
        let mut i = 0;
        while i + unit * min_repeats <= n {
            let pattern = &chars[i..i + unit];
            if pattern.iter().all(|c| c.is_whitespace()) || !is_primitive(pattern) {
                i += 1;
                continue;
            }

            let mut repeats = 1;
            while i + (repeats + 1) * unit <= n
                && chars[i + repeats * unit..i + (repeats + 1) * unit] == *pattern
            {
                repeats += 1;
            }

            if repeats >= min_repeats {
                let unit_text: String = pattern.iter().collect();
                found.push(format!("{unit_text}×{repeats}"));
                if found.len() >= limit {
                    return found;
                }
                i += repeats * unit;
            } else {
                i += 1;
            }
        }
    }
    found
}

/// A unit is primitive when it is not itself a repetition of a shorter unit.
fn is_primitive(unit: &[char]) -> bool {
    let len = unit.len();
    (1..len)
        .filter(|d| len % d == 0)
        .all(|d| unit.chunks(d).any(|chunk| chunk != &unit[..d]))
}

//! Mutation classifier.
//!
//! Pure, total, side-effect free. Decides whether a candidate command would
//! mutate state before the approval gate is consulted. Deliberately
//! conservative: a false positive costs one extra confirmation prompt, a
//! false negative runs a destructive command unattended.

use quarry_common::PlanLanguage;

/// SQL tokens that signal write intent.
const SQL_WRITE_KEYWORDS: &[&str] = &[
    "create", "insert", "update", "delete", "drop", "alter", "truncate", "replace", "merge",
    "copy",
];

/// Python call patterns that signal side effects: process spawning,
/// outbound network traffic, filesystem deletes and renames.
const PYTHON_SIDE_EFFECT_PATTERNS: &[&str] = &[
    "subprocess",
    "os.system",
    "os.popen",
    "os.exec",
    "os.spawn",
    "requests.",
    "urllib",
    "http.client",
    "socket.",
    "os.remove",
    "os.unlink",
    "os.rename",
    "os.replace",
    "os.rmdir",
    "shutil.rmtree",
    "shutil.move",
    ".unlink(",
];

/// Would this command mutate state if executed?
pub fn is_mutating(command: &str, language: PlanLanguage) -> bool {
    match language {
        PlanLanguage::Sql => sql_is_mutating(command),
        PlanLanguage::Python => python_is_mutating(command),
    }
}

/// Keyword-based SQL classification: flag when any write-intent keyword
/// appears as a standalone token, which also covers commands starting with
/// one.
fn sql_is_mutating(sql: &str) -> bool {
    sql.to_lowercase()
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|token| !token.is_empty())
        .any(|token| SQL_WRITE_KEYWORDS.contains(&token))
}

/// Pattern-based Python classification: side-effecting calls plus file
/// handles opened for write or append.
fn python_is_mutating(script: &str) -> bool {
    let lower = script.to_lowercase();
    if PYTHON_SIDE_EFFECT_PATTERNS
        .iter()
        .any(|pattern| lower.contains(pattern))
    {
        return true;
    }
    has_write_mode_open(&lower)
}

/// Scan each `open(` call site for a write/append/create mode flag. The
/// window is bounded so a mode string later in the script does not flag an
/// unrelated read-only open.
fn has_write_mode_open(lower: &str) -> bool {
    const WRITE_MODES: &[&str] = &["'w", "\"w", "'a", "\"a", "'x", "\"x"];
    let mut rest = lower;
    while let Some(pos) = rest.find("open(") {
        let call = &rest[pos..];
        let mut window_end = call.find(')').map(|i| i + 1).unwrap_or(call.len()).min(120);
        while !call.is_char_boundary(window_end) {
            window_end -= 1;
        }
        let window = &call[..window_end];
        if WRITE_MODES.iter().any(|mode| window.contains(mode)) {
            return true;
        }
        rest = &rest[pos + "open(".len()..];
    }
    false
}

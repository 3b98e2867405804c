use std::sync::LazyLock;

use regex::Regex;

/// Lowercase substrings that mark an error as worth retrying.
const TRANSIENT_KEYWORDS: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "broken pipe",
    "resource busy",
    "text file busy",
    "not found",
    "no such file",
    "permission denied",
    "failed to lookup",
    "dns",
    "fetch failed",
    "temporarily unavailable",
];

/// errno-style codes as they appear in OS and runtime error text.
static TRANSIENT_CODES: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"\b(ECONNRESET|ECONNREFUSED|ETIMEDOUT|EPIPE|EBUSY|ENOENT|EACCES|EPERM|ENOTFOUND|EAI_AGAIN)\b").ok()
});

/// Whether a tool error message looks like a race or hiccup that a retry may clear.
pub fn is_transient(message: &str) -> bool {
    let lower = message.to_lowercase();
    if TRANSIENT_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return true;
    }
    TRANSIENT_CODES
        .as_ref()
        .is_some_and(|re| re.is_match(message))
}

/// Heuristic remediation hints derived from the error text.
pub fn remediation_hints(tool: &str, message: &str) -> Vec<String> {
    let lower = message.to_lowercase();
    let mut hints = Vec::new();

    if lower.contains("not found") || lower.contains("no such file") || message.contains("ENOENT") {
        hints.push("Check that the path is correct and relative to the project root.".to_string());
    }
    if lower.contains("no staged") {
        hints.push("Write the staged source and test files before running this tool.".to_string());
    }
    if lower.contains("permission denied")
        || lower.contains("access denied")
        || message.contains("EACCES")
        || message.contains("EPERM")
    {
        hints.push("Only files under the project root or this session's artifact area can be accessed.".to_string());
    }
    if lower.contains("timeout") || lower.contains("timed out") || lower.contains("connection") {
        hints.push("Retry later or simplify the operation so it completes faster.".to_string());
    }
    if lower.contains("invalid arguments") || lower.contains("json") || lower.contains("is required") {
        hints.push(format!("Check the arguments against the {tool} parameter schema."));
    }
    if lower.contains("invalid artifact name") {
        hints.push("Artifact names may only contain letters, digits, '_' and '-' (max 64).".to_string());
    }
    if tool == "run_tests" && lower.contains("fail") {
        hints.push("Read the test output, fix the staged source, and run the tests again.".to_string());
    }

    hints
}

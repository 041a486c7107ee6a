//! Comparing model output across runs, plus naming and argument checks for
//! model validation deployments.

use std::sync::LazyLock;

use odh_common::Error;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

/// Keys whose values change on every request
pub const VOLATILE_KEYS: &[&str] = &[
    "timestamp",
    "created_at",
    "updated_at",
    "id",
    "unique_id",
    "request_id",
    "uuid",
    "run_id",
];

/// Replacement for UUIDs embedded in strings
pub const MASKED_UUID: &str = "[MASKED_UUID]";

/// Quantization methods vLLM accepts for `--quantization`
pub const VLLM_SUPPORTED_QUANTIZATION: &[&str] = &[
    "aqlm",
    "awq",
    "awq_marlin",
    "bitsandbytes",
    "compressed-tensors",
    "deepspeedfp",
    "experts_int8",
    "fbgemm_fp8",
    "fp8",
    "gguf",
    "gptq",
    "gptq_marlin",
    "gptq_marlin_24",
    "hqq",
    "marlin",
    "modelopt",
    "qqq",
    "tpu_int8",
];

static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b")
        .expect("uuid pattern compiles")
});

static NON_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9-]+").expect("name pattern compiles"));

/// Strip what differs between two runs of the same request: volatile keys
/// (at any depth), array order, and UUIDs inside strings.
pub fn normalize_output(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !VOLATILE_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), normalize_output(v)))
                .collect(),
        ),
        Value::Array(items) => {
            let mut items: Vec<Value> = items.iter().map(normalize_output).collect();
            items.sort_by_cached_key(|v| v.to_string());
            Value::Array(items)
        }
        Value::String(s) => Value::String(UUID_RE.replace_all(s, MASKED_UUID).into_owned()),
        other => other.clone(),
    }
}

/// Compare every response against a stored snapshot after normalization
pub fn validate_inference_output(responses: &[Value], snapshot: &Value) -> Result<(), Error> {
    let expected = normalize_output(snapshot);
    for response in responses {
        let got = normalize_output(response);
        if got != expected {
            return Err(Error::validation(format!(
                "output mismatch: expected {expected}, got {got}"
            )));
        }
    }
    Ok(())
}

/// Turn a model name into a DNS-1123 label of at most `max_len` characters.
///
/// Empty input gives "default-model"; input with nothing usable left gives
/// "model".
pub fn safe_k8s_name(name: &str, max_len: usize) -> String {
    if name.is_empty() {
        return "default-model".to_string();
    }

    let lowered = name.to_lowercase();
    let replaced = NON_NAME_CHARS.replace_all(&lowered, "-");
    let mut safe: String = replaced
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");

    // ASCII only at this point, so byte truncation is safe
    safe.truncate(max_len);
    let safe = safe.trim_end_matches('-');

    if safe.is_empty() {
        "model".to_string()
    } else {
        safe.to_string()
    }
}

/// Reject a `--quantization` value vLLM does not know
pub fn validate_supported_quantization(quantization: &str) -> Result<(), Error> {
    if VLLM_SUPPORTED_QUANTIZATION.contains(&quantization) {
        Ok(())
    } else {
        Err(Error::validation_for_field(
            "quantization",
            format!("unsupported quantization type: {quantization}"),
        ))
    }
}

// =============================================================================
// RAG keyword validation
// =============================================================================

/// A question and the keywords a good answer mentions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnExpectation {
    /// Question asked
    pub question: String,
    /// Keywords looked for in the answer (case-insensitive)
    pub expected_keywords: Vec<String>,
    /// What the turn checks
    #[serde(default)]
    pub description: String,
}

/// Validation of one answered turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnResult {
    /// Question asked
    pub question: String,
    /// Keywords found in the answer
    pub found_keywords: Vec<String>,
    /// Keywords not found
    pub missing_keywords: Vec<String>,
    /// Answer length in bytes
    pub response_length: usize,
    /// Whether the turn passed
    pub success: bool,
}

/// Totals over all turns
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationSummary {
    /// Turns validated
    pub total_turns: usize,
    /// Turns that passed
    pub successful_turns: usize,
    /// Turns that failed
    pub failed_turns: usize,
    /// `successful_turns / total_turns`, 0 without turns
    pub success_rate: f64,
    /// Sum of answer lengths
    pub total_response_length: usize,
}

/// Result of [`validate_rag_turns`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RagValidation {
    /// All turns passed
    pub success: bool,
    /// Per-turn detail
    pub results: Vec<TurnResult>,
    /// Totals
    pub summary: ValidationSummary,
}

fn validate_turn(turn: &TurnExpectation, response: Option<&str>, min_keywords: usize) -> TurnResult {
    let response = response.unwrap_or_default();
    let lowered = response.to_lowercase();
    let (found_keywords, missing_keywords): (Vec<String>, Vec<String>) = turn
        .expected_keywords
        .iter()
        .cloned()
        .partition(|k| lowered.contains(&k.to_lowercase()));

    let success = !response.is_empty() && found_keywords.len() >= min_keywords;
    if !missing_keywords.is_empty() {
        warn!(question = %turn.question, missing = ?missing_keywords, "missing expected keywords");
    }

    TurnResult {
        question: turn.question.clone(),
        found_keywords,
        missing_keywords,
        response_length: response.len(),
        success,
    }
}

/// Check each answer mentions at least `min_keywords` of its turn's keywords.
///
/// `responses[i]` answers `turns[i]`; a missing answer fails the turn. A turn
/// with an empty answer fails regardless of `min_keywords`.
pub fn validate_rag_turns(
    turns: &[TurnExpectation],
    responses: &[String],
    min_keywords: usize,
) -> RagValidation {
    let results: Vec<TurnResult> = turns
        .iter()
        .enumerate()
        .map(|(i, turn)| validate_turn(turn, responses.get(i).map(String::as_str), min_keywords))
        .collect();

    let total_turns = results.len();
    let successful_turns = results.iter().filter(|r| r.success).count();
    let summary = ValidationSummary {
        total_turns,
        successful_turns,
        failed_turns: total_turns - successful_turns,
        success_rate: if total_turns > 0 {
            successful_turns as f64 / total_turns as f64
        } else {
            0.0
        },
        total_response_length: results.iter().map(|r| r.response_length).sum(),
    };

    info!(
        total = summary.total_turns,
        successful = summary.successful_turns,
        failed = summary.failed_turns,
        success_rate = summary.success_rate,
        "rag validation summary"
    );

    RagValidation {
        success: successful_turns == total_turns,
        results,
        summary,
    }
}

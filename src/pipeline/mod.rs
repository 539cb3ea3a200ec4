//! The structured-output pipeline (C6): turn extracted document text into a
//! validated [`TemplateStructure`], self-healing once if validation fails.
//!
//! Grounded on the reference template agent's `parse` flow: prompt, call,
//! extract JSON, parse-with-repair, validate, and on the single allowed
//! self-heal pass, re-prompt at a low temperature with the validation
//! errors appended before trying once more.

pub mod extract;
pub mod json_repair;
pub mod validate;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::job::JobState;
use crate::domain::template::TemplateStructure;
use crate::error::ErrorKind;
use crate::llm::{extract_json, CallOutcome, Gateway, GatewayError, ProviderRequest};
use crate::store::TaskStore;
use crate::telemetry;

use self::extract::ExtractError;

const PARSE_TEMPERATURE: f32 = 0.3;
const SELF_HEAL_TEMPERATURE: f32 = 0.1;
/// §4.6 step 3: `max_output_tokens=16384`.
const DEFAULT_MAX_TOKENS: u32 = 16_384;
/// §4.6 step 2: the model is told to keep its response under this size.
const MAX_RESPONSE_KB: u32 = 60;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("no JSON object or array found in model output")]
    ParseExtractFailed,
    #[error("model output could not be parsed as JSON even after repair")]
    MalformedJson,
    #[error("validation failed: {0:?}")]
    ValidationFailed(Vec<String>),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("task was cancelled")]
    Cancelled,
}

impl PipelineError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Extract(e) => e.kind(),
            Self::ParseExtractFailed => ErrorKind::ParseExtractFailed,
            Self::MalformedJson => ErrorKind::MalformedJson,
            Self::ValidationFailed(_) => ErrorKind::ValidationFailed,
            Self::Gateway(e) => e.kind(),
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Invoked at each of the fixed checkpoints a pipeline run passes through
/// (§4.4 step 4): a single call both updates the task row on C1 and
/// publishes a `progress_update` event on C3, mirroring the reference
/// `progress_callback(percent, step)` hook.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, progress: u8, step: &str);
}

/// Everything a pipeline run needs beyond its document/model inputs:
/// identity for telemetry, the task store for the cooperative-cancellation
/// check, and the reporter it fires at each checkpoint.
pub struct PipelineRun<'a> {
    pub task_store: &'a TaskStore,
    pub task_id: Uuid,
    pub trace_id: Uuid,
    pub reporter: &'a dyn ProgressReporter,
}

/// §4.4: abort at the next cooperative checkpoint (between LLM calls) if
/// the task moved to `Cancelled` out from under this worker. A store
/// hiccup here is not fatal — the check is advisory, so any error reading
/// the task is treated as "not cancelled" and the run proceeds.
async fn check_cancelled(task_store: &TaskStore, task_id: Uuid) -> Result<()> {
    if let Ok(job) = task_store.get(task_id).await {
        if job.state == JobState::Cancelled {
            return Err(PipelineError::Cancelled);
        }
    }
    Ok(())
}

/// Call the gateway, bracketing it with `llm.request`/`llm.response`
/// telemetry (§4.9) carrying the request's `call_purpose`.
async fn call_and_trace(
    gateway: &Gateway,
    run: &PipelineRun<'_>,
    provider_name: &str,
    request: &ProviderRequest,
    accumulated_cost_usd: f64,
) -> Result<CallOutcome> {
    telemetry::emit(
        "llm.request",
        Some(run.trace_id),
        Some(run.task_id),
        None,
        serde_json::json!({"provider": provider_name, "model": request.model, "prompt_type": request.call_purpose}),
    );
    let outcome = gateway.call(provider_name, request, accumulated_cost_usd).await?;
    telemetry::emit(
        "llm.response",
        Some(run.trace_id),
        Some(run.task_id),
        None,
        serde_json::json!({
            "provider": provider_name,
            "model": request.model,
            "duration_ms": outcome.duration_ms,
            "input_tokens": outcome.tokens_in,
            "output_tokens": outcome.tokens_out,
            "cost_usd": outcome.cost_usd,
            "estimated": outcome.estimated,
        }),
    );
    Ok(outcome)
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Total usage accumulated across every call this pipeline run made,
/// threaded back to the caller so the job record's cost/token fields stay
/// accurate even when a self-heal pass adds a second call.
#[derive(Debug, Clone, Default)]
pub struct UsageTotals {
    pub cost_usd: f64,
    pub tokens_in: i64,
    pub tokens_out: i64,
}

impl UsageTotals {
    fn add(&mut self, outcome: &CallOutcome) {
        self.cost_usd += outcome.cost_usd;
        self.tokens_in += outcome.tokens_in;
        self.tokens_out += outcome.tokens_out;
    }
}

/// Result of running the full pipeline: the structure plus any semantic
/// warnings that survived (structural errors are never returned — they are
/// either self-healed away or surfaced as [`PipelineError::ValidationFailed`]).
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub structure: TemplateStructure,
    pub warnings: Vec<String>,
    pub healed: bool,
    pub usage: UsageTotals,
}

fn parse_structure(raw_text: &str) -> Result<TemplateStructure> {
    let json_text = extract_json(raw_text).ok_or(PipelineError::ParseExtractFailed)?;
    let value = json_repair::repair(&json_text).ok_or(PipelineError::MalformedJson)?;
    serde_json::from_value(value).map_err(|_| PipelineError::MalformedJson)
}

/// The response shape every identify/self-heal call is told to produce
/// (§4.6 step 2): required vs. optional fields for each section kind, and
/// the guardrails on format and size.
const RESPONSE_SCHEMA: &str = r#"Respond with JSON matching exactly this shape:
{
  "document_title": "string, required",
  "fixed_sections": [
    {
      "id": "string, required, unique within the document",
      "title": "string, required",
      "content": "string, required, verbatim text of the section",
      "section_type": "string, optional, e.g. heading/boilerplate/signature"
    }
  ],
  "fillable_sections": [
    {
      "id": "string, required, unique within the document",
      "title": "string, required",
      "type": "string, required, one of: paragraph, table, list, field",
      "semantic_tags": ["string", "... at least one, required"],
      "placeholder": "string, optional, example or hint text for the field",
      "is_mandatory": "boolean, optional",
      "mandatory_confidence": "number in [0.0, 1.0], optional — only set is_mandatory=true when this is >= 0.85"
    }
  ]
}
Return JSON only, no markdown code fences and no commentary before or after it. Keep the response under {MAX_KB} KB."#;

/// Build the initial section-identification prompt (§4.6 step 2): the
/// flattened document blocks, the ISO-standard hint and any custom rules
/// the caller supplied, followed by the explicit response schema.
fn build_identify_prompt(document_text: &str, iso_standard: Option<&str>, custom_rules: Option<&str>) -> String {
    let iso_line = iso_standard.unwrap_or("not specified");
    let rules_block = custom_rules.map_or_else(String::new, |rules| format!("\n\nCUSTOM RULES:\n{rules}"));
    let schema = RESPONSE_SCHEMA.replace("{MAX_KB}", &MAX_RESPONSE_KB.to_string());

    format!(
        "Identify the FIXED (customer-invariant boilerplate, headings, signature blocks) and \
         FILLABLE (customer-specific, to-be-completed) sections of the following document.\n\n\
         ISO STANDARD: {iso_line}{rules_block}\n\n\
         DOCUMENT CONTENT:\n{document_text}\n\n{schema}"
    )
}

/// Build the self-heal prompt (§4.6 step 7): the prior output as JSON, the
/// surviving validation errors enumerated, and instructions to fix only
/// what's broken without touching ids or tags that already validate.
fn build_heal_prompt(structure: &TemplateStructure, errors: &[String], iso_standard: Option<&str>, custom_rules: Option<&str>) -> String {
    let original_json = serde_json::to_string_pretty(structure).unwrap_or_default();
    let error_list = errors.iter().enumerate().map(|(i, e)| format!("{}. {e}", i + 1)).collect::<Vec<_>>().join("\n");
    let iso_line = iso_standard.unwrap_or("not specified");
    let rules_line = custom_rules.map_or_else(String::new, |rules| format!("\nCustom rules: {rules}"));

    format!(
        "The following template structure failed validation.\n\n\
         ORIGINAL OUTPUT:\n{original_json}\n\n\
         VALIDATION ERRORS:\n{error_list}\n\n\
         Fix only the sections that caused these errors. Keep every existing section id and \
         semantic tag unchanged unless an error specifically requires adding or removing one.\n\n\
         CONTEXT:\nISO standard: {iso_line}{rules_line}\n\n{RESPONSE_SCHEMA}"
    )
    .replace("{MAX_KB}", &MAX_RESPONSE_KB.to_string())
}

/// Run the full pipeline: prompt, call, extract, parse, validate, and
/// self-heal once if structural validation fails and self-healing is
/// enabled. Checks for cooperative cancellation before each gateway call
/// and reports progress at the 70%/85% checkpoints.
pub async fn run(
    run_ctx: &PipelineRun<'_>,
    gateway: &Gateway,
    provider_name: &str,
    model: &str,
    document_text: &str,
    iso_standard: Option<&str>,
    custom_rules: Option<&str>,
    enable_self_healing: bool,
) -> Result<PipelineOutcome> {
    let mut usage = UsageTotals::default();

    check_cancelled(run_ctx.task_store, run_ctx.task_id).await?;
    run_ctx.reporter.report(70, "Analyzing document structure with AI...").await;

    let request = ProviderRequest {
        model: model.to_string(),
        system_prompt: None,
        user_prompt: build_identify_prompt(document_text, iso_standard, custom_rules),
        temperature: PARSE_TEMPERATURE,
        max_tokens: DEFAULT_MAX_TOKENS,
        call_purpose: "section_identification",
    };
    let outcome = call_and_trace(gateway, run_ctx, provider_name, &request, usage.cost_usd).await?;
    usage.add(&outcome);

    let structure = parse_structure(&outcome.text)?;

    run_ctx.reporter.report(85, "Validating and self-healing template...").await;
    let structural_errors = validate::validate_structural(&structure);

    if structural_errors.is_empty() {
        let warnings = validate::validate_semantic(&structure);
        return Ok(PipelineOutcome { structure, warnings, healed: false, usage });
    }

    if !enable_self_healing {
        return Err(PipelineError::ValidationFailed(structural_errors));
    }

    check_cancelled(run_ctx.task_store, run_ctx.task_id).await?;

    let heal_request = ProviderRequest {
        model: model.to_string(),
        system_prompt: None,
        user_prompt: build_heal_prompt(&structure, &structural_errors, iso_standard, custom_rules),
        temperature: SELF_HEAL_TEMPERATURE,
        max_tokens: DEFAULT_MAX_TOKENS,
        call_purpose: "self_heal_template",
    };
    let heal_outcome = call_and_trace(gateway, run_ctx, provider_name, &heal_request, usage.cost_usd).await?;
    usage.add(&heal_outcome);

    let healed_structure = parse_structure(&heal_outcome.text)?;
    let healed_errors = validate::validate_structural(&healed_structure);
    if !healed_errors.is_empty() {
        return Err(PipelineError::ValidationFailed(healed_errors));
    }

    let warnings = validate::validate_semantic(&healed_structure);
    Ok(PipelineOutcome { structure: healed_structure, warnings, healed: true, usage })
}

/// Step 8: stamp a `metadata` sub-object onto the structure with counts,
/// the sorted union of semantic tags in use, and a completion estimate.
pub fn enrich(mut structure: TemplateStructure, source_file: &str) -> TemplateStructure {
    let total_fixed_sections = structure.fixed_sections.len();
    let total_fillable_sections = structure.fillable_sections.len();

    let mut tags: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
    for section in &structure.fillable_sections {
        for tag in &section.semantic_tags {
            tags.insert(tag.clone());
        }
    }

    let completion_estimate_minutes = (2.5 * total_fillable_sections as f64).ceil().max(5.0) as u32;

    structure.metadata = serde_json::json!({
        "source_file": source_file,
        "parsed_at": chrono::Utc::now().to_rfc3339(),
        "total_fixed_sections": total_fixed_sections,
        "total_fillable_sections": total_fillable_sections,
        "semantic_tags_used": tags.into_iter().collect::<Vec<_>>(),
        "completion_estimate_minutes": completion_estimate_minutes,
    });
    structure
}

/// Run the parse pipeline end to end from a source file on disk: extract,
/// prompt/call/validate/self-heal (via [`run`]), then enrich. Reports
/// progress at the 40% (load) and 95% (finalize) checkpoints that bracket
/// the shared 70%/85% checkpoints inside [`run`].
pub async fn run_parse(
    run_ctx: &PipelineRun<'_>,
    gateway: &Gateway,
    provider_name: &str,
    model: &str,
    file_path: &std::path::Path,
    original_filename: &str,
    iso_standard: Option<&str>,
    custom_rules: Option<&str>,
    enable_self_healing: bool,
) -> Result<PipelineOutcome> {
    run_ctx.reporter.report(40, "Loading Word document...").await;
    let document = extract::extract(file_path).await?;

    let mut outcome = run(
        run_ctx,
        gateway,
        provider_name,
        model,
        &document.to_prompt_text(),
        iso_standard,
        custom_rules,
        enable_self_healing,
    )
    .await?;

    run_ctx.reporter.report(95, "Finalizing template...").await;
    outcome.structure = enrich(outcome.structure, original_filename);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identify_prompt_carries_document_and_schema() {
        let prompt = build_identify_prompt("some document text", None, None);
        assert!(prompt.contains("some document text"));
        assert!(prompt.contains("fixed_sections"));
        assert!(prompt.contains("fillable_sections"));
        assert!(prompt.contains("JSON only"));
        assert!(prompt.contains("not specified"));
    }

    #[test]
    fn identify_prompt_includes_iso_standard_and_custom_rules() {
        let prompt = build_identify_prompt("doc", Some("ISO 9001"), Some("reject tables without headers"));
        assert!(prompt.contains("ISO 9001"));
        assert!(prompt.contains("reject tables without headers"));
    }

    #[test]
    fn heal_prompt_includes_original_structure_and_errors() {
        let structure = TemplateStructure {
            document_title: "t".into(),
            fixed_sections: vec![],
            fillable_sections: vec![],
            metadata: serde_json::json!({}),
        };
        let prompt = build_heal_prompt(&structure, &["missing title".to_string()], None, None);
        assert!(prompt.contains("missing title"));
        assert!(prompt.contains("\"document_title\": \"t\""));
    }

    #[test]
    fn parse_structure_extracts_fenced_json() {
        let raw = "```json\n{\"document_title\": \"t\", \"fixed_sections\": [], \"fillable_sections\": []}\n```";
        let structure = parse_structure(raw).unwrap();
        assert_eq!(structure.document_title, "t");
    }

    #[test]
    fn parse_structure_fails_without_any_json() {
        assert!(matches!(parse_structure("no json here"), Err(PipelineError::ParseExtractFailed)));
    }

    #[test]
    fn enrich_floors_completion_estimate_at_five_minutes() {
        let structure = TemplateStructure {
            document_title: "t".into(),
            fixed_sections: vec![],
            fillable_sections: vec![],
            metadata: serde_json::json!({}),
        };
        let enriched = enrich(structure, "doc.docx");
        assert_eq!(enriched.metadata["completion_estimate_minutes"], 5);
        assert_eq!(enriched.metadata["source_file"], "doc.docx");
    }
}

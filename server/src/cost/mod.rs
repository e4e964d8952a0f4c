//! Token-cost attribution.
//!
//! Reads the token-usage attributes a span arrived with, resolves the unit
//! prices for its provider/model/mode, and writes the computed USD cost back
//! onto the span. Running it twice is a no-op: inputs are never consumed and
//! outputs are overwritten.

use tracing::debug;

use crate::model::{AttrValue, Span};
use crate::pricing::{PricingTable, MODE_STANDARD};

/// Well-known token-usage attribute keys.
pub const ATTR_INPUT_TOKENS: &str = "inputTokens";
pub const ATTR_OUTPUT_TOKENS: &str = "outputTokens";
pub const ATTR_CACHED_INPUT_TOKENS: &str = "cachedInputTokens";
pub const ATTR_TOTAL_TOKENS: &str = "totalTokens";

/// Attributes written by the attributor.
pub const ATTR_COST_USD: &str = "cost.usd";
pub const ATTR_COST_CALCULATOR: &str = "cost.calculator";

/// Attribute keys a span may use to name its provider and model.
const PROVIDER_KEYS: [&str; 2] = ["provider", "gen_ai.system"];
const MODEL_KEYS: [&str; 3] = ["model", "gen_ai.request.model", "llm.model"];
const MODE_KEY: &str = "mode";

/// Token counts read off a span, after numeric-string coercion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input: Option<i64>,
    pub output: Option<i64>,
    pub cached_input: Option<i64>,
    pub total: Option<i64>,
}

impl TokenUsage {
    /// Read usage from span attributes. Values may be numbers or numeric
    /// strings; anything else counts as missing.
    #[must_use]
    pub fn from_span(span: &Span) -> Self {
        let read = |key: &str| {
            span.attributes
                .get(key)
                .and_then(AttrValue::as_f64)
                .map(|v| v as i64)
        };
        Self {
            input: read(ATTR_INPUT_TOKENS),
            output: read(ATTR_OUTPUT_TOKENS),
            cached_input: read(ATTR_CACHED_INPUT_TOKENS),
            total: read(ATTR_TOTAL_TOKENS),
        }
    }

    /// Resolve to concrete `(input, output, cached_input)` counts, or `None`
    /// when input, output and total are all absent.
    ///
    /// With only a total, it is split 50/50 (floor on input). With a total
    /// and one side, the other side is derived as `max(0, total - present)`.
    /// With both sides present they are used verbatim and any total is
    /// ignored.
    #[must_use]
    pub fn resolve(&self) -> Option<(i64, i64, i64)> {
        let cached = self.cached_input.unwrap_or(0);
        let (input, output) = match (self.input, self.output, self.total) {
            (None, None, None) => return None,
            (Some(i), Some(o), _) => (i, o),
            (Some(i), None, Some(t)) => (i, (t - i).max(0)),
            (None, Some(o), Some(t)) => ((t - o).max(0), o),
            (Some(i), None, None) => (i, 0),
            (None, Some(o), None) => (0, o),
            (None, None, Some(t)) => {
                let input = t / 2;
                (input, t - input)
            }
        };
        Some((input, output, cached))
    }
}

/// Compute and write `cost.usd` and `cost.calculator` onto the span.
///
/// Spans without any token report are left untouched.
pub fn attach_cost(span: &mut Span, pricing: &PricingTable) {
    let usage = TokenUsage::from_span(span);
    let Some((input, output, cached_input)) = usage.resolve() else {
        return;
    };

    let model = first_string(span, &MODEL_KEYS).unwrap_or_default();
    let provider = first_string(span, &PROVIDER_KEYS)
        .or_else(|| infer_provider(&model).map(str::to_owned))
        .or_else(|| pricing.provider_for_model(&model).map(str::to_owned))
        .unwrap_or_default();
    let mode = first_string(span, &[MODE_KEY]).unwrap_or_else(|| MODE_STANDARD.to_owned());

    let hit = pricing.lookup(&provider, &model, &mode);
    if hit.fallback {
        debug!(span = %span.id, model = %model, "No pricing row, using fallback rates");
    }

    let rates = hit.rates;
    // A zero cached rate falls back to the input rate when one exists.
    let cached_rate = if rates.cached_input_per_m == 0.0 && rates.input_per_m != 0.0 {
        rates.input_per_m
    } else {
        rates.cached_input_per_m
    };
    let cost = input as f64 / 1e6 * rates.input_per_m
        + output as f64 / 1e6 * rates.output_per_m
        + cached_input as f64 / 1e6 * cached_rate;

    span.attributes
        .insert(ATTR_COST_USD.to_owned(), AttrValue::Double(cost));
    span.attributes
        .insert(ATTR_COST_CALCULATOR.to_owned(), AttrValue::Str(hit.calculator));
}

fn first_string(span: &Span, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        span.attributes
            .get(*key)
            .and_then(AttrValue::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    })
}

/// Guess a provider from the model name. Bedrock model ids embed other
/// vendors' names (`anthropic.claude-...`), so those patterns are checked
/// before the plain vendor substrings.
fn infer_provider(model: &str) -> Option<&'static str> {
    if model.is_empty() {
        return None;
    }
    let lower = model.to_ascii_lowercase();
    if ["anthropic.claude", "bedrock", "amazon"]
        .iter()
        .any(|p| lower.contains(p))
    {
        return Some("bedrock");
    }
    if ["gpt", "o1", "o3", "o4"].iter().any(|p| lower.contains(p)) {
        return Some("openai");
    }
    if lower.contains("claude") {
        return Some("anthropic");
    }
    if lower.contains("gemini") {
        return Some("google");
    }
    if lower.contains("azure") {
        return Some("azure");
    }
    None
}

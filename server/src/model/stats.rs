//! Aggregate span statistics.

use serde::{Deserialize, Serialize};

/// Statistics carried by a span: its own contribution plus, after
/// propagation, the contributions of every known descendant.
///
/// Every field is optional and absence is not zero: a span that never saw a
/// token report carries no token fields at all, and equality distinguishes
/// `None` from `Some(0)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_input_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descendants: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
}

fn add_opt_i64(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (None, None) => None,
        (x, None) | (None, x) => x,
        (Some(x), Some(y)) => Some(x + y),
    }
}

fn add_opt_f64(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (None, None) => None,
        (x, None) | (None, x) => x,
        (Some(x), Some(y)) => Some(x + y),
    }
}

impl SpanStats {
    /// Field-wise sum, with absence as the identity on each side.
    #[must_use]
    pub fn combine(&self, other: &Self) -> Self {
        Self {
            input_tokens: add_opt_i64(self.input_tokens, other.input_tokens),
            output_tokens: add_opt_i64(self.output_tokens, other.output_tokens),
            cached_input_tokens: add_opt_i64(self.cached_input_tokens, other.cached_input_tokens),
            total_tokens: add_opt_i64(self.total_tokens, other.total_tokens),
            cost: add_opt_f64(self.cost, other.cost),
            errors: add_opt_i64(self.errors, other.errors),
            descendants: add_opt_i64(self.descendants, other.descendants),
            duration: add_opt_i64(self.duration, other.duration),
        }
    }

    /// Whether no field carries a value.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.input_tokens.is_none()
            && self.output_tokens.is_none()
            && self.cached_input_tokens.is_none()
            && self.total_tokens.is_none()
            && self.cost.is_none()
            && self.errors.is_none()
            && self.descendants.is_none()
            && self.duration.is_none()
    }

    /// The numeric fields as `(name, value)` pairs, in wire-name form.
    /// Used by the experiment updater to merge stats into score maps.
    #[must_use]
    pub fn numeric_fields(&self) -> Vec<(&'static str, f64)> {
        let mut fields = Vec::new();
        if let Some(v) = self.input_tokens {
            fields.push(("inputTokens", v as f64));
        }
        if let Some(v) = self.output_tokens {
            fields.push(("outputTokens", v as f64));
        }
        if let Some(v) = self.cached_input_tokens {
            fields.push(("cachedInputTokens", v as f64));
        }
        if let Some(v) = self.total_tokens {
            fields.push(("totalTokens", v as f64));
        }
        if let Some(v) = self.cost {
            fields.push(("cost", v));
        }
        if let Some(v) = self.errors {
            fields.push(("errors", v as f64));
        }
        if let Some(v) = self.descendants {
            fields.push(("descendants", v as f64));
        }
        if let Some(v) = self.duration {
            fields.push(("duration", v as f64));
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_treats_absence_as_identity() {
        let a = SpanStats {
            input_tokens: Some(10),
            cost: Some(0.5),
            ..Default::default()
        };
        let b = SpanStats {
            input_tokens: Some(5),
            errors: Some(1),
            ..Default::default()
        };
        let merged = a.combine(&b);
        assert_eq!(merged.input_tokens, Some(15));
        assert_eq!(merged.cost, Some(0.5));
        assert_eq!(merged.errors, Some(1));
        assert_eq!(merged.output_tokens, None);
    }

    #[test]
    fn absence_is_not_zero() {
        let none = SpanStats::default();
        let zero = SpanStats {
            errors: Some(0),
            ..Default::default()
        };
        assert_ne!(none, zero);
        assert!(none.is_empty());
        assert!(!zero.is_empty());
    }

    #[test]
    fn serializes_camel_case_and_sparse() {
        let stats = SpanStats {
            cached_input_tokens: Some(3),
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json, serde_json::json!({"cachedInputTokens": 3}));
    }
}

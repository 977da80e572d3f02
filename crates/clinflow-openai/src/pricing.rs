// Cost-per-million-token table, keyed by model id. Mirrors the shape of
// a models.dev style cost profile, trimmed to the models this workflow
// engine is actually configured against rather than the full catalog.

/// (input $/1M tokens, output $/1M tokens)
const TABLE: &[(&str, f64, f64)] = &[
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4.1", 2.00, 8.00),
    ("gpt-4.1-mini", 0.40, 1.60),
    ("gpt-4.1-nano", 0.10, 0.40),
    ("o1", 15.00, 60.00),
    ("o1-mini", 1.10, 4.40),
    ("o3-mini", 1.10, 4.40),
];

/// Default rate applied when the model isn't in `TABLE` (e.g. a custom
/// fine-tune or a new release this table hasn't caught up with yet).
const DEFAULT_RATE: (f64, f64) = (2.50, 10.00);

pub fn estimate_cost(model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
    let (input_rate, output_rate) = TABLE
        .iter()
        .find(|(name, _, _)| *name == model)
        .map(|(_, i, o)| (*i, *o))
        .unwrap_or(DEFAULT_RATE);
    (input_tokens as f64 / 1_000_000.0) * input_rate
        + (output_tokens as f64 / 1_000_000.0) * output_rate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_uses_its_own_rate() {
        let cost = estimate_cost("gpt-4o-mini", 1_000_000, 1_000_000);
        assert!((cost - 0.75).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_falls_back_to_default_rate() {
        let cost = estimate_cost("some-future-model", 1_000_000, 1_000_000);
        let expected = DEFAULT_RATE.0 + DEFAULT_RATE.1;
        assert!((cost - expected).abs() < 1e-9);
    }
}

// Cost-per-million-token table, keyed by model id.

/// (input $/1M tokens, output $/1M tokens)
const TABLE: &[(&str, f64, f64)] = &[
    ("claude-opus-4-20250514", 15.00, 75.00),
    ("claude-sonnet-4-20250514", 3.00, 15.00),
    ("claude-3-7-sonnet-20250219", 3.00, 15.00),
    ("claude-3-5-sonnet-20241022", 3.00, 15.00),
    ("claude-3-5-haiku-20241022", 0.80, 4.00),
];

const DEFAULT_RATE: (f64, f64) = (3.00, 15.00);

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
        let cost = estimate_cost("claude-3-5-haiku-20241022", 1_000_000, 1_000_000);
        assert!((cost - 4.80).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_falls_back_to_default_rate() {
        let cost = estimate_cost("some-future-model", 1_000_000, 1_000_000);
        let expected = DEFAULT_RATE.0 + DEFAULT_RATE.1;
        assert!((cost - expected).abs() < 1e-9);
    }
}

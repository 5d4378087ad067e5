//! Per-model pricing for call cost estimation.
//!
//! Prices are USD per million tokens (input, output). Estimation is
//! intentionally coarse: ~4 characters per token, output assumed to run
//! to the configured max. Used for observability, never billing.

use super::base::ChatTurn;

/// (model prefix, input $/1M tokens, output $/1M tokens)
const MODEL_PRICES: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4.1-mini", 0.40, 1.60),
    ("gpt-4.1", 2.00, 8.00),
];

/// Fallback for unknown models: priced like the mid-tier.
const DEFAULT_PRICE: (f64, f64) = (2.50, 10.00);

/// Price pair for a model, by longest matching prefix.
pub fn price_for(model: &str) -> (f64, f64) {
    MODEL_PRICES
        .iter()
        .filter(|(prefix, _, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _, _)| prefix.len())
        .map(|(_, input, output)| (*input, *output))
        .unwrap_or(DEFAULT_PRICE)
}

/// Rough token count: ~4 characters per token.
pub fn approx_tokens(text: &str) -> u64 {
    (text.chars().count() as u64 + 3) / 4
}

/// Estimated cost in USD of one chat call.
pub fn estimate_chat_cost(model: &str, history: &[ChatTurn], max_output_tokens: u32) -> f64 {
    let (input_price, output_price) = price_for(model);
    let input_tokens: u64 = history.iter().map(|turn| approx_tokens(&turn.content)).sum();
    let input_cost = input_tokens as f64 * input_price / 1_000_000.0;
    let output_cost = max_output_tokens as f64 * output_price / 1_000_000.0;
    input_cost + output_cost
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_prefers_longest_prefix() {
        // "gpt-4o-mini" must match its own row, not the "gpt-4o" row.
        assert_eq!(price_for("gpt-4o-mini"), (0.15, 0.60));
        assert_eq!(price_for("gpt-4o-mini-2024-07-18"), (0.15, 0.60));
        assert_eq!(price_for("gpt-4o"), (2.50, 10.00));
    }

    #[test]
    fn test_unknown_model_uses_default() {
        assert_eq!(price_for("acme-voice-1"), DEFAULT_PRICE);
    }

    #[test]
    fn test_approx_tokens() {
        assert_eq!(approx_tokens(""), 0);
        assert_eq!(approx_tokens("hola"), 1);
        assert_eq!(approx_tokens("hola mundo!!"), 3);
    }

    #[test]
    fn test_estimate_chat_cost_grows_with_history() {
        let short = vec![ChatTurn::user("hola")];
        let long = vec![
            ChatTurn::user("hola"),
            ChatTurn::assistant("x".repeat(4000)),
            ChatTurn::user("y".repeat(4000)),
        ];
        let short_cost = estimate_chat_cost("gpt-4o-mini", &short, 300);
        let long_cost = estimate_chat_cost("gpt-4o-mini", &long, 300);
        assert!(long_cost > short_cost);
        assert!(short_cost > 0.0);
    }
}

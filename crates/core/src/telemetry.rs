//! Metric names shared by the crates that record them and the gateway that
//! exports them.

/// Agent runs (counter, labels: agent, status).
pub const AGENT_EXECUTIONS_TOTAL: &str = "agent_executions_total";
/// Steps taken per agent run (histogram, labels: agent).
pub const AGENT_STEPS_TOTAL: &str = "agent_steps_total";
/// Model calls (counter, labels: model, provider, status).
pub const LLM_REQUESTS_TOTAL: &str = "llm_requests_total";
/// Model call latency until the response or stream is available (histogram,
/// labels: model, provider).
pub const LLM_REQUEST_DURATION_SECONDS: &str = "llm_request_duration_seconds";
/// Tokens reported by the provider (counter, labels: model, provider, type).
pub const LLM_TOKENS_TOTAL: &str = "llm_tokens_total";

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_ERROR: &str = "error";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_snake_case() {
        for name in [
            AGENT_EXECUTIONS_TOTAL,
            AGENT_STEPS_TOTAL,
            LLM_REQUESTS_TOTAL,
            LLM_REQUEST_DURATION_SECONDS,
            LLM_TOKENS_TOTAL,
        ] {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}

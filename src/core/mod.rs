pub mod audio;
pub mod llm;
pub mod stt;
pub mod tts;

/// Descriptive information about a provider adapter.
///
/// Shared shape across the three provider families; surfaced to clients
/// in the `ready` event and the `/info` descriptor.
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    /// Short provider name, e.g. "deepgram".
    pub name: &'static str,
    /// Model identifier the adapter is configured with.
    pub model: String,
    /// BCP-47-ish language tag, or empty when not applicable.
    pub language: String,
    /// Typical first-result latency for this provider, in milliseconds.
    pub typical_latency_ms: u32,
}

impl ProviderInfo {
    /// One-line summary used in client-facing payloads.
    pub fn summary(&self) -> String {
        if self.model.is_empty() {
            self.name.to_string()
        } else {
            format!("{} ({})", self.name, self.model)
        }
    }
}

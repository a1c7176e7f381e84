//! Heuristic token usage estimation for upstreams that omit `usage`.
//!
//! The estimate is a simple whitespace/punctuation-aware word count scaled
//! by an average tokens-per-word ratio. It exists purely as a fallback: per
//! §4.B, whenever the upstream supplies its own `usage`, that value is
//! preserved verbatim and this estimator is never consulted.

/// Average number of tokens per word for common BPE tokenizers, used when
/// no real tokenizer is available. Close enough to keep synthesized usage
/// in the right ballpark without depending on a vendor-specific tokenizer.
const TOKENS_PER_WORD: f64 = 1.3;

/// A `{prompt, completion, total}` usage triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

fn estimate_tokens(text: &str) -> u32 {
    let words = text.split_whitespace().count();
    ((words as f64) * TOKENS_PER_WORD).ceil() as u32
}

/// Accumulates prompt text up front, then completion text (either one shot
/// or streamed in deltas), and produces a final usage estimate.
///
/// One estimator is constructed per request (§4.E: "Initialize the Token
/// Estimator with the request messages").
pub struct TokenEstimator {
    prompt_tokens: u32,
    completion_text: String,
}

impl TokenEstimator {
    /// Seed the estimator with the request's message list, concatenating
    /// every message's textual content.
    pub fn new(prompt_messages: &[impl AsRef<str>]) -> Self {
        let prompt_text: String = prompt_messages
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(" ");
        TokenEstimator {
            prompt_tokens: estimate_tokens(&prompt_text),
            completion_text: String::new(),
        }
    }

    /// Feed a full completion response's text (non-streaming path).
    pub fn feed_complete(&mut self, text: &str) {
        self.completion_text.push_str(text);
    }

    /// Feed one streaming delta's text (streaming path, called per chunk).
    pub fn feed_delta(&mut self, delta_text: &str) {
        self.completion_text.push_str(delta_text);
    }

    /// Produce the final `{prompt, completion, total}` estimate.
    pub fn finish(&self) -> TokenUsage {
        TokenUsage::new(self.prompt_tokens, estimate_tokens(&self.completion_text))
    }
}

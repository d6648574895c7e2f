use std::ops::Add;

use serde::{Deserialize, Serialize};

/// Token usage reported on the terminal fragment of a streamed completion.
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    /// The number of prompt tokens consumed, across all input modalities.
    #[serde(default)]
    pub prompt_tokens: u64,

    /// The number of completion tokens generated, across all output modalities.
    #[serde(default)]
    pub completion_tokens: u64,

    /// The total reported by the server, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

impl Usage {
    /// Create a new `Usage` with the given prompt and completion tokens.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: None,
        }
    }

    /// Set the server-reported total.
    pub fn with_total_tokens(mut self, tokens: u64) -> Self {
        self.total_tokens = Some(tokens);
        self
    }

    /// The total token count, falling back to prompt + completion.
    pub fn total(&self) -> u64 {
        self.total_tokens
            .unwrap_or(self.prompt_tokens + self.completion_tokens)
    }
}

impl Add for Usage {
    type Output = Usage;

    fn add(self, rhs: Usage) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens.saturating_add(rhs.prompt_tokens),
            completion_tokens: self.completion_tokens.saturating_add(rhs.completion_tokens),
            total_tokens: Some(self.total().saturating_add(rhs.total())),
        }
    }
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Represents a chat completion model identifier.
///
/// This can be one of the known omni models or a custom string value
/// for models that may be added in the future.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Model {
    /// Known model versions
    Known(KnownModel),

    /// Custom model identifier (for future models or private deployments)
    Custom(String),
}

/// Known Qwen Omni model versions
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KnownModel {
    /// Qwen Omni Turbo (stable alias)
    #[serde(rename = "qwen-omni-turbo")]
    QwenOmniTurbo,

    /// Qwen Omni Turbo (latest version)
    #[serde(rename = "qwen-omni-turbo-latest")]
    QwenOmniTurboLatest,

    /// Qwen Omni Turbo (2025-03-26 snapshot)
    #[serde(rename = "qwen-omni-turbo-2025-03-26")]
    QwenOmniTurbo20250326,

    /// Qwen2.5 Omni 7B (open weights)
    #[serde(rename = "qwen2.5-omni-7b")]
    Qwen25Omni7b,
}

impl KnownModel {
    /// Every known model, in menu order.
    pub const ALL: [KnownModel; 4] = [
        KnownModel::QwenOmniTurbo,
        KnownModel::QwenOmniTurboLatest,
        KnownModel::QwenOmniTurbo20250326,
        KnownModel::Qwen25Omni7b,
    ];

    /// The wire identifier of this model.
    pub fn as_str(&self) -> &'static str {
        match self {
            KnownModel::QwenOmniTurbo => "qwen-omni-turbo",
            KnownModel::QwenOmniTurboLatest => "qwen-omni-turbo-latest",
            KnownModel::QwenOmniTurbo20250326 => "qwen-omni-turbo-2025-03-26",
            KnownModel::Qwen25Omni7b => "qwen2.5-omni-7b",
        }
    }
}

impl Model {
    /// Returns the position of this model in [`KnownModel::ALL`], if it is a known model.
    pub fn menu_index(&self) -> Option<usize> {
        match self {
            Model::Known(known) => KnownModel::ALL.iter().position(|m| m == known),
            Model::Custom(_) => None,
        }
    }
}

impl Default for Model {
    fn default() -> Self {
        Model::Known(KnownModel::QwenOmniTurbo20250326)
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Model::Known(known_model) => write!(f, "{known_model}"),
            Model::Custom(custom) => write!(f, "{custom}"),
        }
    }
}

impl fmt::Display for KnownModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KnownModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KnownModel::ALL
            .iter()
            .copied()
            .find(|model| model.as_str() == s)
            .ok_or_else(|| format!("unknown model: {s}"))
    }
}

impl FromStr for Model {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("model name is empty".to_string());
        }
        Ok(s.parse::<KnownModel>()
            .map(Model::Known)
            .unwrap_or_else(|_| Model::Custom(s.to_string())))
    }
}

impl From<KnownModel> for Model {
    fn from(model: KnownModel) -> Self {
        Model::Known(model)
    }
}

impl From<String> for Model {
    fn from(model: String) -> Self {
        model.parse().unwrap_or(Model::Custom(model))
    }
}

impl From<&str> for Model {
    fn from(model: &str) -> Self {
        Model::from(model.to_string())
    }
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAi,
    StabilityAi,
    StableDiffusionApi,
    Dreambooth,
    #[serde(rename = "hf")]
    HuggingFace,
}

impl Provider {
    pub const ALL: [Provider; 5] = [
        Provider::OpenAi,
        Provider::StabilityAi,
        Provider::StableDiffusionApi,
        Provider::Dreambooth,
        Provider::HuggingFace,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::StabilityAi => "stability_ai",
            Provider::StableDiffusionApi => "stable_diffusion_api",
            Provider::Dreambooth => "dreambooth",
            Provider::HuggingFace => "hf",
        }
    }

    pub fn ids() -> Vec<&'static str> {
        let mut ids = Self::ALL.iter().map(|provider| provider.id()).collect::<Vec<_>>();
        ids.sort();
        ids
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|provider| provider.id() == normalized)
            .or(match normalized.as_str() {
                "stability" => Some(Provider::StabilityAi),
                "sd_api" | "stablediffusionapi" => Some(Provider::StableDiffusionApi),
                "huggingface" | "hugging_face" => Some(Provider::HuggingFace),
                _ => None,
            })
            .ok_or_else(|| {
                format!(
                    "Unknown provider '{}'. Expected one of: {}.",
                    raw.trim(),
                    Self::ids().join(", ")
                )
            })
    }
}

use std::path::PathBuf;

use crate::env::EnvHandler;
use crate::http::RetryPolicy;

pub const DEFAULT_STORAGE_DIR: &str = "~/.chisel";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub openai: String,
    pub stability_ai: String,
    pub stable_diffusion_api: String,
    pub dreambooth: String,
    pub hf: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            openai: "https://api.openai.com/v1".to_string(),
            stability_ai: "https://api.stability.ai".to_string(),
            stable_diffusion_api: "https://stablediffusionapi.com/api/v3".to_string(),
            dreambooth: "https://stablediffusionapi.com/api/v4/dreambooth".to_string(),
            hf: "https://api-inference.huggingface.co".to_string(),
        }
    }
}

impl Endpoints {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            openai: api_base("OPENAI_API_BASE", defaults.openai),
            stability_ai: api_base("STABILITY_API_BASE", defaults.stability_ai),
            stable_diffusion_api: api_base(
                "STABLE_DIFFUSION_API_BASE",
                defaults.stable_diffusion_api,
            ),
            dreambooth: api_base("DREAMBOOTH_API_BASE", defaults.dreambooth),
            hf: api_base("HF_API_BASE", defaults.hf),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChiselConfig {
    pub storage_dir: PathBuf,
    pub retry: RetryPolicy,
    pub endpoints: Endpoints,
}

impl Default for ChiselConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            retry: RetryPolicy::default(),
            endpoints: Endpoints::default(),
        }
    }
}

impl ChiselConfig {
    pub fn from_env() -> Self {
        Self {
            storage_dir: EnvHandler::non_empty("CHISEL_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR)),
            retry: RetryPolicy::default(),
            endpoints: Endpoints::from_env(),
        }
    }

    pub fn with_storage_dir(mut self, storage_dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = storage_dir.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

fn api_base(key: &str, default: String) -> String {
    EnvHandler::non_empty(key)
        .map(|value| value.trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or(default)
}

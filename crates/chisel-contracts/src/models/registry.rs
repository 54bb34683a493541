use indexmap::IndexMap;

use super::operation::Operation;
use crate::providers::Provider;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSpec {
    pub name: String,
    pub provider: Provider,
    pub operations: Vec<Operation>,
}

impl EngineSpec {
    pub fn supports(&self, operation: Operation) -> bool {
        self.operations.contains(&operation)
    }
}

/// Engines (vendor model ids) known per provider, in preference order.
#[derive(Debug, Clone)]
pub struct EngineRegistry {
    engines: IndexMap<String, EngineSpec>,
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl EngineRegistry {
    pub fn new(engines: Option<IndexMap<String, EngineSpec>>) -> Self {
        Self {
            engines: engines.unwrap_or_else(default_engines),
        }
    }

    pub fn get(&self, name: &str) -> Option<&EngineSpec> {
        self.engines.get(name)
    }

    pub fn for_provider(&self, provider: Provider, operation: Operation) -> Vec<EngineSpec> {
        self.engines
            .values()
            .filter(|engine| engine.provider == provider && engine.supports(operation))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, provider: Provider, operation: Operation) -> Option<EngineSpec> {
        let engine = self.get(name)?;
        if engine.provider == provider && engine.supports(operation) {
            return Some(engine.clone());
        }
        None
    }
}

fn default_engines() -> IndexMap<String, EngineSpec> {
    use Operation::{ImgEdit, ImgToImg, SuperRes, TxtToImg, Variation};

    let mut map = IndexMap::new();
    let mut insert = |name: &str, provider: Provider, operations: &[Operation]| {
        map.insert(
            name.to_string(),
            EngineSpec {
                name: name.to_string(),
                provider,
                operations: operations.to_vec(),
            },
        );
    };

    let stability_generate = &[TxtToImg, ImgToImg];
    insert("stable-diffusion-xl-beta-v2-2-2", Provider::StabilityAi, &[TxtToImg, ImgToImg, ImgEdit]);
    insert("stable-diffusion-v1", Provider::StabilityAi, stability_generate);
    insert("stable-diffusion-v1-5", Provider::StabilityAi, stability_generate);
    insert("stable-diffusion-512-v2-0", Provider::StabilityAi, stability_generate);
    insert("stable-diffusion-768-v2-0", Provider::StabilityAi, stability_generate);
    insert("stable-diffusion-512-v2-1", Provider::StabilityAi, stability_generate);
    insert("stable-diffusion-768-v2-1", Provider::StabilityAi, stability_generate);
    insert("stable-inpainting-v1-0", Provider::StabilityAi, &[ImgEdit]);
    insert("stable-inpainting-512-v2-0", Provider::StabilityAi, &[ImgEdit]);
    insert("stable-diffusion-x4-latent-upscaler", Provider::StabilityAi, &[SuperRes]);
    insert("esrgan-v1-x2plus", Provider::StabilityAi, &[SuperRes]);
    insert("dall-e-2", Provider::OpenAi, &[TxtToImg, ImgToImg, ImgEdit, Variation]);
    insert("dall-e-3", Provider::OpenAi, &[TxtToImg]);
    insert("stabilityai/stable-diffusion-2-1", Provider::HuggingFace, &[TxtToImg]);
    insert("runwayml/stable-diffusion-v1-5", Provider::HuggingFace, &[TxtToImg]);
    map
}

use chisel_contracts::models::Operation;
use chisel_contracts::params::ParamSet;
use chisel_contracts::providers::Provider;
use serde_json::{json, Map, Value};

use super::{
    apply_call_params, expect_image_or_pair, expect_prompt, expect_prompt_image,
    expect_prompt_image_mask, ImageAdapter, OutputDescriptor, ProviderContext,
};
use crate::data::{Data, ImageRef};
use crate::error::{ChiselError, Result};
use crate::http::HttpRequest;
use crate::results::ApiResult;

pub const API_KEY_NAME: &str = "CHISEL_API_KEY_STABLE_DIFFUSION";

/// StableDiffusionAPI service, including its Dreambooth endpoints. Inputs and
/// outputs travel as URLs; the key rides in the JSON body.
pub struct StableDiffusionApiAdapter {
    ctx: ProviderContext,
    provider: Provider,
    operation: Operation,
    params: ParamSet,
    key: String,
}

impl StableDiffusionApiAdapter {
    pub fn new(ctx: ProviderContext, operation: Operation) -> Result<Self> {
        Self::build(ctx, Provider::StableDiffusionApi, operation)
    }

    pub fn dreambooth(ctx: ProviderContext, operation: Operation) -> Result<Self> {
        Self::build(ctx, Provider::Dreambooth, operation)
    }

    fn build(ctx: ProviderContext, provider: Provider, operation: Operation) -> Result<Self> {
        let params = default_params(provider, operation)
            .ok_or(ChiselError::InvalidProvider { provider, operation })?;
        let key = ctx.api_key(API_KEY_NAME)?;
        Ok(Self {
            ctx,
            provider,
            operation,
            params,
            key,
        })
    }

    pub fn endpoint(&self) -> String {
        let endpoints = self.ctx.endpoints();
        let (base, path) = match self.provider {
            Provider::Dreambooth => (endpoints.dreambooth.as_str(), dreambooth_path(self.operation)),
            _ => (endpoints.stable_diffusion_api.as_str(), sd_path(self.operation)),
        };
        if path.is_empty() {
            base.to_string()
        } else {
            format!("{base}/{path}")
        }
    }

    fn request_body(&self, input: &Data) -> Result<Map<String, Value>> {
        let name = self.name();
        let mut body = self.params.to_json();
        match self.operation {
            Operation::TxtToImg => {
                body.insert("prompt".to_string(), Value::String(expect_prompt(&name, input)?));
            }
            Operation::ImgToImg => {
                let (prompt, image) = expect_prompt_image(&name, input, true)?;
                body.insert("prompt".to_string(), Value::String(prompt));
                body.insert("init_image".to_string(), Value::String(require_url(&name, &image)?));
            }
            Operation::ImgEdit => {
                let (prompt, image, mask) = expect_prompt_image_mask(&name, input, true)?;
                body.insert("prompt".to_string(), Value::String(prompt));
                body.insert("init_image".to_string(), Value::String(require_url(&name, &image)?));
                body.insert("mask_image".to_string(), Value::String(require_url(&name, &mask)?));
            }
            Operation::SuperRes => {
                let (_, image) = expect_image_or_pair(&name, input, true)?;
                body.insert("url".to_string(), Value::String(require_url(&name, &image)?));
            }
            Operation::Variation => {
                return Err(ChiselError::InvalidProvider {
                    provider: self.provider,
                    operation: self.operation,
                })
            }
        }
        if self.provider == Provider::Dreambooth && self.params.get_str("model_id").is_none() {
            return Err(ChiselError::invalid(format!("{name} requires a 'model_id' param")));
        }
        body.insert("key".to_string(), Value::String(self.key.clone()));
        Ok(body)
    }

    fn process_response(&self, payload: Value) -> Result<ApiResult> {
        let status = payload.get("status").and_then(Value::as_str).unwrap_or_default();
        if status == "error" {
            return Err(ChiselError::Vendor {
                provider: self.provider,
                status: status.to_string(),
                message: message_text(payload.get("message")),
            });
        }
        if status == "processing" {
            tracing::warn!(
                provider = %self.provider,
                id = ?payload.get("id"),
                "job still processing, no artifacts returned"
            );
        }

        let descriptors = match payload.get("output") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(url)) => vec![OutputDescriptor::Url(url.clone())],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item.as_str() {
                    Some(url) => Some(OutputDescriptor::Url(url.to_string())),
                    None => {
                        tracing::warn!(provider = %self.provider, %item, "skipping non-string output");
                        None
                    }
                })
                .collect(),
            Some(other) => {
                return Err(ChiselError::unexpected(
                    self.provider,
                    format!("unexpected value of `output`: {other}"),
                ))
            }
        };
        self.ctx.collect(self.provider, descriptors)
    }
}

impl ImageAdapter for StableDiffusionApiAdapter {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn operation(&self) -> Operation {
        self.operation
    }

    fn params(&self) -> &ParamSet {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParamSet {
        &mut self.params
    }

    fn run(&mut self, input: Data, params: Option<&Map<String, Value>>) -> Result<ApiResult> {
        apply_call_params(self, params);
        let body = self.request_body(&input)?;
        let request = HttpRequest::post_json(self.endpoint(), Value::Object(body))
            .header("Content-Type", "application/json");
        let (_, payload) = self.ctx.send_json(self.provider, &request)?;
        self.process_response(payload)
    }
}

fn sd_path(operation: Operation) -> &'static str {
    match operation {
        Operation::TxtToImg => "text2img",
        Operation::ImgToImg => "img2img",
        Operation::ImgEdit => "inpaint",
        Operation::SuperRes => "super_resolution",
        Operation::Variation => "",
    }
}

fn dreambooth_path(operation: Operation) -> &'static str {
    match operation {
        Operation::ImgToImg => "img2img",
        Operation::ImgEdit => "inpaint",
        _ => "",
    }
}

fn require_url(adapter: &str, image: &ImageRef) -> Result<String> {
    image.as_url().map(str::to_string).ok_or_else(|| {
        ChiselError::invalid(format!(
            "{adapter} only accepts image URLs, got {}",
            image.describe()
        ))
    })
}

fn message_text(message: Option<&Value>) -> String {
    match message {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn default_params(provider: Provider, operation: Operation) -> Option<ParamSet> {
    let sd = match operation {
        Operation::TxtToImg => json!({
            "key": "",
            "prompt": "",
            "negative_prompt": null,
            "width": "512",
            "height": "512",
            "samples": "1",
            "num_inference_steps": "20",
            "seed": null,
            "guidance_scale": 7.5,
            "safety_checker": "yes",
            "multi_lingual": "no",
            "panorama": "no",
            "self_attention": "no",
            "upscale": "no",
            "embeddings_model": "embeddings_model_id",
            "webhook": null,
            "track_id": null,
        }),
        Operation::ImgToImg => json!({
            "key": "",
            "prompt": "",
            "negative_prompt": null,
            "init_image": "",
            "width": "512",
            "height": "512",
            "samples": "1",
            "num_inference_steps": "30",
            "safety_checker": "no",
            "enhance_prompt": "yes",
            "guidance_scale": 7.5,
            "strength": 0.7,
            "seed": null,
            "webhook": null,
            "track_id": null,
        }),
        Operation::ImgEdit => json!({
            "negative_prompt": null,
            "init_image": "",
            "mask_image": "",
            "width": "512",
            "height": "512",
            "samples": "1",
            "num_inference_steps": "30",
            "safety_checker": "no",
            "enhance_prompt": "yes",
            "guidance_scale": 7.5,
            "strength": 0.7,
            "seed": null,
            "webhook": null,
            "track_id": null,
        }),
        Operation::SuperRes if provider == Provider::StableDiffusionApi => json!({
            "key": "",
            "url": "",
            "scale": 2,
            "webhook": null,
            "face_enhance": false,
        }),
        _ => return None,
    };
    let Value::Object(map) = sd else {
        return None;
    };
    let mut params = ParamSet::new();
    if provider == Provider::Dreambooth {
        params.insert("model_id", Value::String(String::new()));
    }
    for (key, value) in map {
        params.insert(key, value);
    }
    Some(params)
}

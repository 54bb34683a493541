use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chisel_contracts::models::{EngineSelector, Operation};
use chisel_contracts::params::ParamSet;
use chisel_contracts::providers::Provider;
use serde_json::{json, Map, Value};

use super::{
    apply_call_params, expect_image_or_pair, expect_prompt, expect_prompt_image,
    expect_prompt_image_mask, form_fields, png_field, ImageAdapter, OutputDescriptor,
    ProviderContext,
};
use crate::data::Data;
use crate::error::{ChiselError, Result};
use crate::http::{FormValue, HttpRequest};
use crate::results::ApiResult;

pub const API_KEY_NAME: &str = "CHISEL_API_KEY_STABILITY_AI";
pub const LATENT_UPSCALER: &str = "stable-diffusion-x4-latent-upscaler";

const FILTERED: &str = "CONTENT_FILTERED";
const SAMPLERS: &[&str] = &[
    "DDIM",
    "DDPM",
    "K_DPMPP_2M",
    "K_DPMPP_2S_ANCESTRAL",
    "K_DPM_2",
    "K_DPM_2_ANCESTRAL",
    "K_EULER",
    "K_EULER_ANCESTRAL",
    "K_HEUN",
    "K_LMS",
];

/// StabilityAI REST v1 generation endpoints.
pub struct StabilityAdapter {
    ctx: ProviderContext,
    operation: Operation,
    engine: String,
    params: ParamSet,
    api_key: String,
}

impl StabilityAdapter {
    pub fn new(ctx: ProviderContext, operation: Operation) -> Result<Self> {
        Self::with_engine(ctx, operation, None)
    }

    /// Picks `engine` when given, otherwise the first registered engine for
    /// the operation.
    pub fn with_engine(ctx: ProviderContext, operation: Operation, engine: Option<&str>) -> Result<Self> {
        let params = default_params(operation).ok_or(ChiselError::InvalidProvider {
            provider: Provider::StabilityAi,
            operation,
        })?;
        let selection = EngineSelector::default()
            .select(Provider::StabilityAi, operation, engine)
            .map_err(ChiselError::InvalidArgument)?;
        let api_key = ctx.api_key(API_KEY_NAME)?;
        Ok(Self {
            ctx,
            operation,
            engine: selection.engine.name,
            params,
            api_key,
        })
    }

    pub fn engine(&self) -> &str {
        &self.engine
    }

    pub fn endpoint(&self) -> String {
        let suffix = match self.operation {
            Operation::ImgToImg => "image-to-image",
            Operation::ImgEdit => "image-to-image/masking",
            Operation::SuperRes => "image-to-image/upscale",
            _ => "text-to-image",
        };
        format!(
            "{}/v1/generation/{}/{suffix}",
            self.ctx.endpoints().stability_ai,
            self.engine
        )
    }

    fn build_request(&self, input: &Data) -> Result<HttpRequest> {
        let name = self.name();
        let request = match self.operation {
            Operation::TxtToImg => {
                let prompt = expect_prompt(&name, input)?;
                let mut body = self.generation_fields(true);
                body.insert("text_prompts".to_string(), json!([{"text": prompt, "weight": 1.0}]));
                HttpRequest::post_json(self.endpoint(), Value::Object(body))
            }
            Operation::ImgToImg => {
                let (prompt, image) = expect_prompt_image(&name, input, false)?;
                let mut fields = prompt_fields(&prompt);
                fields.push(png_field("init_image", self.ctx.load_png(&image)?));
                fields.push(text_field("init_image_mode", "STEP_SCHEDULE"));
                fields.extend(form_fields(self.generation_fields(false)));
                HttpRequest::post_multipart(self.endpoint(), fields)
            }
            Operation::ImgEdit => {
                let (prompt, image, mask) = expect_prompt_image_mask(&name, input, false)?;
                let mut fields = prompt_fields(&prompt);
                fields.push(png_field("init_image", self.ctx.load_png(&image)?));
                fields.push(png_field("mask_image", self.ctx.load_png(&mask)?));
                fields.push(text_field("mask_source", "MASK_IMAGE_BLACK"));
                fields.extend(form_fields(self.generation_fields(false)));
                HttpRequest::post_multipart(self.endpoint(), fields)
            }
            Operation::SuperRes => {
                let (input_prompt, image) = expect_image_or_pair(&name, input, false)?;
                let mut fields = vec![png_field("image", self.ctx.load_png(&image)?)];
                let mut params = Map::new();
                if let Some(width) = self.params.get("width") {
                    params.insert("width".to_string(), width.clone());
                }
                if self.engine == LATENT_UPSCALER {
                    let prompt = self
                        .params
                        .get_str("prompt")
                        .map(str::to_string)
                        .or(input_prompt);
                    if let Some(prompt) = prompt {
                        fields.extend(prompt_fields(&prompt));
                    }
                    for key in ["seed", "steps", "cfg_scale"] {
                        if let Some(value) = self.params.get(key) {
                            params.insert(key.to_string(), value.clone());
                        }
                    }
                }
                fields.extend(form_fields(params));
                HttpRequest::post_multipart(self.endpoint(), fields)
            }
            Operation::Variation => {
                return Err(ChiselError::InvalidProvider {
                    provider: Provider::StabilityAi,
                    operation: self.operation,
                })
            }
        };
        Ok(request
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json"))
    }

    /// Params for the generation endpoints, renamed to the REST field names.
    /// Unset values are omitted so the service applies its own defaults.
    fn generation_fields(&self, with_dimensions: bool) -> Map<String, Value> {
        let mut fields = Map::new();
        for (key, value) in self.params.iter() {
            if value.is_null() {
                continue;
            }
            let field = match key {
                "start_schedule" => "step_schedule_start",
                "width" | "height" if !with_dimensions => continue,
                "sampler" => {
                    if let Some(sampler) = value.as_str().and_then(normalize_sampler) {
                        fields.insert("sampler".to_string(), Value::String(sampler));
                    }
                    continue;
                }
                other => other,
            };
            fields.insert(field.to_string(), value.clone());
        }
        fields
    }

    fn process_response(&self, status: u16, payload: Value) -> Result<ApiResult> {
        if !(200..300).contains(&status) {
            let name = payload
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| status.to_string());
            let message = payload
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Err(ChiselError::Vendor {
                provider: Provider::StabilityAi,
                status: name,
                message,
            });
        }
        let Some(artifacts) = payload.get("artifacts").and_then(Value::as_array) else {
            return Err(ChiselError::unexpected(
                Provider::StabilityAi,
                "response has no `artifacts` list",
            ));
        };

        let mut descriptors = Vec::new();
        for (index, artifact) in artifacts.iter().enumerate() {
            let finish_reason = artifact
                .get("finishReason")
                .and_then(Value::as_str)
                .unwrap_or("SUCCESS");
            if finish_reason == FILTERED {
                tracing::warn!(
                    artifact = index,
                    "request activated the API's safety filters and could not be processed; modify the prompt and try again"
                );
            } else if finish_reason != "SUCCESS" {
                tracing::warn!(artifact = index, finish_reason, "skipping unfinished artifact");
                continue;
            }
            let Some(encoded) = artifact.get("base64").and_then(Value::as_str) else {
                tracing::warn!(artifact = index, "skipping artifact without image data");
                continue;
            };
            let seed = artifact
                .get("seed")
                .map(|seed| match seed {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| index.to_string());
            descriptors.push(OutputDescriptor::Inline {
                bytes: BASE64.decode(encoded)?,
                filename: Some(format!("{seed}.png")),
                ext: "png".to_string(),
            });
        }
        self.ctx.collect(Provider::StabilityAi, descriptors)
    }
}

impl ImageAdapter for StabilityAdapter {
    fn provider(&self) -> Provider {
        Provider::StabilityAi
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
        let request = self.build_request(&input)?;
        let (status, payload) = self.ctx.send_json(Provider::StabilityAi, &request)?;
        self.process_response(status, payload)
    }
}

fn default_params(operation: Operation) -> Option<ParamSet> {
    let defaults = match operation {
        Operation::TxtToImg => json!({
            "seed": null,
            "steps": 30,
            "cfg_scale": 8.0,
            "width": 512,
            "height": 512,
            "samples": 1,
            "sampler": "k_dpmpp_2m",
        }),
        Operation::ImgToImg | Operation::ImgEdit => json!({
            "seed": null,
            "steps": 30,
            "start_schedule": 1,
            "cfg_scale": 8.0,
            "width": 512,
            "height": 512,
            "samples": 1,
            "sampler": "k_dpmpp_2m",
        }),
        Operation::SuperRes => json!({
            "width": 1024,
            "prompt": null,
            "seed": null,
            "steps": 30,
            "cfg_scale": 8.0,
        }),
        Operation::Variation => return None,
    };
    match defaults {
        Value::Object(map) => Some(ParamSet::from_pairs(map)),
        _ => None,
    }
}

/// Accepts the lower-case sampler names (`k_dpmpp_2m`) as well as the REST
/// enum spelling; unknown samplers are left for the service to choose.
fn normalize_sampler(raw: &str) -> Option<String> {
    let upper = raw.trim().to_ascii_uppercase();
    if SAMPLERS.contains(&upper.as_str()) {
        return Some(upper);
    }
    tracing::debug!(sampler = raw, "unknown sampler, leaving choice to the service");
    None
}

fn prompt_fields(prompt: &str) -> Vec<(String, FormValue)> {
    vec![
        text_field("text_prompts[0][text]", prompt),
        text_field("text_prompts[0][weight]", "1"),
    ]
}

fn text_field(name: &str, value: &str) -> (String, FormValue) {
    (name.to_string(), FormValue::Text(value.to_string()))
}

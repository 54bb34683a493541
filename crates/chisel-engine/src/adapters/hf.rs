use chisel_contracts::models::{EngineSelector, Operation};
use chisel_contracts::params::ParamSet;
use chisel_contracts::providers::Provider;
use serde_json::{json, Map, Value};

use super::{
    apply_call_params, expect_prompt, ext_from_mime, read_json, ImageAdapter, OutputDescriptor,
    ProviderContext,
};
use crate::data::Data;
use crate::error::{ChiselError, Result};
use crate::http::HttpRequest;
use crate::results::ApiResult;

pub const API_KEY_NAME: &str = "HF_API_KEY";

/// Keys that shape the call itself and never reach `parameters`.
const REQUEST_KEYS: &[&str] = &["model_id", "samples"];

/// HuggingFace Inference API, text-to-image only.
pub struct HuggingFaceAdapter {
    ctx: ProviderContext,
    params: ParamSet,
    api_key: String,
}

impl HuggingFaceAdapter {
    pub fn new(ctx: ProviderContext, operation: Operation) -> Result<Self> {
        if operation != Operation::TxtToImg {
            return Err(ChiselError::InvalidProvider {
                provider: Provider::HuggingFace,
                operation,
            });
        }
        let model_id = EngineSelector::default()
            .select(Provider::HuggingFace, operation, None)
            .map(|selection| selection.engine.name)
            .map_err(ChiselError::InvalidArgument)?;
        let api_key = ctx.api_key(API_KEY_NAME)?;
        let params = ParamSet::from_pairs([
            ("model_id", Value::String(model_id)),
            ("width", json!(512)),
            ("height", json!(512)),
            ("samples", json!(1)),
            ("negative_prompt", Value::Null),
            ("num_inference_steps", Value::Null),
            ("guidance_scale", Value::Null),
        ]);
        Ok(Self {
            ctx,
            params,
            api_key,
        })
    }

    pub fn endpoint(&self) -> Result<String> {
        let model_id = self
            .params
            .get_str("model_id")
            .ok_or_else(|| ChiselError::invalid(format!("{} requires a 'model_id' param", self.name())))?;
        Ok(format!("{}/models/{model_id}", self.ctx.endpoints().hf))
    }

    fn samples(&self) -> u64 {
        let value = self.params.get("samples");
        value
            .and_then(Value::as_u64)
            .or_else(|| value.and_then(Value::as_str).and_then(|raw| raw.trim().parse().ok()))
            .unwrap_or(1)
            .max(1)
    }

    fn parameters(&self) -> Map<String, Value> {
        self.params
            .iter()
            .filter(|(key, value)| !value.is_null() && !REQUEST_KEYS.contains(key))
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    fn query(&self, request: &HttpRequest) -> Result<Vec<OutputDescriptor>> {
        let reply = self.ctx.http().send(request)?;
        if reply.is_success() && reply.is_image() {
            let ext = reply
                .content_type
                .as_deref()
                .and_then(ext_from_mime)
                .unwrap_or_else(|| "png".to_string());
            return Ok(vec![OutputDescriptor::Inline {
                bytes: reply.bytes()?,
                filename: None,
                ext,
            }]);
        }

        let (status, payload) = read_json(Provider::HuggingFace, reply)?;
        if let Some(error) = payload.get("error").filter(|error| !error.is_null()) {
            let message = match error {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            return Err(ChiselError::Vendor {
                provider: Provider::HuggingFace,
                status: status.to_string(),
                message,
            });
        }
        let Some(items) = payload.get("data").and_then(Value::as_array) else {
            tracing::warn!(status, "response carried neither an image nor a data list");
            return Ok(Vec::new());
        };
        Ok(items
            .iter()
            .filter_map(|item| item.get("url").and_then(Value::as_str))
            .map(|url| OutputDescriptor::Url(url.to_string()))
            .collect())
    }
}

impl ImageAdapter for HuggingFaceAdapter {
    fn provider(&self) -> Provider {
        Provider::HuggingFace
    }

    fn operation(&self) -> Operation {
        Operation::TxtToImg
    }

    fn params(&self) -> &ParamSet {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParamSet {
        &mut self.params
    }

    fn run(&mut self, input: Data, params: Option<&Map<String, Value>>) -> Result<ApiResult> {
        apply_call_params(self, params);
        let prompt = expect_prompt(&self.name(), &input)?;
        let endpoint = self.endpoint()?;
        let body = json!({
            "inputs": prompt,
            "parameters": Value::Object(self.parameters()),
        });
        let request = HttpRequest::post_json(endpoint, body)
            .bearer_auth(&self.api_key)
            .header("Accept", "image/png");

        let mut descriptors = Vec::new();
        for sample in 0..self.samples() {
            tracing::debug!(sample, url = %request.url, "hf inference request");
            descriptors.extend(self.query(&request)?);
        }
        self.ctx.collect(Provider::HuggingFace, descriptors)
    }
}

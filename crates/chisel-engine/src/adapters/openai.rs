use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chisel_contracts::models::Operation;
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

pub const API_KEY_NAME: &str = "OPENAI_API_KEY";

/// OpenAI Images API: generations, variations and edits.
pub struct OpenAiAdapter {
    ctx: ProviderContext,
    operation: Operation,
    params: ParamSet,
    api_key: String,
}

impl OpenAiAdapter {
    pub fn new(ctx: ProviderContext, operation: Operation) -> Result<Self> {
        let params = default_params(operation).ok_or(ChiselError::InvalidProvider {
            provider: Provider::OpenAi,
            operation,
        })?;
        let api_key = ctx.api_key(API_KEY_NAME)?;
        Ok(Self {
            ctx,
            operation,
            params,
            api_key,
        })
    }

    pub fn endpoint(&self) -> String {
        let path = match self.operation {
            Operation::ImgToImg | Operation::Variation => "images/variations",
            Operation::ImgEdit => "images/edits",
            _ => "images/generations",
        };
        format!("{}/{path}", self.ctx.endpoints().openai)
    }

    fn build_request(&self, input: &Data) -> Result<HttpRequest> {
        let name = self.name();
        let request = match self.operation {
            Operation::TxtToImg => {
                let mut body = non_null(self.params.to_json());
                body.insert("prompt".to_string(), Value::String(expect_prompt(&name, input)?));
                HttpRequest::post_json(self.endpoint(), Value::Object(body))
            }
            Operation::ImgToImg | Operation::Variation => {
                let image = if self.operation == Operation::ImgToImg {
                    let (prompt, image) = expect_prompt_image(&name, input, false)?;
                    tracing::debug!(adapter = %name, %prompt, "variations endpoint ignores the prompt");
                    image
                } else {
                    expect_image_or_pair(&name, input, false)?.1
                };
                let mut fields = vec![png_field("image", self.ctx.load_png(&image)?)];
                fields.extend(form_fields(self.params.to_json()));
                HttpRequest::post_multipart(self.endpoint(), fields)
            }
            Operation::ImgEdit => {
                let (prompt, image, mask) = expect_prompt_image_mask(&name, input, false)?;
                let mut fields = vec![
                    png_field("image", self.ctx.load_png(&image)?),
                    png_field("mask", self.ctx.load_png(&mask)?),
                    ("prompt".to_string(), FormValue::Text(prompt)),
                ];
                fields.extend(form_fields(self.params.to_json()));
                HttpRequest::post_multipart(self.endpoint(), fields)
            }
            Operation::SuperRes => {
                return Err(ChiselError::InvalidProvider {
                    provider: Provider::OpenAi,
                    operation: self.operation,
                })
            }
        };
        Ok(request.bearer_auth(&self.api_key))
    }

    fn process_response(&self, payload: Value) -> Result<ApiResult> {
        if let Some(error) = payload.get("error").filter(|error| !error.is_null()) {
            let status = error
                .get("type")
                .or_else(|| error.get("code"))
                .and_then(Value::as_str)
                .unwrap_or("error")
                .to_string();
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Err(ChiselError::Vendor {
                provider: Provider::OpenAi,
                status,
                message,
            });
        }
        let Some(items) = payload.get("data").and_then(Value::as_array) else {
            return Err(ChiselError::unexpected(
                Provider::OpenAi,
                "response has no `data` list",
            ));
        };

        let mut descriptors = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            if let Some(url) = item.get("url").and_then(Value::as_str) {
                descriptors.push(OutputDescriptor::Url(url.to_string()));
            } else if let Some(encoded) = item.get("b64_json").and_then(Value::as_str) {
                descriptors.push(OutputDescriptor::Inline {
                    bytes: BASE64.decode(encoded)?,
                    filename: None,
                    ext: "png".to_string(),
                });
            } else {
                tracing::warn!(item = index, "skipping data item without url or b64_json");
            }
        }
        self.ctx.collect(Provider::OpenAi, descriptors)
    }
}

impl ImageAdapter for OpenAiAdapter {
    fn provider(&self) -> Provider {
        Provider::OpenAi
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
        let (_, payload) = self.ctx.send_json(Provider::OpenAi, &request)?;
        self.process_response(payload)
    }
}

fn default_params(operation: Operation) -> Option<ParamSet> {
    let defaults = match operation {
        Operation::TxtToImg => json!({
            "model": "dall-e-2",
            "n": 1,
            "size": "1024x1024",
            "response_format": "url",
            "quality": null,
            "style": null,
            "user": null,
        }),
        Operation::ImgToImg | Operation::ImgEdit | Operation::Variation => json!({
            "model": "dall-e-2",
            "n": 1,
            "size": "1024x1024",
            "response_format": "url",
            "user": null,
        }),
        Operation::SuperRes => return None,
    };
    match defaults {
        Value::Object(map) => Some(ParamSet::from_pairs(map)),
        _ => None,
    }
}

fn non_null(values: Map<String, Value>) -> Map<String, Value> {
    values.into_iter().filter(|(_, value)| !value.is_null()).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chisel_contracts::models::Operation;
    use serde_json::{json, Value};

    use super::OpenAiAdapter;
    use crate::adapters::ImageAdapter;
    use crate::data::{Data, ImageRef};
    use crate::error::ChiselError;
    use crate::http::{FormValue, RequestBody};
    use crate::testing::{png_base64, test_context, write_png, FakeReply, FakeTransport};

    fn field_names(body: &RequestBody) -> Vec<String> {
        match body {
            RequestBody::Multipart(fields) => fields.iter().map(|(name, _)| name.clone()).collect(),
            _ => Vec::new(),
        }
    }

    #[test]
    fn generations_mix_urls_and_inline_images() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let transport = Arc::new(FakeTransport::scripted(vec![
            FakeReply::json(
                200,
                json!({
                    "created": 1,
                    "data": [
                        {"url": "https://files.test/img-1.png?st=2024"},
                        {"b64_json": png_base64(4, 4)},
                    ]
                }),
            ),
            FakeReply::png(4, 4),
        ]));
        let ctx = test_context(temp.path(), transport.clone());
        let mut adapter = OpenAiAdapter::new(ctx, Operation::TxtToImg)?;

        let updates = json!({"n": 2});
        let result = adapter.run(Data::from("a white siamese cat"), updates.as_object())?;

        assert_eq!(result.len(), 2);
        assert_eq!(
            result.get(0).and_then(|record| record.remote_url.as_deref()),
            Some("https://files.test/img-1.png?st=2024")
        );
        assert_eq!(result.get(1).and_then(|record| record.remote_url.as_deref()), None);

        let request = &transport.requests()[0];
        assert_eq!(request.url, "https://api.openai.com/v1/images/generations");
        assert_eq!(request.header_value("Authorization"), Some("Bearer sk-test"));
        let RequestBody::Json(Value::Object(body)) = &request.body else {
            panic!("expected JSON body");
        };
        assert_eq!(body.get("prompt"), Some(&json!("a white siamese cat")));
        assert_eq!(body.get("n"), Some(&json!(2)));
        assert!(!body.contains_key("quality"));
        Ok(())
    }

    #[test]
    fn error_object_becomes_vendor_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let transport = Arc::new(FakeTransport::scripted(vec![FakeReply::json(
            400,
            json!({"error": {"type": "invalid_request_error", "message": "Invalid size"}}),
        )]));
        let ctx = test_context(temp.path(), transport);
        let mut adapter = OpenAiAdapter::new(ctx, Operation::TxtToImg)?;

        let err = adapter.run(Data::from("a cat"), None).err();

        assert!(matches!(
            &err,
            Some(ChiselError::Vendor { status, message, .. })
                if status == "invalid_request_error" && message == "Invalid size"
        ));
        Ok(())
    }

    #[test]
    fn empty_data_list_is_empty_result() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let transport = Arc::new(FakeTransport::scripted(vec![FakeReply::json(
            200,
            json!({"created": 1, "data": []}),
        )]));
        let ctx = test_context(temp.path(), transport);
        let mut adapter = OpenAiAdapter::new(ctx, Operation::TxtToImg)?;

        assert!(adapter.run(Data::from("a cat"), None)?.is_empty());
        Ok(())
    }

    #[test]
    fn edit_sends_image_mask_and_prompt() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let image = temp.path().join("room.png");
        let mask = temp.path().join("mask.png");
        write_png(&image, 8, 8)?;
        write_png(&mask, 8, 8)?;
        let transport = Arc::new(FakeTransport::scripted(vec![FakeReply::json(
            200,
            json!({"data": [{"b64_json": png_base64(8, 8)}]}),
        )]));
        let ctx = test_context(temp.path(), transport.clone());
        let mut adapter = OpenAiAdapter::new(ctx, Operation::ImgEdit)?;

        let input = Data::List(vec![
            Data::from("add a flamingo"),
            Data::Image(ImageRef::Path(image)),
            Data::Image(ImageRef::Path(mask)),
        ]);
        let result = adapter.run(input, None)?;

        assert_eq!(result.len(), 1);
        let request = &transport.requests()[0];
        assert!(request.url.ends_with("/images/edits"));
        let names = field_names(&request.body);
        assert_eq!(&names[..3], ["image", "mask", "prompt"]);
        assert!(!names.contains(&"user".to_string()));
        let RequestBody::Multipart(fields) = &request.body else {
            panic!("expected multipart body");
        };
        assert!(matches!(
            &fields[2].1,
            FormValue::Text(prompt) if prompt == "add a flamingo"
        ));
        Ok(())
    }

    #[test]
    fn edit_rejects_two_items_without_network() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let transport = Arc::new(FakeTransport::scripted(vec![]));
        let ctx = test_context(temp.path(), transport.clone());
        let mut adapter = OpenAiAdapter::new(ctx, Operation::ImgEdit)?;

        let input = Data::List(vec![
            Data::from("add a flamingo"),
            Data::Image(ImageRef::parse("room.png")),
        ]);
        assert!(matches!(
            adapter.run(input, None),
            Err(ChiselError::InvalidArgument(_))
        ));
        assert_eq!(transport.call_count(), 0);
        Ok(())
    }

    #[test]
    fn variation_accepts_a_bare_image() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let source = temp.path().join("seed.png");
        write_png(&source, 8, 8)?;
        let transport = Arc::new(FakeTransport::scripted(vec![FakeReply::json(
            200,
            json!({"data": [{"b64_json": png_base64(8, 8)}, {"b64_json": png_base64(8, 8)}]}),
        )]));
        let ctx = test_context(temp.path(), transport.clone());
        let mut adapter = OpenAiAdapter::new(ctx, Operation::Variation)?;

        let result = adapter.run(Data::Image(ImageRef::Path(source)), None)?;

        assert_eq!(result.len(), 2);
        let request = &transport.requests()[0];
        assert!(request.url.ends_with("/images/variations"));
        assert_eq!(field_names(&request.body)[0], "image");
        Ok(())
    }

    #[test]
    fn no_super_resolution() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let ctx = test_context(temp.path(), Arc::new(FakeTransport::scripted(vec![])));
        assert!(matches!(
            OpenAiAdapter::new(ctx, Operation::SuperRes),
            Err(ChiselError::InvalidProvider { .. })
        ));
        Ok(())
    }
}

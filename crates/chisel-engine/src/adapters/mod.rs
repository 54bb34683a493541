use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chisel_contracts::models::Operation;
use chisel_contracts::params::ParamSet;
use chisel_contracts::providers::Provider;
use image::{DynamicImage, ImageFormat};
use serde_json::{Map, Value};

use crate::config::{ChiselConfig, Endpoints};
use crate::data::{Data, ImageRef};
use crate::env::EnvHandler;
use crate::error::{ChiselError, Result};
use crate::http::{FormValue, HttpReply, HttpRequest, HttpTransport, ReqwestTransport, RetryingClient};
use crate::results::ApiResult;
use crate::storage::LocalFs;

pub mod hf;
pub mod openai;
pub mod sd_api;
pub mod stability;

pub use hf::HuggingFaceAdapter;
pub use openai::OpenAiAdapter;
pub use sd_api::StableDiffusionApiAdapter;
pub use stability::StabilityAdapter;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif", "webp"];

/// One vendor operation behind a common call shape.
pub trait ImageAdapter: Send {
    fn provider(&self) -> Provider;

    fn operation(&self) -> Operation;

    fn name(&self) -> String {
        format!("{}.{}", self.provider(), self.operation())
    }

    fn params(&self) -> &ParamSet;

    fn params_mut(&mut self) -> &mut ParamSet;

    /// Merges `updates` into the defaults. Keys the adapter does not define are
    /// dropped and returned.
    fn set_params(&mut self, updates: &Map<String, Value>) -> Vec<String> {
        let dropped = self.params_mut().merge_known(updates);
        if !dropped.is_empty() {
            tracing::debug!(adapter = %self.name(), ?dropped, "ignoring unknown params");
        }
        dropped
    }

    fn run(&mut self, input: Data, params: Option<&Map<String, Value>>) -> Result<ApiResult>;
}

/// Output item extracted from a vendor response.
#[derive(Debug, Clone)]
pub enum OutputDescriptor {
    Url(String),
    Inline {
        bytes: Vec<u8>,
        filename: Option<String>,
        ext: String,
    },
}

/// Storage, HTTP client and credentials shared by every adapter.
#[derive(Clone)]
pub struct ProviderContext {
    storage: LocalFs,
    http: RetryingClient,
    endpoints: Endpoints,
    api_keys: BTreeMap<String, String>,
}

impl ProviderContext {
    pub fn from_config(config: &ChiselConfig) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new()?);
        Self::new(config, transport)
    }

    pub fn new(config: &ChiselConfig, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        Ok(Self {
            storage: LocalFs::new(&config.storage_dir)?,
            http: RetryingClient::new(transport, config.retry.clone()),
            endpoints: config.endpoints.clone(),
            api_keys: BTreeMap::new(),
        })
    }

    /// Supplies a key directly instead of reading the environment.
    pub fn with_api_key(mut self, name: &str, value: &str) -> Self {
        self.api_keys.insert(name.to_string(), value.to_string());
        self
    }

    pub fn api_key(&self, name: &str) -> Result<String> {
        match self.api_keys.get(name) {
            Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
            _ => EnvHandler::require(name),
        }
    }

    pub fn storage(&self) -> &LocalFs {
        &self.storage
    }

    pub fn http(&self) -> &RetryingClient {
        &self.http
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// GETs `url` into tmp storage. A final non-200 status is not an error:
    /// it yields `None`. The file is named after the response content type
    /// when it names an image format, else after the URL.
    pub fn download_img_from_url(&self, url: &str, filename: Option<&str>) -> Result<Option<PathBuf>> {
        let reply = self.http.send(&HttpRequest::get(url))?;
        if reply.status != 200 {
            tracing::warn!(%url, status = reply.status, "download produced no artifact");
            return Ok(None);
        }
        let ext = reply
            .content_type
            .as_deref()
            .and_then(ext_from_mime)
            .or_else(|| ext_from_url(url))
            .unwrap_or_else(|| "png".to_string());
        let mut reader = reply.into_reader();
        let path = self.storage.stream_to_tmp(&mut reader, filename, Some(&ext))?;
        Ok(Some(path))
    }

    /// PNG bytes for an image input, downloading remote inputs first.
    pub fn load_png(&self, image: &ImageRef) -> Result<Vec<u8>> {
        match image {
            ImageRef::Decoded(decoded) => encode_png(decoded),
            ImageRef::Path(path) => read_as_png(path),
            ImageRef::Url(url) => {
                let path = self.download_img_from_url(url, None)?.ok_or_else(|| {
                    ChiselError::invalid(format!("could not download input image {url}"))
                })?;
                read_as_png(&path)
            }
        }
    }

    /// Sends a request and parses the body as JSON whatever the status; the
    /// status is returned alongside so vendors can map their error payloads.
    pub fn send_json(&self, provider: Provider, request: &HttpRequest) -> Result<(u16, Value)> {
        tracing::debug!(%provider, url = %request.url, "vendor request");
        let reply = self.http.send(request)?;
        read_json(provider, reply)
    }

    /// Materializes descriptors into an `ApiResult`. Items that are not
    /// images, or whose download produced nothing, are skipped.
    pub fn collect(&self, provider: Provider, descriptors: Vec<OutputDescriptor>) -> Result<ApiResult> {
        let mut api_result = ApiResult::new();
        for descriptor in descriptors {
            match descriptor {
                OutputDescriptor::Url(url) => {
                    if !is_img(&url) {
                        tracing::warn!(%provider, %url, "skipping non-image output");
                        continue;
                    }
                    let Some(local_path) = self.download_img_from_url(&url, None)? else {
                        continue;
                    };
                    api_result.add(local_path, Some(url))?;
                }
                OutputDescriptor::Inline {
                    bytes,
                    filename,
                    ext,
                } => {
                    let local_path =
                        self.storage
                            .write_to_tmp(&bytes, filename.as_deref(), Some(&ext))?;
                    api_result.add(local_path, None)?;
                }
            }
        }
        tracing::debug!(%provider, count = api_result.len(), "normalized vendor output");
        Ok(api_result)
    }
}

pub(crate) fn read_json(provider: Provider, reply: HttpReply) -> Result<(u16, Value)> {
    let status = reply.status;
    let bytes = reply.bytes()?;
    let payload = serde_json::from_slice(&bytes).map_err(|_| {
        ChiselError::unexpected(
            provider,
            format!(
                "status {status} with non-JSON body: {}",
                truncate_text(&String::from_utf8_lossy(&bytes), 256)
            ),
        )
    })?;
    Ok((status, payload))
}

pub fn is_img(name: &str) -> bool {
    ext_from_url(name)
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Lowercased extension of the last path segment, ignoring query and fragment.
pub fn ext_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let segment = path.rsplit('/').next().unwrap_or_default();
    Path::new(segment)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .filter(|ext| !ext.is_empty())
}

pub fn ext_from_mime(mime: &str) -> Option<String> {
    let lowered = mime.to_ascii_lowercase();
    let ext = if lowered.contains("jpeg") || lowered.contains("jpg") {
        "jpg"
    } else if lowered.contains("png") {
        "png"
    } else if lowered.contains("webp") {
        "webp"
    } else if lowered.contains("gif") {
        "gif"
    } else if lowered.contains("bmp") {
        "bmp"
    } else {
        return None;
    };
    Some(ext.to_string())
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

fn read_as_png(path: &Path) -> Result<Vec<u8>> {
    if ImageFormat::from_path(path).ok() == Some(ImageFormat::Png) {
        return Ok(std::fs::read(path)?);
    }
    let decoded = image::open(path).map_err(|source| ChiselError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    encode_png(&decoded)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn expect_prompt(adapter: &str, input: &Data) -> Result<String> {
    input
        .as_text()
        .map(str::to_string)
        .ok_or_else(|| {
            ChiselError::invalid(format!(
                "{adapter} expects a prompt string, got {}",
                input.kind_name()
            ))
        })
}

fn expect_items<'a>(adapter: &str, input: &'a Data, shape: &str, len: usize) -> Result<&'a [Data]> {
    match input {
        Data::List(items) if items.len() == len => Ok(items.as_slice()),
        Data::List(items) => Err(ChiselError::invalid(format!(
            "{adapter} expects {shape}, got a list of {}",
            items.len()
        ))),
        other => Err(ChiselError::invalid(format!(
            "{adapter} expects {shape}, got {}",
            other.kind_name()
        ))),
    }
}

fn image_item(adapter: &str, item: &Data, slot: &str, prefer_remote: bool) -> Result<ImageRef> {
    item.to_image_ref(prefer_remote).ok_or_else(|| {
        ChiselError::invalid(format!(
            "{adapter} expects an image for '{slot}', got {}",
            item.kind_name()
        ))
    })
}

fn prompt_item(adapter: &str, item: &Data) -> Result<String> {
    item.as_text().map(str::to_string).ok_or_else(|| {
        ChiselError::invalid(format!(
            "{adapter} expects a prompt string first, got {}",
            item.kind_name()
        ))
    })
}

pub(crate) fn expect_prompt_image(
    adapter: &str,
    input: &Data,
    prefer_remote: bool,
) -> Result<(String, ImageRef)> {
    let items = expect_items(adapter, input, "[prompt, image]", 2)?;
    Ok((
        prompt_item(adapter, &items[0])?,
        image_item(adapter, &items[1], "image", prefer_remote)?,
    ))
}

pub(crate) fn expect_prompt_image_mask(
    adapter: &str,
    input: &Data,
    prefer_remote: bool,
) -> Result<(String, ImageRef, ImageRef)> {
    let items = expect_items(adapter, input, "[prompt, image, mask]", 3)?;
    Ok((
        prompt_item(adapter, &items[0])?,
        image_item(adapter, &items[1], "image", prefer_remote)?,
        image_item(adapter, &items[2], "mask", prefer_remote)?,
    ))
}

/// An image alone or a `[prompt, image]` pair.
pub(crate) fn expect_image_or_pair(
    adapter: &str,
    input: &Data,
    prefer_remote: bool,
) -> Result<(Option<String>, ImageRef)> {
    if let Data::List(_) = input {
        let (prompt, image) = expect_prompt_image(adapter, input, prefer_remote)?;
        return Ok((Some(prompt), image));
    }
    Ok((None, image_item(adapter, input, "image", prefer_remote)?))
}

/// Extracts an optional call-time override map and merges it.
pub(crate) fn apply_call_params<A: ImageAdapter + ?Sized>(
    adapter: &mut A,
    params: Option<&Map<String, Value>>,
) {
    if let Some(updates) = params {
        adapter.set_params(updates);
    }
}

/// Multipart file part carrying PNG bytes, named after the field.
pub(crate) fn png_field(name: &str, bytes: Vec<u8>) -> (String, FormValue) {
    (
        name.to_string(),
        FormValue::File {
            bytes,
            filename: format!("{name}.png"),
            mime: "image/png".to_string(),
        },
    )
}

/// Text parts for every non-null param; strings go verbatim, other values as JSON.
pub(crate) fn form_fields(values: Map<String, Value>) -> Vec<(String, FormValue)> {
    values
        .into_iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| {
            let text = match value {
                Value::String(text) => text,
                other => other.to_string(),
            };
            (key, FormValue::Text(text))
        })
        .collect()
}

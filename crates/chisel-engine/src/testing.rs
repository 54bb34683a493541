use std::collections::VecDeque;
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::Value;

use crate::adapters::ProviderContext;
use crate::config::ChiselConfig;
use crate::error::{ChiselError, Result};
use crate::http::{HttpReply, HttpRequest, HttpTransport, RetryPolicy};

#[derive(Debug, Clone)]
pub(crate) struct FakeReply {
    status: u16,
    content_type: Option<String>,
    body: Vec<u8>,
}

impl FakeReply {
    pub(crate) fn status(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            body: Vec::new(),
        }
    }

    pub(crate) fn json(status: u16, payload: Value) -> Self {
        Self {
            status,
            content_type: Some("application/json".to_string()),
            body: serde_json::to_vec(&payload).unwrap_or_default(),
        }
    }

    pub(crate) fn png(width: u32, height: u32) -> Self {
        Self {
            status: 200,
            content_type: Some("image/png".to_string()),
            body: png_bytes(width, height),
        }
    }
}

/// Scripted transport that records every request it sees.
pub(crate) struct FakeTransport {
    script: Mutex<VecDeque<FakeReply>>,
    fallback: Option<FakeReply>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeTransport {
    pub(crate) fn scripted(replies: Vec<FakeReply>) -> Self {
        Self {
            script: Mutex::new(replies.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn repeating(reply: FakeReply) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(reply),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn call_count(&self) -> usize {
        self.requests.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }
}

impl HttpTransport for FakeTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpReply> {
        if let Ok(mut rows) = self.requests.lock() {
            rows.push(request.clone());
        }
        let next = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .or_else(|| self.fallback.clone());
        let Some(reply) = next else {
            return Err(ChiselError::Io(std::io::Error::other(format!(
                "no scripted reply for {}",
                request.url
            ))));
        };
        Ok(HttpReply::new(
            reply.status,
            reply.content_type,
            Cursor::new(reply.body),
        ))
    }
}

pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut image = RgbImage::new(width, height);
    for pixel in image.pixels_mut() {
        *pixel = Rgb([40, 90, 160]);
    }
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut buf, ImageFormat::Png)
        .map(|_| buf.into_inner())
        .unwrap_or_default()
}

pub(crate) fn png_base64(width: u32, height: u32) -> String {
    BASE64.encode(png_bytes(width, height))
}

pub(crate) fn write_png(path: &Path, width: u32, height: u32) -> Result<()> {
    std::fs::write(path, png_bytes(width, height))?;
    Ok(())
}

/// Context over a temp storage dir with every vendor key preset.
pub(crate) fn test_context(storage_dir: &Path, transport: Arc<FakeTransport>) -> ProviderContext {
    let config = ChiselConfig::default()
        .with_storage_dir(storage_dir)
        .with_retry(RetryPolicy::default().with_backoff(std::time::Duration::ZERO));
    ProviderContext::new(&config, transport)
        .map(|ctx| {
            ctx.with_api_key("OPENAI_API_KEY", "sk-test")
                .with_api_key("CHISEL_API_KEY_STABILITY_AI", "stability-test")
                .with_api_key("CHISEL_API_KEY_STABLE_DIFFUSION", "sd-test")
                .with_api_key("HF_API_KEY", "hf-test")
        })
        .unwrap_or_else(|err| panic!("test context: {err}"))
}

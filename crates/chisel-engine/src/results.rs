use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageReader};

use crate::data::ImageRef;
use crate::error::{ChiselError, Result};

#[derive(Debug, Clone)]
pub struct ResultRecord {
    pub local_path: PathBuf,
    pub remote_url: Option<String>,
    pub image: DynamicImage,
}

impl ResultRecord {
    pub fn image_ref(&self) -> ImageRef {
        ImageRef::Path(self.local_path.clone())
    }
}

/// Normalized artifacts from one adapter run, in vendor order.
#[derive(Debug, Clone, Default)]
pub struct ApiResult {
    records: Vec<ResultRecord>,
}

impl ApiResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record, decoding the image now so a truncated download fails
    /// here rather than at first use. The format is sniffed from the bytes;
    /// the file extension is only a fallback.
    pub fn add(&mut self, local_path: impl AsRef<Path>, remote_url: Option<String>) -> Result<()> {
        let local_path = local_path.as_ref().to_path_buf();
        let image = decode_file(&local_path).map_err(|source| ChiselError::Decode {
            path: local_path.clone(),
            source,
        })?;
        self.records.push(ResultRecord {
            local_path,
            remote_url,
            image,
        });
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&ResultRecord> {
        self.records.get(index)
    }

    pub fn get_image(&self, index: usize) -> Option<&DynamicImage> {
        self.records.get(index).map(|record| &record.image)
    }

    /// Chaining handle for the first record: its remote URL when
    /// `prefer_remote` is set and one exists, else its local path.
    pub fn first_image_ref(&self, prefer_remote: bool) -> Option<ImageRef> {
        let record = self.records.first()?;
        match (&record.remote_url, prefer_remote) {
            (Some(url), true) => Some(ImageRef::Url(url.clone())),
            _ => Some(record.image_ref()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResultRecord> {
        self.records.iter()
    }

    pub fn local_paths(&self) -> Vec<&Path> {
        self.records
            .iter()
            .map(|record| record.local_path.as_path())
            .collect()
    }
}

impl IntoIterator for ApiResult {
    type Item = ResultRecord;
    type IntoIter = std::vec::IntoIter<ResultRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a ApiResult {
    type Item = &'a ResultRecord;
    type IntoIter = std::slice::Iter<'a, ResultRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

fn decode_file(path: &Path) -> image::ImageResult<DynamicImage> {
    ImageReader::open(path)?.with_guessed_format()?.decode()
}

use std::env;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use rand::Rng;

use crate::error::{ChiselError, Result};

const RANDOM_NAME_LEN: usize = 20;
const RANDOM_NAME_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const STREAM_CHUNK_SIZE: usize = 4096;

/// Local artifact store rooted at `<storage_dir>/tmp`.
#[derive(Debug, Clone)]
pub struct LocalFs {
    tmp_storage: PathBuf,
}

impl LocalFs {
    pub fn new(storage_dir: impl AsRef<Path>) -> Result<Self> {
        let storage_dir = expand_home(storage_dir.as_ref());
        let tmp_storage = storage_dir.join("tmp");
        fs::create_dir_all(&tmp_storage)?;
        Ok(Self { tmp_storage })
    }

    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_storage
    }

    pub fn write_to_tmp(
        &self,
        bytes: &[u8],
        filename: Option<&str>,
        ext: Option<&str>,
    ) -> Result<PathBuf> {
        let full_path = self.resolve_tmp_path(filename, ext)?;
        fs::write(&full_path, bytes)?;
        tracing::debug!(path = %full_path.display(), bytes = bytes.len(), "wrote artifact");
        Ok(full_path)
    }

    /// Encodes `image` using the format implied by the final extension, PNG
    /// when there is none.
    pub fn write_image_to_tmp(
        &self,
        image: &DynamicImage,
        filename: Option<&str>,
        ext: Option<&str>,
    ) -> Result<PathBuf> {
        let full_path = self.resolve_tmp_path(filename, ext.or(Some("png")))?;
        let format = ImageFormat::from_path(&full_path).unwrap_or(ImageFormat::Png);
        image.save_with_format(&full_path, format)?;
        tracing::debug!(path = %full_path.display(), "wrote image artifact");
        Ok(full_path)
    }

    pub fn stream_to_tmp(
        &self,
        reader: &mut dyn Read,
        filename: Option<&str>,
        ext: Option<&str>,
    ) -> Result<PathBuf> {
        let full_path = self.resolve_tmp_path(filename, ext)?;
        match copy_to_file(reader, &full_path) {
            Ok(total) => {
                tracing::debug!(path = %full_path.display(), bytes = total, "streamed artifact");
                Ok(full_path)
            }
            Err(err) => {
                if let Err(remove_err) = fs::remove_file(&full_path) {
                    tracing::warn!(path = %full_path.display(), error = %remove_err, "error deleting partial artifact");
                }
                Err(err)
            }
        }
    }

    pub fn random_tmp_filename(ext: Option<&str>) -> Result<String> {
        let ext = ext
            .map(|value| value.trim().trim_start_matches('.'))
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                ChiselError::invalid("to create a random tmp filename, an extension must be given")
            })?;
        let mut rng = rand::thread_rng();
        let stem: String = (0..RANDOM_NAME_LEN)
            .map(|_| RANDOM_NAME_CHARSET[rng.gen_range(0..RANDOM_NAME_CHARSET.len())] as char)
            .collect();
        Ok(format!("{stem}.{ext}"))
    }

    /// Deletes every regular file directly under the tmp dir. Failures are
    /// logged and skipped; the count of removed files is returned.
    pub fn cleanup_tmp_storage(&self) -> usize {
        let entries = match fs::read_dir(&self.tmp_storage) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(dir = %self.tmp_storage.display(), error = %err, "cannot list tmp storage");
                return 0;
            }
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "deleted");
                    removed += 1;
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "error deleting");
                }
            }
        }
        removed
    }

    fn resolve_tmp_path(&self, filename: Option<&str>, ext: Option<&str>) -> Result<PathBuf> {
        let name = match filename.map(str::trim).filter(|value| !value.is_empty()) {
            Some(name) => {
                let name = Path::new(name)
                    .file_name()
                    .ok_or_else(|| ChiselError::invalid(format!("invalid filename '{name}'")))?;
                name.to_string_lossy().into_owned()
            }
            None => Self::random_tmp_filename(ext)?,
        };
        Ok(self.tmp_storage.join(name))
    }
}

fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}

fn copy_to_file(reader: &mut dyn Read, path: &Path) -> Result<usize> {
    let mut out = BufWriter::new(File::create(path)?);
    let mut chunk = [0u8; STREAM_CHUNK_SIZE];
    let mut total = 0usize;
    loop {
        let read = reader.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        out.write_all(&chunk[..read])?;
        total += read;
    }
    out.flush()?;
    Ok(total)
}

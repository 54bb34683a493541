use std::path::PathBuf;

use image::DynamicImage;

use crate::results::ApiResult;

#[derive(Debug, Clone)]
pub enum ImageRef {
    Path(PathBuf),
    Url(String),
    Decoded(DynamicImage),
}

impl ImageRef {
    /// `http(s)://` strings become URLs, anything else a local path.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            ImageRef::Url(trimmed.to_string())
        } else {
            ImageRef::Path(PathBuf::from(trimmed))
        }
    }

    pub fn as_url(&self) -> Option<&str> {
        match self {
            ImageRef::Url(url) => Some(url.as_str()),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ImageRef::Path(path) => path.display().to_string(),
            ImageRef::Url(url) => url.clone(),
            ImageRef::Decoded(image) => format!("<{}x{} image>", image.width(), image.height()),
        }
    }
}

/// Value passed into an op and between pipeline stages.
#[derive(Debug, Clone)]
pub enum Data {
    Text(String),
    Image(ImageRef),
    List(Vec<Data>),
    Result(ApiResult),
}

impl Data {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Data::Text(_) => "text",
            Data::Image(_) => "image",
            Data::List(_) => "list",
            Data::Result(_) => "result",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Data::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn as_result(&self) -> Option<&ApiResult> {
        match self {
            Data::Result(result) => Some(result),
            _ => None,
        }
    }

    /// Image view of this value. A result contributes its first record,
    /// as its remote URL when `prefer_remote` is set and one exists.
    pub fn to_image_ref(&self, prefer_remote: bool) -> Option<ImageRef> {
        match self {
            Data::Image(image) => Some(image.clone()),
            Data::Result(result) => result.first_image_ref(prefer_remote),
            Data::Text(_) | Data::List(_) => None,
        }
    }
}

impl From<&str> for Data {
    fn from(value: &str) -> Self {
        Data::Text(value.to_string())
    }
}

impl From<String> for Data {
    fn from(value: String) -> Self {
        Data::Text(value)
    }
}

impl From<ImageRef> for Data {
    fn from(value: ImageRef) -> Self {
        Data::Image(value)
    }
}

impl From<ApiResult> for Data {
    fn from(value: ApiResult) -> Self {
        Data::Result(value)
    }
}

impl From<Vec<Data>> for Data {
    fn from(value: Vec<Data>) -> Self {
        Data::List(value)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{Data, ImageRef};
    use crate::results::ApiResult;
    use crate::testing::write_png;

    #[test]
    fn parse_splits_urls_from_paths() {
        assert_eq!(
            ImageRef::parse(" https://cdn.test/a.png ").as_url(),
            Some("https://cdn.test/a.png")
        );
        assert!(matches!(
            ImageRef::parse("./out/a.png"),
            ImageRef::Path(path) if path == PathBuf::from("./out/a.png")
        ));
    }

    #[test]
    fn result_resolves_to_first_record() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("a.png");
        write_png(&path, 4, 4)?;
        let mut result = ApiResult::new();
        result.add(&path, Some("https://cdn.test/a.png".to_string()))?;
        let data = Data::from(result);

        assert!(matches!(
            data.to_image_ref(true),
            Some(ImageRef::Url(url)) if url == "https://cdn.test/a.png"
        ));
        assert!(matches!(
            data.to_image_ref(false),
            Some(ImageRef::Path(local)) if local == path
        ));
        Ok(())
    }

    #[test]
    fn empty_result_and_text_have_no_image() {
        assert!(Data::from(ApiResult::new()).to_image_ref(true).is_none());
        assert!(Data::from("a cat").to_image_ref(false).is_none());
        assert_eq!(Data::from(vec![Data::from("a")]).kind_name(), "list");
    }
}

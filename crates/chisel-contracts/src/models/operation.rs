use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Text,
    Image,
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataKind::Text => f.write_str("text"),
            DataKind::Image => f.write_str("image"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    TxtToImg,
    ImgToImg,
    ImgEdit,
    SuperRes,
    Variation,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::TxtToImg,
        Operation::ImgToImg,
        Operation::ImgEdit,
        Operation::SuperRes,
        Operation::Variation,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Operation::TxtToImg => "txt_to_img",
            Operation::ImgToImg => "img_to_img",
            Operation::ImgEdit => "img_edit",
            Operation::SuperRes => "super_res",
            Operation::Variation => "variation",
        }
    }

    pub fn input_kind(self) -> DataKind {
        match self {
            Operation::TxtToImg => DataKind::Text,
            _ => DataKind::Image,
        }
    }

    pub fn output_kind(self) -> DataKind {
        DataKind::Image
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        let found = match normalized.as_str() {
            "txt2img" | "text2img" => Some(Operation::TxtToImg),
            "img2img" => Some(Operation::ImgToImg),
            "edit" | "inpaint" => Some(Operation::ImgEdit),
            "upscale" | "super_resolution" => Some(Operation::SuperRes),
            other => Self::ALL.into_iter().find(|op| op.id() == other),
        };
        found.ok_or_else(|| format!("Unknown operation '{}'.", raw.trim()))
    }
}

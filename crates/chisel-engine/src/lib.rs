pub mod adapters;
pub mod config;
pub mod data;
pub mod env;
pub mod error;
pub mod flow;
pub mod http;
pub mod ops;
pub mod results;
pub mod storage;

#[cfg(test)]
mod testing;

pub use adapters::{ImageAdapter, ProviderContext};
pub use config::ChiselConfig;
pub use data::{Data, ImageRef};
pub use error::{ChiselError, Result};
pub use flow::{FnStage, LinearFlow};
pub use ops::{ImgEdit, ImgToImg, Op, Stage, SuperResolution, TxtToImg};
pub use results::{ApiResult, ResultRecord};
pub use storage::LocalFs;

#[cfg(feature = "accelerate")]
extern crate accelerate_src;
#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

mod device;
mod model_source;
mod progress;
mod tokenizer;
mod tokens;

pub use candle_core as core;
pub use candle_nn as nn;

pub use device::{DeviceError, DeviceSelection};
pub use model_source::*;
pub use progress::NiceProgressBar;
pub use tokenizer::{load_clip_tokenizer, ClipTokenizer};
pub use tokens::get_token;
pub use tokens::TokenSource;

//! Core crate of sdxl_rs: two-stage SDXL text-to-image generation.
//!
//! A base model denoises from pure noise for the first `high_noise_frac` of the schedule and a
//! refiner model finishes the remaining steps. Both stages share one seeded random source, so a
//! configuration always reproduces the same image.
//!
//! ```rust,no_run
//! use sdxl_rs_core::{
//!     DeviceSelection, GenerationConfig, ModelDType, ModelSource, Pipeline, PromptPolicy,
//!     TokenSource, BASE_MODEL_ID, REFINER_MODEL_ID,
//! };
//!
//! let config = GenerationConfig::from_env(PromptPolicy::PassThrough)?;
//!
//! let mut pipeline = Pipeline::load(
//!     ModelSource::from_model_id(BASE_MODEL_ID),
//!     ModelSource::from_model_id(REFINER_MODEL_ID),
//!     false,
//!     TokenSource::CacheToken,
//!     None,
//!     &DeviceSelection::Accelerator,
//!     &ModelDType::F16,
//! )?;
//!
//! let path = pipeline.generate(&config)?;
//! println!("Generated image saved at: {}", path.display());
//!
//! # Ok::<(), anyhow::Error>(())
//! ```

mod config;
mod models;
mod output;
mod pipelines;
mod util;

pub use config::{
    ConfigError, GenerationConfig, PromptPolicy, DEFAULT_GUIDANCE_SCALE, DEFAULT_HIGH_NOISE_FRAC,
    DEFAULT_NUM_STEPS, DEFAULT_OUTPUT_DIR, DEFAULT_SEED, DEFAULT_SIZE, NEGATIVE_PROMPT_VAR,
    PROMPT_VAR,
};
pub use output::{OutputLocation, TIMESTAMP_FORMAT};
pub use pipelines::{
    split_timesteps, BaseStage, ComponentName, RefinerStage, SdxlBase, SdxlLatents, SdxlRefiner,
    StageRequest, TwoStagePipeline, BASE_MODEL_ID, REFINER_MODEL_ID, TRAIN_TIMESTEPS,
};
pub use sdxl_rs_common::{DeviceError, DeviceSelection, ModelSource, TokenSource};
pub use util::{ModelDType, TryIntoDType};

/// The SDXL base + refiner pipeline.
pub type Pipeline = TwoStagePipeline<SdxlBase, SdxlRefiner>;

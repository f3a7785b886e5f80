use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, warn};

use crate::pipelines::TRAIN_TIMESTEPS;

/// Environment variable holding the positive prompt.
pub const PROMPT_VAR: &str = "PROMPT_AVA";
/// Environment variable holding the negative prompt.
pub const NEGATIVE_PROMPT_VAR: &str = "NEGATIVE_PROMPT";

pub const DEFAULT_NUM_STEPS: usize = 100;
pub const DEFAULT_HIGH_NOISE_FRAC: f64 = 0.8;
pub const DEFAULT_SEED: u64 = 987654321;
pub const DEFAULT_GUIDANCE_SCALE: f64 = 5.0;
pub const DEFAULT_SIZE: usize = 1024;
pub const DEFAULT_OUTPUT_DIR: &str = "images_generated";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("`{0}` is not set and a prompt is required")]
    MissingPrompt(&'static str),
    #[error("the split fraction must lie in [0, 1], got {0}")]
    InvalidSplit(f64),
    #[error("the number of denoising steps must be nonzero")]
    ZeroSteps,
    #[error("the number of denoising steps ({steps}) cannot exceed the {max} training timesteps")]
    TooManySteps { steps: usize, max: usize },
    #[error("{name} must be a nonzero multiple of 8, got {value}")]
    InvalidDimension { name: &'static str, value: usize },
}

/// What to do when the prompt variable is absent from the environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum PromptPolicy {
    /// Use an empty prompt and keep going.
    #[default]
    PassThrough,
    /// Fail with [`ConfigError::MissingPrompt`].
    Require,
}

/// Everything a single run needs. Read once at startup and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub prompt: String,
    pub negative_prompt: String,
    /// Total denoising steps, shared by the base and refiner schedules.
    pub num_steps: usize,
    /// Fraction of the schedule run by the base stage; the refiner resumes from the same point.
    pub high_noise_frac: f64,
    pub seed: u64,
    /// Classifier-free guidance scale. Values `<= 1` disable the unconditional pass.
    pub guidance_scale: f64,
    pub height: usize,
    pub width: usize,
    pub output_dir: PathBuf,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            negative_prompt: String::new(),
            num_steps: DEFAULT_NUM_STEPS,
            high_noise_frac: DEFAULT_HIGH_NOISE_FRAC,
            seed: DEFAULT_SEED,
            guidance_scale: DEFAULT_GUIDANCE_SCALE,
            height: DEFAULT_SIZE,
            width: DEFAULT_SIZE,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }
}

impl GenerationConfig {
    /// Read the prompts from the process environment, after loading `./.env` if there is one.
    pub fn from_env(policy: PromptPolicy) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => debug!("loaded environment from {}", path.display()),
            Err(e) if e.not_found() => (),
            Err(e) => warn!("ignoring unreadable .env file: {e}"),
        }
        Self::from_lookup(|name| std::env::var(name).ok(), policy)
    }

    /// Build the configuration from an arbitrary variable lookup. All other fields keep their defaults.
    pub fn from_lookup<F>(lookup: F, policy: PromptPolicy) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let prompt = match (lookup(PROMPT_VAR), policy) {
            (Some(prompt), _) => prompt,
            (None, PromptPolicy::Require) => return Err(ConfigError::MissingPrompt(PROMPT_VAR)),
            (None, PromptPolicy::PassThrough) => {
                warn!("`{PROMPT_VAR}` is not set, generating with an empty prompt.");
                String::new()
            }
        };
        let negative_prompt = lookup(NEGATIVE_PROMPT_VAR).unwrap_or_default();

        Ok(Self {
            prompt,
            negative_prompt,
            ..Default::default()
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_steps == 0 {
            return Err(ConfigError::ZeroSteps);
        }
        if self.num_steps > TRAIN_TIMESTEPS {
            return Err(ConfigError::TooManySteps {
                steps: self.num_steps,
                max: TRAIN_TIMESTEPS,
            });
        }
        if !(0.0..=1.0).contains(&self.high_noise_frac) {
            return Err(ConfigError::InvalidSplit(self.high_noise_frac));
        }
        for (name, value) in [("height", self.height), ("width", self.width)] {
            if value == 0 || value % 8 != 0 {
                return Err(ConfigError::InvalidDimension { name, value });
            }
        }
        Ok(())
    }
}

use std::{path::PathBuf, time::Instant};

use clap::Parser;
use sdxl_rs_core::{
    DeviceSelection, GenerationConfig, ModelDType, ModelSource, OutputLocation, Pipeline,
    PromptPolicy, TokenSource, BASE_MODEL_ID, DEFAULT_GUIDANCE_SCALE, DEFAULT_HIGH_NOISE_FRAC,
    DEFAULT_NUM_STEPS, DEFAULT_OUTPUT_DIR, DEFAULT_SEED, DEFAULT_SIZE, REFINER_MODEL_ID,
};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

/// Generate one image with the SDXL base + refiner pipeline.
///
/// The prompt is read from `PROMPT_AVA` and the negative prompt from `NEGATIVE_PROMPT`, either in
/// the environment or in a `.env` file in the working directory.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Base model: local path or Hugging Face model ID.
    #[arg(long, default_value = BASE_MODEL_ID)]
    base_model_id: String,

    /// Refiner model: local path or Hugging Face model ID.
    #[arg(long, default_value = REFINER_MODEL_ID)]
    refiner_model_id: String,

    /// Hugging Face token source: `literal:<token>`, `env[:<VAR>]`, `path:<file>`, `cache` or `none`.
    /// By default, the Hugging Face token at ~/.cache/huggingface/token is used.
    #[arg(long, default_value_t = TokenSource::CacheToken)]
    token: TokenSource,

    /// Hugging Face revision used for both models.
    #[arg(long)]
    revision: Option<String>,

    /// Total number of denoising steps, shared by both stages.
    #[arg(short, long, default_value_t = DEFAULT_NUM_STEPS)]
    num_steps: usize,

    /// Fraction of the schedule run by the base model before the refiner takes over.
    #[arg(long, default_value_t = DEFAULT_HIGH_NOISE_FRAC)]
    high_noise_frac: f64,

    /// Seed of the random source shared by both stages.
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,

    /// Classifier-free guidance scale. Values <= 1 disable guidance.
    #[arg(short, long, default_value_t = DEFAULT_GUIDANCE_SCALE)]
    scale: f64,

    /// Image height in pixels, a nonzero multiple of 8.
    #[arg(long, default_value_t = DEFAULT_SIZE)]
    height: usize,

    /// Image width in pixels, a nonzero multiple of 8.
    #[arg(long, default_value_t = DEFAULT_SIZE)]
    width: usize,

    /// Directory the image is written into. Created if missing.
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// `cpu`, `accelerator` (CUDA or Metal, else CPU) or `accelerator:<id>`.
    #[arg(long, default_value_t = DeviceSelection::Accelerator)]
    device: DeviceSelection,

    /// Precision of the model weights and activations. The VAE always runs in f32.
    #[arg(long, value_enum, default_value_t = ModelDType::F16)]
    dtype: ModelDType,

    /// Fail instead of generating with an empty prompt when `PROMPT_AVA` is unset.
    #[arg(long)]
    require_prompt: bool,

    /// Hide progress bars.
    #[arg(long)]
    silent: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let policy = if args.require_prompt {
        PromptPolicy::Require
    } else {
        PromptPolicy::PassThrough
    };
    let config = GenerationConfig {
        num_steps: args.num_steps,
        high_noise_frac: args.high_noise_frac,
        seed: args.seed,
        guidance_scale: args.scale,
        height: args.height,
        width: args.width,
        output_dir: args.output_dir,
        ..GenerationConfig::from_env(policy)?
    };
    config.validate()?;

    // The file name is fixed before the models load, so it records when the run started.
    let output = OutputLocation::prepare(&config.output_dir)?;
    let path = output.image_path_now();

    let start = Instant::now();
    let mut pipeline = Pipeline::load(
        ModelSource::from_model_id(args.base_model_id),
        ModelSource::from_model_id(args.refiner_model_id),
        args.silent,
        args.token,
        args.revision,
        &args.device,
        &args.dtype,
    )?;
    info!("loading took: {:.2}s", start.elapsed().as_secs_f32());

    let start = Instant::now();
    pipeline.generate_to(&config, &path)?;
    info!("image generation took: {:.2}s", start.elapsed().as_secs_f32());

    println!("Generated image saved at: {}", path.display());
    Ok(())
}

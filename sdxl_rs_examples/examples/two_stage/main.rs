use std::time::Instant;

use sdxl_rs_core::{
    DeviceSelection, GenerationConfig, ModelDType, ModelSource, Pipeline, TokenSource,
    BASE_MODEL_ID, REFINER_MODEL_ID,
};

use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Args {
    /// Prompt to use
    #[arg(short, long)]
    prompt: String,

    /// Negative prompt to use
    #[arg(short, long, default_value = "")]
    negative_prompt: String,

    /// Fraction of the schedule handled by the base model
    #[arg(long, default_value_t = 0.8)]
    high_noise_frac: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut pipeline = Pipeline::load(
        ModelSource::from_model_id(BASE_MODEL_ID),
        ModelSource::from_model_id(REFINER_MODEL_ID),
        false,
        TokenSource::CacheToken,
        None,
        &DeviceSelection::Accelerator,
        &ModelDType::Auto,
    )?;

    let start = Instant::now();

    let image = pipeline.forward(&GenerationConfig {
        prompt: args.prompt,
        negative_prompt: args.negative_prompt,
        num_steps: 40,
        high_noise_frac: args.high_noise_frac,
        seed: args.seed,
        ..Default::default()
    })?;

    let end = Instant::now();
    println!("Took: {:.2}s", end.duration_since(start).as_secs_f32());

    image.save("image.png")?;

    Ok(())
}

mod components;
mod sampling;
mod schedule;
mod sdxl;

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use anyhow::Result;
use image::DynamicImage;
use rand::{rngs::StdRng, SeedableRng};
use sdxl_rs_common::{
    core::{DType, Device},
    NiceProgressBar,
};
use tracing::info;

use crate::{GenerationConfig, OutputLocation};
use components::ModelFiles;

pub use components::ComponentName;
pub use schedule::{split_timesteps, TRAIN_TIMESTEPS};
pub use sdxl::{SdxlBase, SdxlLatents, SdxlRefiner, BASE_MODEL_ID, REFINER_MODEL_ID};

/// The part of a [`GenerationConfig`] both stages see.
///
/// Built once per run and handed to both stages, so the refiner always resumes with the prompts,
/// step count and split point the base stage stopped with.
#[derive(Debug, Clone, PartialEq)]
pub struct StageRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub num_steps: usize,
    pub guidance_scale: f64,
    pub high_noise_frac: f64,
    pub height: usize,
    pub width: usize,
}

impl From<&GenerationConfig> for StageRequest {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            prompt: config.prompt.clone(),
            negative_prompt: config.negative_prompt.clone(),
            num_steps: config.num_steps,
            guidance_scale: config.guidance_scale,
            high_noise_frac: config.high_noise_frac,
            height: config.height,
            width: config.width,
        }
    }
}

/// First phase: denoise from pure noise until `high_noise_frac` of the schedule has elapsed.
pub trait BaseStage {
    /// Intermediate result, only meaningful to a matching [`RefinerStage`].
    type Latents;

    fn denoise(&mut self, request: &StageRequest, rng: &mut StdRng) -> Result<Self::Latents>;
}

/// Second phase: resume at `high_noise_frac` and finish into an image.
pub trait RefinerStage<L> {
    fn refine(&mut self, request: &StageRequest, latents: L, rng: &mut StdRng)
        -> Result<DynamicImage>;
}

/// Drives a base stage and a refiner stage over one shared schedule and one random source.
pub struct TwoStagePipeline<B, R> {
    base: B,
    refiner: R,
}

impl<B, R> TwoStagePipeline<B, R>
where
    B: BaseStage,
    R: RefinerStage<B::Latents>,
{
    pub fn new(base: B, refiner: R) -> Self {
        Self { base, refiner }
    }

    pub fn into_parts(self) -> (B, R) {
        (self.base, self.refiner)
    }

    /// Run both stages and return the finished image without saving it.
    ///
    /// The random source is seeded from `config.seed` and passed by reference through both stages,
    /// so equal configurations give equal images.
    pub fn forward(&mut self, config: &GenerationConfig) -> Result<DynamicImage> {
        config.validate()?;
        let request = StageRequest::from(config);
        let mut rng = StdRng::seed_from_u64(config.seed);

        info!(
            "base stage: {} steps, handing over at {:.0}% of the schedule.",
            request.num_steps,
            request.high_noise_frac * 100.
        );
        let base = &mut self.base;
        #[cfg(feature = "metal")]
        let latents = objc::rc::autoreleasepool(|| base.denoise(&request, &mut rng))?;
        #[cfg(not(feature = "metal"))]
        let latents = base.denoise(&request, &mut rng)?;

        info!("refiner stage: resuming from the handover point.");
        let refiner = &mut self.refiner;
        #[cfg(feature = "metal")]
        let image = objc::rc::autoreleasepool(|| refiner.refine(&request, latents, &mut rng))?;
        #[cfg(not(feature = "metal"))]
        let image = refiner.refine(&request, latents, &mut rng)?;

        Ok(image)
    }

    /// Generate and save to `path`. The parent directory must exist.
    pub fn generate_to(&mut self, config: &GenerationConfig, path: &Path) -> Result<()> {
        let image = self.forward(config)?;
        image.save(path)?;
        info!("saved image to {}", path.display());
        Ok(())
    }

    /// Generate into `config.output_dir`, creating it if needed, under a timestamped file name.
    ///
    /// Returns the path of the saved image.
    pub fn generate(&mut self, config: &GenerationConfig) -> Result<PathBuf> {
        config.validate()?;
        let output = OutputLocation::prepare(&config.output_dir)?;
        let path = output.image_path_now();
        self.generate_to(config, &path)?;
        Ok(path)
    }
}

pub(crate) struct LoadContext {
    pub(crate) device: Device,
    pub(crate) dtype: DType,
    pub(crate) silent: bool,
}

pub(crate) trait Loader {
    type Stage;

    fn name(&self) -> &'static str;
    /// `_class_name` expected in `model_index.json`.
    fn pipeline_class(&self) -> &'static str;
    fn required_component_names(&self) -> Vec<ComponentName>;
    fn load_from_components(
        &self,
        components: HashMap<ComponentName, PathBuf>,
        ctx: &LoadContext,
    ) -> Result<Self::Stage>;
}

pub(crate) fn component_path(
    components: &HashMap<ComponentName, PathBuf>,
    name: ComponentName,
) -> Result<&Path> {
    components
        .get(&name)
        .map(PathBuf::as_path)
        .ok_or_else(|| anyhow::anyhow!("component `{name}` was not loaded"))
}

fn load_stage<L: Loader>(loader: &L, files: &ModelFiles, ctx: &LoadContext) -> Result<L::Stage> {
    files.expect_pipeline_class(loader.pipeline_class())?;
    info!("model architecture is: {}", loader.name());

    let mut components = HashMap::new();
    for component in NiceProgressBar::<_, 'g'>(
        loader.required_component_names().into_iter(),
        "Loading components",
        ctx.silent,
    ) {
        components.insert(component, files.resolve(&component)?);
    }
    loader.load_from_components(components, ctx)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::StageRequest;
    use crate::GenerationConfig;

    #[test]
    fn request_carries_run_parameters() {
        let config = GenerationConfig {
            prompt: "a red fox in snow".to_string(),
            negative_prompt: "blurry".to_string(),
            num_steps: 50,
            high_noise_frac: 0.8,
            seed: 42,
            guidance_scale: 5.0,
            height: 512,
            width: 768,
            output_dir: PathBuf::from("out"),
        };
        let request = StageRequest::from(&config);
        assert_eq!(request.prompt, "a red fox in snow");
        assert_eq!(request.negative_prompt, "blurry");
        assert_eq!(request.num_steps, 50);
        assert_eq!(request.high_noise_frac, 0.8);
        assert_eq!((request.height, request.width), (512, 768));
    }
}

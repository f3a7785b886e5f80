use anyhow::Result;
use image::DynamicImage;
use rand::rngs::StdRng;
use sdxl_rs_common::core::{DType, Device};

use super::{base::SdxlLatents, SharedComponents};
use crate::{
    models::{decode_to_image, encode_prompt, StableDiffusionConfig, UNet2DConditionModel},
    pipelines::{
        sampling::denoise, split_timesteps, LoadContext, RefinerStage, StageRequest,
        TRAIN_TIMESTEPS,
    },
};

pub struct SdxlRefiner {
    shared: SharedComponents,
    unet: UNet2DConditionModel,
    sd_config: StableDiffusionConfig,
    device: Device,
    dtype: DType,
    silent: bool,
}

impl SdxlRefiner {
    pub(crate) fn new(
        shared: SharedComponents,
        unet: UNet2DConditionModel,
        sd_config: StableDiffusionConfig,
        ctx: &LoadContext,
    ) -> Self {
        Self {
            shared,
            unet,
            sd_config,
            device: ctx.device.clone(),
            dtype: ctx.dtype,
            silent: ctx.silent,
        }
    }
}

impl RefinerStage<SdxlLatents> for SdxlRefiner {
    // DDIM with eta = 0 draws no noise, and the handover latents are resumed as-is.
    fn refine(
        &mut self,
        request: &StageRequest,
        latents: SdxlLatents,
        _rng: &mut StdRng,
    ) -> Result<DynamicImage> {
        let guidance = request.guidance_scale > 1.;
        let text_embeddings = encode_prompt(
            &self.shared.tokenizer_2,
            &self.shared.text_encoder_2,
            &request.prompt,
            &request.negative_prompt,
            guidance,
            &self.device,
            self.dtype,
        )?;

        let mut scheduler = self.sd_config.build_scheduler(request.num_steps)?;
        let timesteps = scheduler.timesteps().to_vec();
        let (_, refiner_steps) =
            split_timesteps(&timesteps, TRAIN_TIMESTEPS, request.high_noise_frac);

        let latents = denoise(
            &self.unet,
            scheduler.as_mut(),
            refiner_steps,
            latents.into_inner().to_dtype(self.dtype)?,
            &text_embeddings,
            guidance.then_some(request.guidance_scale),
            self.silent,
        )?;
        decode_to_image(&self.shared.vae, &latents)
    }
}

use anyhow::Result;
use rand::rngs::StdRng;
use sdxl_rs_common::{
    core::{DType, Device, Tensor, D},
    ClipTokenizer,
};
use tracing::debug;

use super::SharedComponents;
use crate::{
    models::{encode_prompt, ClipTextTransformer, StableDiffusionConfig, UNet2DConditionModel},
    pipelines::{
        sampling::{denoise, initial_noise},
        split_timesteps, BaseStage, LoadContext, StageRequest, TRAIN_TIMESTEPS,
    },
};

const LATENT_CHANNELS: usize = 4;
const VAE_DOWNSCALE: usize = 8;

/// Latents left by [`SdxlBase`] at the handover point, still noisy.
pub struct SdxlLatents {
    latents: Tensor,
}

impl SdxlLatents {
    pub(crate) fn into_inner(self) -> Tensor {
        self.latents
    }
}

pub struct SdxlBase {
    tokenizer: ClipTokenizer,
    text_encoder: ClipTextTransformer,
    shared: SharedComponents,
    unet: UNet2DConditionModel,
    sd_config: StableDiffusionConfig,
    device: Device,
    dtype: DType,
    silent: bool,
}

impl SdxlBase {
    pub(crate) fn new(
        tokenizer: ClipTokenizer,
        text_encoder: ClipTextTransformer,
        shared: SharedComponents,
        unet: UNet2DConditionModel,
        sd_config: StableDiffusionConfig,
        ctx: &LoadContext,
    ) -> Self {
        Self {
            tokenizer,
            text_encoder,
            shared,
            unet,
            sd_config,
            device: ctx.device.clone(),
            dtype: ctx.dtype,
            silent: ctx.silent,
        }
    }

    pub(crate) fn shared(&self) -> &SharedComponents {
        &self.shared
    }
}

impl BaseStage for SdxlBase {
    type Latents = SdxlLatents;

    fn denoise(&mut self, request: &StageRequest, rng: &mut StdRng) -> Result<SdxlLatents> {
        let guidance = request.guidance_scale > 1.;

        // Both encoders see the same text; their hidden states are stacked along the feature axis.
        let embeds = encode_prompt(
            &self.tokenizer,
            &self.text_encoder,
            &request.prompt,
            &request.negative_prompt,
            guidance,
            &self.device,
            self.dtype,
        )?;
        let embeds_2 = encode_prompt(
            &self.shared.tokenizer_2,
            &self.shared.text_encoder_2,
            &request.prompt,
            &request.negative_prompt,
            guidance,
            &self.device,
            self.dtype,
        )?;
        let text_embeddings = Tensor::cat(&[embeds, embeds_2], D::Minus1)?;
        debug!("base text embeddings: {:?}", text_embeddings.shape());

        let mut scheduler = self.sd_config.build_scheduler(request.num_steps)?;
        let timesteps = scheduler.timesteps().to_vec();
        let (base_steps, _) = split_timesteps(&timesteps, TRAIN_TIMESTEPS, request.high_noise_frac);

        let noise = initial_noise(
            rng,
            (
                1,
                LATENT_CHANNELS,
                request.height / VAE_DOWNSCALE,
                request.width / VAE_DOWNSCALE,
            ),
            &self.device,
        )?;
        let latents = (noise * scheduler.init_noise_sigma())?.to_dtype(self.dtype)?;

        let latents = denoise(
            &self.unet,
            scheduler.as_mut(),
            base_steps,
            latents,
            &text_embeddings,
            guidance.then_some(request.guidance_scale),
            self.silent,
        )?;
        Ok(SdxlLatents { latents })
    }
}

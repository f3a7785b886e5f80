mod clip;
mod unet;
mod vae;

pub(crate) use candle_transformers::models::stable_diffusion::{
    clip::ClipTextTransformer, schedulers::Scheduler, unet_2d::UNet2DConditionModel,
    vae::AutoEncoderKL, StableDiffusionConfig,
};
pub(crate) use clip::encode_prompt;
pub(crate) use unet::build_refiner_unet;
pub(crate) use vae::decode_to_image;

use image::{DynamicImage, RgbImage};
use sdxl_rs_common::core::{DType, Device, IndexOp, Tensor};

use super::AutoEncoderKL;

// https://huggingface.co/stabilityai/stable-diffusion-xl-base-1.0/blob/main/vae/config.json
pub(crate) const VAE_SCALE: f64 = 0.13025;

/// Decode the first latent of the batch into an 8-bit RGB image.
///
/// The VAE is kept in F32 because the SDXL VAE overflows in half precision.
pub(crate) fn decode_to_image(vae: &AutoEncoderKL, latents: &Tensor) -> anyhow::Result<DynamicImage> {
    let latents = (latents.to_dtype(DType::F32)? / VAE_SCALE)?;
    let img = vae.decode(&latents)?;
    let img = ((img / 2.)? + 0.5)?.to_device(&Device::Cpu)?;
    let img = (img.clamp(0f32, 1.)? * 255.)?.to_dtype(DType::U8)?.i(0)?;

    let (c, h, w) = img.dims3()?;
    if c != 3 {
        anyhow::bail!("Expected 3 channels in image output");
    }
    let flattened = img.permute((1, 2, 0))?.flatten_all()?.to_vec1::<u8>()?;
    #[allow(clippy::cast_possible_truncation)]
    let image = RgbImage::from_raw(w as u32, h as u32, flattened)
        .ok_or(anyhow::Error::msg("RgbImage has invalid capacity."))?;
    Ok(DynamicImage::ImageRgb8(image))
}

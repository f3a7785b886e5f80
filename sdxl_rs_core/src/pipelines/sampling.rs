use rand::{rngs::StdRng, Rng};
use rand_distr::StandardNormal;
use sdxl_rs_common::{
    core::{Device, Result, Tensor},
    NiceProgressBar,
};

use crate::models::{Scheduler, UNet2DConditionModel};

/// Draw the starting latents from the shared random source.
///
/// Sampling happens on the host so that a seed yields the same noise on every device.
pub(crate) fn initial_noise(
    rng: &mut StdRng,
    shape: (usize, usize, usize, usize),
    device: &Device,
) -> Result<Tensor> {
    let (b, c, h, w) = shape;
    let noise = (0..b * c * h * w)
        .map(|_| rng.sample::<f32, _>(StandardNormal))
        .collect::<Vec<_>>();
    Tensor::from_vec(noise, shape, device)
}

/// Run the U-Net over `timesteps`, stepping `scheduler` after each prediction.
///
/// With `guidance_scale` set, `text_embeddings` must hold the `[uncond; cond]` pair and the
/// latents are duplicated for each U-Net call.
pub(crate) fn denoise(
    unet: &UNet2DConditionModel,
    scheduler: &mut dyn Scheduler,
    timesteps: &[usize],
    latents: Tensor,
    text_embeddings: &Tensor,
    guidance_scale: Option<f64>,
    silent: bool,
) -> Result<Tensor> {
    let mut latents = latents;
    for &timestep in NiceProgressBar::<_, 'g'>(timesteps.iter(), "Denoise loop", silent) {
        let latent_model_input = if guidance_scale.is_some() {
            Tensor::cat(&[&latents, &latents], 0)?
        } else {
            latents.clone()
        };
        let latent_model_input = scheduler.scale_model_input(latent_model_input, timestep)?;
        let noise_pred = unet.forward(&latent_model_input, timestep as f64, text_embeddings)?;

        let noise_pred = match guidance_scale {
            Some(scale) => {
                let chunks = noise_pred.chunk(2, 0)?;
                let (uncond, cond) = (&chunks[0], &chunks[1]);
                (uncond + ((cond - uncond)? * scale)?)?
            }
            None => noise_pred,
        };
        latents = scheduler.step(&noise_pred, timestep, &latents)?;
    }
    Ok(latents)
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};
    use sdxl_rs_common::core::Device;

    use super::initial_noise;

    #[test]
    fn noise_follows_seed() -> anyhow::Result<()> {
        let draw = |seed| -> anyhow::Result<Vec<f32>> {
            let mut rng = StdRng::seed_from_u64(seed);
            Ok(initial_noise(&mut rng, (1, 4, 8, 8), &Device::Cpu)?
                .flatten_all()?
                .to_vec1::<f32>()?)
        };
        assert_eq!(draw(42)?, draw(42)?);
        assert_ne!(draw(42)?, draw(43)?);
        Ok(())
    }

    #[test]
    fn noise_shape() -> anyhow::Result<()> {
        let mut rng = StdRng::seed_from_u64(0);
        let noise = initial_noise(&mut rng, (1, 4, 128, 128), &Device::Cpu)?;
        assert_eq!(noise.dims4()?, (1, 4, 128, 128));
        Ok(())
    }
}

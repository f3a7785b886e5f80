use std::path::Path;

use candle_transformers::models::stable_diffusion::unet_2d::{
    BlockConfig, UNet2DConditionModelConfig,
};
use sdxl_rs_common::{
    core::{DType, Device},
    nn::VarBuilder,
};

use super::UNet2DConditionModel;

const LATENT_CHANNELS: usize = 4;

// https://huggingface.co/stabilityai/stable-diffusion-xl-refiner-1.0/blob/main/unet/config.json
// candle sizes the mid block from the last block's `use_cross_attn` (`None` gives depth 1), so
// only the first of the refiner's 4 mid-block transformer layers is loaded; the rest of those
// weights stay unused.
fn refiner_unet_config(sliced_attention_size: Option<usize>) -> UNet2DConditionModelConfig {
    let bc = |out_channels, use_cross_attn, attention_head_dim| BlockConfig {
        out_channels,
        use_cross_attn,
        attention_head_dim,
    };
    UNet2DConditionModelConfig {
        blocks: vec![
            bc(384, None, 6),
            bc(768, Some(4), 12),
            bc(1536, Some(4), 24),
            bc(1536, None, 24),
        ],
        center_input_sample: false,
        // Only the second text encoder conditions the refiner.
        cross_attention_dim: 1280,
        downsample_padding: 1,
        flip_sin_to_cos: true,
        freq_shift: 0.,
        layers_per_block: 2,
        mid_block_scale_factor: 1.,
        norm_eps: 1e-5,
        norm_num_groups: 32,
        sliced_attention_size,
        use_linear_projection: true,
    }
}

pub(crate) fn build_refiner_unet<P: AsRef<Path>>(
    unet_weights: P,
    device: &Device,
    dtype: DType,
) -> anyhow::Result<UNet2DConditionModel> {
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[unet_weights], dtype, device)? };
    Ok(UNet2DConditionModel::new(
        vb,
        LATENT_CHANNELS,
        LATENT_CHANNELS,
        false,
        refiner_unet_config(None),
    )?)
}

#[cfg(test)]
mod tests {
    use super::refiner_unet_config;

    #[test]
    fn refiner_blocks_match_published_config() {
        let cfg = refiner_unet_config(None);
        let channels = cfg.blocks.iter().map(|b| b.out_channels).collect::<Vec<_>>();
        assert_eq!(channels, vec![384, 768, 1536, 1536]);
        assert!(cfg.blocks.first().unwrap().use_cross_attn.is_none());
        assert!(cfg.blocks.last().unwrap().use_cross_attn.is_none());
        assert_eq!(cfg.cross_attention_dim, 1280);
    }
}

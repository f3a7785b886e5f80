use sdxl_rs_common::{
    core::{DType, Device, Tensor},
    ClipTokenizer,
};

use super::ClipTextTransformer;

/// Index, from the end, of the encoder layer whose hidden states condition the U-Net.
const PENULTIMATE_LAYER: isize = -2;

fn hidden_states(
    tokenizer: &ClipTokenizer,
    encoder: &ClipTextTransformer,
    text: &str,
    device: &Device,
) -> anyhow::Result<Tensor> {
    let tokens = tokenizer.encode_padded(text)?;
    let tokens = Tensor::new(tokens.as_slice(), device)?.unsqueeze(0)?;
    let (_last, penultimate) =
        encoder.forward_until_encoder_layer(&tokens, usize::MAX, PENULTIMATE_LAYER)?;
    Ok(penultimate)
}

/// Encode the prompt with one text encoder.
///
/// With guidance the result is `[negative; positive]` along the batch dimension, otherwise just
/// the positive embedding.
pub(crate) fn encode_prompt(
    tokenizer: &ClipTokenizer,
    encoder: &ClipTextTransformer,
    prompt: &str,
    negative_prompt: &str,
    guidance: bool,
    device: &Device,
    dtype: DType,
) -> anyhow::Result<Tensor> {
    let cond = hidden_states(tokenizer, encoder, prompt, device)?;
    let embeddings = if guidance {
        let uncond = hidden_states(tokenizer, encoder, negative_prompt, device)?;
        Tensor::cat(&[uncond, cond], 0)?
    } else {
        cond
    };
    Ok(embeddings.to_dtype(dtype)?)
}

use std::path::Path;

use tokenizers::Tokenizer;
use tracing::warn;

const END_OF_TEXT: &str = "<|endoftext|>";

/// A CLIP tokenizer producing fixed-length, padded id sequences.
pub struct ClipTokenizer {
    tokenizer: Tokenizer,
    pad_id: u32,
    eos_id: Option<u32>,
    max_len: usize,
}

impl ClipTokenizer {
    /// Pads with `pad_with` when given, with the end-of-text token otherwise.
    pub fn new(tokenizer: Tokenizer, pad_with: Option<&str>, max_len: usize) -> anyhow::Result<Self> {
        let pad_token = pad_with.unwrap_or(END_OF_TEXT);
        let Some(pad_id) = tokenizer.token_to_id(pad_token) else {
            anyhow::bail!("padding token `{pad_token}` is not in the tokenizer vocabulary");
        };
        let eos_id = tokenizer.token_to_id(END_OF_TEXT);
        Ok(Self {
            tokenizer,
            pad_id,
            eos_id,
            max_len,
        })
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Encode `text` into exactly `max_len` ids. Longer prompts are truncated, keeping the
    /// end-of-text marker last.
    pub fn encode_padded(&self, text: &str) -> anyhow::Result<Vec<u32>> {
        let mut tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(anyhow::Error::msg)?
            .get_ids()
            .to_vec();
        if tokens.len() > self.max_len {
            warn!(
                "prompt is {} tokens long, truncating to {}.",
                tokens.len(),
                self.max_len
            );
            tokens.truncate(self.max_len);
            if let (Some(eos_id), Some(last)) = (self.eos_id, tokens.last_mut()) {
                *last = eos_id;
            }
        }
        tokens.resize(self.max_len, self.pad_id);
        Ok(tokens)
    }
}

pub fn load_clip_tokenizer<P: AsRef<Path>>(
    tokenizer_file: P,
    pad_with: Option<&str>,
    max_len: usize,
) -> anyhow::Result<ClipTokenizer> {
    let tokenizer = Tokenizer::from_file(tokenizer_file).map_err(anyhow::Error::msg)?;
    ClipTokenizer::new(tokenizer, pad_with, max_len)
}

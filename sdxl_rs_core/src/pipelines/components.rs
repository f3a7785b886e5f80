use std::{fmt::Display, path::PathBuf};

use serde::Deserialize;
use tracing::info;

use sdxl_rs_common::{FileLoader, ModelSource, TokenSource};

const HALF_PRECISION_SUFFIX: &str = ".fp16.safetensors";
const SAFETENSORS_SUFFIX: &str = ".safetensors";
const TOKENIZER_FILE: &str = "tokenizer.json";

/// Diffusers repositories ship CLIP vocab/merges files only; the full tokenizer definitions live
/// in the upstream CLIP repositories.
const CLIP_TOKENIZER_REPOS: [&str; 2] = [
    "openai/clip-vit-large-patch14",
    "laion/CLIP-ViT-bigG-14-laion2B-39B-b160k",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComponentName {
    TextEncoder(usize),
    Tokenizer(usize),
    Unet,
    Vae,
}

impl Display for ComponentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unet => write!(f, "unet"),
            Self::Vae => write!(f, "vae"),
            Self::TextEncoder(1) => write!(f, "text_encoder"),
            Self::TextEncoder(x) => write!(f, "text_encoder_{x}"),
            Self::Tokenizer(1) => write!(f, "tokenizer"),
            Self::Tokenizer(x) => write!(f, "tokenizer_{x}"),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
struct ModelIndex {
    #[serde(rename = "_class_name")]
    name: String,
}

/// Pick the single safetensors file of `component`, preferring the `fp16` variant when
/// `prefer_half` is set and falling back to the other variant when the preferred one is absent.
pub(crate) fn select_weights(
    files: &[String],
    component: &ComponentName,
    prefer_half: bool,
) -> anyhow::Result<String> {
    let dir = format!("{component}/");
    let (half, full): (Vec<&String>, Vec<&String>) = files
        .iter()
        .filter(|file| {
            file.strip_prefix(&dir)
                .is_some_and(|rest| !rest.contains('/') && rest.ends_with(SAFETENSORS_SUFFIX))
        })
        .partition(|file| file.ends_with(HALF_PRECISION_SUFFIX));

    let (preferred, fallback) = if prefer_half {
        (half, full)
    } else {
        (full, half)
    };
    let candidates = if preferred.is_empty() {
        fallback
    } else {
        preferred
    };
    match candidates.as_slice() {
        [file] => Ok(file.to_string()),
        [] => anyhow::bail!("no safetensors weights found for component `{component}`"),
        _ => anyhow::bail!("sharded weights are not supported for component `{component}`"),
    }
}

/// The file listing of one model repository plus the means to fetch its files.
pub(crate) struct ModelFiles {
    loader: FileLoader,
    files: Vec<String>,
    prefer_half: bool,
    silent: bool,
    token: TokenSource,
}

impl ModelFiles {
    pub(crate) fn open(
        source: &ModelSource,
        silent: bool,
        token: &TokenSource,
        revision: Option<String>,
        prefer_half: bool,
    ) -> anyhow::Result<Self> {
        info!("loading from source: {source}.");
        let loader = FileLoader::from_model_source(source, silent, token, revision)?;
        let files = loader.list_files()?;
        Ok(Self {
            loader,
            files,
            prefer_half,
            silent,
            token: token.clone(),
        })
    }

    /// Check `model_index.json` names the expected diffusers pipeline class.
    pub(crate) fn expect_pipeline_class(&self, expected: &str) -> anyhow::Result<()> {
        if !self.files.iter().any(|f| f == "model_index.json") {
            anyhow::bail!("Expected `model_index.json` file present.");
        }
        let ModelIndex { name } =
            serde_json::from_str(&self.loader.read_to_string("model_index.json")?)?;
        if name != expected {
            anyhow::bail!("Expected a `{expected}` model, found `{name}`.");
        }
        Ok(())
    }

    /// Resolve a component to the local path of the file it is loaded from.
    pub(crate) fn resolve(&self, component: &ComponentName) -> anyhow::Result<PathBuf> {
        match component {
            ComponentName::Tokenizer(index) => {
                let local = format!("{component}/{TOKENIZER_FILE}");
                if self.files.contains(&local) {
                    return self.loader.read_file(&local);
                }
                let Some(repo) = index
                    .checked_sub(1)
                    .and_then(|i| CLIP_TOKENIZER_REPOS.get(i))
                else {
                    anyhow::bail!("no tokenizer source known for `{component}`");
                };
                FileLoader::from_model_source(
                    &ModelSource::from_model_id(repo),
                    self.silent,
                    &self.token,
                    None,
                )?
                .read_file(TOKENIZER_FILE)
            }
            ComponentName::TextEncoder(_) | ComponentName::Unet | ComponentName::Vae => {
                let file = select_weights(&self.files, component, self.prefer_half)?;
                self.loader.read_file(&file)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{select_weights, ComponentName};

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn component_directories() {
        assert_eq!(ComponentName::TextEncoder(1).to_string(), "text_encoder");
        assert_eq!(ComponentName::TextEncoder(2).to_string(), "text_encoder_2");
        assert_eq!(ComponentName::Tokenizer(2).to_string(), "tokenizer_2");
        assert_eq!(ComponentName::Unet.to_string(), "unet");
        assert_eq!(ComponentName::Vae.to_string(), "vae");
    }

    #[test]
    fn prefers_requested_variant() -> anyhow::Result<()> {
        let listing = files(&[
            "unet/config.json",
            "unet/diffusion_pytorch_model.safetensors",
            "unet/diffusion_pytorch_model.fp16.safetensors",
            "unet/diffusion_pytorch_model.fp16.bin",
            "vae_decoder/model.safetensors",
        ]);
        assert_eq!(
            select_weights(&listing, &ComponentName::Unet, true)?,
            "unet/diffusion_pytorch_model.fp16.safetensors"
        );
        assert_eq!(
            select_weights(&listing, &ComponentName::Unet, false)?,
            "unet/diffusion_pytorch_model.safetensors"
        );
        Ok(())
    }

    #[test]
    fn falls_back_to_other_variant() -> anyhow::Result<()> {
        let listing = files(&["text_encoder_2/model.safetensors"]);
        assert_eq!(
            select_weights(&listing, &ComponentName::TextEncoder(2), true)?,
            "text_encoder_2/model.safetensors"
        );
        // `text_encoder/` must not match `text_encoder_2/`.
        assert!(select_weights(&listing, &ComponentName::TextEncoder(1), true).is_err());
        Ok(())
    }

    #[test]
    fn rejects_sharded_weights() {
        let listing = files(&[
            "unet/diffusion_pytorch_model-00001-of-00002.safetensors",
            "unet/diffusion_pytorch_model-00002-of-00002.safetensors",
        ]);
        assert!(select_weights(&listing, &ComponentName::Unet, false).is_err());
    }
}

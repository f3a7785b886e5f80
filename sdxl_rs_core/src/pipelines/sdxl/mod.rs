mod base;
mod refiner;

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use anyhow::Result;
use candle_transformers::models::stable_diffusion::build_clip_transformer;
use sdxl_rs_common::{
    core::DType, load_clip_tokenizer, ClipTokenizer, DeviceSelection, ModelSource, TokenSource,
};
use tracing::info;

use super::{
    component_path, components::ModelFiles, load_stage, ComponentName, LoadContext, Loader,
    TwoStagePipeline,
};
use crate::{
    models::{build_refiner_unet, AutoEncoderKL, ClipTextTransformer, StableDiffusionConfig},
    util::TryIntoDType,
    ModelDType,
};

pub use base::{SdxlBase, SdxlLatents};
pub use refiner::SdxlRefiner;

pub const BASE_MODEL_ID: &str = "stabilityai/stable-diffusion-xl-base-1.0";
pub const REFINER_MODEL_ID: &str = "stabilityai/stable-diffusion-xl-refiner-1.0";

/// Components loaded once by the base stage and reused by the refiner.
#[derive(Clone)]
pub(crate) struct SharedComponents {
    pub(crate) tokenizer_2: Arc<ClipTokenizer>,
    pub(crate) text_encoder_2: Arc<ClipTextTransformer>,
    pub(crate) vae: Arc<AutoEncoderKL>,
}

pub(crate) struct SdxlBaseLoader;

impl Loader for SdxlBaseLoader {
    type Stage = SdxlBase;

    fn name(&self) -> &'static str {
        "sdxl-base"
    }

    fn pipeline_class(&self) -> &'static str {
        "StableDiffusionXLPipeline"
    }

    fn required_component_names(&self) -> Vec<ComponentName> {
        vec![
            ComponentName::Tokenizer(1),
            ComponentName::Tokenizer(2),
            ComponentName::TextEncoder(1),
            ComponentName::TextEncoder(2),
            ComponentName::Unet,
            ComponentName::Vae,
        ]
    }

    fn load_from_components(
        &self,
        components: HashMap<ComponentName, PathBuf>,
        ctx: &LoadContext,
    ) -> Result<Self::Stage> {
        let sd_config = StableDiffusionConfig::sdxl(None, None, None);
        let Some(clip2) = sd_config.clip2.as_ref() else {
            anyhow::bail!("SDXL configuration has no second text encoder");
        };

        if !ctx.silent {
            info!("loading text encoders.");
        }
        let tokenizer = load_clip_tokenizer(
            component_path(&components, ComponentName::Tokenizer(1))?,
            sd_config.clip.pad_with.as_deref(),
            sd_config.clip.max_position_embeddings,
        )?;
        let tokenizer_2 = load_clip_tokenizer(
            component_path(&components, ComponentName::Tokenizer(2))?,
            clip2.pad_with.as_deref(),
            clip2.max_position_embeddings,
        )?;
        let text_encoder = build_clip_transformer(
            &sd_config.clip,
            component_path(&components, ComponentName::TextEncoder(1))?,
            &ctx.device,
            ctx.dtype,
        )?;
        let text_encoder_2 = build_clip_transformer(
            clip2,
            component_path(&components, ComponentName::TextEncoder(2))?,
            &ctx.device,
            ctx.dtype,
        )?;

        if !ctx.silent {
            info!("loading unet.");
        }
        let unet = sd_config.build_unet(
            component_path(&components, ComponentName::Unet)?,
            &ctx.device,
            4,
            false,
            ctx.dtype,
        )?;

        if !ctx.silent {
            info!("loading vae in f32.");
        }
        let vae = sd_config.build_vae(
            component_path(&components, ComponentName::Vae)?,
            &ctx.device,
            DType::F32,
        )?;

        Ok(SdxlBase::new(
            tokenizer,
            text_encoder,
            SharedComponents {
                tokenizer_2: Arc::new(tokenizer_2),
                text_encoder_2: Arc::new(text_encoder_2),
                vae: Arc::new(vae),
            },
            unet,
            sd_config,
            ctx,
        ))
    }
}

/// The refiner repository only contributes its U-Net; text encoder 2 and the VAE come from the base.
pub(crate) struct SdxlRefinerLoader {
    shared: SharedComponents,
}

impl Loader for SdxlRefinerLoader {
    type Stage = SdxlRefiner;

    fn name(&self) -> &'static str {
        "sdxl-refiner"
    }

    fn pipeline_class(&self) -> &'static str {
        "StableDiffusionXLImg2ImgPipeline"
    }

    fn required_component_names(&self) -> Vec<ComponentName> {
        vec![ComponentName::Unet]
    }

    fn load_from_components(
        &self,
        components: HashMap<ComponentName, PathBuf>,
        ctx: &LoadContext,
    ) -> Result<Self::Stage> {
        if !ctx.silent {
            info!("loading refiner unet.");
        }
        let unet = build_refiner_unet(
            component_path(&components, ComponentName::Unet)?,
            &ctx.device,
            ctx.dtype,
        )?;
        Ok(SdxlRefiner::new(
            self.shared.clone(),
            unet,
            StableDiffusionConfig::sdxl(None, None, None),
            ctx,
        ))
    }
}

impl TwoStagePipeline<SdxlBase, SdxlRefiner> {
    /// Load the SDXL base and refiner pipelines.
    ///
    /// Half-precision (`fp16`) weight files are preferred unless `dtype` resolves to F32; the
    /// other variant is used when the preferred one is missing.
    ///
    /// Note:
    /// - `token` and `revision` are only applicable for Hugging Face models, and `revision`
    ///   applies to both repositories.
    pub fn load(
        base: ModelSource,
        refiner: ModelSource,
        silent: bool,
        token: TokenSource,
        revision: Option<String>,
        device: &DeviceSelection,
        dtype: &ModelDType,
    ) -> Result<Self> {
        let device = device.resolve()?;
        let dtype = dtype.try_into_dtype(&device, silent)?;
        let ctx = LoadContext {
            device,
            dtype,
            silent,
        };
        let prefer_half = dtype != DType::F32;

        let base_files = ModelFiles::open(&base, silent, &token, revision.clone(), prefer_half)?;
        let base = load_stage(&SdxlBaseLoader, &base_files, &ctx)?;

        let refiner_files = ModelFiles::open(&refiner, silent, &token, revision, prefer_half)?;
        let refiner = load_stage(
            &SdxlRefinerLoader {
                shared: base.shared().clone(),
            },
            &refiner_files,
            &ctx,
        )?;

        Ok(Self::new(base, refiner))
    }
}

use std::{collections::HashMap, fs, path::Path};

use anyhow::Result;
use image::{DynamicImage, RgbImage};
use rand::{rngs::StdRng, Rng};
use regex::Regex;
use sdxl_rs_core::{
    split_timesteps, BaseStage, ConfigError, GenerationConfig, PromptPolicy, RefinerStage,
    StageRequest, TwoStagePipeline, TRAIN_TIMESTEPS,
};

/// DDIM leading spacing with `steps_offset = 1`, as the SDXL scheduler produces it.
fn leading_timesteps(n_steps: usize) -> Vec<usize> {
    let step_ratio = TRAIN_TIMESTEPS / n_steps;
    (0..n_steps).map(|s| s * step_ratio + 1).rev().collect()
}

struct StubLatents {
    pixels: Vec<u8>,
    stop_frac: f64,
}

#[derive(Default)]
struct StubBase {
    requests: Vec<StageRequest>,
    steps_run: usize,
}

impl BaseStage for StubBase {
    type Latents = StubLatents;

    fn denoise(&mut self, request: &StageRequest, rng: &mut StdRng) -> Result<StubLatents> {
        let timesteps = leading_timesteps(request.num_steps);
        let (base, _) = split_timesteps(&timesteps, TRAIN_TIMESTEPS, request.high_noise_frac);
        self.steps_run = base.len();
        self.requests.push(request.clone());

        let len = 3 * (request.height / 8) * (request.width / 8);
        let pixels = (0..len).map(|_| rng.gen::<u8>()).collect();
        Ok(StubLatents {
            pixels,
            stop_frac: request.high_noise_frac,
        })
    }
}

#[derive(Default)]
struct StubRefiner {
    requests: Vec<StageRequest>,
    received_stop_frac: Option<f64>,
    steps_run: usize,
}

impl RefinerStage<StubLatents> for StubRefiner {
    fn refine(
        &mut self,
        request: &StageRequest,
        latents: StubLatents,
        rng: &mut StdRng,
    ) -> Result<DynamicImage> {
        let timesteps = leading_timesteps(request.num_steps);
        let (_, refiner) = split_timesteps(&timesteps, TRAIN_TIMESTEPS, request.high_noise_frac);
        self.steps_run = refiner.len();
        self.received_stop_frac = Some(latents.stop_frac);
        self.requests.push(request.clone());

        let pixels = latents
            .pixels
            .iter()
            .map(|p| p ^ rng.gen::<u8>())
            .collect::<Vec<_>>();
        #[allow(clippy::cast_possible_truncation)]
        let image = RgbImage::from_raw(
            (request.width / 8) as u32,
            (request.height / 8) as u32,
            pixels,
        )
        .ok_or_else(|| anyhow::anyhow!("bad stub image size"))?;
        Ok(DynamicImage::ImageRgb8(image))
    }
}

fn stub_pipeline() -> TwoStagePipeline<StubBase, StubRefiner> {
    TwoStagePipeline::new(StubBase::default(), StubRefiner::default())
}

fn config_in(dir: &Path) -> GenerationConfig {
    GenerationConfig {
        prompt: "a red fox in snow".to_string(),
        negative_prompt: "blurry".to_string(),
        num_steps: 50,
        high_noise_frac: 0.8,
        seed: 42,
        height: 64,
        width: 64,
        output_dir: dir.join("images_generated"),
        ..Default::default()
    }
}

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect::<HashMap<_, _>>();
    move |name| vars.get(name).cloned()
}

#[test]
fn same_seed_gives_identical_files() -> Result<()> {
    let first = tempfile::tempdir()?;
    let second = tempfile::tempdir()?;

    let a = stub_pipeline().generate(&config_in(first.path()))?;
    let b = stub_pipeline().generate(&config_in(second.path()))?;
    assert_eq!(fs::read(&a)?, fs::read(&b)?);

    let third = tempfile::tempdir()?;
    let other_seed = GenerationConfig {
        seed: 43,
        ..config_in(third.path())
    };
    let c = stub_pipeline().generate(&other_seed)?;
    assert_ne!(fs::read(&a)?, fs::read(&c)?);
    Ok(())
}

#[test]
fn refiner_resumes_where_base_stopped() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut pipeline = stub_pipeline();
    pipeline.generate(&config_in(dir.path()))?;

    let (base, refiner) = pipeline.into_parts();
    assert_eq!(refiner.received_stop_frac, Some(0.8));
    assert_eq!(base.requests, refiner.requests);
    assert_eq!((base.steps_run, refiner.steps_run), (40, 10));
    Ok(())
}

#[test]
fn prompts_reach_both_stages() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = GenerationConfig {
        output_dir: dir.path().join("images_generated"),
        height: 64,
        width: 64,
        num_steps: 50,
        seed: 42,
        ..GenerationConfig::from_lookup(
            lookup(&[("PROMPT_AVA", "a red fox in snow"), ("NEGATIVE_PROMPT", "blurry")]),
            PromptPolicy::PassThrough,
        )?
    };
    let mut pipeline = stub_pipeline();
    let path = pipeline.generate(&config)?;
    assert!(path.is_file());

    let (base, refiner) = pipeline.into_parts();
    for request in base.requests.iter().chain(&refiner.requests) {
        assert_eq!(request.prompt, "a red fox in snow");
        assert_eq!(request.negative_prompt, "blurry");
        assert_eq!(request.num_steps, 50);
        assert_eq!(request.high_noise_frac, 0.8);
    }
    Ok(())
}

#[test]
fn creates_output_dir_with_timestamped_name() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config_in(dir.path());
    assert!(!config.output_dir.exists());

    let path = stub_pipeline().generate(&config)?;
    assert!(config.output_dir.is_dir());
    assert_eq!(path.parent(), Some(config.output_dir.as_path()));

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("non-utf8 file name"))?;
    assert!(Regex::new(r"^\d{8}_\d{6}_image\.png$")?.is_match(name));

    let entries = fs::read_dir(&config.output_dir)?.collect::<Result<Vec<_>, _>>()?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].path(), path);

    let decoded = image::open(&path)?;
    assert_eq!((decoded.width(), decoded.height()), (8, 8));
    Ok(())
}

#[test]
fn existing_files_are_preserved() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config_in(dir.path());
    fs::create_dir_all(&config.output_dir)?;
    let earlier = config.output_dir.join("20240101_000000_image.png");
    fs::write(&earlier, b"earlier run")?;

    let path = stub_pipeline().generate(&config)?;
    assert_ne!(path, earlier);
    assert_eq!(fs::read(&earlier)?, b"earlier run");
    Ok(())
}

#[test]
fn unset_prompt_still_runs_both_stages() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = GenerationConfig {
        output_dir: dir.path().join("images_generated"),
        height: 64,
        width: 64,
        num_steps: 10,
        ..GenerationConfig::from_lookup(|_| None, PromptPolicy::PassThrough)?
    };
    let mut pipeline = stub_pipeline();
    pipeline.generate(&config)?;

    let (base, refiner) = pipeline.into_parts();
    assert_eq!(base.requests.len(), 1);
    assert_eq!(refiner.requests.len(), 1);
    assert_eq!(base.requests[0].prompt, "");
    assert_eq!(base.requests[0].negative_prompt, "");
    Ok(())
}

#[test]
fn required_prompt_fails_before_any_stage() {
    let mut pipeline = stub_pipeline();
    let result = GenerationConfig::from_lookup(|_| None, PromptPolicy::Require)
        .map_err(anyhow::Error::from)
        .and_then(|config| pipeline.generate(&config));

    let err = result.expect_err("missing prompt must fail");
    assert_eq!(
        err.downcast_ref::<ConfigError>(),
        Some(&ConfigError::MissingPrompt("PROMPT_AVA"))
    );
    let (base, refiner) = pipeline.into_parts();
    assert!(base.requests.is_empty());
    assert!(refiner.requests.is_empty());
}

#[test]
fn invalid_config_writes_nothing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let bad_split = GenerationConfig {
        high_noise_frac: 1.5,
        ..config_in(dir.path())
    };
    let too_many_steps = GenerationConfig {
        num_steps: TRAIN_TIMESTEPS + 1,
        ..config_in(dir.path())
    };

    for (config, expected) in [
        (bad_split, ConfigError::InvalidSplit(1.5)),
        (
            too_many_steps,
            ConfigError::TooManySteps {
                steps: TRAIN_TIMESTEPS + 1,
                max: TRAIN_TIMESTEPS,
            },
        ),
    ] {
        let mut pipeline = stub_pipeline();
        let err = pipeline
            .generate(&config)
            .expect_err("invalid config must fail");
        assert_eq!(err.downcast_ref::<ConfigError>(), Some(&expected));
        assert!(!config.output_dir.exists());

        let (base, refiner) = pipeline.into_parts();
        assert!(base.requests.is_empty());
        assert!(refiner.requests.is_empty());
    }
    Ok(())
}

#[test]
fn full_split_leaves_refiner_no_steps() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = GenerationConfig {
        high_noise_frac: 1.0,
        ..config_in(dir.path())
    };
    let mut pipeline = stub_pipeline();
    pipeline.generate(&config)?;

    let (base, refiner) = pipeline.into_parts();
    assert_eq!((base.steps_run, refiner.steps_run), (50, 0));
    Ok(())
}

use std::{
    fmt::Display,
    fs,
    path::{Path, PathBuf},
};

use crate::{get_token, TokenSource};
use hf_hub::{
    api::sync::{ApiBuilder, ApiRepo},
    Repo, RepoType,
};

/// Source from which to load a model. This is easiest to create with the various constructor functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    ModelId(String),
    LocalDir(PathBuf),
}

impl Display for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ModelId(model_id) => write!(f, "model id: {model_id}"),
            Self::LocalDir(dir) => write!(f, "local directory: {}", dir.display()),
        }
    }
}

impl ModelSource {
    /// Load the model from a Hugging Face model ID or a local path.
    ///
    /// An existing directory takes precedence over a Hub repository of the same name.
    pub fn from_model_id<S: ToString>(model_id: S) -> Self {
        let model_id = model_id.to_string();
        if Path::new(&model_id).is_dir() {
            Self::LocalDir(PathBuf::from(model_id))
        } else {
            Self::ModelId(model_id)
        }
    }

    /// Load the model from a directory laid out like a diffusers repository.
    pub fn from_local_dir<P: Into<PathBuf>>(dir: P) -> Self {
        Self::LocalDir(dir.into())
    }
}

/// Resolves the files of one model source to local paths, downloading them if needed.
pub enum FileLoader {
    Api(Box<ApiRepo>),
    Local(PathBuf),
}

impl FileLoader {
    pub fn from_model_source(
        source: &ModelSource,
        silent: bool,
        token: &TokenSource,
        revision: Option<String>,
    ) -> anyhow::Result<Self> {
        match source {
            ModelSource::ModelId(model_id) => {
                let api_builder = ApiBuilder::new()
                    .with_progress(!silent)
                    .with_token(get_token(token)?)
                    .build()?;
                let revision = revision.unwrap_or("main".to_string());
                let api = api_builder.repo(Repo::with_revision(
                    model_id.clone(),
                    RepoType::Model,
                    revision,
                ));

                Ok(Self::Api(Box::new(api)))
            }
            ModelSource::LocalDir(dir) => {
                if !dir.is_dir() {
                    anyhow::bail!("model directory `{}` does not exist", dir.display());
                }
                Ok(Self::Local(dir.clone()))
            }
        }
    }

    /// List every file of the source, as `/`-separated paths relative to the repository root.
    pub fn list_files(&self) -> anyhow::Result<Vec<String>> {
        match self {
            Self::Api(api) => api
                .info()
                .map(|repo| {
                    repo.siblings
                        .iter()
                        .map(|x| x.rfilename.clone())
                        .collect::<Vec<String>>()
                })
                .map_err(|e| anyhow::Error::msg(e.to_string())),
            Self::Local(root) => {
                let mut files = Vec::new();
                collect_local_files(root, root, &mut files)?;
                files.sort();
                Ok(files)
            }
        }
    }

    /// Resolve a file to a local path. Hub files are downloaded into the cache first.
    pub fn read_file(&self, name: &str) -> anyhow::Result<PathBuf> {
        match self {
            Self::Api(api) => api
                .get(name)
                .map_err(|e| anyhow::Error::msg(e.to_string())),
            Self::Local(root) => {
                let path = root.join(name);
                if !path.is_file() {
                    anyhow::bail!("file `{name}` not found in `{}`", root.display());
                }
                Ok(path)
            }
        }
    }

    pub fn read_to_string(&self, name: &str) -> anyhow::Result<String> {
        Ok(fs::read_to_string(self.read_file(name)?)?)
    }
}

fn collect_local_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> anyhow::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_local_files(root, &path, out)?;
        } else {
            let relative = path.strip_prefix(root)?;
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push(name);
        }
    }
    Ok(())
}

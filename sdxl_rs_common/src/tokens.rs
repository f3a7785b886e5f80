use std::{env, fmt, fs, str::FromStr};
use thiserror::Error;
use tracing::warn;

use anyhow::Result;

const DEFAULT_TOKEN_ENV_VAR: &str = "HF_TOKEN";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Where to read the Hugging Face token from, for gated or private repositories.
pub enum TokenSource {
    Literal(String),
    EnvVar(String),
    Path(String),
    CacheToken,
    None,
}

impl FromStr for TokenSource {
    type Err = String;

    /// Parses `literal:<token>`, `env[:<VAR>]`, `path:<file>`, `cache` or `none`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, value) = match s.split_once(':') {
            Some((kind, value)) => (kind, Some(value)),
            None => (s, None),
        };
        match (kind, value) {
            ("literal", Some(value)) => Ok(Self::Literal(value.to_string())),
            ("env", value) => Ok(Self::EnvVar(
                value.unwrap_or(DEFAULT_TOKEN_ENV_VAR).to_string(),
            )),
            ("path", Some(value)) => Ok(Self::Path(value.to_string())),
            ("cache", None) => Ok(Self::CacheToken),
            ("none", None) => Ok(Self::None),
            ("literal" | "path", None) => Err(format!("expected a value for `{kind}`")),
            _ => Err(format!("invalid token source `{s}`")),
        }
    }
}

impl fmt::Display for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Never echo the secret itself.
            Self::Literal(_) => write!(f, "literal:<redacted>"),
            Self::EnvVar(value) => write!(f, "env:{value}"),
            Self::Path(value) => write!(f, "path:{value}"),
            Self::CacheToken => write!(f, "cache"),
            Self::None => write!(f, "none"),
        }
    }
}

#[derive(Error, Debug)]
enum TokenRetrievalError {
    #[error("No home directory.")]
    HomeDirectoryMissing,
}

/// Read a token from the given source. If the token cannot be read, a warning is logged
/// and *no token is used*.
pub fn get_token(source: &TokenSource) -> Result<Option<String>> {
    fn skip_token(input: &str) -> Option<String> {
        warn!("could not load token at {input:?}, using no HF token.");
        None
    }

    let token = match source {
        TokenSource::Literal(data) => Some(data.clone()),
        TokenSource::EnvVar(envvar) => env::var(envvar).ok().or_else(|| skip_token(envvar)),
        TokenSource::Path(path) => fs::read_to_string(path).ok().or_else(|| skip_token(path)),
        TokenSource::CacheToken => {
            let path = dirs::home_dir()
                .ok_or(TokenRetrievalError::HomeDirectoryMissing)?
                .join(".cache")
                .join("huggingface")
                .join("token");

            fs::read_to_string(&path)
                .ok()
                .or_else(|| skip_token(&path.display().to_string()))
        }
        TokenSource::None => None,
    };

    Ok(token.map(|s| s.trim().to_string()))
}

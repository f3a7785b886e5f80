use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local, TimeZone};
use tracing::info;

/// `strftime` pattern of the timestamp prefix, second granularity.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const IMAGE_SUFFIX: &str = "_image.png";

/// The directory generated images are written into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLocation {
    dir: PathBuf,
}

impl OutputLocation {
    /// Create `dir` (and its parents) if it does not exist yet. Existing contents are left alone.
    pub fn prepare<P: AsRef<Path>>(dir: P) -> std::io::Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            info!("creating output directory {}", dir.display());
        }
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<YYYYMMDD_HHMMSS>_image.png`. Two calls within the same second give the same path.
    pub fn image_path<Tz: TimeZone>(&self, timestamp: &DateTime<Tz>) -> PathBuf
    where
        Tz::Offset: std::fmt::Display,
    {
        self.dir.join(format!(
            "{}{IMAGE_SUFFIX}",
            timestamp.format(TIMESTAMP_FORMAT)
        ))
    }

    pub fn image_path_now(&self) -> PathBuf {
        self.image_path(&Local::now())
    }
}

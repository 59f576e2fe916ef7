use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, StreamError};
use crate::media::{Frame, MemorySource, MjpegFile, VideoSource};

/// Builds a fresh source for each session that opens a resource.
pub type SourceFactory = Arc<dyn Fn() -> Box<dyn VideoSource> + Send + Sync>;

/// Resolves resource names from SETUP requests to video sources.
///
/// Registered names are tried first; anything else is looked up as an
/// MJPEG file under the media root. Every SETUP gets its own source,
/// so sessions never share a read position.
#[derive(Clone)]
pub struct SourceRegistry {
    sources: Arc<RwLock<HashMap<String, SourceFactory>>>,
    media_root: Arc<RwLock<Option<PathBuf>>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            sources: Arc::new(RwLock::new(HashMap::new())),
            media_root: Arc::new(RwLock::new(None)),
        }
    }

    /// Register a named source. Replaces any existing source of the same name.
    pub fn add<F>(&self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn VideoSource> + Send + Sync + 'static,
    {
        self.sources
            .write()
            .insert(name.to_string(), Arc::new(factory));
        tracing::info!(name, "video source registered");
    }

    /// Register an in-memory clip; each session replays it from the start.
    pub fn add_frames(&self, name: &str, frames: Vec<Frame>) {
        let frames = Arc::new(frames);
        self.add(name, move || Box::new(MemorySource::new(frames.as_ref().clone())));
    }

    /// Directory searched for names that are not registered.
    pub fn set_media_root(&self, root: impl Into<PathBuf>) {
        *self.media_root.write() = Some(root.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sources.read().contains_key(resource_name(name))
    }

    /// Open the source named by a request's resource field.
    pub fn open(&self, resource: &str) -> Result<Box<dyn VideoSource>> {
        let name = resource_name(resource);
        if let Some(factory) = self.sources.read().get(name).cloned() {
            return Ok(factory());
        }

        let Some(root) = self.media_root.read().clone() else {
            return Err(StreamError::SourceNotFound(name.to_string()));
        };
        let path = resolve_under(&root, name)
            .ok_or_else(|| StreamError::SourceNotFound(name.to_string()))?;
        let file = MjpegFile::open(&path)?;
        tracing::debug!(path = %path.display(), frames = file.total_frames(), "opened video file");
        Ok(Box::new(file))
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip an `rtsp://host:port/` prefix from a resource field.
///
/// `rtsp://host:8554/movie.mjpeg` → `movie.mjpeg`
/// `/movie.mjpeg`                 → `movie.mjpeg`
/// `movie.mjpeg`                  → `movie.mjpeg`
pub fn resource_name(resource: &str) -> &str {
    let path = match resource
        .strip_prefix("rtsp://")
        .or_else(|| resource.strip_prefix("rtsps://"))
    {
        Some(after) => after.find('/').map_or("", |slash| &after[slash..]),
        None => resource,
    };
    path.trim_start_matches('/')
}

/// Join `name` onto `root`, refusing anything that would escape it.
fn resolve_under(root: &Path, name: &str) -> Option<PathBuf> {
    let relative = Path::new(name);
    let normal = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    (normal && !name.is_empty()).then(|| root.join(relative))
}

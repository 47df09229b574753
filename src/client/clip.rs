use anyhow::{Context, Result};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Writes synthesized audio to a fresh temp file and returns its path.
/// The caller owns the file from then on.
pub fn write_clip(dir: &Path, audio: &[u8]) -> Result<PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix("voxa_response_")
        .suffix(".mp3")
        .tempfile_in(dir)
        .with_context(|| format!("failed to create audio clip in {}", dir.display()))?;
    file.write_all(audio).context("failed to write audio clip")?;
    file.flush().context("failed to write audio clip")?;

    let (_, path) = file.keep().context("failed to keep audio clip")?;
    Ok(path)
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

pub fn remove_clip(path: &Path, policy: &RetryPolicy) -> Result<bool> {
    remove_with_retry(path, policy, |p| std::fs::remove_file(p))
}

/// Removes `path`, retrying while the playback side still holds it open.
///
/// Returns `Ok(false)` when every attempt hit a sharing violation; a leaked
/// clip is not worth surfacing. Other I/O errors are returned.
pub fn remove_with_retry<F>(path: &Path, policy: &RetryPolicy, mut remove: F) -> Result<bool>
where
    F: FnMut(&Path) -> io::Result<()>,
{
    for attempt in 1..=policy.attempts {
        match remove(path) {
            Ok(()) => return Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                debug!(attempt, path = %path.display(), "clip still in use");
                if attempt < policy.attempts {
                    thread::sleep(policy.backoff);
                }
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to remove {}", path.display()))
            }
        }
    }

    debug!(path = %path.display(), "giving up on removing clip");
    Ok(false)
}

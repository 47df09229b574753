use anyhow::{bail, Context, Result};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Opens the host's audio output. Each call hands out a device that lives
/// for exactly one playback cycle.
pub trait AudioBackend: Send + Sync {
    fn open(&self) -> Result<Box<dyn AudioDevice>>;
}

/// An acquired output device. Dropping it tears the device down.
pub trait AudioDevice {
    fn load(&mut self, clip: &Path) -> Result<()>;
    fn play(&mut self) -> Result<()>;
    fn is_busy(&self) -> bool;
    fn stop(&mut self);
    fn unload(&mut self);
}

#[derive(Debug, Clone)]
pub struct PlaybackSettings {
    pub poll_interval: Duration,
    pub max_duration: Duration,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_duration: Duration::from_secs(600),
        }
    }
}

/// Holds the device for one cycle; stop + unload + teardown run on drop,
/// whichever way the cycle ends.
struct PlaybackGuard {
    device: Box<dyn AudioDevice>,
}

impl PlaybackGuard {
    fn acquire(backend: &dyn AudioBackend) -> Result<Self> {
        let device = backend.open().context("failed to open audio output")?;
        debug!("audio device acquired");
        Ok(Self { device })
    }
}

impl Drop for PlaybackGuard {
    fn drop(&mut self) {
        self.device.stop();
        self.device.unload();
        debug!("audio device released");
    }
}

/// Plays `clip` to completion. Blocks the calling thread; run it on a
/// blocking task.
pub fn play_clip(backend: &dyn AudioBackend, clip: &Path, settings: &PlaybackSettings) -> Result<()> {
    let mut guard = PlaybackGuard::acquire(backend)?;
    guard.device.load(clip)?;
    guard.device.play()?;

    let started = Instant::now();
    while guard.device.is_busy() {
        if started.elapsed() >= settings.max_duration {
            warn!(limit = ?settings.max_duration, "playback did not finish, stopping");
            bail!(
                "playback still running after {}s",
                settings.max_duration.as_secs_f32()
            );
        }
        thread::sleep(settings.poll_interval);
    }

    debug!(elapsed = ?started.elapsed(), "playback finished");
    Ok(())
}

// ---------------------------------------------------------
// rodio output
// ---------------------------------------------------------
#[derive(Debug, Default, Clone, Copy)]
pub struct RodioBackend;

impl AudioBackend for RodioBackend {
    fn open(&self) -> Result<Box<dyn AudioDevice>> {
        let (stream, handle) =
            OutputStream::try_default().context("no default audio output device")?;
        let sink = Sink::try_new(&handle).context("failed to create audio sink")?;
        sink.pause();
        Ok(Box::new(RodioDevice {
            sink,
            _handle: handle,
            _stream: stream,
        }))
    }
}

// Field order matters: the sink must go before the stream it plays into.
struct RodioDevice {
    sink: Sink,
    _handle: OutputStreamHandle,
    _stream: OutputStream,
}

impl AudioDevice for RodioDevice {
    fn load(&mut self, clip: &Path) -> Result<()> {
        let file =
            File::open(clip).with_context(|| format!("failed to open {}", clip.display()))?;
        let source = Decoder::new(BufReader::new(file))
            .with_context(|| format!("failed to decode {}", clip.display()))?;
        self.sink.append(source);
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        self.sink.play();
        Ok(())
    }

    fn is_busy(&self) -> bool {
        !self.sink.empty()
    }

    fn stop(&mut self) {
        self.sink.stop();
    }

    fn unload(&mut self) {
        self.sink.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::cell::Cell;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counters {
        opened: AtomicUsize,
        stopped: AtomicUsize,
        unloaded: AtomicUsize,
        released: AtomicUsize,
    }

    struct FakeBackend {
        counters: Arc<Counters>,
        busy_polls: usize,
        fail_load: bool,
    }

    struct FakeDevice {
        counters: Arc<Counters>,
        busy_polls: Cell<usize>,
        fail_load: bool,
    }

    impl AudioBackend for FakeBackend {
        fn open(&self) -> Result<Box<dyn AudioDevice>> {
            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeDevice {
                counters: self.counters.clone(),
                busy_polls: Cell::new(self.busy_polls),
                fail_load: self.fail_load,
            }))
        }
    }

    impl AudioDevice for FakeDevice {
        fn load(&mut self, _clip: &Path) -> Result<()> {
            if self.fail_load {
                return Err(anyhow!("unsupported format"));
            }
            Ok(())
        }

        fn play(&mut self) -> Result<()> {
            Ok(())
        }

        fn is_busy(&self) -> bool {
            let left = self.busy_polls.get();
            if left == 0 {
                return false;
            }
            self.busy_polls.set(left - 1);
            true
        }

        fn stop(&mut self) {
            self.counters.stopped.fetch_add(1, Ordering::SeqCst);
        }

        fn unload(&mut self) {
            self.counters.unloaded.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Drop for FakeDevice {
        fn drop(&mut self) {
            self.counters.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast() -> PlaybackSettings {
        PlaybackSettings {
            poll_interval: Duration::from_millis(1),
            max_duration: Duration::from_secs(5),
        }
    }

    #[test]
    fn plays_until_idle_then_releases() {
        let counters = Arc::new(Counters::default());
        let backend = FakeBackend {
            counters: counters.clone(),
            busy_polls: 3,
            fail_load: false,
        };

        play_clip(&backend, Path::new("clip.mp3"), &fast()).unwrap();

        assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
        assert_eq!(counters.stopped.load(Ordering::SeqCst), 1);
        assert_eq!(counters.unloaded.load(Ordering::SeqCst), 1);
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn load_failure_still_releases_device() {
        let counters = Arc::new(Counters::default());
        let backend = FakeBackend {
            counters: counters.clone(),
            busy_polls: 0,
            fail_load: true,
        };

        let err = play_clip(&backend, Path::new("clip.mp3"), &fast()).unwrap_err();

        assert!(err.to_string().contains("unsupported format"));
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn endless_playback_is_cut_off() {
        let counters = Arc::new(Counters::default());
        let backend = FakeBackend {
            counters: counters.clone(),
            busy_polls: usize::MAX,
            fail_load: false,
        };
        let settings = PlaybackSettings {
            poll_interval: Duration::from_millis(1),
            max_duration: Duration::from_millis(20),
        };

        let err = play_clip(&backend, Path::new("clip.mp3"), &settings).unwrap_err();

        assert!(err.to_string().contains("still running"));
        assert_eq!(counters.stopped.load(Ordering::SeqCst), 1);
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
    }
}

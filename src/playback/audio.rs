//! playback/audio.rs
//! Audio channel: clip + backend voice + end-of-track watchdog.
//!
//! All voice/state/listener access goes through one mutex, so watchdog
//! polls serialize against transport calls. The watchdog thread spans the
//! channel's whole lifetime, not just active playback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use super::backend::{AudioBackend, AudioVoice, RodioBackend};
use super::clip::AudioClip;
use super::error::AudioError;
use super::{ListenerId, Listeners, PlayerEvent};
use crate::types::PlaybackState;

/// How often the watchdog asks the voice whether it is still playing.
const WATCHDOG_POLL: Duration = Duration::from_millis(50);

struct AudioInner {
    state: PlaybackState,
    volume: f32,
    voice: Option<Box<dyn AudioVoice>>,
}

pub(crate) struct AudioShared {
    inner: Mutex<AudioInner>,
    listeners: Listeners,
    run_watchdog: AtomicBool,
}

impl AudioShared {
    /// Current playback position, zero unless playing or paused.
    pub(crate) fn position(&self) -> Duration {
        let inner = self.inner.lock().unwrap();
        match inner.state {
            PlaybackState::Playing | PlaybackState::Paused => inner
                .voice
                .as_ref()
                .map(|v| v.position())
                .unwrap_or(Duration::ZERO),
            _ => Duration::ZERO,
        }
    }
}

/// Plays one audio clip through a backend voice.
///
/// Stop-by-exhaustion is detected by the watchdog and fires
/// [`PlayerEvent::TrackEnded`] exactly once; an explicit [`stop`] never
/// does. Audio state changes are not fan-out events.
///
/// [`stop`]: AudioChannel::stop
pub struct AudioChannel {
    backend: Option<Box<dyn AudioBackend>>,
    clip: Option<AudioClip>,
    shared: Arc<AudioShared>,
    watchdog: Option<JoinHandle<()>>,
}

impl AudioChannel {
    /// Channel over the default rodio output.
    ///
    /// If the output device cannot be opened, the channel still
    /// constructs but audio is permanently unavailable: every `load`
    /// fails with [`AudioError::BackendUnavailable`].
    pub fn new() -> Self {
        let backend: Option<Box<dyn AudioBackend>> = match RodioBackend::new() {
            Ok(b) => Some(Box::new(b)),
            Err(e) => {
                warn!(error = %e, "audio output unavailable");
                None
            }
        };
        Self::start(backend)
    }

    /// Channel over an injected backend.
    pub fn with_backend(backend: Box<dyn AudioBackend>) -> Self {
        Self::start(Some(backend))
    }

    fn start(backend: Option<Box<dyn AudioBackend>>) -> Self {
        let shared = Arc::new(AudioShared {
            inner: Mutex::new(AudioInner {
                state: PlaybackState::Empty,
                volume: 1.0,
                voice: None,
            }),
            listeners: Listeners::new(),
            run_watchdog: AtomicBool::new(true),
        });
        let watchdog = spawn_watchdog(Arc::clone(&shared));
        Self {
            backend,
            clip: None,
            shared,
            watchdog: Some(watchdog),
        }
    }

    /// Replace the loaded clip. Stops any current playback first; on
    /// failure the channel is left `Empty`.
    pub fn load(&mut self, data: Vec<u8>) -> Result<(), AudioError> {
        self.stop();
        self.clip = None;
        self.shared.inner.lock().unwrap().state = PlaybackState::Empty;

        let backend = self.backend.as_ref().ok_or(AudioError::BackendUnavailable)?;
        let clip = backend.create_clip(data.into())?;
        debug!(duration = ?clip.duration(), "audio clip loaded");

        self.clip = Some(clip);
        self.shared.inner.lock().unwrap().state = PlaybackState::Stopped;
        Ok(())
    }

    /// Discard the loaded clip, back to `Empty`.
    pub fn clear(&mut self) {
        self.stop();
        self.clip = None;
        self.shared.inner.lock().unwrap().state = PlaybackState::Empty;
    }

    /// Start from the top when stopped, resume when paused, no-op
    /// otherwise.
    pub fn play(&self) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        let mut inner = self.shared.inner.lock().unwrap();
        match inner.state {
            PlaybackState::Stopped => {
                let Some(clip) = self.clip.as_ref() else {
                    return;
                };
                match backend.start_voice(clip, inner.volume) {
                    Ok(voice) => {
                        inner.voice = Some(voice);
                        inner.state = PlaybackState::Playing;
                        debug!("audio playing");
                    }
                    Err(e) => warn!(error = %e, "failed to start audio voice"),
                }
            }
            PlaybackState::Paused => {
                if let Some(voice) = inner.voice.as_ref() {
                    voice.resume();
                }
                inner.state = PlaybackState::Playing;
                debug!("audio resumed");
            }
            _ => {}
        }
    }

    pub fn pause(&self) {
        let mut inner = self.shared.inner.lock().unwrap();
        if inner.state == PlaybackState::Playing {
            if let Some(voice) = inner.voice.as_ref() {
                voice.pause();
            }
            inner.state = PlaybackState::Paused;
            debug!("audio paused");
        }
    }

    /// Explicit stop. Never fires track-ended.
    pub fn stop(&self) {
        let mut inner = self.shared.inner.lock().unwrap();
        if matches!(inner.state, PlaybackState::Playing | PlaybackState::Paused) {
            if let Some(voice) = inner.voice.take() {
                voice.stop();
            }
            inner.state = PlaybackState::Stopped;
            debug!("audio stopped");
        }
    }

    /// Reposition the active voice. No-op unless playing or paused.
    pub fn seek(&self, position: Duration) {
        let inner = self.shared.inner.lock().unwrap();
        if matches!(inner.state, PlaybackState::Playing | PlaybackState::Paused) {
            if let Some(voice) = inner.voice.as_ref() {
                if let Err(e) = voice.seek(position) {
                    warn!(error = %e, "audio seek failed");
                }
            }
        }
    }

    /// Volume in `[0, 1]`; out-of-range input is clamped.
    pub fn set_volume(&self, volume: f32) {
        let mut inner = self.shared.inner.lock().unwrap();
        inner.volume = volume.clamp(0.0, 1.0);
        let v = inner.volume;
        if let Some(voice) = inner.voice.as_ref() {
            voice.set_volume(v);
        }
    }

    pub fn volume(&self) -> f32 {
        self.shared.inner.lock().unwrap().volume
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.inner.lock().unwrap().state
    }

    /// Backend play position, zero unless playing or paused.
    pub fn position(&self) -> Duration {
        self.shared.position()
    }

    /// Probed clip duration, zero when unknown or nothing is loaded.
    pub fn duration(&self) -> Duration {
        self.clip
            .as_ref()
            .and_then(|c| c.duration())
            .unwrap_or(Duration::ZERO)
    }

    pub fn add_listener(
        &self,
        callback: impl Fn(&PlayerEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.shared.listeners.add(callback)
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.shared.listeners.remove(id);
    }

    /// Channel-based subscription; the receiver sees events in emission
    /// order.
    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        self.shared.listeners.subscribe()
    }

    pub(crate) fn shared(&self) -> Arc<AudioShared> {
        Arc::clone(&self.shared)
    }
}

impl Default for AudioChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AudioChannel {
    fn drop(&mut self) {
        self.shared.run_watchdog.store(false, Ordering::Relaxed);
        if let Some(handle) = self.watchdog.take() {
            let _ = handle.join();
        }
        self.stop();
    }
}

fn spawn_watchdog(shared: Arc<AudioShared>) -> JoinHandle<()> {
    thread::spawn(move || {
        while shared.run_watchdog.load(Ordering::Relaxed) {
            let ended = {
                let mut inner = shared.inner.lock().unwrap();
                if inner.state == PlaybackState::Playing
                    && !inner.voice.as_ref().is_some_and(|v| v.is_active())
                {
                    inner.state = PlaybackState::Stopped;
                    inner.voice = None;
                    true
                } else {
                    false
                }
            };
            if ended {
                debug!("audio exhausted, track ended");
                shared.listeners.emit(&PlayerEvent::TrackEnded);
            }
            thread::sleep(WATCHDOG_POLL);
        }
    })
}

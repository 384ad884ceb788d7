//! playback/sync.rs
//! Composite player: one audio channel + one video clock in lockstep.
//!
//! The video clock is the state and time authority; audio is the better
//! clock. A low-frequency thread reads the audio position and feeds it
//! to the video clock as a drift target, coarse on purpose: anchoring
//! every tick would fight the clock's own per-frame convergence and
//! cause visible jitter, so convergence gets about a second to settle
//! between anchors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, trace};

use super::audio::AudioChannel;
use super::error::LoadError;
use super::video::{ClockCommand, VideoClock};
use super::{ListenerId, Listeners, PlayerEvent};
use crate::types::{Frame, PlaybackState};

/// Cadence of the re-anchoring thread.
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// Thread tick.
    pub poll_interval: Duration,
    /// Anchor the video clock on every Nth tick.
    pub anchor_every: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            anchor_every: 20,
        }
    }
}

#[derive(Default)]
struct EndFlags {
    video: bool,
    audio: bool,
}

struct SyncShared {
    flags: Mutex<EndFlags>,
    has_audio: AtomicBool,
    run_sync: AtomicBool,
    listeners: Listeners,
}

impl SyncShared {
    /// Rendezvous rule: the composite track-ended fires only once both
    /// sub-players have signaled theirs, or immediately when there is no
    /// audio stream. Either way the re-anchoring thread winds down.
    fn on_video_ended(&self) {
        self.run_sync.store(false, Ordering::Relaxed);
        let fire = {
            let mut flags = self.flags.lock().unwrap();
            if flags.audio || !self.has_audio.load(Ordering::Relaxed) {
                *flags = EndFlags::default();
                true
            } else {
                flags.video = true;
                false
            }
        };
        if fire {
            debug!("track ended");
            self.listeners.emit(&PlayerEvent::TrackEnded);
        }
    }

    fn on_audio_ended(&self) {
        self.run_sync.store(false, Ordering::Relaxed);
        let fire = {
            let mut flags = self.flags.lock().unwrap();
            if flags.video {
                *flags = EndFlags::default();
                true
            } else {
                flags.audio = true;
                false
            }
        };
        if fire {
            debug!("track ended");
            self.listeners.emit(&PlayerEvent::TrackEnded);
        }
    }
}

/// Synchronized playback of a frame sequence and an audio stream.
///
/// Transport commands fan out to both sub-players; state, time and
/// duration come from the video clock; track-ended is the rendezvous of
/// both sub-players' end signals, so the shorter stream never truncates
/// the longer one.
pub struct AvSynchronizer {
    video: VideoClock,
    audio: AudioChannel,
    shared: Arc<SyncShared>,
    config: SyncConfig,
    sync_thread: Option<JoinHandle<()>>,
}

impl AvSynchronizer {
    /// Synchronizer over the default audio output.
    pub fn new() -> Self {
        Self::with_audio(AudioChannel::new(), SyncConfig::default())
    }

    /// Synchronizer over a caller-built audio channel and an explicit
    /// anchor cadence.
    pub fn with_audio(audio: AudioChannel, config: SyncConfig) -> Self {
        let video = VideoClock::new();
        let shared = Arc::new(SyncShared {
            flags: Mutex::new(EndFlags::default()),
            has_audio: AtomicBool::new(false),
            run_sync: AtomicBool::new(false),
            listeners: Listeners::new(),
        });

        // Video drives the composite's event stream; its end signal joins
        // the rendezvous instead of passing through.
        let forward = Arc::clone(&shared);
        video.add_listener(move |event| match event {
            PlayerEvent::TrackEnded => forward.on_video_ended(),
            other => forward.listeners.emit(other),
        });

        // Audio only contributes its end signal.
        let merge = Arc::clone(&shared);
        audio.add_listener(move |event| {
            if matches!(event, PlayerEvent::TrackEnded) {
                merge.on_audio_ended();
            }
        });

        Self {
            video,
            audio,
            shared,
            config,
            sync_thread: None,
        }
    }

    /// Load a stream. The video component must load; if audio bytes are
    /// present their load must succeed too, otherwise the whole load
    /// unwinds — a stream with broken audio is unloadable, not silently
    /// muted.
    pub fn load(
        &mut self,
        frames: Vec<Frame>,
        frame_interval: Duration,
        audio_data: Option<Vec<u8>>,
    ) -> Result<(), LoadError> {
        self.clear();
        self.video.load(frames, frame_interval)?;
        if let Some(data) = audio_data {
            self.shared.has_audio.store(true, Ordering::Relaxed);
            if let Err(e) = self.audio.load(data) {
                self.clear();
                return Err(e.into());
            }
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.stop_sync_thread();
        self.video.clear();
        self.audio.clear();
        *self.shared.flags.lock().unwrap() = EndFlags::default();
        self.shared.has_audio.store(false, Ordering::Relaxed);
    }

    pub fn play(&mut self) {
        let ended_previously = {
            let flags = self.shared.flags.lock().unwrap();
            flags.video || flags.audio
        };
        if ended_previously {
            // One stream ran out last run: restart both from the top.
            // The stale flag must not count toward the next rendezvous.
            self.video.stop();
            self.audio.stop();
            *self.shared.flags.lock().unwrap() = EndFlags::default();
        }

        self.video.play();
        self.audio.play();
        self.start_sync_thread();
    }

    pub fn pause(&mut self) {
        self.stop_sync_thread();
        self.video.pause();
        self.audio.pause();
    }

    pub fn stop(&mut self) {
        self.stop_sync_thread();
        *self.shared.flags.lock().unwrap() = EndFlags::default();
        self.video.stop();
        self.audio.stop();
    }

    /// Scrubbing snaps both sub-players into playback before the jump,
    /// so a paused or just-ended stream resumes from the new position.
    pub fn seek(&mut self, time: Duration) {
        *self.shared.flags.lock().unwrap() = EndFlags::default();
        self.video.play();
        self.audio.play();
        self.video.seek(time);
        self.audio.seek(time);
    }

    pub fn set_volume(&self, volume: f32) {
        self.audio.set_volume(volume);
    }

    pub fn volume(&self) -> f32 {
        self.audio.volume()
    }

    pub fn state(&self) -> PlaybackState {
        self.video.state()
    }

    pub fn position(&self) -> Duration {
        self.video.position()
    }

    pub fn duration(&self) -> Duration {
        self.video.duration()
    }

    pub fn width(&self) -> u32 {
        self.video.width()
    }

    pub fn height(&self) -> u32 {
        self.video.height()
    }

    /// Sink invoked once per presented frame, from the video clock's
    /// thread.
    pub fn set_present_frame(&self, callback: impl Fn(&Frame) + Send + Sync + 'static) {
        self.video.set_present_frame(callback);
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

    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        self.shared.listeners.subscribe()
    }

    fn start_sync_thread(&mut self) {
        self.stop_sync_thread();
        self.shared.run_sync.store(true, Ordering::Relaxed);

        let shared = Arc::clone(&self.shared);
        let video = self.video.shared();
        let audio = self.audio.shared();
        let poll_interval = self.config.poll_interval;
        let anchor_every = u64::from(self.config.anchor_every.max(1));

        self.sync_thread = Some(thread::spawn(move || {
            let mut tick: u64 = 0;
            while shared.run_sync.load(Ordering::Relaxed) {
                if tick % anchor_every == 0 && shared.has_audio.load(Ordering::Relaxed) {
                    let position = audio.position();
                    trace!(?position, "anchoring video clock to audio");
                    video.submit(ClockCommand::SyncTo(position));
                }
                tick += 1;
                thread::sleep(poll_interval);
            }
        }));
    }

    fn stop_sync_thread(&mut self) {
        self.shared.run_sync.store(false, Ordering::Relaxed);
        if let Some(handle) = self.sync_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Default for AvSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AvSynchronizer {
    fn drop(&mut self) {
        self.stop_sync_thread();
    }
}

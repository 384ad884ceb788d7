//! playback/backend.rs
//! Audio backend capability.
//!
//! The channel drives playback through two small traits so the engine
//! never touches the output library directly: a backend turns an opaque
//! buffer into a clip and starts voices on it, a voice is one playing
//! instance with transport controls. The production implementation is
//! rodio; tests inject a deterministic backend instead.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink, Source};

use super::clip::{self, AudioClip};
use super::error::AudioError;

/// Creates clips from opaque buffers and starts voices on them.
pub trait AudioBackend {
    /// Validate `data` as a playable clip and probe its duration.
    fn create_clip(&self, data: Arc<[u8]>) -> Result<AudioClip, AudioError>;

    /// Start a new voice for `clip` at `volume`, already playing.
    fn start_voice(&self, clip: &AudioClip, volume: f32) -> Result<Box<dyn AudioVoice>, AudioError>;
}

/// One playing instance of a clip.
///
/// Voices are controlled from the caller's thread and polled from the
/// channel's watchdog thread, so they must be `Send`.
pub trait AudioVoice: Send {
    fn pause(&self);
    fn resume(&self);
    fn stop(&self);
    fn set_volume(&self, volume: f32);
    fn seek(&self, position: Duration) -> Result<(), AudioError>;
    /// Still producing audio (playing or paused mid-stream). Goes false
    /// when the clip is exhausted or the voice was stopped.
    fn is_active(&self) -> bool;
    fn position(&self) -> Duration;
}

/// rodio-backed audio output.
///
/// Owns the `OutputStream`, which must stay alive for as long as any
/// voice plays. The stream is not `Send`; it stays on the thread that
/// constructed the channel, which is also the only thread that starts
/// voices.
pub struct RodioBackend {
    stream: OutputStream,
}

impl RodioBackend {
    pub fn new() -> Result<Self, AudioError> {
        let stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| AudioError::OutputInit(e.to_string()))?;
        Ok(Self { stream })
    }
}

impl AudioBackend for RodioBackend {
    fn create_clip(&self, data: Arc<[u8]>) -> Result<AudioClip, AudioError> {
        // Decode up front so a malformed buffer fails the load, not the
        // first play().
        let decoder = Decoder::new(Cursor::new(Arc::clone(&data)))
            .map_err(|e| AudioError::ClipDecode(e.to_string()))?;

        let duration = clip::probe_duration(&data).or_else(|| decoder.total_duration());
        Ok(AudioClip::new(data, duration))
    }

    fn start_voice(&self, clip: &AudioClip, volume: f32) -> Result<Box<dyn AudioVoice>, AudioError> {
        let decoder = Decoder::new(Cursor::new(clip.data()))
            .map_err(|e| AudioError::ClipDecode(e.to_string()))?;

        // Start paused, apply volume, then unpause, so the first audible
        // samples are already at the requested level.
        let sink = Sink::connect_new(self.stream.mixer());
        sink.pause();
        sink.append(decoder);
        sink.set_volume(volume);
        sink.play();

        Ok(Box::new(RodioVoice { sink }))
    }
}

struct RodioVoice {
    sink: Sink,
}

impl AudioVoice for RodioVoice {
    fn pause(&self) {
        self.sink.pause();
    }

    fn resume(&self) {
        self.sink.play();
    }

    fn stop(&self) {
        self.sink.stop();
    }

    fn set_volume(&self, volume: f32) {
        self.sink.set_volume(volume);
    }

    fn seek(&self, position: Duration) -> Result<(), AudioError> {
        self.sink
            .try_seek(position)
            .map_err(|e| AudioError::Seek(e.to_string()))
    }

    fn is_active(&self) -> bool {
        !self.sink.empty()
    }

    fn position(&self) -> Duration {
        self.sink.get_pos()
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Deterministic backend for tests: a clip of N bytes plays for
    //! exactly N milliseconds of wall-clock time.

    use std::sync::Mutex;
    use std::time::Instant;

    use super::*;

    pub(crate) struct MockBackend;

    impl AudioBackend for MockBackend {
        fn create_clip(&self, data: Arc<[u8]>) -> Result<AudioClip, AudioError> {
            if data.is_empty() {
                return Err(AudioError::ClipDecode("empty buffer".into()));
            }
            let duration = Duration::from_millis(data.len() as u64);
            Ok(AudioClip::new(data, Some(duration)))
        }

        fn start_voice(
            &self,
            clip: &AudioClip,
            _volume: f32,
        ) -> Result<Box<dyn AudioVoice>, AudioError> {
            Ok(Box::new(MockVoice {
                duration: clip.duration().unwrap_or_default(),
                state: Mutex::new(VoiceState {
                    base: Duration::ZERO,
                    resumed_at: Some(Instant::now()),
                }),
            }))
        }
    }

    struct VoiceState {
        base: Duration,
        resumed_at: Option<Instant>,
    }

    pub(crate) struct MockVoice {
        duration: Duration,
        state: Mutex<VoiceState>,
    }

    impl MockVoice {
        fn raw_position(state: &VoiceState) -> Duration {
            state.base
                + state
                    .resumed_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO)
        }
    }

    impl AudioVoice for MockVoice {
        fn pause(&self) {
            let mut state = self.state.lock().unwrap();
            let pos = Self::raw_position(&state);
            state.base = pos;
            state.resumed_at = None;
        }

        fn resume(&self) {
            let mut state = self.state.lock().unwrap();
            if state.resumed_at.is_none() {
                state.resumed_at = Some(Instant::now());
            }
        }

        fn stop(&self) {
            let mut state = self.state.lock().unwrap();
            state.base = self.duration;
            state.resumed_at = None;
        }

        fn set_volume(&self, _volume: f32) {}

        fn seek(&self, position: Duration) -> Result<(), AudioError> {
            let mut state = self.state.lock().unwrap();
            state.base = position;
            if state.resumed_at.is_some() {
                state.resumed_at = Some(Instant::now());
            }
            Ok(())
        }

        fn is_active(&self) -> bool {
            let state = self.state.lock().unwrap();
            Self::raw_position(&state) < self.duration
        }

        fn position(&self) -> Duration {
            let state = self.state.lock().unwrap();
            Self::raw_position(&state).min(self.duration)
        }
    }
}

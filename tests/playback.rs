//! End-to-end playback over an injected audio backend.
//!
//! The backend here is deterministic: a clip of N bytes plays for N
//! milliseconds of wall-clock time. That is enough to exercise loading,
//! transport, presentation, the end-of-track watchdog and the composite
//! rendezvous without touching an audio device.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use lockstep::{
    AudioBackend, AudioChannel, AudioClip, AudioError, AudioVoice, AvSynchronizer, Frame,
    PlaybackState, PlayerEvent, SyncConfig,
};

struct ByteClockBackend;

impl AudioBackend for ByteClockBackend {
    fn create_clip(&self, data: Arc<[u8]>) -> Result<AudioClip, AudioError> {
        if data.is_empty() {
            return Err(AudioError::ClipDecode("empty buffer".into()));
        }
        let duration = Duration::from_millis(data.len() as u64);
        Ok(AudioClip::new(data, Some(duration)))
    }

    fn start_voice(&self, clip: &AudioClip, _volume: f32) -> Result<Box<dyn AudioVoice>, AudioError> {
        Ok(Box::new(ByteClockVoice {
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

struct ByteClockVoice {
    duration: Duration,
    state: Mutex<VoiceState>,
}

impl ByteClockVoice {
    fn raw_position(state: &VoiceState) -> Duration {
        state.base
            + state
                .resumed_at
                .map(|t| t.elapsed())
                .unwrap_or(Duration::ZERO)
    }
}

impl AudioVoice for ByteClockVoice {
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

fn player() -> AvSynchronizer {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    AvSynchronizer::with_audio(
        AudioChannel::with_backend(Box::new(ByteClockBackend)),
        SyncConfig {
            poll_interval: Duration::from_millis(10),
            anchor_every: 10,
        },
    )
}

fn frames(n: usize) -> Vec<Frame> {
    (0..n)
        .map(|i| Frame::new(3, 2, vec![i as u8; 18]).unwrap())
        .collect()
}

#[test]
fn full_playback_run() {
    let interval = Duration::from_millis(30);
    let mut player = player();
    let rx = player.subscribe();

    let presented = Arc::new(AtomicUsize::new(0));
    let presented_in_callback = Arc::clone(&presented);
    player.set_present_frame(move |_frame| {
        presented_in_callback.fetch_add(1, Ordering::SeqCst);
    });

    // Video 150 ms, audio 600 ms.
    player
        .load(frames(5), interval, Some(vec![0; 600]))
        .unwrap();
    assert_eq!(player.state(), PlaybackState::Stopped);
    assert_eq!(player.duration(), interval * 5);
    assert_eq!((player.width(), player.height()), (3, 2));

    player.play();
    assert_eq!(player.state(), PlaybackState::Playing);

    // Video finishes first; the composite end waits on audio.
    thread::sleep(Duration::from_millis(300));
    assert_eq!(player.state(), PlaybackState::Stopped);
    assert_eq!(presented.load(Ordering::SeqCst), 5);
    assert!(
        rx.try_iter()
            .all(|e| !matches!(e, PlayerEvent::TrackEnded))
    );

    thread::sleep(Duration::from_millis(500));
    let ended = rx
        .try_iter()
        .filter(|e| matches!(e, PlayerEvent::TrackEnded))
        .count();
    assert_eq!(ended, 1);

    // A fully played stream restarts from the top.
    player.play();
    assert_eq!(player.state(), PlaybackState::Playing);
    assert!(player.position() <= interval * 2);

    player.stop();
    assert_eq!(player.state(), PlaybackState::Stopped);
    thread::sleep(Duration::from_millis(100));
    assert!(
        rx.try_iter()
            .all(|e| !matches!(e, PlayerEvent::TrackEnded))
    );
}

#[test]
fn silent_stream_ends_with_the_video() {
    let interval = Duration::from_millis(20);
    let mut player = player();
    let rx = player.subscribe();

    player.load(frames(4), interval, None).unwrap();
    player.play();

    thread::sleep(Duration::from_millis(250));
    assert_eq!(player.state(), PlaybackState::Stopped);
    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, PlayerEvent::TrackEnded))
            .count(),
        1
    );
    // Time notifications climbed monotonically up to the last frame.
    let times: Vec<Duration> = events
        .iter()
        .filter_map(|e| match e {
            PlayerEvent::TimeChanged(t) => Some(*t),
            _ => None,
        })
        .collect();
    assert!(!times.is_empty());
    assert!(times.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*times.last().unwrap(), interval * 3);
}

#[test]
fn scrub_while_paused_resumes_playback() {
    let interval = Duration::from_millis(20);
    let mut player = player();

    player
        .load(frames(500), interval, Some(vec![0; 20_000]))
        .unwrap();
    player.play();
    player.pause();
    assert_eq!(player.state(), PlaybackState::Paused);

    player.seek(Duration::from_secs(5));
    assert_eq!(player.state(), PlaybackState::Playing);

    thread::sleep(Duration::from_millis(200));
    let pos = player.position();
    assert!(pos >= Duration::from_secs(5), "pos {pos:?}");
    assert!(pos < Duration::from_secs(6), "pos {pos:?}");
    player.stop();
}

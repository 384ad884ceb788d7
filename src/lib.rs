//! Lockstep
//!
//! A synchronized audio/video playback engine. It plays a decoded frame
//! sequence and a decoded audio stream together, continuously measuring
//! and correcting the drift between the frame-stepping thread and the
//! audio backend's clock.
//!
//! What lives here:
//! - [`AudioChannel`]: one audio clip on a backend voice, with a watchdog
//!   that turns stop-by-exhaustion into a track-ended event
//! - [`VideoClock`]: the frame-pacing thread, its command queue, and the
//!   drift-convergence policy
//! - [`AvSynchronizer`]: both of the above plus the re-anchoring thread
//!   that feeds audio time into the video clock
//!
//! What does not: decoding containers or codecs, presenting pixels, any
//! UI. Frames and audio bytes arrive already decoded; presentation goes
//! out through a callback and an event subscription.
//!
//! # Concurrency model
//!
//! Plain OS threads, no async runtime. Each component guards its mutable
//! state with one mutex; cross-thread requests to the video clock travel
//! as queued commands through a condition variable, never as direct field
//! writes. `stop()` blocks until the worker thread notices, bounded by
//! one frame interval (video) or one poll tick (audio, synchronizer).
//!
//! ```no_run
//! use std::time::Duration;
//! use lockstep::{AvSynchronizer, Frame};
//!
//! let frames: Vec<Frame> = /* decoded by the container loader */
//! # Vec::new();
//! let audio: Vec<u8> = /* raw audio buffer for the backend */
//! # Vec::new();
//!
//! let mut player = AvSynchronizer::new();
//! player.set_present_frame(|frame| {
//!     // hand the frame to the display
//!     let _ = frame.pixels();
//! });
//! player.load(frames, Duration::from_micros(33_333), Some(audio))?;
//! player.play();
//! # Ok::<(), lockstep::LoadError>(())
//! ```

pub mod playback;
pub mod types;

pub use playback::{
    AudioBackend, AudioChannel, AudioClip, AudioError, AudioVoice, AvSynchronizer, ListenerId,
    LoadError, PlayerEvent, RodioBackend, SyncConfig, VideoClock,
};
pub use types::{Frame, FrameError, PlaybackState};

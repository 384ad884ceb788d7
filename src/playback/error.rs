//! playback/error.rs
//! Error types of the engine.
//!
//! Load failures are values; calling a transport operation in the wrong
//! state is a silent no-op, not an error.

use thiserror::Error;

/// Errors from the audio backend or the audio channel.
#[derive(Error, Debug)]
pub enum AudioError {
    /// The output device could not be initialized at construction.
    /// Audio stays unavailable for this instance; loads keep failing
    /// with this error.
    #[error("audio backend unavailable")]
    BackendUnavailable,

    /// Failed to open the audio output stream.
    #[error("failed to open audio output: {0}")]
    OutputInit(String),

    /// The loaded buffer is not a decodable audio clip.
    #[error("failed to decode audio clip: {0}")]
    ClipDecode(String),

    /// Seeking the active voice failed.
    #[error("audio seek failed: {0}")]
    Seek(String),
}

/// Errors from loading media into the engine.
#[derive(Error, Debug)]
pub enum LoadError {
    /// The frame sequence is empty.
    #[error("no frames provided")]
    NoFrames,

    /// A frame's dimensions differ from the first frame's.
    #[error("frame {index} is {got_width}x{got_height}, expected {want_width}x{want_height}")]
    FrameSizeMismatch {
        index: usize,
        want_width: u32,
        want_height: u32,
        got_width: u32,
        got_height: u32,
    },

    /// The frame interval must be non-zero.
    #[error("frame interval must be non-zero")]
    ZeroFrameInterval,

    /// The stream's audio component failed to load; the composite load
    /// unwinds rather than playing video silently.
    #[error(transparent)]
    Audio(#[from] AudioError),
}

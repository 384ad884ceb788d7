//! playback/clip.rs
//! In-memory audio clip + duration probe (Symphonia).
//!
//! The engine never decodes audio itself; the buffer is opaque input for
//! the backend. The one thing worth knowing up front is the clip's
//! duration, and the backend decoder does not reliably report it, so we
//! probe the container's codec parameters directly.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// A loaded audio clip: the raw encoded buffer plus its probed duration.
///
/// The buffer is immutable after load; voices started on the clip read
/// from the shared `Arc`.
#[derive(Clone)]
pub struct AudioClip {
    data: Arc<[u8]>,
    duration: Option<Duration>,
}

impl AudioClip {
    pub fn new(data: Arc<[u8]>, duration: Option<Duration>) -> Self {
        Self { data, duration }
    }

    pub fn data(&self) -> Arc<[u8]> {
        Arc::clone(&self.data)
    }

    /// Probed clip length, if the container declared one.
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }
}

/// Probe `data` for its playable duration.
///
/// Duration is time_base * n_frames from the default track's codec
/// parameters; either may be absent, in which case the clip length is
/// unknown.
pub(crate) fn probe_duration(data: &Arc<[u8]>) -> Option<Duration> {
    let mss = MediaSourceStream::new(
        Box::new(Cursor::new(Arc::clone(data))),
        MediaSourceStreamOptions::default(),
    );

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .ok()?;

    let track = probed.format.default_track()?;
    let tb = track.codec_params.time_base?;
    let frames = track.codec_params.n_frames?;

    let t = tb.calc_time(frames);
    Some(Duration::from_secs_f64(t.seconds as f64 + t.frac))
}

//! playback/mod.rs
//! Synchronized playback core.
//!
//! Three components:
//! - [`AudioChannel`]: audio clip + backend voice + end-of-track watchdog
//! - [`VideoClock`]: frame-stepping thread with command queue and drift
//!   convergence
//! - [`AvSynchronizer`]: one of each, kept in lockstep by periodically
//!   re-anchoring the video clock to the audio position
//!
//! Observers register either a callback or an mpsc channel; events are
//! emitted synchronously from the worker thread that produced them, so
//! callbacks must not block for long.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub mod audio;
pub mod backend;
pub mod clip;
pub mod error;
pub mod sync;
pub mod video;

pub use audio::AudioChannel;
pub use backend::{AudioBackend, AudioVoice, RodioBackend};
pub use clip::AudioClip;
pub use error::{AudioError, LoadError};
pub use sync::{AvSynchronizer, SyncConfig};
pub use video::VideoClock;

use crate::types::{Frame, PlaybackState};

/// Something happened inside a player component.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// Playback state changed to the contained value.
    StateChanged(PlaybackState),
    /// Nominal playback time of the frame about to be shown.
    TimeChanged(Duration),
    /// A frame was presented.
    FrameChanged(Frame),
    /// Playback ran off the end of the media. Fired at most once per
    /// playback run; an explicit `stop()` never fires it.
    TrackEnded,
}

/// Handle for removing a registered callback observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback = Arc<dyn Fn(&PlayerEvent) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    callbacks: HashMap<u64, Callback>,
    channels: Vec<Sender<PlayerEvent>>,
}

/// Observer registry shared between a component and its worker thread.
///
/// Channel subscribers are best-effort: a receiver that went away is
/// pruned at the next emission (the sender side never blocks).
pub(crate) struct Listeners {
    subs: Mutex<Subscribers>,
}

impl Listeners {
    pub(crate) fn new() -> Self {
        Self {
            subs: Mutex::new(Subscribers::default()),
        }
    }

    pub(crate) fn add(&self, callback: impl Fn(&PlayerEvent) + Send + Sync + 'static) -> ListenerId {
        let mut subs = self.subs.lock().unwrap();
        let id = subs.next_id;
        subs.next_id += 1;
        subs.callbacks.insert(id, Arc::new(callback));
        ListenerId(id)
    }

    pub(crate) fn remove(&self, id: ListenerId) {
        self.subs.lock().unwrap().callbacks.remove(&id.0);
    }

    pub(crate) fn subscribe(&self) -> Receiver<PlayerEvent> {
        let (tx, rx) = mpsc::channel();
        self.subs.lock().unwrap().channels.push(tx);
        rx
    }

    /// Deliver `event` to every observer.
    ///
    /// Callbacks are snapshotted and invoked with the registry unlocked,
    /// so an observer may add or remove listeners from inside its
    /// callback.
    pub(crate) fn emit(&self, event: &PlayerEvent) {
        let callbacks: Vec<Callback> = {
            let mut subs = self.subs.lock().unwrap();
            subs.channels.retain(|tx| tx.send(event.clone()).is_ok());
            subs.callbacks.values().cloned().collect()
        };
        for callback in callbacks {
            callback(event);
        }
    }
}

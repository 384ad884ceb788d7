//! playback/video.rs
//! Video clock: owns the frame sequence and the thread that paces it.
//!
//! The playback thread sleeps one frame interval per cycle, shortened by
//! two corrections: time already spent servicing commands within the
//! frame, and this cycle's share of the drift toward an external time
//! source. Transport requests from other threads never touch the clock's
//! fields directly; they are queued as commands and the condition
//! variable wakes the thread early to service exactly one per wake.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use super::error::LoadError;
use super::{ListenerId, Listeners, PlayerEvent};
use crate::types::{Frame, PlaybackState};

/// 30 fps until a load says otherwise.
const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_micros(33_333);

type PresentFn = Arc<dyn Fn(&Frame) + Send + Sync>;

/// A queued request for the clock thread, serviced one per wake-up in
/// submission order.
pub(crate) enum ClockCommand {
    /// Jump to the frame containing the given time, aligning the next
    /// presentation boundary. Restarts the current frame's timing.
    Seek(Duration),
    /// Set the drift target from an external (audio) clock reading.
    /// The current frame's timing continues.
    SyncTo(Duration),
    /// Reply with the true elapsed time, including the in-frame part
    /// that `position()` rounds away.
    QueryTime(mpsc::Sender<Duration>),
}

struct VideoInner {
    state: PlaybackState,
    frames: Arc<[Frame]>,
    frame_interval: Duration,
    current_frame: usize,
    /// Signed distance to the external clock, microseconds. Positive
    /// means the external source is ahead and the clock must speed up.
    target_delta_us: i64,
    queue: VecDeque<ClockCommand>,
    present: Option<PresentFn>,
}

pub(crate) struct VideoShared {
    inner: Mutex<VideoInner>,
    cv: Condvar,
    listeners: Listeners,
}

impl VideoShared {
    /// Enqueue a command and wake the clock thread. Accepted only while
    /// playing or paused.
    pub(crate) fn submit(&self, command: ClockCommand) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if matches!(
            inner.state,
            PlaybackState::Playing | PlaybackState::Paused
        ) {
            inner.queue.push_back(command);
            self.cv.notify_all();
            true
        } else {
            false
        }
    }
}

/// Paces an immutable frame sequence at a fixed frame interval.
///
/// The clock is the engine's state and time authority. It converges
/// toward an external time source fed in through [`sync_to_external`]
/// rather than jumping, closing a bounded fraction of the gap each frame.
///
/// [`sync_to_external`]: VideoClock::sync_to_external
pub struct VideoClock {
    shared: Arc<VideoShared>,
    thread: Option<JoinHandle<()>>,
}

impl VideoClock {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(VideoShared {
                inner: Mutex::new(VideoInner {
                    state: PlaybackState::Empty,
                    frames: Vec::new().into(),
                    frame_interval: DEFAULT_FRAME_INTERVAL,
                    current_frame: 0,
                    target_delta_us: 0,
                    queue: VecDeque::new(),
                    present: None,
                }),
                cv: Condvar::new(),
                listeners: Listeners::new(),
            }),
            thread: None,
        }
    }

    /// Replace the frame sequence. Every frame must share the first
    /// frame's dimensions; failure leaves the clock `Empty`.
    pub fn load(&mut self, frames: Vec<Frame>, frame_interval: Duration) -> Result<(), LoadError> {
        self.clear();

        if frames.is_empty() {
            return Err(LoadError::NoFrames);
        }
        if frame_interval.is_zero() {
            return Err(LoadError::ZeroFrameInterval);
        }
        let want_width = frames[0].width();
        let want_height = frames[0].height();
        for (index, frame) in frames.iter().enumerate() {
            if frame.width() != want_width || frame.height() != want_height {
                return Err(LoadError::FrameSizeMismatch {
                    index,
                    want_width,
                    want_height,
                    got_width: frame.width(),
                    got_height: frame.height(),
                });
            }
        }

        let mut inner = self.shared.inner.lock().unwrap();
        debug!(frames = frames.len(), ?frame_interval, "video loaded");
        inner.frames = frames.into();
        inner.frame_interval = frame_interval;
        inner.current_frame = 0;
        inner.state = PlaybackState::Stopped;
        Ok(())
    }

    /// Discard the frame sequence, back to `Empty`.
    pub fn clear(&mut self) {
        self.stop();
        {
            let mut inner = self.shared.inner.lock().unwrap();
            inner.frames = Vec::new().into();
            inner.current_frame = 0;
            inner.target_delta_us = 0;
            inner.queue.clear();
            inner.state = PlaybackState::Empty;
        }
        self.shared
            .listeners
            .emit(&PlayerEvent::StateChanged(PlaybackState::Empty));
    }

    /// From `Stopped`: restart at frame zero and spawn the clock thread.
    /// From `Paused`: resume in place. No-op otherwise.
    pub fn play(&mut self) {
        let mut inner = self.shared.inner.lock().unwrap();
        match inner.state {
            PlaybackState::Empty | PlaybackState::Playing => {}
            PlaybackState::Stopped => {
                inner.queue.clear();
                inner.current_frame = 0;
                inner.target_delta_us = 0;
                inner.state = PlaybackState::Playing;
                drop(inner);

                // A previous run's thread has exited by now; reap it.
                if let Some(handle) = self.thread.take() {
                    let _ = handle.join();
                }
                let shared = Arc::clone(&self.shared);
                self.thread = Some(thread::spawn(move || run_clock(&shared)));

                debug!("video playing");
                self.shared
                    .listeners
                    .emit(&PlayerEvent::StateChanged(PlaybackState::Playing));
            }
            PlaybackState::Paused => {
                inner.target_delta_us = 0;
                inner.state = PlaybackState::Playing;
                drop(inner);
                debug!("video resumed");
                self.shared
                    .listeners
                    .emit(&PlayerEvent::StateChanged(PlaybackState::Playing));
            }
        }
    }

    /// Suspend frame advancement. The thread keeps cycling and keeps
    /// re-presenting the held frame.
    pub fn pause(&self) {
        let mut inner = self.shared.inner.lock().unwrap();
        if inner.state == PlaybackState::Playing {
            inner.target_delta_us = 0;
            inner.state = PlaybackState::Paused;
            drop(inner);
            debug!("video paused");
            self.shared
                .listeners
                .emit(&PlayerEvent::StateChanged(PlaybackState::Paused));
        }
    }

    /// Stop and join the clock thread. The thread notices at its next
    /// wake, so this blocks for at most about one frame interval.
    pub fn stop(&mut self) {
        let mut inner = self.shared.inner.lock().unwrap();
        let was_active = matches!(
            inner.state,
            PlaybackState::Playing | PlaybackState::Paused
        );
        if was_active {
            inner.state = PlaybackState::Stopped;
        }
        drop(inner);

        if was_active {
            debug!("video stopped");
            self.shared
                .listeners
                .emit(&PlayerEvent::StateChanged(PlaybackState::Stopped));
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    /// Queue a jump to the frame containing `time`. No-op unless playing
    /// or paused.
    pub fn seek(&self, time: Duration) {
        if !self.shared.submit(ClockCommand::Seek(time)) {
            trace!(?time, "seek ignored, clock not active");
        }
    }

    /// Queue a drift target update from an external clock reading.
    /// No-op unless playing or paused.
    pub fn sync_to_external(&self, external: Duration) {
        self.shared.submit(ClockCommand::SyncTo(external));
    }

    /// Nominal position: current frame index times the frame interval.
    pub fn position(&self) -> Duration {
        let inner = self.shared.inner.lock().unwrap();
        match inner.state {
            PlaybackState::Playing | PlaybackState::Paused => {
                nominal_time(inner.current_frame, inner.frame_interval)
            }
            _ => Duration::ZERO,
        }
    }

    /// True elapsed time including the in-frame fraction, measured by the
    /// clock thread itself. `None` unless playing or paused.
    pub fn exact_position(&self) -> Option<Duration> {
        let interval = self.shared.inner.lock().unwrap().frame_interval;
        let (tx, rx) = mpsc::channel();
        if !self.shared.submit(ClockCommand::QueryTime(tx)) {
            return None;
        }
        match rx.recv_timeout(interval.saturating_mul(4)) {
            Ok(t) => Some(t),
            Err(_) => {
                warn!("precise time query timed out");
                None
            }
        }
    }

    pub fn duration(&self) -> Duration {
        let inner = self.shared.inner.lock().unwrap();
        if inner.state == PlaybackState::Empty {
            Duration::ZERO
        } else {
            nominal_time(inner.frames.len(), inner.frame_interval)
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.inner.lock().unwrap().state
    }

    pub fn width(&self) -> u32 {
        let inner = self.shared.inner.lock().unwrap();
        inner.frames.first().map(|f| f.width()).unwrap_or(0)
    }

    pub fn height(&self) -> u32 {
        let inner = self.shared.inner.lock().unwrap();
        inner.frames.first().map(|f| f.height()).unwrap_or(0)
    }

    /// Sink invoked once per presented frame, from the clock thread.
    /// Must not block for long or it stalls playback timing.
    pub fn set_present_frame(&self, callback: impl Fn(&Frame) + Send + Sync + 'static) {
        self.shared.inner.lock().unwrap().present = Some(Arc::new(callback));
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

    pub(crate) fn shared(&self) -> Arc<VideoShared> {
        Arc::clone(&self.shared)
    }
}

impl Default for VideoClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for VideoClock {
    fn drop(&mut self) {
        self.stop();
    }
}

fn nominal_time(frame: usize, interval: Duration) -> Duration {
    Duration::from_micros(interval.as_micros() as u64 * frame as u64)
}

/// One cycle's drift correction: a tenth of the remaining delta, capped
/// at a tenth of the frame interval, signed like the delta. Large deltas
/// converge at the cap, small ones decay geometrically, zero stays put.
fn convergence_step(delta_us: i64, interval_us: i64) -> i64 {
    let scaled_delta = (delta_us as f64 * 0.1) as i64;
    let scaled_frame = ((delta_us.signum() * interval_us) as f64 * 0.1) as i64;
    if scaled_delta.abs() < scaled_frame.abs() {
        scaled_delta
    } else {
        scaled_frame
    }
}

fn run_clock(shared: &Arc<VideoShared>) {
    // Wait time already consumed by command wake-ups within the current
    // frame.
    let mut compensation_us: i64 = 0;
    // Drift correction applied to this cycle's wait.
    let mut delta_comp_us: i64 = 0;
    let mut frame_start = Instant::now();

    loop {
        let (current, interval) = {
            let inner = shared.inner.lock().unwrap();
            if !matches!(
                inner.state,
                PlaybackState::Playing | PlaybackState::Paused
            ) {
                break;
            }
            (inner.current_frame, inner.frame_interval)
        };
        let interval_us = interval.as_micros() as i64;

        shared
            .listeners
            .emit(&PlayerEvent::TimeChanged(nominal_time(current, interval)));

        let wait_us = (interval_us - compensation_us - delta_comp_us).max(0);
        trace!(wait_us, compensation_us, delta_comp_us, "frame wait");

        let guard = shared.inner.lock().unwrap();
        let (mut inner, _timeout) = shared
            .cv
            .wait_timeout_while(guard, Duration::from_micros(wait_us as u64), |i| {
                i.queue.is_empty()
            })
            .unwrap();

        if let Some(command) = inner.queue.pop_front() {
            let partial_us = frame_start.elapsed().as_micros() as i64;
            let in_frame_us = compensation_us + partial_us;

            match command {
                ClockCommand::Seek(target) => {
                    let index = (target.as_micros() / interval.as_micros().max(1)) as usize;
                    let overshoot = target.saturating_sub(nominal_time(index, interval));
                    if index < inner.frames.len() {
                        // Sleep out the rest of the target frame so the
                        // next presentation lands on its boundary.
                        thread::sleep(interval.saturating_sub(overshoot));
                        inner.current_frame = index;
                    }
                    debug!(?target, index, "seek applied");
                    compensation_us = 0;
                    frame_start = Instant::now();
                }
                ClockCommand::SyncTo(external) => {
                    let true_elapsed_us =
                        inner.current_frame as i64 * interval_us + in_frame_us;
                    inner.target_delta_us = external.as_micros() as i64 - true_elapsed_us;
                    trace!(
                        delta_us = inner.target_delta_us,
                        "re-anchored to external clock"
                    );
                    compensation_us = in_frame_us;
                    frame_start = Instant::now();
                }
                ClockCommand::QueryTime(reply) => {
                    let true_elapsed_us =
                        inner.current_frame as i64 * interval_us + in_frame_us;
                    let _ = reply.send(Duration::from_micros(true_elapsed_us.max(0) as u64));
                    compensation_us = in_frame_us;
                    frame_start = Instant::now();
                }
            }
            continue;
        }

        // The wait ran out: present the current frame.
        compensation_us = 0;
        let Some(frame) = inner.frames.get(inner.current_frame).cloned() else {
            break;
        };
        let present = inner.present.clone();
        if inner.state == PlaybackState::Playing {
            inner.current_frame += 1;
        }
        let ended = inner.current_frame == inner.frames.len();
        if ended {
            inner.state = PlaybackState::Stopped;
        }

        delta_comp_us = convergence_step(inner.target_delta_us, interval_us);
        inner.target_delta_us -= delta_comp_us;
        trace!(
            target_delta_us = inner.target_delta_us,
            step_us = delta_comp_us,
            "drift convergence"
        );
        drop(inner);

        if let Some(present) = present {
            present(&frame);
        }
        shared.listeners.emit(&PlayerEvent::FrameChanged(frame));
        frame_start = Instant::now();

        if ended {
            debug!("video track ended");
            shared.listeners.emit(&PlayerEvent::TrackEnded);
            shared
                .listeners
                .emit(&PlayerEvent::StateChanged(PlaybackState::Stopped));
            break;
        }
    }
}

//! # Smoothing Layer
//!
//! Hides reconciliation corrections from the player.
//!
//! - **Simulated transform**: where the actor IS (collision, gameplay).
//! - **Rendered transform**: where the actor APPEARS on screen.
//!
//! When a correction lands, the rendered transform glides from where it was
//! drawn last toward the corrected one over a bounded window instead of
//! teleporting. Large corrections and desyncs still snap.
//!
//! ```ignore
//! let mut smoother = CorrectionSmoother::from_config(&config);
//!
//! // On every reconciliation:
//! smoother.on_reconciled(&result, session_state.transform());
//!
//! // Every frame:
//! let drawn = smoother.update(session_state.transform(), frame_ms);
//! ```
//!
//! Remote actors, which are not predicted, go through a
//! [`RemoteInterpolator`] instead.

use std::collections::VecDeque;

use gait_shared::{
    AuthorityState, GaitConfig, ReconcileOutcome, ReconciliationResult, SmoothingCurve, TickId, Transform,
};

/// Blends `previous` toward `target`.
///
/// Pure: the result only depends on the arguments. `elapsed_ms` at or past
/// `window_ms`, a non-positive window and [`SmoothingCurve::HardSnap`] all
/// return `target` unchanged.
#[must_use]
pub fn smooth(
    previous: Transform,
    target: Transform,
    elapsed_ms: f32,
    window_ms: f32,
    curve: SmoothingCurve,
) -> Transform {
    if curve == SmoothingCurve::HardSnap || !(window_ms > 0.0) || !elapsed_ms.is_finite() || elapsed_ms >= window_ms {
        return target;
    }

    let t = curve.weight(elapsed_ms / window_ms);
    Transform::new(
        previous.position.lerp(target.position, t),
        previous.rotation.nlerp(target.rotation, t),
        previous.scale + (target.scale - previous.scale) * t,
    )
}

/// Per-actor correction blend.
///
/// Between calls it only remembers the transform the blend started from and
/// the elapsed correction time.
#[derive(Clone, Debug)]
pub struct CorrectionSmoother {
    window_ms: f32,
    curve: SmoothingCurve,
    max_distance_sq: f32,
    /// Rendered transform when the current correction began.
    from: Option<Transform>,
    elapsed_ms: f32,
    last_rendered: Option<Transform>,
    corrections: u32,
    snaps: u32,
}

impl CorrectionSmoother {
    /// Creates a smoother.
    ///
    /// # Arguments
    /// * `window_ms` - How long corrections take to blend (recommended: 100-150ms)
    /// * `curve` - Blend curve
    /// * `max_distance` - Corrections longer than this snap
    #[must_use]
    pub fn new(window_ms: f32, curve: SmoothingCurve, max_distance: f32) -> Self {
        let max_distance = if max_distance.is_finite() { max_distance.max(0.0) } else { f32::MAX.sqrt() };
        Self {
            window_ms: if window_ms.is_finite() { window_ms.max(0.0) } else { 0.0 },
            curve,
            max_distance_sq: max_distance * max_distance,
            from: None,
            elapsed_ms: 0.0,
            last_rendered: None,
            corrections: 0,
            snaps: 0,
        }
    }

    /// Smoother configured from the smoothing section of `config`.
    #[must_use]
    pub fn from_config(config: &GaitConfig) -> Self {
        Self::new(config.smoothing_window_ms, config.smoothing_curve, config.max_smoothing_distance)
    }

    /// Reacts to a reconciliation pass.
    ///
    /// `corrected` is the simulated transform right after the pass.
    pub fn on_reconciled(&mut self, result: &ReconciliationResult, corrected: Transform) {
        match result.outcome {
            ReconcileOutcome::Accepted => {}
            ReconcileOutcome::Desynced => self.snap(corrected),
            ReconcileOutcome::Corrected => {
                let Some(rendered) = self.last_rendered else {
                    self.snap(corrected);
                    return;
                };
                let jump_sq = rendered.position.distance_squared(corrected.position);
                if self.curve == SmoothingCurve::HardSnap
                    || self.window_ms <= 0.0
                    || !(jump_sq <= self.max_distance_sq)
                {
                    self.snap(corrected);
                } else {
                    // A correction mid-blend restarts from what is on screen
                    self.from = Some(rendered);
                    self.elapsed_ms = 0.0;
                    self.corrections += 1;
                }
            }
        }
    }

    /// Advances the blend by `frame_ms` and returns the transform to draw for
    /// the current simulated transform `target`.
    pub fn update(&mut self, target: Transform, frame_ms: f32) -> Transform {
        let rendered = match self.from {
            Some(from) => {
                if frame_ms.is_finite() && frame_ms > 0.0 {
                    self.elapsed_ms += frame_ms;
                }
                if self.elapsed_ms >= self.window_ms {
                    self.from = None;
                }
                smooth(from, target, self.elapsed_ms, self.window_ms, self.curve)
            }
            None => target,
        };
        self.last_rendered = Some(rendered);
        rendered
    }

    /// Drops any blend in progress and renders `transform` directly.
    pub fn snap(&mut self, transform: Transform) {
        self.from = None;
        self.elapsed_ms = 0.0;
        self.last_rendered = Some(transform);
        self.snaps += 1;
    }

    /// True while a correction is being blended.
    #[inline]
    #[must_use]
    pub const fn is_correcting(&self) -> bool {
        self.from.is_some()
    }

    /// Blend progress in `[0, 1]`; 1 when idle.
    #[must_use]
    pub fn progress(&self) -> f32 {
        if self.from.is_none() || self.window_ms <= 0.0 {
            1.0
        } else {
            (self.elapsed_ms / self.window_ms).clamp(0.0, 1.0)
        }
    }

    /// Last transform handed out by [`CorrectionSmoother::update`] or a snap.
    #[inline]
    #[must_use]
    pub const fn last_rendered(&self) -> Option<Transform> {
        self.last_rendered
    }

    /// Blended corrections so far.
    #[inline]
    #[must_use]
    pub const fn corrections(&self) -> u32 {
        self.corrections
    }

    /// Snaps so far.
    #[inline]
    #[must_use]
    pub const fn snaps(&self) -> u32 {
        self.snaps
    }
}

/// Buffered authority states kept per remote actor.
const REMOTE_HISTORY: usize = 32;

/// Renders an actor this client does not predict.
///
/// Authority states are drawn `render_delay_ms` in the past so there is
/// usually a pair to interpolate between. When updates stop, the newest
/// state is extrapolated along its velocity for at most
/// `max_extrapolation_ms`, then held.
#[derive(Clone, Debug)]
pub struct RemoteInterpolator {
    states: VecDeque<AuthorityState>,
    tick_ms: f64,
    render_delay_ms: f64,
    max_extrapolation_ms: f64,
    /// Render time, in milliseconds of tick time.
    playhead_ms: f64,
}

impl RemoteInterpolator {
    /// Creates an interpolator for a tick length of `tick_ms`.
    #[must_use]
    pub fn new(tick_ms: f32, render_delay_ms: f32, max_extrapolation_ms: f32) -> Self {
        Self {
            states: VecDeque::with_capacity(REMOTE_HISTORY),
            tick_ms: f64::from(tick_ms.max(f32::EPSILON)),
            render_delay_ms: f64::from(render_delay_ms.max(0.0)),
            max_extrapolation_ms: f64::from(max_extrapolation_ms.max(0.0)),
            playhead_ms: 0.0,
        }
    }

    /// Interpolator configured from `config`.
    #[must_use]
    pub fn from_config(config: &GaitConfig) -> Self {
        Self::new(config.tick_millis(), config.render_delay_ms, config.max_extrapolation_ms)
    }

    fn time_of(&self, tick: TickId) -> f64 {
        f64::from(tick) * self.tick_ms
    }

    /// Buffers an authority state. Returns `false` (and ignores it) when it
    /// is not newer than the newest buffered state.
    pub fn push(&mut self, authority: AuthorityState) -> bool {
        if self.states.back().is_some_and(|newest| authority.tick() <= newest.tick()) {
            return false;
        }

        let target = self.time_of(authority.tick()) - self.render_delay_ms;
        let drift_limit = self.render_delay_ms.max(self.tick_ms * 4.0);
        if self.states.is_empty() || (self.playhead_ms - target).abs() > drift_limit {
            self.playhead_ms = target;
        }

        if self.states.len() >= REMOTE_HISTORY {
            self.states.pop_front();
        }
        self.states.push_back(authority);
        true
    }

    /// Advances render time by `frame_ms`.
    pub fn advance(&mut self, frame_ms: f32) {
        if frame_ms.is_finite() && frame_ms > 0.0 {
            self.playhead_ms += f64::from(frame_ms);
        }
        // Keep one state at or before the playhead
        while self.states.len() > 2 && self.time_of(self.states[1].tick()) <= self.playhead_ms {
            self.states.pop_front();
        }
    }

    /// Transform to draw now, `None` before the first state arrives.
    #[must_use]
    pub fn sample(&self) -> Option<Transform> {
        let oldest = self.states.front()?;
        let newest = self.states.back()?;

        if self.playhead_ms <= self.time_of(oldest.tick()) {
            return Some(oldest.state.transform());
        }

        let newest_ms = self.time_of(newest.tick());
        if self.playhead_ms >= newest_ms {
            let ahead_ms = (self.playhead_ms - newest_ms).min(self.max_extrapolation_ms);
            let seconds = (ahead_ms / 1000.0) as f32;
            let mut transform = newest.state.transform();
            transform.position += newest.state.velocity * seconds;
            return Some(transform);
        }

        let (a, b) = self
            .states
            .iter()
            .zip(self.states.iter().skip(1))
            .find(|(_, b)| self.time_of(b.tick()) >= self.playhead_ms)?;
        let a_ms = self.time_of(a.tick());
        let span = self.time_of(b.tick()) - a_ms;
        let t = if span > 0.0 { ((self.playhead_ms - a_ms) / span) as f32 } else { 1.0 };
        Some(Transform::new(
            a.state.position.lerp(b.state.position, t),
            a.state.orientation.nlerp(b.state.orientation, t),
            1.0,
        ))
    }

    /// True when the playhead is past the newest buffered state.
    #[must_use]
    pub fn is_extrapolating(&self) -> bool {
        self.states.back().is_some_and(|newest| self.playhead_ms > self.time_of(newest.tick()))
    }

    /// Newest buffered authority tick.
    #[must_use]
    pub fn newest_tick(&self) -> Option<TickId> {
        self.states.back().map(AuthorityState::tick)
    }

    /// Buffered state count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// True before the first state arrives.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

//! # World Query Capability
//!
//! The simulation never owns collision data. Each step receives a
//! [`WorldQuery`] and asks it three questions: how far is the floor, how deep
//! is the actor in fluid, and what blocks a move. Answers are never cached
//! across ticks.
//!
//! [`PlaneWorld`] is a small reference world (flat ground, optional water
//! surface, box obstacles) used by tests, benches and the demo binary.

use gait_shared::{MovementState, Vec3};

/// Floor found below an actor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GroundHit {
    /// Vertical gap between feet and floor. Negative when penetrating.
    pub distance: f32,
    /// Floor surface normal.
    pub normal: Vec3,
    /// Point on the floor under the feet.
    pub point: Vec3,
}

/// First blocking contact along a move.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SweepHit {
    /// Fraction of the move completed before contact, in `[0, 1]`.
    pub time: f32,
    /// Surface normal at the contact.
    pub normal: Vec3,
}

/// Collision and fluid queries the simulation consumes.
///
/// Implementations must be deterministic: the same state and arguments give
/// the same answer on client and authority.
pub trait WorldQuery {
    /// Nearest floor below the actor within `max_distance`.
    fn ground_trace(&self, state: &MovementState, max_distance: f32) -> Option<GroundHit>;

    /// Fraction of the actor's height below a fluid surface, `0..=1`.
    fn immersion(&self, state: &MovementState) -> f32;

    /// First obstruction when moving the actor by `delta`.
    fn sweep(&self, state: &MovementState, delta: Vec3) -> Option<SweepHit>;
}

impl<W: WorldQuery + ?Sized> WorldQuery for &W {
    fn ground_trace(&self, state: &MovementState, max_distance: f32) -> Option<GroundHit> {
        (**self).ground_trace(state, max_distance)
    }

    fn immersion(&self, state: &MovementState) -> f32 {
        (**self).immersion(state)
    }

    fn sweep(&self, state: &MovementState, delta: Vec3) -> Option<SweepHit> {
        (**self).sweep(state, delta)
    }
}

// ============================================================================
// AABB (Axis-Aligned Bounding Box)
// ============================================================================

/// Penetration depth still treated as touching by [`Aabb::sweep`].
pub const SWEEP_SKIN: f32 = 1.0e-4;

/// Axis-Aligned Bounding Box for collision detection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    /// Minimum corner of the box.
    pub min: Vec3,
    /// Maximum corner of the box.
    pub max: Vec3,
}

impl Aabb {
    /// Creates a new AABB.
    #[must_use]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Box standing on `feet` with the given half width and height.
    #[must_use]
    pub fn from_feet(feet: Vec3, half_width: f32, height: f32) -> Self {
        Self {
            min: Vec3::new(feet.x - half_width, feet.y, feet.z - half_width),
            max: Vec3::new(feet.x + half_width, feet.y + height, feet.z + half_width),
        }
    }

    /// Checks if this AABB intersects another (touching does not count).
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min.x < other.max.x && self.max.x > other.min.x &&
        self.min.y < other.max.y && self.max.y > other.min.y &&
        self.min.z < other.max.z && self.max.z > other.min.z
    }

    /// True when the XZ footprints overlap.
    #[must_use]
    pub fn overlaps_footprint(&self, other: &Self) -> bool {
        self.min.x < other.max.x && self.max.x > other.min.x &&
        self.min.z < other.max.z && self.max.z > other.min.z
    }

    /// Moves the AABB by delta.
    #[must_use]
    pub fn translate(&self, delta: Vec3) -> Self {
        Self { min: self.min + delta, max: self.max + delta }
    }

    /// Swept test of this box moving by `delta` against a static `other`.
    ///
    /// Returns the entry fraction and the face normal of `other` that was
    /// hit. Penetration up to [`SWEEP_SKIN`] still counts as contact at
    /// time 0; deeper overlaps report no hit so a stuck actor can move out.
    #[must_use]
    pub fn sweep(&self, delta: Vec3, other: &Self) -> Option<SweepHit> {
        let mut entry = f32::NEG_INFINITY;
        let mut exit = f32::INFINITY;
        let mut normal = Vec3::ZERO;

        let axes = [
            (self.min.x, self.max.x, other.min.x, other.max.x, delta.x, Vec3::X),
            (self.min.y, self.max.y, other.min.y, other.max.y, delta.y, Vec3::Y),
            (self.min.z, self.max.z, other.min.z, other.max.z, delta.z, Vec3::Z),
        ];

        for (a_min, a_max, b_min, b_max, d, axis) in axes {
            if d == 0.0 {
                if a_max <= b_min || a_min >= b_max {
                    return None;
                }
                continue;
            }
            let (gap, far, face) = if d > 0.0 {
                (b_min - a_max, b_max - a_min, -axis)
            } else {
                (a_min - b_max, a_max - b_min, axis)
            };
            let speed = d.abs();
            let axis_entry = if gap < 0.0 && gap >= -SWEEP_SKIN { 0.0 } else { gap / speed };
            let axis_exit = far / speed;
            if axis_entry > entry {
                entry = axis_entry;
                normal = face;
            }
            if axis_exit < exit {
                exit = axis_exit;
            }
        }

        if entry > exit || entry < 0.0 || entry > 1.0 || exit <= 0.0 {
            return None;
        }
        Some(SweepHit { time: entry, normal })
    }
}

// ============================================================================
// PLANE WORLD
// ============================================================================

/// Float noise tolerated when deciding whether a floor is below the feet.
const FLOOR_EPSILON: f32 = 1.0e-3;

/// Reference world: flat ground, optional water, box obstacles.
#[derive(Clone, Debug)]
pub struct PlaneWorld {
    /// Height of the ground plane.
    pub ground_height: f32,
    /// Height of the water surface, if any.
    pub water_surface: Option<f32>,
    /// Static boxes, tested in insertion order.
    pub obstacles: Vec<Aabb>,
    /// Half width of every actor's collision box.
    pub actor_half_width: f32,
    /// Height of every actor's collision box.
    pub actor_height: f32,
}

impl Default for PlaneWorld {
    fn default() -> Self {
        Self::flat(0.0)
    }
}

impl PlaneWorld {
    /// Flat ground at `ground_height`, nothing else.
    #[must_use]
    pub const fn flat(ground_height: f32) -> Self {
        Self {
            ground_height,
            water_surface: None,
            obstacles: Vec::new(),
            actor_half_width: 0.3,
            actor_height: 1.8,
        }
    }

    /// Adds a water surface.
    #[must_use]
    pub fn with_water(mut self, surface: f32) -> Self {
        self.water_surface = Some(surface);
        self
    }

    /// Adds a box obstacle.
    #[must_use]
    pub fn with_obstacle(mut self, obstacle: Aabb) -> Self {
        self.obstacles.push(obstacle);
        self
    }

    /// Collision box of an actor standing at `feet`.
    #[must_use]
    pub fn actor_box(&self, feet: Vec3) -> Aabb {
        Aabb::from_feet(feet, self.actor_half_width, self.actor_height)
    }
}

impl WorldQuery for PlaneWorld {
    fn ground_trace(&self, state: &MovementState, max_distance: f32) -> Option<GroundHit> {
        let feet = state.position;
        let footprint = self.actor_box(feet);

        // Highest floor under the footprint that is not above the feet.
        let mut floor = self.ground_height;
        for obstacle in &self.obstacles {
            let top = obstacle.max.y;
            if top > floor && top <= feet.y + FLOOR_EPSILON && footprint.overlaps_footprint(obstacle) {
                floor = top;
            }
        }

        let distance = feet.y - floor;
        if distance > max_distance {
            return None;
        }
        Some(GroundHit {
            distance,
            normal: Vec3::Y,
            point: feet.with_y(floor),
        })
    }

    fn immersion(&self, state: &MovementState) -> f32 {
        match self.water_surface {
            Some(surface) if self.actor_height > 0.0 => {
                ((surface - state.position.y) / self.actor_height).clamp(0.0, 1.0)
            }
            _ => 0.0,
        }
    }

    fn sweep(&self, state: &MovementState, delta: Vec3) -> Option<SweepHit> {
        let actor = self.actor_box(state.position);
        let mut first: Option<SweepHit> = None;

        if delta.y < 0.0 && actor.min.y + delta.y < self.ground_height {
            let gap = (actor.min.y - self.ground_height).max(0.0);
            first = Some(SweepHit { time: gap / -delta.y, normal: Vec3::Y });
        }

        for obstacle in &self.obstacles {
            if let Some(hit) = actor.sweep(delta, obstacle) {
                if first.map_or(true, |best| hit.time < best.time) {
                    first = Some(hit);
                }
            }
        }
        first
    }
}

//! Core types for the aviary obstacle-course simulation.
//!
//! The engine advances a population of flight agents through one shared,
//! scrolling obstacle field. Everything here is deterministic given a seed:
//! randomness flows through a single [`SmallRng`] owned by the course, and a
//! tick is an atomic pipeline of staged updates. Rendering, policy evolution
//! and persistence live outside this crate; the seams are [`PolicyRunner`],
//! [`FrameSnapshot`] and [`FitnessReport`].

use rand::{Rng, RngCore, SeedableRng, rngs::SmallRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, SlotMap, new_key_type};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

new_key_type! {
    /// Stable handle for agents backed by a generational slot map.
    pub struct AgentId;
}

/// Convenience alias for associating side data with agents.
pub type AgentMap<T> = SecondaryMap<AgentId, T>;

/// Number of scalar observations fed to each decision policy.
pub const OBS_SIZE: usize = 3;
/// Action signals above this value are interpreted as a flap command.
pub const JUMP_THRESHOLD: f32 = 0.5;

/// Width of the body silhouette in pixels.
pub const BODY_SPRITE_WIDTH: u32 = 68;
/// Height of the body silhouette in pixels.
pub const BODY_SPRITE_HEIGHT: u32 = 48;
/// Width of one obstacle barrier silhouette in pixels.
pub const BARRIER_SPRITE_WIDTH: u32 = 104;
/// Height of one obstacle barrier silhouette in pixels.
pub const BARRIER_SPRITE_HEIGHT: u32 = 640;
/// Width of one scrolling floor tile in world units.
pub const FLOOR_TILE_WIDTH: f32 = 672.0;
/// Number of wing-flap animation frames.
pub const FLAP_FRAMES: usize = 3;

/// Ticks each flap frame is held before the cycle moves on.
const FLAP_FRAME_TICKS: u32 = 5;
/// Tilt angle at or below which the flap cycle is pinned to the glide frame.
const NOSEDIVE_TILT: f32 = -80.0;
/// Margin subtracted from the body height for the floor-contact test.
const FLOOR_CONTACT_SLACK: f32 = 10.0;
/// Full-width lip at the gap-facing end of a barrier silhouette.
const BARRIER_LIP_HEIGHT: u32 = 40;
/// Transparent margin on each side of the barrier shaft.
const BARRIER_SHAFT_INSET: u32 = 4;

/// High level simulation clock (ticks processed since the batch began).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Errors raised while constructing or advancing a course.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CourseError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// An agent reached its decision stage without a bound policy.
    #[error("agent {0:?} has no bound decision policy")]
    UnboundPolicy(AgentId),
    /// A policy produced a non-finite action signal.
    #[error("agent {0:?} produced a non-finite action signal")]
    InvalidAction(AgentId),
    /// The batch already reached a terminal state.
    #[error("course already finished; spawn a new batch instead of stepping this one")]
    CourseClosed,
}

/// Static configuration for one evaluation course.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CourseConfig {
    /// Horizontal position every agent holds for the whole batch.
    pub spawn_x: f32,
    /// Vertical position agents start from.
    pub spawn_y: f32,
    /// Vertical position of the floor; the lower death boundary.
    pub floor_y: f32,
    /// Upper death boundary; bodies above this vertical position are removed.
    pub ceiling_y: f32,
    /// Inclusive lower bound of the randomized gap-top edge.
    pub gap_min: i32,
    /// Exclusive upper bound of the randomized gap-top edge.
    pub gap_max: i32,
    /// Vertical distance between a barrier pair's gap edges.
    pub gap_size: f32,
    /// Units per tick obstacles and the floor scroll to the left.
    pub scroll_speed: f32,
    /// Horizontal position of the course's initial obstacle.
    pub first_pipe_x: f32,
    /// Horizontal position newly spawned obstacles appear at.
    pub pipe_spawn_x: f32,
    /// Vertical velocity applied by a flap.
    pub jump_impulse: f32,
    /// Downward acceleration per tick squared.
    pub gravity: f32,
    /// Per-tick displacement magnitude cap.
    pub terminal_velocity: f32,
    /// Extra upward displacement applied while ascending, shaping the arc.
    pub arc_bias: f32,
    /// Nose-up tilt limit in degrees.
    pub tilt_up: f32,
    /// Degrees of nose-down tilt added per descending tick.
    pub tilt_decay: f32,
    /// Nose-down tilt limit in degrees.
    pub tilt_floor: f32,
    /// Height band above the jump origin inside which tilt stays nose-up.
    pub hover_band: f32,
    /// Fitness credited to every live agent each tick.
    pub survival_bonus: f32,
    /// Fitness credited to every live agent when an obstacle is passed.
    pub pass_bonus: f32,
    /// Fitness debited from an agent that dies against a barrier.
    pub barrier_penalty: f32,
    /// Batch ends once the shared score exceeds this; 0 disables the ceiling.
    pub score_limit: u32,
    /// Safety valve for [`CourseState::run_to_completion`]; 0 disables it.
    pub max_ticks: u64,
    /// Optional RNG seed for reproducible batches.
    pub rng_seed: Option<u64>,
}

impl Default for CourseConfig {
    fn default() -> Self {
        Self {
            spawn_x: 230.0,
            spawn_y: 350.0,
            floor_y: 730.0,
            ceiling_y: -50.0,
            gap_min: 50,
            gap_max: 450,
            gap_size: 200.0,
            scroll_speed: 5.0,
            first_pipe_x: 700.0,
            pipe_spawn_x: 600.0,
            jump_impulse: -10.5,
            gravity: 3.0,
            terminal_velocity: 16.0,
            arc_bias: 2.0,
            tilt_up: 25.0,
            tilt_decay: 20.0,
            tilt_floor: -90.0,
            hover_band: 50.0,
            survival_bonus: 0.1,
            pass_bonus: 5.0,
            barrier_penalty: 1.0,
            score_limit: 80,
            max_ticks: 100_000,
            rng_seed: None,
        }
    }
}

impl CourseConfig {
    /// Validates the configuration, surfacing the first offending field.
    pub fn validate(&self) -> Result<(), CourseError> {
        if self.gap_min < 0 {
            return Err(CourseError::InvalidConfig("gap_min must be non-negative"));
        }
        if self.gap_min >= self.gap_max {
            return Err(CourseError::InvalidConfig(
                "gap range is empty; gap_min must be below gap_max",
            ));
        }
        if !(self.gap_size > 0.0) || !self.gap_size.is_finite() {
            return Err(CourseError::InvalidConfig("gap_size must be positive"));
        }
        if !(self.scroll_speed > 0.0) || !self.scroll_speed.is_finite() {
            return Err(CourseError::InvalidConfig("scroll_speed must be positive"));
        }
        if !(self.gravity > 0.0) || !self.gravity.is_finite() {
            return Err(CourseError::InvalidConfig("gravity must be positive"));
        }
        if !(self.terminal_velocity > 0.0) || !self.terminal_velocity.is_finite() {
            return Err(CourseError::InvalidConfig(
                "terminal_velocity must be positive",
            ));
        }
        if self.arc_bias < 0.0 || !self.arc_bias.is_finite() {
            return Err(CourseError::InvalidConfig("arc_bias must be non-negative"));
        }
        if !(self.tilt_decay > 0.0) {
            return Err(CourseError::InvalidConfig("tilt_decay must be positive"));
        }
        if self.tilt_floor >= self.tilt_up {
            return Err(CourseError::InvalidConfig(
                "tilt_floor must be below tilt_up",
            ));
        }
        if self.first_pipe_x <= self.spawn_x || self.pipe_spawn_x <= self.spawn_x {
            return Err(CourseError::InvalidConfig(
                "obstacles must spawn ahead of the agents",
            ));
        }
        if self.floor_y <= self.spawn_y {
            return Err(CourseError::InvalidConfig(
                "floor_y must sit below the spawn height",
            ));
        }
        Ok(())
    }

    /// Returns the configured RNG, seeding from entropy when no seed is set.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

/// Per-pixel opacity bitmap backing the exact-silhouette collision test.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpriteMask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl fmt::Debug for SpriteMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpriteMask")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("solid_pixels", &self.solid_pixels())
            .finish()
    }
}

impl SpriteMask {
    /// Builds a mask by sampling `opaque` at every pixel coordinate.
    #[must_use]
    pub fn from_fn(width: u32, height: u32, opaque: impl Fn(u32, u32) -> bool) -> Self {
        let mut bits = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                bits.push(opaque(x, y));
            }
        }
        Self {
            width,
            height,
            bits,
        }
    }

    /// Builds a fully opaque mask.
    #[must_use]
    pub fn filled(width: u32, height: u32) -> Self {
        Self::from_fn(width, height, |_, _| true)
    }

    /// Mask width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Mask height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Whether the pixel at (`x`, `y`) is opaque; out-of-range reads false.
    #[must_use]
    pub fn is_opaque(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.bits[(y * self.width + x) as usize]
    }

    /// Number of opaque pixels in the mask.
    #[must_use]
    pub fn solid_pixels(&self) -> usize {
        self.bits.iter().filter(|bit| **bit).count()
    }

    /// Returns the mask mirrored along its horizontal axis.
    #[must_use]
    pub fn flip_vertical(&self) -> Self {
        Self::from_fn(self.width, self.height, |x, y| {
            self.is_opaque(x, self.height - 1 - y)
        })
    }

    /// Exact silhouette intersection test.
    ///
    /// (`dx`, `dy`) is the offset of `other`'s top-left anchor relative to
    /// this mask's top-left anchor. Returns true iff any opaque pixel of the
    /// two masks coincides.
    #[must_use]
    pub fn overlap(&self, other: &SpriteMask, dx: i32, dy: i32) -> bool {
        let x0 = dx.max(0);
        let y0 = dy.max(0);
        let x1 = (self.width as i32).min(dx.saturating_add(other.width as i32));
        let y1 = (self.height as i32).min(dy.saturating_add(other.height as i32));
        if x0 >= x1 || y0 >= y1 {
            return false;
        }
        for y in y0..y1 {
            let row = (y as u32 * self.width) as usize;
            let other_row = ((y - dy) as u32 * other.width) as usize;
            for x in x0..x1 {
                if self.bits[row + x as usize] && other.bits[other_row + (x - dx) as usize] {
                    return true;
                }
            }
        }
        false
    }
}

fn flap_frame_mask(frame: usize) -> SpriteMask {
    SpriteMask::from_fn(BODY_SPRITE_WIDTH, BODY_SPRITE_HEIGHT, |x, y| {
        let fx = x as f32 + 0.5;
        let fy = y as f32 + 0.5;
        let nx = (fx - 31.0) / 27.0;
        let ny = (fy - 24.0) / 17.0;
        let torso = nx * nx + ny * ny <= 1.0;
        let beak = x >= 56 && (18..30).contains(&y);
        let wing = match frame {
            0 => (14..34).contains(&x) && (4..20).contains(&y),
            2 => (14..34).contains(&x) && (28..44).contains(&y),
            _ => (12..36).contains(&x) && (18..30).contains(&y),
        };
        torso || beak || wing
    })
}

fn lower_barrier_mask() -> SpriteMask {
    SpriteMask::from_fn(BARRIER_SPRITE_WIDTH, BARRIER_SPRITE_HEIGHT, |x, y| {
        if y < BARRIER_LIP_HEIGHT {
            true
        } else {
            (BARRIER_SHAFT_INSET..BARRIER_SPRITE_WIDTH - BARRIER_SHAFT_INSET).contains(&x)
        }
    })
}

/// Precomputed silhouettes for every sprite frame the collision test needs.
#[derive(Debug, Clone)]
pub struct SpriteAtlas {
    flap_frames: [SpriteMask; FLAP_FRAMES],
    barrier_upper: SpriteMask,
    barrier_lower: SpriteMask,
}

impl Default for SpriteAtlas {
    fn default() -> Self {
        Self::new()
    }
}

impl SpriteAtlas {
    /// Builds the full set of procedural silhouettes.
    #[must_use]
    pub fn new() -> Self {
        let lower = lower_barrier_mask();
        Self {
            flap_frames: [flap_frame_mask(0), flap_frame_mask(1), flap_frame_mask(2)],
            barrier_upper: lower.flip_vertical(),
            barrier_lower: lower,
        }
    }

    /// Body silhouette for the given flap frame (clamped to the frame count).
    #[must_use]
    pub fn flap_frame(&self, frame: usize) -> &SpriteMask {
        &self.flap_frames[frame.min(FLAP_FRAMES - 1)]
    }

    /// Silhouette of the upper barrier (lip at the bottom).
    #[must_use]
    pub fn barrier_upper(&self) -> &SpriteMask {
        &self.barrier_upper
    }

    /// Silhouette of the lower barrier (lip at the top).
    #[must_use]
    pub fn barrier_lower(&self) -> &SpriteMask {
        &self.barrier_lower
    }
}

/// Physical state of one flight agent.
///
/// Horizontal position is fixed for the life of the batch; only vertical
/// motion is simulated. Tilt is cosmetic except for the nosedive rule, which
/// pins the flap animation (and with it the active collision silhouette).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Body {
    /// Fixed horizontal position.
    pub x: f32,
    /// Simulated vertical position.
    pub y: f32,
    /// Vertical velocity as of the last flap.
    pub velocity: f32,
    /// Tilt angle in degrees, nose-up positive.
    pub tilt: f32,
    /// Vertical position recorded at the moment of the last flap.
    pub jump_origin: f32,
    /// Ticks elapsed since the last flap; drives the kinematic arc.
    pub ticks_since_jump: u32,
    frame_phase: u32,
    frame: usize,
}

impl Body {
    /// Creates a body at the given spawn position.
    #[must_use]
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            velocity: 0.0,
            tilt: 0.0,
            jump_origin: y,
            ticks_since_jump: 0,
            frame_phase: 0,
            frame: 0,
        }
    }

    /// Applies a flap: velocity snaps to the impulse, the arc restarts and
    /// the current height becomes the new jump origin.
    pub fn jump(&mut self, impulse: f32) {
        self.velocity = impulse;
        self.ticks_since_jump = 0;
        self.jump_origin = self.y;
    }

    /// Advances one tick of vertical kinematics, returning the displacement
    /// actually applied.
    ///
    /// Displacement follows `v·t + g/2·t²` from the last flap, clamped to the
    /// terminal cap, with the arc bias added while ascending. Tilt snaps
    /// nose-up while climbing or hovering near the jump origin and otherwise
    /// decays nose-down to its floor.
    pub fn advance(&mut self, config: &CourseConfig) -> f32 {
        self.ticks_since_jump += 1;
        let t = self.ticks_since_jump as f32;
        let mut displacement = self.velocity * t + 0.5 * config.gravity * t * t;
        displacement = displacement.clamp(-config.terminal_velocity, config.terminal_velocity);
        if displacement < 0.0 {
            displacement -= config.arc_bias;
        }
        self.y += displacement;

        if displacement < 0.0 || self.y < self.jump_origin + config.hover_band {
            if self.tilt < config.tilt_up {
                self.tilt = config.tilt_up;
            }
        } else if self.tilt > config.tilt_floor {
            self.tilt = (self.tilt - config.tilt_decay).max(config.tilt_floor);
        }
        displacement
    }

    /// Advances the wing-flap cycle; a nosedive pins the glide frame.
    pub fn advance_animation(&mut self) {
        self.frame_phase += 1;
        self.frame = if self.frame_phase <= FLAP_FRAME_TICKS {
            0
        } else if self.frame_phase <= FLAP_FRAME_TICKS * 2 {
            1
        } else if self.frame_phase <= FLAP_FRAME_TICKS * 3 {
            2
        } else if self.frame_phase <= FLAP_FRAME_TICKS * 4 {
            1
        } else {
            self.frame_phase = 0;
            0
        };
        if self.tilt <= NOSEDIVE_TILT {
            self.frame = 1;
            self.frame_phase = FLAP_FRAME_TICKS * 2;
        }
    }

    /// Index of the currently active flap frame.
    #[must_use]
    pub const fn active_frame(&self) -> usize {
        self.frame
    }
}

/// One paired upper/lower barrier with a randomized gap.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Pipe {
    /// Horizontal position of the pair's left edge.
    pub x: f32,
    /// Bottom edge of the upper barrier; the top of the gap.
    pub gap_top: f32,
    /// Top edge of the lower barrier; the bottom of the gap.
    pub gap_bottom: f32,
    passed: bool,
}

impl Pipe {
    /// Creates a barrier pair with an explicit gap placement.
    #[must_use]
    pub fn new(x: f32, gap_top: f32, gap_size: f32) -> Self {
        Self {
            x,
            gap_top,
            gap_bottom: gap_top + gap_size,
            passed: false,
        }
    }

    /// Creates a barrier pair with the gap edge drawn from the configured
    /// range. The draw happens exactly once, here.
    #[must_use]
    pub fn spawn(x: f32, rng: &mut dyn RngCore, config: &CourseConfig) -> Self {
        let gap_top = rng.random_range(config.gap_min..config.gap_max) as f32;
        Self::new(x, gap_top, config.gap_size)
    }

    /// Top edge of the upper barrier silhouette.
    #[must_use]
    pub fn top_edge(&self) -> f32 {
        self.gap_top - BARRIER_SPRITE_HEIGHT as f32
    }

    /// Scrolls the pair left by `speed` units.
    pub fn scroll(&mut self, speed: f32) {
        self.x -= speed;
    }

    /// Marks the pair as passed the first time the lead agent's horizontal
    /// position exceeds it. Returns true only on that transition.
    pub fn mark_passed(&mut self, lead_x: f32) -> bool {
        if !self.passed && self.x < lead_x {
            self.passed = true;
            return true;
        }
        false
    }

    /// Whether the pair has been passed by the lead agent.
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.passed
    }

    /// True once the pair has fully scrolled off the trailing screen edge.
    #[must_use]
    pub fn is_offscreen(&self) -> bool {
        self.x + (BARRIER_SPRITE_WIDTH as f32) < 0.0
    }
}

/// The scrolling floor: two alternating tiles plus the lower death boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Floor {
    /// Vertical position of the floor surface.
    pub y: f32,
    tile_a: f32,
    tile_b: f32,
}

impl Floor {
    /// Creates a floor at the given height with the tiles seamed together.
    #[must_use]
    pub fn new(y: f32) -> Self {
        Self {
            y,
            tile_a: 0.0,
            tile_b: FLOOR_TILE_WIDTH,
        }
    }

    /// Scrolls both tiles left, re-seating whichever has fully left the
    /// screen behind the other. The offsets always differ by one tile width.
    pub fn scroll(&mut self, speed: f32) {
        self.tile_a -= speed;
        self.tile_b -= speed;
        if self.tile_a + FLOOR_TILE_WIDTH < 0.0 {
            self.tile_a = self.tile_b + FLOOR_TILE_WIDTH;
        }
        if self.tile_b + FLOOR_TILE_WIDTH < 0.0 {
            self.tile_b = self.tile_a + FLOOR_TILE_WIDTH;
        }
    }

    /// Current horizontal offsets of the two tiles.
    #[must_use]
    pub const fn offsets(&self) -> (f32, f32) {
        (self.tile_a, self.tile_b)
    }
}

/// Observation triple handed to a decision policy each tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    /// The body's vertical position.
    pub altitude: f32,
    /// Absolute vertical distance to the focus obstacle's gap-top edge.
    pub gap_top_distance: f32,
    /// Absolute vertical distance to the focus obstacle's gap-bottom edge.
    pub gap_bottom_distance: f32,
}

impl Observation {
    /// Builds the observation of `focus` as seen from `body`.
    #[must_use]
    pub fn new(body: &Body, focus: &Pipe) -> Self {
        Self {
            altitude: body.y,
            gap_top_distance: (body.y - focus.gap_top).abs(),
            gap_bottom_distance: (body.y - focus.gap_bottom).abs(),
        }
    }

    /// The observation as a policy input array.
    #[must_use]
    pub const fn as_inputs(&self) -> [f32; OBS_SIZE] {
        [self.altitude, self.gap_top_distance, self.gap_bottom_distance]
    }
}

/// Index of the obstacle observations are built against: the first pair
/// until the lead agent has cleared its trailing edge, then the second.
#[must_use]
pub fn focus_pipe(pipes: &[Pipe], lead_x: f32) -> usize {
    if pipes.len() > 1 && lead_x > pipes[0].x + BARRIER_SPRITE_WIDTH as f32 {
        1
    } else {
        0
    }
}

/// Exact silhouette collision between a body and one barrier pair.
///
/// Tests the active flap frame against both barriers at their relative
/// integer offsets. This is a per-pixel intersection, not a bounding box:
/// the silhouettes are non-rectangular and a box test would report contact
/// against transparent margins.
#[must_use]
pub fn collides(body: &Body, pipe: &Pipe, atlas: &SpriteAtlas) -> bool {
    let mask = atlas.flap_frame(body.active_frame());
    let anchor_y = body.y.round();
    let dx = (pipe.x - body.x).round() as i32;
    let upper_dy = (pipe.top_edge() - anchor_y).round() as i32;
    let lower_dy = (pipe.gap_bottom - anchor_y).round() as i32;
    mask.overlap(atlas.barrier_upper(), dx, upper_dy)
        || mask.overlap(atlas.barrier_lower(), dx, lower_dy)
}

/// Thin trait object used to drive decision policies without coupling the
/// course to any concrete policy representation.
pub trait PolicyRunner: Send + Sync {
    /// Static identifier of the policy implementation.
    fn kind(&self) -> &'static str;

    /// Maps an observation triple to one action scalar.
    fn decide(&mut self, observation: &[f32; OBS_SIZE]) -> f32;
}

type PolicySpawner = Box<dyn Fn(&mut dyn RngCore) -> Box<dyn PolicyRunner> + Send + Sync + 'static>;

struct PolicyEntry {
    kind: Cow<'static, str>,
    spawner: PolicySpawner,
}

/// Registry owning policy factories keyed by opaque handles.
///
/// An evaluation batch spawns one fresh runner per agent from a factory, so
/// a single registration can back an arbitrarily large population.
#[derive(Default)]
pub struct PolicyRegistry {
    next_key: u64,
    entries: HashMap<u64, PolicyEntry>,
}

impl fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyRegistry")
            .field("next_key", &self.next_key)
            .field("entry_count", &self.entries.len())
            .finish()
    }
}

impl PolicyRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a policy factory, returning its registry key.
    pub fn register<F>(&mut self, kind: impl Into<Cow<'static, str>>, factory: F) -> u64
    where
        F: Fn(&mut dyn RngCore) -> Box<dyn PolicyRunner> + Send + Sync + 'static,
    {
        let key = self.next_key;
        self.next_key += 1;
        self.entries.insert(
            key,
            PolicyEntry {
                kind: kind.into(),
                spawner: Box::new(factory),
            },
        );
        key
    }

    /// Removes a policy factory from the registry.
    pub fn unregister(&mut self, key: u64) -> bool {
        self.entries.remove(&key).is_some()
    }

    /// Instantiates a new runner using the factory referenced by `key`.
    pub fn spawn(&self, rng: &mut dyn RngCore, key: u64) -> Option<Box<dyn PolicyRunner>> {
        self.entries.get(&key).map(|entry| (entry.spawner)(rng))
    }

    /// Retrieves the descriptive identifier for a registry entry.
    #[must_use]
    pub fn kind(&self, key: u64) -> Option<&str> {
        self.entries.get(&key).map(|entry| entry.kind.as_ref())
    }

    /// Returns whether a key is registered.
    #[must_use]
    pub fn contains(&self, key: u64) -> bool {
        self.entries.contains_key(&key)
    }
}

/// Runtime policy attachment tracking.
#[derive(Serialize, Deserialize)]
pub struct PolicyBinding {
    #[serde(skip)]
    runner: Option<Box<dyn PolicyRunner>>,
    registry_key: Option<u64>,
    kind: Option<String>,
}

impl Default for PolicyBinding {
    fn default() -> Self {
        Self::unbound()
    }
}

impl Clone for PolicyBinding {
    fn clone(&self) -> Self {
        Self {
            runner: None,
            registry_key: self.registry_key,
            kind: self.kind.clone(),
        }
    }
}

impl fmt::Debug for PolicyBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyBinding")
            .field("registry_key", &self.registry_key)
            .field("kind", &self.kind)
            .finish()
    }
}

impl PolicyBinding {
    /// Construct an unbound policy attachment.
    #[must_use]
    pub fn unbound() -> Self {
        Self {
            runner: None,
            registry_key: None,
            kind: None,
        }
    }

    /// Attach a runner produced outside the registry.
    #[must_use]
    pub fn with_runner(runner: Box<dyn PolicyRunner>) -> Self {
        let kind = Some(runner.kind().to_string());
        Self {
            runner: Some(runner),
            registry_key: None,
            kind,
        }
    }

    /// Instantiate a policy from the registry and bind it.
    #[must_use]
    pub fn from_registry(
        registry: &PolicyRegistry,
        rng: &mut dyn RngCore,
        key: u64,
    ) -> Option<Self> {
        let runner = registry.spawn(rng, key)?;
        let kind = registry.kind(key).map(str::to_string);
        Some(Self {
            runner: Some(runner),
            registry_key: Some(key),
            kind,
        })
    }

    /// Return the registry key, if any, associated with this binding.
    #[must_use]
    pub const fn registry_key(&self) -> Option<u64> {
        self.registry_key
    }

    /// Return the policy identifier when available.
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    /// Whether a runner is currently attached.
    #[must_use]
    pub const fn is_bound(&self) -> bool {
        self.runner.is_some()
    }

    /// Evaluate the policy if one is bound, returning the action signal.
    #[must_use]
    pub fn decide(&mut self, observation: &[f32; OBS_SIZE]) -> Option<f32> {
        self.runner
            .as_mut()
            .map(|runner| runner.decide(observation))
    }
}

/// Mutable side data kept per live agent, outside the dense body rows.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AgentRuntime {
    /// Accumulated fitness scalar.
    pub fitness: f32,
    /// Action signal produced by the most recent decision.
    pub last_action: f32,
    /// The agent's decision policy.
    pub policy: PolicyBinding,
}

/// Why an agent left the live set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeathCause {
    /// Silhouette contact with a barrier.
    Barrier,
    /// Contact with the floor boundary.
    Floor,
    /// Crossed the upper world guard.
    OutOfBounds,
}

/// Finalized record of a removed agent; the fitness report is built from
/// these plus the still-live runtimes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetiredAgent {
    pub id: AgentId,
    pub fitness: f32,
    pub cause: DeathCause,
    pub tick: Tick,
    pub policy: Option<String>,
}

/// Dense body storage with generational handles for agent access.
///
/// Removal is a mark-and-compact pass: deaths collected during a tick are
/// applied together, so removal order never shifts surviving agents'
/// handles or their iteration order.
#[derive(Debug, Default)]
pub struct AgentArena {
    slots: SlotMap<AgentId, usize>,
    handles: Vec<AgentId>,
    bodies: Vec<Body>,
}

impl AgentArena {
    /// Create an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an arena with reserved capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: SlotMap::with_capacity_and_key(capacity),
            handles: Vec::with_capacity(capacity),
            bodies: Vec::with_capacity(capacity),
        }
    }

    /// Number of live agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    /// Returns true when no agents are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// Iterate over live agent handles in dense iteration order.
    pub fn iter_handles(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.handles.iter().copied()
    }

    /// Live agent handles in dense iteration order.
    #[must_use]
    pub fn handles(&self) -> &[AgentId] {
        &self.handles
    }

    /// Dense body rows, index-aligned with [`Self::handles`].
    #[must_use]
    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    /// Mutable dense body rows.
    #[must_use]
    pub fn bodies_mut(&mut self) -> &mut [Body] {
        &mut self.bodies
    }

    /// Returns the dense index for `id`, if present.
    #[must_use]
    pub fn index_of(&self, id: AgentId) -> Option<usize> {
        self.slots.get(id).copied()
    }

    /// Returns true if `id` refers to a live agent.
    #[must_use]
    pub fn contains(&self, id: AgentId) -> bool {
        self.slots.contains_key(id)
    }

    /// Borrow the body for `id`.
    #[must_use]
    pub fn body(&self, id: AgentId) -> Option<&Body> {
        self.index_of(id).map(|index| &self.bodies[index])
    }

    /// Mutably borrow the body for `id`.
    #[must_use]
    pub fn body_mut(&mut self, id: AgentId) -> Option<&mut Body> {
        let index = self.index_of(id)?;
        Some(&mut self.bodies[index])
    }

    /// Insert a new agent and return its handle.
    pub fn insert(&mut self, body: Body) -> AgentId {
        let index = self.bodies.len();
        self.bodies.push(body);
        let id = self.slots.insert(index);
        self.handles.push(id);
        id
    }

    /// Remove `id`, returning its body if it was present.
    pub fn remove(&mut self, id: AgentId) -> Option<Body> {
        let index = self.slots.remove(id)?;
        let removed = self.bodies.swap_remove(index);
        let removed_handle = self.handles.swap_remove(index);
        debug_assert_eq!(removed_handle, id);
        if index < self.handles.len() {
            let moved = self.handles[index];
            if let Some(slot) = self.slots.get_mut(moved) {
                *slot = index;
            }
        }
        Some(removed)
    }

    /// Remove all agents whose ids are contained in `dead`, preserving the
    /// iteration order of the survivors.
    pub fn remove_many(&mut self, dead: &HashSet<AgentId>) -> usize {
        if dead.is_empty() {
            return 0;
        }
        let mut write = 0;
        for read in 0..self.handles.len() {
            let id = self.handles[read];
            if dead.contains(&id) {
                self.slots.remove(id);
                continue;
            }
            if write != read {
                self.handles[write] = id;
                self.bodies[write] = self.bodies[read];
            }
            if let Some(slot) = self.slots.get_mut(id) {
                *slot = write;
            }
            write += 1;
        }
        let removed = self.handles.len().saturating_sub(write);
        self.handles.truncate(write);
        self.bodies.truncate(write);
        removed
    }

    /// Clear all stored agents.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.handles.clear();
        self.bodies.clear();
    }
}

/// Lifecycle of one evaluation batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CourseStatus {
    /// At least one agent is live and the score ceiling has not been hit.
    Running,
    /// Every agent has been removed from the live set.
    AllDead,
    /// The shared score exceeded the configured ceiling.
    ScoreLimit,
}

impl CourseStatus {
    /// Whether the batch has reached a terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Events emitted after processing one course tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TickReport {
    pub tick: Tick,
    /// Agents still live after this tick's removals.
    pub alive: usize,
    /// Shared score after this tick.
    pub score: u32,
    /// Agents removed this tick.
    pub deaths: usize,
    /// Whether an obstacle pass (and spawn) happened this tick.
    pub passed: bool,
    /// Focus obstacle index used for this tick's observations.
    pub focus: usize,
}

/// Summary of a finished (or cut-off) batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BatchSummary {
    pub ticks: Tick,
    pub score: u32,
    pub status: CourseStatus,
    pub survivors: usize,
    pub retired: usize,
}

/// Death metadata attached to a fitness entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DeathRecord {
    pub cause: DeathCause,
    pub tick: Tick,
}

/// Final fitness for one agent identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FitnessEntry {
    pub id: AgentId,
    pub fitness: f32,
    pub policy: Option<String>,
    /// Present for retired agents; `None` for batch survivors.
    pub death: Option<DeathRecord>,
}

/// Mapping from agent identity to final fitness, the hand-off to the
/// external optimizer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FitnessReport {
    pub entries: Vec<FitnessEntry>,
}

impl FitnessReport {
    /// Looks up the entry for `id`.
    #[must_use]
    pub fn entry(&self, id: AgentId) -> Option<&FitnessEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// The highest-fitness entry, if any agents were tracked.
    #[must_use]
    pub fn best(&self) -> Option<&FitnessEntry> {
        self.entries
            .iter()
            .max_by(|a, b| a.fitness.total_cmp(&b.fitness))
    }
}

/// Read-only view of one body for presentation layers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BodySnapshot {
    pub id: AgentId,
    pub x: f32,
    pub y: f32,
    pub tilt: f32,
    pub frame: usize,
}

/// Read-only view of one barrier pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PipeSnapshot {
    pub x: f32,
    pub gap_top: f32,
    pub gap_bottom: f32,
    pub passed: bool,
}

/// Read-only view of the floor tiles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FloorSnapshot {
    pub tile_a: f32,
    pub tile_b: f32,
    pub y: f32,
}

/// Per-tick frame handed to renderers; never aliases simulation state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrameSnapshot {
    pub tick: Tick,
    pub score: u32,
    pub alive: usize,
    pub focus: usize,
    pub bodies: Vec<BodySnapshot>,
    pub pipes: Vec<PipeSnapshot>,
    pub floor: FloorSnapshot,
}

/// One shared obstacle course advancing a population of agents tick by tick.
pub struct CourseState {
    config: CourseConfig,
    tick: Tick,
    status: CourseStatus,
    rng: SmallRng,
    atlas: SpriteAtlas,
    agents: AgentArena,
    runtime: AgentMap<AgentRuntime>,
    registry: PolicyRegistry,
    pipes: Vec<Pipe>,
    floor: Floor,
    score: u32,
    pending_deaths: Vec<(AgentId, DeathCause)>,
    retired: Vec<RetiredAgent>,
}

impl fmt::Debug for CourseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CourseState")
            .field("config", &self.config)
            .field("tick", &self.tick)
            .field("status", &self.status)
            .field("agent_count", &self.agents.len())
            .field("pipe_count", &self.pipes.len())
            .field("score", &self.score)
            .finish()
    }
}

impl CourseState {
    /// Instantiate a new course using the supplied configuration.
    pub fn new(config: CourseConfig) -> Result<Self, CourseError> {
        config.validate()?;
        let mut rng = config.seeded_rng();
        let first = Pipe::spawn(config.first_pipe_x, &mut rng, &config);
        Ok(Self {
            floor: Floor::new(config.floor_y),
            pipes: vec![first],
            config,
            tick: Tick::zero(),
            status: CourseStatus::Running,
            rng,
            atlas: SpriteAtlas::new(),
            agents: AgentArena::new(),
            runtime: AgentMap::new(),
            registry: PolicyRegistry::new(),
            score: 0,
            pending_deaths: Vec::new(),
            retired: Vec::new(),
        })
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &CourseConfig {
        &self.config
    }

    /// Ticks processed so far.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Current batch lifecycle state.
    #[must_use]
    pub const fn status(&self) -> CourseStatus {
        self.status
    }

    /// Shared score: obstacles passed by the lead agent.
    #[must_use]
    pub const fn score(&self) -> u32 {
        self.score
    }

    /// Number of live agents.
    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Borrow the live agent arena.
    #[must_use]
    pub const fn agents(&self) -> &AgentArena {
        &self.agents
    }

    /// Current obstacle list, front to back.
    #[must_use]
    pub fn pipes(&self) -> &[Pipe] {
        &self.pipes
    }

    /// Borrow the floor.
    #[must_use]
    pub const fn floor(&self) -> &Floor {
        &self.floor
    }

    /// Records of agents removed so far, in death order.
    #[must_use]
    pub fn retired(&self) -> &[RetiredAgent] {
        &self.retired
    }

    /// Borrow the policy registry.
    #[must_use]
    pub const fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    /// Mutably borrow the policy registry.
    pub fn registry_mut(&mut self) -> &mut PolicyRegistry {
        &mut self.registry
    }

    /// Borrow an agent's runtime data.
    #[must_use]
    pub fn agent_runtime(&self, id: AgentId) -> Option<&AgentRuntime> {
        self.runtime.get(id)
    }

    /// Mutably borrow an agent's runtime data.
    pub fn agent_runtime_mut(&mut self, id: AgentId) -> Option<&mut AgentRuntime> {
        self.runtime.get_mut(id)
    }

    /// Spawn a new agent at the configured launch position. The agent has no
    /// policy until one is bound.
    pub fn spawn_agent(&mut self) -> AgentId {
        let body = Body::new(self.config.spawn_x, self.config.spawn_y);
        let id = self.agents.insert(body);
        self.runtime.insert(id, AgentRuntime::default());
        id
    }

    /// Bind a fresh runner spawned from the registry entry `key`.
    pub fn bind_policy(&mut self, id: AgentId, key: u64) -> bool {
        let Some(binding) = PolicyBinding::from_registry(&self.registry, &mut self.rng, key) else {
            return false;
        };
        match self.runtime.get_mut(id) {
            Some(runtime) => {
                runtime.policy = binding;
                true
            }
            None => false,
        }
    }

    /// Bind a runner produced outside the registry.
    pub fn bind_runner(&mut self, id: AgentId, runner: Box<dyn PolicyRunner>) -> bool {
        match self.runtime.get_mut(id) {
            Some(runtime) => {
                runtime.policy = PolicyBinding::with_runner(runner);
                true
            }
            None => false,
        }
    }

    /// Index of the obstacle this tick's observations are built against.
    #[must_use]
    pub fn focus_index(&self) -> usize {
        let lead_x = match self.agents.bodies().first() {
            Some(body) => body.x,
            None => return 0,
        };
        focus_pipe(&self.pipes, lead_x)
    }

    /// Execute one simulation tick.
    ///
    /// The tick is atomic: observation building, decisions, kinematics,
    /// obstacle bookkeeping, collision detection and death cleanup all run
    /// against one consistent frame. Policy faults abort the batch.
    pub fn step(&mut self) -> Result<TickReport, CourseError> {
        if self.status.is_terminal() {
            return Err(CourseError::CourseClosed);
        }
        assert!(
            !self.pipes.is_empty(),
            "course invariant broken: obstacle list must never be empty"
        );

        let next_tick = self.tick.next();
        let focus = self.focus_index();
        self.stage_decisions(focus)?;
        self.stage_flight();
        let passed = self.stage_pipes();
        self.stage_collisions();
        let deaths = self.stage_death_cleanup(next_tick);
        self.tick = next_tick;

        if self.agents.is_empty() {
            self.status = CourseStatus::AllDead;
        } else if self.config.score_limit > 0 && self.score > self.config.score_limit {
            self.status = CourseStatus::ScoreLimit;
        }

        Ok(TickReport {
            tick: next_tick,
            alive: self.agents.len(),
            score: self.score,
            deaths,
            passed,
            focus,
        })
    }

    /// Step until the batch terminates or the max-tick safety valve trips.
    pub fn run_to_completion(&mut self) -> Result<BatchSummary, CourseError> {
        while self.status == CourseStatus::Running {
            if self.config.max_ticks > 0 && self.tick.0 >= self.config.max_ticks {
                break;
            }
            self.step()?;
        }
        Ok(self.summary())
    }

    /// Current batch summary.
    #[must_use]
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            ticks: self.tick,
            score: self.score,
            status: self.status,
            survivors: self.agents.len(),
            retired: self.retired.len(),
        }
    }

    /// Final fitness for every agent identity: retired agents in death
    /// order, then survivors in iteration order.
    #[must_use]
    pub fn fitness_report(&self) -> FitnessReport {
        let mut entries: Vec<FitnessEntry> = self
            .retired
            .iter()
            .map(|agent| FitnessEntry {
                id: agent.id,
                fitness: agent.fitness,
                policy: agent.policy.clone(),
                death: Some(DeathRecord {
                    cause: agent.cause,
                    tick: agent.tick,
                }),
            })
            .collect();
        for id in self.agents.iter_handles() {
            let runtime = self.runtime.get(id);
            entries.push(FitnessEntry {
                id,
                fitness: runtime.map_or(0.0, |rt| rt.fitness),
                policy: runtime.and_then(|rt| rt.policy.kind().map(str::to_string)),
                death: None,
            });
        }
        FitnessReport { entries }
    }

    /// Read-only frame for presentation layers.
    #[must_use]
    pub fn snapshot(&self) -> FrameSnapshot {
        let bodies = self
            .agents
            .iter_handles()
            .zip(self.agents.bodies())
            .map(|(id, body)| BodySnapshot {
                id,
                x: body.x,
                y: body.y,
                tilt: body.tilt,
                frame: body.active_frame(),
            })
            .collect();
        let pipes = self
            .pipes
            .iter()
            .map(|pipe| PipeSnapshot {
                x: pipe.x,
                gap_top: pipe.gap_top,
                gap_bottom: pipe.gap_bottom,
                passed: pipe.passed(),
            })
            .collect();
        let (tile_a, tile_b) = self.floor.offsets();
        FrameSnapshot {
            tick: self.tick,
            score: self.score,
            alive: self.agents.len(),
            focus: self.focus_index(),
            bodies,
            pipes,
            floor: FloorSnapshot {
                tile_a,
                tile_b,
                y: self.floor.y,
            },
        }
    }

    /// Evaluate every live agent's policy against the shared focus obstacle
    /// and apply flap commands. Sequential in handle order so every agent
    /// sees the same observation frame.
    fn stage_decisions(&mut self, focus: usize) -> Result<(), CourseError> {
        let focus_pipe = self.pipes[focus];
        let survival = self.config.survival_bonus;
        let impulse = self.config.jump_impulse;
        let handles: Vec<AgentId> = self.agents.iter_handles().collect();
        for id in handles {
            let Some(body) = self.agents.body(id).copied() else {
                continue;
            };
            let observation = Observation::new(&body, &focus_pipe);
            let runtime = self
                .runtime
                .get_mut(id)
                .ok_or(CourseError::UnboundPolicy(id))?;
            runtime.fitness += survival;
            let action = runtime
                .policy
                .decide(&observation.as_inputs())
                .ok_or(CourseError::UnboundPolicy(id))?;
            if !action.is_finite() {
                return Err(CourseError::InvalidAction(id));
            }
            runtime.last_action = action;
            if action > JUMP_THRESHOLD {
                if let Some(body) = self.agents.body_mut(id) {
                    body.jump(impulse);
                }
            }
        }
        Ok(())
    }

    fn stage_flight(&mut self) {
        let config = self.config;
        for body in self.agents.bodies_mut() {
            body.advance(&config);
            body.advance_animation();
        }
        self.floor.scroll(config.scroll_speed);
    }

    /// Scroll obstacles, detect the pass transition, credit the score and
    /// pass bonus, spawn the next obstacle and drop off-screen ones.
    fn stage_pipes(&mut self) -> bool {
        let speed = self.config.scroll_speed;
        for pipe in &mut self.pipes {
            pipe.scroll(speed);
        }
        let Some(lead) = self.agents.bodies().first() else {
            return false;
        };
        let lead_x = lead.x;
        let mut pass_event = false;
        for pipe in &mut self.pipes {
            if pipe.mark_passed(lead_x) {
                pass_event = true;
            }
        }
        if pass_event {
            self.score += 1;
            let bonus = self.config.pass_bonus;
            for id in self.agents.iter_handles() {
                if let Some(runtime) = self.runtime.get_mut(id) {
                    runtime.fitness += bonus;
                }
            }
            let next = Pipe::spawn(self.config.pipe_spawn_x, &mut self.rng, &self.config);
            self.pipes.push(next);
        }
        self.pipes.retain(|pipe| !pipe.is_offscreen());
        pass_event
    }

    /// Collision sweep. Read-only against shared state, so the per-agent
    /// tests fan out across the thread pool; the death marks merge at one
    /// synchronization point to keep removal deterministic.
    fn stage_collisions(&mut self) {
        let bodies = self.agents.bodies();
        let handles = self.agents.handles();
        let pipes = &self.pipes;
        let atlas = &self.atlas;
        let floor_y = self.config.floor_y;
        let ceiling_y = self.config.ceiling_y;
        let marks: Vec<(AgentId, DeathCause)> = handles
            .par_iter()
            .enumerate()
            .filter_map(|(index, id)| {
                detect_death(&bodies[index], pipes, atlas, floor_y, ceiling_y)
                    .map(|cause| (*id, cause))
            })
            .collect();
        self.pending_deaths.extend(marks);
    }

    /// Apply all pending deaths in one compact pass. Barrier deaths take the
    /// fitness penalty; every removal finalizes a retired-agent record.
    fn stage_death_cleanup(&mut self, next_tick: Tick) -> usize {
        if self.pending_deaths.is_empty() {
            return 0;
        }
        let mut dead = HashSet::new();
        for (id, cause) in self.pending_deaths.drain(..) {
            if !self.agents.contains(id) || !dead.insert(id) {
                continue;
            }
            let mut runtime = self.runtime.remove(id).unwrap_or_default();
            if cause == DeathCause::Barrier {
                runtime.fitness -= self.config.barrier_penalty;
            }
            self.retired.push(RetiredAgent {
                id,
                fitness: runtime.fitness,
                cause,
                tick: next_tick,
                policy: runtime.policy.kind().map(str::to_string),
            });
        }
        self.agents.remove_many(&dead)
    }
}

fn detect_death(
    body: &Body,
    pipes: &[Pipe],
    atlas: &SpriteAtlas,
    floor_y: f32,
    ceiling_y: f32,
) -> Option<DeathCause> {
    for pipe in pipes {
        if collides(body, pipe, atlas) {
            return Some(DeathCause::Barrier);
        }
    }
    if body.y + BODY_SPRITE_HEIGHT as f32 - FLOOR_CONTACT_SLACK >= floor_y {
        return Some(DeathCause::Floor);
    }
    if body.y < ceiling_y {
        return Some(DeathCause::OutOfBounds);
    }
    None
}

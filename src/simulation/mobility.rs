//! Mobility models.
//!
//! All models advance a node by small position steps with a 100 ms virtual
//! delay between steps and clip results to the bounding box. They form a
//! closed variant set dispatched by `step`; a node's model can be swapped at
//! any instant, and the swap bumps a generation counter so pending ticks of
//! the old model are discarded on dispatch.
//!
//! The leader of a `LeaderFollower` is referenced by id, never by handle:
//! the simulator resolves the leader's coordinates before stepping the
//! follower, which keeps the node registry free of reference cycles.

use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use super::geometry::{BoundingBox, Point3};
use super::packet::NodeId;

/// Delay between position updates (us).
pub const MOBILITY_TICK_INTERVAL: u64 = 100_000;

/// Arrival threshold for waypoint traversal (m).
const ARRIVAL_EPSILON: f64 = 1.0;

/// Maximum pause after reaching a waypoint (us).
const MAX_PAUSE: u64 = 1_000_000;

/// Gauss-Markov memory factor: 1.0 = straight line, 0.0 = uncorrelated walk.
const GM_ALPHA: f64 = 0.85;
/// Standard deviation of the Gauss-Markov heading perturbation (radians).
const GM_SIGMA: f64 = 0.3;

#[derive(Debug)]
pub enum Mobility {
    RandomWaypoint(RandomWaypoint3D),
    LeaderFollower(LeaderFollower),
    GaussMarkov(GaussMarkov3D),
}

impl Mobility {
    /// Leader this model tracks, if any. The simulator looks its position up
    /// before the step.
    pub fn leader(&self) -> Option<NodeId> {
        match self {
            Mobility::LeaderFollower(lf) => Some(lf.leader),
            _ => None,
        }
    }

    /// Formation target, exposed for convergence observation.
    pub fn target_position(&self) -> Option<Point3> {
        match self {
            Mobility::LeaderFollower(lf) => lf.target,
            _ => None,
        }
    }

    /// Advance `position` by one step. Returns the delay until the next step
    /// (us) - waypoint models stretch it to pause at a reached destination.
    pub fn step(
        &mut self,
        position: &mut Point3,
        speed: f64,
        bbox: &BoundingBox,
        leader_position: Option<Point3>,
        rng: &mut StdRng,
    ) -> u64 {
        match self {
            Mobility::RandomWaypoint(m) => m.step(position, speed, bbox, rng),
            Mobility::LeaderFollower(m) => m.step(position, speed, bbox, leader_position),
            Mobility::GaussMarkov(m) => m.step(position, speed, bbox, rng),
        }
    }
}

/// 3-D random waypoint: uniform destination in the box, straight traversal
/// at the node's speed, uniform 0-1 s pause on arrival.
#[derive(Debug, Default)]
pub struct RandomWaypoint3D {
    destination: Option<Point3>,
}

impl RandomWaypoint3D {
    pub fn new() -> Self {
        RandomWaypoint3D { destination: None }
    }

    fn pick_destination(bbox: &BoundingBox, rng: &mut StdRng) -> Point3 {
        Point3::new(
            rng.gen_range(0.0..=bbox.length),
            rng.gen_range(0.0..=bbox.width),
            rng.gen_range(0.0..=bbox.height),
        )
    }

    fn step(&mut self, position: &mut Point3, speed: f64, bbox: &BoundingBox, rng: &mut StdRng) -> u64 {
        let destination = *self
            .destination
            .get_or_insert_with(|| Self::pick_destination(bbox, rng));

        let vector = destination.sub(position);
        let dist = vector.norm();
        let step_dist = speed * (MOBILITY_TICK_INTERVAL as f64 / 1e6);

        if dist <= step_dist.max(ARRIVAL_EPSILON) {
            *position = bbox.clip(&destination);
            self.destination = None;
            // pause at the waypoint before heading for the next one
            return MOBILITY_TICK_INTERVAL + rng.gen_range(0..=MAX_PAUSE);
        }

        let new_pos = position.add(&vector.scale(step_dist / dist));
        *position = bbox.clip(&new_pos);
        MOBILITY_TICK_INTERVAL
    }
}

/// Follow a leader at a fixed offset with bounded catch-up steps.
#[derive(Debug)]
pub struct LeaderFollower {
    pub leader: NodeId,
    pub offset: Point3,
    target: Option<Point3>,
}

impl LeaderFollower {
    pub fn new(leader: NodeId, offset: Point3) -> Self {
        LeaderFollower { leader, offset, target: None }
    }

    fn step(
        &mut self,
        position: &mut Point3,
        speed: f64,
        bbox: &BoundingBox,
        leader_position: Option<Point3>,
    ) -> u64 {
        let Some(leader_pos) = leader_position else {
            return MOBILITY_TICK_INTERVAL;
        };
        let target = bbox.clip(&leader_pos.add(&self.offset));
        self.target = Some(target);

        let vector = target.sub(position);
        let dist = vector.norm();
        let step_dist = speed * (MOBILITY_TICK_INTERVAL as f64 / 1e6);

        if dist <= step_dist {
            *position = target;
        } else if dist > 0.0 {
            let new_pos = position.add(&vector.scale(step_dist / dist));
            *position = bbox.clip(&new_pos);
        }
        MOBILITY_TICK_INTERVAL
    }
}

/// 3-D Gauss-Markov: heading and pitch wander around their means with
/// tunable memory; the mean heading is reflected towards the volume centre
/// when a step hits the boundary.
#[derive(Debug)]
pub struct GaussMarkov3D {
    direction: f64,
    pitch: f64,
    direction_mean: f64,
    pitch_mean: f64,
}

impl GaussMarkov3D {
    pub fn new(initial_direction: f64, initial_pitch: f64) -> Self {
        GaussMarkov3D {
            direction: initial_direction,
            pitch: initial_pitch,
            direction_mean: initial_direction,
            pitch_mean: initial_pitch,
        }
    }

    fn step(&mut self, position: &mut Point3, speed: f64, bbox: &BoundingBox, rng: &mut StdRng) -> u64 {
        let noise = Normal::new(0.0, GM_SIGMA).expect("valid sigma");
        let memory = (1.0 - GM_ALPHA * GM_ALPHA).sqrt();

        self.direction = GM_ALPHA * self.direction
            + (1.0 - GM_ALPHA) * self.direction_mean
            + memory * noise.sample(rng);
        self.pitch = (GM_ALPHA * self.pitch
            + (1.0 - GM_ALPHA) * self.pitch_mean
            + memory * noise.sample(rng) * 0.1)
            .clamp(-std::f64::consts::FRAC_PI_3, std::f64::consts::FRAC_PI_3);

        let dt = MOBILITY_TICK_INTERVAL as f64 / 1e6;
        let velocity = Point3::new(
            speed * self.direction.cos() * self.pitch.cos(),
            speed * self.direction.sin() * self.pitch.cos(),
            speed * self.pitch.sin(),
        );
        let raw = position.add(&velocity.scale(dt));
        let clipped = bbox.clip(&raw);

        if clipped != raw {
            // steer the mean back towards the centre of the volume
            let centre = Point3::new(bbox.length / 2.0, bbox.width / 2.0, bbox.height / 2.0);
            self.direction_mean = (centre.y - clipped.y).atan2(centre.x - clipped.x);
            self.pitch_mean = 0.0;
        }
        *position = clipped;
        MOBILITY_TICK_INTERVAL
    }
}

/// V-formation offset of `node` behind the leader: rows of two, fanning out
/// sideways and backwards.
pub fn formation_offset(node: NodeId) -> Point3 {
    if node == 0 {
        return Point3::ZERO;
    }
    let row = ((node - 1) / 2 + 1) as f64;
    let side = if (node - 1) % 2 == 0 { 1.0 } else { -1.0 };
    Point3::new(-row * 50.0, side * row * 50.0, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::geometry::distance;
    use rand::SeedableRng;

    fn bbox() -> BoundingBox {
        BoundingBox::new(600.0, 600.0, 100.0)
    }

    #[test]
    fn random_waypoint_moves_at_speed_and_stays_inside() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut model = RandomWaypoint3D::new();
        let mut pos = Point3::new(300.0, 300.0, 50.0);
        let bbox = bbox();

        for _ in 0..200 {
            let before = pos;
            model.step(&mut pos, 10.0, &bbox, &mut rng);
            assert!(bbox.contains(&pos));
            // one tick at 10 m/s covers at most 1 m (plus waypoint snap)
            assert!(distance(&before, &pos) <= 1.0 + 1e-9 || model.destination.is_none());
        }
    }

    #[test]
    fn random_waypoint_pauses_on_arrival() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut model = RandomWaypoint3D::new();
        let bbox = bbox();
        // place the node on top of its first destination
        let mut pos = Point3::new(300.0, 300.0, 50.0);
        model.destination = Some(pos);
        let delay = model.step(&mut pos, 10.0, &bbox, &mut rng);
        assert!(delay >= MOBILITY_TICK_INTERVAL);
        assert!(delay <= MOBILITY_TICK_INTERVAL + MAX_PAUSE);
        assert!(model.destination.is_none());
    }

    #[test]
    fn follower_closes_on_static_leader() {
        let bbox = bbox();
        let mut model = LeaderFollower::new(0, Point3::new(-50.0, -50.0, 0.0));
        let leader = Point3::new(300.0, 300.0, 50.0);
        let target = leader.add(&Point3::new(-50.0, -50.0, 0.0));
        let mut pos = Point3::new(100.0, 100.0, 10.0);

        let mut last = distance(&pos, &target);
        for _ in 0..400 {
            model.step(&mut pos, 10.0, &bbox, Some(leader));
            let d = distance(&pos, &target);
            assert!(d <= last + 1e-9, "follower moved away from target");
            last = d;
        }
        assert!(last < 1e-6, "follower should have reached the target, at {last} m");
        assert_eq!(model.target, Some(bbox.clip(&target)));
    }

    #[test]
    fn gauss_markov_stays_inside() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut model = GaussMarkov3D::new(0.3, 0.0);
        let mut pos = Point3::new(10.0, 10.0, 10.0);
        let bbox = bbox();
        for _ in 0..500 {
            model.step(&mut pos, 30.0, &bbox, &mut rng);
            assert!(bbox.contains(&pos));
        }
    }

    #[test]
    fn formation_offsets_fan_out() {
        assert_eq!(formation_offset(0), Point3::ZERO);
        assert_eq!(formation_offset(1), Point3::new(-50.0, 50.0, 0.0));
        assert_eq!(formation_offset(2), Point3::new(-50.0, -50.0, 0.0));
        assert_eq!(formation_offset(3), Point3::new(-100.0, 100.0, 0.0));
        assert_eq!(formation_offset(9), Point3::new(-250.0, 250.0, 0.0));
    }
}

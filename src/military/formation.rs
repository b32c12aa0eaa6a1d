use super::squad::*;
use crate::features::FormationFeatures;
use crate::geometry::{flatten, horizontal_direction, right_of, ring_points};
use crate::host::AgentId;
use glam::DVec3;
use itertools::Itertools;
use pathfinding::kuhn_munkres::kuhn_munkres_min;
use pathfinding::matrix::Matrix;
use rand::rngs::StdRng;
use rand::Rng;

/// Distances are scaled to integer weights for the assignment solver.
const WEIGHT_SCALE: f64 = 1000.0;

/// Horizontal facing, falling back to +X when the host reports nothing usable.
pub fn forward_of(facing: Option<DVec3>) -> DVec3 {
    facing
        .and_then(|f| horizontal_direction(DVec3::ZERO, flatten(f)))
        .unwrap_or(DVec3::X)
}

/// Offsets for a role-agnostic shape, one per follower, relative to the leader.
fn shape_offsets(kind: FormationKind, count: usize, forward: DVec3, features: &FormationFeatures, rng: &mut StdRng) -> Vec<DVec3> {
    let right = right_of(forward);
    let spacing = features.spacing;
    let facing_angle = forward.z.atan2(forward.x);

    match kind {
        FormationKind::Arrow => (0..count)
            .map(|i| {
                let rank = (i / 2 + 1) as f64;
                let side = if i % 2 == 0 { -1.0 } else { 1.0 };
                -forward * rank * spacing + right * side * rank * spacing
            })
            .collect(),
        FormationKind::Line => (0..count).map(|i| -forward * (i + 1) as f64 * spacing).collect(),
        FormationKind::Spread => ring_points(DVec3::ZERO, features.spread_radius, count, facing_angle),
        FormationKind::Flexible => ring_points(DVec3::ZERO, features.flexible_radius, count, facing_angle)
            .into_iter()
            .map(|point| {
                let jitter = features.flexible_jitter.abs();
                if jitter > 0.0 {
                    point + DVec3::new(rng.random_range(-jitter..=jitter), 0.0, rng.random_range(-jitter..=jitter))
                } else {
                    point
                }
            })
            .collect(),
        FormationKind::Protected => (0..count).map(|i| -forward * (i + 1) as f64 * spacing).collect(),
    }
}

/// Lateral offsets for `count` agents standing abreast, centered on zero.
fn abreast(count: usize, spacing: f64) -> Vec<f64> {
    let center = (count as f64 - 1.0) / 2.0;
    (0..count).map(|i| (i as f64 - center) * spacing).collect()
}

/// Protected formation: tanks a rank in front of the leader, ranged two ranks
/// behind, everyone else one rank behind. Slots are fixed per role.
fn protected_offsets(followers: &[(AgentId, SquadRole)], forward: DVec3, spacing: f64) -> Vec<(AgentId, DVec3)> {
    let right = right_of(forward);

    let front: Vec<AgentId> = followers.iter().filter(|(_, r)| *r == SquadRole::Tank).map(|(a, _)| *a).collect();
    let back: Vec<AgentId> = followers.iter().filter(|(_, r)| *r == SquadRole::Ranged).map(|(a, _)| *a).collect();
    let middle: Vec<AgentId> = followers
        .iter()
        .filter(|(_, r)| *r != SquadRole::Tank && *r != SquadRole::Ranged)
        .map(|(a, _)| *a)
        .collect();

    let mut result = Vec::with_capacity(followers.len());

    for (rank, group) in [(1.0, front), (-1.0, middle), (-2.0, back)] {
        for (agent, lateral) in group.iter().zip(abreast(group.len(), spacing)) {
            result.push((*agent, forward * rank * spacing + right * lateral));
        }
    }

    result
}

/// World-space slot for each follower. `followers` carries each follower's
/// role and current position; slots other than the role-fixed protected
/// layout are matched to followers by minimum total travel distance.
pub fn formation_slots(
    kind: FormationKind,
    leader_pos: DVec3,
    facing: Option<DVec3>,
    followers: &[(AgentId, SquadRole, DVec3)],
    features: &FormationFeatures,
    rng: &mut StdRng,
) -> Vec<(AgentId, DVec3)> {
    if followers.is_empty() {
        return Vec::new();
    }

    let forward = forward_of(facing);

    if kind == FormationKind::Protected {
        let roles: Vec<(AgentId, SquadRole)> = followers.iter().map(|(a, r, _)| (*a, *r)).collect();

        return protected_offsets(&roles, forward, features.spacing)
            .into_iter()
            .map(|(agent, offset)| (agent, leader_pos + offset))
            .collect();
    }

    let slots: Vec<DVec3> = shape_offsets(kind, followers.len(), forward, features, rng)
        .into_iter()
        .map(|offset| leader_pos + offset)
        .collect();

    let members: Vec<(AgentId, DVec3)> = followers.iter().map(|(a, _, p)| (*a, *p)).collect();

    assign_slots(&members, &slots)
}

/// Match members to slots minimising the summed horizontal travel distance.
/// Extra members beyond the slot count are left out, nearest first kept.
pub fn assign_slots(members: &[(AgentId, DVec3)], slots: &[DVec3]) -> Vec<(AgentId, DVec3)> {
    if members.is_empty() || slots.is_empty() {
        return Vec::new();
    }

    let members: Vec<(AgentId, DVec3)> = if members.len() > slots.len() {
        let center = slots.iter().fold(DVec3::ZERO, |acc, s| acc + *s) / slots.len() as f64;

        members
            .iter()
            .copied()
            .sorted_by(|a, b| a.1.distance(center).total_cmp(&b.1.distance(center)))
            .take(slots.len())
            .collect()
    } else {
        members.to_vec()
    };

    let rows: Vec<Vec<i64>> = members
        .iter()
        .map(|(_, pos)| {
            slots
                .iter()
                .map(|slot| (flatten(*slot - *pos).length() * WEIGHT_SCALE).round() as i64)
                .collect()
        })
        .collect();

    let weights = match Matrix::from_rows(rows) {
        Ok(weights) => weights,
        Err(_) => return members.iter().zip(slots.iter()).map(|((a, _), s)| (*a, *s)).collect(),
    };

    let (_, assignment) = kuhn_munkres_min(&weights);

    members
        .iter()
        .zip(assignment)
        .map(|((agent, _), column)| (*agent, slots[column]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn followers(count: u128, role: SquadRole) -> Vec<(AgentId, SquadRole, DVec3)> {
        (0..count).map(|i| (AgentId::from_u128(i + 10), role, DVec3::ZERO)).collect()
    }

    #[test]
    fn arrow_staggers_behind_leader() {
        let mut rng = StdRng::seed_from_u64(1);
        let features = FormationFeatures::default();
        let slots = formation_slots(FormationKind::Arrow, DVec3::ZERO, Some(DVec3::X), &followers(4, SquadRole::Member), &features, &mut rng);

        assert_eq!(slots.len(), 4);
        for (_, slot) in &slots {
            assert!(slot.x < 0.0, "arrow slots must trail the leader");
        }

        let left = slots.iter().filter(|(_, s)| s.z < 0.0).count();
        assert_eq!(left, 2);
    }

    #[test]
    fn protected_puts_tanks_in_front_and_ranged_behind() {
        let mut rng = StdRng::seed_from_u64(1);
        let features = FormationFeatures::default();

        let tank = AgentId::from_u128(1);
        let archer = AgentId::from_u128(2);
        let looter = AgentId::from_u128(3);

        let members = vec![
            (tank, SquadRole::Tank, DVec3::ZERO),
            (archer, SquadRole::Ranged, DVec3::ZERO),
            (looter, SquadRole::Looter, DVec3::ZERO),
        ];

        let slots = formation_slots(FormationKind::Protected, DVec3::ZERO, Some(DVec3::X), &members, &features, &mut rng);
        let x_of = |agent: AgentId| slots.iter().find(|(a, _)| *a == agent).map(|(_, s)| s.x).unwrap();

        assert!(x_of(tank) > 0.0);
        assert!(x_of(archer) < x_of(looter));
        assert!(x_of(looter) < 0.0);
    }

    #[test]
    fn assignment_minimises_total_travel() {
        let a = AgentId::from_u128(1);
        let b = AgentId::from_u128(2);

        let members = vec![(a, DVec3::new(10.0, 0.0, 0.0)), (b, DVec3::new(-10.0, 0.0, 0.0))];
        let slots = vec![DVec3::new(-5.0, 0.0, 0.0), DVec3::new(5.0, 0.0, 0.0)];

        let assigned = assign_slots(&members, &slots);

        assert_eq!(assigned, vec![(a, DVec3::new(5.0, 0.0, 0.0)), (b, DVec3::new(-5.0, 0.0, 0.0))]);
    }
}

/// Linearly-constrained velocity solver
///
/// Each ORCA line is a half-plane `{ v : det(direction, v - point) <= 0 }`.
/// `lp2` finds the point closest to (or, in direction-optimization mode,
/// farthest along) `opt_velocity` inside the intersection of all half-planes
/// and the max-speed disc. When that intersection is empty, `lp3` falls
/// back to minimizing total penetration depth across the lines the 2-D
/// pass couldn't satisfy.
///
/// All three are pure functions of their arguments: no shared mutable state
/// survives a call, so a caller can retry or re-run them without resetting
/// anything.

use crate::config::EPSILON;
use crate::vecmath::Vec2;

/// A directed half-plane boundary: the feasible side is everywhere `v` with
/// `(v - point).det(direction) <= 0`.
#[derive(Debug, Clone, Copy)]
pub struct Line {
    pub point: Vec2,
    pub direction: Vec2,
}

/// Solve the 1-D problem of optimizing along `lines[line_no]`, subject to
/// the max-speed disc of radius `radius` and every earlier line in `lines`.
/// Returns `None` if no point on the line satisfies all of those
/// constraints.
fn lp1(lines: &[Line], line_no: usize, radius: f32, opt_velocity: Vec2, direction_opt: bool) -> Option<Vec2> {
    let line = lines[line_no];
    let dot_product = line.point.dot(line.direction);
    let discriminant = dot_product * dot_product + radius * radius - line.point.abs_sq();

    if discriminant < 0.0 {
        return None;
    }

    let sqrt_discriminant = discriminant.sqrt();
    let mut t_left = -dot_product - sqrt_discriminant;
    let mut t_right = -dot_product + sqrt_discriminant;

    for other in &lines[..line_no] {
        let denominator = line.direction.det(other.direction);
        let numerator = other.direction.det(line.point - other.point);

        if denominator.abs() <= EPSILON {
            if numerator < 0.0 {
                return None;
            }
            continue;
        }

        let t = numerator / denominator;
        if denominator >= 0.0 {
            t_right = t_right.min(t);
        } else {
            t_left = t_left.max(t);
        }

        if t_left > t_right {
            return None;
        }
    }

    Some(if direction_opt {
        if opt_velocity.dot(line.direction) > 0.0 {
            line.point + line.direction.scale(t_right)
        } else {
            line.point + line.direction.scale(t_left)
        }
    } else {
        let t = line.direction.dot(opt_velocity - line.point);
        let t = t.clamp(t_left, t_right);
        line.point + line.direction.scale(t)
    })
}

/// Solve the full 2-D problem: the point in the intersection of `lines` and
/// the disc of radius `radius` closest to `opt_velocity` (or, in
/// direction-optimization mode, the farthest point along it).
///
/// Returns the solution plus the index of the first line that could not be
/// satisfied, which equals `lines.len()` on full success. On partial
/// failure the returned velocity is the best feasible point found before
/// that line was reached; the caller hands both off to [`lp3`].
pub fn lp2(lines: &[Line], radius: f32, opt_velocity: Vec2, direction_opt: bool) -> (Vec2, usize) {
    let mut result = if direction_opt {
        opt_velocity.scale(radius)
    } else if opt_velocity.abs_sq() > radius * radius {
        opt_velocity.normalize().scale(radius)
    } else {
        opt_velocity
    };

    for (i, line) in lines.iter().enumerate() {
        if line.direction.det(line.point - result) > 0.0 {
            let candidate = lp1(lines, i, radius, opt_velocity, direction_opt);
            match candidate {
                Some(v) => result = v,
                None => return (result, i),
            }
        }
    }

    (result, lines.len())
}

/// Fallback used when [`lp2`] cannot satisfy every line at once: minimize
/// the maximum signed penetration depth across `lines[begin_line..]`,
/// holding the already-satisfied `lines[..num_obst_lines]` (obstacle lines,
/// which must never be violated) fixed.
pub fn lp3(lines: &[Line], num_obst_lines: usize, begin_line: usize, radius: f32, result: Vec2) -> Vec2 {
    let mut result = result;
    let mut distance = 0.0f32;

    for i in begin_line..lines.len() {
        let line = lines[i];
        if line.direction.det(line.point - result) > distance {
            let mut proj_lines: Vec<Line> = lines[..num_obst_lines].to_vec();

            for other in &lines[num_obst_lines..i] {
                let determinant = line.direction.det(other.direction);

                let point = if determinant.abs() <= EPSILON {
                    if line.direction.dot(other.direction) > 0.0 {
                        continue;
                    }
                    (line.point + other.point).scale(0.5)
                } else {
                    line.point + line.direction.scale(other.direction.det(line.point - other.point) / determinant)
                };

                proj_lines.push(Line {
                    point,
                    direction: (other.direction - line.direction).normalize(),
                });
            }

            let opt_velocity = Vec2::new(-line.direction.y, line.direction.x);
            let tentative = result;
            let (candidate, fail) = lp2(&proj_lines, radius, opt_velocity, true);
            result = if fail < proj_lines.len() { tentative } else { candidate };

            distance = line.direction.det(line.point - result);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lp2_with_no_lines_clamps_to_speed_disc() {
        let lines: Vec<Line> = Vec::new();
        let (v, fail) = lp2(&lines, 2.0, Vec2::new(5.0, 0.0), false);
        assert_eq!(fail, 0);
        assert!((v.abs() - 2.0).abs() < 1e-4);
    }

    #[test]
    fn lp2_returns_opt_velocity_when_within_disc_and_unconstrained() {
        let lines: Vec<Line> = Vec::new();
        let pref = Vec2::new(0.5, 0.5);
        let (v, fail) = lp2(&lines, 2.0, pref, false);
        assert_eq!(fail, 0);
        assert!((v - pref).abs() < 1e-4);
    }

    #[test]
    fn lp2_respects_a_single_half_plane() {
        // Feasible region: x <= 0 (direction (0, 1), point (0, 0) gives
        // det(direction, v - point) = v.x <= 0).
        let lines = vec![Line { point: Vec2::ZERO, direction: Vec2::new(0.0, 1.0) }];
        let (v, fail) = lp2(&lines, 5.0, Vec2::new(3.0, 0.0), false);
        assert_eq!(fail, 1);
        assert!(v.x <= 1e-3);
    }

    #[test]
    fn lp3_never_panics_on_infeasible_lines() {
        // Two half-planes (y >= 2, y <= -2) that don't overlap and that
        // the radius-1 speed disc can't reach either: lp2 must fail, and
        // lp3's penetration-minimizing fallback must still terminate with
        // a finite velocity.
        let lines = vec![
            Line { point: Vec2::new(0.0, 2.0), direction: Vec2::new(1.0, 0.0) },
            Line { point: Vec2::new(0.0, -2.0), direction: Vec2::new(-1.0, 0.0) },
        ];
        let (v, fail) = lp2(&lines, 1.0, Vec2::new(0.0, 0.0), false);
        assert!(fail < lines.len());
        let resolved = lp3(&lines, 0, fail, 1.0, v);
        assert!(resolved.x.is_finite() && resolved.y.is_finite());
    }
}

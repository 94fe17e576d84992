//! Line-of-sight shadow exclusion.
//!
//! Given a source point and the current mask, produce a new mask that
//! keeps only the cells visible from the source through the unmasked
//! region. Obstructions already carved out of the mask cast shadows; a
//! probe shaft pivoting at the source can only reach what it can "see".
//!
//! The approach is a 2-D visibility fan:
//!
//! 1. extract the pool of axis-aligned edges where the mask flips value,
//!    plus the motion-space boundary sides (except those the probe
//!    enters through),
//! 2. cast rays from the source at every unique edge corner, discarding
//!    rays that pierce a nearer edge,
//! 3. fan each surviving ray with two just-past-the-corner rays
//!    projected out to the next edge behind the corner,
//! 4. sort all rays by angle and paint the triangle fan they span onto
//!    a fresh mask using barycentric containment tests.
//!
//! All tolerances derive from the grid resolution.

use super::ExclusionSpec;
use crate::space::{Mask, MotionSpace};
use crate::MotionError;
use std::f64::consts::PI;

/// An axis-aligned occluding segment, endpoints on cell corners.
#[derive(Debug, Clone, Copy)]
struct Edge {
    start: [f64; 2],
    end: [f64; 2],
}

impl Edge {
    fn vector(&self) -> [f64; 2] {
        [self.end[0] - self.start[0], self.end[1] - self.start[1]]
    }
}

fn cross(a: [f64; 2], b: [f64; 2]) -> f64 {
    a[0] * b[1] - a[1] * b[0]
}

fn sub(a: [f64; 2], b: [f64; 2]) -> [f64; 2] {
    [a[0] - b[0], a[1] - b[1]]
}

fn norm(a: [f64; 2]) -> f64 {
    (a[0] * a[0] + a[1] * a[1]).sqrt()
}

/// Angle of a ray, continuous across the left half-plane: `asin(y/|r|)`
/// mirrored to `pi - asin` for negative x, giving a range of
/// `(-pi/2, 3pi/2)`.
fn ray_angle(r: [f64; 2]) -> f64 {
    let a = (r[1] / norm(r)).asin();
    if r[0] >= 0.0 {
        a
    } else {
        PI - a
    }
}

/// Governing exclusion that replaces the mask with the region visible
/// from `source_point`.
#[derive(Debug, Clone, PartialEq)]
pub struct Shadow2DExclusion {
    name: String,
    source_point: [f64; 2],
}

impl Shadow2DExclusion {
    pub fn new(name: String, source_point: [f64; 2]) -> Result<Self, MotionError> {
        if !source_point[0].is_finite() || !source_point[1].is_finite() {
            return Err(MotionError::Config(format!(
                "shadow source point must be finite, got {source_point:?}"
            )));
        }
        Ok(Self { name, source_point })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_point(&self) -> [f64; 2] {
        self.source_point
    }

    /// Computes the visibility mask for the current `mask`.
    pub fn compute(&self, space: &MotionSpace, mask: &Mask) -> Result<Mask, MotionError> {
        if space.ndim() != 2 {
            return Err(MotionError::Config(format!(
                "shadow exclusion requires a 2-D motion space, got {} dimensions",
                space.ndim()
            )));
        }

        // Nothing to shadow, or nothing visible at all.
        if mask.all() || !mask.any() {
            return Ok(mask.clone());
        }

        let insertion_edges = insertion_edge_indices(space, self.source_point);
        let source_inside = insertion_edges.is_none();
        let insertion_edges = insertion_edges.unwrap_or_default();

        // A source sitting on the grid but inside an excluded cell sees
        // nothing.
        if source_inside {
            let cell = space.nearest_cell(&self.source_point)?;
            if !mask.get(&cell) {
                return Ok(mask.to_all_false());
            }
        }

        let edges = build_edge_pool(space, mask, &insertion_edges);
        if edges.is_empty() {
            return Ok(mask.clone());
        }

        let corner_rays = self.build_corner_rays(&edges);
        let fan_rays = self.build_fanned_rays(space, &edges, &corner_rays);

        let mut rays = corner_rays;
        rays.extend(fan_rays);
        rays.sort_by(|a, b| {
            ray_angle(*a)
                .partial_cmp(&ray_angle(*b))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut painted = self.paint(space, mask, &rays);
        // Visibility can never unmask a cell.
        painted.and_assign(mask);
        Ok(painted)
    }

    /// Rays from the source to every unique edge corner, minus those
    /// that pierce a nearer edge on the way.
    fn build_corner_rays(&self, edges: &[Edge]) -> Vec<[f64; 2]> {
        let s = self.source_point;

        let mut endpoints: Vec<[f64; 2]> = edges
            .iter()
            .flat_map(|e| [e.start, e.end])
            .collect();
        endpoints.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        endpoints.dedup();

        let mut rays: Vec<[f64; 2]> = endpoints
            .iter()
            .map(|&p| sub(p, s))
            .filter(|&r| norm(r) > 0.0)
            .collect();

        // Solve source + mu * ray = start + nu * edge for every edge; a
        // hit with 0 <= mu < 1 means a closer edge occludes the corner.
        rays.retain(|&r| {
            !edges.iter().any(|e| {
                let ev = e.vector();
                let d = sub(e.start, s);
                let denom = cross(r, ev);
                let mu = cross(d, ev) / denom;
                let nu = cross(d, r) / denom;
                (0.0..1.0).contains(&mu) && (0.0..=1.0).contains(&nu)
            })
        });

        rays
    }

    /// Two just-past-the-corner rays per corner ray, projected to the
    /// nearest edge behind the corner (or dropped if they escape or land
    /// back on the corner).
    fn build_fanned_rays(
        &self,
        space: &MotionSpace,
        edges: &[Edge],
        corner_rays: &[[f64; 2]],
    ) -> Vec<[f64; 2]> {
        let s = self.source_point;
        let res = space.resolutions();
        let min_res = res[0].min(res[1]);

        let mut fans = Vec::with_capacity(2 * corner_rays.len());
        for &r in corner_rays {
            let length = norm(r);
            let phi = ray_angle(r);
            let delta = 0.01 * min_res / length;

            for sign in [1.0, -1.0] {
                let angle = phi + sign * delta;
                let unit = [angle.cos(), angle.sin()];

                // Smallest positive projection onto any edge.
                let mut mu_min = f64::INFINITY;
                for e in edges {
                    let ev = e.vector();
                    let d = sub(e.start, s);
                    let denom = cross(unit, ev);
                    let mu = cross(d, ev) / denom;
                    let nu = cross(d, unit) / denom;
                    if mu > 0.0 && (0.0..=1.0).contains(&nu) && mu < mu_min {
                        mu_min = mu;
                    }
                }

                let fan = [mu_min * unit[0], mu_min * unit[1]];
                // A ray that hits nothing escapes to infinity; this
                // happens when the source is outside the motion space
                // and a boundary corner gets fanned.
                if !fan[0].is_finite() || !fan[1].is_finite() {
                    continue;
                }
                // A fan ray landing within half a cell of its corner
                // adds nothing over the corner ray itself.
                if (fan[0] - r[0]).abs() <= 0.5 * res[0]
                    && (fan[1] - r[1]).abs() <= 0.5 * res[1]
                {
                    continue;
                }
                fans.push(fan);
            }
        }
        fans
    }

    /// Marks every cell whose center falls inside the triangle fan
    /// spanned by the angle-sorted rays.
    fn paint(&self, space: &MotionSpace, mask: &Mask, rays: &[[f64; 2]]) -> Mask {
        let s = self.source_point;
        let xs = space.coords(0);
        let ys = space.coords(1);

        let mut painted = mask.to_all_false();
        let count = rays.len();
        for i in 0..count {
            let b = rays[i];
            let c = rays[(i + 1) % count];

            // Barycentric denominator for triangle (source, s+b, s+c);
            // collinear rays span no area.
            let denom = cross(c, b);
            if denom == 0.0 {
                continue;
            }

            for (ix, &x) in xs.iter().enumerate() {
                for (iy, &y) in ys.iter().enumerate() {
                    if painted.get2(ix, iy) {
                        continue;
                    }
                    let p = [x - s[0], y - s[1]];
                    let l3 = cross(p, b) / denom;
                    let l2 = cross(p, c) / (-denom);
                    let l1 = 1.0 - l2 - l3;
                    if (0.0..=1.0).contains(&l1)
                        && (0.0..=1.0).contains(&l2)
                        && (0.0..=1.0).contains(&l3)
                    {
                        painted.set2(ix, iy, true);
                    }
                }
            }
        }
        painted
    }

    pub fn spec(&self) -> ExclusionSpec {
        ExclusionSpec::Shadow2d {
            source_point: self.source_point,
        }
    }
}

/// Indices of the boundary sides (0 bottom, 1 right, 2 top, 3 left) the
/// probe passes through when entering from outside; `None` when the
/// source lies inside the motion space.
fn insertion_edge_indices(space: &MotionSpace, source: [f64; 2]) -> Option<Vec<usize>> {
    let (x0, x1) = space.extent(0);
    let (y0, y1) = space.extent(1);

    if source[0] >= x0 && source[0] <= x1 && source[1] >= y0 && source[1] <= y1 {
        return None;
    }

    let mut indices = Vec::with_capacity(2);
    if source[1] < y0 {
        indices.push(0);
    } else if source[1] > y1 {
        indices.push(2);
    }
    if source[0] > x1 {
        indices.push(1);
    } else if source[0] < x0 {
        indices.push(3);
    }
    Some(indices)
}

/// Emits each maximal run of consecutive `true` flags as `(first, last)`.
fn collect_runs(flags: impl Iterator<Item = bool>, mut emit: impl FnMut(usize, usize)) {
    let mut run: Option<(usize, usize)> = None;
    for (i, flag) in flags.enumerate() {
        if !flag {
            continue;
        }
        run = match run {
            Some((first, last)) if last + 1 == i => Some((first, i)),
            Some((first, last)) => {
                emit(first, last);
                Some((i, i))
            }
            None => Some((i, i)),
        };
    }
    if let Some((first, last)) = run {
        emit(first, last);
    }
}

/// Every axis-aligned segment where the mask flips value, plus the
/// portions of the boundary sides that act as occluders.
///
/// Interior edges sit between cells of opposite value, offset half a
/// cell so they land on cell corners; contiguous transitions fuse into
/// one segment. A non-insertion boundary side occludes wherever the mask
/// is true along it (rays must stop at the edge of the space); an
/// insertion side occludes only where the mask is false (the probe
/// enters through the open part).
fn build_edge_pool(space: &MotionSpace, mask: &Mask, insertion_edges: &[usize]) -> Vec<Edge> {
    let xs = space.coords(0);
    let ys = space.coords(1);
    let dx = space.resolution(0);
    let dy = space.resolution(1);
    let nx = xs.len();
    let ny = ys.len();

    let mut pool = Vec::new();

    // Vertical interior edges: the mask flips between x-neighbors.
    for ix in 0..nx - 1 {
        let x = xs[ix] + 0.5 * dx;
        collect_runs(
            (0..ny).map(|iy| mask.get2(ix, iy) != mask.get2(ix + 1, iy)),
            |first, last| {
                pool.push(Edge {
                    start: [x, ys[first] - 0.5 * dy],
                    end: [x, ys[last] + 0.5 * dy],
                });
            },
        );
    }

    // Horizontal interior edges: the mask flips between y-neighbors.
    for iy in 0..ny - 1 {
        let y = ys[iy] + 0.5 * dy;
        collect_runs(
            (0..nx).map(|ix| mask.get2(ix, iy) != mask.get2(ix, iy + 1)),
            |first, last| {
                pool.push(Edge {
                    start: [xs[first] - 0.5 * dx, y],
                    end: [xs[last] + 0.5 * dx, y],
                });
            },
        );
    }

    // Boundary sides: 0 bottom, 1 right, 2 top, 3 left.
    let (x_lo, x_hi) = space.extent(0);
    let (y_lo, y_hi) = space.extent(1);
    for side in 0..4usize {
        let is_insertion = insertion_edges.contains(&side);
        let occludes = |v: bool| if is_insertion { !v } else { v };
        match side {
            0 | 2 => {
                let iy = if side == 0 { 0 } else { ny - 1 };
                let y = if side == 0 { y_lo } else { y_hi };
                collect_runs((0..nx).map(|ix| occludes(mask.get2(ix, iy))), |first, last| {
                    pool.push(Edge {
                        start: [xs[first] - 0.5 * dx, y],
                        end: [xs[last] + 0.5 * dx, y],
                    });
                });
            }
            _ => {
                let ix = if side == 3 { 0 } else { nx - 1 };
                let x = if side == 3 { x_lo } else { x_hi };
                collect_runs((0..ny).map(|iy| occludes(mask.get2(ix, iy))), |first, last| {
                    pool.push(Edge {
                        start: [x, ys[first] - 0.5 * dy],
                        end: [x, ys[last] + 0.5 * dy],
                    });
                });
            }
        }
    }

    pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exclusions::{CircleSide, CircularExclusion};
    use crate::space::SpaceDim;

    fn space() -> MotionSpace {
        MotionSpace::new(vec![
            SpaceDim {
                label: "x".to_string(),
                range: [-10.0, 10.0],
                num: 21,
            },
            SpaceDim {
                label: "y".to_string(),
                range: [-10.0, 10.0],
                num: 21,
            },
        ])
        .unwrap()
    }

    #[test]
    fn all_true_mask_passes_through() {
        let space = space();
        let mask = Mask::all_true(&space);
        let shadow = Shadow2DExclusion::new("mask_ex1".to_string(), [0.0, 0.0]).unwrap();
        let out = shadow.compute(&space, &mask).unwrap();
        assert!(out.all());
    }

    #[test]
    fn all_false_mask_passes_through() {
        let space = space();
        let mask = Mask::all_true(&space).to_all_false();
        let shadow = Shadow2DExclusion::new("mask_ex1".to_string(), [0.0, 0.0]).unwrap();
        let out = shadow.compute(&space, &mask).unwrap();
        assert!(!out.any());
    }

    #[test]
    fn occluded_source_sees_nothing() {
        let space = space();
        let blocker = CircularExclusion::new(
            "mask_ex1".to_string(),
            2.0,
            [0.0, 0.0],
            CircleSide::Inside,
        )
        .unwrap();
        let mask = blocker.compute(&space).unwrap();
        let shadow = Shadow2DExclusion::new("mask_ex2".to_string(), [0.0, 0.0]).unwrap();
        let out = shadow.compute(&space, &mask).unwrap();
        assert!(!out.any());
    }

    #[test]
    fn circle_casts_a_shadow_down_range() {
        // A circle of radius 5 at (10, 0); the source at the origin.
        let space = space();
        let blocker = CircularExclusion::new(
            "mask_ex1".to_string(),
            5.0,
            [10.0, 0.0],
            CircleSide::Inside,
        )
        .unwrap();
        let mask = blocker.compute(&space).unwrap();
        let shadow = Shadow2DExclusion::new("mask_ex2".to_string(), [0.0, 0.0]).unwrap();
        let out = shadow.compute(&space, &mask).unwrap();

        // Along the +x ray: visible until the circle, dark inside and
        // behind it.
        for ix in 10..15 {
            assert!(out.get2(ix, 10), "cell x={} should be visible", ix as f64 - 10.0);
        }
        for ix in 15..21 {
            assert!(!out.get2(ix, 10), "cell x={} should be dark", ix as f64 - 10.0);
        }
        // A cell outside the circle but behind it from the source:
        // (9, 5) is beyond the radius yet its line of sight crosses
        // the masked region.
        assert!(mask.get2(19, 15));
        assert!(!out.get2(19, 15));
        // Off-axis cells out of the shadow cone stay visible.
        assert!(out.get2(10, 18));
        assert!(out.get2(2, 2));
        // The -x direction is unobstructed.
        assert!(out.get2(0, 10));
    }

    #[test]
    fn shadow_output_is_subset_of_input() {
        let space = space();
        let blocker = CircularExclusion::new(
            "mask_ex1".to_string(),
            3.0,
            [4.0, 4.0],
            CircleSide::Inside,
        )
        .unwrap();
        let mask = blocker.compute(&space).unwrap();

        for source in [[-8.0, -8.0], [0.0, 0.0], [12.0, 0.0], [-15.0, 3.0]] {
            let shadow = Shadow2DExclusion::new("mask_ex2".to_string(), source).unwrap();
            let out = shadow.compute(&space, &mask).unwrap();
            assert!(
                out.is_subset_of(&mask),
                "shadow from {source:?} unmasked cells"
            );
        }
    }

    #[test]
    fn outside_source_enters_through_open_boundary() {
        // Source to the east of the space, a wall blocking the middle.
        let space = space();
        let wall = crate::exclusions::DividerExclusion::new(
            "mask_ex1".to_string(),
            f64::INFINITY,
            0.0,
            crate::exclusions::DividerSide::MinusE0,
        )
        .unwrap();
        // Wall excludes x < 0; accessible only at x >= 0.
        let mask = wall.compute(&space).unwrap();
        let shadow = Shadow2DExclusion::new("mask_ex2".to_string(), [20.0, 0.0]).unwrap();
        let out = shadow.compute(&space, &mask).unwrap();

        // Cells on the accessible side remain visible.
        assert!(out.get2(15, 10));
        assert!(out.get2(11, 5));
        // The excluded half stays dark.
        assert!(!out.get2(5, 10));
        assert!(out.is_subset_of(&mask));
    }

    #[test]
    fn run_collection_fuses_contiguous_spans() {
        let flags = [true, true, false, true, false, false, true, true, true];
        let mut runs = Vec::new();
        collect_runs(flags.iter().copied(), |a, b| runs.push((a, b)));
        assert_eq!(runs, vec![(0, 1), (3, 3), (6, 8)]);
    }
}

//! The motion builder: composes the motion space, point layers, and
//! exclusion layers into an ordered motion list.

use crate::exclusions::{ExclusionLayer, ExclusionSpec};
use crate::layers::{LayerSpec, PointLayer};
use crate::space::{Mask, MotionSpace, SpaceDim};
use crate::MotionError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// The motion-space part of a motion-builder configuration: either a
/// built-in alias or explicit dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SpaceConfig {
    Alias(String),
    Dims(Vec<SpaceDim>),
}

impl SpaceConfig {
    pub fn build(&self) -> Result<MotionSpace, MotionError> {
        match self {
            SpaceConfig::Alias(name) => match name.as_str() {
                "lapd_xy" => Ok(MotionSpace::lapd_xy()),
                other => Err(MotionError::Config(format!(
                    "unknown motion space alias {other:?}"
                ))),
            },
            SpaceConfig::Dims(dims) => MotionSpace::new(dims.clone()),
        }
    }
}

/// Composes the motion space, its mask, the point-layer catalog, and
/// the exclusion-layer catalog, and lazily assembles the motion list.
///
/// Exclusions apply in insertion order: regular exclusions AND into the
/// mask, governing exclusions replace it, so a governing exclusion
/// added later overrides the work of earlier layers.
#[derive(Debug, Clone)]
pub struct MotionBuilder {
    space: MotionSpace,
    mask: Mask,
    layers: Vec<PointLayer>,
    exclusions: Vec<ExclusionLayer>,
    motion_list: Option<Vec<Vec<f64>>>,
    layer_counter: usize,
    exclusion_counter: usize,
}

impl MotionBuilder {
    /// Builds from declarative specs, applying exclusions in order.
    pub fn new(
        space: &SpaceConfig,
        layers: &[LayerSpec],
        exclusions: &[ExclusionSpec],
    ) -> Result<Self, MotionError> {
        let space = space.build()?;
        let mask = Mask::all_true(&space);
        let mut builder = Self {
            space,
            mask,
            layers: Vec::new(),
            exclusions: Vec::new(),
            motion_list: None,
            layer_counter: 0,
            exclusion_counter: 0,
        };

        for spec in layers {
            builder.add_layer(spec)?;
        }
        for spec in exclusions {
            builder.add_exclusion(spec)?;
        }

        Ok(builder)
    }

    pub fn space(&self) -> &MotionSpace {
        &self.space
    }

    /// The current global mask.
    pub fn mask(&self) -> &Mask {
        &self.mask
    }

    /// Dimensionality of the motion space.
    pub fn ndim(&self) -> usize {
        self.space.ndim()
    }

    /// Adds a point layer and returns its generated name.
    pub fn add_layer(&mut self, spec: &LayerSpec) -> Result<String, MotionError> {
        self.layer_counter += 1;
        let name = format!("point_layer{}", self.layer_counter);
        let layer = PointLayer::from_spec(name.clone(), spec, &self.space)?;
        self.layers.push(layer);
        self.motion_list = None;
        Ok(name)
    }

    /// Removes a point layer by name.
    pub fn remove_layer(&mut self, name: &str) -> Result<(), MotionError> {
        let before = self.layers.len();
        self.layers.retain(|layer| layer.name() != name);
        if self.layers.len() == before {
            return Err(MotionError::Config(format!("no point layer named {name:?}")));
        }
        self.motion_list = None;
        Ok(())
    }

    /// Adds an exclusion layer, rebuilds the mask, and returns the
    /// layer's generated name.
    pub fn add_exclusion(&mut self, spec: &ExclusionSpec) -> Result<String, MotionError> {
        self.exclusion_counter += 1;
        let name = format!("mask_ex{}", self.exclusion_counter);
        let exclusion = ExclusionLayer::from_spec(name.clone(), spec, &self.space)?;
        self.exclusions.push(exclusion);
        self.motion_list = None;
        self.rebuild_mask()?;
        Ok(name)
    }

    /// Removes an exclusion layer by name and rebuilds the mask.
    pub fn remove_exclusion(&mut self, name: &str) -> Result<(), MotionError> {
        let before = self.exclusions.len();
        self.exclusions.retain(|ex| ex.name() != name);
        if self.exclusions.len() == before {
            return Err(MotionError::Config(format!("no exclusion named {name:?}")));
        }
        self.motion_list = None;
        self.rebuild_mask()
    }

    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.name()).collect()
    }

    pub fn exclusion_names(&self) -> Vec<&str> {
        self.exclusions.iter().map(|e| e.name()).collect()
    }

    /// Resets the mask to all-true and reapplies every exclusion in
    /// insertion order under its regular/governing policy.
    pub fn rebuild_mask(&mut self) -> Result<(), MotionError> {
        self.mask.fill(true);
        for i in 0..self.exclusions.len() {
            let layer = self.exclusions[i].compute(&self.space, &self.mask)?;
            if self.exclusions[i].is_governing() {
                self.mask = layer;
            } else {
                self.mask.and_assign(&layer);
            }
        }
        Ok(())
    }

    /// Whether `point` sits in an excluded region. Points outside the
    /// motion-space extent are excluded.
    pub fn is_excluded(&self, point: &[f64]) -> Result<bool, MotionError> {
        if !self.space.contains(point)? {
            return Ok(true);
        }
        let cell = self.space.nearest_cell(point)?;
        Ok(!self.mask.get(&cell))
    }

    /// The ordered motion list: every layer's points in insertion order
    /// (row-major within a layer), keeping each point iff it lies in
    /// the extent and its nearest mask cell is accessible.
    ///
    /// Computed lazily and cached until the catalog changes.
    pub fn motion_list(&mut self) -> Result<&[Vec<f64>], MotionError> {
        if self.motion_list.is_none() {
            let mut list = Vec::new();
            for layer in &self.layers {
                for point in layer.points() {
                    if !self.space.contains(&point)? {
                        continue;
                    }
                    let cell = self.space.nearest_cell(&point)?;
                    if self.mask.get(&cell) {
                        list.push(point);
                    }
                }
            }
            debug!(points = list.len(), "assembled motion list");
            self.motion_list = Some(list);
        }

        Ok(self.motion_list.as_deref().unwrap_or_default())
    }

    /// Number of points currently in the motion list.
    pub fn motion_list_len(&mut self) -> Result<usize, MotionError> {
        Ok(self.motion_list()?.len())
    }

    /// The declarative specs of the current catalogs, for the live
    /// configuration view.
    pub fn layer_specs(&self) -> Vec<LayerSpec> {
        self.layers.iter().map(|l| l.spec()).collect()
    }

    pub fn exclusion_specs(&self) -> Vec<ExclusionSpec> {
        self.exclusions.iter().map(|e| e.spec()).collect()
    }

    pub fn space_config(&self) -> SpaceConfig {
        SpaceConfig::Dims(self.space.dims().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exclusions::CircleSide;

    fn space_1d() -> SpaceConfig {
        SpaceConfig::Dims(vec![SpaceDim {
            label: "x".to_string(),
            range: [-10.0, 10.0],
            num: 21,
        }])
    }

    fn space_2d() -> SpaceConfig {
        SpaceConfig::Dims(vec![
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
    }

    #[test]
    fn one_dimensional_grid_motion_list() {
        let mut mb = MotionBuilder::new(
            &space_1d(),
            &[LayerSpec::Grid {
                limits: vec![vec![-5.0, 5.0]],
                steps: vec![11],
            }],
            &[],
        )
        .unwrap();

        let list = mb.motion_list().unwrap();
        assert_eq!(list.len(), 11);
        for (i, point) in list.iter().enumerate() {
            assert_eq!(point[0], -5.0 + i as f64);
        }
    }

    #[test]
    fn out_of_extent_points_are_dropped() {
        let mut mb = MotionBuilder::new(
            &space_1d(),
            &[LayerSpec::Grid {
                limits: vec![vec![-20.0, 20.0]],
                steps: vec![41],
            }],
            &[],
        )
        .unwrap();

        let list = mb.motion_list().unwrap();
        assert_eq!(list.len(), 21);
        assert!(list.iter().all(|p| p[0] >= -10.5 && p[0] <= 10.5));
    }

    #[test]
    fn regular_exclusions_only_remove_cells() {
        let mut mb = MotionBuilder::new(&space_2d(), &[], &[]).unwrap();
        let baseline = mb.mask().clone();

        mb.add_exclusion(&ExclusionSpec::Circle {
            radius: 8.0,
            center: None,
            exclude: CircleSide::Outside,
        })
        .unwrap();
        let first = mb.mask().clone();
        assert!(first.is_subset_of(&baseline));

        mb.add_exclusion(&ExclusionSpec::Circle {
            radius: 3.0,
            center: Some([2.0, 2.0]),
            exclude: CircleSide::Inside,
        })
        .unwrap();
        assert!(mb.mask().is_subset_of(&first));
    }

    #[test]
    fn motion_list_points_respect_the_mask() {
        let mut mb = MotionBuilder::new(
            &space_2d(),
            &[LayerSpec::Grid {
                limits: vec![vec![-9.0, 9.0]],
                steps: vec![19],
            }],
            &[ExclusionSpec::Circle {
                radius: 6.0,
                center: None,
                exclude: CircleSide::Outside,
            }],
        )
        .unwrap();

        let list: Vec<Vec<f64>> = mb.motion_list().unwrap().to_vec();
        assert!(!list.is_empty());
        for point in &list {
            assert!(!mb.is_excluded(point).unwrap());
            assert!(mb.space().contains(point).unwrap());
        }
    }

    #[test]
    fn removing_an_exclusion_restores_the_mask() {
        let mut mb = MotionBuilder::new(&space_2d(), &[], &[]).unwrap();
        let name = mb
            .add_exclusion(&ExclusionSpec::Circle {
                radius: 5.0,
                center: None,
                exclude: CircleSide::Outside,
            })
            .unwrap();
        assert!(!mb.mask().all());

        mb.remove_exclusion(&name).unwrap();
        assert!(mb.mask().all());
        assert!(mb.remove_exclusion(&name).is_err());
    }

    #[test]
    fn layers_concatenate_in_insertion_order() {
        let mut mb = MotionBuilder::new(&space_1d(), &[], &[]).unwrap();
        mb.add_layer(&LayerSpec::Grid {
            limits: vec![vec![5.0, 7.0]],
            steps: vec![3],
        })
        .unwrap();
        mb.add_layer(&LayerSpec::Grid {
            limits: vec![vec![-7.0, -5.0]],
            steps: vec![3],
        })
        .unwrap();

        let list = mb.motion_list().unwrap();
        let xs: Vec<f64> = list.iter().map(|p| p[0]).collect();
        assert_eq!(xs, vec![5.0, 6.0, 7.0, -7.0, -6.0, -5.0]);
    }

    #[test]
    fn is_excluded_checks_arity() {
        let mb = MotionBuilder::new(&space_2d(), &[], &[]).unwrap();
        assert!(matches!(
            mb.is_excluded(&[0.0]),
            Err(MotionError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn lapd_alias_space_builds() {
        let mb = MotionBuilder::new(&SpaceConfig::Alias("lapd_xy".to_string()), &[], &[]).unwrap();
        assert_eq!(mb.ndim(), 2);
        assert!(MotionBuilder::new(&SpaceConfig::Alias("lapd_xz".to_string()), &[], &[]).is_err());
    }
}

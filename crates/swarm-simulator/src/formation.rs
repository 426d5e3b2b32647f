//! Formation solver: target positions for line, circle, grid and v-shape.
//!
//! Positions are centered on the workspace origin at the requested height
//! and assigned to vehicles in creation order.

use std::f64::consts::TAU;

use serde::Serialize;
use swarm_domain::{FormationParams, FormationShape, FormationSpec, Vec3, VehicleId};

use crate::error::CommandError;

/// One vehicle's place in a formation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormationSlot {
    pub vehicle_id: VehicleId,
    pub target: Vec3,
}

/// Reject parameters a shape cannot be built from.
pub fn validate_params(shape: FormationShape, params: &FormationParams) -> Result<(), CommandError> {
    if !params.height.is_finite() {
        return Err(CommandError::InvalidParameter(format!(
            "height must be finite, got {}",
            params.height
        )));
    }
    let (name, value) = match shape {
        FormationShape::Circle => ("radius", params.radius),
        FormationShape::Line | FormationShape::Grid | FormationShape::VShape => {
            ("spacing", params.spacing)
        }
    };
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(CommandError::InvalidParameter(format!(
            "{shape} {name} must be positive, got {value}"
        )))
    }
}

/// Positions for `count` vehicles.
#[must_use]
pub fn layout(shape: FormationShape, params: &FormationParams, count: usize) -> Vec<Vec3> {
    let z = params.height;
    match shape {
        FormationShape::Line => {
            let mid = centre_offset(count);
            (0..count)
                .map(|i| Vec3::new((index(i) - mid) * params.spacing, 0.0, z))
                .collect()
        }
        FormationShape::Circle => (0..count)
            .map(|i| {
                let angle = TAU * index(i) / index(count);
                Vec3::new(params.radius * angle.cos(), params.radius * angle.sin(), z)
            })
            .collect(),
        FormationShape::Grid => {
            let cols = grid_columns(count);
            let rows = count.div_ceil(cols.max(1));
            let (col_mid, row_mid) = (centre_offset(cols), centre_offset(rows));
            (0..count)
                .map(|i| {
                    let (row, col) = (i / cols, i % cols);
                    Vec3::new(
                        (index(col) - col_mid) * params.spacing,
                        (index(row) - row_mid) * params.spacing,
                        z,
                    )
                })
                .collect()
        }
        FormationShape::VShape => {
            let mut points: Vec<Vec3> = (0..count)
                .map(|i| {
                    // 0 is the apex; odd indices take the +y arm, even the -y arm
                    let rank = index(i.div_ceil(2));
                    let side = if i % 2 == 1 { 1.0 } else { -1.0 };
                    let y = if i == 0 { 0.0 } else { side * rank * params.spacing / 2.0 };
                    Vec3::new(-rank * params.spacing, y, z)
                })
                .collect();
            if !points.is_empty() {
                let mean_x = points.iter().map(|p| p.x).sum::<f64>() / index(points.len());
                for p in &mut points {
                    p.x -= mean_x;
                }
            }
            points
        }
    }
}

/// Assign formation targets to `vehicles` in the given order.
pub fn solve(spec: &FormationSpec, vehicles: &[VehicleId]) -> Result<Vec<FormationSlot>, CommandError> {
    if vehicles.is_empty() {
        return Err(CommandError::InsufficientVehicles);
    }
    validate_params(spec.shape, &spec.params)?;

    Ok(vehicles
        .iter()
        .zip(layout(spec.shape, &spec.params, vehicles.len()))
        .map(|(id, target)| FormationSlot {
            vehicle_id: id.clone(),
            target,
        })
        .collect())
}

/// Parse a shape tag and solve.
pub fn solve_tagged(
    tag: &str,
    params: FormationParams,
    vehicles: &[VehicleId],
) -> Result<Vec<FormationSlot>, CommandError> {
    let shape: FormationShape = tag.parse()?;
    solve(&FormationSpec::new(shape, params), vehicles)
}

#[allow(clippy::cast_precision_loss)]
fn index(i: usize) -> f64 {
    i as f64
}

fn centre_offset(count: usize) -> f64 {
    index(count.saturating_sub(1)) / 2.0
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn grid_columns(count: usize) -> usize {
    (index(count).sqrt().ceil() as usize).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<VehicleId> {
        (0..n).map(VehicleId::from_index).collect()
    }

    fn close(a: Vec3, b: Vec3) -> bool {
        a.distance_to(b) < 1e-9
    }

    #[test]
    fn test_circle_of_four() {
        let spec = FormationSpec::new(FormationShape::Circle, FormationParams::default());
        let slots = solve(&spec, &ids(4)).unwrap();

        let expected = [
            Vec3::new(1.0, 0.0, 0.6),
            Vec3::new(0.0, 1.0, 0.6),
            Vec3::new(-1.0, 0.0, 0.6),
            Vec3::new(0.0, -1.0, 0.6),
        ];
        for (slot, want) in slots.iter().zip(expected) {
            assert!(close(slot.target, want), "{:?} != {want:?}", slot.target);
        }
        assert_eq!(slots[0].vehicle_id.as_str(), "d1");
        assert_eq!(slots[3].vehicle_id.as_str(), "d4");
    }

    #[test]
    fn test_line_is_centered() {
        let points = layout(FormationShape::Line, &FormationParams::default(), 3);
        assert!(close(points[0], Vec3::new(-0.5, 0.0, 0.6)));
        assert!(close(points[1], Vec3::new(0.0, 0.0, 0.6)));
        assert!(close(points[2], Vec3::new(0.5, 0.0, 0.6)));

        let single = layout(FormationShape::Line, &FormationParams::default(), 1);
        assert!(close(single[0], Vec3::new(0.0, 0.0, 0.6)));
    }

    #[test]
    fn test_grid_dimensions() {
        let params = FormationParams::default();
        // 5 vehicles: 3 columns, 2 rows
        let points = layout(FormationShape::Grid, &params, 5);
        assert!(close(points[0], Vec3::new(-0.5, -0.25, 0.6)));
        assert!(close(points[2], Vec3::new(0.5, -0.25, 0.6)));
        assert!(close(points[3], Vec3::new(-0.5, 0.25, 0.6)));

        let square = layout(FormationShape::Grid, &params, 4);
        assert!(close(square[0], Vec3::new(-0.25, -0.25, 0.6)));
        assert!(close(square[3], Vec3::new(0.25, 0.25, 0.6)));
    }

    #[test]
    fn test_v_shape_arms() {
        let params = FormationParams::default();
        let points = layout(FormationShape::VShape, &params, 5);
        // Raw x: 0, -0.5, -0.5, -1.0, -1.0 -> mean -0.6
        assert!(close(points[0], Vec3::new(0.6, 0.0, 0.6)));
        assert!(close(points[1], Vec3::new(0.1, 0.25, 0.6)));
        assert!(close(points[2], Vec3::new(0.1, -0.25, 0.6)));
        assert!(close(points[3], Vec3::new(-0.4, 0.5, 0.6)));
        assert!(close(points[4], Vec3::new(-0.4, -0.5, 0.6)));
    }

    #[test]
    fn test_errors() {
        let spec = FormationSpec::new(FormationShape::Line, FormationParams::default());
        assert_eq!(solve(&spec, &[]), Err(CommandError::InsufficientVehicles));

        let bad = FormationSpec::new(
            FormationShape::Circle,
            FormationParams {
                radius: -1.0,
                ..FormationParams::default()
            },
        );
        assert!(matches!(
            solve(&bad, &ids(2)),
            Err(CommandError::InvalidParameter(_))
        ));

        assert_eq!(
            solve_tagged("hexagon", FormationParams::default(), &ids(2)),
            Err(CommandError::UnknownFormation("hexagon".to_string()))
        );
        assert!(solve_tagged("vshape", FormationParams::default(), &ids(2)).is_ok());
    }

    #[test]
    fn test_deterministic() {
        let spec = FormationSpec::new(FormationShape::Grid, FormationParams::default());
        assert_eq!(solve(&spec, &ids(7)), solve(&spec, &ids(7)));
    }
}

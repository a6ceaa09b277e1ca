use crate::raster::AngularSetpoint;

pub type PlanarPoint = [f64; 2];

/// Top-down view of the unit-sphere direction: boresight maps to the origin,
/// high theta towards the unit circle. The height component is dropped.
pub fn project(theta_deg: f64, phi_deg: f64) -> PlanarPoint {
    let (theta, phi) = (theta_deg.to_radians(), phi_deg.to_radians());
    [theta.sin() * phi.cos(), theta.sin() * phi.sin()]
}

pub fn project_setpoint(setpoint: &AngularSetpoint) -> PlanarPoint {
    project(setpoint.theta_deg, setpoint.phi_deg)
}

/// `n` evenly spaced values from `start` to `end`, both included.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { end } else { start + i as f64 * step })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: PlanarPoint, b: PlanarPoint) -> bool {
        (a[0] - b[0]).abs() < 1e-12 && (a[1] - b[1]).abs() < 1e-12
    }

    #[test]
    fn boresight_projects_to_origin_for_any_azimuth() {
        for phi in [0.0, 90.0, 200.0] {
            assert!(close(project(0.0, phi), [0.0, 0.0]));
        }
    }

    #[test]
    fn azimuth_sets_direction_and_theta_sets_radius() {
        assert!(close(project(90.0, 0.0), [1.0, 0.0]));
        assert!(close(project(90.0, 90.0), [0.0, 1.0]));
        let p = project(45.0, 180.0);
        assert!(close(p, [-(0.5f64.sqrt()), 0.0]));
        let radius = |p: PlanarPoint| (p[0] * p[0] + p[1] * p[1]).sqrt();
        assert!(radius(project(10.0, 33.0)) < radius(project(30.0, 33.0)));
    }

    #[test]
    fn linspace_includes_both_ends() {
        let axis = linspace(-0.7, 0.7, 180);
        assert_eq!(axis.len(), 180);
        assert_eq!(axis[0], -0.7);
        assert_eq!(axis[179], 0.7);
        assert_eq!(linspace(0.3, 1.0, 1), vec![0.3]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }
}

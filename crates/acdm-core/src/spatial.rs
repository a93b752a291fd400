//! Geodesy for position tracking.
//!
//! Ellipsoidal distances use Vincenty's formulae on WGS-84; haversine is the
//! fallback where the iteration does not converge.

/// WGS-84 semi-major axis in meters.
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS-84 flattening.
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// WGS-84 semi-minor axis in meters.
pub const WGS84_B: f64 = WGS84_A * (1.0 - WGS84_F);

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

const VINCENTY_MAX_ITERATIONS: usize = 200;
const VINCENTY_EPSILON: f64 = 1e-12;

/// Result of an inverse geodesic problem.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeodesicLine {
    pub distance_m: f64,
    /// Azimuth at the start point, degrees clockwise from north in `[0, 360)`
    pub initial_azimuth_deg: f64,
    /// Azimuth at the end point, in the direction of travel
    pub final_azimuth_deg: f64,
}

fn normalize_azimuth(deg: f64) -> f64 {
    deg.rem_euclid(360.0)
}

fn normalize_lon(deg: f64) -> f64 {
    (deg + 180.0).rem_euclid(360.0) - 180.0
}

/// Solve the inverse geodesic problem between two points.
///
/// Returns `None` when the iteration fails to converge, which happens for
/// nearly antipodal points.
pub fn geodesic_inverse(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> Option<GeodesicLine> {
    let l = (lon2 - lon1).to_radians();
    let u1 = ((1.0 - WGS84_F) * lat1.to_radians().tan()).atan();
    let u2 = ((1.0 - WGS84_F) * lat2.to_radians().tan()).atan();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    let mut converged = false;
    let mut sin_sigma = 0.0;
    let mut cos_sigma = 1.0;
    let mut sigma = 0.0;
    let mut cos_sq_alpha = 1.0;
    let mut cos_2sigma_m = 0.0;
    let mut sin_lambda = 0.0;
    let mut cos_lambda = 1.0;

    for _ in 0..VINCENTY_MAX_ITERATIONS {
        (sin_lambda, cos_lambda) = lambda.sin_cos();
        let x = cos_u2 * sin_lambda;
        let y = cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda;
        sin_sigma = (x * x + y * y).sqrt();
        if sin_sigma == 0.0 {
            // coincident points
            return Some(GeodesicLine {
                distance_m: 0.0,
                initial_azimuth_deg: 0.0,
                final_azimuth_deg: 0.0,
            });
        }
        cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        cos_2sigma_m = if cos_sq_alpha != 0.0 {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        } else {
            // equatorial line
            0.0
        };
        let c = WGS84_F / 16.0 * cos_sq_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos_sq_alpha));
        let previous = lambda;
        lambda = l
            + (1.0 - c)
                * WGS84_F
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))));
        if (lambda - previous).abs() < VINCENTY_EPSILON {
            converged = true;
            break;
        }
    }

    if !converged {
        return None;
    }

    let u_sq = cos_sq_alpha * (WGS84_A.powi(2) - WGS84_B.powi(2)) / WGS84_B.powi(2);
    let a = 1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
    let b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
    let delta_sigma = b
        * sin_sigma
        * (cos_2sigma_m
            + b / 4.0
                * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))
                    - b / 6.0
                        * cos_2sigma_m
                        * (-3.0 + 4.0 * sin_sigma.powi(2))
                        * (-3.0 + 4.0 * cos_2sigma_m.powi(2))));

    let distance_m = WGS84_B * a * (sigma - delta_sigma);
    let alpha1 = (cos_u2 * sin_lambda).atan2(cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda);
    let alpha2 = (cos_u1 * sin_lambda).atan2(-sin_u1 * cos_u2 + cos_u1 * sin_u2 * cos_lambda);

    Some(GeodesicLine {
        distance_m,
        initial_azimuth_deg: normalize_azimuth(alpha1.to_degrees()),
        final_azimuth_deg: normalize_azimuth(alpha2.to_degrees()),
    })
}

/// Ellipsoidal distance in meters, falling back to haversine when Vincenty diverges.
pub fn geodesic_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    geodesic_inverse(lat1, lon1, lat2, lon2)
        .map(|line| line.distance_m)
        .unwrap_or_else(|| haversine_distance(lat1, lon1, lat2, lon2))
}

/// Solve the direct geodesic problem.
///
/// Returns `(lat, lon, final_azimuth_deg)` of the point `distance_m` away from
/// the start along `azimuth_deg`.
pub fn geodesic_direct(lat: f64, lon: f64, azimuth_deg: f64, distance_m: f64) -> (f64, f64, f64) {
    if distance_m.abs() <= f64::EPSILON {
        return (lat, lon, normalize_azimuth(azimuth_deg));
    }

    let alpha1 = azimuth_deg.to_radians();
    let (sin_alpha1, cos_alpha1) = alpha1.sin_cos();
    let tan_u1 = (1.0 - WGS84_F) * lat.to_radians().tan();
    let cos_u1 = 1.0 / (1.0 + tan_u1 * tan_u1).sqrt();
    let sin_u1 = tan_u1 * cos_u1;
    let sigma1 = tan_u1.atan2(cos_alpha1);
    let sin_alpha = cos_u1 * sin_alpha1;
    let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
    let u_sq = cos_sq_alpha * (WGS84_A.powi(2) - WGS84_B.powi(2)) / WGS84_B.powi(2);
    let a = 1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
    let b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));

    let mut sigma = distance_m / (WGS84_B * a);

    for _ in 0..VINCENTY_MAX_ITERATIONS {
        let cos_2sigma_m = (2.0 * sigma1 + sigma).cos();
        let (sin_sigma, cos_sigma) = sigma.sin_cos();
        let delta_sigma = b
            * sin_sigma
            * (cos_2sigma_m
                + b / 4.0
                    * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))
                        - b / 6.0
                            * cos_2sigma_m
                            * (-3.0 + 4.0 * sin_sigma.powi(2))
                            * (-3.0 + 4.0 * cos_2sigma_m.powi(2))));
        let previous = sigma;
        sigma = distance_m / (WGS84_B * a) + delta_sigma;
        if (sigma - previous).abs() < VINCENTY_EPSILON {
            break;
        }
    }
    let (sin_sigma, cos_sigma) = sigma.sin_cos();
    let cos_2sigma_m = (2.0 * sigma1 + sigma).cos();

    let tmp = sin_u1 * sin_sigma - cos_u1 * cos_sigma * cos_alpha1;
    let lat2 = (sin_u1 * cos_sigma + cos_u1 * sin_sigma * cos_alpha1)
        .atan2((1.0 - WGS84_F) * (sin_alpha * sin_alpha + tmp * tmp).sqrt());
    let lambda = (sin_sigma * sin_alpha1).atan2(cos_u1 * cos_sigma - sin_u1 * sin_sigma * cos_alpha1);
    let c = WGS84_F / 16.0 * cos_sq_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos_sq_alpha));
    let l = lambda
        - (1.0 - c)
            * WGS84_F
            * sin_alpha
            * (sigma
                + c * sin_sigma
                    * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))));
    let alpha2 = sin_alpha.atan2(-tmp);

    (
        lat2.to_degrees(),
        normalize_lon(lon + l.to_degrees()),
        normalize_azimuth(alpha2.to_degrees()),
    )
}

/// Great-circle distance in meters on a spherical earth.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

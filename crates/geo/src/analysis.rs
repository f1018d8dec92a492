//! Spatial analysis over GeoJSON features.
//!
//! Every function here returns a safe default (0, `None`, or the input
//! feature) instead of an error. These run behind AI-issued directives
//! and a single malformed feature must not take the pipeline down; the
//! swallowed failure is logged at `warn`.

use geo::{
    BoundingRect, Centroid, ChamberlainDuquetteArea, ConvexHull, HaversineDestination,
    HaversineDistance, MultiPoint, Point, Simplify,
};
use geojson::{Feature, Geometry, Value};

use crate::feature::{extract_coordinates, feature_center};
use crate::units::DistanceUnit;

/// Number of ring points generated around each vertex when buffering.
const BUFFER_STEPS: usize = 32;

fn to_geo(feature: &Feature) -> Option<geo::Geometry<f64>> {
    let geometry = feature.geometry.as_ref()?;
    geo::Geometry::<f64>::try_from(geometry.value.clone()).ok()
}

/// Total great-circle distance in kilometers between consecutive feature
/// centers. Requires at least two usable features; otherwise 0.
pub fn calculate_distance(features: &[Feature]) -> f64 {
    let centers: Vec<Point<f64>> = features.iter().filter_map(feature_center).collect();
    if centers.len() < 2 {
        log::warn!(
            "distance needs at least 2 features with geometry, got {}",
            centers.len()
        );
        return 0.0;
    }
    centers
        .windows(2)
        .map(|pair| pair[0].haversine_distance(&pair[1]))
        .sum::<f64>()
        / 1000.0
}

/// Summed spherical area in square kilometers across all polygonal
/// features. Non-areal features contribute 0.
pub fn calculate_area(features: &[Feature]) -> f64 {
    let mut square_meters = 0.0;
    for feature in features {
        match to_geo(feature) {
            Some(geo::Geometry::Polygon(polygon)) => {
                square_meters += polygon.chamberlain_duquette_unsigned_area();
            }
            Some(geo::Geometry::MultiPolygon(multi)) => {
                square_meters += multi.chamberlain_duquette_unsigned_area();
            }
            Some(_) => {}
            None => log::warn!("skipping feature without convertible geometry in area sum"),
        }
    }
    square_meters / 1_000_000.0
}

/// Buffer a feature by `distance` in the given unit, producing a Polygon
/// feature. The buffer is a convex geodesic approximation: a ring of
/// destination points is generated around every vertex and the convex
/// hull of the cloud is taken. On failure the original feature is
/// returned unchanged.
pub fn create_buffer(feature: &Feature, distance: f64, units: DistanceUnit) -> Feature {
    let radius_m = units.as_meters(distance);
    if !radius_m.is_finite() || radius_m <= 0.0 {
        log::warn!("buffer distance {distance} {units} is not usable, returning input");
        return feature.clone();
    }
    let coords = extract_coordinates(feature);
    if coords.is_empty() {
        log::warn!("buffer input has no coordinates, returning input");
        return feature.clone();
    }

    let mut cloud: Vec<Point<f64>> = Vec::with_capacity(coords.len() * BUFFER_STEPS);
    for pos in &coords {
        let origin = Point::new(pos[0], pos[1]);
        for step in 0..BUFFER_STEPS {
            let bearing = step as f64 * (360.0 / BUFFER_STEPS as f64);
            let dest = origin.haversine_destination(bearing, radius_m);
            if !dest.x().is_finite() || !dest.y().is_finite() {
                log::warn!("buffer produced non-finite ring point, returning input");
                return feature.clone();
            }
            cloud.push(dest);
        }
    }

    let hull = MultiPoint::new(cloud).convex_hull();
    if hull.exterior().0.len() < 4 {
        log::warn!("buffer hull is degenerate, returning input");
        return feature.clone();
    }

    Feature {
        bbox: None,
        geometry: Some(Geometry::new(Value::from(&hull))),
        id: None,
        properties: feature.properties.clone(),
        foreign_members: None,
    }
}

/// Reduce vertex count with Ramer-Douglas-Peucker within `tolerance`
/// (degrees). Geometry kinds without a simplification are returned
/// unchanged, as is anything that fails to convert.
pub fn simplify_geometry(feature: &Feature, tolerance: f64) -> Feature {
    if !tolerance.is_finite() || tolerance <= 0.0 {
        log::warn!("simplify tolerance {tolerance} is not usable, returning input");
        return feature.clone();
    }
    let simplified = match to_geo(feature) {
        Some(geo::Geometry::LineString(line)) => Value::from(&line.simplify(&tolerance)),
        Some(geo::Geometry::MultiLineString(lines)) => Value::from(&lines.simplify(&tolerance)),
        Some(geo::Geometry::Polygon(polygon)) => Value::from(&polygon.simplify(&tolerance)),
        Some(geo::Geometry::MultiPolygon(multi)) => Value::from(&multi.simplify(&tolerance)),
        Some(_) => return feature.clone(),
        None => {
            log::warn!("simplify input has no convertible geometry, returning input");
            return feature.clone();
        }
    };
    let mut out = feature.clone();
    out.geometry = Some(Geometry::new(simplified));
    out
}

/// Combined `[min_x, min_y, max_x, max_y]` over all features, or `None`
/// when no feature contributes a position.
pub fn bounding_box(features: &[Feature]) -> Option<[f64; 4]> {
    let mut bbox: Option<[f64; 4]> = None;
    for feature in features {
        for pos in extract_coordinates(feature) {
            bbox = Some(match bbox {
                None => [pos[0], pos[1], pos[0], pos[1]],
                Some([min_x, min_y, max_x, max_y]) => [
                    min_x.min(pos[0]),
                    min_y.min(pos[1]),
                    max_x.max(pos[0]),
                    max_y.max(pos[1]),
                ],
            });
        }
    }
    bbox
}

/// Bounding box of a single geometry via the geometry library, falling
/// back to the coordinate walk for unsupported shapes.
pub fn feature_bounds(feature: &Feature) -> Option<[f64; 4]> {
    if let Some(geometry) = to_geo(feature) {
        if let Some(rect) = geometry.bounding_rect() {
            return Some([rect.min().x, rect.min().y, rect.max().x, rect.max().y]);
        }
    }
    bounding_box(std::slice::from_ref(feature))
}

/// Point feature at the geometric centroid, carrying the input's
/// properties. The original feature comes back when no centroid exists.
pub fn centroid(feature: &Feature) -> Feature {
    let Some(geometry) = to_geo(feature) else {
        log::warn!("centroid input has no convertible geometry, returning input");
        return feature.clone();
    };
    let Some(center) = geometry.centroid() else {
        log::warn!("geometry has no centroid, returning input");
        return feature.clone();
    };
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(Value::Point(vec![center.x(), center.y()]))),
        id: None,
        properties: feature.properties.clone(),
        foreign_members: None,
    }
}

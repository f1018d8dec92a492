use geojson::feature::Id;
use geojson::{Feature, Geometry, JsonObject, Value};
use uuid::Uuid;

/// Assign a fresh UUID string id when the feature has none.
///
/// Returns the id the feature carries afterwards. Feature ids are unique
/// store-wide; callers supplying their own ids are responsible for
/// non-collision.
pub fn ensure_feature_id(feature: &mut Feature) -> String {
    match &feature.id {
        Some(Id::String(s)) => s.clone(),
        Some(Id::Number(n)) => n.to_string(),
        None => {
            let id = Uuid::new_v4().to_string();
            feature.id = Some(Id::String(id.clone()));
            id
        }
    }
}

/// Compare a feature id against the string form used by directives.
///
/// Numeric ids match their decimal rendering, so `remove_feature 42`
/// addresses a feature whose id is the JSON number 42.
pub fn feature_id_matches(feature: &Feature, id: &str) -> bool {
    match &feature.id {
        Some(Id::String(s)) => s == id,
        Some(Id::Number(n)) => n.to_string() == id,
        None => false,
    }
}

/// Build a Point feature at `[lng, lat]` with the given properties.
pub fn new_point_feature(position: [f64; 2], properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(Value::Point(position.to_vec()))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

/// Whether the feature is one of the editable kinds (Point, LineString,
/// Polygon) with structurally valid, finite coordinates.
pub fn is_editable_feature(feature: &Feature) -> bool {
    let Some(geometry) = &feature.geometry else {
        return false;
    };
    match &geometry.value {
        Value::Point(pos) => valid_position(pos),
        Value::LineString(line) => line.len() >= 2 && line.iter().all(|p| valid_position(p)),
        Value::Polygon(rings) => {
            !rings.is_empty()
                && rings
                    .iter()
                    .all(|ring| ring.len() >= 4 && ring.iter().all(|p| valid_position(p)))
        }
        _ => false,
    }
}

fn valid_position(pos: &[f64]) -> bool {
    pos.len() >= 2 && pos[0].is_finite() && pos[1].is_finite()
}

/// Flatten every position of the feature's geometry into `[lng, lat]`
/// pairs, in coordinate order.
pub fn extract_coordinates(feature: &Feature) -> Vec<[f64; 2]> {
    let mut out = Vec::new();
    if let Some(geometry) = &feature.geometry {
        collect_positions(&geometry.value, &mut out);
    }
    out
}

fn collect_positions(value: &Value, out: &mut Vec<[f64; 2]>) {
    match value {
        Value::Point(pos) => push_position(pos, out),
        Value::MultiPoint(positions) | Value::LineString(positions) => {
            for pos in positions {
                push_position(pos, out);
            }
        }
        Value::MultiLineString(lines) | Value::Polygon(lines) => {
            for line in lines {
                for pos in line {
                    push_position(pos, out);
                }
            }
        }
        Value::MultiPolygon(polygons) => {
            for rings in polygons {
                for ring in rings {
                    for pos in ring {
                        push_position(pos, out);
                    }
                }
            }
        }
        Value::GeometryCollection(geometries) => {
            for geometry in geometries {
                collect_positions(&geometry.value, out);
            }
        }
    }
}

fn push_position(pos: &[f64], out: &mut Vec<[f64; 2]>) {
    if pos.len() >= 2 {
        out.push([pos[0], pos[1]]);
    }
}

/// Rebuild the feature with the same geometry shape but replacement
/// coordinates, consumed in the order `extract_coordinates` produced
/// them. Returns `None` when the replacement count does not match the
/// geometry's position count.
pub fn replace_coordinates(feature: &Feature, coords: &[[f64; 2]]) -> Option<Feature> {
    let geometry = feature.geometry.as_ref()?;
    let mut cursor = 0usize;
    let value = rebuild_value(&geometry.value, coords, &mut cursor)?;
    if cursor != coords.len() {
        return None;
    }
    let mut rebuilt = feature.clone();
    rebuilt.geometry = Some(Geometry::new(value));
    Some(rebuilt)
}

fn rebuild_value(value: &Value, coords: &[[f64; 2]], cursor: &mut usize) -> Option<Value> {
    match value {
        Value::Point(_) => Some(Value::Point(take_position(coords, cursor)?)),
        Value::MultiPoint(positions) => {
            Some(Value::MultiPoint(take_positions(positions.len(), coords, cursor)?))
        }
        Value::LineString(positions) => {
            Some(Value::LineString(take_positions(positions.len(), coords, cursor)?))
        }
        Value::MultiLineString(lines) => {
            let mut out = Vec::with_capacity(lines.len());
            for line in lines {
                out.push(take_positions(line.len(), coords, cursor)?);
            }
            Some(Value::MultiLineString(out))
        }
        Value::Polygon(rings) => {
            let mut out = Vec::with_capacity(rings.len());
            for ring in rings {
                out.push(take_positions(ring.len(), coords, cursor)?);
            }
            Some(Value::Polygon(out))
        }
        Value::MultiPolygon(polygons) => {
            let mut out = Vec::with_capacity(polygons.len());
            for rings in polygons {
                let mut rebuilt = Vec::with_capacity(rings.len());
                for ring in rings {
                    rebuilt.push(take_positions(ring.len(), coords, cursor)?);
                }
                out.push(rebuilt);
            }
            Some(Value::MultiPolygon(out))
        }
        Value::GeometryCollection(geometries) => {
            let mut out = Vec::with_capacity(geometries.len());
            for geometry in geometries {
                out.push(Geometry::new(rebuild_value(&geometry.value, coords, cursor)?));
            }
            Some(Value::GeometryCollection(out))
        }
    }
}

fn take_position(coords: &[[f64; 2]], cursor: &mut usize) -> Option<Vec<f64>> {
    let pos = coords.get(*cursor)?;
    *cursor += 1;
    Some(vec![pos[0], pos[1]])
}

fn take_positions(
    count: usize,
    coords: &[[f64; 2]],
    cursor: &mut usize,
) -> Option<Vec<Vec<f64>>> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(take_position(coords, cursor)?);
    }
    Some(out)
}

/// Representative point of a feature: the mean of its coordinate set,
/// as `(lng, lat)`. `None` when the geometry has no positions.
pub fn feature_center(feature: &Feature) -> Option<geo::Point<f64>> {
    let coords = extract_coordinates(feature);
    if coords.is_empty() {
        return None;
    }
    let n = coords.len() as f64;
    let (sum_x, sum_y) = coords
        .iter()
        .fold((0.0, 0.0), |(x, y), pos| (x + pos[0], y + pos[1]));
    let center = geo::Point::new(sum_x / n, sum_y / n);
    (center.x().is_finite() && center.y().is_finite()).then_some(center)
}

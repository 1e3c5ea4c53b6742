use std::fmt;
use std::str::FromStr;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{SqliteConnection, SqlitePool};

use super::legal::parse_legal_description;
use super::subdivide::{subdivide_with, Point, SubdivisionMode};
use super::GeoError;
use crate::db::run_in_tx;
use crate::entity::{repo::row_exists, schema};
use crate::model::GEO_NOT_FOUND;
use crate::op_log::LogScope;
use crate::time::now_ms;
use crate::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureType {
    Point,
    LineString,
    Polygon,
}

impl FeatureType {
    pub fn as_str(self) -> &'static str {
        match self {
            FeatureType::Point => "Point",
            FeatureType::LineString => "LineString",
            FeatureType::Polygon => "Polygon",
        }
    }

    /// The richest geometry a vertex list of this length can form.
    pub fn for_vertex_count(count: usize) -> Self {
        match count {
            0 | 1 => FeatureType::Point,
            2 => FeatureType::LineString,
            _ => FeatureType::Polygon,
        }
    }

    fn min_vertices(self) -> usize {
        match self {
            FeatureType::Point => 1,
            FeatureType::LineString => 2,
            FeatureType::Polygon => 3,
        }
    }
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureType {
    type Err = GeoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Point" => Ok(FeatureType::Point),
            "LineString" => Ok(FeatureType::LineString),
            "Polygon" => Ok(FeatureType::Polygon),
            other => Err(GeoError::Parse(format!("unknown feature type {other:?}"))),
        }
    }
}

/// Owner of a stored boundary: a record by table and id, or a legal description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkTarget {
    Record { record_type: String, record_id: i64 },
    LegalDescription(i64),
}

impl LinkTarget {
    fn record_type(&self) -> &str {
        match self {
            LinkTarget::Record { record_type, .. } => record_type,
            LinkTarget::LegalDescription(_) => "legal_descriptions",
        }
    }

    fn ids(&self) -> (Option<i64>, Option<i64>) {
        match self {
            LinkTarget::Record { record_id, .. } => (Some(*record_id), None),
            LinkTarget::LegalDescription(id) => (None, Some(*id)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBoundary {
    pub feature_type: FeatureType,
    pub coordinates: Vec<Point>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Boundary {
    pub id: i64,
    pub feature_type: FeatureType,
    pub coordinates: Vec<Point>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoredBoundary {
    pub id: i64,
    pub reused: bool,
}

pub(crate) fn encode_coordinates(points: &[Point]) -> String {
    let pairs: Vec<[f64; 2]> = points.iter().map(|p| [p.x, p.y]).collect();
    json!(pairs).to_string()
}

pub(crate) fn decode_coordinates(raw: &str) -> Result<Vec<Point>, GeoError> {
    let pairs: Vec<Vec<f64>> = serde_json::from_str(raw)
        .map_err(|e| GeoError::BadCoordinates(format!("stored coordinates: {e}")))?;
    pairs
        .into_iter()
        .map(|pair| match pair.as_slice() {
            [x, y, ..] => Ok(Point::new(*x, *y)),
            _ => Err(GeoError::BadCoordinates(
                "stored coordinate needs two values".into(),
            )),
        })
        .collect()
}

fn validate(boundary: &NewBoundary) -> Result<(), GeoError> {
    if boundary.coordinates.is_empty() {
        return Err(GeoError::EmptyParent);
    }
    if let Some(p) = boundary
        .coordinates
        .iter()
        .find(|p| !p.x.is_finite() || !p.y.is_finite())
    {
        return Err(GeoError::BadCoordinates(format!("({}, {})", p.x, p.y)));
    }
    if boundary.coordinates.len() < boundary.feature_type.min_vertices() {
        return Err(GeoError::BadCoordinates(format!(
            "{} needs at least {} vertices",
            boundary.feature_type,
            boundary.feature_type.min_vertices()
        )));
    }
    Ok(())
}

async fn require_target(conn: &mut SqliteConnection, target: &LinkTarget) -> AppResult<()> {
    let (table, id) = match target {
        LinkTarget::Record {
            record_type,
            record_id,
        } => (schema(record_type)?.table, *record_id),
        LinkTarget::LegalDescription(id) => ("legal_descriptions", *id),
    };
    if row_exists(conn, table, id).await? {
        Ok(())
    } else {
        Err(AppError::new(GEO_NOT_FOUND, "The record to attach the boundary to does not exist.")
            .with_context("table", table)
            .with_context("id", id.to_string()))
    }
}

async fn store_boundary_in(
    conn: &mut SqliteConnection,
    boundary: &NewBoundary,
    target: &LinkTarget,
) -> AppResult<StoredBoundary> {
    validate(boundary)?;
    require_target(conn, target).await?;
    let coordinates = encode_coordinates(&boundary.coordinates);
    let (record_id, legal_id) = target.ids();

    let existing: Option<i64> = sqlx::query_scalar(
        "SELECT d.id FROM geojson_data d \
         JOIN geojson_links l ON l.geojson_id = d.id \
         WHERE d.feature_type = ?1 AND d.coordinates = ?2 AND l.record_type = ?3 \
           AND l.record_id IS ?4 AND l.legal_description_id IS ?5 \
         ORDER BY d.id LIMIT 1",
    )
    .bind(boundary.feature_type.as_str())
    .bind(&coordinates)
    .bind(target.record_type())
    .bind(record_id)
    .bind(legal_id)
    .fetch_optional(&mut *conn)
    .await?;
    if let Some(id) = existing {
        return Ok(StoredBoundary { id, reused: true });
    }

    let id = sqlx::query(
        "INSERT INTO geojson_data (feature_type, coordinates, description, created_at) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(boundary.feature_type.as_str())
    .bind(&coordinates)
    .bind(&boundary.description)
    .bind(now_ms())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    sqlx::query(
        "INSERT INTO geojson_links (geojson_id, record_type, record_id, legal_description_id) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(id)
    .bind(target.record_type())
    .bind(record_id)
    .bind(legal_id)
    .execute(&mut *conn)
    .await?;
    Ok(StoredBoundary { id, reused: false })
}

/// Stores a boundary and links it to `target`. An identical geometry already
/// linked to the same owner is returned instead of inserting a duplicate.
pub async fn store_boundary(
    pool: &SqlitePool,
    boundary: NewBoundary,
    target: LinkTarget,
) -> AppResult<StoredBoundary> {
    validate(&boundary)?;
    let scope = LogScope::new("geo", "store_boundary", None, None);

    let result = run_in_tx(pool, move |tx| {
        async move { store_boundary_in(&mut **tx, &boundary, &target).await }.boxed()
    })
    .await;

    match &result {
        Ok(stored) => scope.success(json!({ "id": stored.id, "reused": stored.reused })),
        Err(err) => scope.fail(err),
    }
    result
}

fn boundary_from_row(
    (id, feature_type, coordinates, description): (i64, String, String, Option<String>),
) -> AppResult<Boundary> {
    Ok(Boundary {
        id,
        feature_type: feature_type.parse()?,
        coordinates: decode_coordinates(&coordinates)?,
        description,
    })
}

pub async fn get_boundary(pool: &SqlitePool, id: i64) -> AppResult<Option<Boundary>> {
    let row: Option<(i64, String, String, Option<String>)> = sqlx::query_as(
        "SELECT id, feature_type, coordinates, description FROM geojson_data WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.map(boundary_from_row).transpose()
}

pub async fn boundaries_for(pool: &SqlitePool, target: &LinkTarget) -> AppResult<Vec<Boundary>> {
    let (record_id, legal_id) = target.ids();
    let rows: Vec<(i64, String, String, Option<String>)> = sqlx::query_as(
        "SELECT DISTINCT d.id, d.feature_type, d.coordinates, d.description \
         FROM geojson_data d JOIN geojson_links l ON l.geojson_id = d.id \
         WHERE l.record_type = ?1 AND l.record_id IS ?2 AND l.legal_description_id IS ?3 \
         ORDER BY d.id",
    )
    .bind(target.record_type())
    .bind(record_id)
    .bind(legal_id)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(boundary_from_row).collect()
}

/// Renders a stored boundary as a GeoJSON `Feature`. Polygon rings are closed.
pub fn feature_json(boundary: &Boundary) -> Value {
    let pairs: Vec<Value> = boundary
        .coordinates
        .iter()
        .map(|p| json!([p.x, p.y]))
        .collect();
    let coordinates = match boundary.feature_type {
        FeatureType::Point => pairs.first().cloned().unwrap_or(Value::Null),
        FeatureType::LineString => Value::Array(pairs),
        FeatureType::Polygon => {
            let mut ring = pairs;
            if let (Some(first), Some(last)) = (ring.first().cloned(), ring.last()) {
                if &first != last {
                    ring.push(first);
                }
            }
            json!([ring])
        }
    };
    json!({
        "type": "Feature",
        "id": boundary.id,
        "geometry": {
            "type": boundary.feature_type.as_str(),
            "coordinates": coordinates,
        },
        "properties": {
            "description": boundary.description,
        },
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubdividedBoundary {
    pub legal_description_id: i64,
    pub stored: StoredBoundary,
    pub feature_type: FeatureType,
    pub coordinates: Vec<Point>,
}

/// Parses a stored legal description, subdivides the section boundary it
/// names, and stores the result linked to the description.
pub async fn subdivide_legal_description(
    pool: &SqlitePool,
    legal_description_id: i64,
    section_geojson_id: i64,
    mode: SubdivisionMode,
) -> AppResult<SubdividedBoundary> {
    let text: Option<String> =
        sqlx::query_scalar("SELECT description FROM legal_descriptions WHERE id = ?")
            .bind(legal_description_id)
            .fetch_optional(pool)
            .await?;
    let text = text.ok_or_else(|| {
        AppError::new(GEO_NOT_FOUND, "Legal description not found.")
            .with_context("legal_description_id", legal_description_id.to_string())
    })?;
    let section = get_boundary(pool, section_geojson_id).await?.ok_or_else(|| {
        AppError::new(GEO_NOT_FOUND, "Section boundary not found.")
            .with_context("geojson_id", section_geojson_id.to_string())
    })?;

    let parsed = parse_legal_description(&text)?;
    let subdivision = parsed.subdivision()?;
    let coordinates = subdivide_with(&section.coordinates, &subdivision, mode)?;
    if coordinates.is_empty() {
        return Err(GeoError::EmptyParent.into());
    }
    let feature_type = FeatureType::for_vertex_count(coordinates.len());
    let boundary = NewBoundary {
        feature_type,
        coordinates: coordinates.clone(),
        description: Some(text),
    };
    let scope = LogScope::new("geo", "subdivide_legal_description", None, None);

    let result = run_in_tx(pool, move |tx| {
        async move {
            sqlx::query(
                "UPDATE legal_descriptions SET section = COALESCE(section, ?), \
                 township = COALESCE(township, ?), range_code = COALESCE(range_code, ?) WHERE id = ?",
            )
            .bind(parsed.section.map(i64::from))
            .bind(&parsed.township)
            .bind(&parsed.range)
            .bind(legal_description_id)
            .execute(&mut **tx)
            .await?;
            store_boundary_in(
                &mut **tx,
                &boundary,
                &LinkTarget::LegalDescription(legal_description_id),
            )
            .await
        }
        .boxed()
    })
    .await;
    let stored = match result {
        Ok(stored) => stored,
        Err(err) => {
            scope.fail(&err);
            return Err(err);
        }
    };
    scope.success(json!({ "id": stored.id, "reused": stored.reused }));

    tracing::info!(
        target: "kinledger",
        event = "legal_description_subdivided",
        legal_description_id,
        geojson_id = stored.id,
        vertices = coordinates.len(),
        reused = stored.reused
    );

    Ok(SubdividedBoundary {
        legal_description_id,
        stored,
        feature_type,
        coordinates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_survive_storage_encoding() {
        let pts = vec![Point::new(-89.5, 40.25), Point::new(-89.0, 40.5)];
        let raw = encode_coordinates(&pts);
        assert_eq!(raw, "[[-89.5,40.25],[-89.0,40.5]]");
        assert_eq!(decode_coordinates(&raw).unwrap(), pts);
        assert!(decode_coordinates("[[1.0]]").is_err());
    }

    #[test]
    fn polygon_features_close_their_ring() {
        let b = Boundary {
            id: 5,
            feature_type: FeatureType::Polygon,
            coordinates: vec![
                Point::new(0.0, 0.0),
                Point::new(0.0, 1.0),
                Point::new(1.0, 1.0),
            ],
            description: Some("NE 1/4".into()),
        };
        let feature = feature_json(&b);
        assert_eq!(feature["type"], "Feature");
        assert_eq!(feature["geometry"]["type"], "Polygon");
        let ring = feature["geometry"]["coordinates"][0].as_array().unwrap();
        assert_eq!(ring.len(), 4);
        assert_eq!(ring[0], ring[3]);
    }

    #[test]
    fn feature_type_follows_vertex_count() {
        assert_eq!(FeatureType::for_vertex_count(1), FeatureType::Point);
        assert_eq!(FeatureType::for_vertex_count(2), FeatureType::LineString);
        assert_eq!(FeatureType::for_vertex_count(4), FeatureType::Polygon);
    }
}

//! Land records: legal-description parsing, approximate aliquot subdivision,
//! stored GeoJSON boundaries and map links.

pub mod boundary;
pub mod legal;
pub mod links;
pub mod subdivide;

use thiserror::Error;

use crate::model::{GEO_BAD_COORDINATES, GEO_EMPTY_PARENT, GEO_PARSE};
use crate::AppError;

pub use boundary::{
    boundaries_for, feature_json, get_boundary, store_boundary, subdivide_legal_description,
    Boundary, FeatureType, LinkTarget, NewBoundary, StoredBoundary, SubdividedBoundary,
};
pub use legal::{parse_legal_description, LegalDescription};
pub use links::{google_maps_link, tile_for, tile_url, Tile};
pub use subdivide::{
    subdivide, subdivide_steps, subdivide_with, Aliquot, Half, Point, Quarter, Subdivision,
    SubdivisionMode,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeoError {
    #[error("could not parse legal description: {0}")]
    Parse(String),
    #[error("parent boundary has no vertices")]
    EmptyParent,
    #[error("invalid coordinates: {0}")]
    BadCoordinates(String),
}

impl From<GeoError> for AppError {
    fn from(err: GeoError) -> Self {
        let code = match &err {
            GeoError::Parse(_) => GEO_PARSE,
            GeoError::EmptyParent => GEO_EMPTY_PARENT,
            GeoError::BadCoordinates(_) => GEO_BAD_COORDINATES,
        };
        AppError::new(code, err.to_string())
    }
}

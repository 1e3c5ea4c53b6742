use std::f64::consts::PI;

use serde::Serialize;

use super::GeoError;

pub const OSM_TILE_BASE: &str = "https://tile.openstreetmap.org";
pub const MAX_ZOOM: u8 = 19;
/// Latitude limit of the Web Mercator projection.
const MAX_LAT: f64 = 85.051_128_78;

fn check(lat: f64, lon: f64) -> Result<(), GeoError> {
    if !lat.is_finite() || !lon.is_finite() || lat.abs() > 90.0 || lon.abs() > 180.0 {
        return Err(GeoError::BadCoordinates(format!("({lat}, {lon})")));
    }
    Ok(())
}

pub fn google_maps_link(lat: f64, lon: f64) -> Result<String, GeoError> {
    check(lat, lon)?;
    Ok(format!(
        "https://www.google.com/maps/search/?api=1&query={lat:.6},{lon:.6}"
    ))
}

/// A slippy-map tile index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Tile {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

pub fn tile_for(lat: f64, lon: f64, zoom: u8) -> Result<Tile, GeoError> {
    check(lat, lon)?;
    if zoom > MAX_ZOOM {
        return Err(GeoError::BadCoordinates(format!(
            "zoom {zoom} is above {MAX_ZOOM}"
        )));
    }
    let n = f64::from(1u32 << zoom);
    let lat_rad = lat.clamp(-MAX_LAT, MAX_LAT).to_radians();
    let x = ((lon + 180.0) / 360.0 * n).floor();
    let y = ((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n).floor();
    let max = n - 1.0;
    Ok(Tile {
        z: zoom,
        x: x.clamp(0.0, max) as u32,
        y: y.clamp(0.0, max) as u32,
    })
}

pub fn tile_url(tile: Tile) -> String {
    format!("{OSM_TILE_BASE}/{}/{}/{}.png", tile.z, tile.x, tile.y)
}

//! Common utilities and data structures shared by the navigation mesh crates

mod geometry;
mod math;

pub use geometry::*;
pub use math::*;

/// Represents a 3D position
pub type Vec3 = glam::Vec3;

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("invalid tile data: {0}")]
    InvalidTileData(String),

    #[error("tile slot ({x}, {y}, layer {layer}) is already occupied")]
    TileOccupied { x: i32, y: i32, layer: i32 },

    #[error("tile not found: {0}")]
    TileNotFound(String),

    #[error("navigation mesh has no free tile slots (max {0})")]
    OutOfTiles(usize),

    #[error("query failed: {0}")]
    Query(String),

    #[cfg(feature = "std")]
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "serde_json")]
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for mesh construction and tooling operations
pub type Result<T> = std::result::Result<T, Error>;

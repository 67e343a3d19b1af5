//! Tiled navigation mesh and pathfinding queries
//!
//! A [`NavMesh`] holds tiles of convex polygons linked through shared edges.
//! [`NavMeshQuery`] searches that mesh: A* corridors (complete or sliced),
//! string-pulled straight paths, raycasts, Dijkstra area expansions, wall
//! distance, local neighbourhoods, surface movement and random sampling.
//!
//! Queries report through [`Status`] bit flags. Hard failures come back as
//! `Err(Status)`; results that finished with extra detail (partial path,
//! truncated output, exhausted node pool) come back as [`Outcome`].

mod local_queries;
mod nav_mesh;
mod nav_mesh_builder;
mod nav_mesh_query;
mod node_pool;
mod poly_query;
mod query_filter;
mod random_point;
mod raycast;
mod search_queries;
mod sliced_pathfinding;
mod status;
mod straight_path;

#[cfg(test)]
mod test_mesh_helpers;

#[cfg(test)]
mod local_query_tests;
#[cfg(test)]
mod random_point_tests;
#[cfg(test)]
mod search_query_tests;

pub use local_queries::SurfaceMove;
pub use nav_mesh::{
    BVNode, Link, MeshTile, NavMesh, NavMeshParams, OffMeshConnection, Poly, PolyDetail,
    TileHeader,
};
pub use nav_mesh_builder::{NavMeshBuilder, NavMeshCreateParams, OffMeshConnectionParams};
pub use nav_mesh_query::{NavMeshQuery, NearestPoly, PortalPoints};
pub use node_pool::{Node, NodeFlags, NodePool, NodeQueue, MAX_STATES_PER_NODE};
pub use poly_query::{CollectPolysQuery, FindNearestPolyQuery, PolyQuery};
pub use query_filter::{DefaultQueryFilter, PolyView, QueryFilter};
pub use random_point::RandomPoint;
pub use raycast::RaycastHit;
pub use search_queries::WallHit;
pub use status::{Outcome, QueryResult, Status};
pub use straight_path::StraightPathPoint;

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

/// Maximum number of vertices per navigation polygon.
pub const VERTS_PER_POLYGON: usize = 6;

/// Maximum number of area classes a filter can price.
pub const MAX_AREAS: usize = 64;

/// Neighbour bit marking a polygon edge that continues in another tile.
pub const EXT_LINK: u16 = 0x8000;

/// Link side value for links that stay inside a tile.
pub const LINK_INTERNAL: u8 = 0xff;

/// Detail triangle edge flag: the edge lies on the polygon boundary.
pub const DETAIL_EDGE_BOUNDARY: u8 = 0x01;

/// Off-mesh connection flag: the connection can be traversed both ways.
pub const OFFMESH_CON_BIDIR: u8 = 1;

/// Returns the edge flags of edge `edge_index` packed in a detail triangle.
#[inline]
pub fn detail_tri_edge_flags(tri_flags: u8, edge_index: usize) -> u8 {
    (tri_flags >> (edge_index * 2)) & 0x3
}

/// Reference to a polygon in a navigation mesh
///
/// Packs the tile salt, tile slot and polygon index. Zero is the null
/// reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct PolyRef(u32);

impl PolyRef {
    /// The null reference.
    pub const NULL: PolyRef = PolyRef(0);

    /// Creates a reference from its raw value.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    pub const fn id(&self) -> u32 {
        self.0
    }

    /// True for any non-null reference. This does not check it against a mesh.
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for PolyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

bitflags::bitflags! {
    /// User flags stored per polygon and matched by query filters
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
    pub struct PolyFlags: u16 {
        /// Ground walkable by agents
        const WALK = 0x01;
        /// Water
        const SWIM = 0x02;
        /// Door
        const DOOR = 0x04;
        /// Jump link
        const JUMP = 0x08;
        /// Disabled polygon
        const DISABLED = 0x10;
    }
}

/// Kind of navigation polygon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub enum PolyType {
    /// Convex polygon on the walkable surface
    #[default]
    Ground,
    /// Two-vertex polygon standing for an off-mesh connection
    OffMeshConnection,
}

bitflags::bitflags! {
    /// Flags attached to straight path vertices
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StraightPathFlags: u8 {
        /// The vertex is the start position
        const START = 0x01;
        /// The vertex is the end position
        const END = 0x02;
        /// The vertex is the start of an off-mesh connection
        const OFFMESH_CONNECTION = 0x04;
    }
}

bitflags::bitflags! {
    /// Options for [`NavMeshQuery::find_straight_path`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StraightPathOptions: u8 {
        /// Add a vertex at every polygon edge crossing where the area changes
        const AREA_CROSSINGS = 0x01;
        /// Add a vertex at every polygon edge crossing
        const ALL_CROSSINGS = 0x02;
    }
}

bitflags::bitflags! {
    /// Options for sliced path searches
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FindPathOptions: u8 {
        /// Use raycasts during the search to shortcut corridor corners
        const ANY_ANGLE = 0x02;
    }
}

bitflags::bitflags! {
    /// Options for [`NavMeshQuery::raycast`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RaycastOptions: u8 {
        /// Accumulate the filter cost along the ray
        const USE_COSTS = 0x01;
    }
}

//! Navigation mesh builder for creating tile data
//!
//! Converts a polygon mesh in the usual build layout (vertex indices followed
//! by neighbour codes per polygon) into a [`MeshTile`] ready to be added to a
//! [`NavMesh`](crate::NavMesh): neighbour codes become link hints, detail
//! meshes are re-indexed, off-mesh connections get their own two-vertex
//! polygons and an optional BV tree is built over the ground polygons.

use crate::{
    BVNode, MeshTile, OffMeshConnection, Poly, PolyDetail, PolyFlags, PolyType, TileHeader,
    EXT_LINK, LINK_INTERNAL, OFFMESH_CON_BIDIR, VERTS_PER_POLYGON,
};
use navmesh_common::{bounds_of, vmax, vmin, Error, Result};

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

/// Marks an unused vertex slot or a border edge in the build layout.
pub const MESH_NULL_IDX: u16 = 0xffff;

/// Off-mesh connection input
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct OffMeshConnectionParams {
    /// Start position
    pub start: [f32; 3],
    /// End position
    pub end: [f32; 3],
    /// Snap radius at both ends
    pub radius: f32,
    /// Polygon flags of the connection
    pub flags: PolyFlags,
    /// Area class of the connection
    pub area: u8,
    /// Whether the connection can be taken from the end back to the start
    pub bidirectional: bool,
    /// User id
    pub user_id: u32,
}

/// Parameters for building a navigation mesh tile
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct NavMeshCreateParams {
    /// Polygon mesh vertices in world space
    pub verts: Vec<[f32; 3]>,
    /// Per polygon: `nvp` vertex indices then `nvp` neighbour codes.
    /// Unused vertex slots hold [`MESH_NULL_IDX`]. A neighbour code is a
    /// polygon index, `0x8000 | dir` for a tile border portal
    /// (dir 0 = x-, 1 = z+, 2 = x+, 3 = z-) or `0xffff` for a wall.
    pub polys: Vec<u16>,
    /// Flags per polygon
    pub poly_flags: Vec<PolyFlags>,
    /// Area per polygon
    pub poly_areas: Vec<u8>,
    /// Maximum vertices per polygon in `polys`
    pub nvp: usize,

    /// Detail sub-meshes: vertex base, vertex count, triangle base,
    /// triangle count. Vertex ranges repeat the polygon's own vertices
    /// first. Empty to derive a triangle fan per polygon.
    pub detail_meshes: Vec<[u32; 4]>,
    /// Detail vertices
    pub detail_verts: Vec<[f32; 3]>,
    /// Detail triangles: local vertex indices and packed edge flags
    pub detail_tris: Vec<[u8; 4]>,

    /// Off-mesh connections
    pub off_mesh_connections: Vec<OffMeshConnectionParams>,

    /// Tile grid x
    pub tile_x: i32,
    /// Tile grid y
    pub tile_y: i32,
    /// Tile layer
    pub tile_layer: i32,
    /// User id stored in the tile header
    pub user_id: u32,

    /// Tile bounds
    pub bmin: [f32; 3],
    /// Tile bounds
    pub bmax: [f32; 3],

    /// Agent height
    pub walkable_height: f32,
    /// Agent radius
    pub walkable_radius: f32,
    /// Agent climb
    pub walkable_climb: f32,
    /// Cell size, sets the BV tree quantization
    pub cs: f32,
    /// Cell height
    pub ch: f32,
    /// Build a BV tree for the tile
    pub build_bv_tree: bool,
}

impl Default for NavMeshCreateParams {
    fn default() -> Self {
        Self {
            verts: Vec::new(),
            polys: Vec::new(),
            poly_flags: Vec::new(),
            poly_areas: Vec::new(),
            nvp: VERTS_PER_POLYGON,
            detail_meshes: Vec::new(),
            detail_verts: Vec::new(),
            detail_tris: Vec::new(),
            off_mesh_connections: Vec::new(),
            tile_x: 0,
            tile_y: 0,
            tile_layer: 0,
            user_id: 0,
            bmin: [0.0; 3],
            bmax: [0.0; 3],
            walkable_height: 2.0,
            walkable_radius: 0.6,
            walkable_climb: 0.9,
            cs: 0.3,
            ch: 0.2,
            build_bv_tree: true,
        }
    }
}

impl NavMeshCreateParams {
    fn poly_count(&self) -> usize {
        self.polys.len() / (self.nvp * 2)
    }
}

/// Builder for creating navigation mesh tiles from polygon mesh data
pub struct NavMeshBuilder;

#[derive(Clone, Copy)]
struct BVItem {
    bmin: [u16; 3],
    bmax: [u16; 3],
    i: i32,
}

impl NavMeshBuilder {
    /// Creates a navigation mesh tile from NavMeshCreateParams
    pub fn build_tile(params: &NavMeshCreateParams) -> Result<MeshTile> {
        Self::validate_params(params)?;

        let poly_count = params.poly_count();
        let bounds = Self::height_bounds(params);

        // Off-mesh connections are stored in the tile holding their start.
        let mut stored_cons = Vec::new();
        for con in &params.off_mesh_connections {
            let start_class = Self::classify_off_mesh_point(&con.start, &bounds.0, &bounds.1);
            let inside = start_class == LINK_INTERNAL
                && con.start[1] >= bounds.0[1]
                && con.start[1] <= bounds.1[1];
            if inside {
                let end_class = Self::classify_off_mesh_point(&con.end, &bounds.0, &bounds.1);
                stored_cons.push((con, end_class));
            }
        }

        let total_verts = params.verts.len() + stored_cons.len() * 2;
        if total_verts > MESH_NULL_IDX as usize {
            return Err(Error::InvalidTileData(format!(
                "tile needs {total_verts} vertices, at most {} fit",
                MESH_NULL_IDX
            )));
        }

        let mut tile = MeshTile::default();
        tile.header = Some(TileHeader {
            x: params.tile_x,
            y: params.tile_y,
            layer: params.tile_layer,
            user_id: params.user_id,
            poly_count: poly_count + stored_cons.len(),
            vert_count: total_verts,
            off_mesh_base: poly_count,
            walkable_height: params.walkable_height,
            walkable_radius: params.walkable_radius,
            walkable_climb: params.walkable_climb,
            bmin: params.bmin,
            bmax: params.bmax,
            bv_quant_factor: 1.0 / params.cs,
        });

        tile.verts = params.verts.clone();
        tile.polys = Self::build_polygons(params)?;

        let off_mesh_vert_base = params.verts.len();
        for (n, (con, end_class)) in stored_cons.iter().enumerate() {
            tile.verts.push(con.start);
            tile.verts.push(con.end);

            let mut poly = Poly::new(con.area, PolyType::OffMeshConnection, con.flags);
            poly.verts[0] = (off_mesh_vert_base + n * 2) as u16;
            poly.verts[1] = (off_mesh_vert_base + n * 2 + 1) as u16;
            poly.vert_count = 2;
            tile.polys.push(poly);

            tile.off_mesh_cons.push(OffMeshConnection {
                start: con.start,
                end: con.end,
                radius: con.radius,
                poly: (poly_count + n) as u16,
                flags: if con.bidirectional { OFFMESH_CON_BIDIR } else { 0 },
                side: *end_class,
                user_id: con.user_id,
            });
        }

        if params.detail_meshes.is_empty() {
            Self::build_fan_detail(&mut tile, poly_count);
        } else {
            Self::build_detail_meshes(&mut tile, params)?;
        }

        if params.build_bv_tree {
            tile.bv_tree = Self::build_bv_tree(&tile, params, poly_count);
        }

        log::debug!(
            "Built tile ({}, {}) with {} polygons, {} off-mesh connections, {} BV nodes",
            params.tile_x,
            params.tile_y,
            poly_count,
            stored_cons.len(),
            tile.bv_tree.len()
        );

        Ok(tile)
    }

    /// Validates input parameters
    fn validate_params(params: &NavMeshCreateParams) -> Result<()> {
        if params.nvp < 3 || params.nvp > VERTS_PER_POLYGON {
            return Err(Error::InvalidParam(format!(
                "nvp must be in 3..={VERTS_PER_POLYGON}, got {}",
                params.nvp
            )));
        }
        if params.verts.len() < 3 {
            return Err(Error::InvalidParam("need at least three vertices".into()));
        }
        if params.polys.is_empty() || params.polys.len() % (params.nvp * 2) != 0 {
            return Err(Error::InvalidParam(format!(
                "polygon data length {} is not a multiple of {}",
                params.polys.len(),
                params.nvp * 2
            )));
        }
        let poly_count = params.poly_count();
        if params.poly_flags.len() != poly_count || params.poly_areas.len() != poly_count {
            return Err(Error::InvalidParam(format!(
                "expected {poly_count} polygon flags and areas"
            )));
        }
        if !params.detail_meshes.is_empty() && params.detail_meshes.len() != poly_count {
            return Err(Error::InvalidParam(format!(
                "expected {poly_count} detail meshes, got {}",
                params.detail_meshes.len()
            )));
        }
        if !(params.cs > 0.0) {
            return Err(Error::InvalidParam("cell size must be positive".into()));
        }
        Ok(())
    }

    /// Tile bounds with the height range taken from the geometry.
    fn height_bounds(params: &NavMeshCreateParams) -> ([f32; 3], [f32; 3]) {
        let points = if params.detail_verts.is_empty() {
            &params.verts
        } else {
            &params.detail_verts
        };
        let (hmin, hmax) = bounds_of(points);
        let mut bmin = params.bmin;
        let mut bmax = params.bmax;
        bmin[1] = hmin[1] - params.walkable_climb;
        bmax[1] = hmax[1] + params.walkable_climb;
        (bmin, bmax)
    }

    /// Tile side a point lies on, [`LINK_INTERNAL`] when inside.
    fn classify_off_mesh_point(pt: &[f32; 3], bmin: &[f32; 3], bmax: &[f32; 3]) -> u8 {
        const XP: u8 = 1 << 0;
        const ZP: u8 = 1 << 1;
        const XM: u8 = 1 << 2;
        const ZM: u8 = 1 << 3;

        let mut outcode = 0;
        if pt[0] >= bmax[0] {
            outcode |= XP;
        }
        if pt[2] >= bmax[2] {
            outcode |= ZP;
        }
        if pt[0] < bmin[0] {
            outcode |= XM;
        }
        if pt[2] < bmin[2] {
            outcode |= ZM;
        }

        match outcode {
            XP => 0,
            o if o == XP | ZP => 1,
            ZP => 2,
            o if o == XM | ZP => 3,
            XM => 4,
            o if o == XM | ZM => 5,
            ZM => 6,
            o if o == XP | ZM => 7,
            _ => LINK_INTERNAL,
        }
    }

    /// Builds polygon structures from raw data
    fn build_polygons(params: &NavMeshCreateParams) -> Result<Vec<Poly>> {
        let nvp = params.nvp;
        let poly_count = params.poly_count();
        let mut polys = Vec::with_capacity(poly_count + params.off_mesh_connections.len());

        for i in 0..poly_count {
            let src = &params.polys[i * nvp * 2..(i + 1) * nvp * 2];
            let mut poly = Poly::new(params.poly_areas[i], PolyType::Ground, params.poly_flags[i]);

            for j in 0..nvp {
                if src[j] == MESH_NULL_IDX {
                    break;
                }
                if src[j] as usize >= params.verts.len() {
                    return Err(Error::InvalidTileData(format!(
                        "polygon {i} uses vertex {} of {}",
                        src[j],
                        params.verts.len()
                    )));
                }
                poly.verts[j] = src[j];

                let code = src[nvp + j];
                poly.neighbors[j] = if code & 0x8000 != 0 {
                    // Border edge: keep only portals, as tile side hints.
                    match code & 0xf {
                        0 => EXT_LINK | 4,
                        1 => EXT_LINK | 2,
                        2 => EXT_LINK,
                        3 => EXT_LINK | 6,
                        _ => 0,
                    }
                } else {
                    code + 1
                };
                poly.vert_count += 1;
            }

            if poly.vert_count < 3 {
                return Err(Error::InvalidTileData(format!(
                    "polygon {i} has {} vertices",
                    poly.vert_count
                )));
            }
            polys.push(poly);
        }

        Ok(polys)
    }

    /// Copies the detail meshes, dropping the repeated polygon vertices.
    fn build_detail_meshes(tile: &mut MeshTile, params: &NavMeshCreateParams) -> Result<()> {
        for (i, src) in params.detail_meshes.iter().enumerate() {
            let [vb, ndv, tb, ntris] = *src;
            let nv = tile.polys[i].vert_count as u32;
            if ndv < nv
                || (vb + ndv) as usize > params.detail_verts.len()
                || (tb + ntris) as usize > params.detail_tris.len()
                || ndv - nv > u8::MAX as u32
                || ntris > u8::MAX as u32
            {
                return Err(Error::InvalidTileData(format!(
                    "detail mesh {i} is out of range"
                )));
            }

            tile.detail_meshes.push(PolyDetail {
                vert_base: tile.detail_verts.len() as u32,
                tri_base: tb,
                vert_count: (ndv - nv) as u8,
                tri_count: ntris as u8,
            });
            tile.detail_verts
                .extend_from_slice(&params.detail_verts[(vb + nv) as usize..(vb + ndv) as usize]);
        }
        tile.detail_tris = params.detail_tris.clone();
        Ok(())
    }

    /// Triangulates every ground polygon as a fan from its first vertex.
    fn build_fan_detail(tile: &mut MeshTile, poly_count: usize) {
        for i in 0..poly_count {
            let nv = tile.polys[i].vert_count as usize;
            tile.detail_meshes.push(PolyDetail {
                vert_base: 0,
                tri_base: tile.detail_tris.len() as u32,
                vert_count: 0,
                tri_count: (nv - 2) as u8,
            });
            for j in 2..nv {
                // The middle edge is always on the boundary, the first and
                // last edges only for the outermost triangles.
                let mut flags = 1 << 2;
                if j == 2 {
                    flags |= 1;
                }
                if j == nv - 1 {
                    flags |= 1 << 4;
                }
                tile.detail_tris.push([0, (j - 1) as u8, j as u8, flags]);
            }
        }
    }

    fn build_bv_tree(tile: &MeshTile, params: &NavMeshCreateParams, poly_count: usize) -> Vec<BVNode> {
        let quant_factor = 1.0 / params.cs;
        let quantize = |v: f32, origin: f32| -> i32 {
            (((v - origin) * quant_factor) as i32).clamp(0, 0xffff)
        };

        let mut items = Vec::with_capacity(poly_count);
        for (i, poly) in tile.polys.iter().take(poly_count).enumerate() {
            let (verts, nv) = tile.poly_vertices(poly);
            let (mut bmin, mut bmax) = bounds_of(&verts[..nv]);
            // Detail vertices can stick out of the polygon in height.
            let pd = tile.detail_meshes[i];
            let detail = &tile.detail_verts
                [pd.vert_base as usize..pd.vert_base as usize + pd.vert_count as usize];
            for v in detail {
                bmin = vmin(&bmin, v);
                bmax = vmax(&bmax, v);
            }

            let mut item = BVItem {
                bmin: [0; 3],
                bmax: [0; 3],
                i: i as i32,
            };
            for k in 0..3 {
                item.bmin[k] = quantize(bmin[k], params.bmin[k]) as u16;
                item.bmax[k] = quantize(bmax[k], params.bmin[k]) as u16;
            }
            items.push(item);
        }

        let mut nodes = Vec::with_capacity(poly_count * 2);
        if !items.is_empty() {
            Self::subdivide(&mut items, &mut nodes);
        }
        nodes
    }

    fn subdivide(items: &mut [BVItem], nodes: &mut Vec<BVNode>) {
        let icur = nodes.len();
        nodes.push(BVNode::default());

        if items.len() == 1 {
            nodes[icur] = BVNode {
                bmin: items[0].bmin,
                bmax: items[0].bmax,
                i: items[0].i,
            };
            return;
        }

        let mut bmin = items[0].bmin;
        let mut bmax = items[0].bmax;
        for it in &items[1..] {
            for k in 0..3 {
                bmin[k] = bmin[k].min(it.bmin[k]);
                bmax[k] = bmax[k].max(it.bmax[k]);
            }
        }

        let extent = [
            bmax[0] as i32 - bmin[0] as i32,
            bmax[1] as i32 - bmin[1] as i32,
            bmax[2] as i32 - bmin[2] as i32,
        ];
        let axis = if extent[1] > extent[0] && extent[1] > extent[2] {
            1
        } else if extent[2] > extent[0] {
            2
        } else {
            0
        };
        items.sort_by_key(|it| it.bmin[axis]);

        let split = items.len() / 2;
        let (left, right) = items.split_at_mut(split);
        Self::subdivide(left, nodes);
        Self::subdivide(right, nodes);

        let escape = (nodes.len() - icur) as i32;
        nodes[icur] = BVNode {
            bmin,
            bmax,
            i: -escape,
        };
    }
}

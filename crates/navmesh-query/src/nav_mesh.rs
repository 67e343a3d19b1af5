//! Tiled navigation mesh container
//!
//! Tiles live in a fixed number of slots. A polygon reference packs the slot
//! index, the slot's salt at the time the reference was made, and the polygon
//! index, so references into a removed or replaced tile are detected and
//! rejected instead of aliasing new data.

use crate::status::{QueryResult, Status};
use crate::{
    detail_tri_edge_flags, PolyFlags, PolyRef, PolyType, DETAIL_EDGE_BOUNDARY, EXT_LINK,
    LINK_INTERNAL, OFFMESH_CON_BIDIR, VERTS_PER_POLYGON,
};
use navmesh_common::{
    closest_height_point_triangle, dist_pt_seg_sqr_2d, ilog2, next_pow2, opposite_tile,
    overlap_bounds, overlap_quant_bounds, point_in_polygon_2d, vlen_sqr, vlerp, vmax, vmin,
    vsub, Error, Result,
};

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

/// Parameters used to initialize a navigation mesh
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct NavMeshParams {
    /// World-space origin of the tile grid
    pub origin: [f32; 3],
    /// Width of each tile along the x-axis
    pub tile_width: f32,
    /// Depth of each tile along the z-axis
    pub tile_height: f32,
    /// Maximum number of tiles the mesh can hold
    pub max_tiles: u32,
    /// Maximum number of polygons (ground and off-mesh) per tile
    pub max_polys_per_tile: u32,
}

/// Link between two polygons
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct Link {
    /// Reference to the connected polygon
    pub reference: PolyRef,
    /// Index of the next link of the same polygon
    pub next: Option<u32>,
    /// Edge of the owning polygon the link crosses
    pub edge_index: u8,
    /// Tile side for links leaving the tile, [`LINK_INTERNAL`] otherwise
    pub side: u8,
    /// Start of the portal along the edge, in 1/255 units
    pub bmin: u8,
    /// End of the portal along the edge, in 1/255 units
    pub bmax: u8,
}

impl Link {
    /// Creates a link with no portal clamp.
    pub fn new(reference: PolyRef, edge_index: u8, side: u8) -> Self {
        Self {
            reference,
            next: None,
            edge_index,
            side,
            bmin: 0,
            bmax: 0,
        }
    }

    /// True if the link crosses into another tile.
    pub fn is_external(&self) -> bool {
        self.side != LINK_INTERNAL
    }
}

/// Polygon in the navigation mesh
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct Poly {
    /// Head of the link list
    #[cfg_attr(feature = "serialization", serde(skip))]
    pub first_link: Option<u32>,
    /// Vertex indices into the tile vertex array
    pub verts: [u16; VERTS_PER_POLYGON],
    /// Per-edge neighbour: 0 for walls, 1-based polygon index for internal
    /// edges, [`EXT_LINK`] plus side for edges continuing in another tile
    pub neighbors: [u16; VERTS_PER_POLYGON],
    /// User flags
    pub flags: PolyFlags,
    /// Number of vertices in use
    pub vert_count: u8,
    /// Area class
    pub area: u8,
    /// Polygon type
    pub poly_type: PolyType,
}

impl Poly {
    /// Creates a polygon with no vertices.
    pub fn new(area: u8, poly_type: PolyType, flags: PolyFlags) -> Self {
        Self {
            first_link: None,
            verts: [0; VERTS_PER_POLYGON],
            neighbors: [0; VERTS_PER_POLYGON],
            flags,
            vert_count: 0,
            area,
            poly_type,
        }
    }

    /// True for off-mesh connection polygons.
    pub fn is_off_mesh_connection(&self) -> bool {
        self.poly_type == PolyType::OffMeshConnection
    }
}

/// Detail sub-mesh of a polygon
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct PolyDetail {
    /// First vertex in the tile's detail vertex array
    pub vert_base: u32,
    /// First triangle in the tile's detail triangle array
    pub tri_base: u32,
    /// Number of detail vertices beyond the polygon's own vertices
    pub vert_count: u8,
    /// Number of triangles
    pub tri_count: u8,
}

/// Bounding volume tree node, quantized to tile-local integer coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct BVNode {
    /// Minimum bounds
    pub bmin: [u16; 3],
    /// Maximum bounds
    pub bmax: [u16; 3],
    /// Polygon index for leaves, negative escape offset for inner nodes
    pub i: i32,
}

/// Off-mesh connection between two points on the mesh
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct OffMeshConnection {
    /// Start position
    pub start: [f32; 3],
    /// End position
    pub end: [f32; 3],
    /// Snap radius at the end points
    pub radius: f32,
    /// Index of the connection polygon in the tile
    pub poly: u16,
    /// Connection flags, see [`OFFMESH_CON_BIDIR`]
    pub flags: u8,
    /// Tile side the end point lies on, [`LINK_INTERNAL`] inside this tile
    pub side: u8,
    /// User id
    pub user_id: u32,
}

impl OffMeshConnection {
    /// True if the connection can be taken from both ends.
    pub fn is_bidirectional(&self) -> bool {
        self.flags & OFFMESH_CON_BIDIR != 0
    }
}

/// Tile header information
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct TileHeader {
    /// Tile grid x
    pub x: i32,
    /// Tile grid y (world z)
    pub y: i32,
    /// Layer at the grid location
    pub layer: i32,
    /// User defined data
    pub user_id: u32,
    /// Number of polygons, ground and off-mesh
    pub poly_count: usize,
    /// Number of vertices
    pub vert_count: usize,
    /// Index of the first off-mesh connection polygon
    pub off_mesh_base: usize,
    /// Agent height
    pub walkable_height: f32,
    /// Agent radius
    pub walkable_radius: f32,
    /// Agent climb
    pub walkable_climb: f32,
    /// World bounds of the tile
    pub bmin: [f32; 3],
    /// World bounds of the tile
    pub bmax: [f32; 3],
    /// Scale from world units to BV tree units
    pub bv_quant_factor: f32,
}

/// Mesh tile in the navigation mesh
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct MeshTile {
    /// Generation of the slot this tile occupies
    #[cfg_attr(feature = "serialization", serde(skip))]
    pub salt: u32,
    /// Header, `None` for an empty slot
    pub header: Option<TileHeader>,
    /// Polygons, off-mesh connection polygons last
    pub polys: Vec<Poly>,
    /// Vertices
    pub verts: Vec<[f32; 3]>,
    /// Link pool shared by the tile's polygons
    #[cfg_attr(feature = "serialization", serde(skip))]
    pub links: Vec<Link>,
    /// Detail sub-mesh per ground polygon
    pub detail_meshes: Vec<PolyDetail>,
    /// Detail vertices
    pub detail_verts: Vec<[f32; 3]>,
    /// Detail triangles: three vertex indices and packed edge flags
    pub detail_tris: Vec<[u8; 4]>,
    /// Bounding volume tree, empty if the tile was built without one
    pub bv_tree: Vec<BVNode>,
    /// Off-mesh connections starting in this tile
    pub off_mesh_cons: Vec<OffMeshConnection>,
    #[cfg_attr(feature = "serialization", serde(skip))]
    links_free_list: Option<u32>,
    #[cfg_attr(feature = "serialization", serde(skip))]
    next: Option<usize>,
    #[cfg_attr(feature = "serialization", serde(skip))]
    index: usize,
}

/// Iterator over the links of one polygon
pub struct LinkIter<'t> {
    links: &'t [Link],
    cur: Option<u32>,
}

impl<'t> Iterator for LinkIter<'t> {
    type Item = &'t Link;

    fn next(&mut self) -> Option<Self::Item> {
        let link = self.links.get(self.cur? as usize)?;
        self.cur = link.next;
        Some(link)
    }
}

impl MeshTile {
    /// Slot index of the tile inside its navigation mesh.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Iterates the links of `poly`, most recently added first.
    pub fn links_of(&self, poly: &Poly) -> LinkIter<'_> {
        LinkIter {
            links: &self.links,
            cur: poly.first_link,
        }
    }

    /// Vertex `i` of `poly`.
    #[inline]
    pub fn vertex(&self, poly: &Poly, i: usize) -> [f32; 3] {
        self.verts[poly.verts[i] as usize]
    }

    /// Copies the vertices of `poly` into a fixed array, returning the count.
    pub fn poly_vertices(&self, poly: &Poly) -> ([[f32; 3]; VERTS_PER_POLYGON], usize) {
        let mut out = [[0.0; 3]; VERTS_PER_POLYGON];
        let nv = poly.vert_count as usize;
        for (i, v) in out.iter_mut().enumerate().take(nv) {
            *v = self.vertex(poly, i);
        }
        (out, nv)
    }

    /// Vertices of detail triangle `j` of polygon `poly`.
    fn detail_triangle(&self, poly: &Poly, pd: &PolyDetail, j: usize) -> ([[f32; 3]; 3], [u8; 4]) {
        let t = self.detail_tris[pd.tri_base as usize + j];
        let mut v = [[0.0; 3]; 3];
        for k in 0..3 {
            v[k] = if t[k] < poly.vert_count {
                self.vertex(poly, t[k] as usize)
            } else {
                self.detail_verts[pd.vert_base as usize + (t[k] - poly.vert_count) as usize]
            };
        }
        (v, t)
    }

    fn alloc_link(&mut self, link: Link) -> u32 {
        match self.links_free_list {
            Some(idx) => {
                self.links_free_list = self.links[idx as usize].next;
                self.links[idx as usize] = link;
                idx
            }
            None => {
                self.links.push(link);
                (self.links.len() - 1) as u32
            }
        }
    }

    fn free_link(&mut self, idx: u32) {
        self.links[idx as usize].next = self.links_free_list;
        self.links_free_list = Some(idx);
    }

    /// Prepends a link to the list of polygon `poly_idx`.
    fn push_link(&mut self, poly_idx: usize, mut link: Link) {
        link.next = self.polys[poly_idx].first_link;
        let idx = self.alloc_link(link);
        self.polys[poly_idx].first_link = Some(idx);
    }

    /// Removes all links of the tile and clears the runtime bookkeeping.
    fn reset_links(&mut self) {
        self.links.clear();
        self.links_free_list = None;
        for poly in &mut self.polys {
            poly.first_link = None;
        }
    }
}

/// Navigation mesh structure
#[derive(Debug)]
pub struct NavMesh {
    params: NavMeshParams,
    tile_lut_mask: u32,
    pos_lookup: Vec<Option<usize>>,
    next_free: Option<usize>,
    tiles: Vec<MeshTile>,
    salt_bits: u32,
    tile_bits: u32,
    poly_bits: u32,
}

#[inline]
fn compute_tile_hash(x: i32, y: i32, mask: u32) -> usize {
    const H1: u32 = 0x8da6_b343;
    const H2: u32 = 0xd816_3841;
    let n = H1.wrapping_mul(x as u32).wrapping_add(H2.wrapping_mul(y as u32));
    (n & mask) as usize
}

/// Grid offset of the neighbour tile on `side`.
fn neighbour_tile_offset(side: u8) -> (i32, i32) {
    match side {
        0 => (1, 0),
        1 => (1, 1),
        2 => (0, 1),
        3 => (-1, 1),
        4 => (-1, 0),
        5 => (-1, -1),
        6 => (0, -1),
        _ => (1, -1),
    }
}

fn get_slab_coord(va: &[f32; 3], side: u8) -> f32 {
    match side {
        0 | 4 => va[0],
        2 | 6 => va[2],
        _ => 0.0,
    }
}

fn calc_slab_end_points(va: &[f32; 3], vb: &[f32; 3], side: u8) -> ([f32; 2], [f32; 2]) {
    let axis = match side {
        0 | 4 => 2,
        2 | 6 => 0,
        _ => return ([0.0; 2], [0.0; 2]),
    };
    if va[axis] < vb[axis] {
        ([va[axis], va[1]], [vb[axis], vb[1]])
    } else {
        ([vb[axis], vb[1]], [va[axis], va[1]])
    }
}

fn overlap_slabs(amin: &[f32; 2], amax: &[f32; 2], bmin: &[f32; 2], bmax: &[f32; 2], px: f32, py: f32) -> bool {
    // Shrink the slabs a little so ones touching at end points do not connect.
    let minx = (amin[0] + px).max(bmin[0] + px);
    let maxx = (amax[0] - px).min(bmax[0] - px);
    if minx > maxx {
        return false;
    }

    // Vertical overlap.
    let ad = (amax[1] - amin[1]) / (amax[0] - amin[0]);
    let ak = amin[1] - ad * amin[0];
    let bd = (bmax[1] - bmin[1]) / (bmax[0] - bmin[0]);
    let bk = bmin[1] - bd * bmin[0];
    let aminy = ad * minx + ak;
    let amaxy = ad * maxx + ak;
    let bminy = bd * minx + bk;
    let bmaxy = bd * maxx + bk;
    let dmin = bminy - aminy;
    let dmax = bmaxy - amaxy;

    // Crossing segments always overlap.
    if dmin * dmax < 0.0 {
        return true;
    }

    let thr = (py * 2.0) * (py * 2.0);
    dmin * dmin <= thr || dmax * dmax <= thr
}

#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
#[cfg(feature = "serialization")]
struct NavMeshData {
    params: NavMeshParams,
    tiles: Vec<MeshTile>,
}

impl NavMesh {
    /// Creates an empty navigation mesh
    pub fn new(params: NavMeshParams) -> Result<Self> {
        if !params.origin.iter().all(|c| c.is_finite()) {
            return Err(Error::InvalidParam("origin must be finite".into()));
        }
        if !(params.tile_width > 0.0 && params.tile_height > 0.0) {
            return Err(Error::InvalidParam(format!(
                "tile size must be positive, got {}x{}",
                params.tile_width, params.tile_height
            )));
        }
        if params.max_tiles == 0 || params.max_polys_per_tile == 0 {
            return Err(Error::InvalidParam(
                "max_tiles and max_polys_per_tile must be positive".into(),
            ));
        }

        let tile_bits = ilog2(next_pow2(params.max_tiles));
        let poly_bits = ilog2(next_pow2(params.max_polys_per_tile));
        let used_bits = tile_bits + poly_bits;
        if used_bits > 22 {
            return Err(Error::InvalidParam(format!(
                "{} tiles of {} polygons leave fewer than 10 salt bits",
                params.max_tiles, params.max_polys_per_tile
            )));
        }
        let salt_bits = (32 - used_bits).min(31);

        let lut_size = next_pow2(params.max_tiles / 4).max(1);
        let max_tiles = params.max_tiles as usize;

        let mut tiles = Vec::with_capacity(max_tiles);
        for i in 0..max_tiles {
            tiles.push(MeshTile {
                salt: 1,
                next: if i + 1 < max_tiles { Some(i + 1) } else { None },
                index: i,
                ..MeshTile::default()
            });
        }

        Ok(Self {
            params,
            tile_lut_mask: lut_size - 1,
            pos_lookup: vec![None; lut_size as usize],
            next_free: Some(0),
            tiles,
            salt_bits,
            tile_bits,
            poly_bits,
        })
    }

    /// Parameters the mesh was created with.
    pub fn params(&self) -> &NavMeshParams {
        &self.params
    }

    /// Number of tile slots.
    pub fn max_tiles(&self) -> usize {
        self.tiles.len()
    }

    /// Tile in slot `index`, if the slot holds one.
    pub fn tile(&self, index: usize) -> Option<&MeshTile> {
        self.tiles.get(index).filter(|t| t.header.is_some())
    }

    /// Iterates all occupied tiles.
    pub fn tiles(&self) -> impl Iterator<Item = &MeshTile> + '_ {
        self.tiles.iter().filter(|t| t.header.is_some())
    }

    /// Packs salt, tile slot and polygon index into a reference.
    #[inline]
    pub fn encode_poly_id(&self, salt: u32, tile: usize, poly: usize) -> PolyRef {
        PolyRef::new(
            (salt << (self.poly_bits + self.tile_bits))
                | ((tile as u32) << self.poly_bits)
                | poly as u32,
        )
    }

    /// Splits a reference into salt, tile slot and polygon index.
    #[inline]
    pub fn decode_poly_id(&self, reference: PolyRef) -> (u32, usize, usize) {
        let id = reference.id();
        let salt_mask = (1u32 << self.salt_bits) - 1;
        let tile_mask = (1u32 << self.tile_bits) - 1;
        let poly_mask = (1u32 << self.poly_bits) - 1;
        (
            (id >> (self.poly_bits + self.tile_bits)) & salt_mask,
            ((id >> self.poly_bits) & tile_mask) as usize,
            (id & poly_mask) as usize,
        )
    }

    /// Polygon index part of a reference.
    #[inline]
    pub fn decode_poly_id_poly(&self, reference: PolyRef) -> usize {
        (reference.id() & ((1u32 << self.poly_bits) - 1)) as usize
    }

    /// Tile slot part of a reference.
    #[inline]
    pub fn decode_poly_id_tile(&self, reference: PolyRef) -> usize {
        ((reference.id() >> self.poly_bits) & ((1u32 << self.tile_bits) - 1)) as usize
    }

    /// Reference of polygon 0 of `tile`; OR a polygon index into it.
    #[inline]
    pub fn get_poly_ref_base(&self, tile: &MeshTile) -> PolyRef {
        self.encode_poly_id(tile.salt, tile.index, 0)
    }

    /// Reference identifying `tile` itself.
    pub fn get_tile_ref(&self, tile: &MeshTile) -> PolyRef {
        self.get_poly_ref_base(tile)
    }

    /// Grid location of the tile containing `pos`.
    pub fn calc_tile_loc(&self, pos: &[f32; 3]) -> (i32, i32) {
        let tx = ((pos[0] - self.params.origin[0]) / self.params.tile_width).floor() as i32;
        let ty = ((pos[2] - self.params.origin[2]) / self.params.tile_height).floor() as i32;
        (tx, ty)
    }

    fn tile_indices_at(&self, x: i32, y: i32) -> impl Iterator<Item = usize> + '_ {
        let h = compute_tile_hash(x, y, self.tile_lut_mask);
        std::iter::successors(self.pos_lookup[h], move |&i| self.tiles[i].next).filter(
            move |&i| {
                self.tiles[i]
                    .header
                    .as_ref()
                    .is_some_and(|hd| hd.x == x && hd.y == y)
            },
        )
    }

    /// All tiles (layers) at a grid location.
    pub fn get_tiles_at(&self, x: i32, y: i32) -> impl Iterator<Item = &MeshTile> + '_ {
        self.tile_indices_at(x, y).map(move |i| &self.tiles[i])
    }

    /// Tile at a grid location and layer.
    pub fn get_tile_at(&self, x: i32, y: i32, layer: i32) -> Option<&MeshTile> {
        self.get_tiles_at(x, y)
            .find(|t| t.header.as_ref().is_some_and(|h| h.layer == layer))
    }

    /// Tile addressed by a tile reference, if it is still loaded.
    pub fn get_tile_by_ref(&self, tile_ref: PolyRef) -> Option<&MeshTile> {
        if !tile_ref.is_valid() {
            return None;
        }
        let (salt, it, _) = self.decode_poly_id(tile_ref);
        self.tile(it).filter(|t| t.salt == salt)
    }

    /// Resolves a polygon reference, checking the salt.
    pub fn get_tile_and_poly_by_ref(&self, reference: PolyRef) -> QueryResult<(&MeshTile, &Poly)> {
        if !reference.is_valid() {
            return Err(Status::invalid_param());
        }
        let (salt, it, ip) = self.decode_poly_id(reference);
        let tile = self
            .tiles
            .get(it)
            .filter(|t| t.salt == salt && t.header.is_some())
            .ok_or_else(Status::invalid_param)?;
        let poly = tile.polys.get(ip).ok_or_else(Status::invalid_param)?;
        Ok((tile, poly))
    }

    /// True if the reference points at a loaded polygon.
    pub fn is_valid_poly_ref(&self, reference: PolyRef) -> bool {
        self.get_tile_and_poly_by_ref(reference).is_ok()
    }

    /// Adds a built tile, connecting it to its neighbours.
    ///
    /// Returns the tile reference.
    pub fn add_tile(&mut self, mut tile: MeshTile) -> Result<PolyRef> {
        let header = tile
            .header
            .clone()
            .ok_or_else(|| Error::InvalidTileData("tile has no header".into()))?;
        self.validate_tile(&tile, &header)?;

        if self.get_tile_at(header.x, header.y, header.layer).is_some() {
            return Err(Error::TileOccupied {
                x: header.x,
                y: header.y,
                layer: header.layer,
            });
        }

        let idx = self.next_free.ok_or(Error::OutOfTiles(self.tiles.len()))?;
        self.next_free = self.tiles[idx].next;

        let h = compute_tile_hash(header.x, header.y, self.tile_lut_mask);
        tile.salt = self.tiles[idx].salt;
        tile.index = idx;
        tile.next = self.pos_lookup[h];
        tile.reset_links();
        self.tiles[idx] = tile;
        self.pos_lookup[h] = Some(idx);

        self.connect_int_links(idx);
        self.base_off_mesh_links(idx);
        self.connect_ext_off_mesh_links(idx, idx, None);

        // Other layers at the same location.
        let layers: Vec<usize> = self
            .tile_indices_at(header.x, header.y)
            .filter(|&j| j != idx)
            .collect();
        for j in layers {
            self.connect_ext_links(idx, j, None);
            self.connect_ext_links(j, idx, None);
            self.connect_ext_off_mesh_links(idx, j, None);
            self.connect_ext_off_mesh_links(j, idx, None);
        }

        for side in 0..8u8 {
            let (dx, dy) = neighbour_tile_offset(side);
            let neis: Vec<usize> = self
                .tile_indices_at(header.x + dx, header.y + dy)
                .collect();
            for j in neis {
                self.connect_ext_links(idx, j, Some(side));
                self.connect_ext_links(j, idx, Some(opposite_tile(side)));
                self.connect_ext_off_mesh_links(idx, j, Some(side));
                self.connect_ext_off_mesh_links(j, idx, Some(opposite_tile(side)));
            }
        }

        let tile_ref = self.get_tile_ref(&self.tiles[idx]);
        log::debug!(
            "Added tile ({}, {}, layer {}) to slot {} with {} polygons, ref {}",
            header.x,
            header.y,
            header.layer,
            idx,
            header.poly_count,
            tile_ref
        );
        Ok(tile_ref)
    }

    fn validate_tile(&self, tile: &MeshTile, header: &TileHeader) -> Result<()> {
        let max_polys = 1usize << self.poly_bits;
        if tile.polys.len() > max_polys || tile.polys.len() > self.params.max_polys_per_tile as usize {
            return Err(Error::InvalidTileData(format!(
                "tile has {} polygons, mesh allows {}",
                tile.polys.len(),
                self.params.max_polys_per_tile
            )));
        }
        if header.off_mesh_base > tile.polys.len() || tile.detail_meshes.len() < header.off_mesh_base {
            return Err(Error::InvalidTileData(
                "every ground polygon needs a detail mesh".into(),
            ));
        }
        for (i, poly) in tile.polys.iter().enumerate() {
            let nv = poly.vert_count as usize;
            if nv > VERTS_PER_POLYGON || poly.verts[..nv].iter().any(|&v| v as usize >= tile.verts.len()) {
                return Err(Error::InvalidTileData(format!(
                    "polygon {i} references missing vertices"
                )));
            }
        }
        for (i, poly) in tile.polys.iter().enumerate() {
            let nv = poly.vert_count as usize;
            let bad_neighbour = poly.neighbors[..nv]
                .iter()
                .any(|&nei| nei != 0 && nei & EXT_LINK == 0 && nei as usize > tile.polys.len());
            if bad_neighbour {
                return Err(Error::InvalidTileData(format!(
                    "polygon {i} neighbours a missing polygon"
                )));
            }
        }
        for (i, pd) in tile.detail_meshes.iter().enumerate() {
            if (pd.tri_base as usize + pd.tri_count as usize) > tile.detail_tris.len()
                || (pd.vert_base as usize + pd.vert_count as usize) > tile.detail_verts.len()
            {
                return Err(Error::InvalidTileData(format!(
                    "detail mesh {i} is out of range"
                )));
            }
            // Indices below the polygon's vertex count address its own
            // vertices, the rest its detail vertices.
            if let Some(poly) = tile.polys.get(i).filter(|p| !p.is_off_mesh_connection()) {
                let limit = poly.vert_count as usize + pd.vert_count as usize;
                let start = pd.tri_base as usize;
                let tris = &tile.detail_tris[start..start + pd.tri_count as usize];
                if tris.iter().any(|t| t[..3].iter().any(|&v| v as usize >= limit)) {
                    return Err(Error::InvalidTileData(format!(
                        "detail mesh {i} references missing vertices"
                    )));
                }
            }
        }
        for (i, node) in tile.bv_tree.iter().enumerate() {
            if node.i >= 0 && node.i as usize >= header.off_mesh_base {
                return Err(Error::InvalidTileData(format!(
                    "BV node {i} references missing polygon {}",
                    node.i
                )));
            }
        }
        for (i, con) in tile.off_mesh_cons.iter().enumerate() {
            let is_con_poly = tile
                .polys
                .get(con.poly as usize)
                .is_some_and(|p| p.is_off_mesh_connection() && p.vert_count == 2);
            if !is_con_poly {
                return Err(Error::InvalidTileData(format!(
                    "off-mesh connection {i} has no connection polygon"
                )));
            }
        }
        Ok(())
    }

    /// Removes the tile addressed by `tile_ref` and returns its data.
    ///
    /// The slot's salt is advanced so outstanding references into the tile
    /// stop resolving.
    pub fn remove_tile(&mut self, tile_ref: PolyRef) -> Result<MeshTile> {
        if !tile_ref.is_valid() {
            return Err(Error::InvalidParam("null tile reference".into()));
        }
        let (salt, it, _) = self.decode_poly_id(tile_ref);
        let header = self
            .tiles
            .get(it)
            .filter(|t| t.salt == salt)
            .and_then(|t| t.header.clone())
            .ok_or_else(|| Error::TileNotFound(format!("no tile for ref {tile_ref}")))?;

        // Remove from the position lookup.
        let h = compute_tile_hash(header.x, header.y, self.tile_lut_mask);
        let mut prev: Option<usize> = None;
        let mut cur = self.pos_lookup[h];
        while let Some(i) = cur {
            if i == it {
                let next = self.tiles[i].next;
                match prev {
                    Some(p) => self.tiles[p].next = next,
                    None => self.pos_lookup[h] = next,
                }
                break;
            }
            prev = Some(i);
            cur = self.tiles[i].next;
        }

        let layers: Vec<usize> = self.tile_indices_at(header.x, header.y).collect();
        for j in layers {
            self.unconnect_links(j, it);
        }
        for side in 0..8u8 {
            let (dx, dy) = neighbour_tile_offset(side);
            let neis: Vec<usize> = self
                .tile_indices_at(header.x + dx, header.y + dy)
                .collect();
            for j in neis {
                self.unconnect_links(j, it);
            }
        }

        let salt_mask = (1u32 << self.salt_bits) - 1;
        let mut next_salt = (salt + 1) & salt_mask;
        if next_salt == 0 {
            next_salt += 1;
        }
        let empty = MeshTile {
            salt: next_salt,
            next: self.next_free,
            index: it,
            ..MeshTile::default()
        };
        let mut data = std::mem::replace(&mut self.tiles[it], empty);
        self.next_free = Some(it);

        data.reset_links();
        data.next = None;
        log::debug!(
            "Removed tile ({}, {}, layer {}) from slot {}",
            header.x,
            header.y,
            header.layer,
            it
        );
        Ok(data)
    }

    fn connect_int_links(&mut self, idx: usize) {
        let base = self.get_poly_ref_base(&self.tiles[idx]);
        let tile = &mut self.tiles[idx];
        for i in 0..tile.polys.len() {
            tile.polys[i].first_link = None;
            if tile.polys[i].is_off_mesh_connection() {
                continue;
            }
            // Built backwards so the list runs from the lowest edge.
            for j in (0..tile.polys[i].vert_count as usize).rev() {
                let nei = tile.polys[i].neighbors[j];
                if nei == 0 || nei & EXT_LINK != 0 {
                    continue;
                }
                let reference = PolyRef::new(base.id() | (nei - 1) as u32);
                tile.push_link(i, Link::new(reference, j as u8, LINK_INTERNAL));
            }
        }
    }

    fn base_off_mesh_links(&mut self, idx: usize) {
        let mut landings = Vec::new();
        {
            let tile = &self.tiles[idx];
            let Some(header) = tile.header.as_ref() else {
                return;
            };
            for con in &tile.off_mesh_cons {
                let half_extents = [con.radius, header.walkable_climb, con.radius];
                let p = con.start;
                let snapped = self
                    .find_nearest_poly_in_tile(tile, &p, &half_extents)
                    .filter(|(_, nearest)| {
                        // The nearest poly search is generous; check the snap radius in 2D.
                        let dx = nearest[0] - p[0];
                        let dz = nearest[2] - p[2];
                        dx * dx + dz * dz <= con.radius * con.radius
                    });
                let Some((land_ref, nearest)) = snapped else {
                    log::warn!(
                        "Off-mesh connection {} in tile ({}, {}) does not start on the mesh",
                        con.user_id,
                        header.x,
                        header.y
                    );
                    continue;
                };
                landings.push((con.poly as usize, land_ref, nearest));
            }
        }

        let base = self.get_poly_ref_base(&self.tiles[idx]);
        for (con_poly, land_ref, nearest) in landings {
            let land_idx = self.decode_poly_id_poly(land_ref);
            let tile = &mut self.tiles[idx];
            let v = tile.polys[con_poly].verts[0] as usize;
            tile.verts[v] = nearest;
            tile.push_link(con_poly, Link::new(land_ref, 0, LINK_INTERNAL));
            // The start point always leads back into the connection.
            let con_ref = PolyRef::new(base.id() | con_poly as u32);
            tile.push_link(land_idx, Link::new(con_ref, 0xff, LINK_INTERNAL));
        }
    }

    /// Connects off-mesh connections of `target_idx` that land in `idx`.
    fn connect_ext_off_mesh_links(&mut self, idx: usize, target_idx: usize, side: Option<u8>) {
        let opposite_side = side.map(opposite_tile).unwrap_or(LINK_INTERNAL);
        let mut landings = Vec::new();
        {
            let tile = &self.tiles[idx];
            let target = &self.tiles[target_idx];
            let Some(target_header) = target.header.as_ref() else {
                return;
            };
            for con in &target.off_mesh_cons {
                if con.side != opposite_side {
                    continue;
                }
                // Skip connections whose start could not be connected at all.
                if target.polys[con.poly as usize].first_link.is_none() {
                    continue;
                }
                let half_extents = [con.radius, target_header.walkable_climb, con.radius];
                let p = con.end;
                let Some((land_ref, nearest)) = self.find_nearest_poly_in_tile(tile, &p, &half_extents)
                else {
                    continue;
                };
                let dx = nearest[0] - p[0];
                let dz = nearest[2] - p[2];
                if dx * dx + dz * dz > con.radius * con.radius {
                    continue;
                }
                landings.push((con.poly as usize, land_ref, nearest, con.is_bidirectional()));
            }
        }

        let target_base = self.get_poly_ref_base(&self.tiles[target_idx]);
        for (con_poly, land_ref, nearest, bidir) in landings {
            let target = &mut self.tiles[target_idx];
            let v = target.polys[con_poly].verts[1] as usize;
            target.verts[v] = nearest;
            let mut link = Link::new(land_ref, 1, opposite_side);
            link.bmin = 0;
            link.bmax = 0;
            target.push_link(con_poly, link);

            if bidir {
                let land_idx = self.decode_poly_id_poly(land_ref);
                let con_ref = PolyRef::new(target_base.id() | con_poly as u32);
                self.tiles[idx].push_link(
                    land_idx,
                    Link::new(con_ref, 0xff, side.unwrap_or(LINK_INTERNAL)),
                );
            }
        }
    }

    /// Links portal edges of tile `idx` to matching edges of `target_idx`.
    fn connect_ext_links(&mut self, idx: usize, target_idx: usize, side: Option<u8>) {
        let mut new_links = Vec::new();
        {
            let tile = &self.tiles[idx];
            let target = &self.tiles[target_idx];
            for (i, poly) in tile.polys.iter().enumerate() {
                let nv = poly.vert_count as usize;
                for j in 0..nv {
                    if poly.neighbors[j] & EXT_LINK == 0 {
                        continue;
                    }
                    let dir = (poly.neighbors[j] & 0xff) as u8;
                    if side.is_some_and(|s| s != dir) {
                        continue;
                    }
                    let va = tile.vertex(poly, j);
                    let vb = tile.vertex(poly, (j + 1) % nv);
                    for (nei_ref, [cmin, cmax]) in
                        self.find_connecting_polys(&va, &vb, target, opposite_tile(dir))
                    {
                        let mut link = Link::new(nei_ref, j as u8, dir);
                        // Compress portal limits to a byte value.
                        let axis = match dir {
                            0 | 4 => Some(2),
                            2 | 6 => Some(0),
                            _ => None,
                        };
                        if let Some(axis) = axis {
                            let span = vb[axis] - va[axis];
                            let mut tmin = (cmin - va[axis]) / span;
                            let mut tmax = (cmax - va[axis]) / span;
                            if tmin > tmax {
                                std::mem::swap(&mut tmin, &mut tmax);
                            }
                            link.bmin = (tmin.clamp(0.0, 1.0) * 255.0).round() as u8;
                            link.bmax = (tmax.clamp(0.0, 1.0) * 255.0).round() as u8;
                        }
                        new_links.push((i, link));
                    }
                }
            }
        }

        let tile = &mut self.tiles[idx];
        for (poly_idx, link) in new_links {
            tile.push_link(poly_idx, link);
        }
    }

    /// Finds polygons of `tile` with a portal edge on `side` matching `va`-`vb`.
    ///
    /// Returns at most four references together with the overlapping range
    /// along the edge.
    fn find_connecting_polys(
        &self,
        va: &[f32; 3],
        vb: &[f32; 3],
        tile: &MeshTile,
        side: u8,
    ) -> Vec<(PolyRef, [f32; 2])> {
        const MAX_CONNECTIONS: usize = 4;
        let mut out = Vec::new();
        let Some(header) = tile.header.as_ref() else {
            return out;
        };

        let (amin, amax) = calc_slab_end_points(va, vb, side);
        let apos = get_slab_coord(va, side);
        let wanted = EXT_LINK | side as u16;
        let base = self.get_poly_ref_base(tile);

        for (i, poly) in tile.polys.iter().enumerate() {
            let nv = poly.vert_count as usize;
            for j in 0..nv {
                if poly.neighbors[j] != wanted {
                    continue;
                }
                let vc = tile.vertex(poly, j);
                let vd = tile.vertex(poly, (j + 1) % nv);
                let bpos = get_slab_coord(&vc, side);
                if (apos - bpos).abs() > 0.01 {
                    continue;
                }
                let (bmin, bmax) = calc_slab_end_points(&vc, &vd, side);
                if !overlap_slabs(&amin, &amax, &bmin, &bmax, 0.01, header.walkable_climb) {
                    continue;
                }
                if out.len() < MAX_CONNECTIONS {
                    out.push((
                        PolyRef::new(base.id() | i as u32),
                        [amin[0].max(bmin[0]), amax[0].min(bmax[0])],
                    ));
                }
                break;
            }
        }
        out
    }

    /// Drops the links of tile `idx` that point into tile slot `target`.
    fn unconnect_links(&mut self, idx: usize, target: usize) {
        let poly_bits = self.poly_bits;
        let tile_mask = (1u32 << self.tile_bits) - 1;
        let tile = &mut self.tiles[idx];
        for i in 0..tile.polys.len() {
            let mut prev: Option<u32> = None;
            let mut cur = tile.polys[i].first_link;
            while let Some(j) = cur {
                let link = tile.links[j as usize];
                let link_tile = ((link.reference.id() >> poly_bits) & tile_mask) as usize;
                if link_tile == target {
                    match prev {
                        Some(p) => tile.links[p as usize].next = link.next,
                        None => tile.polys[i].first_link = link.next,
                    }
                    tile.free_link(j);
                } else {
                    prev = Some(j);
                }
                cur = link.next;
            }
        }
    }

    /// Calls `visit` with the reference and index of every ground polygon of
    /// `tile` whose bounds overlap the query box.
    ///
    /// Uses the tile's BV tree when present.
    pub fn query_polygons_in_tile(
        &self,
        tile: &MeshTile,
        qmin: &[f32; 3],
        qmax: &[f32; 3],
        mut visit: impl FnMut(PolyRef, usize),
    ) {
        let Some(header) = tile.header.as_ref() else {
            return;
        };
        let base = self.get_poly_ref_base(tile);

        if !tile.bv_tree.is_empty() {
            let tbmin = header.bmin;
            let tbmax = header.bmax;
            let qfac = header.bv_quant_factor;

            // Quantize the query box into tile space.
            let mut bmin = [0u16; 3];
            let mut bmax = [0u16; 3];
            for k in 0..3 {
                let lo = qmin[k].clamp(tbmin[k], tbmax[k]) - tbmin[k];
                let hi = qmax[k].clamp(tbmin[k], tbmax[k]) - tbmin[k];
                bmin[k] = ((qfac * lo) as u16) & 0xfffe;
                bmax[k] = ((qfac * hi + 1.0) as u16) | 1;
            }

            let mut i = 0;
            let end = tile.bv_tree.len();
            while i < end {
                let node = &tile.bv_tree[i];
                let overlap = overlap_quant_bounds(&bmin, &bmax, &node.bmin, &node.bmax);
                let is_leaf = node.i >= 0;
                if is_leaf && overlap {
                    visit(PolyRef::new(base.id() | node.i as u32), node.i as usize);
                }
                if overlap || is_leaf {
                    i += 1;
                } else {
                    i += (-node.i) as usize;
                }
            }
        } else {
            for (i, poly) in tile.polys.iter().enumerate() {
                if poly.is_off_mesh_connection() {
                    continue;
                }
                let (verts, nv) = tile.poly_vertices(poly);
                let mut bmin = verts[0];
                let mut bmax = verts[0];
                for v in &verts[1..nv] {
                    bmin = vmin(&bmin, v);
                    bmax = vmax(&bmax, v);
                }
                if overlap_bounds(qmin, qmax, &bmin, &bmax) {
                    visit(PolyRef::new(base.id() | i as u32), i);
                }
            }
        }
    }

    /// Nearest ground polygon of `tile` to `center` within the box.
    pub fn find_nearest_poly_in_tile(
        &self,
        tile: &MeshTile,
        center: &[f32; 3],
        half_extents: &[f32; 3],
    ) -> Option<(PolyRef, [f32; 3])> {
        const MAX_POLYS: usize = 128;
        let header = tile.header.as_ref()?;
        let bmin = vsub(center, half_extents);
        let bmax = [
            center[0] + half_extents[0],
            center[1] + half_extents[1],
            center[2] + half_extents[2],
        ];

        let mut candidates = Vec::new();
        self.query_polygons_in_tile(tile, &bmin, &bmax, |r, i| {
            if candidates.len() < MAX_POLYS {
                candidates.push((r, i));
            }
        });

        let mut nearest: Option<(PolyRef, [f32; 3])> = None;
        let mut nearest_dist = f32::MAX;
        for (reference, ip) in candidates {
            let (closest, over_poly) = self.closest_point_on_tile_poly(tile, ip, center);
            // A point directly above the polygon is as near as it can get
            // within climb height.
            let diff = vsub(center, &closest);
            let d = if over_poly {
                let d = diff[1].abs() - header.walkable_climb;
                if d > 0.0 {
                    d * d
                } else {
                    0.0
                }
            } else {
                vlen_sqr(&diff)
            };
            if d < nearest_dist {
                nearest_dist = d;
                nearest = Some((reference, closest));
            }
        }
        nearest
    }

    /// Height of polygon `ip` of `tile` at the XZ location of `pos`.
    ///
    /// Returns `None` when `pos` is outside the polygon footprint or the
    /// polygon is an off-mesh connection.
    pub fn get_poly_height(&self, tile: &MeshTile, ip: usize, pos: &[f32; 3]) -> Option<f32> {
        let poly = tile.polys.get(ip)?;
        if poly.is_off_mesh_connection() {
            return None;
        }
        let pd = tile.detail_meshes.get(ip)?;
        let (verts, nv) = tile.poly_vertices(poly);
        if !point_in_polygon_2d(pos, &verts[..nv]) {
            return None;
        }

        for j in 0..pd.tri_count as usize {
            let (v, _) = tile.detail_triangle(poly, pd, j);
            if let Some(h) = closest_height_point_triangle(pos, &v[0], &v[1], &v[2]) {
                return Some(h);
            }
        }

        // Degenerate triangles or large coordinates: the point is on an
        // edge, so take the closest edge point.
        Some(self.closest_point_on_detail_edges(tile, ip, pos, false)[1])
    }

    fn closest_point_on_detail_edges(
        &self,
        tile: &MeshTile,
        ip: usize,
        pos: &[f32; 3],
        only_boundary: bool,
    ) -> [f32; 3] {
        const ANY_BOUNDARY_EDGE: u8 =
            DETAIL_EDGE_BOUNDARY | (DETAIL_EDGE_BOUNDARY << 2) | (DETAIL_EDGE_BOUNDARY << 4);

        let (Some(poly), Some(pd)) = (tile.polys.get(ip), tile.detail_meshes.get(ip)) else {
            return *pos;
        };

        let mut dmin = f32::MAX;
        let mut best: Option<([f32; 3], [f32; 3], f32)> = None;
        for i in 0..pd.tri_count as usize {
            let (v, t) = tile.detail_triangle(poly, pd, i);
            if only_boundary && t[3] & ANY_BOUNDARY_EDGE == 0 {
                continue;
            }
            let mut j = 2;
            for k in 0..3 {
                let boundary = detail_tri_edge_flags(t[3], j) & DETAIL_EDGE_BOUNDARY != 0;
                // Interior edges are seen twice; only look at them once.
                if !boundary && (only_boundary || t[j] < t[k]) {
                    j = k;
                    continue;
                }
                let (d, s) = dist_pt_seg_sqr_2d(pos, &v[j], &v[k]);
                if d < dmin {
                    dmin = d;
                    best = Some((v[j], v[k], s));
                }
                j = k;
            }
        }

        match best {
            Some((pmin, pmax, s)) => vlerp(&pmin, &pmax, s),
            None => *pos,
        }
    }

    /// Closest point on polygon `ip` of `tile`, and whether `pos` is over it.
    pub fn closest_point_on_tile_poly(
        &self,
        tile: &MeshTile,
        ip: usize,
        pos: &[f32; 3],
    ) -> ([f32; 3], bool) {
        if let Some(h) = self.get_poly_height(tile, ip, pos) {
            return ([pos[0], h, pos[2]], true);
        }

        let Some(poly) = tile.polys.get(ip) else {
            return (*pos, false);
        };
        // Off-mesh connections have no detail polygons.
        if poly.is_off_mesh_connection() {
            let v0 = tile.vertex(poly, 0);
            let v1 = tile.vertex(poly, 1);
            let (_, t) = dist_pt_seg_sqr_2d(pos, &v0, &v1);
            return (vlerp(&v0, &v1, t), false);
        }

        (self.closest_point_on_detail_edges(tile, ip, pos, true), false)
    }

    /// Closest point on a polygon, with height from its detail mesh.
    ///
    /// The flag is true when `pos` lies over the polygon footprint.
    pub fn closest_point_on_poly(&self, reference: PolyRef, pos: &[f32; 3]) -> QueryResult<([f32; 3], bool)> {
        let (tile, _) = self.get_tile_and_poly_by_ref(reference)?;
        let ip = self.decode_poly_id_poly(reference);
        Ok(self.closest_point_on_tile_poly(tile, ip, pos))
    }

    /// End points of an off-mesh connection polygon in travel order.
    ///
    /// `prev_ref` is the polygon the agent arrives from; the first returned
    /// point is the one attached to it.
    pub fn get_off_mesh_connection_poly_end_points(
        &self,
        prev_ref: PolyRef,
        poly_ref: PolyRef,
    ) -> QueryResult<([f32; 3], [f32; 3])> {
        let (tile, poly) = self.get_tile_and_poly_by_ref(poly_ref)?;
        if !poly.is_off_mesh_connection() {
            return Err(Status::FAILURE);
        }

        let mut idx0 = 0;
        let mut idx1 = 1;
        if let Some(link) = tile.links_of(poly).find(|l| l.edge_index == 0) {
            if link.reference != prev_ref {
                idx0 = 1;
                idx1 = 0;
            }
        }
        Ok((tile.vertex(poly, idx0), tile.vertex(poly, idx1)))
    }

    /// Off-mesh connection record behind an off-mesh polygon reference.
    pub fn get_off_mesh_connection_by_ref(&self, reference: PolyRef) -> Option<&OffMeshConnection> {
        let (tile, poly) = self.get_tile_and_poly_by_ref(reference).ok()?;
        if !poly.is_off_mesh_connection() {
            return None;
        }
        let ip = self.decode_poly_id_poly(reference);
        let header = tile.header.as_ref()?;
        tile.off_mesh_cons.get(ip - header.off_mesh_base)
    }

    /// Serializes the parameters and all loaded tiles to JSON.
    #[cfg(feature = "serialization")]
    pub fn to_json(&self) -> Result<String> {
        let data = NavMeshData {
            params: self.params.clone(),
            tiles: self.tiles().cloned().collect(),
        };
        Ok(serde_json::to_string_pretty(&data)?)
    }

    /// Rebuilds a navigation mesh from [`NavMesh::to_json`] output.
    ///
    /// Tiles are added again, so links are rebuilt and references change.
    #[cfg(feature = "serialization")]
    pub fn from_json(json: &str) -> Result<Self> {
        let data: NavMeshData = serde_json::from_str(json)?;
        let mut nav_mesh = NavMesh::new(data.params)?;
        for tile in data.tiles {
            nav_mesh.add_tile(tile)?;
        }
        Ok(nav_mesh)
    }

    /// Saves the navigation mesh to a file in JSON format
    #[cfg(feature = "serialization")]
    pub fn save_to_json<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Loads a navigation mesh from a JSON file
    #[cfg(feature = "serialization")]
    pub fn load_from_json<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_mesh_helpers::*;

    #[test]
    fn test_params_validation() {
        let mut params = grid_params(1);
        params.tile_width = 0.0;
        assert!(NavMesh::new(params).is_err());

        let mut params = grid_params(1);
        params.origin[1] = f32::NAN;
        assert!(NavMesh::new(params).is_err());

        // 2^12 tiles of 2^12 polygons leaves only 8 salt bits.
        let params = NavMeshParams {
            origin: [0.0; 3],
            tile_width: 1.0,
            tile_height: 1.0,
            max_tiles: 4096,
            max_polys_per_tile: 4096,
        };
        assert!(NavMesh::new(params).is_err());
    }

    #[test]
    fn test_poly_ref_encoding_roundtrip() -> Result<()> {
        let nav_mesh = NavMesh::new(NavMeshParams {
            origin: [0.0; 3],
            tile_width: 8.0,
            tile_height: 8.0,
            max_tiles: 16,
            max_polys_per_tile: 64,
        })?;
        let r = nav_mesh.encode_poly_id(5, 9, 37);
        assert_eq!(nav_mesh.decode_poly_id(r), (5, 9, 37));
        assert_eq!(nav_mesh.decode_poly_id_tile(r), 9);
        assert_eq!(nav_mesh.decode_poly_id_poly(r), 37);
        Ok(())
    }

    #[test]
    fn test_add_tile_links_grid() -> Result<()> {
        let nav_mesh = create_grid_navmesh(3, 3, 1.0)?;
        let tile = nav_mesh.tile(0).expect("tile loaded");
        assert_eq!(tile.polys.len(), 9);

        // The centre polygon touches four neighbours.
        let centre = &tile.polys[4];
        assert_eq!(tile.links_of(centre).count(), 4);
        // Links come out from the lowest edge up.
        let edges: Vec<u8> = tile.links_of(centre).map(|l| l.edge_index).collect();
        assert_eq!(edges, vec![0, 1, 2, 3]);

        // A corner polygon has two.
        assert_eq!(tile.links_of(&tile.polys[0]).count(), 2);
        Ok(())
    }

    #[test]
    fn test_stale_reference_rejected_after_remove() -> Result<()> {
        let mut nav_mesh = create_grid_navmesh(2, 1, 1.0)?;
        let tile_ref = nav_mesh.get_tile_ref(nav_mesh.tile(0).expect("tile"));
        let poly_ref = PolyRef::new(tile_ref.id() | 1);
        assert!(nav_mesh.is_valid_poly_ref(poly_ref));

        let data = nav_mesh.remove_tile(tile_ref)?;
        assert!(!nav_mesh.is_valid_poly_ref(poly_ref));
        assert!(nav_mesh.get_tile_and_poly_by_ref(poly_ref).is_err());
        assert!(nav_mesh.remove_tile(tile_ref).is_err());

        // Re-adding reuses the slot with a new salt.
        let new_ref = nav_mesh.add_tile(data)?;
        assert_ne!(new_ref, tile_ref);
        assert!(!nav_mesh.is_valid_poly_ref(poly_ref));
        assert!(nav_mesh.is_valid_poly_ref(PolyRef::new(new_ref.id() | 1)));
        Ok(())
    }

    #[test]
    fn test_tile_slot_occupied() -> Result<()> {
        let mut nav_mesh = NavMesh::new(grid_params(2))?;
        nav_mesh.add_tile(build_grid_tile(0, 0, 2, 2, 1.0, false)?)?;
        let err = nav_mesh.add_tile(build_grid_tile(0, 0, 2, 2, 1.0, false)?);
        assert!(matches!(err, Err(Error::TileOccupied { x: 0, y: 0, layer: 0 })));
        Ok(())
    }

    #[test]
    fn test_out_of_tile_slots() -> Result<()> {
        let mut nav_mesh = NavMesh::new(grid_params(1))?;
        nav_mesh.add_tile(build_grid_tile(0, 0, 2, 2, 1.0, false)?)?;
        let err = nav_mesh.add_tile(build_grid_tile(1, 0, 2, 2, 1.0, false)?);
        assert!(matches!(err, Err(Error::OutOfTiles(1))));
        Ok(())
    }

    #[test]
    fn test_tile_with_bad_bv_leaf_is_rejected() -> Result<()> {
        let mut tile = build_grid_tile(0, 0, 2, 2, 1.0, false)?;
        for node in tile.bv_tree.iter_mut().filter(|n| n.i >= 0) {
            node.i = 50;
        }
        let mut nav_mesh = NavMesh::new(grid_params(1))?;
        assert!(matches!(nav_mesh.add_tile(tile), Err(Error::InvalidTileData(_))));
        assert_eq!(nav_mesh.tiles().count(), 0);

        // The slot stays usable for a good tile.
        nav_mesh.add_tile(build_grid_tile(0, 0, 2, 2, 1.0, false)?)?;
        let mut polys = [PolyRef::NULL; 8];
        let query = crate::NavMeshQuery::new(&nav_mesh, 16)?;
        let found = query.query_polygons(
            &[1.0, 0.0, 1.0],
            &[2.0, 1.0, 2.0],
            &crate::DefaultQueryFilter::new(),
            &mut polys,
        )?;
        assert_eq!(found.value, 4);
        Ok(())
    }

    #[test]
    fn test_tile_with_bad_detail_triangle_is_rejected() -> Result<()> {
        let mut tile = build_grid_tile(0, 0, 2, 2, 1.0, false)?;
        let first = tile.detail_meshes[0].tri_base as usize;
        tile.detail_tris[first][2] = 9;
        let mut nav_mesh = NavMesh::new(grid_params(1))?;
        assert!(matches!(nav_mesh.add_tile(tile), Err(Error::InvalidTileData(_))));
        Ok(())
    }

    #[test]
    fn test_tile_with_bad_neighbour_is_rejected() -> Result<()> {
        let mut tile = build_grid_tile(0, 0, 2, 2, 1.0, false)?;
        tile.polys[0].neighbors[0] = 40;
        let mut nav_mesh = NavMesh::new(grid_params(1))?;
        assert!(matches!(nav_mesh.add_tile(tile), Err(Error::InvalidTileData(_))));
        Ok(())
    }

    #[test]
    fn test_tile_lookup() -> Result<()> {
        let nav_mesh = create_two_tile_navmesh()?;
        assert_eq!(nav_mesh.calc_tile_loc(&[1.0, 0.0, 1.0]), (0, 0));
        assert_eq!(nav_mesh.calc_tile_loc(&[5.0, 0.0, 1.0]), (1, 0));
        assert_eq!(nav_mesh.calc_tile_loc(&[-0.5, 0.0, 1.0]), (-1, 0));
        assert!(nav_mesh.get_tile_at(1, 0, 0).is_some());
        assert!(nav_mesh.get_tile_at(1, 0, 1).is_none());
        assert_eq!(nav_mesh.get_tiles_at(0, 0).count(), 1);
        assert_eq!(nav_mesh.tiles().count(), 2);
        Ok(())
    }

    #[test]
    fn test_poly_height_from_detail_mesh() -> Result<()> {
        let nav_mesh = create_sloped_navmesh()?;
        let tile = nav_mesh.tile(0).expect("tile");
        // The detail mesh rises linearly from y=0 at x=0 to y=1 at x=4.
        let h = nav_mesh
            .get_poly_height(tile, 0, &[2.0, 10.0, 2.0])
            .expect("inside polygon");
        assert!((h - 0.5).abs() < 1e-4);
        assert!(nav_mesh.get_poly_height(tile, 0, &[6.0, 0.0, 2.0]).is_none());
        Ok(())
    }

    #[test]
    fn test_closest_point_outside_clamps_to_boundary() -> Result<()> {
        let nav_mesh = create_grid_navmesh(1, 1, 2.0)?;
        let r = first_poly_ref(&nav_mesh);
        let (closest, over) = nav_mesh.closest_point_on_poly(r, &[3.0, 0.0, 1.0])?;
        assert!(!over);
        assert!((closest[0] - 2.0).abs() < 1e-5);
        assert!((closest[2] - 1.0).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_find_nearest_poly_in_tile_uses_bv_tree() -> Result<()> {
        let nav_mesh = create_grid_navmesh(4, 4, 1.0)?;
        let tile = nav_mesh.tile(0).expect("tile");
        assert!(!tile.bv_tree.is_empty());
        let (r, p) = nav_mesh
            .find_nearest_poly_in_tile(tile, &[2.5, 0.5, 1.5], &[0.2, 1.0, 0.2])
            .expect("polygon below point");
        assert_eq!(nav_mesh.decode_poly_id_poly(r), 1 * 4 + 2);
        assert!((p[1] - 0.0).abs() < 1e-5);
        Ok(())
    }

    #[cfg(feature = "serialization")]
    #[test]
    fn test_json_roundtrip_rebuilds_links() -> Result<()> {
        let nav_mesh = create_two_tile_navmesh()?;
        let json = nav_mesh.to_json()?;
        let restored = NavMesh::from_json(&json)?;
        assert_eq!(restored.tiles().count(), 2);
        let total_links = |m: &NavMesh| -> usize {
            m.tiles()
                .map(|t| t.polys.iter().map(|p| t.links_of(p).count()).sum::<usize>())
                .sum()
        };
        assert_eq!(total_links(&nav_mesh), total_links(&restored));
        Ok(())
    }
}

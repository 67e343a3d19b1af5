//! Mesh fixtures shared by the test suites
//!
//! Grids are made of unit square cells. Cell `(cx, cz)` becomes one
//! polygon with edges facing x-, z+, x+ and z- in that order, and kept
//! cells are numbered row by row.

use crate::{
    MeshTile, NavMesh, NavMeshBuilder, NavMeshCreateParams, NavMeshParams, OffMeshConnectionParams,
    PolyFlags, PolyRef, EXT_LINK, VERTS_PER_POLYGON,
};
use crate::nav_mesh_builder::MESH_NULL_IDX;
use navmesh_common::{point_in_polygon_2d, Error, Result};

/// Tile edge length used by the multi-tile fixtures.
pub const TILE_SIZE: f32 = 4.0;

/// Mesh parameters for `max_tiles` tiles of [`TILE_SIZE`].
pub fn grid_params(max_tiles: u32) -> NavMeshParams {
    NavMeshParams {
        origin: [0.0; 3],
        tile_width: TILE_SIZE,
        tile_height: TILE_SIZE,
        max_tiles,
        max_polys_per_tile: 64,
    }
}

/// Builder for one grid tile.
#[derive(Debug, Clone)]
pub struct GridTile {
    cols: usize,
    rows: usize,
    cell: f32,
    tile: (i32, i32),
    multi_tile: bool,
    blocked: Vec<(usize, usize)>,
    areas: Vec<((usize, usize), u8)>,
    flags: Vec<((usize, usize), PolyFlags)>,
    off_mesh: Vec<OffMeshConnectionParams>,
}

impl GridTile {
    pub fn new(cols: usize, rows: usize, cell: f32) -> Self {
        Self {
            cols,
            rows,
            cell,
            tile: (0, 0),
            multi_tile: false,
            blocked: Vec::new(),
            areas: Vec::new(),
            flags: Vec::new(),
            off_mesh: Vec::new(),
        }
    }

    /// Places the tile at a grid location and opens its border edges as
    /// portals.
    pub fn at(mut self, tx: i32, ty: i32) -> Self {
        self.tile = (tx, ty);
        self.multi_tile = true;
        self
    }

    /// Leaves cell `(cx, cz)` out of the mesh.
    pub fn block(mut self, cx: usize, cz: usize) -> Self {
        self.blocked.push((cx, cz));
        self
    }

    pub fn area(mut self, cx: usize, cz: usize, area: u8) -> Self {
        self.areas.push(((cx, cz), area));
        self
    }

    pub fn flags(mut self, cx: usize, cz: usize, flags: PolyFlags) -> Self {
        self.flags.push(((cx, cz), flags));
        self
    }

    pub fn off_mesh(mut self, con: OffMeshConnectionParams) -> Self {
        self.off_mesh.push(con);
        self
    }

    fn is_kept(&self, cx: usize, cz: usize) -> bool {
        !self.blocked.contains(&(cx, cz))
    }

    /// Polygon index of every cell, `None` for blocked cells.
    fn cell_indices(&self) -> Vec<Option<u16>> {
        let mut next = 0;
        let mut out = Vec::with_capacity(self.cols * self.rows);
        for cz in 0..self.rows {
            for cx in 0..self.cols {
                if self.is_kept(cx, cz) {
                    out.push(Some(next));
                    next += 1;
                } else {
                    out.push(None);
                }
            }
        }
        out
    }

    pub fn params(&self) -> NavMeshCreateParams {
        let (tx, ty) = self.tile;
        let width = self.cols as f32 * self.cell;
        let depth = self.rows as f32 * self.cell;
        let ox = tx as f32 * width;
        let oz = ty as f32 * depth;

        let mut verts = Vec::with_capacity((self.cols + 1) * (self.rows + 1));
        for z in 0..=self.rows {
            for x in 0..=self.cols {
                verts.push([ox + x as f32 * self.cell, 0.0, oz + z as f32 * self.cell]);
            }
        }
        let v = |x: usize, z: usize| (z * (self.cols + 1) + x) as u16;

        let indices = self.cell_indices();
        let index_of = |cx: isize, cz: isize| -> Option<Option<u16>> {
            if cx < 0 || cz < 0 || cx >= self.cols as isize || cz >= self.rows as isize {
                return None;
            }
            Some(indices[cz as usize * self.cols + cx as usize])
        };

        let mut polys = Vec::new();
        let mut poly_flags = Vec::new();
        let mut poly_areas = Vec::new();
        for cz in 0..self.rows {
            for cx in 0..self.cols {
                if !self.is_kept(cx, cz) {
                    continue;
                }
                let mut p = [MESH_NULL_IDX; VERTS_PER_POLYGON * 2];
                p[0] = v(cx, cz);
                p[1] = v(cx, cz + 1);
                p[2] = v(cx + 1, cz + 1);
                p[3] = v(cx + 1, cz);

                let (x, z) = (cx as isize, cz as isize);
                let sides = [(x - 1, z), (x, z + 1), (x + 1, z), (x, z - 1)];
                for (dir, &(nx, nz)) in sides.iter().enumerate() {
                    p[VERTS_PER_POLYGON + dir] = match index_of(nx, nz) {
                        Some(Some(idx)) => idx,
                        Some(None) => MESH_NULL_IDX,
                        None if self.multi_tile => EXT_LINK | dir as u16,
                        None => MESH_NULL_IDX,
                    };
                }
                polys.extend_from_slice(&p);

                let area = self
                    .areas
                    .iter()
                    .rev()
                    .find(|(c, _)| *c == (cx, cz))
                    .map_or(0, |&(_, a)| a);
                let flags = self
                    .flags
                    .iter()
                    .rev()
                    .find(|(c, _)| *c == (cx, cz))
                    .map_or(PolyFlags::WALK, |&(_, f)| f);
                poly_areas.push(area);
                poly_flags.push(flags);
            }
        }

        NavMeshCreateParams {
            verts,
            polys,
            poly_flags,
            poly_areas,
            nvp: VERTS_PER_POLYGON,
            off_mesh_connections: self.off_mesh.clone(),
            tile_x: tx,
            tile_y: ty,
            bmin: [ox, -1.0, oz],
            bmax: [ox + width, 1.0, oz + depth],
            cs: 0.1,
            ch: 0.1,
            ..NavMeshCreateParams::default()
        }
    }

    pub fn build(&self) -> Result<MeshTile> {
        NavMeshBuilder::build_tile(&self.params())
    }
}

/// A single tile grid of `cols` x `rows` cells sized to fit one tile.
pub fn create_grid_navmesh(cols: usize, rows: usize, cell: f32) -> Result<NavMesh> {
    create_navmesh_from(&GridTile::new(cols, rows, cell))
}

/// A single tile mesh from a grid builder.
pub fn create_navmesh_from(grid: &GridTile) -> Result<NavMesh> {
    let params = NavMeshParams {
        origin: [0.0; 3],
        tile_width: grid.cols as f32 * grid.cell,
        tile_height: grid.rows as f32 * grid.cell,
        max_tiles: 1,
        max_polys_per_tile: (grid.cols * grid.rows + grid.off_mesh.len()).next_power_of_two() as u32,
    };
    let mut nav_mesh = NavMesh::new(params)?;
    nav_mesh.add_tile(grid.build()?)?;
    Ok(nav_mesh)
}

/// One grid tile at `(tx, ty)`. With `multi_tile` its border edges are
/// portals to neighbouring tiles.
pub fn build_grid_tile(tx: i32, ty: i32, cols: usize, rows: usize, cell: f32, multi_tile: bool) -> Result<MeshTile> {
    let mut grid = GridTile::new(cols, rows, cell).at(tx, ty);
    grid.multi_tile = multi_tile;
    grid.build()
}

/// Two 4x4 grid tiles side by side along x, at tiles (0, 0) and (1, 0).
pub fn create_two_tile_navmesh() -> Result<NavMesh> {
    let mut nav_mesh = NavMesh::new(grid_params(4))?;
    nav_mesh.add_tile(build_grid_tile(0, 0, 4, 4, 1.0, true)?)?;
    nav_mesh.add_tile(build_grid_tile(1, 0, 4, 4, 1.0, true)?)?;
    Ok(nav_mesh)
}

/// One 4x4 quad rising from y=0 at x=0 to y=1 at x=4.
pub fn create_sloped_navmesh() -> Result<NavMesh> {
    let mut polys = vec![MESH_NULL_IDX; VERTS_PER_POLYGON * 2];
    polys[..4].copy_from_slice(&[0, 1, 2, 3]);
    let params = NavMeshCreateParams {
        verts: vec![
            [0.0, 0.0, 0.0],
            [0.0, 0.0, 4.0],
            [4.0, 1.0, 4.0],
            [4.0, 1.0, 0.0],
        ],
        polys,
        poly_flags: vec![PolyFlags::WALK],
        poly_areas: vec![0],
        bmin: [0.0, -1.0, 0.0],
        bmax: [4.0, 2.0, 4.0],
        cs: 0.1,
        ch: 0.1,
        ..NavMeshCreateParams::default()
    };
    let mut nav_mesh = NavMesh::new(NavMeshParams {
        origin: [0.0; 3],
        tile_width: 4.0,
        tile_height: 4.0,
        max_tiles: 1,
        max_polys_per_tile: 4,
    })?;
    nav_mesh.add_tile(NavMeshBuilder::build_tile(&params)?)?;
    Ok(nav_mesh)
}

/// A row of unit-deep rectangles along x with the given widths, each
/// connected to the next.
pub fn create_strip_navmesh(widths: &[f32]) -> Result<NavMesh> {
    let mut verts = Vec::new();
    let mut x = 0.0;
    verts.push([x, 0.0, 0.0]);
    verts.push([x, 0.0, 1.0]);
    for w in widths {
        x += w;
        verts.push([x, 0.0, 0.0]);
        verts.push([x, 0.0, 1.0]);
    }

    let mut polys = Vec::new();
    for i in 0..widths.len() {
        let mut p = [MESH_NULL_IDX; VERTS_PER_POLYGON * 2];
        let b = (i * 2) as u16;
        p[..4].copy_from_slice(&[b, b + 1, b + 3, b + 2]);
        if i > 0 {
            p[VERTS_PER_POLYGON] = (i - 1) as u16;
        }
        if i + 1 < widths.len() {
            p[VERTS_PER_POLYGON + 2] = (i + 1) as u16;
        }
        polys.extend_from_slice(&p);
    }

    let params = NavMeshCreateParams {
        verts,
        polys,
        poly_flags: vec![PolyFlags::WALK; widths.len()],
        poly_areas: vec![0; widths.len()],
        bmin: [0.0, -1.0, 0.0],
        bmax: [x, 1.0, 1.0],
        cs: 0.1,
        ch: 0.1,
        ..NavMeshCreateParams::default()
    };
    let mut nav_mesh = NavMesh::new(NavMeshParams {
        origin: [0.0; 3],
        tile_width: x.max(1.0),
        tile_height: x.max(1.0),
        max_tiles: 1,
        max_polys_per_tile: widths.len().next_power_of_two() as u32,
    })?;
    nav_mesh.add_tile(NavMeshBuilder::build_tile(&params)?)?;
    Ok(nav_mesh)
}

/// Reference of polygon 0 in the first loaded tile.
pub fn first_poly_ref(nav_mesh: &NavMesh) -> PolyRef {
    nav_mesh
        .tiles()
        .next()
        .map_or(PolyRef::NULL, |t| nav_mesh.get_poly_ref_base(t))
}

/// Ground polygon whose footprint contains `(x, z)`.
pub fn poly_at(nav_mesh: &NavMesh, x: f32, z: f32) -> Result<PolyRef> {
    let pt = [x, 0.0, z];
    for tile in nav_mesh.tiles() {
        let base = nav_mesh.get_poly_ref_base(tile).id();
        for (i, poly) in tile.polys.iter().enumerate() {
            if poly.is_off_mesh_connection() {
                continue;
            }
            let (verts, nv) = tile.poly_vertices(poly);
            if point_in_polygon_2d(&pt, &verts[..nv]) {
                return Ok(PolyRef::new(base | i as u32));
            }
        }
    }
    Err(Error::Query(format!("no polygon at ({x}, {z})")))
}

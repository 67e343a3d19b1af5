//! Command line tool for building demo meshes and running navigation queries

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use glam::Vec3;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use navmesh_query::{
    DefaultQueryFilter, NavMesh, NavMeshBuilder, NavMeshCreateParams, NavMeshParams, NavMeshQuery, PolyFlags,
    PolyRef, RaycastOptions, StraightPathFlags, StraightPathOptions, StraightPathPoint, VERTS_PER_POLYGON,
};

const NULL_IDX: u16 = 0xffff;
const MAX_PATH: usize = 1024;

/// Builds and queries tiled navigation meshes
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Node budget for path searches
    #[clap(long, global = true, default_value = "2048")]
    max_nodes: usize,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a flat grid navigation mesh as JSON
    Grid {
        /// Output navigation mesh file
        #[clap(long, value_parser)]
        output: PathBuf,

        /// Cells along x per tile
        #[clap(long, default_value = "16")]
        cols: usize,

        /// Cells along z per tile
        #[clap(long, default_value = "16")]
        rows: usize,

        /// Cell edge length
        #[clap(long, default_value = "1.0")]
        cell: f32,

        /// Tiles along x
        #[clap(long, default_value = "1")]
        tiles_x: i32,

        /// Tiles along z
        #[clap(long, default_value = "1")]
        tiles_z: i32,

        /// Cells to leave out, as "x,z" per cell across the whole grid
        #[clap(long = "block", value_parser = parse_cell)]
        blocked: Vec<(usize, usize)>,
    },

    /// Find a corridor and straight path between two points
    FindPath {
        /// Input navigation mesh file
        #[clap(long, value_parser)]
        mesh: PathBuf,

        /// Start position (x,y,z)
        #[clap(long, value_parser = parse_vector)]
        start: Vec3,

        /// End position (x,y,z)
        #[clap(long, value_parser = parse_vector)]
        end: Vec3,

        /// Add a vertex at every polygon edge crossing
        #[clap(long)]
        all_crossings: bool,

        /// Output path file (JSON)
        #[clap(long, value_parser)]
        output: Option<PathBuf>,
    },

    /// Cast a ray along the mesh surface
    Raycast {
        /// Input navigation mesh file
        #[clap(long, value_parser)]
        mesh: PathBuf,

        /// Ray start (x,y,z)
        #[clap(long, value_parser = parse_vector)]
        start: Vec3,

        /// Ray end (x,y,z)
        #[clap(long, value_parser = parse_vector)]
        end: Vec3,
    },

    /// Sample random points on the mesh
    RandomPoint {
        /// Input navigation mesh file
        #[clap(long, value_parser)]
        mesh: PathBuf,

        /// Number of points
        #[clap(long, default_value = "1")]
        count: usize,

        /// Seed for the random generator
        #[clap(long, default_value = "0")]
        seed: u64,

        /// Only sample around this point (x,y,z)
        #[clap(long, value_parser = parse_vector)]
        around: Option<Vec3>,

        /// Radius used with --around
        #[clap(long, default_value = "5.0")]
        radius: f32,
    },
}

/// Parse a comma-separated vector
fn parse_vector(s: &str) -> Result<Vec3, String> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 3 {
        return Err(format!("Vector must have 3 components, got {}", parts.len()));
    }

    let x = parts[0].trim().parse::<f32>().map_err(|e| e.to_string())?;
    let y = parts[1].trim().parse::<f32>().map_err(|e| e.to_string())?;
    let z = parts[2].trim().parse::<f32>().map_err(|e| e.to_string())?;
    Ok(Vec3::new(x, y, z))
}

/// Parse an "x,z" cell coordinate
fn parse_cell(s: &str) -> Result<(usize, usize), String> {
    let (x, z) = s
        .split_once(',')
        .ok_or_else(|| format!("Cell must be given as x,z, got {s}"))?;
    let x = x.trim().parse::<usize>().map_err(|e| e.to_string())?;
    let z = z.trim().parse::<usize>().map_err(|e| e.to_string())?;
    Ok((x, z))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Commands::Grid {
            output,
            cols,
            rows,
            cell,
            tiles_x,
            tiles_z,
            blocked,
        } => write_grid(&output, cols, rows, cell, tiles_x, tiles_z, &blocked),
        Commands::FindPath {
            mesh,
            start,
            end,
            all_crossings,
            output,
        } => find_path(&mesh, args.max_nodes, start, end, all_crossings, output.as_deref()),
        Commands::Raycast { mesh, start, end } => raycast(&mesh, args.max_nodes, start, end),
        Commands::RandomPoint {
            mesh,
            count,
            seed,
            around,
            radius,
        } => random_points(&mesh, args.max_nodes, count, seed, around, radius),
    }
}

fn load_mesh(path: &Path) -> Result<NavMesh> {
    log::info!("Loading navigation mesh from {}", path.display());
    let nav_mesh = NavMesh::load_from_json(path)
        .with_context(|| format!("Failed to load navigation mesh from {}", path.display()))?;
    log::info!("Loaded {} tiles", nav_mesh.tiles().count());
    Ok(nav_mesh)
}

/// Tile creation parameters for one grid tile.
///
/// Border edges are tile portals so neighbouring tiles link up.
fn grid_tile_params(
    tx: i32,
    tz: i32,
    cols: usize,
    rows: usize,
    cell: f32,
    is_blocked: &dyn Fn(usize, usize) -> bool,
) -> NavMeshCreateParams {
    let ox = tx as f32 * cols as f32 * cell;
    let oz = tz as f32 * rows as f32 * cell;
    let gx = tx as usize * cols;
    let gz = tz as usize * rows;

    let mut verts = Vec::with_capacity((cols + 1) * (rows + 1));
    for z in 0..=rows {
        for x in 0..=cols {
            verts.push([ox + x as f32 * cell, 0.0, oz + z as f32 * cell]);
        }
    }
    let v = |x: usize, z: usize| (z * (cols + 1) + x) as u16;

    let mut index = vec![None; cols * rows];
    let mut next = 0u16;
    for z in 0..rows {
        for x in 0..cols {
            if !is_blocked(gx + x, gz + z) {
                index[z * cols + x] = Some(next);
                next += 1;
            }
        }
    }
    let neighbour = |x: isize, z: isize, dir: u16| -> u16 {
        if x < 0 || z < 0 || x >= cols as isize || z >= rows as isize {
            return 0x8000 | dir;
        }
        index[z as usize * cols + x as usize].unwrap_or(NULL_IDX)
    };

    let mut polys = Vec::new();
    for z in 0..rows {
        for x in 0..cols {
            if index[z * cols + x].is_none() {
                continue;
            }
            let mut p = [NULL_IDX; VERTS_PER_POLYGON * 2];
            p[..4].copy_from_slice(&[v(x, z), v(x, z + 1), v(x + 1, z + 1), v(x + 1, z)]);
            let (xi, zi) = (x as isize, z as isize);
            p[VERTS_PER_POLYGON] = neighbour(xi - 1, zi, 0);
            p[VERTS_PER_POLYGON + 1] = neighbour(xi, zi + 1, 1);
            p[VERTS_PER_POLYGON + 2] = neighbour(xi + 1, zi, 2);
            p[VERTS_PER_POLYGON + 3] = neighbour(xi, zi - 1, 3);
            polys.extend_from_slice(&p);
        }
    }

    let count = next as usize;
    NavMeshCreateParams {
        verts,
        polys,
        poly_flags: vec![PolyFlags::WALK; count],
        poly_areas: vec![0; count],
        tile_x: tx,
        tile_y: tz,
        bmin: [ox, -1.0, oz],
        bmax: [ox + cols as f32 * cell, 1.0, oz + rows as f32 * cell],
        cs: cell * 0.1,
        ch: 0.1,
        ..NavMeshCreateParams::default()
    }
}

/// Build a grid mesh and save it as JSON
fn write_grid(
    output: &Path,
    cols: usize,
    rows: usize,
    cell: f32,
    tiles_x: i32,
    tiles_z: i32,
    blocked: &[(usize, usize)],
) -> Result<()> {
    if cols == 0 || rows == 0 || tiles_x <= 0 || tiles_z <= 0 || cell <= 0.0 {
        bail!("Grid dimensions must be positive");
    }

    let params = NavMeshParams {
        origin: [0.0; 3],
        tile_width: cols as f32 * cell,
        tile_height: rows as f32 * cell,
        max_tiles: (tiles_x * tiles_z) as u32,
        max_polys_per_tile: (cols * rows).next_power_of_two() as u32,
    };
    let mut nav_mesh = NavMesh::new(params).map_err(|e| anyhow!("Invalid mesh parameters: {e}"))?;

    let is_blocked = |x: usize, z: usize| blocked.contains(&(x, z));
    for tz in 0..tiles_z {
        for tx in 0..tiles_x {
            let create = grid_tile_params(tx, tz, cols, rows, cell, &is_blocked);
            let tile = NavMeshBuilder::build_tile(&create)
                .with_context(|| format!("Failed to build tile ({tx}, {tz})"))?;
            nav_mesh
                .add_tile(tile)
                .with_context(|| format!("Failed to add tile ({tx}, {tz})"))?;
        }
    }

    nav_mesh
        .save_to_json(output)
        .with_context(|| format!("Failed to save navigation mesh to {}", output.display()))?;
    log::info!(
        "Saved {}x{} tiles of {}x{} cells to {}",
        tiles_x,
        tiles_z,
        cols,
        rows,
        output.display()
    );
    Ok(())
}

/// Nearest polygon to a position, or an error naming what was looked up.
fn nearest(query: &NavMeshQuery<'_>, pos: Vec3, what: &str) -> Result<(PolyRef, [f32; 3])> {
    let filter = DefaultQueryFilter::new();
    let extents = [2.0, 4.0, 2.0];
    let found = query
        .find_nearest_poly(&pos.to_array(), &extents, &filter)
        .map_err(|s| anyhow!("Failed to find {what} polygon: {s}"))?;
    if !found.poly_ref.is_valid() {
        bail!("No polygon near the {what} position {pos}");
    }
    Ok((found.poly_ref, found.point))
}

/// Find a path on a navigation mesh
fn find_path(
    mesh_path: &Path,
    max_nodes: usize,
    start: Vec3,
    end: Vec3,
    all_crossings: bool,
    output: Option<&Path>,
) -> Result<()> {
    let nav_mesh = load_mesh(mesh_path)?;
    let mut query =
        NavMeshQuery::new(&nav_mesh, max_nodes).map_err(|s| anyhow!("Failed to create query: {s}"))?;
    let filter = DefaultQueryFilter::new();

    let (start_ref, start_pos) = nearest(&query, start, "start")?;
    let (end_ref, end_pos) = nearest(&query, end, "end")?;
    log::info!("Start polygon {start_ref}, end polygon {end_ref}");

    let mut path = vec![PolyRef::NULL; MAX_PATH];
    let corridor = query
        .find_path(start_ref, end_ref, &start_pos, &end_pos, &filter, &mut path)
        .map_err(|s| anyhow!("Failed to find path: {s}"))?;
    if corridor.is_partial() {
        log::warn!("End is not reachable, path leads to the closest polygon");
    }
    log::info!("Found path with {} polygons ({})", corridor.value, corridor.status);

    let options = if all_crossings {
        StraightPathOptions::ALL_CROSSINGS
    } else {
        StraightPathOptions::empty()
    };
    let mut points = vec![StraightPathPoint::default(); MAX_PATH];
    let straight = query
        .find_straight_path(&start_pos, &end_pos, &path[..corridor.value], &mut points, options)
        .map_err(|s| anyhow!("Failed to find straight path: {s}"))?;
    let points = &points[..straight.value];
    log::info!("Generated straight path with {} waypoints", points.len());

    match output {
        Some(output_path) => {
            let waypoints: Vec<serde_json::Value> = points
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "pos": p.pos,
                        "poly": p.poly.id(),
                        "offmesh": p.flags.contains(StraightPathFlags::OFFMESH_CONNECTION),
                    })
                })
                .collect();
            let doc = serde_json::json!({
                "partial": corridor.is_partial(),
                "corridor": path[..corridor.value].iter().map(|r| r.id()).collect::<Vec<_>>(),
                "waypoints": waypoints,
            });
            let mut file = File::create(output_path)
                .with_context(|| format!("Failed to create output file: {}", output_path.display()))?;
            writeln!(file, "{}", serde_json::to_string_pretty(&doc)?)?;
            log::info!("Saved path to {}", output_path.display());
        }
        None => {
            println!("Path:");
            for (i, p) in points.iter().enumerate() {
                println!("{}: {},{},{} {:?}", i, p.pos[0], p.pos[1], p.pos[2], p.flags);
            }
        }
    }
    Ok(())
}

/// Cast a ray and report where it stops
fn raycast(mesh_path: &Path, max_nodes: usize, start: Vec3, end: Vec3) -> Result<()> {
    let nav_mesh = load_mesh(mesh_path)?;
    let query = NavMeshQuery::new(&nav_mesh, max_nodes).map_err(|s| anyhow!("Failed to create query: {s}"))?;
    let filter = DefaultQueryFilter::new();

    let (start_ref, start_pos) = nearest(&query, start, "start")?;
    let end_pos = end.to_array();
    let mut visited = vec![PolyRef::NULL; MAX_PATH];
    let result = query
        .raycast(
            start_ref,
            &start_pos,
            &end_pos,
            &filter,
            RaycastOptions::empty(),
            PolyRef::NULL,
            &mut visited,
        )
        .map_err(|s| anyhow!("Raycast failed: {s}"))?;
    let hit = result.value;

    let point = NavMeshQuery::raycast_hit_point(&start_pos, &end_pos, &hit);
    if hit.hit_wall() {
        println!(
            "Hit wall at t={:.3}: {},{},{} normal {:?}",
            hit.t, point[0], point[1], point[2], hit.hit_normal
        );
    } else {
        println!("Reached {},{},{}", point[0], point[1], point[2]);
    }
    println!("Visited {} polygons", hit.path_count);
    Ok(())
}

/// Print random points on the mesh
fn random_points(
    mesh_path: &Path,
    max_nodes: usize,
    count: usize,
    seed: u64,
    around: Option<Vec3>,
    radius: f32,
) -> Result<()> {
    let nav_mesh = load_mesh(mesh_path)?;
    let mut query =
        NavMeshQuery::new(&nav_mesh, max_nodes).map_err(|s| anyhow!("Failed to create query: {s}"))?;
    let filter = DefaultQueryFilter::new();
    let mut rng = fastrand::Rng::with_seed(seed);

    let center = match around {
        Some(pos) => Some(nearest(&query, pos, "center")?),
        None => None,
    };

    for i in 0..count {
        let sample = match center {
            Some((center_ref, center_pos)) => {
                query
                    .find_random_point_around_circle(center_ref, &center_pos, radius, &filter, || rng.f32())
                    .map_err(|s| anyhow!("Sampling failed: {s}"))?
                    .value
            }
            None => query
                .find_random_point(&filter, || rng.f32())
                .map_err(|s| anyhow!("Sampling failed: {s}"))?,
        };
        let p = sample.point;
        println!("{}: {},{},{} in {}", i, p[0], p[1], p[2], sample.poly_ref);
    }
    Ok(())
}

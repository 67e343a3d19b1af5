use criterion::{black_box, criterion_group, criterion_main, Criterion};
use navmesh_query::{
    DefaultQueryFilter, FindPathOptions, NavMesh, NavMeshBuilder, NavMeshCreateParams, NavMeshParams,
    NavMeshQuery, PolyFlags, PolyRef, RaycastOptions, StraightPathOptions, StraightPathPoint, VERTS_PER_POLYGON,
};

const NULL_IDX: u16 = 0xffff;

/// Single tile grid of unit cells with every fourth column walled off
/// except for one gap, so paths have to weave.
fn maze_mesh(size: usize) -> NavMesh {
    let blocked = |x: usize, z: usize| x % 4 == 2 && z != (x * 7) % size;

    let mut verts = Vec::with_capacity((size + 1) * (size + 1));
    for z in 0..=size {
        for x in 0..=size {
            verts.push([x as f32, 0.0, z as f32]);
        }
    }
    let v = |x: usize, z: usize| (z * (size + 1) + x) as u16;

    let mut index = vec![None; size * size];
    let mut next = 0u16;
    for z in 0..size {
        for x in 0..size {
            if !blocked(x, z) {
                index[z * size + x] = Some(next);
                next += 1;
            }
        }
    }
    let at = |x: isize, z: isize| -> u16 {
        if x < 0 || z < 0 || x >= size as isize || z >= size as isize {
            return NULL_IDX;
        }
        index[z as usize * size + x as usize].unwrap_or(NULL_IDX)
    };

    let mut polys = Vec::new();
    for z in 0..size {
        for x in 0..size {
            if blocked(x, z) {
                continue;
            }
            let mut p = [NULL_IDX; VERTS_PER_POLYGON * 2];
            p[..4].copy_from_slice(&[v(x, z), v(x, z + 1), v(x + 1, z + 1), v(x + 1, z)]);
            let (xi, zi) = (x as isize, z as isize);
            p[VERTS_PER_POLYGON] = at(xi - 1, zi);
            p[VERTS_PER_POLYGON + 1] = at(xi, zi + 1);
            p[VERTS_PER_POLYGON + 2] = at(xi + 1, zi);
            p[VERTS_PER_POLYGON + 3] = at(xi, zi - 1);
            polys.extend_from_slice(&p);
        }
    }

    let count = next as usize;
    let params = NavMeshCreateParams {
        verts,
        polys,
        poly_flags: vec![PolyFlags::WALK; count],
        poly_areas: vec![0; count],
        bmin: [0.0, -1.0, 0.0],
        bmax: [size as f32, 1.0, size as f32],
        cs: 0.1,
        ch: 0.1,
        build_bv_tree: true,
        ..NavMeshCreateParams::default()
    };
    let mut nav_mesh = NavMesh::new(NavMeshParams {
        origin: [0.0; 3],
        tile_width: size as f32,
        tile_height: size as f32,
        max_tiles: 1,
        max_polys_per_tile: count.next_power_of_two() as u32,
    })
    .expect("mesh params");
    nav_mesh
        .add_tile(NavMeshBuilder::build_tile(&params).expect("tile"))
        .expect("add tile");
    nav_mesh
}

fn bench_queries(c: &mut Criterion) {
    let nav_mesh = maze_mesh(48);
    let filter = DefaultQueryFilter::new();
    let mut query = NavMeshQuery::new(&nav_mesh, 4096).expect("query");

    let start = [0.5, 0.0, 0.5];
    let end = [47.5, 0.0, 47.5];
    let extents = [0.5, 1.0, 0.5];
    let start_ref = query.find_nearest_poly(&start, &extents, &filter).expect("start").poly_ref;
    let end_ref = query.find_nearest_poly(&end, &extents, &filter).expect("end").poly_ref;

    let mut path = vec![PolyRef::NULL; 1024];
    let mut group = c.benchmark_group("navmesh-query");

    group.bench_function("find_path", |b| {
        b.iter(|| {
            let result = query
                .find_path(start_ref, end_ref, &start, &end, &filter, &mut path)
                .expect("path");
            black_box(result.value);
        })
    });

    group.bench_function("sliced_find_path", |b| {
        b.iter(|| {
            let mut status = query
                .init_sliced_find_path(start_ref, end_ref, &start, &end, &filter, FindPathOptions::empty())
                .expect("init");
            while status.is_in_progress() {
                status = query.update_sliced_find_path(64).expect("update").status;
            }
            let result = query.finalize_sliced_find_path(&mut path).expect("finalize");
            black_box(result.value);
        })
    });

    let n = query
        .find_path(start_ref, end_ref, &start, &end, &filter, &mut path)
        .expect("path")
        .value;
    let mut corners = vec![StraightPathPoint::default(); 256];
    group.bench_function("find_straight_path", |b| {
        b.iter(|| {
            let result = query
                .find_straight_path(&start, &end, &path[..n], &mut corners, StraightPathOptions::empty())
                .expect("straight path");
            black_box(result.value);
        })
    });

    let mut visited = [PolyRef::NULL; 64];
    group.bench_function("raycast", |b| {
        b.iter(|| {
            let hit = query
                .raycast(
                    start_ref,
                    &start,
                    &[1.5, 0.0, 40.0],
                    &filter,
                    RaycastOptions::empty(),
                    PolyRef::NULL,
                    &mut visited,
                )
                .expect("raycast");
            black_box(hit.value.t);
        })
    });

    group.finish();
}

criterion_group!(benches, bench_queries);
criterion_main!(benches);

//! Random sampling tests

#[cfg(test)]
mod tests {
    use crate::test_mesh_helpers::*;
    use crate::{DefaultQueryFilter, NavMeshQuery, PolyFlags, Status};
    use navmesh_common::Result;

    #[test]
    fn test_sampling_is_area_weighted() -> Result<()> {
        // A 10x1 polygon next to a 1x1 polygon.
        let nav_mesh = create_strip_navmesh(&[10.0, 1.0])?;
        let query = NavMeshQuery::new(&nav_mesh, 16)?;
        let filter = DefaultQueryFilter::new();
        let big = poly_at(&nav_mesh, 5.0, 0.5)?;

        let mut rng = fastrand::Rng::with_seed(7);
        let draws = 2000;
        let mut in_big = 0;
        for _ in 0..draws {
            let sample = query.find_random_point(&filter, || rng.f32())?;
            let p = sample.point;
            assert!((0.0..=11.0).contains(&p[0]) && (0.0..=1.0).contains(&p[2]));
            if sample.poly_ref == big {
                assert!(p[0] <= 10.0 + 1e-4);
                in_big += 1;
            }
        }
        let ratio = in_big as f32 / draws as f32;
        assert!((0.86..0.96).contains(&ratio), "big polygon ratio {ratio}");
        Ok(())
    }

    #[test]
    fn test_same_seed_same_point() -> Result<()> {
        let nav_mesh = create_grid_navmesh(4, 4, 1.0)?;
        let query = NavMeshQuery::new(&nav_mesh, 16)?;
        let filter = DefaultQueryFilter::new();

        let mut a = fastrand::Rng::with_seed(42);
        let mut b = fastrand::Rng::with_seed(42);
        let first = query.find_random_point(&filter, || a.f32())?;
        let second = query.find_random_point(&filter, || b.f32())?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn test_nothing_passes_the_filter() -> Result<()> {
        let nav_mesh = create_grid_navmesh(2, 2, 1.0)?;
        let query = NavMeshQuery::new(&nav_mesh, 16)?;
        let mut filter = DefaultQueryFilter::new();
        filter.set_include_flags(PolyFlags::SWIM);

        let mut rng = fastrand::Rng::with_seed(1);
        assert_eq!(query.find_random_point(&filter, || rng.f32()), Err(Status::FAILURE));
        Ok(())
    }

    #[test]
    fn test_point_around_circle_stays_in_reach() -> Result<()> {
        let nav_mesh = create_grid_navmesh(5, 5, 1.0)?;
        let mut query = NavMeshQuery::new(&nav_mesh, 64)?;
        let filter = DefaultQueryFilter::new();
        let center = [2.5, 0.0, 2.5];
        let start_ref = poly_at(&nav_mesh, 2.5, 2.5)?;

        let mut rng = fastrand::Rng::with_seed(3);
        for _ in 0..200 {
            let sample = query
                .find_random_point_around_circle(start_ref, &center, 0.6, &filter, || rng.f32())?
                .value;
            // Only the center cell and its four neighbours are in reach.
            let p = sample.point;
            let dx = (p[0] - 2.5).abs();
            let dz = (p[2] - 2.5).abs();
            assert!(dx <= 1.5 + 1e-4 && dz <= 1.5 + 1e-4);
            assert!(dx <= 0.5 + 1e-4 || dz <= 0.5 + 1e-4, "diagonal cell sampled at {p:?}");
        }
        Ok(())
    }

    #[test]
    fn test_point_around_circle_with_blocked_start() -> Result<()> {
        let grid = GridTile::new(3, 3, 1.0).flags(1, 1, PolyFlags::DISABLED);
        let nav_mesh = create_navmesh_from(&grid)?;
        let mut query = NavMeshQuery::new(&nav_mesh, 64)?;
        let mut filter = DefaultQueryFilter::new();
        filter.set_exclude_flags(PolyFlags::DISABLED);
        let start_ref = poly_at(&nav_mesh, 1.5, 1.5)?;

        let mut rng = fastrand::Rng::with_seed(5);
        let result = query.find_random_point_around_circle(start_ref, &[1.5, 0.0, 1.5], 1.0, &filter, || rng.f32());
        assert_eq!(result, Err(Status::invalid_param()));
        Ok(())
    }
}

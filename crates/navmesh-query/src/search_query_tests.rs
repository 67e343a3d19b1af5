//! Dijkstra expansion and wall distance tests

#[cfg(test)]
mod tests {
    use crate::test_mesh_helpers::*;
    use crate::{DefaultQueryFilter, NavMeshQuery, PolyFlags, PolyRef, Status};
    use approx::assert_relative_eq;
    use navmesh_common::Result;

    const CENTER: [f32; 3] = [2.5, 0.0, 2.5];

    #[test]
    fn test_circle_reaches_adjacent_cells() -> Result<()> {
        let nav_mesh = create_grid_navmesh(5, 5, 1.0)?;
        let mut query = NavMeshQuery::new(&nav_mesh, 128)?;
        let filter = DefaultQueryFilter::new();
        let start_ref = poly_at(&nav_mesh, 2.5, 2.5)?;

        let mut refs = [PolyRef::NULL; 32];
        let mut parents = [PolyRef::NULL; 32];
        let mut costs = [0.0f32; 32];
        let result = query.find_polys_around_circle(
            start_ref,
            &CENTER,
            0.6,
            &filter,
            &mut refs,
            Some(&mut parents),
            Some(&mut costs),
        )?;
        assert_eq!(result.status, Status::SUCCESS);
        assert_eq!(result.value, 5);

        assert_eq!(refs[0], start_ref);
        assert_eq!(parents[0], PolyRef::NULL);
        assert_eq!(costs[0], 0.0);
        for i in 1..5 {
            assert_eq!(parents[i], start_ref);
            assert_relative_eq!(costs[i], 0.5, epsilon = 1e-5);
        }
        let side = poly_at(&nav_mesh, 3.5, 2.5)?;
        assert!(refs[..5].contains(&side));
        Ok(())
    }

    #[test]
    fn test_circle_results_come_in_cost_order() -> Result<()> {
        let nav_mesh = create_grid_navmesh(5, 5, 1.0)?;
        let mut query = NavMeshQuery::new(&nav_mesh, 128)?;
        let filter = DefaultQueryFilter::new();
        let start_ref = poly_at(&nav_mesh, 2.5, 2.5)?;

        let mut refs = [PolyRef::NULL; 32];
        let mut costs = [0.0f32; 32];
        let result =
            query.find_polys_around_circle(start_ref, &CENTER, 0.75, &filter, &mut refs, None, Some(&mut costs))?;
        // The diagonal cells are reached through the corner portals.
        assert_eq!(result.value, 9);
        assert!(costs[..9].windows(2).all(|w| w[0] <= w[1]));

        let corner = poly_at(&nav_mesh, 3.5, 3.5)?;
        let mut path = [PolyRef::NULL; 8];
        let back = query.get_path_from_dijkstra_search(corner, &mut path)?;
        assert_eq!(back.value, 3);
        assert_eq!(path[0], start_ref);
        assert_eq!(path[2], corner);

        // Never reached by the search.
        let far = poly_at(&nav_mesh, 0.5, 0.5)?;
        assert_eq!(
            query.get_path_from_dijkstra_search(far, &mut path),
            Err(Status::invalid_param())
        );
        Ok(())
    }

    #[test]
    fn test_circle_with_short_buffer_still_completes() -> Result<()> {
        let nav_mesh = create_grid_navmesh(5, 5, 1.0)?;
        let mut query = NavMeshQuery::new(&nav_mesh, 128)?;
        let filter = DefaultQueryFilter::new();
        let start_ref = poly_at(&nav_mesh, 2.5, 2.5)?;

        let mut refs = [PolyRef::NULL; 2];
        let result = query.find_polys_around_circle(start_ref, &CENTER, 0.6, &filter, &mut refs, None, None)?;
        assert_eq!(result.value, 2);
        assert!(result.status.has_detail(Status::BUFFER_TOO_SMALL));

        // All reached polygons are still closed.
        let side = poly_at(&nav_mesh, 1.5, 2.5)?;
        assert!(query.is_in_closed_list(side));
        Ok(())
    }

    #[test]
    fn test_circle_respects_filter() -> Result<()> {
        let grid = GridTile::new(5, 5, 1.0).flags(3, 2, PolyFlags::WALK | PolyFlags::DISABLED);
        let nav_mesh = create_navmesh_from(&grid)?;
        let mut query = NavMeshQuery::new(&nav_mesh, 128)?;
        let mut filter = DefaultQueryFilter::new();
        filter.set_exclude_flags(PolyFlags::DISABLED);
        let start_ref = poly_at(&nav_mesh, 2.5, 2.5)?;

        let mut refs = [PolyRef::NULL; 32];
        let result = query.find_polys_around_circle(start_ref, &CENTER, 0.6, &filter, &mut refs, None, None)?;
        assert_eq!(result.value, 4);
        assert!(!refs[..4].contains(&poly_at(&nav_mesh, 3.5, 2.5)?));
        Ok(())
    }

    #[test]
    fn test_shape_expansion() -> Result<()> {
        let nav_mesh = create_grid_navmesh(5, 5, 1.0)?;
        let mut query = NavMeshQuery::new(&nav_mesh, 128)?;
        let filter = DefaultQueryFilter::new();
        let start_ref = poly_at(&nav_mesh, 2.5, 2.5)?;

        // Inside the start cell only.
        let small = [[2.1, 0.0, 2.1], [2.1, 0.0, 2.9], [2.9, 0.0, 2.9], [2.9, 0.0, 2.1]];
        let mut refs = [PolyRef::NULL; 16];
        let result = query.find_polys_around_shape(start_ref, &small, &filter, &mut refs, None, None)?;
        assert_eq!(result.value, 1);
        assert_eq!(refs[0], start_ref);

        // Stretching over the x+ portal.
        let wide = [[2.1, 0.0, 2.1], [2.1, 0.0, 2.9], [3.9, 0.0, 2.9], [3.9, 0.0, 2.1]];
        let mut parents = [PolyRef::NULL; 16];
        let result =
            query.find_polys_around_shape(start_ref, &wide, &filter, &mut refs, Some(&mut parents), None)?;
        assert_eq!(result.value, 2);
        assert_eq!(refs[1], poly_at(&nav_mesh, 3.5, 2.5)?);
        assert_eq!(parents[1], start_ref);
        Ok(())
    }

    #[test]
    fn test_distance_to_nearest_wall() -> Result<()> {
        let nav_mesh = create_grid_navmesh(5, 5, 1.0)?;
        let mut query = NavMeshQuery::new(&nav_mesh, 128)?;
        let filter = DefaultQueryFilter::new();
        let center = [2.5, 0.0, 0.7];
        let start_ref = poly_at(&nav_mesh, center[0], center[2])?;

        let hit = query.find_distance_to_wall(start_ref, &center, 5.0, &filter)?;
        assert!(hit.status.is_success());
        assert_relative_eq!(hit.value.distance, 0.7, epsilon = 1e-5);
        assert_relative_eq!(hit.value.position[0], 2.5, epsilon = 1e-5);
        assert_relative_eq!(hit.value.position[2], 0.0, epsilon = 1e-5);
        // Normal points from the wall towards the center.
        assert_relative_eq!(hit.value.normal[2], 1.0, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn test_no_wall_within_radius() -> Result<()> {
        let nav_mesh = create_grid_navmesh(5, 5, 1.0)?;
        let mut query = NavMeshQuery::new(&nav_mesh, 128)?;
        let filter = DefaultQueryFilter::new();
        let start_ref = poly_at(&nav_mesh, 2.5, 2.5)?;

        let hit = query.find_distance_to_wall(start_ref, &CENTER, 1.0, &filter)?.value;
        assert_relative_eq!(hit.distance, 1.0, epsilon = 1e-6);
        assert_eq!(hit.position, CENTER);
        assert_eq!(hit.normal, [0.0; 3]);
        Ok(())
    }

    #[test]
    fn test_filtered_neighbour_counts_as_wall() -> Result<()> {
        let grid = GridTile::new(5, 5, 1.0).flags(3, 2, PolyFlags::SWIM);
        let nav_mesh = create_navmesh_from(&grid)?;
        let mut query = NavMeshQuery::new(&nav_mesh, 128)?;
        let mut filter = DefaultQueryFilter::new();
        filter.set_include_flags(PolyFlags::WALK);
        let start_ref = poly_at(&nav_mesh, 2.5, 2.5)?;

        let hit = query.find_distance_to_wall(start_ref, &[2.8, 0.0, 2.5], 5.0, &filter)?.value;
        assert_relative_eq!(hit.distance, 0.2, epsilon = 1e-5);
        assert_relative_eq!(hit.position[0], 3.0, epsilon = 1e-5);
        assert_relative_eq!(hit.normal[0], -1.0, epsilon = 1e-5);
        Ok(())
    }
}

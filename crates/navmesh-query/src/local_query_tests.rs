//! Local neighbourhood, surface movement and wall segment tests

#[cfg(test)]
mod tests {
    use crate::test_mesh_helpers::*;
    use crate::{DefaultQueryFilter, NavMeshQuery, PolyFlags, PolyRef, Status};
    use approx::assert_relative_eq;
    use navmesh_common::Result;

    #[test]
    fn test_local_neighbourhood_of_center_cell() -> Result<()> {
        let nav_mesh = create_grid_navmesh(5, 5, 1.0)?;
        let mut query = NavMeshQuery::new(&nav_mesh, 64)?;
        let filter = DefaultQueryFilter::new();
        let start_ref = poly_at(&nav_mesh, 2.5, 2.5)?;

        let mut refs = [PolyRef::NULL; 16];
        let mut parents = [PolyRef::NULL; 16];
        let result = query.find_local_neighbourhood(
            start_ref,
            &[2.5, 0.0, 2.5],
            0.6,
            &filter,
            &mut refs,
            Some(&mut parents),
        )?;
        assert_eq!(result.status, Status::SUCCESS);
        assert_eq!(result.value, 5);
        assert_eq!(refs[0], start_ref);
        assert_eq!(parents[0], PolyRef::NULL);
        assert!(parents[1..5].iter().all(|&p| p == start_ref));

        // Touching corners do not count as overlap.
        let result =
            query.find_local_neighbourhood(start_ref, &[2.5, 0.0, 2.5], 0.75, &filter, &mut refs, None)?;
        assert_eq!(result.value, 9);
        Ok(())
    }

    #[test]
    fn test_local_neighbourhood_output_limits() -> Result<()> {
        let nav_mesh = create_grid_navmesh(5, 5, 1.0)?;
        let mut query = NavMeshQuery::new(&nav_mesh, 64)?;
        let filter = DefaultQueryFilter::new();
        let start_ref = poly_at(&nav_mesh, 2.5, 2.5)?;

        let mut refs = [PolyRef::NULL; 3];
        let result = query.find_local_neighbourhood(start_ref, &[2.5, 0.0, 2.5], 0.6, &filter, &mut refs, None)?;
        assert_eq!(result.value, 3);
        assert!(result.status.has_detail(Status::BUFFER_TOO_SMALL));

        let result = query.find_local_neighbourhood(start_ref, &[2.5, 0.0, 2.5], 0.6, &filter, &mut [], None)?;
        assert_eq!(result.value, 0);
        assert!(result.status.has_detail(Status::BUFFER_TOO_SMALL));
        Ok(())
    }

    #[test]
    fn test_move_to_reachable_point() -> Result<()> {
        let nav_mesh = create_grid_navmesh(5, 5, 1.0)?;
        let mut query = NavMeshQuery::new(&nav_mesh, 64)?;
        let filter = DefaultQueryFilter::new();
        let start_ref = poly_at(&nav_mesh, 0.5, 0.5)?;

        let mut visited = [PolyRef::NULL; 8];
        let result =
            query.move_along_surface(start_ref, &[0.5, 0.0, 0.5], &[1.5, 0.0, 0.5], &filter, &mut visited)?;
        let moved = result.value;
        assert_eq!(result.status, Status::SUCCESS);
        assert_relative_eq!(moved.position[0], 1.5, epsilon = 1e-5);
        assert_relative_eq!(moved.position[2], 0.5, epsilon = 1e-5);
        assert_eq!(moved.visited_count, 2);
        assert_eq!(visited[0], start_ref);
        assert_eq!(visited[1], poly_at(&nav_mesh, 1.5, 0.5)?);
        Ok(())
    }

    #[test]
    fn test_move_stops_at_wall() -> Result<()> {
        let nav_mesh = create_grid_navmesh(5, 5, 1.0)?;
        let mut query = NavMeshQuery::new(&nav_mesh, 64)?;
        let filter = DefaultQueryFilter::new();
        let start_ref = poly_at(&nav_mesh, 0.5, 0.5)?;

        let mut visited = [PolyRef::NULL; 8];
        let moved = query
            .move_along_surface(start_ref, &[0.5, 0.0, 0.5], &[-1.0, 0.0, 0.5], &filter, &mut visited)?
            .value;
        assert_relative_eq!(moved.position[0], 0.0, epsilon = 1e-5);
        assert_relative_eq!(moved.position[2], 0.5, epsilon = 1e-5);
        assert_eq!(moved.visited_count, 1);
        assert_eq!(visited[0], start_ref);
        Ok(())
    }

    #[test]
    fn test_move_slides_along_wall() -> Result<()> {
        let nav_mesh = create_grid_navmesh(5, 5, 1.0)?;
        let mut query = NavMeshQuery::new(&nav_mesh, 64)?;
        let filter = DefaultQueryFilter::new();
        let start_ref = poly_at(&nav_mesh, 0.5, 0.5)?;

        let mut visited = [PolyRef::NULL; 8];
        let moved = query
            .move_along_surface(start_ref, &[0.5, 0.0, 0.5], &[1.5, 0.0, -1.0], &filter, &mut visited)?
            .value;
        // The closest point to the target on the z- wall of the next cell.
        assert_relative_eq!(moved.position[0], 1.5, epsilon = 1e-5);
        assert_relative_eq!(moved.position[2], 0.0, epsilon = 1e-5);
        assert_eq!(visited[moved.visited_count - 1], poly_at(&nav_mesh, 1.5, 0.5)?);
        Ok(())
    }

    #[test]
    fn test_move_does_not_enter_filtered_polygon() -> Result<()> {
        let grid = GridTile::new(3, 1, 1.0).flags(1, 0, PolyFlags::SWIM);
        let nav_mesh = create_navmesh_from(&grid)?;
        let mut query = NavMeshQuery::new(&nav_mesh, 64)?;
        let mut filter = DefaultQueryFilter::new();
        filter.set_include_flags(PolyFlags::WALK);
        let start_ref = poly_at(&nav_mesh, 0.5, 0.5)?;

        let mut visited = [PolyRef::NULL; 8];
        let moved = query
            .move_along_surface(start_ref, &[0.5, 0.0, 0.5], &[1.5, 0.0, 0.5], &filter, &mut visited)?
            .value;
        assert_relative_eq!(moved.position[0], 1.0, epsilon = 1e-5);
        assert_eq!(moved.visited_count, 1);
        Ok(())
    }

    #[test]
    fn test_wall_segments_of_corner_cell() -> Result<()> {
        let nav_mesh = create_grid_navmesh(3, 3, 1.0)?;
        let query = NavMeshQuery::new(&nav_mesh, 16)?;
        let filter = DefaultQueryFilter::new();
        let corner = poly_at(&nav_mesh, 0.5, 0.5)?;

        let mut segments = [[[0.0f32; 3]; 2]; 8];
        let walls = query.get_poly_wall_segments(corner, &filter, &mut segments, None)?;
        assert_eq!(walls.value, 2);
        // Edge 0 faces x-.
        assert_eq!(segments[0], [[0.0, 0.0, 0.0], [0.0, 0.0, 1.0]]);
        assert_eq!(segments[1], [[1.0, 0.0, 0.0], [0.0, 0.0, 0.0]]);

        let mut refs = [PolyRef::NULL; 8];
        let all = query.get_poly_wall_segments(corner, &filter, &mut segments, Some(&mut refs))?;
        assert_eq!(all.value, 4);
        assert_eq!(refs[0], PolyRef::NULL);
        assert_eq!(refs[1], poly_at(&nav_mesh, 0.5, 1.5)?);
        assert_eq!(refs[2], poly_at(&nav_mesh, 1.5, 0.5)?);
        assert_eq!(refs[3], PolyRef::NULL);
        Ok(())
    }

    #[test]
    fn test_wall_segments_output_limit() -> Result<()> {
        let nav_mesh = create_grid_navmesh(1, 1, 1.0)?;
        let query = NavMeshQuery::new(&nav_mesh, 16)?;
        let filter = DefaultQueryFilter::new();
        let only = first_poly_ref(&nav_mesh);

        let mut segments = [[[0.0f32; 3]; 2]; 2];
        let result = query.get_poly_wall_segments(only, &filter, &mut segments, None)?;
        assert_eq!(result.value, 2);
        assert!(result.status.has_detail(Status::BUFFER_TOO_SMALL));
        Ok(())
    }
}

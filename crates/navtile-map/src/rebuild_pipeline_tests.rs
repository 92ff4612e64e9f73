//! End-to-end tests of the rebuild pipeline and obstacle ingestion.

use std::collections::HashMap;
use std::sync::Arc;

use glam::Vec3;
use navtile_build::{CompactHeightfield, Contour, ContourSet, Heightfield, MeshSettings, PolyMesh};
use navtile_common::{Aabb, Error, AREA_DOODAD, AREA_TERRAIN, POLY_FLAG_WALKABLE};

use crate::model::{DoodadModel, ModelKind, ModelLoader, ModelSource, ModelStore};
use crate::rebuild::{payload_from_contours, rebuild_tile};
use crate::registry::NavMeshRegistry;
use crate::tile::Tile;
use crate::{Map, Orientation};

fn test_settings() -> MeshSettings {
    MeshSettings {
        cell_size: 0.5,
        cell_height: 0.5,
        walkable_slope: 50.0,
        voxel_walkable_climb: 4,
        voxel_walkable_height: 4,
        voxel_walkable_radius: 1,
        max_simplification_error: 1.3,
        min_region_size: 2,
        merge_region_size: 10,
        vertices_per_polygon: 6,
        tile_voxel_size: 16,
        detail_sample_distance: 2.0,
        detail_sample_max_error: 0.5,
    }
}

/// World bounds of tile (0, 0) and the mesh-space heightfield covering the
/// tile plus its border.
fn tile_setup(settings: &MeshSettings) -> (Aabb, Heightfield) {
    let cs = settings.cell_size;
    let border_world = settings.border_size() as f32 * cs;
    let tile_world = settings.tile_world_size();
    let field = settings.field_size();

    let bounds = Aabb::new(
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(tile_world, tile_world, 20.0),
    );
    let heightfield = Heightfield::new(
        field,
        field,
        Vec3::new(-border_world, 0.0, -tile_world - border_world),
        Vec3::new(tile_world + border_world, 20.0, border_world),
        cs,
        settings.cell_height,
    );
    (bounds, heightfield)
}

fn fill_terrain(hf: &mut Heightfield, smin: i32, smax: i32) {
    for z in 0..hf.height {
        for x in 0..hf.width {
            hf.add_span(x, z, smin, smax, AREA_TERRAIN, 1).unwrap();
        }
    }
}

/// Axis-aligned box with its base on z=0 in model space.
fn box_model(hx: f32, hy: f32, height: f32) -> DoodadModel {
    let v = |x: f32, y: f32, z: f32| Vec3::new(x, y, z);
    DoodadModel::new(
        vec![
            v(-hx, -hy, 0.0),
            v(hx, -hy, 0.0),
            v(hx, hy, 0.0),
            v(-hx, hy, 0.0),
            v(-hx, -hy, height),
            v(hx, -hy, height),
            v(hx, hy, height),
            v(-hx, hy, height),
        ],
        vec![
            4, 5, 6, 4, 6, 7, // top
            0, 2, 1, 0, 3, 2, // bottom
            0, 1, 5, 0, 5, 4, // sides
            1, 2, 6, 1, 6, 5, //
            2, 3, 7, 2, 7, 6, //
            3, 0, 4, 3, 4, 7, //
        ],
    )
    .unwrap()
}

struct FixedLoader {
    model: DoodadModel,
}

impl ModelLoader for FixedLoader {
    fn load(&self, _path: &str) -> navtile_common::Result<DoodadModel> {
        Ok(self.model.clone())
    }
}

fn test_store(model: DoodadModel) -> Arc<ModelStore> {
    let mut sources = HashMap::new();
    sources.insert(
        1,
        ModelSource {
            kind: ModelKind::Doodad,
            path: "doodad/crate.m2".to_string(),
        },
    );
    sources.insert(
        2,
        ModelSource {
            kind: ModelKind::WorldObject,
            path: "wmo/keep.wmo".to_string(),
        },
    );
    Arc::new(ModelStore::new(Box::new(FixedLoader { model }), sources))
}

#[test]
fn empty_tile_is_a_no_op() {
    let settings = test_settings();
    let (bounds, hf) = tile_setup(&settings);

    let payload = rebuild_tile(&settings, 0, 0, &hf).unwrap();
    assert!(payload.is_none());

    let registry = NavMeshRegistry::new();
    let mut tile = Tile::new(0, 0, bounds, hf);
    tile.activate(&settings, &registry).unwrap();
    assert!(tile.tile_ref().is_none());
    assert_eq!(registry.tile_count(), 0);
}

#[test]
fn flat_terrain_builds_walkable_terrain_polygons() {
    let settings = test_settings();
    let (_, mut hf) = tile_setup(&settings);
    fill_terrain(&mut hf, 10, 11);

    // Stage-level view of the same tile
    let mut chf =
        CompactHeightfield::build(&hf, settings.voxel_walkable_height, i32::MAX).unwrap();
    chf.enforce_walkable_climb(settings.voxel_walkable_climb);
    chf.build_distance_field();
    chf.build_regions(
        settings.border_size(),
        settings.min_region_size,
        settings.merge_region_size,
    )
    .unwrap();
    let cset = ContourSet::build(
        &chf,
        settings.max_simplification_error,
        settings.max_edge_len(),
    )
    .unwrap();
    let mut pmesh = PolyMesh::build(&cset, settings.vertices_per_polygon as usize).unwrap();
    pmesh.update_walkable_flags();

    assert!(pmesh.npolys >= 1);
    for p in 0..pmesh.npolys {
        assert_eq!(pmesh.areas[p], AREA_TERRAIN);
        assert_eq!(pmesh.flags[p], POLY_FLAG_WALKABLE | AREA_TERRAIN as u16);
    }

    let payload = rebuild_tile(&settings, 0, 0, &hf).unwrap().expect("payload");
    let header = payload.header().unwrap();
    assert!(header.poly_count >= 1);
    assert_eq!(header.layer, 0);
}

#[test]
fn terrain_cliff_stays_connected_across_the_climb_limit() {
    let settings = test_settings();
    let (_, mut hf) = tile_setup(&settings);

    // Two terrain shelves 20 voxels apart, five times the walkable climb
    for z in 0..hf.height {
        for x in 0..hf.width {
            let top = if x < hf.width / 2 { 10 } else { 30 };
            hf.add_span(x, z, 0, top, AREA_TERRAIN, 1).unwrap();
        }
    }

    let mut chf =
        CompactHeightfield::build(&hf, settings.voxel_walkable_height, i32::MAX).unwrap();
    chf.enforce_walkable_climb(settings.voxel_walkable_climb);

    // The link across the cliff survives because both sides are terrain
    let mut found_cliff_link = false;
    for z in 0..chf.height {
        for x in 0..chf.width {
            let cell = chf.cells[(x + z * chf.width) as usize];
            for i in cell.index..cell.index + cell.count {
                let span = chf.spans[i as usize];
                for dir in 0..4 {
                    if let Some(ni) = chf.neighbor_index(x, z, &span, dir) {
                        if (chf.spans[ni].y - span.y).abs() == 20 {
                            assert_eq!(chf.areas[i as usize], AREA_TERRAIN);
                            assert_eq!(chf.areas[ni], AREA_TERRAIN);
                            found_cliff_link = true;
                        }
                    }
                }
            }
        }
    }
    assert!(found_cliff_link, "terrain cliff lost its connection");

    let payload = rebuild_tile(&settings, 0, 0, &hf).unwrap().expect("payload");
    assert!(payload.header().unwrap().poly_count >= 2);
}

#[test]
fn doodad_occludes_terrain_and_replaces_the_tile() {
    let settings = test_settings();
    let registry = Arc::new(NavMeshRegistry::new());
    // 5 voxels tall, 2x2 world units footprint
    let store = test_store(box_model(1.0, 1.0, 2.5));

    let (bounds, mut hf) = tile_setup(&settings);
    fill_terrain(&mut hf, 10, 11);

    let mut tile = Tile::new(0, 0, bounds, hf);
    tile.activate(&settings, &registry).unwrap();
    let ref_before = tile.tile_ref().expect("baseline tile ref");
    let payload_before = registry.lookup(0, 0).expect("baseline payload");

    let mut map = Map::new(settings.clone(), store, registry.clone()).unwrap();
    map.insert_tile(tile);

    // Terrain top sits at world z = 5.5; drop the crate in the tile center
    map.add_game_object(
        7,
        1,
        Vec3::new(4.0, 4.0, 5.5),
        Orientation::RotationZ(0.0),
        -1,
    )
    .unwrap();

    // (b) the registry slot was replaced
    let payload_after = registry.lookup(0, 0).expect("rebuilt payload");
    assert!(!Arc::ptr_eq(&payload_before, &payload_after));
    assert_ne!(payload_before.as_ref(), payload_after.as_ref());
    map.with_tile(0, 0, |tile| {
        assert_ne!(tile.tile_ref().expect("live ref"), ref_before);
        assert_eq!(tile.obstacle_count(), 1);
    })
    .unwrap();

    // (a, c) the obstacle occludes the terrain beneath it and every
    // surviving link still satisfies the selective climb rule
    map.with_tile(0, 0, |tile| {
        let mut chf =
            CompactHeightfield::build(tile.heightfield(), settings.voxel_walkable_height, i32::MAX)
                .unwrap();
        chf.enforce_walkable_climb(settings.voxel_walkable_climb);

        // Column under the crate center: world (4, 4) -> cell (12, 12)
        let center = chf.cells[(12 + 12 * chf.width) as usize];
        assert_eq!(center.count, 1);
        let span = chf.spans[center.index as usize];
        assert_eq!(chf.areas[center.index as usize], AREA_DOODAD);
        assert_eq!(span.y, 16);

        // No terrain remains anywhere in the footprint
        for z in 10..14 {
            for x in 10..14 {
                let cell = chf.cells[(x + z * chf.width) as usize];
                for i in cell.index..cell.index + cell.count {
                    assert_ne!(chf.areas[i as usize], AREA_TERRAIN);
                }
            }
        }

        for z in 0..chf.height {
            for x in 0..chf.width {
                let cell = chf.cells[(x + z * chf.width) as usize];
                for i in cell.index..cell.index + cell.count {
                    let span = chf.spans[i as usize];
                    for dir in 0..4 {
                        if let Some(ni) = chf.neighbor_index(x, z, &span, dir) {
                            let dy = (chf.spans[ni].y - span.y).abs();
                            let both_terrain = chf.areas[i as usize] == AREA_TERRAIN
                                && chf.areas[ni] == AREA_TERRAIN;
                            assert!(
                                dy <= settings.voxel_walkable_climb || both_terrain,
                                "link violates the selective climb rule"
                            );
                        }
                    }
                }
            }
        }
    })
    .unwrap();
}

#[test]
fn duplicate_guid_is_rejected_without_mutation() {
    let settings = test_settings();
    let registry = Arc::new(NavMeshRegistry::new());
    let store = test_store(box_model(0.5, 0.5, 1.0));

    let (bounds, mut hf) = tile_setup(&settings);
    fill_terrain(&mut hf, 10, 11);
    let mut tile = Tile::new(0, 0, bounds, hf);
    tile.activate(&settings, &registry).unwrap();

    let mut map = Map::new(settings.clone(), store, registry.clone()).unwrap();
    map.insert_tile(tile);

    map.add_game_object(
        42,
        1,
        Vec3::new(2.0, 2.0, 5.5),
        Orientation::RotationZ(0.0),
        -1,
    )
    .unwrap();
    let payload_first = registry.lookup(0, 0).expect("payload after first add");

    let err = map
        .add_game_object(
            42,
            1,
            Vec3::new(6.0, 6.0, 5.5),
            Orientation::RotationZ(1.0),
            -1,
        )
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateGuid(42)));

    // No second rebuild, no extra obstacle
    assert_eq!(map.obstacle_count(), 1);
    let payload_after = registry.lookup(0, 0).expect("payload unchanged");
    assert!(Arc::ptr_eq(&payload_first, &payload_after));
    map.with_tile(0, 0, |tile| assert_eq!(tile.obstacle_count(), 1)).unwrap();
}

#[test]
fn world_structures_are_refused() {
    let settings = test_settings();
    let registry = Arc::new(NavMeshRegistry::new());
    let store = test_store(box_model(0.5, 0.5, 1.0));
    let map = Map::new(settings, store, registry).unwrap();

    let err = map
        .add_game_object(1, 2, Vec3::ZERO, Orientation::RotationZ(0.0), 0)
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedObstacleKind(_)));
    assert_eq!(map.obstacle_count(), 0);
}

#[test]
fn unknown_display_id_is_an_error() {
    let settings = test_settings();
    let registry = Arc::new(NavMeshRegistry::new());
    let store = test_store(box_model(0.5, 0.5, 1.0));
    let map = Map::new(settings, store, registry).unwrap();

    let err = map
        .add_game_object(1, 99, Vec3::ZERO, Orientation::RotationZ(0.0), 0)
        .unwrap_err();
    assert!(matches!(err, Error::ModelNotFound(99)));
}

#[test]
fn vertex_overflow_fails_with_too_many_verts() {
    let settings = test_settings();
    let (_, mut hf) = tile_setup(&settings);
    fill_terrain(&mut hf, 10, 11);
    let chf = CompactHeightfield::build(&hf, settings.voxel_walkable_height, i32::MAX).unwrap();

    // Synthetic contour set exceeding the 16-bit vertex budget
    let verts: Vec<[i32; 4]> = (0..70_000)
        .map(|i| [i % 256, 10, i / 256, 0])
        .collect();
    let cset = ContourSet {
        contours: vec![Contour {
            verts,
            rverts: Vec::new(),
            reg: 1,
            area: AREA_TERRAIN,
        }],
        bmin: hf.bmin,
        bmax: hf.bmax,
        cs: hf.cs,
        ch: hf.ch,
        width: settings.tile_voxel_size,
        height: settings.tile_voxel_size,
        border_size: settings.border_size(),
        max_error: settings.max_simplification_error,
    };

    let err = payload_from_contours(&settings, 3, 4, &chf, &cset).unwrap_err();
    assert!(matches!(
        err,
        Error::TooManyVertices { tile_x: 3, tile_y: 4 }
    ));
}

#[test]
fn rebuild_is_deterministic() {
    let settings = test_settings();
    let (_, mut hf) = tile_setup(&settings);
    for z in 0..hf.height {
        for x in 0..hf.width {
            let top = 10 + (x + z) % 3;
            hf.add_span(x, z, 0, top, AREA_TERRAIN, 1).unwrap();
        }
    }

    let a = rebuild_tile(&settings, 5, 6, &hf).unwrap().expect("payload");
    let b = rebuild_tile(&settings, 5, 6, &hf).unwrap().expect("payload");
    assert_eq!(a.as_bytes(), b.as_bytes());
}

#[test]
fn reapplying_an_obstacle_to_a_snapshot_reproduces_the_payload() {
    let settings = test_settings();
    let store = test_store(box_model(1.0, 1.0, 2.5));
    let source = store.source(1).unwrap();
    let model = store.load_doodad(&source.path).unwrap();

    let (bounds, mut hf) = tile_setup(&settings);
    fill_terrain(&mut hf, 10, 11);
    let snapshot = hf.clone();

    let transform = navtile_common::RigidTransform::from_position_rotation_z(
        Vec3::new(4.0, 4.0, 5.5),
        0.0,
    );
    let instance =
        Arc::new(crate::model::ObstacleInstance::new(9, &model, transform).unwrap());

    let run = |heightfield: Heightfield| {
        let registry = NavMeshRegistry::new();
        let mut tile = Tile::new(0, 0, bounds, heightfield);
        tile.apply_obstacle(&settings, 9, instance.clone(), &registry)
            .unwrap();
        registry.lookup(0, 0).expect("payload").as_ref().to_vec()
    };

    let first = run(snapshot.clone());
    let second = run(snapshot.clone());
    assert_eq!(first, second);

    // The apply itself mutates the heightfield: the terrain span under the
    // obstacle grew to the crate top
    let registry = NavMeshRegistry::new();
    let mut tile = Tile::new(0, 0, bounds, snapshot.clone());
    tile.apply_obstacle(&settings, 9, instance, &registry).unwrap();
    let center_before = snapshot.span(snapshot.column_head(12, 12).unwrap()).smax;
    let center_after = tile
        .heightfield()
        .span(tile.heightfield().column_head(12, 12).unwrap())
        .smax;
    assert_eq!(center_before, 11);
    assert_eq!(center_after, 16);
}

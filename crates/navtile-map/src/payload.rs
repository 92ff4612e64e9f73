//! Binary tile payload written for the pathfinding consumer.
//!
//! The layout is little-endian and fixed: a header, quantized vertices,
//! polygon vertex/neighbor tables, per-polygon flags and areas, the detail
//! mesh arrays and a bounding-volume tree over the polygons. Serialization is
//! a pure function of its inputs, so identical meshes produce identical
//! bytes.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use navtile_build::{MeshSettings, PolyMesh, PolyMeshDetail};
use navtile_common::{Error, Result};

/// Magic number for tile payloads ('NAVT' in little-endian)
pub const TILE_MAGIC: u32 = 0x5456_414e;
/// Current payload version
pub const TILE_VERSION: u32 = 1;

/// Serialized navigation data for one tile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilePayload {
    data: Vec<u8>,
}

impl TilePayload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Parses and validates the payload header.
    pub fn header(&self) -> Result<TileHeader> {
        TileHeader::read(&self.data)
    }
}

/// Fixed-size header at the start of every payload
#[derive(Debug, Clone, PartialEq)]
pub struct TileHeader {
    pub tile_x: i32,
    pub tile_y: i32,
    pub layer: i32,
    pub poly_count: i32,
    pub vert_count: i32,
    /// Vertex slots per polygon in the polygon table
    pub nvp: i32,
    pub max_link_count: i32,
    pub detail_mesh_count: i32,
    pub detail_vert_count: i32,
    pub detail_tri_count: i32,
    pub bv_node_count: i32,
    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
    pub bmin: [f32; 3],
    pub bmax: [f32; 3],
    pub cs: f32,
    pub ch: f32,
    pub bv_quant_factor: f32,
}

impl TileHeader {
    fn read(data: &[u8]) -> Result<Self> {
        let mut r = Cursor::new(data);

        let magic = r.read_u32::<LittleEndian>()?;
        if magic != TILE_MAGIC {
            return Err(Error::InvalidMesh(format!(
                "bad tile payload magic: {magic:#x}"
            )));
        }
        let version = r.read_u32::<LittleEndian>()?;
        if version != TILE_VERSION {
            return Err(Error::InvalidMesh(format!(
                "unsupported tile payload version: {version}"
            )));
        }

        let read_vec3 = |r: &mut Cursor<&[u8]>| -> Result<[f32; 3]> {
            Ok([
                r.read_f32::<LittleEndian>()?,
                r.read_f32::<LittleEndian>()?,
                r.read_f32::<LittleEndian>()?,
            ])
        };

        Ok(Self {
            tile_x: r.read_i32::<LittleEndian>()?,
            tile_y: r.read_i32::<LittleEndian>()?,
            layer: r.read_i32::<LittleEndian>()?,
            poly_count: r.read_i32::<LittleEndian>()?,
            vert_count: r.read_i32::<LittleEndian>()?,
            nvp: r.read_i32::<LittleEndian>()?,
            max_link_count: r.read_i32::<LittleEndian>()?,
            detail_mesh_count: r.read_i32::<LittleEndian>()?,
            detail_vert_count: r.read_i32::<LittleEndian>()?,
            detail_tri_count: r.read_i32::<LittleEndian>()?,
            bv_node_count: r.read_i32::<LittleEndian>()?,
            walkable_height: r.read_f32::<LittleEndian>()?,
            walkable_radius: r.read_f32::<LittleEndian>()?,
            walkable_climb: r.read_f32::<LittleEndian>()?,
            bmin: read_vec3(&mut r)?,
            bmax: read_vec3(&mut r)?,
            cs: r.read_f32::<LittleEndian>()?,
            ch: r.read_f32::<LittleEndian>()?,
            bv_quant_factor: r.read_f32::<LittleEndian>()?,
        })
    }
}

/// Inputs for building one tile payload
pub struct TileBuildParams<'a> {
    pub tile_x: i32,
    pub tile_y: i32,
    pub poly_mesh: &'a PolyMesh,
    pub detail_mesh: &'a PolyMeshDetail,
    pub settings: &'a MeshSettings,
}

/// Node of the quantized bounding-volume tree
struct BvNode {
    bmin: [u16; 3],
    bmax: [u16; 3],
    /// Polygon index for leaves, negative escape index for internal nodes
    i: i32,
}

/// Serializes a finished mesh pair into the consumer's tile format.
pub fn create_tile_data(params: &TileBuildParams) -> Result<TilePayload> {
    let pmesh = params.poly_mesh;
    let dmesh = params.detail_mesh;
    let settings = params.settings;

    if pmesh.nverts >= 0xffff {
        return Err(Error::TooManyVertices {
            tile_x: params.tile_x,
            tile_y: params.tile_y,
        });
    }
    if pmesh.npolys == 0 {
        return Err(Error::InvalidMesh("tile payload without polygons".to_string()));
    }

    let bv_nodes = build_bv_tree(pmesh);
    let max_link_count = count_max_links(pmesh);

    let mut data = Vec::new();

    data.write_u32::<LittleEndian>(TILE_MAGIC)?;
    data.write_u32::<LittleEndian>(TILE_VERSION)?;
    data.write_i32::<LittleEndian>(params.tile_x)?;
    data.write_i32::<LittleEndian>(params.tile_y)?;
    data.write_i32::<LittleEndian>(0)?; // layer
    data.write_i32::<LittleEndian>(pmesh.npolys as i32)?;
    data.write_i32::<LittleEndian>(pmesh.nverts as i32)?;
    data.write_i32::<LittleEndian>(pmesh.nvp as i32)?;
    data.write_i32::<LittleEndian>(max_link_count)?;
    data.write_i32::<LittleEndian>(dmesh.meshes.len() as i32)?;
    data.write_i32::<LittleEndian>((dmesh.verts.len() / 3) as i32)?;
    data.write_i32::<LittleEndian>((dmesh.tris.len() / 4) as i32)?;
    data.write_i32::<LittleEndian>(bv_nodes.len() as i32)?;
    data.write_f32::<LittleEndian>(settings.walkable_height_world())?;
    data.write_f32::<LittleEndian>(settings.walkable_radius_world())?;
    data.write_f32::<LittleEndian>(settings.walkable_climb_world())?;
    for v in [pmesh.bmin, pmesh.bmax] {
        data.write_f32::<LittleEndian>(v.x)?;
        data.write_f32::<LittleEndian>(v.y)?;
        data.write_f32::<LittleEndian>(v.z)?;
    }
    data.write_f32::<LittleEndian>(pmesh.cs)?;
    data.write_f32::<LittleEndian>(pmesh.ch)?;
    data.write_f32::<LittleEndian>(1.0 / pmesh.cs)?;

    for &v in &pmesh.verts {
        data.write_u16::<LittleEndian>(v)?;
    }
    for &p in &pmesh.polys {
        data.write_u16::<LittleEndian>(p)?;
    }
    for &f in &pmesh.flags {
        data.write_u16::<LittleEndian>(f)?;
    }
    for &a in &pmesh.areas {
        data.write_u8(a)?;
    }

    for m in &dmesh.meshes {
        for &value in m {
            data.write_u32::<LittleEndian>(value)?;
        }
    }
    for &v in &dmesh.verts {
        data.write_f32::<LittleEndian>(v)?;
    }
    for &t in &dmesh.tris {
        data.write_u8(t)?;
    }

    for node in &bv_nodes {
        for &b in &node.bmin {
            data.write_u16::<LittleEndian>(b)?;
        }
        for &b in &node.bmax {
            data.write_u16::<LittleEndian>(b)?;
        }
        data.write_i32::<LittleEndian>(node.i)?;
    }

    Ok(TilePayload { data })
}

/// Link capacity the consumer must reserve: one per polygon edge, plus two
/// per portal edge for the cross-tile links.
fn count_max_links(pmesh: &PolyMesh) -> i32 {
    let nvp = pmesh.nvp;
    let mut edge_count = 0i32;
    let mut portal_count = 0i32;

    for p in 0..pmesh.npolys {
        let base = p * nvp * 2;
        for j in 0..nvp {
            if pmesh.polys[base + j] == navtile_build::MESH_NULL_IDX {
                break;
            }
            edge_count += 1;

            let neighbor = pmesh.polys[base + nvp + j];
            if neighbor & navtile_build::EXTERNAL_EDGE != 0 && neighbor & 0xf != 0xf {
                portal_count += 1;
            }
        }
    }

    edge_count + portal_count * 2
}

/// Builds the polygon bounding-volume tree, quantized to voxel units.
fn build_bv_tree(pmesh: &PolyMesh) -> Vec<BvNode> {
    let nvp = pmesh.nvp;

    // Per-polygon quantized bounds
    let mut items: Vec<([u16; 3], [u16; 3], i32)> = Vec::with_capacity(pmesh.npolys);
    for p in 0..pmesh.npolys {
        let base = p * nvp * 2;
        let mut bmin = [u16::MAX; 3];
        let mut bmax = [0u16; 3];
        for j in 0..nvp {
            let v = pmesh.polys[base + j];
            if v == navtile_build::MESH_NULL_IDX {
                break;
            }
            let vert = &pmesh.verts[v as usize * 3..v as usize * 3 + 3];
            for k in 0..3 {
                bmin[k] = bmin[k].min(vert[k]);
                bmax[k] = bmax[k].max(vert[k]);
            }
        }
        items.push((bmin, bmax, p as i32));
    }

    let mut nodes = Vec::with_capacity(pmesh.npolys * 2);
    subdivide(&mut items, 0, pmesh.npolys, &mut nodes);
    nodes
}

fn subdivide(
    items: &mut [([u16; 3], [u16; 3], i32)],
    imin: usize,
    imax: usize,
    nodes: &mut Vec<BvNode>,
) {
    let count = imax - imin;
    let current = nodes.len();

    if count == 1 {
        let (bmin, bmax, idx) = items[imin];
        nodes.push(BvNode { bmin, bmax, i: idx });
        return;
    }

    let mut bmin = items[imin].0;
    let mut bmax = items[imin].1;
    for item in items[imin..imax].iter().skip(1) {
        for k in 0..3 {
            bmin[k] = bmin[k].min(item.0[k]);
            bmax[k] = bmax[k].max(item.1[k]);
        }
    }
    nodes.push(BvNode {
        bmin,
        bmax,
        i: 0, // patched below with the escape index
    });

    // Split along the longest axis at the median
    let extents = [
        bmax[0] - bmin[0],
        bmax[1] - bmin[1],
        bmax[2] - bmin[2],
    ];
    let axis = if extents[0] >= extents[1] && extents[0] >= extents[2] {
        0
    } else if extents[1] >= extents[2] {
        1
    } else {
        2
    };

    items[imin..imax].sort_by_key(|item| (item.0[axis], item.2));
    let split = imin + count / 2;

    subdivide(items, imin, split, nodes);
    subdivide(items, split, imax, nodes);

    let escape = (nodes.len() - current) as i32;
    nodes[current].i = -escape;
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use navtile_build::{CompactHeightfield, ContourSet, Heightfield};
    use navtile_common::AREA_TERRAIN;

    fn flat_meshes(size: i32) -> (PolyMesh, PolyMeshDetail) {
        let mut hf = Heightfield::new(
            size,
            size,
            Vec3::ZERO,
            Vec3::new(size as f32, 10.0, size as f32),
            1.0,
            1.0,
        );
        for z in 0..size {
            for x in 0..size {
                hf.add_span(x, z, 0, 1, AREA_TERRAIN, 1).unwrap();
            }
        }
        let mut chf = CompactHeightfield::build(&hf, 2, i32::MAX).unwrap();
        chf.build_distance_field();
        chf.build_regions(0, 4, 10).unwrap();
        let cset = ContourSet::build(&chf, 1.3, 12).unwrap();
        let mut pmesh = PolyMesh::build(&cset, 6).unwrap();
        pmesh.update_walkable_flags();
        let dmesh = PolyMeshDetail::build(&pmesh, &chf, 2.0, 0.5).unwrap();
        (pmesh, dmesh)
    }

    #[test]
    fn payload_round_trips_header() {
        let (pmesh, dmesh) = flat_meshes(10);
        let settings = MeshSettings::default();
        let payload = create_tile_data(&TileBuildParams {
            tile_x: 7,
            tile_y: -3,
            poly_mesh: &pmesh,
            detail_mesh: &dmesh,
            settings: &settings,
        })
        .unwrap();

        let header = payload.header().unwrap();
        assert_eq!(header.tile_x, 7);
        assert_eq!(header.tile_y, -3);
        assert_eq!(header.layer, 0);
        assert_eq!(header.poly_count, pmesh.npolys as i32);
        assert_eq!(header.vert_count, pmesh.nverts as i32);
        assert_eq!(header.nvp, 6);
        // At least three edges per polygon feed the link capacity
        assert!(header.max_link_count >= header.poly_count * 3);
        assert!(header.bv_node_count >= 1);
        assert!((header.bv_quant_factor - 1.0 / pmesh.cs).abs() < 1e-6);
    }

    #[test]
    fn serialization_is_deterministic() {
        let (pmesh, dmesh) = flat_meshes(12);
        let settings = MeshSettings::default();
        let build = || {
            create_tile_data(&TileBuildParams {
                tile_x: 1,
                tile_y: 2,
                poly_mesh: &pmesh,
                detail_mesh: &dmesh,
                settings: &settings,
            })
            .unwrap()
        };
        assert_eq!(build().as_bytes(), build().as_bytes());
    }

    #[test]
    fn vertex_budget_is_enforced() {
        let (mut pmesh, dmesh) = flat_meshes(10);
        pmesh.nverts = 0xffff;
        let settings = MeshSettings::default();
        let result = create_tile_data(&TileBuildParams {
            tile_x: 0,
            tile_y: 0,
            poly_mesh: &pmesh,
            detail_mesh: &dmesh,
            settings: &settings,
        });
        assert!(matches!(
            result,
            Err(Error::TooManyVertices { tile_x: 0, tile_y: 0 })
        ));
    }

    #[test]
    fn corrupt_magic_is_rejected() {
        let (pmesh, dmesh) = flat_meshes(10);
        let settings = MeshSettings::default();
        let payload = create_tile_data(&TileBuildParams {
            tile_x: 0,
            tile_y: 0,
            poly_mesh: &pmesh,
            detail_mesh: &dmesh,
            settings: &settings,
        })
        .unwrap();

        let mut bytes = payload.into_bytes();
        bytes[0] ^= 0xff;
        let corrupt = TilePayload { data: bytes };
        assert!(corrupt.header().is_err());
    }
}

//! Triangle rasterization into the voxel heightfield.
//!
//! Triangles are clipped row by row and then column by column against the
//! grid; each surviving fragment contributes a `[smin, smax]` voxel interval
//! to its column.

use glam::Vec3;
use navtile_common::{Error, Result, AREA_NULL};

use crate::heightfield::Heightfield;

/// Axis selector for polygon clipping
#[derive(Debug, Clone, Copy)]
enum Axis {
    X = 0,
    Z = 2,
}

/// Splits a convex polygon along an axis-aligned line, producing the parts on
/// either side.
fn divide_poly(
    in_verts: &[f32],
    out_below: &mut Vec<f32>,
    out_above: &mut Vec<f32>,
    axis_offset: f32,
    axis: Axis,
) {
    out_below.clear();
    out_above.clear();

    let axis_idx = axis as usize;
    let n = in_verts.len() / 3;
    if n == 0 {
        return;
    }

    let mut sides = Vec::with_capacity(n);
    for i in 0..n {
        let value = in_verts[i * 3 + axis_idx];
        sides.push(if value < axis_offset {
            -1
        } else if value > axis_offset {
            1
        } else {
            0
        });
    }

    for i in 0..n {
        let j = (i + 1) % n;
        let vi = &in_verts[i * 3..i * 3 + 3];
        let vj = &in_verts[j * 3..j * 3 + 3];

        match sides[i] {
            0 => {
                out_below.extend_from_slice(vi);
                out_above.extend_from_slice(vi);
            }
            s if s < 0 => {
                out_below.extend_from_slice(vi);
                if sides[j] > 0 {
                    let t = (axis_offset - vi[axis_idx]) / (vj[axis_idx] - vi[axis_idx]);
                    let cut: Vec<f32> = (0..3).map(|k| vi[k] + t * (vj[k] - vi[k])).collect();
                    out_below.extend_from_slice(&cut);
                    out_above.extend_from_slice(&cut);
                }
            }
            _ => {
                out_above.extend_from_slice(vi);
                if sides[j] < 0 {
                    let t = (axis_offset - vi[axis_idx]) / (vj[axis_idx] - vi[axis_idx]);
                    let cut: Vec<f32> = (0..3).map(|k| vi[k] + t * (vj[k] - vi[k])).collect();
                    out_below.extend_from_slice(&cut);
                    out_above.extend_from_slice(&cut);
                }
            }
        }
    }
}

fn rasterize_tri(
    v0: &[f32],
    v1: &[f32],
    v2: &[f32],
    area: u8,
    heightfield: &mut Heightfield,
    flag_merge_threshold: i32,
) {
    let inv_cs = 1.0 / heightfield.cs;
    let inv_ch = 1.0 / heightfield.ch;

    let mut tri_min = [v0[0], v0[1], v0[2]];
    let mut tri_max = tri_min;
    for v in [v1, v2] {
        for k in 0..3 {
            tri_min[k] = tri_min[k].min(v[k]);
            tri_max[k] = tri_max[k].max(v[k]);
        }
    }

    let bmin = heightfield.bmin;
    let bmax = heightfield.bmax;
    if tri_min[0] > bmax.x || tri_max[0] < bmin.x || tri_min[2] > bmax.z || tri_max[2] < bmin.z {
        return;
    }

    let x0 = (((tri_min[0] - bmin.x) * inv_cs) as i32).max(0);
    let x1 = (((tri_max[0] - bmin.x) * inv_cs) as i32).min(heightfield.width - 1);
    // -1 rather than 0 so the polygon is cut cleanly at the tile edge
    let z0 = (((tri_min[2] - bmin.z) * inv_cs) as i32).max(-1);
    let z1 = (((tri_max[2] - bmin.z) * inv_cs) as i32).min(heightfield.height - 1);

    let mut remaining: Vec<f32> = [v0, v1, v2].concat();
    let mut row = Vec::with_capacity(21);
    let mut rest = Vec::with_capacity(21);
    let mut cell = Vec::with_capacity(21);
    let mut col_rest = Vec::with_capacity(21);

    for z in z0..=z1 {
        let row_max = bmin.z + (z + 1) as f32 * heightfield.cs;
        divide_poly(&remaining, &mut row, &mut rest, row_max, Axis::Z);
        std::mem::swap(&mut remaining, &mut rest);

        if row.len() < 9 || z < 0 {
            continue;
        }

        let mut row_remaining = row.clone();
        for x in x0..=x1 {
            let col_max = bmin.x + (x + 1) as f32 * heightfield.cs;
            divide_poly(&row_remaining, &mut cell, &mut col_rest, col_max, Axis::X);
            std::mem::swap(&mut row_remaining, &mut col_rest);

            if cell.len() < 9 {
                continue;
            }

            let mut min_y = cell[1];
            let mut max_y = cell[1];
            for i in 1..cell.len() / 3 {
                let y = cell[i * 3 + 1];
                min_y = min_y.min(y);
                max_y = max_y.max(y);
            }

            let smin = (((min_y - bmin.y) * inv_ch).floor() as i32).max(0);
            let smax = ((max_y - bmin.y) * inv_ch).ceil() as i32;
            if smax < 0 {
                continue;
            }

            heightfield.insert_span(x, z, smin, smax.max(smin), area, flag_merge_threshold);
        }
    }
}

/// Rasterizes indexed triangles into the heightfield with per-triangle areas.
pub fn rasterize_triangles(
    verts: &[f32],
    indices: &[i32],
    areas: &[u8],
    heightfield: &mut Heightfield,
    flag_merge_threshold: i32,
) -> Result<()> {
    if verts.len() % 3 != 0 {
        return Err(Error::InvalidMesh(
            "vertex array length must be a multiple of 3".to_string(),
        ));
    }
    if indices.len() % 3 != 0 {
        return Err(Error::InvalidMesh(
            "index array length must be a multiple of 3".to_string(),
        ));
    }
    let triangle_count = indices.len() / 3;
    if areas.len() < triangle_count {
        return Err(Error::InvalidMesh(
            "missing per-triangle area values".to_string(),
        ));
    }

    let vert_count = verts.len() / 3;
    for i in 0..triangle_count {
        let idx = [
            indices[i * 3] as usize,
            indices[i * 3 + 1] as usize,
            indices[i * 3 + 2] as usize,
        ];
        if idx.iter().any(|&v| v >= vert_count) {
            return Err(Error::InvalidMesh(format!(
                "triangle index out of bounds: {:?} (max: {})",
                idx,
                vert_count - 1
            )));
        }

        rasterize_tri(
            &verts[idx[0] * 3..idx[0] * 3 + 3],
            &verts[idx[1] * 3..idx[1] * 3 + 3],
            &verts[idx[2] * 3..idx[2] * 3 + 3],
            areas[i],
            heightfield,
            flag_merge_threshold,
        );
    }

    Ok(())
}

/// Zeroes the area of every triangle steeper than `walkable_slope` degrees.
pub fn clear_unwalkable_triangles(
    walkable_slope: f32,
    verts: &[f32],
    indices: &[i32],
    areas: &mut [u8],
) {
    let slope_cos = walkable_slope.to_radians().cos();

    for i in 0..indices.len() / 3 {
        let v = |j: usize| {
            let idx = indices[i * 3 + j] as usize;
            Vec3::new(verts[idx * 3], verts[idx * 3 + 1], verts[idx * 3 + 2])
        };
        let (a, b, c) = (v(0), v(1), v(2));

        let cross = (b - a).cross(c - a);
        if cross.length_squared() < f32::EPSILON {
            continue;
        }
        let normal = cross.normalize();
        if normal.y <= slope_cos {
            areas[i] = AREA_NULL;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navtile_common::{AREA_DOODAD, AREA_TERRAIN};

    fn field() -> Heightfield {
        Heightfield::new(
            10,
            10,
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(10.0, 10.0, 10.0),
            1.0,
            1.0,
        )
    }

    #[test]
    fn rasterize_flat_triangle_covers_footprint() {
        let mut hf = field();
        let verts = [2.0, 1.0, 2.0, 8.0, 1.0, 2.0, 2.0, 1.0, 8.0];
        let indices = [0, 1, 2];
        let areas = [AREA_TERRAIN];

        rasterize_triangles(&verts, &indices, &areas, &mut hf, 1).unwrap();

        assert!(hf.span_count() > 0);
        let key = hf.column_head(3, 3).expect("span under the triangle");
        let span = hf.span(key);
        assert_eq!(span.area, AREA_TERRAIN);
        assert!(span.smin <= 1 && span.smax >= 1);
        hf.assert_columns_sorted();
    }

    #[test]
    fn triangles_outside_bounds_are_ignored() {
        let mut hf = field();
        let verts = [20.0, 0.0, 20.0, 25.0, 0.0, 20.0, 20.0, 0.0, 25.0];
        rasterize_triangles(&verts, &[0, 1, 2], &[AREA_DOODAD], &mut hf, 1).unwrap();
        assert_eq!(hf.span_count(), 0);
    }

    #[test]
    fn bad_indices_are_rejected() {
        let mut hf = field();
        let verts = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0];
        let result = rasterize_triangles(&verts, &[0, 1, 7], &[AREA_TERRAIN], &mut hf, 1);
        assert!(result.is_err());
    }

    #[test]
    fn steep_triangles_lose_their_area() {
        // One flat triangle, one vertical wall
        let verts = [
            0.0, 0.0, 0.0, 4.0, 0.0, 0.0, 0.0, 0.0, 4.0, // flat
            5.0, 0.0, 0.0, 5.0, 4.0, 0.0, 5.0, 0.0, 4.0, // wall
        ];
        let indices = [0, 2, 1, 3, 4, 5];
        let mut areas = [AREA_DOODAD, AREA_DOODAD];

        clear_unwalkable_triangles(45.0, &verts, &indices, &mut areas);

        assert_eq!(areas[0], AREA_DOODAD);
        assert_eq!(areas[1], AREA_NULL);
    }
}

//! Region boundary extraction and simplification.
//!
//! Contours are walked in voxel space along region frontiers, carrying the
//! neighbor region in each vertex tag, then simplified against a maximum
//! deviation and maximum edge length. Hole contours (negative winding) are
//! merged into their region's outline so triangulation never bridges them.

use glam::Vec3;
use navtile_common::{Error, Result};

use crate::compact_heightfield::{CompactHeightfield, BORDER_REGION};
use crate::{DIR_OFFSET_X, DIR_OFFSET_Z};

/// Vertex tag bit: vertex sits on the tile border
pub const BORDER_VERTEX: i32 = 0x10000;
/// Vertex tag bit: edge crosses into a different area
pub const AREA_BORDER: i32 = 0x20000;
/// Mask extracting the neighbor region from a vertex tag
pub const CONTOUR_REG_MASK: i32 = 0xffff;

/// A simplified region boundary polygon
#[derive(Debug, Clone)]
pub struct Contour {
    /// Simplified vertices: x, y, z, neighbor-region tag
    pub verts: Vec<[i32; 4]>,
    /// Raw vertices before simplification
    pub rverts: Vec<[i32; 4]>,
    /// Region id of the enclosed area
    pub reg: u16,
    /// Area bit-set of the enclosed area
    pub area: u8,
}

/// All contours of a compact heightfield
#[derive(Debug, Clone)]
pub struct ContourSet {
    pub contours: Vec<Contour>,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    /// Field width in voxels with the border removed
    pub width: i32,
    /// Field depth in voxels with the border removed
    pub height: i32,
    pub border_size: i32,
    pub max_error: f32,
}

impl ContourSet {
    /// Extracts and simplifies the contours of every non-border region.
    pub fn build(
        chf: &CompactHeightfield,
        max_simplification_error: f32,
        max_edge_len: i32,
    ) -> Result<Self> {
        let border = chf.border_size;
        let mut bmin = chf.bmin;
        let mut bmax = chf.bmax;
        if border > 0 {
            let pad = border as f32 * chf.cs;
            bmin.x += pad;
            bmin.z += pad;
            bmax.x -= pad;
            bmax.z -= pad;
        }

        let mut set = Self {
            contours: Vec::new(),
            bmin,
            bmax,
            cs: chf.cs,
            ch: chf.ch,
            width: chf.width - border * 2,
            height: chf.height - border * 2,
            border_size: border,
            max_error: max_simplification_error,
        };

        // Mark which span edges face a different region
        let mut flags = vec![0u8; chf.spans.len()];
        for z in 0..chf.height {
            for x in 0..chf.width {
                let cell = chf.cells[(x + z * chf.width) as usize];
                for i in cell.index..cell.index + cell.count {
                    let i = i as usize;
                    let span = chf.spans[i];
                    if span.reg == 0 || span.reg & BORDER_REGION != 0 {
                        continue;
                    }

                    let mut connected = 0u8;
                    for dir in 0..4 {
                        let mut reg = 0;
                        if let Some(ai) = chf.neighbor_index(x, z, &span, dir) {
                            reg = chf.spans[ai].reg;
                        }
                        if reg == span.reg {
                            connected |= 1u8 << dir;
                        }
                    }
                    flags[i] = connected ^ 0x0f;
                }
            }
        }

        let mut raw = Vec::new();
        let mut simplified = Vec::new();

        for z in 0..chf.height {
            for x in 0..chf.width {
                let cell = chf.cells[(x + z * chf.width) as usize];
                for i in cell.index..cell.index + cell.count {
                    let i = i as usize;
                    if flags[i] == 0 || flags[i] == 0x0f {
                        flags[i] = 0;
                        continue;
                    }
                    let span = chf.spans[i];
                    if span.reg == 0 || span.reg & BORDER_REGION != 0 {
                        continue;
                    }

                    raw.clear();
                    simplified.clear();

                    walk_contour(chf, x, z, i, &mut flags, &mut raw);
                    simplify_contour(
                        &raw,
                        &mut simplified,
                        max_simplification_error,
                        max_edge_len,
                    );
                    remove_degenerate_segments(&mut simplified);

                    if simplified.len() >= 3 {
                        let mut verts = simplified.clone();
                        let mut rverts = raw.clone();
                        if border > 0 {
                            for v in verts.iter_mut().chain(rverts.iter_mut()) {
                                v[0] -= border;
                                v[2] -= border;
                            }
                        }
                        set.contours.push(Contour {
                            verts,
                            rverts,
                            reg: span.reg,
                            area: chf.areas[i],
                        });
                    }
                }
            }
        }

        set.merge_region_holes()?;

        log::debug!("built {} contours", set.contours.len());
        Ok(set)
    }

    /// Folds hole contours (negative winding) into their region's outline.
    fn merge_region_holes(&mut self) -> Result<()> {
        let has_holes = self
            .contours
            .iter()
            .any(|c| signed_area_2d(&c.verts) < 0);
        if !has_holes {
            return Ok(());
        }

        let mut merged: Vec<Contour> = Vec::with_capacity(self.contours.len());
        let mut holes: Vec<Contour> = Vec::new();

        for contour in self.contours.drain(..) {
            if signed_area_2d(&contour.verts) < 0 {
                holes.push(contour);
            } else {
                merged.push(contour);
            }
        }

        for hole in holes {
            let Some(outline_idx) = merged.iter().position(|c| c.reg == hole.reg) else {
                // A hole with no outline means the region collapsed during
                // simplification; drop it rather than fabricate geometry
                continue;
            };
            let outline = &merged[outline_idx];

            let (ia, ib) = find_merge_points(outline, &hole).ok_or_else(|| {
                Error::BuildStage(format!(
                    "no valid diagonal to merge hole into region {}",
                    hole.reg
                ))
            })?;
            let combined = merge_contours(outline, &hole, ia, ib);
            merged[outline_idx].verts = combined;
        }

        self.contours = merged;
        Ok(())
    }
}

fn walk_contour(
    chf: &CompactHeightfield,
    mut x: i32,
    mut z: i32,
    mut i: usize,
    flags: &mut [u8],
    points: &mut Vec<[i32; 4]>,
) {
    let mut dir = 0usize;
    while flags[i] & (1u8 << dir) == 0 {
        dir += 1;
    }
    let start_dir = dir;
    let start_i = i;
    let area = chf.areas[i];

    for _ in 0..40000 {
        if flags[i] & (1u8 << dir) != 0 {
            let mut is_border_vertex = false;
            let mut is_area_border = false;

            let mut px = x;
            let py = corner_height(chf, x, z, i, dir, &mut is_border_vertex);
            let mut pz = z;
            match dir {
                0 => pz += 1,
                1 => {
                    px += 1;
                    pz += 1;
                }
                2 => px += 1,
                _ => {}
            }

            let mut tag = 0i32;
            let span = chf.spans[i];
            if let Some(ai) = chf.neighbor_index(x, z, &span, dir) {
                tag = chf.spans[ai].reg as i32;
                if chf.areas[ai] != area {
                    is_area_border = true;
                }
            }
            if is_border_vertex {
                tag |= BORDER_VERTEX;
            }
            if is_area_border {
                tag |= AREA_BORDER;
            }
            points.push([px, py, pz, tag]);

            flags[i] &= !(1u8 << dir);
            dir = (dir + 1) & 3;
        } else {
            let span = chf.spans[i];
            let Some(ni) = chf.neighbor_index(x, z, &span, dir) else {
                // Should not happen: the edge was marked connected
                return;
            };
            x += DIR_OFFSET_X[dir];
            z += DIR_OFFSET_Z[dir];
            i = ni;
            dir = (dir + 3) & 3;
        }

        if i == start_i && dir == start_dir {
            break;
        }
    }
}

/// Height of the corner ahead of `dir`, and whether it lies on a tile border.
fn corner_height(
    chf: &CompactHeightfield,
    x: i32,
    z: i32,
    i: usize,
    dir: usize,
    is_border_vertex: &mut bool,
) -> i32 {
    let span = chf.spans[i];
    let dirp = (dir + 1) & 3;
    let mut height = span.y;

    // Region+area of the four cells meeting at the corner
    let mut regs = [0u32; 4];
    regs[0] = chf.spans[i].reg as u32 | (chf.areas[i] as u32) << 16;

    if let Some(ai) = chf.neighbor_index(x, z, &span, dir) {
        let nspan = chf.spans[ai];
        height = height.max(nspan.y);
        regs[1] = nspan.reg as u32 | (chf.areas[ai] as u32) << 16;
        if let Some(ai2) = chf.neighbor_index(
            x + DIR_OFFSET_X[dir],
            z + DIR_OFFSET_Z[dir],
            &nspan,
            dirp,
        ) {
            let nspan2 = chf.spans[ai2];
            height = height.max(nspan2.y);
            regs[2] = nspan2.reg as u32 | (chf.areas[ai2] as u32) << 16;
        }
    }
    if let Some(ai) = chf.neighbor_index(x, z, &span, dirp) {
        let nspan = chf.spans[ai];
        height = height.max(nspan.y);
        regs[3] = nspan.reg as u32 | (chf.areas[ai] as u32) << 16;
        if let Some(ai2) = chf.neighbor_index(
            x + DIR_OFFSET_X[dirp],
            z + DIR_OFFSET_Z[dirp],
            &nspan,
            dir,
        ) {
            let nspan2 = chf.spans[ai2];
            height = height.max(nspan2.y);
            regs[2] = nspan2.reg as u32 | (chf.areas[ai2] as u32) << 16;
        }
    }

    // The vertex is a border vertex when two same exterior cells in a row are
    // followed by two interior cells and none of the regions are colliding
    for j in 0..4 {
        let a = j;
        let b = (j + 1) & 3;
        let c = (j + 2) & 3;
        let d = (j + 3) & 3;

        let two_same_exteriors =
            regs[a] & regs[b] & BORDER_REGION as u32 != 0 && regs[a] == regs[b];
        let two_interiors = (regs[c] | regs[d]) & BORDER_REGION as u32 == 0;
        let interiors_same_area = regs[c] >> 16 == regs[d] >> 16;
        let no_zeros = regs[a] != 0 && regs[b] != 0 && regs[c] != 0 && regs[d] != 0;

        if two_same_exteriors && two_interiors && interiors_same_area && no_zeros {
            *is_border_vertex = true;
            break;
        }
    }

    height
}

fn simplify_contour(
    points: &[[i32; 4]],
    simplified: &mut Vec<[i32; 4]>,
    max_error: f32,
    max_edge_len: i32,
) {
    let pn = points.len();
    if pn == 0 {
        return;
    }

    // Keep vertices where the neighbor region changes
    let has_connections = points.iter().any(|p| p[3] & CONTOUR_REG_MASK != 0);
    if has_connections {
        for i in 0..pn {
            let ii = (i + 1) % pn;
            let different_regs =
                points[i][3] & CONTOUR_REG_MASK != points[ii][3] & CONTOUR_REG_MASK;
            let area_borders = points[i][3] & AREA_BORDER != points[ii][3] & AREA_BORDER;
            if different_regs || area_borders {
                simplified.push([points[i][0], points[i][1], points[i][2], i as i32]);
            }
        }
    }

    if simplified.is_empty() {
        // Closed loop with a single neighbor everywhere: seed with the
        // lower-left and upper-right vertices
        let mut lower = 0usize;
        let mut upper = 0usize;
        for (i, p) in points.iter().enumerate() {
            let l = &points[lower];
            if p[0] < l[0] || (p[0] == l[0] && p[2] < l[2]) {
                lower = i;
            }
            let u = &points[upper];
            if p[0] > u[0] || (p[0] == u[0] && p[2] > u[2]) {
                upper = i;
            }
        }
        for idx in [lower, upper] {
            simplified.push([points[idx][0], points[idx][1], points[idx][2], idx as i32]);
        }
    }

    // Add points until every raw vertex is within the error of the shape
    let mut i = 0;
    while i < simplified.len() {
        let ii = (i + 1) % simplified.len();

        let mut ax = simplified[i][0];
        let mut az = simplified[i][2];
        let ai = simplified[i][3] as usize;
        let mut bx = simplified[ii][0];
        let mut bz = simplified[ii][2];
        let bi = simplified[ii][3] as usize;

        let mut max_dev = 0.0f32;
        let mut max_idx: Option<usize> = None;

        // Traverse the segment in lexicographic order so the result does not
        // depend on walk direction
        let mut ci;
        let cinc;
        let endi;
        if bx > ax || (bx == ax && bz > az) {
            cinc = 1;
            ci = (ai + 1) % pn;
            endi = bi;
        } else {
            cinc = pn - 1;
            ci = (bi + cinc) % pn;
            endi = ai;
            std::mem::swap(&mut ax, &mut bx);
            std::mem::swap(&mut az, &mut bz);
        }

        // Only wall and area edges are simplified against the error bound
        if points[ci][3] & CONTOUR_REG_MASK == 0 || points[ci][3] & AREA_BORDER != 0 {
            while ci != endi {
                let d = distance_pt_seg_2d(
                    points[ci][0],
                    points[ci][2],
                    ax,
                    az,
                    bx,
                    bz,
                );
                if d > max_dev {
                    max_dev = d;
                    max_idx = Some(ci);
                }
                ci = (ci + cinc) % pn;
            }
        }

        match max_idx {
            Some(idx) if max_dev > max_error * max_error => {
                simplified.insert(
                    i + 1,
                    [points[idx][0], points[idx][1], points[idx][2], idx as i32],
                );
            }
            _ => i += 1,
        }
    }

    // Split long outer edges
    if max_edge_len > 0 {
        let mut i = 0;
        while i < simplified.len() {
            let ii = (i + 1) % simplified.len();

            let ax = simplified[i][0];
            let az = simplified[i][2];
            let ai = simplified[i][3] as usize;
            let bx = simplified[ii][0];
            let bz = simplified[ii][2];
            let bi = simplified[ii][3] as usize;

            let mut max_idx: Option<usize> = None;
            let ci = (ai + 1) % pn;

            if points[ci][3] & CONTOUR_REG_MASK == 0 {
                let dx = bx - ax;
                let dz = bz - az;
                if dx * dx + dz * dz > max_edge_len * max_edge_len {
                    let n = if bi < ai { bi + pn - ai } else { bi - ai };
                    if n > 1 {
                        let idx = if bx > ax || (bx == ax && bz > az) {
                            (ai + n / 2) % pn
                        } else {
                            (ai + (n + 1) / 2) % pn
                        };
                        max_idx = Some(idx);
                    }
                }
            }

            match max_idx {
                Some(idx) => {
                    simplified.insert(
                        i + 1,
                        [points[idx][0], points[idx][1], points[idx][2], idx as i32],
                    );
                }
                None => i += 1,
            }
        }
    }

    // Rewrite the stored raw indices as edge tags
    for entry in simplified.iter_mut() {
        // The edge vertex flag comes from the current raw point, the region
        // from the raw point after it
        let ai = (entry[3] as usize + 1) % pn;
        let bi = entry[3] as usize;
        entry[3] = points[ai][3] & (CONTOUR_REG_MASK | AREA_BORDER)
            | points[bi][3] & BORDER_VERTEX;
    }
}

fn remove_degenerate_segments(simplified: &mut Vec<[i32; 4]>) {
    let mut i = 0;
    while i < simplified.len() {
        let ni = (i + 1) % simplified.len();
        if simplified[i][0] == simplified[ni][0] && simplified[i][2] == simplified[ni][2] {
            simplified.remove(ni);
        } else {
            i += 1;
        }
        if simplified.len() < 3 {
            break;
        }
    }
}

/// Twice the signed area of the polygon in the ground plane; outlines walked
/// by [`walk_contour`] come out positive, holes negative.
fn signed_area_2d(verts: &[[i32; 4]]) -> i64 {
    let n = verts.len();
    let mut area = 0i64;
    for i in 0..n {
        let j = (i + n - 1) % n;
        area += verts[i][0] as i64 * verts[j][2] as i64
            - verts[j][0] as i64 * verts[i][2] as i64;
    }
    area
}

fn segments_intersect_2d(a: [i32; 2], b: [i32; 2], c: [i32; 2], d: [i32; 2]) -> bool {
    let area = |p: [i32; 2], q: [i32; 2], r: [i32; 2]| -> i64 {
        (q[0] - p[0]) as i64 * (r[1] - p[1]) as i64
            - (r[0] - p[0]) as i64 * (q[1] - p[1]) as i64
    };
    let d1 = area(c, d, a);
    let d2 = area(c, d, b);
    let d3 = area(a, b, c);
    let d4 = area(a, b, d);
    ((d1 > 0 && d2 < 0) || (d1 < 0 && d2 > 0)) && ((d3 > 0 && d4 < 0) || (d3 < 0 && d4 > 0))
}

/// True when the open segment between the two vertices crosses the contour.
fn diagonal_blocked(contour: &Contour, from: [i32; 2], to: [i32; 2]) -> bool {
    let n = contour.verts.len();
    for i in 0..n {
        let j = (i + 1) % n;
        let c = [contour.verts[i][0], contour.verts[i][2]];
        let d = [contour.verts[j][0], contour.verts[j][2]];
        if c == from || c == to || d == from || d == to {
            continue;
        }
        if segments_intersect_2d(from, to, c, d) {
            return true;
        }
    }
    false
}

/// Picks the vertex pair joining the hole to its outline: the hole's leftmost
/// vertex and the nearest outline vertex with an unobstructed diagonal.
fn find_merge_points(outline: &Contour, hole: &Contour) -> Option<(usize, usize)> {
    let mut ib = 0;
    for (i, v) in hole.verts.iter().enumerate() {
        let best = &hole.verts[ib];
        if v[0] < best[0] || (v[0] == best[0] && v[2] < best[2]) {
            ib = i;
        }
    }
    let hv = [hole.verts[ib][0], hole.verts[ib][2]];

    let mut candidates: Vec<(i64, usize)> = outline
        .verts
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let dx = (v[0] - hv[0]) as i64;
            let dz = (v[2] - hv[1]) as i64;
            (dx * dx + dz * dz, i)
        })
        .collect();
    candidates.sort();

    for (_, ia) in candidates {
        let ov = [outline.verts[ia][0], outline.verts[ia][2]];
        if !diagonal_blocked(outline, ov, hv) && !diagonal_blocked(hole, ov, hv) {
            return Some((ia, ib));
        }
    }
    None
}

/// Splices the hole into the outline through the chosen vertex pair.
fn merge_contours(outline: &Contour, hole: &Contour, ia: usize, ib: usize) -> Vec<[i32; 4]> {
    let na = outline.verts.len();
    let nb = hole.verts.len();
    let mut verts = Vec::with_capacity(na + nb + 2);

    for i in 0..=na {
        verts.push(outline.verts[(ia + i) % na]);
    }
    for i in 0..=nb {
        verts.push(hole.verts[(ib + i) % nb]);
    }

    verts
}

fn distance_pt_seg_2d(x: i32, z: i32, px: i32, pz: i32, qx: i32, qz: i32) -> f32 {
    let pqx = (qx - px) as f32;
    let pqz = (qz - pz) as f32;
    let dx = (x - px) as f32;
    let dz = (z - pz) as f32;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    t = t.clamp(0.0, 1.0);

    let dx = px as f32 + t * pqx - x as f32;
    let dz = pz as f32 + t * pqz - z as f32;
    dx * dx + dz * dz
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compact_heightfield::CompactHeightfield;
    use crate::heightfield::Heightfield;
    use navtile_common::AREA_TERRAIN;

    fn flat_contours(size: i32) -> ContourSet {
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
        ContourSet::build(&chf, 1.3, 12).unwrap()
    }

    #[test]
    fn flat_field_traces_one_outline() {
        let set = flat_contours(10);
        assert_eq!(set.contours.len(), 1);

        let contour = &set.contours[0];
        assert!(contour.verts.len() >= 3);
        assert_eq!(contour.area, AREA_TERRAIN);
        // Outline winds positively
        assert!(signed_area_2d(&contour.verts) > 0);
    }

    #[test]
    fn empty_field_yields_no_contours() {
        let hf = Heightfield::new(8, 8, Vec3::ZERO, Vec3::new(8.0, 10.0, 8.0), 1.0, 1.0);
        let mut chf = CompactHeightfield::build(&hf, 2, i32::MAX).unwrap();
        chf.build_distance_field();
        chf.build_regions(0, 4, 10).unwrap();
        let set = ContourSet::build(&chf, 1.3, 12).unwrap();
        assert!(set.contours.is_empty());
    }

    #[test]
    fn hole_is_merged_into_outline() {
        let size = 14;
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
                // Unwalkable 2x2 block in the middle of the floor
                let hole = (6..8).contains(&x) && (6..8).contains(&z);
                if hole {
                    continue;
                }
                hf.add_span(x, z, 0, 1, AREA_TERRAIN, 1).unwrap();
            }
        }
        let mut chf = CompactHeightfield::build(&hf, 2, i32::MAX).unwrap();
        chf.build_distance_field();
        chf.build_regions(0, 2, 0).unwrap();
        let set = ContourSet::build(&chf, 1.0, 0).unwrap();

        // Every surviving contour is an outline
        assert!(!set.contours.is_empty());
        for contour in &set.contours {
            assert!(signed_area_2d(&contour.verts) > 0);
        }
    }

    #[test]
    fn simplification_respects_region_mask() {
        let set = flat_contours(10);
        for contour in &set.contours {
            for v in &contour.verts {
                assert_eq!(v[3] & CONTOUR_REG_MASK, 0, "flat field has no neighbors");
            }
        }
    }
}

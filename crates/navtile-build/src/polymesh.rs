//! Convex polygon mesh built from simplified contours.
//!
//! Contours are ear-clipped into triangles, vertices welded through a spatial
//! hash, and triangles greedily merged into convex polygons of at most `nvp`
//! vertices. Shared edges become polygon adjacency; open edges on the tile
//! boundary are marked as portals.

use glam::Vec3;
use navtile_common::{Error, Result, POLY_FLAG_WALKABLE};

use crate::contour::{ContourSet, BORDER_VERTEX};

/// Sentinel for an unused polygon slot or missing neighbor
pub const MESH_NULL_IDX: u16 = 0xffff;

/// Portal flag on a polygon edge neighbor: low bits carry the side
pub const EXTERNAL_EDGE: u16 = 0x8000;

const VERTEX_BUCKET_COUNT: usize = 1 << 12;
const EAR_FLAG: i32 = 0x4000_0000;
const INDEX_MASK: i32 = 0x3fff_ffff;

/// Convex polygon mesh over voxel-space vertices
#[derive(Debug, Clone)]
pub struct PolyMesh {
    /// Vertex components, three `u16` per vertex
    pub verts: Vec<u16>,
    /// Polygon data: `nvp` vertex indices then `nvp` edge neighbors per polygon
    pub polys: Vec<u16>,
    /// Source region per polygon
    pub regs: Vec<u16>,
    /// Flag bits per polygon
    pub flags: Vec<u16>,
    /// Area bit-set per polygon
    pub areas: Vec<u8>,

    pub nverts: usize,
    pub npolys: usize,
    pub nvp: usize,

    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    pub border_size: i32,
}

impl PolyMesh {
    /// Builds the polygon mesh from a contour set.
    pub fn build(cset: &ContourSet, nvp: usize) -> Result<Self> {
        let mut max_vertices = 0usize;
        let mut max_tris = 0usize;
        let mut max_verts_per_cont = 0usize;
        for contour in &cset.contours {
            let n = contour.verts.len();
            if n < 3 {
                continue;
            }
            max_vertices += n;
            max_tris += n - 2;
            max_verts_per_cont = max_verts_per_cont.max(n);
        }

        if max_vertices >= 0xfffe {
            return Err(Error::BuildStage(format!(
                "too many vertices in contour set: {max_vertices}"
            )));
        }

        let mut mesh = Self {
            verts: Vec::with_capacity(max_vertices * 3),
            polys: Vec::with_capacity(max_tris * nvp * 2),
            regs: Vec::with_capacity(max_tris),
            flags: Vec::with_capacity(max_tris),
            areas: Vec::with_capacity(max_tris),
            nverts: 0,
            npolys: 0,
            nvp,
            bmin: cset.bmin,
            bmax: cset.bmax,
            cs: cset.cs,
            ch: cset.ch,
            border_size: cset.border_size,
        };

        let mut first_vert = [-1i32; VERTEX_BUCKET_COUNT];
        let mut next_vert = vec![-1i32; max_vertices];
        let mut vflags = vec![0u8; max_vertices];

        let mut indices: Vec<i32> = Vec::with_capacity(max_verts_per_cont);
        let mut tris: Vec<[i32; 3]> = Vec::with_capacity(max_verts_per_cont);
        let mut poly_buf: Vec<u16> = Vec::new();
        let mut tmp_poly = vec![MESH_NULL_IDX; nvp];

        for contour in &cset.contours {
            let n = contour.verts.len();
            if n < 3 {
                continue;
            }

            indices.clear();
            indices.extend(0..n as i32);

            let ok = triangulate(&contour.verts, &mut indices, &mut tris);
            if !ok {
                // Bad triangulation should not fail the whole tile
                log::warn!(
                    "partial triangulation of contour in region {}",
                    contour.reg
                );
            }
            if tris.is_empty() {
                continue;
            }

            // Weld contour vertices into the mesh
            indices.clear();
            for v in &contour.verts {
                let idx = add_vertex(
                    v[0] as u16,
                    v[1] as u16,
                    v[2] as u16,
                    &mut mesh.verts,
                    &mut first_vert,
                    &mut next_vert,
                    &mut mesh.nverts,
                );
                indices.push(idx as i32);
                if v[3] & BORDER_VERTEX != 0 {
                    vflags[idx as usize] = 1;
                }
            }

            // Start from triangles, one polygon each. Welding can collapse a
            // triangle (merged hole bridges duplicate vertices), so degeneracy
            // is checked on the welded indices.
            poly_buf.clear();
            for tri in &tris {
                let a = indices[tri[0] as usize] as u16;
                let b = indices[tri[1] as usize] as u16;
                let c = indices[tri[2] as usize] as u16;
                if a == b || b == c || c == a {
                    continue;
                }
                let mut poly = vec![MESH_NULL_IDX; nvp];
                poly[0] = a;
                poly[1] = b;
                poly[2] = c;
                poly_buf.extend_from_slice(&poly);
            }
            if poly_buf.is_empty() {
                continue;
            }

            // Greedily merge the polygon pair with the longest shared edge
            if nvp > 3 {
                loop {
                    let npolys = poly_buf.len() / nvp;
                    let mut best_value = 0i32;
                    let mut best = (0usize, 0usize, 0usize, 0usize);

                    for i in 0..npolys {
                        for j in i + 1..npolys {
                            let (value, ea, eb) = poly_merge_value(
                                &poly_buf[i * nvp..(i + 1) * nvp],
                                &poly_buf[j * nvp..(j + 1) * nvp],
                                &mesh.verts,
                                nvp,
                            );
                            if value > best_value {
                                best_value = value;
                                best = (i, j, ea, eb);
                            }
                        }
                    }

                    if best_value <= 0 {
                        break;
                    }

                    let (i, j, ea, eb) = best;
                    let pb: Vec<u16> = poly_buf[j * nvp..(j + 1) * nvp].to_vec();
                    merge_poly_verts(
                        &mut poly_buf[i * nvp..(i + 1) * nvp],
                        &pb,
                        ea,
                        eb,
                        &mut tmp_poly,
                        nvp,
                    );
                    // Remove polygon j
                    let last = poly_buf.len() - nvp;
                    if j * nvp != last {
                        let tail: Vec<u16> = poly_buf[last..].to_vec();
                        poly_buf[j * nvp..(j + 1) * nvp].copy_from_slice(&tail);
                    }
                    poly_buf.truncate(last);
                }
            }

            for poly in poly_buf.chunks(nvp) {
                mesh.polys.extend_from_slice(poly);
                mesh.polys.extend(std::iter::repeat(MESH_NULL_IDX).take(nvp));
                mesh.regs.push(contour.reg);
                mesh.areas.push(contour.area);
                mesh.flags.push(0);
                mesh.npolys += 1;
            }
        }

        // Remove vertices created by tile-border region transitions
        let mut i = 0;
        while i < mesh.nverts {
            if vflags[i] != 0 {
                if mesh.can_remove_vertex(i as u16) {
                    mesh.remove_vertex(i as u16)?;
                    vflags.remove(i);
                    continue;
                }
            }
            i += 1;
        }

        mesh.build_adjacency()?;
        mesh.mark_portal_edges(cset);

        log::debug!(
            "built poly mesh: {} vertices, {} polygons",
            mesh.nverts,
            mesh.npolys
        );
        Ok(mesh)
    }

    /// Gives every polygon with a non-null area the walkable flag plus its
    /// area bits.
    pub fn update_walkable_flags(&mut self) {
        for i in 0..self.npolys {
            if self.areas[i] != 0 {
                self.flags[i] = POLY_FLAG_WALKABLE | self.areas[i] as u16;
            }
        }
    }

    fn poly_vert_count(&self, p: usize) -> usize {
        let poly = &self.polys[p * self.nvp * 2..p * self.nvp * 2 + self.nvp];
        poly.iter().take_while(|&&v| v != MESH_NULL_IDX).count()
    }

    /// A border vertex may be removed when the edges around it form a simple
    /// fan: at most two open edges remain after the removal.
    fn can_remove_vertex(&self, rem: u16) -> bool {
        let nvp = self.nvp;

        let mut num_remaining_edges = 0i32;
        for p in 0..self.npolys {
            let poly = &self.polys[p * nvp * 2..p * nvp * 2 + nvp];
            let nv = self.poly_vert_count(p);
            let mut num_removed = 0i32;
            let mut num_verts = 0i32;
            for &v in poly.iter().take(nv) {
                if v == rem {
                    num_removed += 1;
                }
                num_verts += 1;
            }
            if num_removed > 0 {
                num_remaining_edges += num_verts - (num_removed + 1);
            }
        }
        if num_remaining_edges <= 2 {
            // Would create a degenerate patch
            return false;
        }

        // Collect the edges around the removed vertex and count open ones
        let mut edges: Vec<(u16, u16, i32)> = Vec::new();
        for p in 0..self.npolys {
            let poly = &self.polys[p * nvp * 2..p * nvp * 2 + nvp];
            let nv = self.poly_vert_count(p);
            if !poly.iter().take(nv).any(|&v| v == rem) {
                continue;
            }
            for j in 0..nv {
                let k = (j + nv - 1) % nv;
                if poly[j] != rem && poly[k] != rem {
                    continue;
                }
                if poly[j] == rem && poly[k] == rem {
                    continue;
                }
                let other = if poly[j] == rem { poly[k] } else { poly[j] };
                match edges.iter_mut().find(|e| e.0 == other) {
                    Some(e) => e.2 += 1,
                    None => edges.push((other, rem, 1)),
                }
            }
        }

        let open_edges = edges.iter().filter(|e| e.2 < 2).count();
        open_edges <= 2
    }

    /// Removes a vertex, re-triangulating the hole its polygons leave behind.
    fn remove_vertex(&mut self, rem: u16) -> Result<()> {
        let nvp = self.nvp;

        // Pull out every polygon using the vertex, keeping the boundary edges
        let mut edges: Vec<[i32; 4]> = Vec::new(); // a, b, reg, area
        let mut p = 0;
        while p < self.npolys {
            let base = p * nvp * 2;
            let nv = self.poly_vert_count(p);
            let uses = self.polys[base..base + nv].iter().any(|&v| v == rem);
            if !uses {
                p += 1;
                continue;
            }

            for j in 0..nv {
                let k = (j + 1) % nv;
                let a = self.polys[base + j];
                let b = self.polys[base + k];
                if a != rem && b != rem {
                    edges.push([a as i32, b as i32, self.regs[p] as i32, self.areas[p] as i32]);
                }
            }

            // Swap-remove the polygon
            let last = self.npolys - 1;
            if p != last {
                let last_base = last * nvp * 2;
                let tail: Vec<u16> = self.polys[last_base..last_base + nvp * 2].to_vec();
                self.polys[base..base + nvp * 2].copy_from_slice(&tail);
                self.regs[p] = self.regs[last];
                self.areas[p] = self.areas[last];
                self.flags[p] = self.flags[last];
            }
            self.polys.truncate(last * nvp * 2);
            self.regs.truncate(last);
            self.areas.truncate(last);
            self.flags.truncate(last);
            self.npolys = last;
        }

        if edges.is_empty() {
            return Ok(());
        }

        // Stitch the edges into a closed hole loop
        let mut hole: Vec<i32> = Vec::new();
        let mut hole_regs: Vec<i32> = Vec::new();
        let mut hole_areas: Vec<i32> = Vec::new();

        let Some(first) = edges.pop() else {
            return Ok(());
        };
        hole.push(first[0]);
        hole.push(first[1]);
        hole_regs.push(first[2]);
        hole_areas.push(first[3]);

        while !edges.is_empty() {
            let mut matched = false;
            let mut e = 0;
            while e < edges.len() {
                let [a, b, reg, area] = edges[e];
                if hole.last() == Some(&a) {
                    hole.push(b);
                    hole_regs.push(reg);
                    hole_areas.push(area);
                    edges.swap_remove(e);
                    matched = true;
                } else if hole[0] == b {
                    hole.insert(0, a);
                    hole_regs.insert(0, reg);
                    hole_areas.insert(0, area);
                    edges.swap_remove(e);
                    matched = true;
                } else {
                    e += 1;
                }
            }
            if !matched {
                break;
            }
        }
        // The loop closes back on its first vertex
        if hole.len() > 1 && hole.first() == hole.last() {
            hole.pop();
        }
        if hole.len() < 3 {
            return Err(Error::BuildStage(
                "failed to close hole while removing vertex".to_string(),
            ));
        }

        // Triangulate the hole in voxel space
        let tverts: Vec<[i32; 4]> = hole
            .iter()
            .map(|&h| {
                let v = &self.verts[h as usize * 3..h as usize * 3 + 3];
                [v[0] as i32, v[1] as i32, v[2] as i32, 0]
            })
            .collect();
        let mut tindices: Vec<i32> = (0..hole.len() as i32).collect();
        let mut tris: Vec<[i32; 3]> = Vec::new();
        if !triangulate(&tverts, &mut tindices, &mut tris) {
            log::warn!("partial triangulation while removing vertex {rem}");
        }

        // Rebuild polygons over the hole and merge them like the main path
        let mut poly_buf: Vec<u16> = Vec::new();
        let mut poly_regs: Vec<u16> = Vec::new();
        let mut poly_areas: Vec<u8> = Vec::new();
        for tri in &tris {
            let (a, b, c) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
            if hole[a] == hole[b] || hole[b] == hole[c] || hole[c] == hole[a] {
                continue;
            }
            let mut poly = vec![MESH_NULL_IDX; nvp];
            poly[0] = hole[a] as u16;
            poly[1] = hole[b] as u16;
            poly[2] = hole[c] as u16;
            poly_buf.extend_from_slice(&poly);
            poly_regs.push(hole_regs[a] as u16);
            poly_areas.push(hole_areas[a] as u8);
        }

        if nvp > 3 {
            let mut tmp_poly = vec![MESH_NULL_IDX; nvp];
            loop {
                let npolys = poly_buf.len() / nvp;
                let mut best_value = 0i32;
                let mut best = (0usize, 0usize, 0usize, 0usize);
                for i in 0..npolys {
                    for j in i + 1..npolys {
                        let (value, ea, eb) = poly_merge_value(
                            &poly_buf[i * nvp..(i + 1) * nvp],
                            &poly_buf[j * nvp..(j + 1) * nvp],
                            &self.verts,
                            nvp,
                        );
                        if value > best_value {
                            best_value = value;
                            best = (i, j, ea, eb);
                        }
                    }
                }
                if best_value <= 0 {
                    break;
                }
                let (i, j, ea, eb) = best;
                let pb: Vec<u16> = poly_buf[j * nvp..(j + 1) * nvp].to_vec();
                merge_poly_verts(
                    &mut poly_buf[i * nvp..(i + 1) * nvp],
                    &pb,
                    ea,
                    eb,
                    &mut tmp_poly,
                    nvp,
                );
                let last_poly = poly_buf.len() / nvp - 1;
                if j != last_poly {
                    let tail: Vec<u16> = poly_buf[last_poly * nvp..].to_vec();
                    poly_buf[j * nvp..(j + 1) * nvp].copy_from_slice(&tail);
                }
                poly_buf.truncate(last_poly * nvp);
                poly_regs.swap_remove(j);
                poly_areas.swap_remove(j);
            }
        }

        for (p, poly) in poly_buf.chunks(nvp).enumerate() {
            self.polys.extend_from_slice(poly);
            self.polys.extend(std::iter::repeat(MESH_NULL_IDX).take(nvp));
            self.regs.push(poly_regs[p]);
            self.areas.push(poly_areas[p]);
            self.flags.push(0);
            self.npolys += 1;
        }

        // Drop the vertex and shift every index above it
        let rem = rem as usize;
        self.verts.drain(rem * 3..rem * 3 + 3);
        self.nverts -= 1;
        for v in self.polys.iter_mut() {
            if *v != MESH_NULL_IDX && *v != EXTERNAL_EDGE && (*v as usize) > rem {
                *v -= 1;
            }
        }

        Ok(())
    }

    fn build_adjacency(&mut self) -> Result<()> {
        let nvp = self.nvp;
        let max_edge_count = self.npolys * nvp;

        struct Edge {
            vert: [u16; 2],
            poly: [u16; 2],
            poly_edge: [u16; 2],
        }

        const NO_EDGE: usize = usize::MAX;
        let mut first_edge = vec![NO_EDGE; self.nverts];
        let mut next_edge = vec![NO_EDGE; max_edge_count];
        let mut edges: Vec<Edge> = Vec::with_capacity(max_edge_count);

        for p in 0..self.npolys {
            let base = p * nvp * 2;
            let nv = self.poly_vert_count(p);
            for j in 0..nv {
                let v0 = self.polys[base + j];
                let v1 = self.polys[base + (j + 1) % nv];
                if v0 < v1 {
                    next_edge[edges.len()] = first_edge[v0 as usize];
                    first_edge[v0 as usize] = edges.len();
                    edges.push(Edge {
                        vert: [v0, v1],
                        poly: [p as u16, p as u16],
                        poly_edge: [j as u16, 0],
                    });
                }
            }
        }

        for p in 0..self.npolys {
            let base = p * nvp * 2;
            let nv = self.poly_vert_count(p);
            for j in 0..nv {
                let v0 = self.polys[base + j];
                let v1 = self.polys[base + (j + 1) % nv];
                if v0 > v1 {
                    let mut e = first_edge[v1 as usize];
                    while e != NO_EDGE {
                        let edge = &mut edges[e];
                        if edge.vert[1] == v0 && edge.poly[0] == edge.poly[1] {
                            edge.poly[1] = p as u16;
                            edge.poly_edge[1] = j as u16;
                            break;
                        }
                        e = next_edge[e];
                    }
                }
            }
        }

        for edge in &edges {
            if edge.poly[0] != edge.poly[1] {
                let p0 = edge.poly[0] as usize;
                let p1 = edge.poly[1] as usize;
                self.polys[p0 * nvp * 2 + nvp + edge.poly_edge[0] as usize] = edge.poly[1];
                self.polys[p1 * nvp * 2 + nvp + edge.poly_edge[1] as usize] = edge.poly[0];
            }
        }

        Ok(())
    }

    /// Marks open edges lying on the tile boundary as portals to the
    /// neighboring tile.
    fn mark_portal_edges(&mut self, cset: &ContourSet) {
        if self.border_size <= 0 {
            return;
        }
        let w = cset.width as u16;
        let h = cset.height as u16;
        let nvp = self.nvp;

        for p in 0..self.npolys {
            let base = p * nvp * 2;
            let nv = self.poly_vert_count(p);
            for j in 0..nv {
                if self.polys[base + nvp + j] != MESH_NULL_IDX {
                    continue;
                }
                let va = self.polys[base + j] as usize;
                let vb = self.polys[base + (j + 1) % nv] as usize;
                let (ax, az) = (self.verts[va * 3], self.verts[va * 3 + 2]);
                let (bx, bz) = (self.verts[vb * 3], self.verts[vb * 3 + 2]);

                if ax == 0 && bx == 0 {
                    self.polys[base + nvp + j] = EXTERNAL_EDGE;
                } else if az == h && bz == h {
                    self.polys[base + nvp + j] = EXTERNAL_EDGE | 1;
                } else if ax == w && bx == w {
                    self.polys[base + nvp + j] = EXTERNAL_EDGE | 2;
                } else if az == 0 && bz == 0 {
                    self.polys[base + nvp + j] = EXTERNAL_EDGE | 3;
                }
            }
        }
    }
}

fn compute_vertex_hash(x: u16, z: u16) -> usize {
    const H1: u32 = 0x8da6_b343;
    const H3: u32 = 0xcb1a_b31f;
    let n = H1.wrapping_mul(x as u32).wrapping_add(H3.wrapping_mul(z as u32));
    (n as usize) & (VERTEX_BUCKET_COUNT - 1)
}

fn add_vertex(
    x: u16,
    y: u16,
    z: u16,
    verts: &mut Vec<u16>,
    first_vert: &mut [i32; VERTEX_BUCKET_COUNT],
    next_vert: &mut [i32],
    nverts: &mut usize,
) -> u16 {
    let bucket = compute_vertex_hash(x, z);
    let mut i = first_vert[bucket];

    while i != -1 {
        let v = &verts[i as usize * 3..i as usize * 3 + 3];
        if v[0] == x && v[2] == z && (v[1] as i32 - y as i32).abs() <= 2 {
            return i as u16;
        }
        i = next_vert[i as usize];
    }

    let i = *nverts;
    verts.extend_from_slice(&[x, y, z]);
    next_vert[i] = first_vert[bucket];
    first_vert[bucket] = i as i32;
    *nverts += 1;
    i as u16
}

#[inline]
fn prev(i: usize, n: usize) -> usize {
    (i + n - 1) % n
}

#[inline]
fn next(i: usize, n: usize) -> usize {
    (i + 1) % n
}

fn area2(a: &[i32; 4], b: &[i32; 4], c: &[i32; 4]) -> i32 {
    (b[0] - a[0]) * (c[2] - a[2]) - (c[0] - a[0]) * (b[2] - a[2])
}

fn left(a: &[i32; 4], b: &[i32; 4], c: &[i32; 4]) -> bool {
    area2(a, b, c) < 0
}

fn left_on(a: &[i32; 4], b: &[i32; 4], c: &[i32; 4]) -> bool {
    area2(a, b, c) <= 0
}

fn collinear(a: &[i32; 4], b: &[i32; 4], c: &[i32; 4]) -> bool {
    area2(a, b, c) == 0
}

fn xorb(a: bool, b: bool) -> bool {
    a != b
}

fn intersect_prop(a: &[i32; 4], b: &[i32; 4], c: &[i32; 4], d: &[i32; 4]) -> bool {
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }
    xorb(left(a, b, c), left(a, b, d)) && xorb(left(c, d, a), left(c, d, b))
}

fn between(a: &[i32; 4], b: &[i32; 4], c: &[i32; 4]) -> bool {
    if !collinear(a, b, c) {
        return false;
    }
    if a[0] != b[0] {
        (a[0] <= c[0] && c[0] <= b[0]) || (a[0] >= c[0] && c[0] >= b[0])
    } else {
        (a[2] <= c[2] && c[2] <= b[2]) || (a[2] >= c[2] && c[2] >= b[2])
    }
}

fn intersect(a: &[i32; 4], b: &[i32; 4], c: &[i32; 4], d: &[i32; 4]) -> bool {
    intersect_prop(a, b, c, d)
        || between(a, b, c)
        || between(a, b, d)
        || between(c, d, a)
        || between(c, d, b)
}

fn vequal(a: &[i32; 4], b: &[i32; 4]) -> bool {
    a[0] == b[0] && a[2] == b[2]
}

fn diagonalie(i: usize, j: usize, n: usize, verts: &[[i32; 4]], indices: &[i32]) -> bool {
    let d0 = &verts[(indices[i] & INDEX_MASK) as usize];
    let d1 = &verts[(indices[j] & INDEX_MASK) as usize];

    for k in 0..n {
        let k1 = next(k, n);
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = &verts[(indices[k] & INDEX_MASK) as usize];
        let p1 = &verts[(indices[k1] & INDEX_MASK) as usize];
        if vequal(d0, p0) || vequal(d1, p0) || vequal(d0, p1) || vequal(d1, p1) {
            continue;
        }
        if intersect(d0, d1, p0, p1) {
            return false;
        }
    }
    true
}

fn in_cone(i: usize, j: usize, n: usize, verts: &[[i32; 4]], indices: &[i32]) -> bool {
    let pi = &verts[(indices[i] & INDEX_MASK) as usize];
    let pj = &verts[(indices[j] & INDEX_MASK) as usize];
    let pi1 = &verts[(indices[next(i, n)] & INDEX_MASK) as usize];
    let pin1 = &verts[(indices[prev(i, n)] & INDEX_MASK) as usize];

    if left_on(pin1, pi, pi1) {
        left(pi, pj, pin1) && left(pj, pi, pi1)
    } else {
        !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
    }
}

fn diagonal(i: usize, j: usize, n: usize, verts: &[[i32; 4]], indices: &[i32]) -> bool {
    in_cone(i, j, n, verts, indices) && diagonalie(i, j, n, verts, indices)
}

fn diagonalie_loose(i: usize, j: usize, n: usize, verts: &[[i32; 4]], indices: &[i32]) -> bool {
    let d0 = &verts[(indices[i] & INDEX_MASK) as usize];
    let d1 = &verts[(indices[j] & INDEX_MASK) as usize];

    for k in 0..n {
        let k1 = next(k, n);
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = &verts[(indices[k] & INDEX_MASK) as usize];
        let p1 = &verts[(indices[k1] & INDEX_MASK) as usize];
        if vequal(d0, p0) || vequal(d1, p0) || vequal(d0, p1) || vequal(d1, p1) {
            continue;
        }
        if intersect_prop(d0, d1, p0, p1) {
            return false;
        }
    }
    true
}

fn in_cone_loose(i: usize, j: usize, n: usize, verts: &[[i32; 4]], indices: &[i32]) -> bool {
    let pi = &verts[(indices[i] & INDEX_MASK) as usize];
    let pj = &verts[(indices[j] & INDEX_MASK) as usize];
    let pi1 = &verts[(indices[next(i, n)] & INDEX_MASK) as usize];
    let pin1 = &verts[(indices[prev(i, n)] & INDEX_MASK) as usize];

    if left_on(pin1, pi, pi1) {
        left_on(pi, pj, pin1) && left_on(pj, pi, pi1)
    } else {
        !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
    }
}

fn diagonal_loose(i: usize, j: usize, n: usize, verts: &[[i32; 4]], indices: &[i32]) -> bool {
    in_cone_loose(i, j, n, verts, indices) && diagonalie_loose(i, j, n, verts, indices)
}

/// Ear-clips a polygon into triangles of raw-vertex indices.
///
/// Returns `false` when the polygon was degenerate enough that only a partial
/// triangulation was produced.
fn triangulate(verts: &[[i32; 4]], indices: &mut Vec<i32>, tris: &mut Vec<[i32; 3]>) -> bool {
    tris.clear();
    let mut n = indices.len();
    let mut complete = true;

    for i in 0..n {
        let i1 = next(i, n);
        let i2 = next(i1, n);
        if diagonal(i, i2, n, verts, indices) {
            indices[i1] |= EAR_FLAG;
        }
    }

    while n > 3 {
        let mut min_len = -1i64;
        let mut min_i = None;

        for i in 0..n {
            let i1 = next(i, n);
            if indices[i1] & EAR_FLAG != 0 {
                let p0 = &verts[(indices[i] & INDEX_MASK) as usize];
                let p2 = &verts[(indices[next(i1, n)] & INDEX_MASK) as usize];
                let dx = (p2[0] - p0[0]) as i64;
                let dz = (p2[2] - p0[2]) as i64;
                let len = dx * dx + dz * dz;
                if min_len < 0 || len < min_len {
                    min_len = len;
                    min_i = Some(i);
                }
            }
        }

        if min_i.is_none() {
            // Try loosened diagonals before giving up on the polygon
            for i in 0..n {
                let i1 = next(i, n);
                if diagonal_loose(i, next(i1, n), n, verts, indices) {
                    let p0 = &verts[(indices[i] & INDEX_MASK) as usize];
                    let p2 = &verts[(indices[next(i1, n)] & INDEX_MASK) as usize];
                    let dx = (p2[0] - p0[0]) as i64;
                    let dz = (p2[2] - p0[2]) as i64;
                    let len = dx * dx + dz * dz;
                    if min_len < 0 || len < min_len {
                        min_len = len;
                        min_i = Some(i);
                    }
                }
            }
        }

        let Some(i) = min_i else {
            complete = false;
            break;
        };
        let mut i1 = next(i, n);
        let i2 = next(i1, n);

        tris.push([
            indices[i] & INDEX_MASK,
            indices[i1] & INDEX_MASK,
            indices[i2] & INDEX_MASK,
        ]);

        // Remove i1 by shifting the tail down
        n -= 1;
        for k in i1..n {
            indices[k] = indices[k + 1];
        }
        if i1 >= n {
            i1 = 0;
        }
        let i = prev(i1, n);

        if diagonal(prev(i, n), i1, n, verts, indices) {
            indices[i] |= EAR_FLAG;
        } else {
            indices[i] &= INDEX_MASK;
        }
        if diagonal(i, next(i1, n), n, verts, indices) {
            indices[i1] |= EAR_FLAG;
        } else {
            indices[i1] &= INDEX_MASK;
        }
    }

    if n == 3 {
        tris.push([
            indices[0] & INDEX_MASK,
            indices[1] & INDEX_MASK,
            indices[2] & INDEX_MASK,
        ]);
    }

    complete
}

fn count_poly_verts(poly: &[u16]) -> usize {
    poly.iter().take_while(|&&v| v != MESH_NULL_IDX).count()
}

fn uleft(a: &[u16], b: &[u16], c: &[u16]) -> bool {
    (b[0] as i32 - a[0] as i32) * (c[2] as i32 - a[2] as i32)
        - (c[0] as i32 - a[0] as i32) * (b[2] as i32 - a[2] as i32)
        < 0
}

/// Squared length of the shared edge when the merge is legal, else -1.
fn poly_merge_value(pa: &[u16], pb: &[u16], verts: &[u16], nvp: usize) -> (i32, usize, usize) {
    let na = count_poly_verts(pa);
    let nb = count_poly_verts(pb);

    if na + nb - 2 > nvp {
        return (-1, 0, 0);
    }

    // Shared edge, if any
    let mut ea = None;
    let mut eb = None;
    for i in 0..na {
        let va0 = pa[i];
        let va1 = pa[(i + 1) % na];
        for j in 0..nb {
            let vb0 = pb[j];
            let vb1 = pb[(j + 1) % nb];
            if va0 == vb1 && va1 == vb0 {
                ea = Some(i);
                eb = Some(j);
            }
        }
    }
    let (Some(ea), Some(eb)) = (ea, eb) else {
        return (-1, 0, 0);
    };

    // The merged polygon must stay convex
    let v = |idx: u16| &verts[idx as usize * 3..idx as usize * 3 + 3];

    let va = pa[(ea + na - 1) % na];
    let vb = pa[ea];
    let vc = pb[(eb + 2) % nb];
    if !uleft(v(va), v(vb), v(vc)) {
        return (-1, 0, 0);
    }

    let va = pb[(eb + nb - 1) % nb];
    let vb = pb[eb];
    let vc = pa[(ea + 2) % na];
    if !uleft(v(va), v(vb), v(vc)) {
        return (-1, 0, 0);
    }

    let va = pa[ea];
    let vb = pa[(ea + 1) % na];
    let dx = verts[va as usize * 3] as i32 - verts[vb as usize * 3] as i32;
    let dz = verts[va as usize * 3 + 2] as i32 - verts[vb as usize * 3 + 2] as i32;
    (dx * dx + dz * dz, ea, eb)
}

fn merge_poly_verts(
    pa: &mut [u16],
    pb: &[u16],
    ea: usize,
    eb: usize,
    tmp: &mut [u16],
    nvp: usize,
) {
    let na = count_poly_verts(pa);
    let nb = count_poly_verts(pb);

    tmp.fill(MESH_NULL_IDX);
    let mut n = 0;
    for i in 0..na - 1 {
        tmp[n] = pa[(ea + 1 + i) % na];
        n += 1;
    }
    for i in 0..nb - 1 {
        tmp[n] = pb[(eb + 1 + i) % nb];
        n += 1;
    }
    pa[..nvp].copy_from_slice(&tmp[..nvp]);
}

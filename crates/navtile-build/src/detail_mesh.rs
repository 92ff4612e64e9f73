//! Detail mesh: a triangulated height overlay per polygon.
//!
//! Each polygon's edges are tessellated and simplified against the compact
//! heightfield, interior samples are taken on a grid, and the worst-error
//! sample is inserted repeatedly, re-triangulating with a Delaunay hull until
//! the surface is within the sampling error.

use navtile_common::{Error, Result};

use crate::compact_heightfield::CompactHeightfield;
use crate::polymesh::{PolyMesh, MESH_NULL_IDX};

const MAX_VERTS: usize = 127;
const MAX_VERTS_PER_EDGE: usize = 32;

const EV_UNDEF: i32 = -1;
const EV_HULL: i32 = -2;

/// Triangulated height detail for every polygon of a mesh
#[derive(Debug, Clone, Default)]
pub struct PolyMeshDetail {
    /// Per-polygon patch: vertex base, vertex count, triangle base, triangle count
    pub meshes: Vec<[u32; 4]>,
    /// Detail vertex components, three `f32` per vertex
    pub verts: Vec<f32>,
    /// Triangles: three vertex indices plus edge flags, four bytes each
    pub tris: Vec<u8>,
}

impl PolyMeshDetail {
    /// Samples the compact heightfield under every polygon of `pmesh`.
    pub fn build(
        pmesh: &PolyMesh,
        chf: &CompactHeightfield,
        sample_dist: f32,
        sample_max_error: f32,
    ) -> Result<Self> {
        if pmesh.nverts == 0 || pmesh.npolys == 0 {
            return Ok(Self::default());
        }

        let nvp = pmesh.nvp;
        let mut detail = Self {
            meshes: Vec::with_capacity(pmesh.npolys),
            verts: Vec::new(),
            tris: Vec::new(),
        };

        let mut poly: Vec<[f32; 3]> = Vec::with_capacity(nvp);

        for p in 0..pmesh.npolys {
            let base = p * nvp * 2;

            poly.clear();
            for j in 0..nvp {
                let v = pmesh.polys[base + j];
                if v == MESH_NULL_IDX {
                    break;
                }
                let vx = pmesh.bmin.x + pmesh.verts[v as usize * 3] as f32 * pmesh.cs;
                let vy = pmesh.bmin.y + pmesh.verts[v as usize * 3 + 1] as f32 * pmesh.ch;
                let vz = pmesh.bmin.z + pmesh.verts[v as usize * 3 + 2] as f32 * pmesh.cs;
                poly.push([vx, vy, vz]);
            }
            if poly.len() < 3 {
                return Err(Error::BuildStage(format!(
                    "degenerate polygon {p} in detail build"
                )));
            }

            let (verts, tris) = build_poly_detail(&poly, chf, sample_dist, sample_max_error)?;

            let vert_base = detail.verts.len() as u32 / 3;
            let tri_base = detail.tris.len() as u32 / 4;
            detail
                .meshes
                .push([vert_base, verts.len() as u32, tri_base, tris.len() as u32]);

            for v in &verts {
                detail.verts.extend_from_slice(v);
            }
            for t in &tris {
                detail.tris.push(t[0] as u8);
                detail.tris.push(t[1] as u8);
                detail.tris.push(t[2] as u8);
                detail.tris.push(tri_edge_flags(t, &verts, &poly));
            }
        }

        log::debug!(
            "built detail mesh: {} vertices, {} triangles",
            detail.verts.len() / 3,
            detail.tris.len() / 4
        );
        Ok(detail)
    }
}

fn build_poly_detail(
    poly: &[[f32; 3]],
    chf: &CompactHeightfield,
    sample_dist: f32,
    sample_max_error: f32,
) -> Result<(Vec<[f32; 3]>, Vec<[i32; 3]>)> {
    let mut verts: Vec<[f32; 3]> = poly.to_vec();
    let mut hull: Vec<usize> = Vec::new();
    let mut edge_points: Vec<[f32; 3]> = Vec::with_capacity(MAX_VERTS_PER_EDGE + 1);

    // Tessellate and simplify the polygon edges against the heightfield
    if sample_dist > 0.0 {
        for j in 0..poly.len() {
            let vj = poly[j];
            let vi = poly[(j + 1) % poly.len()];

            hull.push(j);

            let dx = vi[0] - vj[0];
            let dz = vi[2] - vj[2];
            let d = (dx * dx + dz * dz).sqrt();
            let nn = ((d / sample_dist).floor() as usize + 1).min(MAX_VERTS_PER_EDGE - 1);
            if nn < 2 || verts.len() >= MAX_VERTS {
                continue;
            }

            edge_points.clear();
            for k in 0..=nn {
                let t = k as f32 / nn as f32;
                let x = vj[0] + dx * t;
                let z = vj[2] + dz * t;
                let estimate = vj[1] + (vi[1] - vj[1]) * t;
                let y = sample_height(chf, x, z, estimate);
                edge_points.push([x, y, z]);
            }

            // Keep only the samples that deviate from the chord
            let mut keep = vec![0usize, nn];
            let mut k = 0;
            while k < keep.len() - 1 {
                let a = keep[k];
                let b = keep[k + 1];
                let mut max_dev = 0.0f32;
                let mut max_idx = None;
                for m in a + 1..b {
                    let dev = distance_pt_seg(&edge_points[m], &edge_points[a], &edge_points[b]);
                    if dev > max_dev {
                        max_dev = dev;
                        max_idx = Some(m);
                    }
                }
                if let Some(idx) = max_idx {
                    if max_dev > sample_max_error * sample_max_error {
                        keep.insert(k + 1, idx);
                        continue;
                    }
                }
                k += 1;
            }

            for &m in keep.iter().skip(1).take(keep.len().saturating_sub(2)) {
                if verts.len() >= MAX_VERTS {
                    break;
                }
                hull.push(verts.len());
                verts.push(edge_points[m]);
            }
        }
    } else {
        hull.extend(0..poly.len());
    }

    let mut tris = delaunay_hull(&verts, &hull);
    if tris.is_empty() {
        // Could not triangulate; fall back to a fan so the polygon still
        // carries a surface
        log::warn!("delaunay triangulation failed, using fan");
        for j in 2..poly.len() {
            tris.push([0, j as i32 - 1, j as i32]);
        }
        return Ok((verts, tris));
    }

    // Insert interior samples where the surface deviates the most
    if sample_dist > 0.0 {
        let mut bmin = poly[0];
        let mut bmax = poly[0];
        for v in poly.iter().skip(1) {
            for k in 0..3 {
                bmin[k] = bmin[k].min(v[k]);
                bmax[k] = bmax[k].max(v[k]);
            }
        }

        let x0 = (bmin[0] / sample_dist).floor() as i32;
        let x1 = (bmax[0] / sample_dist).ceil() as i32;
        let z0 = (bmin[2] / sample_dist).floor() as i32;
        let z1 = (bmax[2] / sample_dist).ceil() as i32;

        let mut samples: Vec<([f32; 3], bool)> = Vec::new();
        for z in z0..z1 {
            for x in x0..x1 {
                let px = x as f32 * sample_dist;
                let pz = z as f32 * sample_dist;
                // Skip samples too close to the polygon edge
                if distance_to_poly(poly, px, pz) > -sample_dist / 2.0 {
                    continue;
                }
                let y = sample_height(chf, px, pz, bmin[1]);
                samples.push(([px, y, pz], false));
            }
        }

        for _ in 0..samples.len() {
            if verts.len() >= MAX_VERTS {
                break;
            }

            let mut best_dist = 0.0f32;
            let mut best = None;
            for (idx, (point, added)) in samples.iter().enumerate() {
                if *added {
                    continue;
                }
                let d = distance_to_tri_mesh(point, &verts, &tris);
                if d > best_dist {
                    best_dist = d;
                    best = Some(idx);
                }
            }
            let Some(best) = best else {
                break;
            };
            if best_dist <= sample_max_error {
                break;
            }

            samples[best].1 = true;
            verts.push(samples[best].0);

            let new_tris = delaunay_hull(&verts, &hull);
            if new_tris.is_empty() {
                verts.pop();
                break;
            }
            tris = new_tris;
        }
    }

    Ok((verts, tris))
}

/// Nearest walkable floor height at a world position, preferring the floor
/// closest to `estimate`.
fn sample_height(chf: &CompactHeightfield, x: f32, z: f32, estimate: f32) -> f32 {
    let ix = (((x - chf.bmin.x) / chf.cs).floor() as i32).clamp(0, chf.width - 1);
    let iz = (((z - chf.bmin.z) / chf.cs).floor() as i32).clamp(0, chf.height - 1);

    let mut best = estimate;
    let mut best_delta = f32::MAX;

    // Search the cell and, if empty, its ring of neighbors
    'outer: for radius in 0..2 {
        for dz in -radius..=radius {
            for dx in -radius..=radius {
                let cx = ix + dx;
                let cz = iz + dz;
                if cx < 0 || cz < 0 || cx >= chf.width || cz >= chf.height {
                    continue;
                }
                let cell = chf.cells[(cx + cz * chf.width) as usize];
                for i in cell.index..cell.index + cell.count {
                    let y = chf.bmin.y + chf.spans[i as usize].y as f32 * chf.ch;
                    let delta = (y - estimate).abs();
                    if delta < best_delta {
                        best_delta = delta;
                        best = y;
                    }
                }
            }
        }
        if best_delta != f32::MAX {
            break 'outer;
        }
    }

    best
}

fn vdist2(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    let dx = b[0] - a[0];
    let dz = b[2] - a[2];
    (dx * dx + dz * dz).sqrt()
}

fn vcross2(p1: &[f32; 3], p2: &[f32; 3], p3: &[f32; 3]) -> f32 {
    let u1 = p2[0] - p1[0];
    let v1 = p2[2] - p1[2];
    let u2 = p3[0] - p1[0];
    let v2 = p3[2] - p1[2];
    u1 * v2 - v1 * u2
}

fn circum_circle(p1: &[f32; 3], p2: &[f32; 3], p3: &[f32; 3]) -> Option<([f32; 3], f32)> {
    const EPS: f32 = 1e-6;
    let cp = vcross2(p1, p2, p3);
    if cp.abs() <= EPS {
        return None;
    }

    let p1sq = p1[0] * p1[0] + p1[2] * p1[2];
    let p2sq = p2[0] * p2[0] + p2[2] * p2[2];
    let p3sq = p3[0] * p3[0] + p3[2] * p3[2];

    let cx = (p1sq * (p2[2] - p3[2]) + p2sq * (p3[2] - p1[2]) + p3sq * (p1[2] - p2[2]))
        / (2.0 * cp);
    let cz = (p1sq * (p3[0] - p2[0]) + p2sq * (p1[0] - p3[0]) + p3sq * (p2[0] - p1[0]))
        / (2.0 * cp);

    let center = [cx, 0.0, cz];
    let radius = vdist2(&center, p1);
    Some((center, radius))
}

fn distance_pt_seg(pt: &[f32; 3], a: &[f32; 3], b: &[f32; 3]) -> f32 {
    let pqx = b[0] - a[0];
    let pqy = b[1] - a[1];
    let pqz = b[2] - a[2];
    let dx = pt[0] - a[0];
    let dy = pt[1] - a[1];
    let dz = pt[2] - a[2];
    let d = pqx * pqx + pqy * pqy + pqz * pqz;
    let mut t = pqx * dx + pqy * dy + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    t = t.clamp(0.0, 1.0);

    let dx = a[0] + t * pqx - pt[0];
    let dy = a[1] + t * pqy - pt[1];
    let dz = a[2] + t * pqz - pt[2];
    dx * dx + dy * dy + dz * dz
}

fn distance_pt_seg_2d(pt: &[f32; 3], a: &[f32; 3], b: &[f32; 3]) -> f32 {
    let pqx = b[0] - a[0];
    let pqz = b[2] - a[2];
    let dx = pt[0] - a[0];
    let dz = pt[2] - a[2];
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    t = t.clamp(0.0, 1.0);

    let dx = a[0] + t * pqx - pt[0];
    let dz = a[2] + t * pqz - pt[2];
    (dx * dx + dz * dz).sqrt()
}

/// Signed distance to the polygon boundary in the ground plane; negative when
/// inside.
fn distance_to_poly(poly: &[[f32; 3]], px: f32, pz: f32) -> f32 {
    let point = [px, 0.0, pz];
    let mut dmin = f32::MAX;
    let mut inside = false;

    for i in 0..poly.len() {
        let j = (i + poly.len() - 1) % poly.len();
        let vi = &poly[i];
        let vj = &poly[j];
        if (vi[2] > pz) != (vj[2] > pz)
            && px < (vj[0] - vi[0]) * (pz - vi[2]) / (vj[2] - vi[2]) + vi[0]
        {
            inside = !inside;
        }
        dmin = dmin.min(distance_pt_seg_2d(&point, vj, vi));
    }

    if inside {
        -dmin
    } else {
        dmin
    }
}

fn dist_pt_tri(p: &[f32; 3], a: &[f32; 3], b: &[f32; 3], c: &[f32; 3]) -> f32 {
    let v0 = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
    let v1 = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let v2 = [p[0] - a[0], p[1] - a[1], p[2] - a[2]];

    let dot00 = v0[0] * v0[0] + v0[2] * v0[2];
    let dot01 = v0[0] * v1[0] + v0[2] * v1[2];
    let dot02 = v0[0] * v2[0] + v0[2] * v2[2];
    let dot11 = v1[0] * v1[0] + v1[2] * v1[2];
    let dot12 = v1[0] * v2[0] + v1[2] * v2[2];

    let denom = dot00 * dot11 - dot01 * dot01;
    if denom.abs() < 1e-9 {
        return f32::MAX;
    }
    let inv = 1.0 / denom;
    let u = (dot11 * dot02 - dot01 * dot12) * inv;
    let v = (dot00 * dot12 - dot01 * dot02) * inv;

    const EPS: f32 = 1e-4;
    if u >= -EPS && v >= -EPS && (u + v) <= 1.0 + EPS {
        let y = a[1] + v0[1] * u + v1[1] * v;
        (y - p[1]).abs()
    } else {
        f32::MAX
    }
}

/// Vertical distance from a point to the triangulated surface, or `MAX` when
/// the point projects outside every triangle.
fn distance_to_tri_mesh(p: &[f32; 3], verts: &[[f32; 3]], tris: &[[i32; 3]]) -> f32 {
    let mut dmin = f32::MAX;
    for t in tris {
        let d = dist_pt_tri(
            p,
            &verts[t[0] as usize],
            &verts[t[1] as usize],
            &verts[t[2] as usize],
        );
        dmin = dmin.min(d);
    }
    dmin
}

fn find_edge(edges: &[[i32; 4]], s: i32, t: i32) -> Option<usize> {
    edges
        .iter()
        .position(|e| (e[0] == s && e[1] == t) || (e[0] == t && e[1] == s))
}

fn add_edge(edges: &mut Vec<[i32; 4]>, s: i32, t: i32, l: i32, r: i32) {
    if find_edge(edges, s, t).is_none() {
        edges.push([s, t, l, r]);
    }
}

fn update_left_face(edge: &mut [i32; 4], s: i32, t: i32, f: i32) {
    if edge[0] == s && edge[1] == t && edge[2] == EV_UNDEF {
        edge[2] = f;
    } else if edge[1] == s && edge[0] == t && edge[3] == EV_UNDEF {
        edge[3] = f;
    }
}

fn overlap_seg_seg_2d(a: &[f32; 3], b: &[f32; 3], c: &[f32; 3], d: &[f32; 3]) -> bool {
    let a1 = vcross2(a, b, d);
    let a2 = vcross2(a, b, c);
    if a1 * a2 < 0.0 {
        let a3 = vcross2(c, d, a);
        let a4 = a3 + a2 - a1;
        if a3 * a4 < 0.0 {
            return true;
        }
    }
    false
}

fn overlap_edges(pts: &[[f32; 3]], edges: &[[i32; 4]], s: i32, t: i32) -> bool {
    for e in edges {
        let s0 = e[0];
        let t0 = e[1];
        if s0 == s || s0 == t || t0 == s || t0 == t {
            continue;
        }
        if overlap_seg_seg_2d(
            &pts[s0 as usize],
            &pts[t0 as usize],
            &pts[s as usize],
            &pts[t as usize],
        ) {
            return true;
        }
    }
    false
}

fn complete_facet(
    pts: &[[f32; 3]],
    edges: &mut Vec<[i32; 4]>,
    nfaces: &mut i32,
    e: usize,
) {
    const EPS: f32 = 1e-5;

    let (s, t) = {
        let edge = &edges[e];
        if edge[2] == EV_UNDEF {
            (edge[0], edge[1])
        } else if edge[3] == EV_UNDEF {
            (edge[1], edge[0])
        } else {
            return;
        }
    };

    // Best point strictly on the left of the edge by the Delaunay criterion
    let mut pt = pts.len();
    let mut center = [0.0f32; 3];
    let mut radius = -1.0f32;

    for u in 0..pts.len() {
        if u as i32 == s || u as i32 == t {
            continue;
        }
        if vcross2(&pts[s as usize], &pts[t as usize], &pts[u]) > EPS {
            if radius < 0.0 {
                if let Some((c, r)) = circum_circle(&pts[s as usize], &pts[t as usize], &pts[u]) {
                    pt = u;
                    center = c;
                    radius = r;
                }
                continue;
            }
            let d = vdist2(&center, &pts[u]);
            let tol = 0.001f32;
            if d > radius * (1.0 + tol) {
                continue;
            }
            if d < radius * (1.0 - tol)
                || (!overlap_edges(pts, edges, s, u as i32)
                    && !overlap_edges(pts, edges, t, u as i32))
            {
                if let Some((c, r)) = circum_circle(&pts[s as usize], &pts[t as usize], &pts[u]) {
                    pt = u;
                    center = c;
                    radius = r;
                }
            }
        }
    }

    if pt < pts.len() {
        update_left_face(&mut edges[e], s, t, *nfaces);

        match find_edge(edges, pt as i32, s) {
            None => add_edge(edges, pt as i32, s, *nfaces, EV_UNDEF),
            Some(e2) => update_left_face(&mut edges[e2], pt as i32, s, *nfaces),
        }
        match find_edge(edges, t, pt as i32) {
            None => add_edge(edges, t, pt as i32, *nfaces, EV_UNDEF),
            Some(e2) => update_left_face(&mut edges[e2], t, pt as i32, *nfaces),
        }

        *nfaces += 1;
    } else {
        update_left_face(&mut edges[e], s, t, EV_HULL);
    }
}

/// Triangulates a point set constrained to the given hull.
fn delaunay_hull(pts: &[[f32; 3]], hull: &[usize]) -> Vec<[i32; 3]> {
    let mut edges: Vec<[i32; 4]> = Vec::with_capacity(pts.len() * 10);
    let mut nfaces = 0i32;

    for i in 0..hull.len() {
        let j = (i + hull.len() - 1) % hull.len();
        add_edge(&mut edges, hull[j] as i32, hull[i] as i32, EV_HULL, EV_UNDEF);
    }

    let mut current = 0;
    while current < edges.len() {
        if edges[current][2] == EV_UNDEF {
            complete_facet(pts, &mut edges, &mut nfaces, current);
        }
        if edges[current][3] == EV_UNDEF {
            complete_facet(pts, &mut edges, &mut nfaces, current);
        }
        current += 1;
    }

    // Assemble triangles from the edge faces
    let mut tris = vec![[-1i32; 3]; nfaces as usize];
    for e in &edges {
        if e[3] >= 0 {
            let t = &mut tris[e[3] as usize];
            if t[0] == -1 {
                t[0] = e[0];
                t[1] = e[1];
            } else if t[0] == e[1] {
                t[2] = e[0];
            } else if t[1] == e[0] {
                t[2] = e[1];
            }
        }
        if e[2] >= 0 {
            let t = &mut tris[e[2] as usize];
            if t[0] == -1 {
                t[0] = e[1];
                t[1] = e[0];
            } else if t[0] == e[0] {
                t[2] = e[1];
            } else if t[1] == e[1] {
                t[2] = e[0];
            }
        }
    }
    tris.retain(|t| t[0] != -1 && t[1] != -1 && t[2] != -1);
    tris
}

/// Marks which triangle edges lie on the polygon boundary.
fn tri_edge_flags(tri: &[i32; 3], verts: &[[f32; 3]], poly: &[[f32; 3]]) -> u8 {
    let on_boundary = |a: &[f32; 3], b: &[f32; 3]| -> bool {
        const THR: f32 = 0.001;
        for i in 0..poly.len() {
            let j = (i + 1) % poly.len();
            if distance_pt_seg_2d(a, &poly[i], &poly[j]) < THR
                && distance_pt_seg_2d(b, &poly[i], &poly[j]) < THR
            {
                return true;
            }
        }
        false
    };

    let mut flags = 0u8;
    for e in 0..3 {
        let a = &verts[tri[e] as usize];
        let b = &verts[tri[(e + 1) % 3] as usize];
        if on_boundary(a, b) {
            flags |= 1 << (e * 2);
        }
    }
    flags
}

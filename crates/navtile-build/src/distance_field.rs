//! Distance field over the compact heightfield.
//!
//! Two chamfer sweeps (forward and reverse, costs 2/3) measure each span's
//! distance to the nearest area boundary, followed by a small box blur to
//! stabilize the watershed levels built on top.

use crate::compact_heightfield::CompactHeightfield;
use crate::{DIR_OFFSET_X, DIR_OFFSET_Z};

impl CompactHeightfield {
    /// Computes the distance field and records the maximum distance.
    pub fn build_distance_field(&mut self) {
        let span_count = self.spans.len();
        let mut src = vec![u16::MAX; span_count];

        // Boundary spans: fewer than four same-area neighbors
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cells[(x + z * self.width) as usize];
                for i in cell.index..cell.index + cell.count {
                    let span = self.spans[i as usize];
                    let area = self.areas[i as usize];

                    let mut nc = 0;
                    for dir in 0..4 {
                        if let Some(ai) = self.neighbor_index(x, z, &span, dir) {
                            if self.areas[ai] == area {
                                nc += 1;
                            }
                        }
                    }
                    if nc != 4 {
                        src[i as usize] = 0;
                    }
                }
            }
        }

        // Pass 1: top-left to bottom-right, relaxing through W and S links
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cells[(x + z * self.width) as usize];
                for i in cell.index..cell.index + cell.count {
                    let i = i as usize;
                    let span = self.spans[i];

                    if let Some(ai) = self.neighbor_index(x, z, &span, 0) {
                        src[i] = src[i].min(src[ai].saturating_add(2));
                        let nspan = self.spans[ai];
                        if let Some(aai) =
                            self.neighbor_index(x + DIR_OFFSET_X[0], z + DIR_OFFSET_Z[0], &nspan, 3)
                        {
                            src[i] = src[i].min(src[aai].saturating_add(3));
                        }
                    }
                    if let Some(ai) = self.neighbor_index(x, z, &span, 3) {
                        src[i] = src[i].min(src[ai].saturating_add(2));
                        let nspan = self.spans[ai];
                        if let Some(aai) =
                            self.neighbor_index(x + DIR_OFFSET_X[3], z + DIR_OFFSET_Z[3], &nspan, 2)
                        {
                            src[i] = src[i].min(src[aai].saturating_add(3));
                        }
                    }
                }
            }
        }

        // Pass 2: bottom-right to top-left, relaxing through E and N links
        for z in (0..self.height).rev() {
            for x in (0..self.width).rev() {
                let cell = self.cells[(x + z * self.width) as usize];
                for i in cell.index..cell.index + cell.count {
                    let i = i as usize;
                    let span = self.spans[i];

                    if let Some(ai) = self.neighbor_index(x, z, &span, 2) {
                        src[i] = src[i].min(src[ai].saturating_add(2));
                        let nspan = self.spans[ai];
                        if let Some(aai) =
                            self.neighbor_index(x + DIR_OFFSET_X[2], z + DIR_OFFSET_Z[2], &nspan, 1)
                        {
                            src[i] = src[i].min(src[aai].saturating_add(3));
                        }
                    }
                    if let Some(ai) = self.neighbor_index(x, z, &span, 1) {
                        src[i] = src[i].min(src[ai].saturating_add(2));
                        let nspan = self.spans[ai];
                        if let Some(aai) =
                            self.neighbor_index(x + DIR_OFFSET_X[1], z + DIR_OFFSET_Z[1], &nspan, 0)
                        {
                            src[i] = src[i].min(src[aai].saturating_add(3));
                        }
                    }
                }
            }
        }

        let max_distance = src.iter().copied().max().unwrap_or(0);

        self.dist = self.box_blur(&src, 1);
        self.max_distance = max_distance;

        log::debug!("distance field built, max distance {max_distance}");
    }

    fn box_blur(&self, src: &[u16], threshold: u16) -> Vec<u16> {
        let threshold = threshold * 2;
        let mut dst = vec![0u16; src.len()];

        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cells[(x + z * self.width) as usize];
                for i in cell.index..cell.index + cell.count {
                    let i = i as usize;
                    let span = self.spans[i];
                    let cd = src[i];

                    if cd <= threshold {
                        dst[i] = cd;
                        continue;
                    }

                    let mut d = cd as u32;
                    for dir in 0..4 {
                        if let Some(ai) = self.neighbor_index(x, z, &span, dir) {
                            d += src[ai] as u32;

                            let nspan = self.spans[ai];
                            let dir2 = (dir + 1) & 3;
                            if let Some(aai) = self.neighbor_index(
                                x + DIR_OFFSET_X[dir],
                                z + DIR_OFFSET_Z[dir],
                                &nspan,
                                dir2,
                            ) {
                                d += src[aai] as u32;
                            } else {
                                d += cd as u32;
                            }
                        } else {
                            d += cd as u32 * 2;
                        }
                    }
                    dst[i] = ((d + 5) / 9) as u16;
                }
            }
        }

        dst
    }
}

#[cfg(test)]
mod tests {
    use crate::compact_heightfield::CompactHeightfield;
    use crate::heightfield::Heightfield;
    use glam::Vec3;
    use navtile_common::AREA_TERRAIN;

    #[test]
    fn interior_spans_are_farther_than_edges() {
        let size = 9;
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

        let index_of = |x: i32, z: i32| {
            let cell = chf.cells[(x + z * chf.width) as usize];
            cell.index as usize
        };

        let center = chf.dist[index_of(4, 4)];
        let edge = chf.dist[index_of(0, 4)];
        assert_eq!(edge, 0);
        assert!(center > edge);
        assert!(chf.max_distance >= center);
    }
}

//! Compact, connectivity-aware form of the voxel heightfield.
//!
//! Only walkable floors survive compaction. Each compact span links to at
//! most one span per cardinal direction; the climb tolerance used while
//! linking is a parameter so the rebuild pipeline can compact permissively
//! and prune afterwards with [`CompactHeightfield::enforce_walkable_climb`].

use glam::Vec3;
use navtile_common::{is_walkable_area, Error, Result, AREA_TERRAIN};

use crate::heightfield::{Heightfield, MAX_SPAN_HEIGHT};
use crate::{DIR_OFFSET_X, DIR_OFFSET_Z};

/// Sentinel for an absent neighbor link
pub const NOT_CONNECTED: u16 = 0xffff;

/// Region id flag marking the tile border
pub const BORDER_REGION: u16 = 0x8000;

/// A column of the compact heightfield
#[derive(Debug, Clone, Copy)]
pub struct CompactCell {
    /// Index of the column's first span in the span array
    pub index: u32,
    /// Number of spans in the column
    pub count: u32,
}

/// A walkable floor with its free space and neighbor links
#[derive(Debug, Clone, Copy)]
pub struct CompactSpan {
    /// Floor height in voxels
    pub y: i32,
    /// Free voxels above the floor
    pub h: i32,
    /// Per-direction link: span index relative to the neighbor cell start
    pub con: [u16; 4],
    /// Region id (0 = unassigned)
    pub reg: u16,
}

/// Packed heightfield of walkable floors
#[derive(Debug, Clone)]
pub struct CompactHeightfield {
    pub width: i32,
    pub height: i32,

    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,

    pub cells: Vec<CompactCell>,
    pub spans: Vec<CompactSpan>,
    /// Area bit-set per span
    pub areas: Vec<u8>,
    /// Distance field value per span
    pub dist: Vec<u16>,

    pub max_distance: u16,
    pub max_regions: u16,
    pub walkable_height: i32,
    pub border_size: i32,
}

impl CompactHeightfield {
    /// Builds the compact form from a filtered heightfield.
    ///
    /// `walkable_climb` caps the floor delta across a link; the rebuild
    /// pipeline passes `i32::MAX` here and prunes selectively afterwards.
    pub fn build(
        heightfield: &Heightfield,
        walkable_height: i32,
        walkable_climb: i32,
    ) -> Result<Self> {
        let width = heightfield.width;
        let height = heightfield.height;

        let mut cells = Vec::with_capacity((width * height) as usize);
        let mut spans = Vec::new();
        let mut areas = Vec::new();

        for z in 0..height {
            for x in 0..width {
                let start = spans.len();
                let mut cur = heightfield.column_head(x, z);
                while let Some(key) = cur {
                    let span = heightfield.span(key);
                    cur = span.next;

                    if !is_walkable_area(span.area) {
                        continue;
                    }

                    let floor = span.smax;
                    let ceiling = match span.next {
                        Some(next) => heightfield.span(next).smin,
                        None => MAX_SPAN_HEIGHT,
                    };

                    spans.push(CompactSpan {
                        y: floor,
                        h: ceiling - floor,
                        con: [NOT_CONNECTED; 4],
                        reg: 0,
                    });
                    areas.push(span.area);
                }
                cells.push(CompactCell {
                    index: start as u32,
                    count: (spans.len() - start) as u32,
                });
            }
        }

        let mut bmax = heightfield.bmax;
        bmax.y += walkable_height as f32 * heightfield.ch;

        let span_count = spans.len();
        let mut chf = Self {
            width,
            height,
            bmin: heightfield.bmin,
            bmax,
            cs: heightfield.cs,
            ch: heightfield.ch,
            cells,
            spans,
            areas,
            dist: vec![0; span_count],
            max_distance: 0,
            max_regions: 0,
            walkable_height,
            border_size: 0,
        };
        chf.build_connections(walkable_height, walkable_climb)?;

        log::debug!(
            "compacted heightfield: {}x{} cells, {} walkable spans",
            width,
            height,
            span_count
        );
        Ok(chf)
    }

    fn build_connections(&mut self, walkable_height: i32, walkable_climb: i32) -> Result<()> {
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cells[(x + z * self.width) as usize];

                for i in cell.index..cell.index + cell.count {
                    let span = self.spans[i as usize];

                    for dir in 0..4 {
                        let nx = x + DIR_OFFSET_X[dir];
                        let nz = z + DIR_OFFSET_Z[dir];
                        if nx < 0 || nz < 0 || nx >= self.width || nz >= self.height {
                            continue;
                        }

                        let ncell = self.cells[(nx + nz * self.width) as usize];
                        for k in ncell.index..ncell.index + ncell.count {
                            let nspan = self.spans[k as usize];

                            let bot = span.y.max(nspan.y);
                            let top = (span.y + span.h).min(nspan.y + nspan.h);

                            if top - bot >= walkable_height
                                && (nspan.y - span.y).abs() <= walkable_climb
                            {
                                let local = k - ncell.index;
                                if local >= NOT_CONNECTED as u32 {
                                    return Err(Error::BuildStage(format!(
                                        "too many spans in cell ({nx}, {nz}) to link"
                                    )));
                                }
                                self.spans[i as usize].con[dir] = local as u16;
                                break;
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Global span index of the neighbor linked in `dir`, if any.
    #[inline]
    pub fn neighbor_index(&self, x: i32, z: i32, span: &CompactSpan, dir: usize) -> Option<usize> {
        let con = span.con[dir];
        if con == NOT_CONNECTED {
            return None;
        }
        let nx = x + DIR_OFFSET_X[dir];
        let nz = z + DIR_OFFSET_Z[dir];
        let ncell = self.cells[(nx + nz * self.width) as usize];
        Some((ncell.index + con as u32) as usize)
    }

    /// Cuts every neighbor link whose floor delta exceeds `walkable_climb`,
    /// unless both endpoints are pure terrain. NPC movement handles terrain
    /// slope out-of-band, so terrain-to-terrain steps keep their links.
    pub fn enforce_walkable_climb(&mut self, walkable_climb: i32) {
        let mut cut = 0usize;

        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cells[(x + z * self.width) as usize];

                for i in cell.index..cell.index + cell.count {
                    let span = self.spans[i as usize];
                    let area = self.areas[i as usize];

                    for dir in 0..4 {
                        let Some(ni) = self.neighbor_index(x, z, &span, dir) else {
                            continue;
                        };

                        if (self.spans[ni].y - span.y).abs() <= walkable_climb {
                            continue;
                        }
                        if area == AREA_TERRAIN && self.areas[ni] == AREA_TERRAIN {
                            continue;
                        }

                        self.spans[i as usize].con[dir] = NOT_CONNECTED;
                        cut += 1;
                    }
                }
            }
        }

        if cut > 0 {
            log::debug!("walkable climb enforcement cut {cut} span links");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navtile_common::{AREA_DOODAD, AREA_TERRAIN};

    fn flat_field(size: i32, terrain_top: i32) -> Heightfield {
        let mut hf = Heightfield::new(
            size,
            size,
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(size as f32, 20.0, size as f32),
            1.0,
            1.0,
        );
        for z in 0..size {
            for x in 0..size {
                hf.add_span(x, z, 0, terrain_top, AREA_TERRAIN, 1).unwrap();
            }
        }
        hf
    }

    #[test]
    fn compaction_keeps_only_walkable_floors() {
        let mut hf = flat_field(4, 2);
        // One unwalkable obstacle span above the floor of (1, 1)
        hf.add_span(1, 1, 5, 8, navtile_common::AREA_NULL, 1).unwrap();

        let chf = CompactHeightfield::build(&hf, 2, i32::MAX).unwrap();
        assert_eq!(chf.spans.len(), 16);
        assert!(chf.areas.iter().all(|&a| a == AREA_TERRAIN));
    }

    #[test]
    fn links_are_reciprocal() {
        let hf = flat_field(4, 2);
        let chf = CompactHeightfield::build(&hf, 2, i32::MAX).unwrap();

        for z in 0..chf.height {
            for x in 0..chf.width {
                let cell = chf.cells[(x + z * chf.width) as usize];
                for i in cell.index..cell.index + cell.count {
                    let span = chf.spans[i as usize];
                    for dir in 0..4 {
                        if let Some(ni) = chf.neighbor_index(x, z, &span, dir) {
                            let back = (dir + 2) % 4;
                            let nx = x + DIR_OFFSET_X[dir];
                            let nz = z + DIR_OFFSET_Z[dir];
                            let reciprocal =
                                chf.neighbor_index(nx, nz, &chf.spans[ni], back);
                            assert_eq!(reciprocal, Some(i as usize));
                        }
                    }
                }
            }
        }
    }

    fn cliff_field(area_low: u8, area_high: u8) -> Heightfield {
        let mut hf = Heightfield::new(
            6,
            6,
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(6.0, 60.0, 6.0),
            1.0,
            1.0,
        );
        for z in 0..6 {
            for x in 0..6 {
                let (top, area) = if x < 3 { (1, area_low) } else { (21, area_high) };
                hf.add_span(x, z, 0, top, area, 1).unwrap();
            }
        }
        hf
    }

    #[test]
    fn infinite_climb_connects_across_cliff() {
        let hf = cliff_field(AREA_TERRAIN, AREA_TERRAIN);
        let chf = CompactHeightfield::build(&hf, 2, i32::MAX).unwrap();

        // Span at (2, 3) links east across the 20-voxel step
        let cell = chf.cells[(2 + 3 * chf.width) as usize];
        let span = chf.spans[cell.index as usize];
        assert_ne!(span.con[2], NOT_CONNECTED);
    }

    #[test]
    fn selective_climb_keeps_terrain_pairs_only() {
        for (low, high, expect_link) in [
            (AREA_TERRAIN, AREA_TERRAIN, true),
            (AREA_TERRAIN, AREA_DOODAD, false),
            (AREA_DOODAD, AREA_DOODAD, false),
        ] {
            let hf = cliff_field(low, high);
            let mut chf = CompactHeightfield::build(&hf, 2, i32::MAX).unwrap();
            chf.enforce_walkable_climb(4);

            let cell = chf.cells[(2 + 3 * chf.width) as usize];
            let span = chf.spans[cell.index as usize];
            assert_eq!(span.con[2] != NOT_CONNECTED, expect_link);

            // Surviving links all satisfy the invariant
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
                                assert!(dy <= 4 || both_terrain);
                            }
                        }
                    }
                }
            }
        }
    }
}

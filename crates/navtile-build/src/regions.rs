//! Watershed region partitioning over the distance field.
//!
//! Levels descend from the maximum distance toward zero; existing regions
//! expand into newly included spans and unclaimed spans seed new regions.
//! Small regions are then pruned or merged and ids compacted. Seeding order
//! is the span linear index, which makes the partition deterministic.

use navtile_common::{is_walkable_area, Error, Result};

use crate::compact_heightfield::{CompactHeightfield, BORDER_REGION};
use crate::{DIR_OFFSET_X, DIR_OFFSET_Z};

#[derive(Debug)]
struct Region {
    span_count: i32,
    id: u16,
    area_type: u8,
    remap: bool,
    connections: Vec<u16>,
    floors: Vec<u16>,
}

impl Region {
    fn new(id: u16) -> Self {
        Self {
            span_count: 0,
            id,
            area_type: 0,
            remap: false,
            connections: Vec::new(),
            floors: Vec::new(),
        }
    }

    fn connects_to_border(&self) -> bool {
        self.connections
            .iter()
            .any(|&c| c == 0 || c & BORDER_REGION != 0)
    }
}

fn add_unique(list: &mut Vec<u16>, value: u16) {
    if !list.contains(&value) {
        list.push(value);
    }
}

impl CompactHeightfield {
    /// Partitions the walkable spans into regions.
    ///
    /// `border_size` voxels around the field are painted as border regions
    /// that never produce contours. Regions smaller than `min_region_area`
    /// that do not touch a border are dropped; pairs under
    /// `merge_region_area` are merged where possible.
    pub fn build_regions(
        &mut self,
        border_size: i32,
        min_region_area: i32,
        merge_region_area: i32,
    ) -> Result<()> {
        let span_count = self.spans.len();
        let mut src_reg = vec![0u16; span_count];
        let mut src_dist = vec![0u16; span_count];
        let mut region_id: u16 = 1;

        if border_size > 0 {
            let bw = border_size.min(self.width);
            let bh = border_size.min(self.height);

            self.paint_rect_region(0, bw, 0, self.height, region_id | BORDER_REGION, &mut src_reg);
            region_id += 1;
            self.paint_rect_region(
                self.width - bw,
                self.width,
                0,
                self.height,
                region_id | BORDER_REGION,
                &mut src_reg,
            );
            region_id += 1;
            self.paint_rect_region(0, self.width, 0, bh, region_id | BORDER_REGION, &mut src_reg);
            region_id += 1;
            self.paint_rect_region(
                0,
                self.width,
                self.height - bh,
                self.height,
                region_id | BORDER_REGION,
                &mut src_reg,
            );
            region_id += 1;
        }
        self.border_size = border_size;

        let mut stack = Vec::new();
        let mut level = (self.max_distance + 1) & !1u16;

        while level > 0 {
            level = level.saturating_sub(2);

            // Let the current regions grow into spans at this level first
            self.expand_regions(8, level, &mut src_reg, &mut src_dist);

            // Then seed new regions from what is still unclaimed
            for z in 0..self.height {
                for x in 0..self.width {
                    let cell = self.cells[(x + z * self.width) as usize];
                    for i in cell.index..cell.index + cell.count {
                        let i = i as usize;
                        if self.dist[i] < level
                            || src_reg[i] != 0
                            || !is_walkable_area(self.areas[i])
                        {
                            continue;
                        }
                        if self.flood_region(
                            x,
                            z,
                            i,
                            level,
                            region_id,
                            &mut src_reg,
                            &mut src_dist,
                            &mut stack,
                        ) {
                            if region_id == u16::MAX {
                                return Err(Error::BuildStage(
                                    "region id overflow".to_string(),
                                ));
                            }
                            region_id += 1;
                        }
                    }
                }
            }
        }

        self.expand_regions(-1, 0, &mut src_reg, &mut src_dist);

        let max_id = self.merge_and_filter_regions(
            min_region_area,
            merge_region_area,
            region_id,
            &mut src_reg,
        )?;

        for (span, &reg) in self.spans.iter_mut().zip(src_reg.iter()) {
            span.reg = reg;
        }
        self.max_regions = max_id;

        log::debug!("built {} regions", max_id);
        Ok(())
    }

    fn paint_rect_region(
        &self,
        min_x: i32,
        max_x: i32,
        min_z: i32,
        max_z: i32,
        region: u16,
        src_reg: &mut [u16],
    ) {
        for z in min_z..max_z {
            for x in min_x..max_x {
                let cell = self.cells[(x + z * self.width) as usize];
                for i in cell.index..cell.index + cell.count {
                    let i = i as usize;
                    if is_walkable_area(self.areas[i]) {
                        src_reg[i] = region;
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn flood_region(
        &self,
        x: i32,
        z: i32,
        seed: usize,
        level: u16,
        region: u16,
        src_reg: &mut [u16],
        src_dist: &mut [u16],
        stack: &mut Vec<(i32, i32, usize)>,
    ) -> bool {
        let area = self.areas[seed];
        let lev = level.saturating_sub(2);

        stack.clear();
        stack.push((x, z, seed));
        src_reg[seed] = region;
        src_dist[seed] = 0;

        let mut count = 0;

        while let Some((cx, cz, ci)) = stack.pop() {
            let span = self.spans[ci];

            // A span abutting another region (even diagonally) stays
            // unclaimed so the regions keep a clean frontier between them
            let mut adjacent_region = 0u16;
            for dir in 0..4 {
                let Some(ai) = self.neighbor_index(cx, cz, &span, dir) else {
                    continue;
                };
                if self.areas[ai] != area {
                    continue;
                }
                let nr = src_reg[ai];
                if nr & BORDER_REGION != 0 {
                    continue;
                }
                if nr != 0 && nr != region {
                    adjacent_region = nr;
                    break;
                }

                let nspan = self.spans[ai];
                let dir2 = (dir + 1) & 3;
                if let Some(ai2) = self.neighbor_index(
                    cx + DIR_OFFSET_X[dir],
                    cz + DIR_OFFSET_Z[dir],
                    &nspan,
                    dir2,
                ) {
                    if self.areas[ai2] == area {
                        let nr2 = src_reg[ai2];
                        if nr2 & BORDER_REGION == 0 && nr2 != 0 && nr2 != region {
                            adjacent_region = nr2;
                            break;
                        }
                    }
                }
            }
            if adjacent_region != 0 {
                src_reg[ci] = 0;
                continue;
            }
            count += 1;

            for dir in 0..4 {
                let Some(ai) = self.neighbor_index(cx, cz, &span, dir) else {
                    continue;
                };
                if self.areas[ai] == area && self.dist[ai] >= lev && src_reg[ai] == 0 {
                    src_reg[ai] = region;
                    src_dist[ai] = 0;
                    stack.push((cx + DIR_OFFSET_X[dir], cz + DIR_OFFSET_Z[dir], ai));
                }
            }
        }

        count > 0
    }

    fn expand_regions(
        &self,
        max_iterations: i32,
        level: u16,
        src_reg: &mut [u16],
        src_dist: &mut [u16],
    ) {
        let mut stack: Vec<(i32, i32, i64)> = Vec::new();
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cells[(x + z * self.width) as usize];
                for i in cell.index..cell.index + cell.count {
                    let i = i as usize;
                    if self.dist[i] >= level && src_reg[i] == 0 && is_walkable_area(self.areas[i])
                    {
                        stack.push((x, z, i as i64));
                    }
                }
            }
        }

        let mut iteration = 0;
        while !stack.is_empty() {
            let mut failed = 0;
            let mut dirty: Vec<(usize, u16, u16)> = Vec::new();

            for entry in stack.iter_mut() {
                let (x, z, i) = *entry;
                if i < 0 {
                    failed += 1;
                    continue;
                }
                let i = i as usize;

                let span = self.spans[i];
                let area = self.areas[i];
                let mut best_region = 0u16;
                let mut best_dist = u16::MAX;

                for dir in 0..4 {
                    let Some(ai) = self.neighbor_index(x, z, &span, dir) else {
                        continue;
                    };
                    if self.areas[ai] != area {
                        continue;
                    }
                    let nr = src_reg[ai];
                    if nr > 0 && nr & BORDER_REGION == 0 {
                        let d = src_dist[ai].saturating_add(2);
                        if d < best_dist {
                            best_region = nr;
                            best_dist = d;
                        }
                    }
                }

                if best_region != 0 {
                    entry.2 = -1;
                    dirty.push((i, best_region, best_dist));
                } else {
                    failed += 1;
                }
            }

            for (i, r, d) in dirty {
                src_reg[i] = r;
                src_dist[i] = d;
            }

            if failed == stack.len() {
                break;
            }
            if level > 0 {
                iteration += 1;
                if max_iterations != -1 && iteration >= max_iterations {
                    break;
                }
            }
        }
    }

    /// Prunes and merges regions, compacts ids, and returns the highest id.
    fn merge_and_filter_regions(
        &self,
        min_region_area: i32,
        merge_region_area: i32,
        region_count: u16,
        src_reg: &mut [u16],
    ) -> Result<u16> {
        let nreg = region_count as usize;
        let mut regions: Vec<Region> = (0..nreg).map(|r| Region::new(r as u16)).collect();

        // Gather span counts, area types, adjacency and vertical overlaps
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cells[(x + z * self.width) as usize];
                for i in cell.index..cell.index + cell.count {
                    let i = i as usize;
                    let r = src_reg[i];
                    if r == 0 || r as usize >= nreg {
                        continue;
                    }

                    regions[r as usize].span_count += 1;
                    regions[r as usize].area_type = self.areas[i];

                    for j in cell.index..cell.index + cell.count {
                        let j = j as usize;
                        if i == j {
                            continue;
                        }
                        let floor = src_reg[j];
                        if floor != 0 && floor != r {
                            add_unique(&mut regions[r as usize].floors, floor);
                        }
                    }

                    let span = self.spans[i];
                    for dir in 0..4 {
                        match self.neighbor_index(x, z, &span, dir) {
                            Some(ai) => {
                                let nr = src_reg[ai];
                                if nr != r {
                                    add_unique(&mut regions[r as usize].connections, nr);
                                }
                            }
                            None => add_unique(&mut regions[r as usize].connections, 0),
                        }
                    }
                }
            }
        }

        // Remove small regions with no route to a border
        for r in 1..nreg {
            let region = &regions[r];
            if region.id & BORDER_REGION != 0 || region.span_count == 0 {
                continue;
            }
            if region.span_count < min_region_area && !region.connects_to_border() {
                let region = &mut regions[r];
                region.span_count = 0;
                region.id = 0;
            }
        }

        // Merge undersized regions into their smallest compatible neighbor
        let mut merged = true;
        while merged {
            merged = false;

            for r in 1..nreg {
                let region = &regions[r];
                if region.id == 0 || region.id & BORDER_REGION != 0 || region.span_count == 0 {
                    continue;
                }
                if merge_region_area == 0 || region.span_count > merge_region_area {
                    continue;
                }

                let mut smallest = i32::MAX;
                let mut merge_target = region.id;
                for &conn in &region.connections {
                    if conn == 0 || conn & BORDER_REGION != 0 || conn as usize >= nreg {
                        continue;
                    }
                    let other = &regions[conn as usize];
                    if other.id == 0 || other.id == region.id {
                        continue;
                    }
                    if other.area_type != region.area_type
                        || region.floors.contains(&other.id)
                        || other.floors.contains(&region.id)
                    {
                        continue;
                    }
                    if other.span_count < smallest {
                        smallest = other.span_count;
                        merge_target = other.id;
                    }
                }

                if merge_target != region.id {
                    let old_id = region.id;
                    let (span_count, connections, floors) = {
                        let region = &mut regions[r];
                        let c = std::mem::take(&mut region.connections);
                        let f = std::mem::take(&mut region.floors);
                        let n = region.span_count;
                        region.span_count = 0;
                        region.id = merge_target;
                        (n, c, f)
                    };

                    let target = &mut regions[merge_target as usize];
                    target.span_count += span_count;
                    for c in connections {
                        if c != merge_target && c != old_id {
                            add_unique(&mut target.connections, c);
                        }
                    }
                    for f in floors {
                        if f != merge_target {
                            add_unique(&mut target.floors, f);
                        }
                    }
                    target.connections.retain(|&c| c != old_id);

                    // Anything referencing the merged id now points at the target
                    for other in regions.iter_mut() {
                        if other.id == old_id {
                            other.id = merge_target;
                        }
                        for c in other.connections.iter_mut() {
                            if *c == old_id {
                                *c = merge_target;
                            }
                        }
                    }

                    merged = true;
                }
            }
        }

        // Compress ids
        for region in regions.iter_mut() {
            region.remap = region.id != 0 && region.id & BORDER_REGION == 0;
        }
        let mut id_gen: u16 = 0;
        for r in 0..nreg {
            if !regions[r].remap {
                continue;
            }
            let old_id = regions[r].id;
            id_gen += 1;
            for region in regions.iter_mut().skip(r) {
                if region.id == old_id {
                    region.id = id_gen;
                    region.remap = false;
                }
            }
        }

        for value in src_reg.iter_mut() {
            if *value & BORDER_REGION != 0 || *value == 0 {
                continue;
            }
            if (*value as usize) < nreg {
                *value = regions[*value as usize].id;
            }
        }

        Ok(id_gen)
    }
}

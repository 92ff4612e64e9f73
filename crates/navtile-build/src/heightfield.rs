//! Sparse voxel heightfield.
//!
//! Each column of the grid is a singly linked, ascending list of solid spans.
//! Spans live in an arena indexed by [`SpanKey`]; keys stay valid across the
//! filtering passes, which only rewrite span areas in place. Callers rely on
//! that stability to snapshot span sets around a filter (see
//! [`Heightfield::spans_with_area`]).

use glam::Vec3;
use navtile_common::{is_walkable_area, Error, Result, AREA_NULL};

use crate::{DIR_OFFSET_X, DIR_OFFSET_Z};

/// Clamp for span tops; also stands in for "no ceiling" in the filters.
pub const MAX_SPAN_HEIGHT: i32 = 0xffff;

/// Stable handle to a span in a heightfield's arena.
pub type SpanKey = u32;

/// A vertical run of solid voxels within one column
#[derive(Debug, Clone, Copy)]
pub struct Span {
    /// Lower voxel bound
    pub smin: i32,
    /// Upper voxel bound
    pub smax: i32,
    /// Area bit-set (0 = unwalkable)
    pub area: u8,
    /// Next span up the column
    pub next: Option<SpanKey>,
}

/// Heightfield structure holding a grid of span columns
#[derive(Debug, Clone)]
pub struct Heightfield {
    /// Width of the heightfield along the x-axis
    pub width: i32,
    /// Depth of the heightfield along the z-axis
    pub height: i32,

    /// The minimum bounds of the heightfield's AABB
    pub bmin: Vec3,
    /// The maximum bounds of the heightfield's AABB
    pub bmax: Vec3,

    /// Cell size (horizontal resolution)
    pub cs: f32,
    /// Cell height (vertical resolution)
    pub ch: f32,

    columns: Vec<Option<SpanKey>>,
    spans: Vec<Span>,
    free: Vec<SpanKey>,
}

impl Heightfield {
    /// Creates a new empty heightfield
    pub fn new(width: i32, height: i32, bmin: Vec3, bmax: Vec3, cs: f32, ch: f32) -> Self {
        Self {
            width,
            height,
            bmin,
            bmax,
            cs,
            ch,
            columns: vec![None; (width * height) as usize],
            spans: Vec::new(),
            free: Vec::new(),
        }
    }

    #[inline]
    fn column_index(&self, x: i32, z: i32) -> usize {
        (x + z * self.width) as usize
    }

    /// Head of the span list for a column.
    pub fn column_head(&self, x: i32, z: i32) -> Option<SpanKey> {
        self.columns[self.column_index(x, z)]
    }

    #[inline]
    pub fn span(&self, key: SpanKey) -> &Span {
        &self.spans[key as usize]
    }

    #[inline]
    pub fn span_mut(&mut self, key: SpanKey) -> &mut Span {
        &mut self.spans[key as usize]
    }

    fn alloc(&mut self, span: Span) -> SpanKey {
        if let Some(key) = self.free.pop() {
            self.spans[key as usize] = span;
            key
        } else {
            let key = self.spans.len() as SpanKey;
            self.spans.push(span);
            key
        }
    }

    fn release(&mut self, key: SpanKey) {
        self.free.push(key);
    }

    /// Number of live spans across all columns.
    pub fn span_count(&self) -> usize {
        let mut count = 0;
        for z in 0..self.height {
            for x in 0..self.width {
                let mut cur = self.column_head(x, z);
                while let Some(key) = cur {
                    count += 1;
                    cur = self.span(key).next;
                }
            }
        }
        count
    }

    /// Adds a span, merging with any spans it overlaps or touches.
    ///
    /// When the merged top and an absorbed span's top differ by no more than
    /// `flag_merge_threshold`, the area bit-sets are combined; otherwise the
    /// taller span's area wins.
    pub fn add_span(
        &mut self,
        x: i32,
        z: i32,
        smin: i32,
        smax: i32,
        area: u8,
        flag_merge_threshold: i32,
    ) -> Result<()> {
        if x < 0 || z < 0 || x >= self.width || z >= self.height {
            return Err(Error::InvalidMesh(format!(
                "span position out of bounds: ({x}, {z})"
            )));
        }
        if smin > smax {
            return Err(Error::InvalidMesh(format!(
                "invalid span height: min ({smin}) > max ({smax})"
            )));
        }

        self.insert_span(x, z, smin, smax, area, flag_merge_threshold);
        Ok(())
    }

    /// Sorted insert with merge; coordinates must already be in bounds.
    pub(crate) fn insert_span(
        &mut self,
        x: i32,
        z: i32,
        smin: i32,
        smax: i32,
        area: u8,
        flag_merge_threshold: i32,
    ) {
        let column = self.column_index(x, z);

        let mut new_smin = smin;
        let mut new_smax = smax;
        let mut new_area = area;

        let mut prev: Option<SpanKey> = None;
        let mut cur = self.columns[column];

        while let Some(key) = cur {
            let span = self.spans[key as usize];

            if span.smin > new_smax {
                // Remaining spans are entirely above the new one
                break;
            }
            if span.smax < new_smin {
                prev = Some(key);
                cur = span.next;
                continue;
            }

            // Overlapping or touching: fold the existing span into the new one
            if (span.smax - new_smax).abs() <= flag_merge_threshold {
                new_area |= span.area;
            } else if span.smax > new_smax {
                new_area = span.area;
            }
            new_smin = new_smin.min(span.smin);
            new_smax = new_smax.max(span.smax);

            let next = span.next;
            match prev {
                Some(p) => self.spans[p as usize].next = next,
                None => self.columns[column] = next,
            }
            self.release(key);
            cur = next;
        }

        let key = self.alloc(Span {
            smin: new_smin,
            smax: new_smax,
            area: new_area,
            next: cur,
        });
        match prev {
            Some(p) => self.spans[p as usize].next = Some(key),
            None => self.columns[column] = Some(key),
        }
    }

    /// Collects handles to every span whose area intersects `mask`.
    ///
    /// Filters never reallocate the span arena, so the returned keys stay
    /// valid across them; this is the snapshot half of the terrain
    /// preservation contract (the caller re-asserts the flag afterwards).
    pub fn spans_with_area(&self, mask: u8) -> Vec<SpanKey> {
        let mut keys = Vec::new();
        for z in 0..self.height {
            for x in 0..self.width {
                let mut cur = self.column_head(x, z);
                while let Some(key) = cur {
                    let span = self.span(key);
                    if span.area & mask != 0 {
                        keys.push(key);
                    }
                    cur = span.next;
                }
            }
        }
        keys
    }

    /// Marks spans next to a drop or steep step as unwalkable.
    pub fn filter_ledge_spans(&mut self, walkable_height: i32, walkable_climb: i32) {
        for z in 0..self.height {
            for x in 0..self.width {
                let mut cur = self.column_head(x, z);
                while let Some(key) = cur {
                    let span = *self.span(key);
                    cur = span.next;

                    if !is_walkable_area(span.area) {
                        continue;
                    }

                    let floor = span.smax;
                    let ceiling = match span.next {
                        Some(next) => self.span(next).smin,
                        None => MAX_SPAN_HEIGHT,
                    };

                    // Difference to the lowest traversable neighbor floor
                    let mut lowest_diff = MAX_SPAN_HEIGHT;
                    let mut lowest_floor = floor;
                    let mut highest_floor = floor;

                    let mut is_ledge = false;
                    for dir in 0..4 {
                        let nx = x + DIR_OFFSET_X[dir];
                        let nz = z + DIR_OFFSET_Z[dir];

                        if nx < 0 || nz < 0 || nx >= self.width || nz >= self.height {
                            is_ledge = true;
                            break;
                        }

                        let mut neighbor = self.column_head(nx, nz);

                        // Gap below the neighbor column's first span
                        let neighbor_ceiling = match neighbor {
                            Some(first) => self.span(first).smin,
                            None => MAX_SPAN_HEIGHT,
                        };
                        if ceiling.min(neighbor_ceiling) - floor >= walkable_height {
                            is_ledge = true;
                            break;
                        }

                        while let Some(nkey) = neighbor {
                            let nspan = *self.span(nkey);
                            neighbor = nspan.next;

                            let neighbor_floor = nspan.smax;
                            let neighbor_ceiling = match nspan.next {
                                Some(next) => self.span(next).smin,
                                None => MAX_SPAN_HEIGHT,
                            };

                            // Needs enough vertical overlap to traverse into
                            if ceiling.min(neighbor_ceiling) - floor.max(neighbor_floor)
                                < walkable_height
                            {
                                continue;
                            }

                            let diff = neighbor_floor - floor;
                            lowest_diff = lowest_diff.min(diff);

                            if diff.abs() <= walkable_climb {
                                lowest_floor = lowest_floor.min(neighbor_floor);
                                highest_floor = highest_floor.max(neighbor_floor);
                            } else if diff < -walkable_climb {
                                break;
                            }
                        }

                        if lowest_diff < -walkable_climb {
                            break;
                        }
                    }

                    if is_ledge
                        || lowest_diff < -walkable_climb
                        || highest_floor - lowest_floor > walkable_climb
                    {
                        self.span_mut(key).area = AREA_NULL;
                    }
                }
            }
        }
    }

    /// Clears the area of spans without enough clearance above the floor.
    pub fn filter_walkable_low_height_spans(&mut self, walkable_height: i32) {
        for z in 0..self.height {
            for x in 0..self.width {
                let mut cur = self.column_head(x, z);
                while let Some(key) = cur {
                    let span = *self.span(key);
                    cur = span.next;

                    let ceiling = match span.next {
                        Some(next) => self.span(next).smin,
                        None => MAX_SPAN_HEIGHT,
                    };
                    if ceiling - span.smax < walkable_height {
                        self.span_mut(key).area = AREA_NULL;
                    }
                }
            }
        }
    }

    /// Marks unwalkable spans sitting within climb reach above a walkable
    /// span as walkable, so small steps stay traversable.
    pub fn filter_low_hanging_walkable_obstacles(&mut self, walkable_climb: i32) {
        for z in 0..self.height {
            for x in 0..self.width {
                let mut previous: Option<Span> = None;
                let mut previous_walkable = false;
                let mut previous_area = AREA_NULL;

                let mut cur = self.column_head(x, z);
                while let Some(key) = cur {
                    let span = *self.span(key);
                    let walkable = is_walkable_area(span.area);

                    if !walkable && previous_walkable {
                        if let Some(prev) = previous {
                            if span.smax - prev.smax <= walkable_climb {
                                self.span_mut(key).area = previous_area;
                            }
                        }
                    }

                    // Track the original walkability so a run of unwalkable
                    // spans is not promoted span over span.
                    previous_walkable = walkable;
                    previous_area = self.span(key).area;
                    previous = Some(span);
                    cur = span.next;
                }
            }
        }
    }

    /// Asserts the structural column invariant; test support.
    #[cfg(test)]
    pub(crate) fn assert_columns_sorted(&self) {
        for z in 0..self.height {
            for x in 0..self.width {
                let mut last_max: Option<i32> = None;
                let mut cur = self.column_head(x, z);
                while let Some(key) = cur {
                    let span = self.span(key);
                    assert!(span.smin <= span.smax);
                    if let Some(last) = last_max {
                        assert!(span.smin > last, "overlapping spans at ({x}, {z})");
                    }
                    last_max = Some(span.smax);
                    cur = span.next;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navtile_common::{AREA_DOODAD, AREA_TERRAIN};

    fn field() -> Heightfield {
        Heightfield::new(
            4,
            4,
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(4.0, 10.0, 4.0),
            1.0,
            1.0,
        )
    }

    #[test]
    fn add_span_keeps_columns_sorted() {
        let mut hf = field();
        hf.add_span(1, 1, 10, 12, AREA_TERRAIN, 1).unwrap();
        hf.add_span(1, 1, 0, 2, AREA_TERRAIN, 1).unwrap();
        hf.add_span(1, 1, 5, 7, AREA_DOODAD, 1).unwrap();
        hf.assert_columns_sorted();
        assert_eq!(hf.span_count(), 3);
    }

    #[test]
    fn overlapping_spans_merge_with_flag_union() {
        let mut hf = field();
        hf.add_span(0, 0, 0, 10, AREA_TERRAIN, 1).unwrap();
        // Top within the merge threshold: areas union
        hf.add_span(0, 0, 5, 11, AREA_DOODAD, 1).unwrap();

        let head = hf.column_head(0, 0).unwrap();
        let span = hf.span(head);
        assert_eq!((span.smin, span.smax), (0, 11));
        assert_eq!(span.area, AREA_TERRAIN | AREA_DOODAD);
        assert!(span.next.is_none());
    }

    #[test]
    fn taller_span_wins_outside_merge_threshold() {
        let mut hf = field();
        hf.add_span(0, 0, 0, 10, AREA_TERRAIN, 1).unwrap();
        hf.add_span(0, 0, 2, 3, AREA_DOODAD, 1).unwrap();

        let head = hf.column_head(0, 0).unwrap();
        let span = hf.span(head);
        assert_eq!((span.smin, span.smax), (0, 10));
        assert_eq!(span.area, AREA_TERRAIN);
    }

    #[test]
    fn merge_chains_across_multiple_spans() {
        let mut hf = field();
        hf.add_span(2, 2, 0, 2, AREA_TERRAIN, 1).unwrap();
        hf.add_span(2, 2, 4, 6, AREA_TERRAIN, 1).unwrap();
        hf.add_span(2, 2, 8, 10, AREA_TERRAIN, 1).unwrap();
        // Bridges all three
        hf.add_span(2, 2, 1, 9, AREA_DOODAD, 1).unwrap();

        assert_eq!(hf.span_count(), 1);
        let span = hf.span(hf.column_head(2, 2).unwrap());
        assert_eq!((span.smin, span.smax), (0, 10));
        hf.assert_columns_sorted();
    }

    #[test]
    fn low_height_filter_clears_cramped_floors() {
        let mut hf = field();
        hf.add_span(1, 1, 0, 2, AREA_TERRAIN, 1).unwrap();
        hf.add_span(1, 1, 4, 6, AREA_TERRAIN, 1).unwrap();

        // Only 2 voxels of clearance between the spans
        hf.filter_walkable_low_height_spans(3);

        let lower = hf.span(hf.column_head(1, 1).unwrap());
        assert_eq!(lower.area, AREA_NULL);
        let upper = hf.span(lower.next.unwrap());
        assert_eq!(upper.area, AREA_TERRAIN);
    }

    #[test]
    fn ledge_filter_marks_cliff_edge() {
        let mut hf = field();
        // Interior plateau at y=10 surrounded by floor at y=1 exceeds the climb
        for z in 0..4 {
            for x in 0..4 {
                let top = if x >= 2 { 10 } else { 1 };
                hf.add_span(x, z, 0, top, AREA_TERRAIN, 1).unwrap();
            }
        }
        hf.filter_ledge_spans(3, 2);

        // Every span bordering the field edge or the cliff gets cleared
        let edge = hf.span(hf.column_head(2, 1).unwrap());
        assert_eq!(edge.area, AREA_NULL);
    }

    #[test]
    fn terrain_snapshot_survives_ledge_filter() {
        let mut hf = field();
        for z in 0..4 {
            for x in 0..4 {
                let top = if x >= 2 { 30 } else { 1 };
                hf.add_span(x, z, 0, top, AREA_TERRAIN, 1).unwrap();
            }
        }

        let terrain = hf.spans_with_area(AREA_TERRAIN);
        hf.filter_ledge_spans(3, 2);
        for &key in &terrain {
            hf.span_mut(key).area |= AREA_TERRAIN;
        }

        for &key in &terrain {
            assert_ne!(hf.span(key).area & AREA_TERRAIN, 0);
        }
    }

    #[test]
    fn low_hanging_filter_promotes_small_steps() {
        let mut hf = field();
        hf.add_span(0, 0, 0, 4, AREA_TERRAIN, 1).unwrap();
        hf.add_span(0, 0, 5, 6, AREA_NULL, 1).unwrap();

        hf.filter_low_hanging_walkable_obstacles(2);

        let lower = hf.span(hf.column_head(0, 0).unwrap());
        let upper = hf.span(lower.next.unwrap());
        assert_eq!(upper.area, AREA_TERRAIN);
    }

    #[test]
    fn deep_clone_is_independent() {
        let mut hf = field();
        hf.add_span(0, 0, 0, 4, AREA_TERRAIN, 1).unwrap();
        let snapshot = hf.clone();

        hf.add_span(0, 0, 6, 8, AREA_DOODAD, 1).unwrap();
        assert_eq!(hf.span_count(), 2);
        assert_eq!(snapshot.span_count(), 1);
    }
}

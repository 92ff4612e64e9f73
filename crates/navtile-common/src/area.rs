//! Area classes carried by heightfield spans and finished polygons.
//!
//! Areas are a bit-set in the low byte so that span merging can union the
//! sources that contributed to a voxel column interval.

/// Unwalkable / no area assigned
pub const AREA_NULL: u8 = 0x00;
/// Base world terrain (exempt from the climb constraint between terrain neighbors)
pub const AREA_TERRAIN: u8 = 0x01;
/// Liquid surface
pub const AREA_LIQUID: u8 = 0x02;
/// Large world structure geometry
pub const AREA_WMO: u8 = 0x04;
/// Small placed obstacle geometry
pub const AREA_DOODAD: u8 = 0x08;

/// Walkable bit in finished polygon flags; the low bits carry the area bit-set.
pub const POLY_FLAG_WALKABLE: u16 = 0x8000;

/// True when a span area marks walkable surface of any class.
#[inline]
pub fn is_walkable_area(area: u8) -> bool {
    area != AREA_NULL
}

//! Rigid transforms for obstacle placement, and the world/mesh axis mapping.
//!
//! World space is the game's convention: x/y span the ground plane and z is
//! up. The voxel pipeline works in a y-up grid. `world_to_mesh` maps
//! `(x, y, z)` to `(x, z, -y)`, a swap plus one sign flip so the mesh grid
//! stays right-handed; `mesh_to_world` is its exact inverse.

use crate::Vec3;
use glam::{Mat4, Quat};

/// World position to the voxel pipeline's y-up coordinate system.
#[inline]
pub fn world_to_mesh(v: Vec3) -> Vec3 {
    Vec3::new(v.x, v.z, -v.y)
}

/// Voxel pipeline coordinates back to world space.
#[inline]
pub fn mesh_to_world(v: Vec3) -> Vec3 {
    Vec3::new(v.x, -v.z, v.y)
}

/// Flattens world vertices into the pipeline's coordinate order.
pub fn vertices_to_mesh(vertices: &[Vec3]) -> Vec<f32> {
    let mut out = Vec::with_capacity(vertices.len() * 3);
    for &v in vertices {
        let m = world_to_mesh(v);
        out.extend_from_slice(&[m.x, m.y, m.z]);
    }
    out
}

/// A rigid placement: rotation followed by translation, with the inverse
/// precomputed at construction.
#[derive(Debug, Clone, Copy)]
pub struct RigidTransform {
    matrix: Mat4,
    inverse: Mat4,
}

impl RigidTransform {
    /// Composes `T(position) * R(rotation about the world up axis)`.
    pub fn from_position_rotation_z(position: Vec3, angle: f32) -> Self {
        Self::from_matrix(Mat4::from_translation(position) * Mat4::from_rotation_z(angle))
    }

    /// Composes `T(position) * R(quaternion)`. A quaternion describing a
    /// pure z rotation produces the same matrix as
    /// [`RigidTransform::from_position_rotation_z`].
    pub fn from_position_quat(position: Vec3, rotation: Quat) -> Self {
        Self::from_matrix(Mat4::from_translation(position) * Mat4::from_quat(rotation.normalize()))
    }

    fn from_matrix(matrix: Mat4) -> Self {
        debug_assert!(matrix.determinant() > 0.0);
        Self {
            matrix,
            inverse: matrix.inverse(),
        }
    }

    pub fn matrix(&self) -> &Mat4 {
        &self.matrix
    }

    pub fn inverse(&self) -> &Mat4 {
        &self.inverse
    }

    /// Transforms a point into world space.
    pub fn apply(&self, point: Vec3) -> Vec3 {
        self.matrix.transform_point3(point)
    }

    /// Transforms a world-space point back into model space.
    pub fn apply_inverse(&self, point: Vec3) -> Vec3 {
        self.inverse.transform_point3(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mesh_conversion_round_trips() {
        let v = Vec3::new(1.5, -2.25, 7.0);
        assert_eq!(mesh_to_world(world_to_mesh(v)), v);
        // up stays up
        assert_eq!(world_to_mesh(Vec3::new(0.0, 0.0, 3.0)), Vec3::new(0.0, 3.0, 0.0));
    }

    #[test]
    fn quat_and_angle_forms_agree() {
        let position = Vec3::new(10.0, -4.0, 2.0);
        let angle = 1.25f32;
        let a = RigidTransform::from_position_rotation_z(position, angle);
        let b = RigidTransform::from_position_quat(position, Quat::from_rotation_z(angle));

        let p = Vec3::new(3.0, 2.0, 1.0);
        assert!(a.apply(p).distance(b.apply(p)) < 1e-5);
    }

    #[test]
    fn inverse_undoes_transform() {
        let t = RigidTransform::from_position_rotation_z(Vec3::new(5.0, 6.0, 7.0), 0.7);
        let p = Vec3::new(-1.0, 2.0, 0.5);
        assert!(t.apply_inverse(t.apply(p)).distance(p) < 1e-5);
    }
}

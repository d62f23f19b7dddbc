//! Local node transforms.
//!
//! A node's placement relative to its parent is stored as position, rotation
//! (as quaternion) and non-uniform scale. Transforms compose parent-first via
//! `Mul`, the same way world transforms are pushed down the scene graph.

use std::ops::Mul;

use cgmath::{Deg, One, Rad, Rotation3};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: cgmath::Vector3<f32>,
    pub rotation: cgmath::Quaternion<f32>,
    pub scale: cgmath::Vector3<f32>,
}

impl Transform {
    /// Identity transformation (no move, rotate, or scale).
    pub fn new() -> Self {
        Self {
            position: cgmath::Vector3::new(0.0, 0.0, 0.0),
            // `Quaternion::one()` is the identity quaternion (no rotation)
            rotation: cgmath::Quaternion::one(),
            scale: cgmath::Vector3::new(1.0, 1.0, 1.0),
        }
    }

    /// Builds a transform from a scene-description pose.
    ///
    /// Roll, pitch and yaw are applied extrinsically about X, then Y, then Z,
    /// which is `Rz(yaw) * Ry(pitch) * Rx(roll)`.
    pub fn from_pose(position: [f32; 3], rpy: [f32; 3]) -> Self {
        let [roll, pitch, yaw] = rpy;
        let rotation = cgmath::Quaternion::from_angle_z(Rad(yaw))
            * cgmath::Quaternion::from_angle_y(Rad(pitch))
            * cgmath::Quaternion::from_angle_x(Rad(roll));
        Self {
            position: position.into(),
            rotation,
            ..Self::new()
        }
    }

    /// The fixed Z-up to Y-up conversion applied to every finished scene.
    pub fn z_up_to_y_up() -> Self {
        Self {
            rotation: cgmath::Quaternion::from_angle_x(Deg(-90.0)),
            ..Self::new()
        }
    }

    pub fn with_scale(mut self, scale: [f32; 3]) -> Self {
        self.scale = scale.into();
        self
    }

    pub fn to_matrix(&self) -> cgmath::Matrix4<f32> {
        cgmath::Matrix4::from_translation(self.position)
            * cgmath::Matrix4::from(self.rotation)
            * cgmath::Matrix4::from_nonuniform_scale(self.scale.x, self.scale.y, self.scale.z)
    }
}

impl<'a, 'b> Mul<&'b Transform> for &'a Transform {
    type Output = Transform;

    fn mul(self, rhs: &'b Transform) -> Self::Output {
        let new_rotation = self.rotation * rhs.rotation;

        let new_scale = cgmath::Vector3::new(
            self.scale.x * rhs.scale.x,
            self.scale.y * rhs.scale.y,
            self.scale.z * rhs.scale.z,
        );
        let scaled_rhs_pos = cgmath::Vector3::new(
            self.scale.x * rhs.position.x,
            self.scale.y * rhs.position.y,
            self.scale.z * rhs.position.z,
        );
        let new_position = self.position + (self.rotation * scaled_rhs_pos);

        Transform {
            position: new_position,
            rotation: new_rotation,
            scale: new_scale,
        }
    }
}

impl Mul<Transform> for Transform {
    type Output = Self;

    fn mul(self, rhs: Transform) -> Self::Output {
        &self * &rhs
    }
}

impl From<cgmath::Vector3<f32>> for Transform {
    fn from(position: cgmath::Vector3<f32>) -> Self {
        Transform {
            position,
            ..Default::default()
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::new()
    }
}

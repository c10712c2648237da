//! Math types.
//!
//! Only what sector content needs: positions and velocities in sector-local
//! space. No SIMD, no unsafe.

use serde::{Deserialize, Serialize};

/// 3D vector in sector-local units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// True when every component lies within `[-limit, limit]`.
    pub fn within_cube(self, limit: f32) -> bool {
        self.x.abs() <= limit && self.y.abs() <= limit && self.z.abs() <= limit
    }
}

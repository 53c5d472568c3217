// Free-fly camera used by the windowed frontend.
//
// Austin Shafer - 2020

use cgmath::{InnerSpace, Matrix4, Point3, Rad, Vector3};
use std::f32::consts::FRAC_PI_2;

pub struct Camera {
    pub position: Point3<f32>,
    pub yaw: Rad<f32>,
    pub pitch: Rad<f32>,
    pub fovy: Rad<f32>,
    pub aspect: f32,
    pub near: f32,
}

impl Camera {
    pub fn new(position: Point3<f32>, aspect: f32) -> Self {
        Self {
            position,
            yaw: Rad(0.0),
            pitch: Rad(0.0),
            fovy: Rad(std::f32::consts::FRAC_PI_2),
            aspect,
            near: 0.1,
        }
    }

    pub fn forward(&self) -> Vector3<f32> {
        Vector3::new(
            self.yaw.0.cos() * self.pitch.0.cos(),
            self.pitch.0.sin(),
            self.yaw.0.sin() * self.pitch.0.cos(),
        )
        .normalize()
    }

    pub fn right(&self) -> Vector3<f32> {
        self.forward().cross(Vector3::unit_y()).normalize()
    }

    /// Rotates the camera by a mouse delta in pixels. Yaw wraps, pitch clamps
    /// to just shy of +/- pi/2 so the up vector never degenerates.
    pub fn rotate(&mut self, dx: f32, dy: f32, sensitivity: f32) {
        self.yaw += Rad(dx * sensitivity);
        self.pitch -= Rad(dy * sensitivity);

        let limit = FRAC_PI_2 - 0.01;
        if self.pitch.0 > limit {
            self.pitch = Rad(limit);
        } else if self.pitch.0 < -limit {
            self.pitch = Rad(-limit);
        }

        let two_pi = std::f32::consts::PI * 2.0;
        if self.yaw.0 > two_pi {
            self.yaw.0 -= two_pi;
        } else if self.yaw.0 < -two_pi {
            self.yaw.0 += two_pi;
        }
    }

    pub fn view_matrix(&self) -> Matrix4<f32> {
        Matrix4::look_to_rh(self.position, self.forward(), Vector3::unit_y())
    }

    /// Reverse-Z infinite-far perspective: near maps to 1.0, far maps to 0.0.
    pub fn projection_matrix(&self) -> Matrix4<f32> {
        let f = 1.0 / (self.fovy.0 / 2.0).tan();
        Matrix4::new(
            f / self.aspect,
            0.0,
            0.0,
            0.0,
            0.0,
            -f,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            -1.0,
            0.0,
            0.0,
            self.near,
            0.0,
        )
    }
}

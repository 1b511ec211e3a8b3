//! Camera model (pinhole camera with intrinsics and extrinsics).
//!
//! Cameras are used to:
//! - Generate primary rays through image pixels
//! - Transform supplied normal maps between view and world space
//! - Project 3D points for debugging and validation

use nalgebra::{Matrix3, Matrix4, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// A pinhole camera with intrinsic and extrinsic parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Camera {
    /// Focal length in X (pixels)
    pub fx: f32,

    /// Focal length in Y (pixels)
    pub fy: f32,

    /// Principal point X (pixels)
    pub cx: f32,

    /// Principal point Y (pixels)
    pub cy: f32,

    /// Image width (pixels)
    pub width: u32,

    /// Image height (pixels)
    pub height: u32,

    /// Rotation from world to camera coordinates
    pub rotation: Matrix3<f32>,

    /// Translation from world to camera coordinates
    pub translation: Vector3<f32>,
}

impl Camera {
    /// Create a new camera with given parameters.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fx: f32,
        fy: f32,
        cx: f32,
        cy: f32,
        width: u32,
        height: u32,
        rotation: Matrix3<f32>,
        translation: Vector3<f32>,
    ) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            width,
            height,
            rotation,
            translation,
        }
    }

    /// Build a camera from a 3×3 intrinsic matrix K and a camera-to-world pose.
    ///
    /// `pose_c2w` is the 4×4 matrix mapping camera coordinates to world
    /// coordinates (OpenCV convention: +z forward, +y down). Internally we
    /// store the inverse (world→camera) rotation and translation.
    pub fn from_k_and_pose(k: &Matrix3<f32>, pose_c2w: &Matrix4<f32>, width: u32, height: u32) -> Self {
        let r_c2w = pose_c2w.fixed_view::<3, 3>(0, 0).into_owned();
        let t_c2w = pose_c2w.fixed_view::<3, 1>(0, 3).into_owned();

        // world→camera: R = R_c2w^T, t = -R_c2w^T * t_c2w
        let rotation = r_c2w.transpose();
        let translation = -rotation * t_c2w;

        Self::new(
            k[(0, 0)],
            k[(1, 1)],
            k[(0, 2)],
            k[(1, 2)],
            width,
            height,
            rotation,
            translation,
        )
    }

    /// Transform a point from world coordinates to camera coordinates.
    ///
    /// p_camera = R * p_world + t
    pub fn world_to_camera(&self, point_world: &Vector3<f32>) -> Vector3<f32> {
        self.rotation * point_world + self.translation
    }

    /// Project a point in camera coordinates to pixel coordinates.
    ///
    /// Returns None if the point is behind the camera (z <= 0).
    ///
    /// Projection: [u, v] = [fx * x/z + cx, fy * y/z + cy]
    pub fn project(&self, point_camera: &Vector3<f32>) -> Option<Vector2<f32>> {
        if point_camera.z <= 0.0 {
            return None;
        }

        let x = point_camera.x / point_camera.z;
        let y = point_camera.y / point_camera.z;

        Some(Vector2::new(self.fx * x + self.cx, self.fy * y + self.cy))
    }

    /// Project a point from world coordinates directly to pixel coordinates.
    pub fn world_to_pixel(&self, point_world: &Vector3<f32>) -> Option<Vector2<f32>> {
        let point_camera = self.world_to_camera(point_world);
        self.project(&point_camera)
    }

    /// Get the camera center in world coordinates.
    ///
    /// The camera looks from this point.
    pub fn camera_center(&self) -> Vector3<f32> {
        // Camera center in world: C = -R^T * t
        -self.rotation.transpose() * self.translation
    }

    /// Generate the world-space ray through pixel (u, v).
    ///
    /// Returns (origin, unit direction). Pixel coordinates follow the
    /// intrinsics convention: (u, v) = (column, row), measured in pixels.
    pub fn ray_through_pixel(&self, u: f32, v: f32) -> (Vector3<f32>, Vector3<f32>) {
        let dir_camera = Vector3::new((u - self.cx) / self.fx, (v - self.cy) / self.fy, 1.0);
        let dir_world = (self.rotation.transpose() * dir_camera).normalize();
        (self.camera_center(), dir_world)
    }

    /// Rotate a camera-space direction (e.g. a view-space normal) into world space.
    pub fn direction_to_world(&self, dir_camera: &Vector3<f32>) -> Vector3<f32> {
        self.rotation.transpose() * dir_camera
    }

    /// Unit vector from a world point toward the camera center.
    ///
    /// This is the view direction used by the reflectance model.
    pub fn view_direction(&self, point_world: &Vector3<f32>) -> Vector3<f32> {
        (self.camera_center() - point_world).normalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Rotation3;

    fn test_camera() -> Camera {
        Camera::new(
            100.0,
            100.0,
            50.0,
            60.0,
            100,
            120,
            Matrix3::identity(),
            Vector3::zeros(),
        )
    }

    #[test]
    fn test_camera_projection() {
        let cam = test_camera();

        // Point at (1, 0, 2) should project to (100*1/2 + 50, 100*0/2 + 60) = (100, 60)
        let pixel = cam.world_to_pixel(&Vector3::new(1.0, 0.0, 2.0)).unwrap();
        assert_relative_eq!(pixel.x, 100.0, epsilon = 1e-5);
        assert_relative_eq!(pixel.y, 60.0, epsilon = 1e-5);
    }

    #[test]
    fn test_point_behind_camera() {
        let cam = test_camera();
        assert!(cam.world_to_pixel(&Vector3::new(0.0, 0.0, -1.0)).is_none());
    }

    #[test]
    fn test_ray_projects_back_to_pixel() {
        let cam = Camera::new(
            120.0,
            110.0,
            48.0,
            52.0,
            96,
            104,
            Rotation3::from_euler_angles(0.1, -0.2, 0.3).into_inner(),
            Vector3::new(0.5, -0.1, 2.0),
        );

        let (origin, dir) = cam.ray_through_pixel(30.5, 70.25);
        // Any point along the ray must project back to the same pixel.
        let p = origin + dir * 3.7;
        let pixel = cam.world_to_pixel(&p).expect("point should be in front");
        assert_relative_eq!(pixel.x, 30.5, epsilon = 1e-3);
        assert_relative_eq!(pixel.y, 70.25, epsilon = 1e-3);
    }

    #[test]
    fn test_from_k_and_pose_identity() {
        let k = Matrix3::new(100.0, 0.0, 50.0, 0.0, 100.0, 60.0, 0.0, 0.0, 1.0);
        let pose = Matrix4::identity();
        let cam = Camera::from_k_and_pose(&k, &pose, 100, 120);
        assert_relative_eq!(cam.fx, 100.0, epsilon = 1e-6);
        assert_relative_eq!(cam.cy, 60.0, epsilon = 1e-6);
        assert_relative_eq!(cam.camera_center().norm(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_camera_center_matches_pose_translation() {
        let k = Matrix3::new(100.0, 0.0, 50.0, 0.0, 100.0, 60.0, 0.0, 0.0, 1.0);
        let mut pose = Matrix4::identity();
        pose[(0, 3)] = 1.0;
        pose[(1, 3)] = -2.0;
        pose[(2, 3)] = 3.0;
        let cam = Camera::from_k_and_pose(&k, &pose, 100, 120);
        let c = cam.camera_center();
        assert_relative_eq!(c.x, 1.0, epsilon = 1e-5);
        assert_relative_eq!(c.y, -2.0, epsilon = 1e-5);
        assert_relative_eq!(c.z, 3.0, epsilon = 1e-5);
    }
}

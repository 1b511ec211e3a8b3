//! Shared fixtures: analytic spheres and synthetically rendered scenes.
//!
//! The integration tests need ground truth no dataset provides: scenes whose
//! exact geometry, reflectance and shadowing are known in closed form. This
//! module renders such scenes with the crate's own shading and soft-shadow
//! code against *analytic* distance fields, so the learned pipeline is tested
//! against targets it can actually reproduce.

// Each test binary uses its own slice of these fixtures.
#![allow(dead_code)]

use nalgebra::{Matrix3, Vector3};
use psdf_rs::core::math::ray_sphere_intersect;
use psdf_rs::core::{Camera, Light, LightRig};
use psdf_rs::io::{Scene, ViewData};
use psdf_rs::render::{shade, soft_shadow, DistanceField, ShadeInputs, ShadowConfig};
use psdf_rs::field::MaterialSample;

/// Origin-centered analytic sphere.
pub struct Sphere {
    pub radius: f32,
}

impl DistanceField for Sphere {
    fn distance(&self, p: &Vector3<f32>) -> f32 {
        p.norm() - self.radius
    }
}

/// A camera on the z axis at distance `dist`, looking at the origin.
/// `flipped` places it on +z looking back.
pub fn axis_camera(dist: f32, width: u32, height: u32, flipped: bool) -> Camera {
    let fx = 1.5 * width as f32;
    let (rotation, center) = if flipped {
        // Rotation about y by π: camera +z axis is world -z.
        (
            Matrix3::new(-1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, -1.0),
            Vector3::new(0.0, 0.0, dist),
        )
    } else {
        (Matrix3::identity(), Vector3::new(0.0, 0.0, -dist))
    };
    let translation = -rotation * center;
    Camera::new(
        fx,
        fx,
        width as f32 / 2.0,
        height as f32 / 2.0,
        width,
        height,
        rotation,
        translation,
    )
}

/// Render a Lambertian sphere scene: per camera, one image per light, plus
/// the mask and the exact world-space normal map. Shadowing uses the same
/// soft-shadow march the trainer uses, so the targets are reachable.
pub fn lambertian_sphere_scene(
    radius: f32,
    albedo: Vector3<f32>,
    width: u32,
    height: u32,
    cameras: Vec<Camera>,
    light_dirs: &[Vector3<f32>],
) -> Scene {
    let sphere = Sphere { radius };
    let shadow_cfg = ShadowConfig::default();
    let material = MaterialSample {
        albedo,
        roughness: 0.5,
        specular: 0.0,
    };
    let lights: Vec<Light> = light_dirs
        .iter()
        .map(|d| Light::from_calibration(*d, Vector3::new(1.0, 1.0, 1.0)))
        .collect();

    let n_px = (width * height) as usize;
    let mut views = Vec::with_capacity(cameras.len());
    for camera in &cameras {
        let mut images = vec![vec![Vector3::zeros(); n_px]; lights.len()];
        let mut mask = vec![false; n_px];
        let mut normals = vec![Vector3::zeros(); n_px];
        let mut normal_valid = vec![false; n_px];

        for pixel in 0..n_px {
            let u = (pixel % width as usize) as f32 + 0.5;
            let v = (pixel / width as usize) as f32 + 0.5;
            let (origin, dir) = camera.ray_through_pixel(u, v);
            let Some((t_near, _)) = ray_sphere_intersect(&origin, &dir, radius) else {
                continue;
            };
            if t_near <= 0.0 {
                continue;
            }
            let point = origin + dir * t_near;
            let normal = point / point.norm();

            mask[pixel] = true;
            normals[pixel] = normal;
            normal_valid[pixel] = true;

            for (li, light) in lights.iter().enumerate() {
                let light_dir = light.direction();
                let vis = soft_shadow(
                    &sphere,
                    &(point + normal * shadow_cfg.start_offset),
                    &light_dir,
                    &shadow_cfg,
                );
                images[li][pixel] = shade(
                    &ShadeInputs {
                        normal,
                        view_dir: camera.view_direction(&point),
                        light_dir,
                        light_intensity: light.intensity(),
                        visibility: vis,
                    },
                    &material,
                );
            }
        }

        let mask_indices = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &m)| m.then_some(i))
            .collect();
        views.push(ViewData {
            images,
            mask,
            mask_indices,
            normals: Some(normals),
            normal_valid: Some(normal_valid),
            width,
            height,
        });
    }

    let train_views = (0..cameras.len()).collect();
    let train_lights = (0..lights.len()).collect();
    let scene = Scene {
        name: "synthetic-sphere".into(),
        cameras,
        lights: LightRig::Shared(lights),
        views,
        train_views,
        test_views: vec![],
        train_lights,
        visibility: None,
    };
    scene.validate().expect("synthetic scene should be consistent");
    scene
}

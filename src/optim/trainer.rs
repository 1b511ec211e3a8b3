//! The phased joint optimization loop.
//!
//! Each step samples a batch of masked pixels across the training views,
//! traces them against the current field, shades the hits under every
//! training light, and back-propagates the weighted loss into the field, the
//! material head and (in the final phase) the light parameters. Per-ray work
//! is embarrassingly parallel; rayon folds the per-ray gradient
//! contributions into one accumulator and a single Adam step follows.
//!
//! Loss normalization uses the *configured* batch size as the denominator,
//! not the number of rays that happened to hit: a ray that misses the
//! surface or falls outside the mask contributes exactly zero to both the
//! loss and every gradient buffer, instead of silently rescaling the rest of
//! the batch.
//!
//! Three phases, scheduled by iteration count:
//!
//! 1. **NormalWarmup** — geometry only, supervised by the coarse normal maps
//!    and the eikonal term. Gives the tracer a surface worth shading.
//! 2. **Joint** — photometric loss comes in; field and material update
//!    together.
//! 3. **LightRefine** — light directions and intensities unlock on top of
//!    the joint objective, absorbing calibration error last so the material
//!    cannot hide in the lights early on.
//!
//! A non-finite loss or gradient anywhere in a step is a hard error: the
//! step is not applied and optimization stops rather than corrupting the
//! parameters.

use super::adam::{AdamF32, AdamVec3};
use super::loss::{
    eikonal_term, normal_consistency_term, photometric_term, smoothness_term, LossKind,
};
use crate::core::math::ray_sphere_intersect;
use crate::field::init::sample_in_ball;
use crate::field::{MaterialNetwork, SdfNetwork};
use crate::io::{Scene, Snapshot};
use crate::render::{
    implicit_sdf_adjoint, shade, shade_backward, ShadeInputs, ShadowConfig, SphereTracer,
    TraceConfig, VisibilityMode,
};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("non-finite loss or gradient at iteration {iteration}")]
    NonFinite { iteration: usize },

    #[error("no masked pixels in any training view")]
    NoTrainablePixels,

    #[error("snapshot does not match the network shapes")]
    SnapshotMismatch,
}

/// Which parameter groups are live, derived from the iteration count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    NormalWarmup,
    Joint,
    LightRefine,
}

impl Phase {
    pub fn of_iteration(iteration: usize, cfg: &TrainConfig) -> Phase {
        if iteration < cfg.warmup_iters {
            Phase::NormalWarmup
        } else if iteration < cfg.warmup_iters + cfg.joint_iters {
            Phase::Joint
        } else {
            Phase::LightRefine
        }
    }
}

#[derive(Clone, Debug)]
pub struct TrainConfig {
    pub seed: u64,
    /// Rays sampled per step; also the fixed loss denominator.
    pub rays_per_batch: usize,
    pub warmup_iters: usize,
    pub joint_iters: usize,
    pub light_iters: usize,
    pub lr_field: f32,
    pub lr_material: f32,
    pub lr_light: f32,
    pub w_photometric: f32,
    pub w_normal: f32,
    pub w_eikonal: f32,
    pub w_smooth: f32,
    /// Uniform eikonal sample count per step (hit points are added on top).
    pub eikonal_samples: usize,
    pub photometric: LossKind,
    pub trace: TraceConfig,
    pub shadow: ShadowConfig,
    /// Spatial offset radius for the material smoothness pairs.
    pub smooth_delta: f32,
    /// Radius of the bounding sphere rays are clipped to.
    pub scene_radius: f32,
    pub log_every: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            rays_per_batch: 256,
            warmup_iters: 500,
            joint_iters: 2000,
            light_iters: 500,
            lr_field: 5e-4,
            lr_material: 1e-3,
            lr_light: 1e-3,
            w_photometric: 1.0,
            w_normal: 0.1,
            w_eikonal: 0.1,
            w_smooth: 0.01,
            eikonal_samples: 64,
            photometric: LossKind::L1,
            trace: TraceConfig::default(),
            shadow: ShadowConfig::default(),
            smooth_delta: 0.01,
            scene_radius: 1.0,
            log_every: 50,
        }
    }
}

impl TrainConfig {
    pub fn total_iters(&self) -> usize {
        self.warmup_iters + self.joint_iters + self.light_iters
    }
}

/// Per-step statistics, weighted as they enter the total loss.
#[derive(Clone, Copy, Debug)]
pub struct StepStats {
    pub iteration: usize,
    pub phase: Phase,
    pub loss: f32,
    pub photometric: f32,
    pub normal: f32,
    pub eikonal: f32,
    pub smoothness: f32,
    pub rays_hit: usize,
    pub rays_total: usize,
}

/// One sampled primary ray plus the pre-drawn randomness it needs, so the
/// parallel pass stays deterministic and free of shared RNG state.
struct RayJob {
    view: usize,
    pixel: usize,
    smooth_offset: Vector3<f32>,
}

/// Fold target for the parallel ray pass.
struct Accum {
    field_grads: Vec<f32>,
    material_grads: Vec<f32>,
    light_dir_grads: Vec<Vector3<f32>>,
    light_int_grads: Vec<Vector3<f32>>,
    loss_photo: f32,
    loss_normal: f32,
    loss_smooth: f32,
    rays_hit: usize,
    hits: Vec<Vector3<f32>>,
}

impl Accum {
    fn new(n_field: usize, n_material: usize, n_slots: usize) -> Self {
        Self {
            field_grads: vec![0.0; n_field],
            material_grads: vec![0.0; n_material],
            light_dir_grads: vec![Vector3::zeros(); n_slots],
            light_int_grads: vec![Vector3::zeros(); n_slots],
            loss_photo: 0.0,
            loss_normal: 0.0,
            loss_smooth: 0.0,
            rays_hit: 0,
            hits: Vec::new(),
        }
    }

    fn merge(mut self, other: Accum) -> Accum {
        for (a, b) in self.field_grads.iter_mut().zip(other.field_grads) {
            *a += b;
        }
        for (a, b) in self.material_grads.iter_mut().zip(other.material_grads) {
            *a += b;
        }
        for (a, b) in self.light_dir_grads.iter_mut().zip(other.light_dir_grads) {
            *a += b;
        }
        for (a, b) in self.light_int_grads.iter_mut().zip(other.light_int_grads) {
            *a += b;
        }
        self.loss_photo += other.loss_photo;
        self.loss_normal += other.loss_normal;
        self.loss_smooth += other.loss_smooth;
        self.rays_hit += other.rays_hit;
        self.hits.extend(other.hits);
        self
    }
}

#[derive(Debug)]
pub struct Trainer {
    pub scene: Scene,
    pub field: SdfNetwork,
    pub material: MaterialNetwork,
    pub cfg: TrainConfig,
    visibility: VisibilityMode,
    /// Training views that actually contain masked pixels.
    sample_views: Vec<usize>,
    adam_field: AdamF32,
    adam_material: AdamF32,
    adam_light_dir: AdamVec3,
    adam_light_int: AdamVec3,
    rng: StdRng,
    iteration: usize,
}

impl Trainer {
    pub fn new(
        scene: Scene,
        field: SdfNetwork,
        material: MaterialNetwork,
        cfg: TrainConfig,
    ) -> Result<Self, TrainError> {
        let sample_views: Vec<usize> = scene
            .train_views
            .iter()
            .copied()
            .filter(|&v| !scene.views[v].mask_indices.is_empty())
            .collect();
        if sample_views.is_empty() {
            return Err(TrainError::NoTrainablePixels);
        }

        let visibility = match &scene.visibility {
            Some(cache) => VisibilityMode::Cached(cache.clone()),
            None => {
                // Shadow rays march through the same bounding sphere the
                // primary rays are clipped to.
                let mut shadow = cfg.shadow;
                shadow.bound_radius = cfg.scene_radius;
                VisibilityMode::Traced(shadow)
            }
        };

        Ok(Self {
            visibility,
            sample_views,
            adam_field: AdamF32::new(cfg.lr_field, 0.9, 0.999, 1e-8),
            adam_material: AdamF32::new(cfg.lr_material, 0.9, 0.999, 1e-8),
            adam_light_dir: AdamVec3::new(cfg.lr_light, 0.9, 0.999, 1e-8),
            adam_light_int: AdamVec3::new(cfg.lr_light, 0.9, 0.999, 1e-8),
            rng: StdRng::seed_from_u64(cfg.seed),
            iteration: 0,
            scene,
            field,
            material,
            cfg,
        })
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Run one optimization step and apply the parameter updates.
    pub fn step(&mut self) -> Result<StepStats, TrainError> {
        let phase = Phase::of_iteration(self.iteration, &self.cfg);

        // Draw the batch and its randomness up front; the parallel pass is
        // pure after this.
        let jobs: Vec<RayJob> = (0..self.cfg.rays_per_batch)
            .map(|_| {
                let view = self.sample_views[self.rng.gen_range(0..self.sample_views.len())];
                let indices = &self.scene.views[view].mask_indices;
                let pixel = indices[self.rng.gen_range(0..indices.len())];
                RayJob {
                    view,
                    pixel,
                    smooth_offset: sample_in_ball(self.cfg.smooth_delta, &mut self.rng),
                }
            })
            .collect();

        let n_field = self.field.param_count();
        let n_material = self.material.param_count();
        let n_slots = self.scene.lights.slot_count();

        let mut acc = jobs
            .par_iter()
            .fold(
                || Accum::new(n_field, n_material, n_slots),
                |mut acc, job| {
                    self.ray_pass(job, phase, &mut acc);
                    acc
                },
            )
            .reduce(|| Accum::new(n_field, n_material, n_slots), Accum::merge);

        // Eikonal pass: uniform samples plus jittered copies of this batch's
        // hit points, where the term matters most.
        let mut eik_points: Vec<Vector3<f32>> = (0..self.cfg.eikonal_samples)
            .map(|_| sample_in_ball(self.cfg.scene_radius, &mut self.rng))
            .collect();
        for p in &acc.hits {
            eik_points.push(p + sample_in_ball(0.05, &mut self.rng));
        }
        let eik_scale = self.cfg.w_eikonal / eik_points.len().max(1) as f32;
        let (loss_eik, eik_grads) = eik_points
            .par_iter()
            .fold(
                || (0.0f32, vec![0.0f32; n_field]),
                |(mut l, mut g), p| {
                    let (eval, cache) = self.field.evaluate(p);
                    let (el, dg) = eikonal_term(&eval.gradient);
                    l += eik_scale * el;
                    self.field
                        .backward(&cache, 0.0, &(dg * eik_scale), &[], &mut g);
                    (l, g)
                },
            )
            .reduce(
                || (0.0f32, vec![0.0f32; n_field]),
                |(la, mut ga), (lb, gb)| {
                    for (a, b) in ga.iter_mut().zip(gb) {
                        *a += b;
                    }
                    (la + lb, ga)
                },
            );
        for (a, b) in acc.field_grads.iter_mut().zip(eik_grads) {
            *a += b;
        }

        let loss = acc.loss_photo + acc.loss_normal + acc.loss_smooth + loss_eik;
        let finite = loss.is_finite()
            && acc.field_grads.iter().all(|g| g.is_finite())
            && acc.material_grads.iter().all(|g| g.is_finite())
            && acc
                .light_dir_grads
                .iter()
                .chain(acc.light_int_grads.iter())
                .all(|g| g.x.is_finite() && g.y.is_finite() && g.z.is_finite());
        if !finite {
            return Err(TrainError::NonFinite {
                iteration: self.iteration,
            });
        }

        // Phase-gated updates.
        let mut flat = self.field.params_to_vec();
        self.adam_field.step(&mut flat, &acc.field_grads);
        self.field.load_params(&flat);

        if phase != Phase::NormalWarmup {
            let mut flat = self.material.params_to_vec();
            self.adam_material.step(&mut flat, &acc.material_grads);
            self.material.load_params(&flat);
        }

        if phase == Phase::LightRefine {
            let mut dirs: Vec<Vector3<f32>> = self
                .scene
                .lights
                .slots()
                .iter()
                .map(|l| l.raw_direction)
                .collect();
            let mut ints: Vec<Vector3<f32>> = self
                .scene
                .lights
                .slots()
                .iter()
                .map(|l| l.log_intensity)
                .collect();
            self.adam_light_dir.step(&mut dirs, &acc.light_dir_grads);
            self.adam_light_int.step(&mut ints, &acc.light_int_grads);
            for (slot, light) in self.scene.lights.slots_mut().into_iter().enumerate() {
                light.raw_direction = dirs[slot];
                light.log_intensity = ints[slot];
            }
        }

        let stats = StepStats {
            iteration: self.iteration,
            phase,
            loss,
            photometric: acc.loss_photo,
            normal: acc.loss_normal,
            eikonal: loss_eik,
            smoothness: acc.loss_smooth,
            rays_hit: acc.rays_hit,
            rays_total: self.cfg.rays_per_batch,
        };
        self.iteration += 1;
        Ok(stats)
    }

    /// Process one primary ray: trace, shade, back-propagate into `acc`.
    fn ray_pass(&self, job: &RayJob, phase: Phase, acc: &mut Accum) {
        let cfg = &self.cfg;
        let camera = &self.scene.cameras[job.view];
        let view_data = &self.scene.views[job.view];

        let u = (job.pixel % view_data.width as usize) as f32 + 0.5;
        let v = (job.pixel / view_data.width as usize) as f32 + 0.5;
        let (origin, dir) = camera.ray_through_pixel(u, v);

        let Some((near, far)) = ray_sphere_intersect(&origin, &dir, cfg.scene_radius) else {
            return;
        };
        let tracer = SphereTracer::new(cfg.trace);
        let Some(hit) = tracer.trace(&self.field, &origin, &dir, near, far) else {
            return;
        };
        acc.rays_hit += 1;
        acc.hits.push(hit.point);

        let (eval, cache) = self.field.evaluate(&hit.point);
        let g_norm = eval.gradient.norm();
        if g_norm < 1e-6 {
            return;
        }
        let n = eval.gradient / g_norm;
        let inv_rays = 1.0 / cfg.rays_per_batch as f32;

        // Adjoints accumulated across every term touching this ray.
        let mut normal_bar = Vector3::zeros(); // dL/d(unit normal)
        let mut x_bar = Vector3::zeros(); // dL/d(surface point)
        let mut feat_bar: Vec<f32> = Vec::new();

        if let (Some(normals), Some(valid)) = (&view_data.normals, &view_data.normal_valid) {
            if valid[job.pixel] {
                let (l, dn) = normal_consistency_term(&n, &normals[job.pixel]);
                let w = cfg.w_normal * inv_rays;
                acc.loss_normal += w * l;
                normal_bar += dn * w;
            }
        }

        if phase != Phase::NormalWarmup {
            let (mat, mat_cache) = self.material.evaluate(&hit.point, &eval.feature);
            let view_dir = camera.view_direction(&hit.point);
            let n_lights = self.scene.train_lights.len().max(1);
            let w_photo = cfg.w_photometric * inv_rays / n_lights as f32;

            let mut d_albedo = Vector3::zeros();
            let mut d_roughness = 0.0f32;
            let mut d_specular = 0.0f32;

            for &li in &self.scene.train_lights {
                let light = self.scene.lights.light(job.view, li);
                let slot = self.scene.lights.slot(job.view, li);
                let light_dir = light.direction();
                let vis = self.visibility.visibility(
                    &self.field,
                    job.view,
                    li,
                    job.pixel,
                    &hit.point,
                    &n,
                    &light_dir,
                );
                let inputs = ShadeInputs {
                    normal: n,
                    view_dir,
                    light_dir,
                    light_intensity: light.intensity(),
                    visibility: vis,
                };
                let predicted = shade(&inputs, &mat);
                let observed = view_data.images[li][job.pixel];
                let (pl, d_pred) = photometric_term(cfg.photometric, &predicted, &observed);
                acc.loss_photo += w_photo * pl;

                let sg = shade_backward(&inputs, &mat, &(d_pred * w_photo));
                d_albedo += sg.d_albedo;
                d_roughness += sg.d_roughness;
                d_specular += sg.d_specular;
                normal_bar += sg.d_normal;
                acc.light_dir_grads[slot] += light.direction_grad_to_raw(&sg.d_light_dir);
                acc.light_int_grads[slot] += light.intensity_grad_to_log(&sg.d_intensity);
            }

            // Smoothness pair: the hit point against a jittered neighbor.
            // The neighbor moves rigidly with the surface point, so its
            // spatial adjoint joins x_bar too.
            let w_smooth = cfg.w_smooth * inv_rays;
            let neighbor = hit.point + job.smooth_offset;
            let (eval_b, cache_b) = self.field.evaluate(&neighbor);
            let (mat_b, mat_cache_b) = self.material.evaluate(&neighbor, &eval_b.feature);
            let (sl, grad_a, grad_b) = smoothness_term(&mat, &mat_b);
            acc.loss_smooth += w_smooth * sl;
            d_albedo += grad_a.0 * w_smooth;
            d_roughness += grad_a.1 * w_smooth;
            d_specular += grad_a.2 * w_smooth;

            let (pb_bar, featb_bar) = self.material.backward(
                &mat_cache_b,
                &(grad_b.0 * w_smooth),
                grad_b.1 * w_smooth,
                grad_b.2 * w_smooth,
                &mut acc.material_grads,
            );
            x_bar += pb_bar;
            self.field
                .backward(&cache_b, 0.0, &Vector3::zeros(), &featb_bar, &mut acc.field_grads);

            let (pa_bar, feata_bar) = self.material.backward(
                &mat_cache,
                &d_albedo,
                d_roughness,
                d_specular,
                &mut acc.material_grads,
            );
            x_bar += pa_bar;
            feat_bar = feata_bar;
        }

        // Unit-normal adjoint through n = g/|g|: (I - n nᵀ)/|g|.
        let grad_bar = (normal_bar - n * n.dot(&normal_bar)) / g_norm;
        // Surface-point adjoint through the implicit intersection.
        let sdf_bar = implicit_sdf_adjoint(&x_bar, &dir, &eval.gradient);
        self.field
            .backward(&cache, sdf_bar, &grad_bar, &feat_bar, &mut acc.field_grads);
    }

    /// Forward-only radiance for one (view, light, pixel). Black on a miss
    /// or a degenerate gradient.
    fn shade_pixel(&self, tracer: &SphereTracer, view: usize, light: usize, pixel: usize) -> Vector3<f32> {
        let camera = &self.scene.cameras[view];
        let view_data = &self.scene.views[view];
        let u = (pixel % view_data.width as usize) as f32 + 0.5;
        let v = (pixel / view_data.width as usize) as f32 + 0.5;
        let (origin, dir) = camera.ray_through_pixel(u, v);

        let Some(hit) = ray_sphere_intersect(&origin, &dir, self.cfg.scene_radius)
            .and_then(|(near, far)| tracer.trace(&self.field, &origin, &dir, near, far))
        else {
            return Vector3::zeros();
        };

        let (eval, _) = self.field.evaluate(&hit.point);
        let g_norm = eval.gradient.norm();
        if g_norm < 1e-6 {
            return Vector3::zeros();
        }
        let n = eval.gradient / g_norm;
        let (mat, _) = self.material.evaluate(&hit.point, &eval.feature);
        let l = self.scene.lights.light(view, light);
        let light_dir = l.direction();
        let vis = self
            .visibility
            .visibility(&self.field, view, light, pixel, &hit.point, &n, &light_dir);
        shade(
            &ShadeInputs {
                normal: n,
                view_dir: camera.view_direction(&hit.point),
                light_dir,
                light_intensity: l.intensity(),
                visibility: vis,
            },
            &mat,
        )
    }

    /// Render a full (view, light) image with the current parameters.
    /// Pixels outside the mask stay black. Row-major, linear radiance.
    pub fn render_view(&self, view: usize, light: usize) -> Vec<Vector3<f32>> {
        let view_data = &self.scene.views[view];
        let n_px = (view_data.width * view_data.height) as usize;
        let tracer = SphereTracer::new(self.cfg.trace);

        let shaded: Vec<(usize, Vector3<f32>)> = view_data
            .mask_indices
            .par_iter()
            .map(|&px| (px, self.shade_pixel(&tracer, view, light, px)))
            .collect();

        let mut image = vec![Vector3::zeros(); n_px];
        for (px, radiance) in shaded {
            image[px] = radiance;
        }
        image
    }

    /// Mean photometric loss over the held-out views (or the training views
    /// when no test split is declared). Forward only, deterministic; rays
    /// that miss the surface are scored against a black prediction so a
    /// collapsing field cannot look like an improvement.
    pub fn validation_loss(&self, max_rays_per_view: usize) -> f32 {
        let views = if self.scene.test_views.is_empty() {
            &self.scene.train_views
        } else {
            &self.scene.test_views
        };

        let mut jobs: Vec<(usize, usize)> = Vec::new();
        for &v in views {
            let indices = &self.scene.views[v].mask_indices;
            if indices.is_empty() {
                continue;
            }
            let stride = (indices.len() / max_rays_per_view.max(1)).max(1);
            jobs.extend(indices.iter().step_by(stride).map(|&px| (v, px)));
        }
        if jobs.is_empty() {
            return 0.0;
        }

        let tracer = SphereTracer::new(self.cfg.trace);
        let n_lights = self.scene.train_lights.len().max(1);
        let total: f32 = jobs
            .par_iter()
            .map(|&(view, pixel)| {
                let view_data = &self.scene.views[view];
                let mut loss = 0.0f32;
                for &li in &self.scene.train_lights {
                    let observed = view_data.images[li][pixel];
                    let predicted = self.shade_pixel(&tracer, view, li, pixel);
                    loss += photometric_term(self.cfg.photometric, &predicted, &observed).0;
                }
                loss / n_lights as f32
            })
            .sum();
        total / jobs.len() as f32
    }

    /// Run the full phase schedule.
    pub fn run(&mut self) -> Result<(), TrainError> {
        let total = self.cfg.total_iters();
        let log_every = self.cfg.log_every.max(1);
        let mut last_phase = None;

        while self.iteration < total {
            let stats = self.step()?;
            if last_phase != Some(stats.phase) {
                log::info!("iteration {}: entering {:?}", stats.iteration, stats.phase);
                last_phase = Some(stats.phase);
            }
            if stats.iteration % log_every == 0 {
                log::info!(
                    "iter {:5} [{:?}] loss={:.5} photo={:.5} normal={:.5} eik={:.5} smooth={:.5} hits={}/{}",
                    stats.iteration,
                    stats.phase,
                    stats.loss,
                    stats.photometric,
                    stats.normal,
                    stats.eikonal,
                    stats.smoothness,
                    stats.rays_hit,
                    stats.rays_total
                );
            }
        }
        Ok(())
    }

    /// Dump the current parameters.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            field_params: self.field.params_to_vec(),
            material_params: self.material.params_to_vec(),
            lights: self
                .scene
                .lights
                .slots()
                .iter()
                .map(|l| (l.raw_direction, l.log_intensity))
                .collect(),
            iterations: self.iteration as u64,
        }
    }

    /// Restore parameters from a snapshot taken with the same configs.
    pub fn apply_snapshot(&mut self, snap: &Snapshot) -> Result<(), TrainError> {
        if snap.field_params.len() != self.field.param_count()
            || snap.material_params.len() != self.material.param_count()
            || snap.lights.len() != self.scene.lights.slot_count()
        {
            return Err(TrainError::SnapshotMismatch);
        }
        self.field.load_params(&snap.field_params);
        self.material.load_params(&snap.material_params);
        for (light, (dir, li)) in self.scene.lights.slots_mut().into_iter().zip(&snap.lights) {
            light.raw_direction = *dir;
            light.log_intensity = *li;
        }
        self.iteration = snap.iterations as usize;
        Ok(())
    }
}

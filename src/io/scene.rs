//! Scene description and image-stack loading.
//!
//! A scene directory holds one object:
//!
//! ```text
//! <root>/
//!   params.json                  calibration + split description
//!   img/<view>/<NNN>.png         one image per light, per view
//!   mask/<view>.png              binary object mask
//!   normal/<view>.png            optional coarse normal map (RGB-encoded)
//!   norm_mask/<view>.png         optional normal-validity mask
//!   visibility/<view>/<NNN>.png  optional per-light occlusion masks
//! ```
//!
//! `params.json` carries the intrinsic matrix `K`, per-view `pose_c2w`
//! matrices, light directions/intensities (shared across views or per view),
//! train/test view splits, and coordinate-convention flags. Any misalignment
//! between these arrays is a load-time error: optimization never starts on
//! an inconsistent scene. Missing *optional* inputs (normals, visibility)
//! merely disable the corresponding term or switch visibility to on-demand
//! tracing.

use crate::core::{Camera, Light, LightRig};
use crate::render::VisibilityCache;
use nalgebra::{Matrix3, Matrix4, Vector3};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur when loading a scene.
#[derive(Debug, Error)]
pub enum SceneError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid params.json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("missing required file or directory: {0}")]
    Missing(PathBuf),

    #[error("view count mismatch: params declare {declared}, found {found}")]
    ViewCount { declared: usize, found: usize },

    #[error("view {view}: expected {expected} light images, found {found}")]
    LightCount {
        view: usize,
        expected: usize,
        found: usize,
    },

    #[error("view index {index} out of range (n_view = {n_view})")]
    ViewIndex { index: usize, n_view: usize },

    #[error("light layout inconsistent with light_is_same: {0}")]
    LightLayout(String),

    #[error("{path}: expected {expected_w}x{expected_h}, got {got_w}x{got_h}")]
    ImageSize {
        path: PathBuf,
        expected_w: u32,
        expected_h: u32,
        got_w: u32,
        got_h: u32,
    },

    #[error("inconsistent scene: {0}")]
    Inconsistent(String),
}

/// Light directions as they appear in params.json: one shared set, or one
/// set per view.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum LightTable {
    Shared(Vec<[f32; 3]>),
    PerView(Vec<Vec<[f32; 3]>>),
}

/// The parsed params.json.
#[derive(Clone, Debug, Deserialize)]
pub struct SceneParams {
    pub obj_name: String,
    pub n_view: usize,
    /// Image size as [height, width].
    pub imhw: [u32; 2],
    /// Whether supplied normal maps are already in world space.
    #[serde(default)]
    pub gt_normal_world: bool,
    #[serde(default)]
    pub view_train: Vec<usize>,
    #[serde(default)]
    pub view_test: Vec<usize>,
    #[serde(rename = "K")]
    pub k: [[f32; 3]; 3],
    pub pose_c2w: Vec<[[f32; 4]; 4]>,
    #[serde(default = "default_true")]
    pub light_is_same: bool,
    pub light_direction: LightTable,
    #[serde(default)]
    pub light_intensity: Option<LightTable>,
    /// Optional subset of light ids used for training; defaults to all.
    #[serde(default)]
    pub light_train: Option<Vec<usize>>,
}

fn default_true() -> bool {
    true
}

impl SceneParams {
    /// Fail-fast consistency checks on the calibration record alone.
    pub fn validate(&self) -> Result<(), SceneError> {
        if self.pose_c2w.len() != self.n_view {
            return Err(SceneError::ViewCount {
                declared: self.n_view,
                found: self.pose_c2w.len(),
            });
        }
        for &v in self.view_train.iter().chain(self.view_test.iter()) {
            if v >= self.n_view {
                return Err(SceneError::ViewIndex {
                    index: v,
                    n_view: self.n_view,
                });
            }
        }
        match (&self.light_direction, self.light_is_same) {
            (LightTable::Shared(dirs), true) => {
                if dirs.is_empty() {
                    return Err(SceneError::LightLayout("no lights".into()));
                }
            }
            (LightTable::PerView(per), false) => {
                if per.len() != self.n_view {
                    return Err(SceneError::LightLayout(format!(
                        "per-view light table has {} entries for {} views",
                        per.len(),
                        self.n_view
                    )));
                }
                let n = per.first().map_or(0, |l| l.len());
                if n == 0 || per.iter().any(|l| l.len() != n) {
                    return Err(SceneError::LightLayout(
                        "views disagree on light count".into(),
                    ));
                }
            }
            (LightTable::Shared(_), false) => {
                return Err(SceneError::LightLayout(
                    "light_is_same=false but a single shared table was given".into(),
                ));
            }
            (LightTable::PerView(_), true) => {
                return Err(SceneError::LightLayout(
                    "light_is_same=true but a per-view table was given".into(),
                ));
            }
        }
        if let Some(lt) = &self.light_train {
            let n = self.lights_per_view();
            for &l in lt {
                if l >= n {
                    return Err(SceneError::LightLayout(format!(
                        "light_train index {l} out of range ({n} lights)"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn lights_per_view(&self) -> usize {
        match &self.light_direction {
            LightTable::Shared(d) => d.len(),
            LightTable::PerView(p) => p.first().map_or(0, |l| l.len()),
        }
    }

    fn intensity(&self, view: usize, light: usize) -> Vector3<f32> {
        match &self.light_intensity {
            None => Vector3::new(1.0, 1.0, 1.0),
            Some(LightTable::Shared(t)) => Vector3::from(t[light]),
            Some(LightTable::PerView(t)) => Vector3::from(t[view][light]),
        }
    }

    /// Build the light rig in optimization-space parameters.
    pub fn build_lights(&self) -> LightRig {
        match &self.light_direction {
            LightTable::Shared(dirs) => LightRig::Shared(
                dirs.iter()
                    .enumerate()
                    .map(|(l, d)| Light::from_calibration(Vector3::from(*d), self.intensity(0, l)))
                    .collect(),
            ),
            LightTable::PerView(per) => LightRig::PerView(
                per.iter()
                    .enumerate()
                    .map(|(v, dirs)| {
                        dirs.iter()
                            .enumerate()
                            .map(|(l, d)| {
                                Light::from_calibration(Vector3::from(*d), self.intensity(v, l))
                            })
                            .collect()
                    })
                    .collect(),
            ),
        }
    }

    /// Build the per-view cameras from K and pose_c2w.
    pub fn build_cameras(&self) -> Vec<Camera> {
        let k = Matrix3::from_fn(|r, c| self.k[r][c]);
        let (h, w) = (self.imhw[0], self.imhw[1]);
        self.pose_c2w
            .iter()
            .map(|pose| {
                let m = Matrix4::from_fn(|r, c| pose[r][c]);
                Camera::from_k_and_pose(&k, &m, w, h)
            })
            .collect()
    }
}

/// All observations for one view.
#[derive(Clone, Debug)]
pub struct ViewData {
    /// One linear-RGB image per light, row-major.
    pub images: Vec<Vec<Vector3<f32>>>,
    /// Object mask.
    pub mask: Vec<bool>,
    /// Pixel indices inside the mask; the only pixels ever sampled.
    pub mask_indices: Vec<usize>,
    /// Optional coarse normals (world space), used as a regularization target.
    pub normals: Option<Vec<Vector3<f32>>>,
    /// Validity of each normal pixel (only present with `normals`).
    pub normal_valid: Option<Vec<bool>>,
    pub width: u32,
    pub height: u32,
}

/// A fully loaded scene.
#[derive(Clone, Debug)]
pub struct Scene {
    pub name: String,
    pub cameras: Vec<Camera>,
    pub lights: LightRig,
    pub views: Vec<ViewData>,
    pub train_views: Vec<usize>,
    pub test_views: Vec<usize>,
    /// Light ids used during optimization.
    pub train_lights: Vec<usize>,
    /// Precomputed occlusion masks, when the dataset ships them.
    pub visibility: Option<VisibilityCache>,
}

impl Scene {
    /// Load a scene directory, failing fast on any inconsistency.
    pub fn load(root: &Path) -> Result<Scene, SceneError> {
        let params_path = root.join("params.json");
        if !params_path.is_file() {
            return Err(SceneError::Missing(params_path));
        }
        let params: SceneParams = serde_json::from_str(&fs::read_to_string(&params_path)?)?;
        params.validate()?;

        let img_root = root.join("img");
        if !img_root.is_dir() {
            return Err(SceneError::Missing(img_root));
        }
        let view_names = sorted_subdirs(&img_root)?;
        if view_names.len() != params.n_view {
            return Err(SceneError::ViewCount {
                declared: params.n_view,
                found: view_names.len(),
            });
        }

        let n_lights = params.lights_per_view();
        let (h, w) = (params.imhw[0], params.imhw[1]);
        let cameras = params.build_cameras();

        let mut views = Vec::with_capacity(params.n_view);
        let mut vis_masks: Vec<Vec<Vec<bool>>> = Vec::new();
        let mut any_visibility = false;

        for (view_idx, name) in view_names.iter().enumerate() {
            let view_dir = img_root.join(name);
            let image_paths = sorted_files(&view_dir)?;
            if image_paths.len() != n_lights {
                return Err(SceneError::LightCount {
                    view: view_idx,
                    expected: n_lights,
                    found: image_paths.len(),
                });
            }

            let mut images = Vec::with_capacity(n_lights);
            for path in &image_paths {
                images.push(load_linear_rgb(path, w, h)?);
            }

            let mask_path = root.join("mask").join(format!("{name}.png"));
            if !mask_path.is_file() {
                return Err(SceneError::Missing(mask_path));
            }
            let mask = load_binary_mask(&mask_path, w, h)?;
            let mask_indices = mask
                .iter()
                .enumerate()
                .filter_map(|(i, &m)| m.then_some(i))
                .collect();

            // Optional coarse normals.
            let normal_path = root.join("normal").join(format!("{name}.png"));
            if !normal_path.is_file() {
                log::debug!("view {name}: no normal map, consistency term disabled");
            }
            let (normals, normal_valid) = if normal_path.is_file() {
                let (n, mut valid) = load_normal_map(&normal_path, w, h)?;
                let nm_path = root.join("norm_mask").join(format!("{name}.png"));
                if nm_path.is_file() {
                    let nm = load_binary_mask(&nm_path, w, h)?;
                    for (v, m) in valid.iter_mut().zip(nm.iter()) {
                        *v = *v && *m;
                    }
                }
                let n = if params.gt_normal_world {
                    n
                } else {
                    // View-space normals: rotate into world with the
                    // camera-to-world rotation.
                    let cam = &cameras[view_idx];
                    n.iter().map(|d| cam.direction_to_world(d)).collect()
                };
                (Some(n), Some(valid))
            } else {
                (None, None)
            };

            // Optional visibility cache.
            let vis_dir = root.join("visibility").join(name);
            if vis_dir.is_dir() {
                let files = sorted_files(&vis_dir)?;
                if files.len() != n_lights {
                    return Err(SceneError::LightCount {
                        view: view_idx,
                        expected: n_lights,
                        found: files.len(),
                    });
                }
                let mut per_light = Vec::with_capacity(n_lights);
                for f in &files {
                    per_light.push(load_binary_mask(f, w, h)?);
                }
                vis_masks.push(per_light);
                any_visibility = true;
            } else {
                vis_masks.push(Vec::new());
            }

            views.push(ViewData {
                images,
                mask,
                mask_indices,
                normals,
                normal_valid,
                width: w,
                height: h,
            });
        }

        // A partial visibility cache is treated as inconsistent: either every
        // view ships masks or the tracer computes them all.
        let visibility = if any_visibility {
            if vis_masks.iter().any(|v| v.is_empty()) {
                return Err(SceneError::Inconsistent(
                    "visibility masks present for some views but not all".into(),
                ));
            }
            Some(VisibilityCache { masks: vis_masks })
        } else {
            log::info!("no visibility masks shipped; shadows will be traced on demand");
            None
        };

        let train_views = if params.view_train.is_empty() {
            (0..params.n_view).collect()
        } else {
            params.view_train.clone()
        };
        let train_lights = params
            .light_train
            .clone()
            .unwrap_or_else(|| (0..n_lights).collect());

        let scene = Scene {
            name: params.obj_name.clone(),
            cameras,
            lights: params.build_lights(),
            views,
            train_views,
            test_views: params.view_test.clone(),
            train_lights,
            visibility,
        };
        scene.validate()?;
        Ok(scene)
    }

    /// Structural consistency checks; also used by synthetically built scenes.
    pub fn validate(&self) -> Result<(), SceneError> {
        if self.cameras.len() != self.views.len() {
            return Err(SceneError::Inconsistent(format!(
                "{} cameras for {} views",
                self.cameras.len(),
                self.views.len()
            )));
        }
        let n_lights = self.lights.lights_per_view();
        if n_lights == 0 {
            return Err(SceneError::LightLayout("no lights".into()));
        }
        for (i, view) in self.views.iter().enumerate() {
            let n_px = (view.width * view.height) as usize;
            if view.images.len() != n_lights {
                return Err(SceneError::LightCount {
                    view: i,
                    expected: n_lights,
                    found: view.images.len(),
                });
            }
            if view.mask.len() != n_px || view.images.iter().any(|im| im.len() != n_px) {
                return Err(SceneError::Inconsistent(format!(
                    "view {i}: pixel buffers disagree with {}x{}",
                    view.width, view.height
                )));
            }
            if let Some(n) = &view.normals {
                if n.len() != n_px {
                    return Err(SceneError::Inconsistent(format!(
                        "view {i}: normal map size mismatch"
                    )));
                }
            }
        }
        for &v in self.train_views.iter().chain(self.test_views.iter()) {
            if v >= self.views.len() {
                return Err(SceneError::ViewIndex {
                    index: v,
                    n_view: self.views.len(),
                });
            }
        }
        for &l in &self.train_lights {
            if l >= n_lights {
                return Err(SceneError::LightLayout(format!(
                    "train light {l} out of range ({n_lights} lights)"
                )));
            }
        }
        Ok(())
    }
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<String>, SceneError> {
    let mut out: Vec<String> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    out.sort();
    Ok(out)
}

fn sorted_files(dir: &Path) -> Result<Vec<PathBuf>, SceneError> {
    let mut out: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    out.sort();
    Ok(out)
}

pub fn srgb_u8_to_linear_f32(u: u8) -> f32 {
    let cs = (u as f32) / 255.0;
    if cs <= 0.04045 {
        cs / 12.92
    } else {
        ((cs + 0.055) / 1.055).powf(2.4)
    }
}

/// Inverse of `srgb_u8_to_linear_f32`, used when writing rendered images.
pub fn linear_f32_to_srgb_u8(v: f32) -> u8 {
    let v = v.clamp(0.0, 1.0);
    let cs = if v <= 0.0031308 {
        v * 12.92
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    };
    (cs * 255.0 + 0.5) as u8
}

fn check_size(path: &Path, w: u32, h: u32, got_w: u32, got_h: u32) -> Result<(), SceneError> {
    if got_w != w || got_h != h {
        return Err(SceneError::ImageSize {
            path: path.to_path_buf(),
            expected_w: w,
            expected_h: h,
            got_w,
            got_h,
        });
    }
    Ok(())
}

fn load_linear_rgb(path: &Path, w: u32, h: u32) -> Result<Vec<Vector3<f32>>, SceneError> {
    let img = image::open(path)?.to_rgb8();
    check_size(path, w, h, img.width(), img.height())?;
    Ok(img
        .pixels()
        .map(|p| {
            Vector3::new(
                srgb_u8_to_linear_f32(p[0]),
                srgb_u8_to_linear_f32(p[1]),
                srgb_u8_to_linear_f32(p[2]),
            )
        })
        .collect())
}

fn load_binary_mask(path: &Path, w: u32, h: u32) -> Result<Vec<bool>, SceneError> {
    let img = image::open(path)?.to_luma8();
    check_size(path, w, h, img.width(), img.height())?;
    Ok(img.pixels().map(|p| p[0] > 127).collect())
}

/// Decode an RGB-encoded normal map: n = 2 c - 1, valid where |n| is sane.
fn load_normal_map(
    path: &Path,
    w: u32,
    h: u32,
) -> Result<(Vec<Vector3<f32>>, Vec<bool>), SceneError> {
    let img = image::open(path)?.to_rgb8();
    check_size(path, w, h, img.width(), img.height())?;
    let mut normals = Vec::with_capacity((w * h) as usize);
    let mut valid = Vec::with_capacity((w * h) as usize);
    for p in img.pixels() {
        let n = Vector3::new(
            p[0] as f32 / 255.0 * 2.0 - 1.0,
            p[1] as f32 / 255.0 * 2.0 - 1.0,
            p[2] as f32 / 255.0 * 2.0 - 1.0,
        );
        let len = n.norm();
        if len > 0.1 {
            normals.push(n / len);
            valid.push(true);
        } else {
            normals.push(Vector3::zeros());
            valid.push(false);
        }
    }
    Ok((normals, valid))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_params() -> SceneParams {
        serde_json::from_str(
            r#"{
                "obj_name": "test",
                "n_view": 2,
                "imhw": [4, 4],
                "gt_normal_world": false,
                "view_train": [0],
                "view_test": [1],
                "K": [[10.0, 0.0, 2.0], [0.0, 10.0, 2.0], [0.0, 0.0, 1.0]],
                "pose_c2w": [
                    [[1,0,0,0],[0,1,0,0],[0,0,1,-2],[0,0,0,1]],
                    [[1,0,0,0],[0,1,0,0],[0,0,1,2],[0,0,0,1]]
                ],
                "light_is_same": true,
                "light_direction": [[0,0,1],[0,1,0]]
            }"#,
        )
        .expect("valid json")
    }

    #[test]
    fn test_params_parse_and_validate() {
        let p = base_params();
        p.validate().expect("should validate");
        assert_eq!(p.lights_per_view(), 2);
        assert_eq!(p.build_cameras().len(), 2);
        match p.build_lights() {
            LightRig::Shared(l) => assert_eq!(l.len(), 2),
            _ => panic!("expected shared rig"),
        }
    }

    #[test]
    fn test_view_count_mismatch_fails() {
        let mut p = base_params();
        p.n_view = 3;
        assert!(matches!(
            p.validate(),
            Err(SceneError::ViewCount { declared: 3, found: 2 })
        ));
    }

    #[test]
    fn test_bad_view_index_fails() {
        let mut p = base_params();
        p.view_test = vec![7];
        assert!(matches!(p.validate(), Err(SceneError::ViewIndex { index: 7, .. })));
    }

    #[test]
    fn test_light_layout_mismatch_fails() {
        let mut p = base_params();
        p.light_is_same = false;
        assert!(matches!(p.validate(), Err(SceneError::LightLayout(_))));
    }

    #[test]
    fn test_default_intensity_is_unit() {
        let p = base_params();
        let rig = p.build_lights();
        let i = rig.light(0, 0).intensity();
        approx::assert_relative_eq!(i.x, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_missing_params_file() {
        let err = Scene::load(Path::new("/nonexistent/scene")).unwrap_err();
        assert!(matches!(err, SceneError::Missing(_)));
    }
}

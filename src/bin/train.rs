//! psdf-train: jointly optimize geometry, reflectance and lights against a
//! multi-view photometric-stereo capture.
//!
//! Usage:
//!   psdf-train --scene path/to/scene [--out model.psdf] [overrides...]

use anyhow::{bail, Context, Result};
use image::RgbImage;
use psdf_rs::field::init::fit_to_sphere;
use psdf_rs::field::{MaterialConfig, MaterialNetwork, SdfConfig, SdfNetwork};
use psdf_rs::io::{linear_f32_to_srgb_u8, load_snapshot, save_snapshot, Scene};
use psdf_rs::optim::loss::LossKind;
use psdf_rs::{TrainConfig, Trainer};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;

fn usage() {
    eprintln!("Usage:");
    eprintln!("  psdf-train --scene <dir> [--out model.psdf] [--resume model.psdf]");
    eprintln!("             [--warmup-iters N] [--joint-iters N] [--light-iters N]");
    eprintln!("             [--rays N] [--loss l1|l2] [--seed U64]");
    eprintln!("             [--lr-field F] [--lr-material F] [--lr-light F]");
    eprintln!("             [--w-photometric F] [--w-normal F] [--w-eikonal F] [--w-smooth F]");
    eprintln!("             [--scene-radius F] [--no-sphere-init] [--log-interval N]");
    eprintln!("             [--render-dir <dir>]");
    eprintln!();
    eprintln!("  The scene directory layout is described in the io module docs");
    eprintln!("  (params.json + img/ + mask/ [+ normal/ + visibility/]).");
}

fn main() -> Result<()> {
    env_logger::init();
    println!("psdf-train v{}", psdf_rs::VERSION);

    // Minimal CLI parsing (no external deps).
    let mut args = std::env::args().skip(1);
    let mut scene_dir: Option<PathBuf> = None;
    let mut out: PathBuf = PathBuf::from("model.psdf");
    let mut resume: Option<PathBuf> = None;
    let mut render_dir: Option<PathBuf> = None;
    let mut cfg = TrainConfig::default();
    let mut sphere_init = true;
    let mut sphere_init_iters: usize = 500;

    while let Some(a) = args.next() {
        match a.as_str() {
            "--scene" => scene_dir = args.next().map(PathBuf::from),
            "--out" => out = args.next().unwrap().into(),
            "--resume" => resume = args.next().map(PathBuf::from),
            "--render-dir" => render_dir = args.next().map(PathBuf::from),
            "--warmup-iters" => cfg.warmup_iters = args.next().unwrap().parse().unwrap(),
            "--joint-iters" => cfg.joint_iters = args.next().unwrap().parse().unwrap(),
            "--light-iters" => cfg.light_iters = args.next().unwrap().parse().unwrap(),
            "--rays" => cfg.rays_per_batch = args.next().unwrap().parse().unwrap(),
            "--seed" => cfg.seed = args.next().unwrap().parse().unwrap(),
            "--lr-field" => cfg.lr_field = args.next().unwrap().parse().unwrap(),
            "--lr-material" => cfg.lr_material = args.next().unwrap().parse().unwrap(),
            "--lr-light" => cfg.lr_light = args.next().unwrap().parse().unwrap(),
            "--w-photometric" => cfg.w_photometric = args.next().unwrap().parse().unwrap(),
            "--w-normal" => cfg.w_normal = args.next().unwrap().parse().unwrap(),
            "--w-eikonal" => cfg.w_eikonal = args.next().unwrap().parse().unwrap(),
            "--w-smooth" => cfg.w_smooth = args.next().unwrap().parse().unwrap(),
            "--scene-radius" => cfg.scene_radius = args.next().unwrap().parse().unwrap(),
            "--log-interval" => cfg.log_every = args.next().unwrap().parse().unwrap(),
            "--no-sphere-init" => sphere_init = false,
            "--sphere-init-iters" => sphere_init_iters = args.next().unwrap().parse().unwrap(),
            "--loss" => {
                let v = args.next().unwrap();
                cfg.photometric = match v.as_str() {
                    "l1" => LossKind::L1,
                    "l2" => LossKind::L2,
                    other => bail!("unknown --loss {other} (expected: l1 | l2)"),
                };
            }
            "--help" | "-h" => {
                usage();
                return Ok(());
            }
            other => {
                eprintln!("Unknown arg: {other}");
                usage();
                bail!("unknown argument");
            }
        }
    }

    let Some(scene_dir) = scene_dir else {
        usage();
        bail!("missing --scene <dir>");
    };

    let scene = Scene::load(&scene_dir)
        .with_context(|| format!("loading scene from `{}`", scene_dir.display()))?;
    eprintln!(
        "Loaded scene `{}`: {} views ({} train / {} test), {} lights/view, visibility: {}",
        scene.name,
        scene.views.len(),
        scene.train_views.len(),
        scene.test_views.len(),
        scene.lights.lights_per_view(),
        if scene.visibility.is_some() { "cached" } else { "traced" },
    );

    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let sdf_cfg = SdfConfig::default();
    let mut field = SdfNetwork::new(sdf_cfg.clone(), &mut rng);
    let material = MaterialNetwork::new(
        MaterialConfig {
            feature_dim: sdf_cfg.feature_dim,
            ..MaterialConfig::default()
        },
        &mut rng,
    );

    if sphere_init && resume.is_none() {
        eprintln!("Fitting initial sphere ({sphere_init_iters} iters)...");
        let loss = fit_to_sphere(
            &mut field,
            sdf_cfg.sphere_radius,
            cfg.scene_radius,
            sphere_init_iters,
            128,
            1e-3,
            &mut rng,
        );
        eprintln!("Sphere init done (loss {loss:.6})");
    }

    let mut trainer = Trainer::new(scene, field, material, cfg)?;

    if let Some(path) = resume {
        let snap = load_snapshot(&path)
            .with_context(|| format!("loading snapshot `{}`", path.display()))?;
        trainer.apply_snapshot(&snap)?;
        eprintln!(
            "Resumed from `{}` at iteration {}",
            path.display(),
            trainer.iteration()
        );
    }

    let before = trainer.validation_loss(512);
    eprintln!("Initial validation loss: {before:.6}");

    trainer.run()?;

    let after = trainer.validation_loss(512);
    eprintln!("Final validation loss: {after:.6} (was {before:.6})");

    save_snapshot(&out, &trainer.snapshot())
        .with_context(|| format!("saving snapshot `{}`", out.display()))?;
    eprintln!("Saved model to `{}`", out.display());

    if let Some(dir) = render_dir {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating render dir `{}`", dir.display()))?;
        let views = if trainer.scene.test_views.is_empty() {
            trainer.scene.train_views.clone()
        } else {
            trainer.scene.test_views.clone()
        };
        let light = trainer.scene.train_lights.first().copied().unwrap_or(0);
        for view in views {
            let (w, h) = (
                trainer.scene.views[view].width,
                trainer.scene.views[view].height,
            );
            let radiance = trainer.render_view(view, light);
            let mut img = RgbImage::new(w, h);
            for (i, px) in radiance.iter().enumerate() {
                img.put_pixel(
                    i as u32 % w,
                    i as u32 / w,
                    image::Rgb([
                        linear_f32_to_srgb_u8(px.x),
                        linear_f32_to_srgb_u8(px.y),
                        linear_f32_to_srgb_u8(px.z),
                    ]),
                );
            }
            let path = dir.join(format!("view_{view:02}_light_{light:03}.png"));
            img.save(&path)
                .with_context(|| format!("writing `{}`", path.display()))?;
            eprintln!("Rendered `{}`", path.display());
        }
    }
    Ok(())
}

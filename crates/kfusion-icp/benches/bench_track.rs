use criterion::{black_box, criterion_group, criterion_main, Criterion};
use glam::Vec3;

use kfusion_3d::{normals::NormalParams, synthetic::Scene, PinholeCamera, Pyramid};
use kfusion_icp::{accumulate_level, track, IcpParams};
use kfusion_image::ImageSize;
use kfusion_lie::{SE3, SO3};

fn bench_track(c: &mut Criterion) {
    let mut group = c.benchmark_group("ProjectiveIcp");

    let camera = PinholeCamera::new(
        525.0,
        525.0,
        319.5,
        239.5,
        ImageSize {
            width: 640,
            height: 480,
        },
    );
    let scene = Scene::new()
        .with_plane(Vec3::new(0.0, 0.0, 3.0), Vec3::new(0.0, 0.0, -1.0))
        .with_plane(Vec3::new(1.0, 0.0, 0.0), Vec3::new(-1.0, 0.0, 0.0))
        .with_plane(Vec3::new(0.0, 0.8, 0.0), Vec3::new(0.0, -1.0, 0.0))
        .with_sphere(Vec3::new(-0.3, 0.0, 1.8), 0.4);

    let motion = SE3::new(
        SO3::from_axis_angle(Vec3::Y, 1f32.to_radians()),
        Vec3::new(0.01, 0.0, 0.02),
    );
    let params = NormalParams::default();
    let live_depth = scene.render_depth(&camera, &SE3::IDENTITY);
    let model_depth = scene.render_depth(&camera, &motion.inverse());

    let (Ok(live), Ok(model)) = (
        Pyramid::from_depth(&camera, &live_depth, 3, &params),
        Pyramid::from_depth(&camera, &model_depth, 3, &params),
    ) else {
        return;
    };
    let icp = IcpParams::new();

    group.bench_function("accumulate_level_0", |b| {
        b.iter(|| {
            black_box(accumulate_level(
                &live.levels()[0],
                &model.levels()[0],
                black_box(&SE3::IDENTITY),
                &icp,
            ))
        })
    });

    group.bench_function("track_3_levels", |b| {
        b.iter(|| black_box(track(&live, &model, &icp, black_box(&SE3::IDENTITY))))
    });

    group.finish();
}

criterion_group!(benches, bench_track);
criterion_main!(benches);

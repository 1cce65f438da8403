use criterion::{black_box, criterion_group, criterion_main, Criterion};
use glam::Vec3;

use kfusion_3d::{
    normals::{compute_normals, NormalParams},
    synthetic::Scene,
    PinholeCamera, Pyramid,
};
use kfusion_image::ImageSize;
use kfusion_lie::SE3;

fn bench_pyramid(c: &mut Criterion) {
    let mut group = c.benchmark_group("Pyramid");

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
        .with_sphere(Vec3::new(0.1, 0.0, 1.5), 0.4);
    let depth = scene.render_depth(&camera, &SE3::IDENTITY);
    let params = NormalParams::default();

    group.bench_function("from_depth_3_levels", |b| {
        b.iter(|| black_box(Pyramid::from_depth(&camera, black_box(&depth), 3, &params)))
    });

    let points = kfusion_3d::depth::depth_to_points(&depth, &camera);
    if let Ok(points) = points {
        group.bench_function("compute_normals", |b| {
            b.iter(|| black_box(compute_normals(black_box(&points), &params)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_pyramid);
criterion_main!(benches);

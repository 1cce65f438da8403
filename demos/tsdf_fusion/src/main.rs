use argh::FromArgs;
use glam::{Mat3, Vec3};
use std::path::PathBuf;

use kfusion::{
    k3d::{synthetic::Scene, PinholeCamera},
    image::ImageSize,
    lie::{SE3, SO3},
    tsdf::{GridConfig, TsdfParams, TsdfVolume},
    DepthFrame, FrameStatus, FusionConfig, FusionPipeline,
};

#[derive(FromArgs)]
/// Fuse a synthetic sphere into a TSDF volume and measure the reconstruction
struct Args {
    /// number of viewpoints
    #[argh(option, short = 'n', default = "8")]
    views: usize,

    /// cells per axis
    #[argh(option, short = 'r', default = "128")]
    resolution: usize,

    /// truncation distance in meters
    #[argh(option, short = 't', default = "0.02")]
    truncation: f32,

    /// sphere radius in meters
    #[argh(option, default = "0.3")]
    radius: f32,

    /// track the views with the full pipeline instead of using the true poses
    #[argh(switch)]
    track: bool,

    /// optional pipeline configuration in JSON, used with --track
    #[argh(option)]
    config: Option<PathBuf>,

    /// optional path to write the volume snapshot as JSON
    #[argh(option)]
    snapshot: Option<PathBuf>,
}

fn camera() -> PinholeCamera {
    PinholeCamera::new(
        300.0,
        300.0,
        159.5,
        119.5,
        ImageSize {
            width: 320,
            height: 240,
        },
    )
}

// camera-to-world pose at `eye` looking at the origin
fn look_at_origin(eye: Vec3) -> SE3 {
    let z = (-eye).normalize();
    let x = Vec3::Y.cross(z).normalize();
    let y = z.cross(x);
    SE3::new(SO3::from_matrix(&Mat3::from_cols(x, y, z)), eye)
}

// evenly spread viewpoints on a sphere of radius `distance`
fn fibonacci_views(n: usize, distance: f32) -> Vec<SE3> {
    let golden = std::f32::consts::PI * (3.0 - 5f32.sqrt());
    (0..n)
        .map(|i| {
            let y = 1.0 - 2.0 * (i as f32 + 0.5) / n as f32;
            let r = (1.0 - y * y).sqrt();
            let phi = golden * i as f32;
            look_at_origin(distance * Vec3::new(r * phi.cos(), y, r * phi.sin()))
        })
        .collect()
}

// small arc in front of the sphere, close enough for frame to frame tracking
fn orbit_views(n: usize, distance: f32) -> Vec<SE3> {
    (0..n)
        .map(|i| {
            let a = (2.0 * i as f32).to_radians();
            look_at_origin(distance * Vec3::new(a.sin(), 0.1, -a.cos()))
        })
        .collect()
}

fn rms_to_sphere<'a>(points: impl Iterator<Item = &'a Vec3>, radius: f32) -> (f64, usize) {
    let (sq_sum, count) = points
        .filter(|p| p.is_finite())
        .fold((0.0f64, 0usize), |(s, c), p| {
            (s + ((p.length() - radius) as f64).powi(2), c + 1)
        });
    ((sq_sum / count.max(1) as f64).sqrt(), count)
}

fn fuse_true_poses(
    args: &Args,
    scene: &Scene,
    poses: &[SE3],
) -> Result<TsdfVolume, Box<dyn std::error::Error>> {
    let cam = camera();
    let mut volume = TsdfVolume::new(
        GridConfig::cube(Vec3::ZERO, 1.0, args.resolution),
        TsdfParams::default().with_truncation(args.truncation),
    )?;

    for (i, pose) in poses.iter().enumerate() {
        let depth = scene.render_depth(&cam, pose);
        let updated = volume.fuse(&depth, &cam, pose)?;
        log::info!("view {}/{}: {updated} cells updated", i + 1, poses.len());
    }

    let mut world_points = Vec::new();
    for pose in poses {
        let prediction = volume.ray_trace(&cam, pose)?;
        world_points.extend(
            prediction
                .points
                .as_slice()
                .iter()
                .filter(|p| p.is_finite())
                .map(|p| pose.transform_point(*p)),
        );
    }
    let (rms, count) = rms_to_sphere(world_points.iter(), args.radius);
    println!(
        "ray-cast: {count} points, rms {:.3} mm ({:.2}% of radius)",
        rms * 1e3,
        100.0 * rms / args.radius as f64
    );

    Ok(volume)
}

fn track_views(
    args: &Args,
    scene: &Scene,
    poses: &[SE3],
) -> Result<TsdfVolume, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => FusionConfig::from_json_file(path)?,
        None => FusionConfig::default(),
    };
    // the pipeline's world frame is the first camera
    let world_from_first = poses[0];
    let center = world_from_first.inverse().transform_point(Vec3::ZERO);
    config.grid = GridConfig::cube(center, 1.0, args.resolution);
    config.tsdf = config.tsdf.with_truncation(args.truncation);

    let cam = camera();
    let mut pipeline = FusionPipeline::new(config, cam)?;

    for pose in poses {
        let frame = DepthFrame::new(scene.render_raw_depth(&cam, pose, 1e-3));
        let result = pipeline.process_frame(&frame)?;
        let expected = world_from_first.inverse() * *pose;
        match result.status {
            FrameStatus::Failed(failure) => {
                println!("frame {}: failed, {failure}", result.frame_index)
            }
            status => println!(
                "frame {}: {status:?}, error {:.2} mm / {:.3} deg",
                result.frame_index,
                result.pose.distance_to(&expected) * 1e3,
                result.pose.angle_to(&expected).to_degrees()
            ),
        }
    }

    Ok(pipeline.volume().clone())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    if args.views == 0 {
        return Err("at least one view is required".into());
    }

    let sphere = Scene::new().with_sphere(Vec3::ZERO, args.radius);
    let distance = 4.0 * args.radius;

    let volume = if args.track {
        // a sphere alone leaves the rotation about its centre unobservable
        let scene = sphere
            .with_plane(Vec3::new(0.0, 0.0, 0.45), Vec3::new(0.0, 0.0, -1.0))
            .with_plane(Vec3::new(0.0, 0.35, 0.0), Vec3::new(0.0, -1.0, 0.0));
        let poses = orbit_views(args.views, distance);
        track_views(&args, &scene, &poses)?
    } else {
        let poses = fibonacci_views(args.views, distance);
        fuse_true_poses(&args, &sphere, &poses)?
    };

    println!("{} observed cells", volume.num_observed());

    if !args.track {
        let cloud = volume.extract_point_cloud(0.0);
        let (rms, count) = rms_to_sphere(cloud.points.iter(), args.radius);
        println!("extracted: {count} points, rms {:.3} mm", rms * 1e3);
    }

    if let Some(path) = &args.snapshot {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer(std::io::BufWriter::new(file), &volume.snapshot())?;
        println!("snapshot written to {}", path.display());
    }

    Ok(())
}

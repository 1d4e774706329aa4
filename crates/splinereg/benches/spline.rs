use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use splinereg::{
    FloatImage, LandmarkSet, Quality, Registrar, RegistrationConfig, TransformFamily,
};

/// Noisy blob: smooth structure for the optimizer plus texture so the
/// spline filters see realistic data.
fn test_image(width: usize, height: usize, cx: f64, cy: f64, seed: u64) -> FloatImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut img = FloatImage::new(width, height);
    let data = img.as_mut_slice();
    for y in 0..height {
        for x in 0..width {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            let blob = 100.0 * (-(dx * dx + dy * dy) / 512.0).exp();
            data[y * width + x] = blob as f32 + rng.gen_range(-2.0f32..2.0f32);
        }
    }
    img
}

fn landmarks(x: f64, y: f64) -> LandmarkSet {
    LandmarkSet::new(TransformFamily::Translation, vec![[x, y]], vec![[x, y]]).unwrap()
}

fn bench_register(c: &mut Criterion) {
    let target = test_image(128, 128, 64.0, 64.0, 7);
    let source = test_image(128, 128, 61.0, 66.0, 7);
    let lm = landmarks(64.0, 64.0);
    for (name, quality) in [
        ("register_translation_128_accurate", Quality::Accurate),
        ("register_translation_128_accelerated", Quality::Accelerated),
    ] {
        let registrar = Registrar::with_config(RegistrationConfig { quality });
        c.bench_function(name, |b| {
            b.iter(|| {
                registrar
                    .register(black_box(source.clone()), black_box(target.clone()), &lm)
                    .unwrap()
            })
        });
    }
}

fn bench_transform(c: &mut Criterion) {
    let source = test_image(256, 256, 128.0, 128.0, 11);
    let lm = LandmarkSet::new(
        TransformFamily::Affine,
        vec![[130.5, 64.0], [64.0, 192.25], [192.0, 190.0]],
        vec![[128.0, 64.0], [64.0, 192.0], [192.0, 192.0]],
    )
    .unwrap();
    let registrar = Registrar::new();
    c.bench_function("transform_affine_256", |b| {
        b.iter(|| {
            registrar
                .transform(black_box(&source), None, &lm, 256, 256)
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_register, bench_transform);
criterion_main!(benches);

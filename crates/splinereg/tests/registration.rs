//! End-to-end registration through the public API.

use splinereg::{
    load_landmarks, save_landmarks, CancelToken, FloatImage, LandmarkDocument, LandmarkSet,
    Quality, RegError, Registrar, RegistrationConfig, TransformFamily,
};

fn gaussian_blob(width: usize, height: usize, cx: f64, cy: f64, sigma: f64, amp: f32) -> FloatImage {
    let mut img = FloatImage::new(width, height);
    let data = img.as_mut_slice();
    for y in 0..height {
        for x in 0..width {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            let v = (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
            data[y * width + x] = amp * v as f32;
        }
    }
    img
}

/// Smooth but rotationally asymmetric test pattern.
fn asymmetric_pattern(width: usize, height: usize) -> FloatImage {
    let a = gaussian_blob(width, height, width as f64 * 0.5, height as f64 * 0.5, 8.0, 100.0);
    let b = gaussian_blob(width, height, width as f64 * 0.7, height as f64 * 0.45, 4.0, 60.0);
    let mut img = FloatImage::new(width, height);
    let data = img.as_mut_slice();
    for (k, v) in data.iter_mut().enumerate() {
        *v = a.as_slice()[k] + b.as_slice()[k];
    }
    img
}

fn shifted(img: &FloatImage, dx: i64, dy: i64) -> FloatImage {
    let (w, h) = (img.width() as i64, img.height() as i64);
    let fold = |mut p: i64, n: i64| -> usize {
        if p < 0 {
            p = -1 - p;
        }
        p %= 2 * n;
        if p >= n {
            p = 2 * n - 1 - p;
        }
        p as usize
    };
    let mut out = FloatImage::new(img.width(), img.height());
    for y in 0..h {
        for x in 0..w {
            let sx = fold(x - dx, w);
            let sy = fold(y - dy, h);
            out.as_mut_slice()[(y * w + x) as usize] = img.as_slice()[sy * img.width() + sx];
        }
    }
    out
}

/// Synthesize a warped source from known landmarks, register it back, and
/// return the refined landmarks. The warp's own mask excludes the pixels
/// that left the frame. Swapping the roles when synthesizing makes the
/// refined source landmarks land exactly on `truth.source`.
fn round_trip(base: FloatImage, truth: &LandmarkSet) -> LandmarkSet {
    let registrar = Registrar::new();
    let (w, h) = (base.width(), base.height());
    let synth =
        LandmarkSet::new(truth.family, truth.target.clone(), truth.source.clone()).unwrap();
    let warped = registrar.transform(&base, None, &synth, w, h).unwrap();
    // start from the identity: source landmarks on the target positions
    let initial = LandmarkSet::new(truth.family, truth.target.clone(), truth.target.clone()).unwrap();
    registrar
        .register_masked(
            warped.image,
            Some(warped.mask),
            base,
            None,
            &initial,
            &CancelToken::new(),
        )
        .unwrap()
}

fn assert_points_close(got: &[[f64; 2]], want: &[[f64; 2]], tol: f64) {
    for (g, w) in got.iter().zip(want) {
        let d = (g[0] - w[0]).hypot(g[1] - w[1]);
        assert!(d < tol, "landmark {g:?} vs {w:?} (off by {d:.4})");
    }
}

#[test]
fn translation_recovers_an_integer_shift() {
    let base = gaussian_blob(64, 64, 30.0, 30.0, 7.0, 100.0);
    let moved = shifted(&base, 4, -3);
    let landmarks =
        LandmarkSet::new(TransformFamily::Translation, vec![[30.0, 30.0]], vec![[30.0, 30.0]])
            .unwrap();
    let refined = Registrar::new().register(moved, base, &landmarks).unwrap();
    assert_points_close(&refined.source, &[[34.0, 27.0]], 0.05);
    assert_eq!(refined.target, landmarks.target);
}

#[test]
fn rigid_body_recovers_a_small_rotation() {
    let base = asymmetric_pattern(64, 64);
    let (cx, cy) = (32.0, 32.0);
    let th = 2.0f64.to_radians();
    let rot = |p: [f64; 2]| -> [f64; 2] {
        let (dx, dy) = (p[0] - cx, p[1] - cy);
        [
            cx + dx * th.cos() - dy * th.sin(),
            cy + dx * th.sin() + dy * th.cos(),
        ]
    };
    let target = vec![[32.0, 32.0], [46.0, 32.0], [32.0, 46.0]];
    let source: Vec<[f64; 2]> = target.iter().map(|&p| rot(p)).collect();
    let truth = LandmarkSet::new(TransformFamily::RigidBody, source, target).unwrap();
    let refined = round_trip(base, &truth);
    assert_points_close(&refined.source, &truth.source, 0.15);
}

#[test]
fn scaled_rotation_recovers_scale_and_angle() {
    let base = asymmetric_pattern(64, 64);
    let (cx, cy) = (32.0, 32.0);
    let th = 2.0f64.to_radians();
    let scale = 1.04;
    let warp = |p: [f64; 2]| -> [f64; 2] {
        let (dx, dy) = (p[0] - cx, p[1] - cy);
        [
            cx + scale * (dx * th.cos() - dy * th.sin()),
            cy + scale * (dx * th.sin() + dy * th.cos()),
        ]
    };
    let target = vec![[24.0, 32.0], [40.0, 32.0]];
    let source: Vec<[f64; 2]> = target.iter().map(|&p| warp(p)).collect();
    let truth = LandmarkSet::new(TransformFamily::ScaledRotation, source, target).unwrap();
    let refined = round_trip(base, &truth);
    assert_points_close(&refined.source, &truth.source, 0.15);
}

#[test]
fn affine_recovers_a_pure_shift() {
    let base = gaussian_blob(64, 64, 32.0, 32.0, 8.0, 100.0);
    let moved = shifted(&base, 3, -2);
    let target = vec![[32.0, 16.0], [16.0, 44.0], [48.0, 44.0]];
    let landmarks =
        LandmarkSet::new(TransformFamily::Affine, target.clone(), target.clone()).unwrap();
    let refined = Registrar::new().register(moved, base, &landmarks).unwrap();
    let want: Vec<[f64; 2]> = target.iter().map(|p| [p[0] + 3.0, p[1] - 2.0]).collect();
    assert_points_close(&refined.source, &want, 0.1);
}

#[test]
fn bilinear_alignment_of_identical_images_stays_put() {
    let img = asymmetric_pattern(64, 64);
    let pts = vec![[16.0, 16.0], [48.0, 16.0], [16.0, 48.0], [48.0, 48.0]];
    let landmarks =
        LandmarkSet::new(TransformFamily::Bilinear, pts.clone(), pts.clone()).unwrap();
    let refined = Registrar::new()
        .register(img.clone(), img, &landmarks)
        .unwrap();
    assert_points_close(&refined.source, &pts, 0.1);
}

#[test]
fn offset_landmarks_on_identical_images_converge_to_the_target() {
    // identical images: the optimum is the identity warp, so the source
    // landmark must land exactly on its target partner
    let img = asymmetric_pattern(64, 64);
    let landmarks =
        LandmarkSet::new(TransformFamily::Translation, vec![[32.0, 32.0]], vec![[29.0, 34.0]])
            .unwrap();
    let refined = Registrar::new()
        .register(img.clone(), img, &landmarks)
        .unwrap();
    assert_points_close(&refined.source, &[[29.0, 34.0]], 0.01);
}

#[test]
fn masked_mismatch_does_not_move_the_landmarks() {
    let base = gaussian_blob(64, 64, 30.0, 30.0, 7.0, 100.0);
    let mut corrupted = base.clone();
    let mut mask = FloatImage::new(64, 64);
    mask.as_mut_slice().fill(1.0);
    // the masked-out margin is wider than the corruption so that the
    // corrupted samples blurred into coarser levels stay excluded too
    for y in 16..40 {
        for x in 36..60 {
            mask.as_mut_slice()[y * 64 + x] = 0.0;
        }
    }
    for y in 24..32 {
        for x in 44..52 {
            corrupted.as_mut_slice()[y * 64 + x] = 250.0;
        }
    }
    let landmarks =
        LandmarkSet::new(TransformFamily::Translation, vec![[30.0, 30.0]], vec![[30.0, 30.0]])
            .unwrap();
    let refined = Registrar::new()
        .register_masked(corrupted, Some(mask), base, None, &landmarks, &CancelToken::new())
        .unwrap();
    assert_points_close(&refined.source, &[[30.0, 30.0]], 0.01);
}

#[test]
fn mask_excludes_a_corrupted_region() {
    let base = gaussian_blob(64, 64, 30.0, 30.0, 7.0, 100.0);
    let mut moved = shifted(&base, 4, -3);
    // corrupt a corner patch of the source and mask it out
    let mut mask = FloatImage::new(64, 64);
    mask.as_mut_slice().fill(1.0);
    for y in 0..12 {
        for x in 0..12 {
            moved.as_mut_slice()[y * 64 + x] = 250.0;
            mask.as_mut_slice()[y * 64 + x] = 0.0;
        }
    }
    let landmarks =
        LandmarkSet::new(TransformFamily::Translation, vec![[30.0, 30.0]], vec![[30.0, 30.0]])
            .unwrap();
    let refined = Registrar::new()
        .register_masked(moved, Some(mask), base, None, &landmarks, &CancelToken::new())
        .unwrap();
    assert_points_close(&refined.source, &[[34.0, 27.0]], 0.05);
}

#[test]
fn collinear_affine_landmarks_fail_with_singular_system() {
    let img = gaussian_blob(64, 64, 32.0, 32.0, 8.0, 100.0);
    let pts = vec![[10.0, 10.0], [20.0, 20.0], [30.0, 30.0]];
    let landmarks = LandmarkSet::new(TransformFamily::Affine, pts.clone(), pts).unwrap();
    let err = Registrar::new()
        .register(img.clone(), img, &landmarks)
        .unwrap_err();
    assert!(matches!(err, RegError::SingularSystem { .. }));
}

#[test]
fn cancelled_token_aborts_registration() {
    let token = CancelToken::new();
    token.cancel();
    let img = gaussian_blob(64, 64, 32.0, 32.0, 8.0, 100.0);
    let landmarks =
        LandmarkSet::new(TransformFamily::Translation, vec![[32.0, 32.0]], vec![[32.0, 32.0]])
            .unwrap();
    let err = Registrar::new()
        .register_masked(img.clone(), None, img, None, &landmarks, &token)
        .unwrap_err();
    assert!(matches!(err, RegError::Cancelled));
}

#[test]
fn accelerated_mode_is_coarser_but_close() {
    let base = gaussian_blob(64, 64, 30.0, 30.0, 7.0, 100.0);
    let moved = shifted(&base, 4, -3);
    let landmarks =
        LandmarkSet::new(TransformFamily::Translation, vec![[30.0, 30.0]], vec![[30.0, 30.0]])
            .unwrap();
    let registrar = Registrar::with_config(RegistrationConfig {
        quality: Quality::Accelerated,
    });
    let refined = registrar.register(moved, base, &landmarks).unwrap();
    assert_points_close(&refined.source, &[[34.0, 27.0]], 0.5);
}

#[test]
fn landmark_files_round_trip_on_disk() {
    let doc = LandmarkDocument {
        landmarks: LandmarkSet::new(
            TransformFamily::RigidBody,
            vec![[10.5, 20.25], [30.0, 20.0], [10.0, 40.0]],
            vec![[11.0, 19.0], [31.5, 21.0], [9.75, 41.0]],
        )
        .unwrap(),
        source_size: (640, 480),
        target_size: (640, 480),
    };
    let path = std::env::temp_dir().join("splinereg_landmark_roundtrip.txt");
    save_landmarks(&path, &doc).unwrap();
    let back = load_landmarks(&path).unwrap();
    let _ = std::fs::remove_file(&path);
    assert_eq!(back, doc);
}

use anyhow::Result;
use facegate_vision::{FaceMatcher, MatcherConfig, ModelPaths};
use image::{Rgb, RgbImage};
use std::path::Path;

fn load() -> Result<Option<FaceMatcher>> {
    env_logger::try_init().ok();
    let paths = ModelPaths::default();
    if !paths.exist() {
        eprintln!(
            "Skipping: models not found at {} / {}",
            paths.detector.display(),
            paths.encoder.display()
        );
        return Ok(None);
    }
    Ok(Some(FaceMatcher::from_models(MatcherConfig::default(), &paths)?))
}

#[test]
fn blank_frame_has_no_face() -> Result<()> {
    let Some(matcher) = load()? else {
        return Ok(());
    };
    let gray = RgbImage::from_pixel(640, 480, Rgb([128, 128, 128]));
    assert!(matcher.detect(&gray)?.is_empty());
    assert!(matcher.encode_frame(gray)?.is_none());
    Ok(())
}

#[test]
fn face_matches_itself() -> Result<()> {
    let Some(matcher) = load()? else {
        return Ok(());
    };
    let fixture = Path::new("test_faces/face.jpg");
    if !fixture.exists() {
        eprintln!("Skipping: {} not found", fixture.display());
        return Ok(());
    }

    let img = image::open(fixture)?.into_rgb8();
    let detections = matcher.detect(&img)?;
    assert!(!detections.is_empty(), "no face found in fixture");

    let encoding = matcher
        .encode(&img, Some(&detections[0]))?
        .expect("detected face must encode");
    let mirrored = image::imageops::flip_horizontal(&img);
    let other = matcher.encode_frame(mirrored)?.expect("mirrored face must encode");

    let same = matcher.compare(&encoding, &encoding, None);
    assert!(same.is_match && same.distance < 1e-4);
    let flipped = matcher.compare(&encoding, &other, None);
    println!("mirror distance {:.3}", flipped.distance);
    assert!(flipped.is_match);
    Ok(())
}

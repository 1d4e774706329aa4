//! Plain-text landmark files.
//!
//! The format is line-oriented: a `Transformation` header naming the warp
//! family, the two image sizes, then the refined source landmarks and the
//! target landmarks as tab-separated coordinate pairs. Blank lines separate
//! the sections and are ignored on input.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::error::RegError;
use crate::transform::{LandmarkSet, Point, TransformFamily};

/// A landmark set together with the image dimensions it was refined on.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkDocument {
    pub landmarks: LandmarkSet,
    pub source_size: (usize, usize),
    pub target_size: (usize, usize),
}

impl LandmarkDocument {
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Transformation");
        let _ = writeln!(out, "{}", self.landmarks.family.label());
        let _ = writeln!(out);
        let _ = writeln!(out, "Source size");
        let _ = writeln!(out, "{}\t{}", self.source_size.0, self.source_size.1);
        let _ = writeln!(out);
        let _ = writeln!(out, "Target size");
        let _ = writeln!(out, "{}\t{}", self.target_size.0, self.target_size.1);
        let _ = writeln!(out);
        let _ = writeln!(out, "Refined source landmarks");
        for p in &self.landmarks.source {
            let _ = writeln!(out, "{}\t{}", p[0], p[1]);
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "Target landmarks");
        for p in &self.landmarks.target {
            let _ = writeln!(out, "{}\t{}", p[0], p[1]);
        }
        out
    }

    pub fn from_text(text: &str) -> Result<Self, RegError> {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
        expect(&mut lines, "Transformation")?;
        let label = next_line(&mut lines, "transformation name")?;
        let family = TransformFamily::from_label(label)
            .ok_or_else(|| RegError::Parse(format!("unknown transformation {label:?}")))?;
        expect(&mut lines, "Source size")?;
        let source_size = parse_size(next_line(&mut lines, "source size")?)?;
        expect(&mut lines, "Target size")?;
        let target_size = parse_size(next_line(&mut lines, "target size")?)?;
        expect(&mut lines, "Refined source landmarks")?;
        let n = family.landmark_count();
        let mut source = Vec::with_capacity(n);
        for _ in 0..n {
            source.push(parse_point(next_line(&mut lines, "source landmark")?)?);
        }
        expect(&mut lines, "Target landmarks")?;
        let mut target = Vec::with_capacity(n);
        for _ in 0..n {
            target.push(parse_point(next_line(&mut lines, "target landmark")?)?);
        }
        Ok(Self {
            landmarks: LandmarkSet::new(family, source, target)?,
            source_size,
            target_size,
        })
    }
}

pub fn save_landmarks(path: &Path, doc: &LandmarkDocument) -> Result<(), RegError> {
    fs::write(path, doc.to_text())?;
    Ok(())
}

pub fn load_landmarks(path: &Path) -> Result<LandmarkDocument, RegError> {
    LandmarkDocument::from_text(&fs::read_to_string(path)?)
}

fn next_line<'a>(
    lines: &mut impl Iterator<Item = &'a str>,
    what: &str,
) -> Result<&'a str, RegError> {
    lines
        .next()
        .ok_or_else(|| RegError::Parse(format!("missing {what}")))
}

fn expect<'a>(lines: &mut impl Iterator<Item = &'a str>, header: &str) -> Result<(), RegError> {
    let line = next_line(lines, header)?;
    if line != header {
        return Err(RegError::Parse(format!(
            "expected {header:?}, found {line:?}"
        )));
    }
    Ok(())
}

fn parse_size(line: &str) -> Result<(usize, usize), RegError> {
    let mut it = line.split_whitespace();
    let bad = || RegError::Parse(format!("malformed size line {line:?}"));
    let w = it.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let h = it.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    Ok((w, h))
}

fn parse_point(line: &str) -> Result<Point, RegError> {
    let mut it = line.split_whitespace();
    let bad = || RegError::Parse(format!("malformed landmark line {line:?}"));
    let x = it.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let y = it.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    Ok([x, y])
}

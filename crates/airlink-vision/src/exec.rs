use std::io::Write;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use image::GrayImage;

use crate::{Landmark, LandmarkDetector};

/// Detector backend that pipes each frame to an external executable: the
/// frame goes out as PNG on stdin, landmarks come back one per line as
/// `cx cy a b theta score`. Keeps the ellipse detector a collaborator this
/// crate never reimplements.
pub struct ExecDetector {
    cmd: String,
}

impl ExecDetector {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self { cmd: cmd.into() }
    }
}

impl LandmarkDetector for ExecDetector {
    fn detect(&mut self, gray: &GrayImage) -> Result<Vec<Landmark>> {
        let mut png = Vec::new();
        image::DynamicImage::ImageLuma8(gray.clone())
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .context("encode frame")?;

        let mut parts = self.cmd.split_whitespace();
        let program = parts.next().context("empty detector command")?;
        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("spawn detector {}", self.cmd))?;

        let mut stdin = child.stdin.take().context("detector stdin")?;
        stdin.write_all(&png).context("feed detector")?;
        drop(stdin);

        let out = child.wait_with_output().context("run detector")?;
        anyhow::ensure!(out.status.success(), "detector exited with {}", out.status);
        parse_landmarks(&String::from_utf8_lossy(&out.stdout))
    }
}

fn parse_landmarks(s: &str) -> Result<Vec<Landmark>> {
    let mut out = Vec::new();
    for line in s.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let v: Vec<f32> = line
            .split_whitespace()
            .filter_map(|t| t.parse().ok())
            .collect();
        anyhow::ensure!(v.len() == 6, "bad detector line: {:?}", line);
        out.push(Landmark {
            cx: v[0],
            cy: v[1],
            a: v[2],
            b: v[3],
            theta: v[4],
            score: v[5],
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_landmark_lines() {
        let out = parse_landmarks("# header\n320.0 240.0 90.0 80.0 0.1 0.87\n\n10 20 5 4 0 0.5\n")
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].cx, 320.0);
        assert_eq!(out[0].score, 0.87);
        assert_eq!(out[1].b, 4.0);
    }

    #[test]
    fn rejects_short_lines() {
        assert!(parse_landmarks("1 2 3\n").is_err());
    }
}

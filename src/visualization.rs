// src/visualization.rs
//
// Persists metric series into the run directory: a plain-text data file
// (one value per line) plus a PNG line chart per series. Empty series are
// accepted and produce an empty data file and an empty chart, so a
// zero-episode run still finalizes cleanly.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use plotters::prelude::*;

pub struct Visualization {
    out_dir: PathBuf,
    dpi: u32,
}

impl Visualization {
    pub fn new(out_dir: PathBuf, dpi: u32) -> Self {
        Self { out_dir, dpi }
    }

    /// Write `<filename>_data.txt` and render `<filename>.png`.
    pub fn save_data_and_plot(
        &self,
        data: &[f64],
        filename: &str,
        xlabel: &str,
        ylabel: &str,
    ) -> Result<()> {
        self.write_data(data, filename)?;
        self.render_plot(data, filename, xlabel, ylabel)?;
        Ok(())
    }

    fn write_data(&self, data: &[f64], filename: &str) -> Result<()> {
        let path = self.out_dir.join(format!("{filename}_data.txt"));
        let file = File::create(&path)
            .with_context(|| format!("cannot write {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        for value in data {
            writeln!(writer, "{value}")
                .with_context(|| format!("cannot write {}", path.display()))?;
        }
        writer
            .flush()
            .with_context(|| format!("cannot write {}", path.display()))?;
        Ok(())
    }

    fn render_plot(&self, data: &[f64], filename: &str, xlabel: &str, ylabel: &str) -> Result<()> {
        let path = self.out_dir.join(format!("{filename}.png"));
        let width = self.dpi.max(32) * 12;
        let height = self.dpi.max(32) * 7;

        let root = BitMapBackend::new(&path, (width, height)).into_drawing_area();
        root.fill(&WHITE)
            .map_err(|e| anyhow!("plot '{filename}': {e}"))?;

        let (y_lo, y_hi) = axis_range(data);
        let x_max = data.len().max(1);

        let mut chart = ChartBuilder::on(&root)
            .caption(filename, ("sans-serif", 28))
            .margin(24)
            .x_label_area_size(48)
            .y_label_area_size(72)
            .build_cartesian_2d(0..x_max, y_lo..y_hi)
            .map_err(|e| anyhow!("plot '{filename}': {e}"))?;

        chart
            .configure_mesh()
            .x_desc(xlabel)
            .y_desc(ylabel)
            .draw()
            .map_err(|e| anyhow!("plot '{filename}': {e}"))?;

        chart
            .draw_series(LineSeries::new(
                data.iter().enumerate().map(|(i, v)| (i, *v)),
                &BLUE,
            ))
            .map_err(|e| anyhow!("plot '{filename}': {e}"))?;

        root.present()
            .map_err(|e| anyhow!("plot '{filename}': {e}"))?;
        Ok(())
    }
}

/// Y-axis bounds with a little headroom; degenerate inputs fall back to a
/// unit range so chart construction never fails on them.
fn axis_range(data: &[f64]) -> (f64, f64) {
    let lo = data.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !lo.is_finite() || !hi.is_finite() {
        return (0.0, 1.0);
    }
    if lo == hi {
        return (lo - 1.0, hi + 1.0);
    }
    let pad = (hi - lo) * 0.05;
    (lo - pad, hi + pad)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_data_file_and_png() {
        let dir = tempfile::tempdir().unwrap();
        let viz = Visualization::new(dir.path().to_path_buf(), 96);

        let data = vec![-120.0, -80.5, -60.25, -61.0];
        viz.save_data_and_plot(&data, "reward", "Episode", "Cumulative negative reward")
            .unwrap();

        let text = std::fs::read_to_string(dir.path().join("reward_data.txt")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "-120");
        assert_eq!(lines[1], "-80.5");

        assert!(dir.path().join("reward.png").is_file());
    }

    #[test]
    fn empty_series_still_produces_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let viz = Visualization::new(dir.path().to_path_buf(), 96);

        viz.save_data_and_plot(&[], "queue", "Episode", "Average queue length")
            .unwrap();

        let text = std::fs::read_to_string(dir.path().join("queue_data.txt")).unwrap();
        assert!(text.is_empty());
        assert!(dir.path().join("queue.png").is_file());
    }

    #[test]
    fn flat_series_does_not_break_axis_construction() {
        let dir = tempfile::tempdir().unwrap();
        let viz = Visualization::new(dir.path().to_path_buf(), 96);
        viz.save_data_and_plot(&[5.0, 5.0, 5.0], "delay", "Episode", "Cumulative delay (s)")
            .unwrap();
        assert!(dir.path().join("delay.png").is_file());
    }

    #[test]
    fn unwritable_directory_is_an_error() {
        let viz = Visualization::new(PathBuf::from("/nonexistent/run"), 96);
        assert!(viz
            .save_data_and_plot(&[1.0], "reward", "Episode", "Reward")
            .is_err());
    }
}

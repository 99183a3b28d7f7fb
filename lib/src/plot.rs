//! Training curve rendered as a standalone SVG line chart.

use std::{
  fmt::{self, Write as _},
  io,
  path::Path,
};

use itertools::{Itertools, MinMaxResult};
use thiserror::Error;

use crate::{model::History, utils::write_atomic};

#[derive(Debug, Error)]
pub enum PlotError {
  #[error("IO error: {0}")]
  Io(#[from] io::Error),
  #[error("no data to plot")]
  NoData,
  #[error("failed to format SVG: {0}")]
  Format(#[from] fmt::Error),
}

const WIDTH: f64 = 800.0;
const HEIGHT: f64 = 500.0;
const MARGIN_LEFT: f64 = 80.0;
const MARGIN_RIGHT: f64 = 30.0;
const MARGIN_TOP: f64 = 50.0;
const MARGIN_BOTTOM: f64 = 60.0;
const Y_TICKS: usize = 5;

const TRAIN_COLOR: &str = "rgb(66,133,244)";
const VAL_COLOR: &str = "rgb(234,67,53)";

struct Frame {
  epochs: usize,
  y_min: f64,
  y_max: f64,
}

impl Frame {
  fn x(&self, epoch: usize) -> f64 {
    let plot_w = WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let span = (self.epochs.max(2) - 1) as f64;
    MARGIN_LEFT + (epoch - 1) as f64 / span * plot_w
  }

  fn y(&self, loss: f64) -> f64 {
    let plot_h = HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    MARGIN_TOP + (self.y_max - loss) / (self.y_max - self.y_min) * plot_h
  }
}

fn polyline(frame: &Frame, losses: &[f64], color: &str) -> String {
  let points = losses
    .iter()
    .enumerate()
    .map(|(i, &l)| format!("{:.1},{:.1}", frame.x(i + 1), frame.y(l)))
    .join(" ");
  format!(r#"<polyline fill="none" stroke="{color}" stroke-width="2" points="{points}"/>"#)
}

/// Train and validation loss per epoch.
pub fn render_training_curve(history: &History) -> Result<String, PlotError> {
  let epochs = history.train_loss.len().max(history.val_loss.len());
  let (y_min, y_max) = match history
    .train_loss
    .iter()
    .chain(&history.val_loss)
    .copied()
    .filter(|v| v.is_finite())
    .minmax_by(f64::total_cmp)
  {
    MinMaxResult::NoElements => return Err(PlotError::NoData),
    MinMaxResult::OneElement(v) => (v - 0.5, v + 0.5),
    MinMaxResult::MinMax(lo, hi) if hi - lo < f64::EPSILON => (lo - 0.5, hi + 0.5),
    MinMaxResult::MinMax(lo, hi) => (lo, hi),
  };
  let frame = Frame { epochs, y_min, y_max };

  let mut svg = String::new();
  draw(&mut svg, history, &frame)?;
  Ok(svg)
}

fn draw(svg: &mut String, history: &History, frame: &Frame) -> fmt::Result {
  writeln!(
    svg,
    r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}">"#
  )?;
  writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#)?;
  writeln!(
    svg,
    r#"<text x="{}" y="30" text-anchor="middle" font-family="sans-serif" font-size="18">Training curve</text>"#,
    WIDTH / 2.0
  )?;

  let (left, right) = (MARGIN_LEFT, WIDTH - MARGIN_RIGHT);
  let (top, bottom) = (MARGIN_TOP, HEIGHT - MARGIN_BOTTOM);
  for i in 0..=Y_TICKS {
    let loss = frame.y_min + (frame.y_max - frame.y_min) * i as f64 / Y_TICKS as f64;
    let y = frame.y(loss);
    writeln!(
      svg,
      r#"<line x1="{left}" y1="{y:.1}" x2="{right}" y2="{y:.1}" stroke="rgb(230,230,230)"/><text x="{}" y="{:.1}" text-anchor="end" font-family="sans-serif" font-size="11">{loss:.4}</text>"#,
      left - 6.0,
      y + 4.0
    )?;
  }
  writeln!(
    svg,
    r#"<line x1="{left}" y1="{bottom}" x2="{right}" y2="{bottom}" stroke="black"/><line x1="{left}" y1="{top}" x2="{left}" y2="{bottom}" stroke="black"/>"#
  )?;
  writeln!(
    svg,
    r#"<text x="{}" y="{}" text-anchor="middle" font-family="sans-serif" font-size="13">Epoch</text>"#,
    (left + right) / 2.0,
    HEIGHT - 20.0
  )?;
  writeln!(
    svg,
    r#"<text x="20" y="{}" text-anchor="middle" font-family="sans-serif" font-size="13" transform="rotate(-90 20 {})">MSE (scaled)</text>"#,
    (top + bottom) / 2.0,
    (top + bottom) / 2.0
  )?;

  for (name, losses, color) in [
    ("train", &history.train_loss, TRAIN_COLOR),
    ("val", &history.val_loss, VAL_COLOR),
  ] {
    if !losses.is_empty() {
      writeln!(svg, "{}", polyline(frame, losses, color))?;
    }
    let ly = if name == "train" { top + 10.0 } else { top + 28.0 };
    writeln!(
      svg,
      r#"<line x1="{}" y1="{ly}" x2="{}" y2="{ly}" stroke="{color}" stroke-width="2"/><text x="{}" y="{}" font-family="sans-serif" font-size="12">{name}</text>"#,
      right - 90.0,
      right - 70.0,
      right - 64.0,
      ly + 4.0
    )?;
  }
  svg.push_str("</svg>\n");
  Ok(())
}

pub fn write_training_curve(path: &Path, history: &History) -> Result<(), PlotError> {
  let svg = render_training_curve(history)?;
  write_atomic(path, svg.as_bytes())?;
  Ok(())
}

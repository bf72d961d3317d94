// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::plot::{ColorLimits, ComparisonPlot};
use crate::{VisualizationError, VisualizationResult};
use ndarray::Array2;
use plotters::style::{RGBColor, WHITE};

/// Packed RGB8 image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> VisualizationResult<Self> {
        let expected = width as usize * height as usize * 3;
        if expected == 0 || pixels.len() != expected {
            return Err(VisualizationError::FrameSize {
                expected,
                got: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn filled(width: u32, height: u32, color: RGBColor) -> VisualizationResult<Self> {
        let pixels = std::iter::repeat([color.0, color.1, color.2])
            .take(width as usize * height as usize)
            .flatten()
            .collect();
        Self::new(width, height, pixels)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<RGBColor> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 3;
        Some(RGBColor(
            self.pixels[offset],
            self.pixels[offset + 1],
            self.pixels[offset + 2],
        ))
    }

    fn put(&mut self, x: u32, y: u32, color: RGBColor) {
        let offset = (y as usize * self.width as usize + x as usize) * 3;
        self.pixels[offset] = color.0;
        self.pixels[offset + 1] = color.1;
        self.pixels[offset + 2] = color.2;
    }
}

/// Turns one prediction/truth pair into an image. Implementations run on the
/// render pool, so they must be shareable across worker threads.
pub trait ComparisonRenderer: Send + Sync {
    fn render(&self, plot: &ComparisonPlot) -> VisualizationResult<Frame>;
}

/// Colour ramp used for a panel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Colormap {
    /// Blue through green to red.
    Sequential,
    /// Blue through white to red, centred on zero.
    Diverging,
}

impl Colormap {
    pub fn for_plot(diverging: bool) -> Self {
        if diverging {
            Colormap::Diverging
        } else {
            Colormap::Sequential
        }
    }

    /// Colour of a value already normalised into `[0, 1]`.
    pub fn color(self, norm: f32) -> RGBColor {
        let t = norm.clamp(0.0, 1.0);
        match self {
            Colormap::Sequential => {
                let r = (255.0 * t) as u8;
                let g = (255.0 * (1.0 - (t - 0.5).abs() * 2.0).max(0.0)) as u8;
                let b = (255.0 * (1.0 - t)) as u8;
                RGBColor(r, g, b)
            }
            Colormap::Diverging => {
                if t < 0.5 {
                    let k = (255.0 * t * 2.0) as u8;
                    RGBColor(k, k, 255)
                } else {
                    let k = (255.0 * (1.0 - t) * 2.0) as u8;
                    RGBColor(255, k, k)
                }
            }
        }
    }
}

/// Raster renderer that draws the prediction above the ground truth, one
/// block of `pixel_scale`² pixels per grid point, separated by a white band.
#[derive(Clone, Debug)]
pub struct ColormapRenderer {
    pixel_scale: u32,
    gap: u32,
}

impl Default for ColormapRenderer {
    fn default() -> Self {
        Self {
            pixel_scale: 2,
            gap: 4,
        }
    }
}

impl ColormapRenderer {
    pub fn new(pixel_scale: u32, gap: u32) -> VisualizationResult<Self> {
        if pixel_scale == 0 {
            return Err(VisualizationError::InvalidConfig("pixel_scale must be positive"));
        }
        Ok(Self { pixel_scale, gap })
    }

    pub fn pixel_scale(&self) -> u32 {
        self.pixel_scale
    }

    pub fn gap(&self) -> u32 {
        self.gap
    }

    fn paint_panel(
        &self,
        frame: &mut Frame,
        map: &Array2<f32>,
        top: u32,
        limits: ColorLimits,
        colormap: Colormap,
    ) {
        let s = self.pixel_scale;
        for ((lat, lon), &value) in map.indexed_iter() {
            let color = colormap.color(limits.normalize(value));
            let (x0, y0) = (lon as u32 * s, top + lat as u32 * s);
            for dy in 0..s {
                for dx in 0..s {
                    frame.put(x0 + dx, y0 + dy, color);
                }
            }
        }
    }
}

impl ComparisonRenderer for ColormapRenderer {
    fn render(&self, plot: &ComparisonPlot) -> VisualizationResult<Frame> {
        let (nlat, nlon) = plot.truth.dim();
        let panel_height = nlat as u32 * self.pixel_scale;
        let width = nlon as u32 * self.pixel_scale;
        let mut frame = Frame::filled(width, 2 * panel_height + self.gap, WHITE)?;
        let colormap = Colormap::for_plot(plot.diverging);
        self.paint_panel(&mut frame, &plot.prediction, 0, plot.limits, colormap);
        self.paint_panel(
            &mut frame,
            &plot.truth,
            panel_height + self.gap,
            plot.limits,
            colormap,
        );
        Ok(frame)
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::render::Frame;
use crate::wrapper::RenderedPlot;
use crate::{VisualizationError, VisualizationResult};
use plotters::prelude::{BitMapBackend, DrawingBackend};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Receives the sorted plots produced by `VisualizationWrapper::finalize`.
pub trait FrameSink: Send {
    /// All plots of one finalize call, in order, as frames of one clip.
    fn write_video(&mut self, prefix: &str, plots: &[RenderedPlot]) -> VisualizationResult<()>;

    /// One standalone image per plot, captioned `{field_name}_{tag}`.
    fn write_images(&mut self, prefix: &str, plots: &[RenderedPlot]) -> VisualizationResult<()>;
}

#[derive(Clone, Debug, PartialEq)]
pub enum SinkRecord {
    Video {
        prefix: String,
        frames: Vec<RenderedPlot>,
    },
    Image {
        prefix: String,
        caption: String,
        plot: RenderedPlot,
    },
}

/// Keeps everything it receives. Clones share the same record list, so a
/// handle kept by the caller observes what the wrapper emitted.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<SinkRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SinkRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn records(&self) -> Vec<SinkRecord> {
        self.lock().clone()
    }

    pub fn take(&self) -> Vec<SinkRecord> {
        std::mem::take(&mut *self.lock())
    }
}

impl FrameSink for MemorySink {
    fn write_video(&mut self, prefix: &str, plots: &[RenderedPlot]) -> VisualizationResult<()> {
        self.lock().push(SinkRecord::Video {
            prefix: prefix.to_string(),
            frames: plots.to_vec(),
        });
        Ok(())
    }

    fn write_images(&mut self, prefix: &str, plots: &[RenderedPlot]) -> VisualizationResult<()> {
        let mut records = self.lock();
        for plot in plots {
            records.push(SinkRecord::Image {
                prefix: prefix.to_string(),
                caption: plot.token.to_string(),
                plot: plot.clone(),
            });
        }
        Ok(())
    }
}

/// Writes PNG files through the plotters bitmap backend.
///
/// Video mode writes `{prefix}_clip{n}_frame_{i}.png`, numbering clips per
/// finalize call so later clips do not overwrite earlier ones. Image mode
/// writes `{prefix}_{caption}.png`.
#[derive(Debug)]
pub struct PngDirectorySink {
    root: PathBuf,
    clips: usize,
}

impl PngDirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> VisualizationResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| VisualizationError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root, clips: 0 })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn write_png(&self, name: &str, frame: &Frame) -> VisualizationResult<PathBuf> {
        let path = self.root.join(format!("{}.png", sanitize(name)));
        // The backend borrows `path` and flushes on drop.
        let encoded = {
            let mut backend = BitMapBackend::new(&path, (frame.width(), frame.height()));
            let drawn = backend
                .blit_bitmap((0, 0), (frame.width(), frame.height()), frame.pixels())
                .and_then(|_| backend.present())
                .map_err(|e| e.to_string());
            drawn
        };
        match encoded {
            Ok(()) => Ok(path),
            Err(message) => Err(VisualizationError::Encode { path, message }),
        }
    }
}

impl FrameSink for PngDirectorySink {
    fn write_video(&mut self, prefix: &str, plots: &[RenderedPlot]) -> VisualizationResult<()> {
        let clip = self.clips;
        for (index, plot) in plots.iter().enumerate() {
            self.write_png(&format!("{prefix}_clip{clip:03}_frame_{index:04}"), &plot.frame)?;
        }
        self.clips += 1;
        debug!(root = ?self.root, clip, frames = plots.len(), "wrote frame sequence");
        Ok(())
    }

    fn write_images(&mut self, prefix: &str, plots: &[RenderedPlot]) -> VisualizationResult<()> {
        for plot in plots {
            self.write_png(&format!("{prefix}_{}", plot.token), &plot.frame)?;
        }
        debug!(root = ?self.root, images = plots.len(), "wrote images");
        Ok(())
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '-',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plot::PlotToken;
    use plotters::style::RGBColor;

    fn plot(tag: &str, field: &str) -> RenderedPlot {
        RenderedPlot {
            token: PlotToken::new(tag, field),
            frame: Frame::filled(3, 2, RGBColor(10, 20, 30)).unwrap(),
        }
    }

    #[test]
    fn memory_sink_shares_records_between_clones() {
        let observer = MemorySink::new();
        let mut sink = observer.clone();
        sink.write_images("val", &[plot("a", "t2m"), plot("b", "t2m")])
            .unwrap();
        sink.write_video("val", &[plot("a", "z500")]).unwrap();
        let records = observer.take();
        assert_eq!(records.len(), 3);
        assert!(matches!(&records[1], SinkRecord::Image { caption, .. } if caption == "t2m_b"));
        assert!(matches!(&records[2], SinkRecord::Video { frames, .. } if frames.len() == 1));
        assert!(observer.records().is_empty());
    }

    #[test]
    fn png_sink_writes_one_file_per_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = PngDirectorySink::new(dir.path().join("plots")).unwrap();
        sink.write_images("val", &[plot("step:1", "t2m")]).unwrap();
        sink.write_video("val", &[plot("a", "t2m"), plot("b", "t2m")])
            .unwrap();
        sink.write_video("val", &[plot("a", "t2m")]).unwrap();

        let mut names: Vec<String> = fs::read_dir(sink.root())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(
            names,
            [
                "val_clip000_frame_0000.png",
                "val_clip000_frame_0001.png",
                "val_clip001_frame_0000.png",
                "val_t2m_step-1.png",
            ]
        );
        let size = fs::metadata(sink.root().join("val_t2m_step-1.png")).unwrap().len();
        assert!(size > 0);
    }

    #[test]
    fn write_png_returns_the_encoded_path() {
        let dir = tempfile::tempdir().unwrap();
        let sink = PngDirectorySink::new(dir.path()).unwrap();
        let frame = Frame::filled(4, 3, RGBColor(200, 0, 0)).unwrap();
        let path = sink.write_png("z500/t:0", &frame).unwrap();
        assert_eq!(path, dir.path().join("z500-t-0.png"));
        assert!(fs::metadata(&path).unwrap().len() > 0);
    }
}

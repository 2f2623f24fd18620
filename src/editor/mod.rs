//! # Raster Image Editor
//!
//! Editing surface for image-typed variables. Three tools mutate a single
//! in-memory *working surface*; the originally loaded image is kept apart
//! and never touched.
//!
//! | Tool | Gesture | Effect |
//! |------|---------|--------|
//! | Draw | press, move, release | freehand stroke with the current brush |
//! | Crop | drag a rectangle | surface becomes exactly that rectangle |
//! | Pixelate | drag a rectangle | region replaced by nearest-neighbour blocks |
//!
//! Every mutating operation first pushes a full snapshot of the working
//! surface onto the undo stack. Undo restores pixels and dimensions.
//!
//! ```
//! use folio::editor::{RasterEditor, Rect};
//! use image::{DynamicImage, RgbaImage};
//!
//! let mut editor = RasterEditor::default();
//! editor.load(DynamicImage::ImageRgba8(RgbaImage::new(64, 48)), None);
//! editor.crop(Rect::new(8, 8, 16, 16));
//! assert_eq!(editor.dimensions(), (16, 16));
//! editor.undo();
//! assert_eq!(editor.dimensions(), (64, 48));
//! ```

mod geometry;

pub use geometry::{DisplayRect, Rect, contain_fit, map_pointer};

use std::io::Cursor;
use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::FolioError;
use crate::config::EngineConfig;

/// Active editing tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    Draw,
    Crop,
    Pixelate,
}

/// Freehand brush: diameter in surface pixels and an RGBA colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Brush {
    pub size: u32,
    pub color: [u8; 4],
}

impl Default for Brush {
    fn default() -> Self {
        Self {
            size: 4,
            color: [255, 0, 0, 255],
        }
    }
}

/// Parse `#rrggbb` or `#rrggbbaa`.
pub fn parse_color(s: &str) -> Option<[u8; 4]> {
    let hex = s.trim().strip_prefix('#')?;
    let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    match hex.len() {
        6 => Some([byte(0)?, byte(2)?, byte(4)?, 255]),
        8 => Some([byte(0)?, byte(2)?, byte(4)?, byte(6)?]),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EditorOptions {
    /// Longest edge kept in the working surface on load.
    pub max_dimension: u32,
    /// Snapshots kept for undo; the oldest are dropped beyond this.
    pub undo_limit: usize,
}

impl Default for EditorOptions {
    fn default() -> Self {
        Self {
            max_dimension: 2048,
            undo_limit: 50,
        }
    }
}

impl From<&EngineConfig> for EditorOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_dimension: config.editor_max_dimension,
            undo_limit: config.undo_limit,
        }
    }
}

/// Pending pointer gesture.
#[derive(Debug, Clone, Copy)]
enum Gesture {
    Stroke { last: (f32, f32) },
    Select { start: (f32, f32), current: (f32, f32) },
}

pub struct RasterEditor {
    options: EditorOptions,
    original: Option<DynamicImage>,
    working: RgbaImage,
    undo_stack: Vec<RgbaImage>,
    tool: Tool,
    brush: Brush,
    pixel_size: u32,
    gesture: Option<Gesture>,
}

impl Default for RasterEditor {
    fn default() -> Self {
        Self::new(EditorOptions::default())
    }
}

impl RasterEditor {
    pub fn new(options: EditorOptions) -> Self {
        Self {
            options,
            original: None,
            working: RgbaImage::new(0, 0),
            undo_stack: Vec::new(),
            tool: Tool::default(),
            brush: Brush::default(),
            pixel_size: 10,
            gesture: None,
        }
    }

    // ── loading ─────────────────────────────────────────────────────────

    /// Load a new image. The working surface is the contain-fit of the image
    /// into `container` (and the max dimension), drawn once. Clears undo.
    pub fn load(&mut self, image: DynamicImage, container: Option<(u32, u32)>) {
        let (w, h) = contain_fit(
            (image.width(), image.height()),
            self.options.max_dimension,
            container,
        );
        self.working = if (w, h) == (image.width(), image.height()) {
            image.to_rgba8()
        } else {
            imageops::resize(&image.to_rgba8(), w, h, FilterType::Triangle)
        };
        debug!(
            original_width = image.width(),
            original_height = image.height(),
            width = w,
            height = h,
            "editor image loaded"
        );
        self.original = Some(image);
        self.undo_stack.clear();
        self.gesture = None;
    }

    pub fn load_bytes(&mut self, bytes: &[u8], container: Option<(u32, u32)>) -> Result<(), FolioError> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| FolioError::Image(format!("Failed to decode image: {}", e)))?;
        self.load(image, container);
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.original.is_some()
    }

    pub fn original(&self) -> Option<&DynamicImage> {
        self.original.as_ref()
    }

    pub fn working(&self) -> &RgbaImage {
        &self.working
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.working.dimensions()
    }

    // ── settings ────────────────────────────────────────────────────────

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn set_tool(&mut self, tool: Tool) {
        self.tool = tool;
        self.gesture = None;
    }

    pub fn brush(&self) -> Brush {
        self.brush
    }

    pub fn set_brush(&mut self, brush: Brush) {
        self.brush = Brush {
            size: brush.size.max(1),
            color: brush.color,
        };
    }

    pub fn pixel_size(&self) -> u32 {
        self.pixel_size
    }

    pub fn set_pixel_size(&mut self, size: u32) {
        self.pixel_size = size.max(1);
    }

    // ── undo ────────────────────────────────────────────────────────────

    fn push_snapshot(&mut self) {
        self.undo_stack.push(self.working.clone());
        if self.undo_stack.len() > self.options.undo_limit.max(1) {
            self.undo_stack.remove(0);
        }
    }

    /// Restore the most recent snapshot. Returns false when there is nothing to undo.
    pub fn undo(&mut self) -> bool {
        match self.undo_stack.pop() {
            Some(snapshot) => {
                self.working = snapshot;
                self.gesture = None;
                true
            }
            None => false,
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    /// Replace the working surface with the original image, refitted. Undoable.
    pub fn revert_to_original(&mut self) {
        let Some(original) = self.original.clone() else {
            return;
        };
        let (w, h) = contain_fit(
            (original.width(), original.height()),
            self.options.max_dimension,
            None,
        );
        self.push_snapshot();
        self.working = imageops::resize(&original.to_rgba8(), w, h, FilterType::Triangle);
    }

    // ── draw ────────────────────────────────────────────────────────────

    /// Start a stroke at `p`. Snapshots the surface and paints the first dab.
    pub fn begin_stroke(&mut self, p: (f32, f32)) {
        if !self.is_loaded() {
            return;
        }
        self.push_snapshot();
        stamp(&mut self.working, p, self.brush);
        self.gesture = Some(Gesture::Stroke { last: p });
    }

    /// Continue the current stroke to `p`.
    pub fn stroke_to(&mut self, p: (f32, f32)) {
        if let Some(Gesture::Stroke { last }) = self.gesture {
            draw_segment(&mut self.working, last, p, self.brush);
            self.gesture = Some(Gesture::Stroke { last: p });
        }
    }

    pub fn end_stroke(&mut self) {
        if matches!(self.gesture, Some(Gesture::Stroke { .. })) {
            self.gesture = None;
        }
    }

    /// Draw a complete polyline as one undoable stroke.
    pub fn draw_path(&mut self, points: &[(f32, f32)]) {
        let Some((&first, rest)) = points.split_first() else {
            return;
        };
        self.begin_stroke(first);
        for &p in rest {
            self.stroke_to(p);
        }
        self.end_stroke();
    }

    // ── crop ────────────────────────────────────────────────────────────

    /// Make the working surface exactly `rect`. Returns false (and changes
    /// nothing) when the rectangle does not overlap the surface.
    pub fn crop(&mut self, rect: Rect) -> bool {
        let (w, h) = self.dimensions();
        let Some(r) = rect.clamp_to(w, h) else {
            return false;
        };
        self.push_snapshot();
        self.working = imageops::crop_imm(&self.working, r.x, r.y, r.width, r.height).to_image();
        debug!(?r, "editor crop");
        true
    }

    // ── pixelate ────────────────────────────────────────────────────────

    /// Pixelate `rect` with blocks of roughly `pixel_size` pixels. Returns
    /// false when the rectangle does not overlap the surface.
    pub fn pixelate(&mut self, rect: Rect, pixel_size: u32) -> bool {
        let (w, h) = self.dimensions();
        let Some(r) = rect.clamp_to(w, h) else {
            return false;
        };
        self.push_snapshot();
        pixelate_region(&mut self.working, r, pixel_size.max(1));
        debug!(?r, pixel_size, "editor pixelate");
        true
    }

    // ── pointer dispatch ────────────────────────────────────────────────

    /// Pointer pressed at surface coordinates `p` (see [`map_pointer`]).
    pub fn pointer_down(&mut self, p: (f32, f32)) {
        match self.tool {
            Tool::Draw => self.begin_stroke(p),
            Tool::Crop | Tool::Pixelate => {
                self.gesture = Some(Gesture::Select {
                    start: p,
                    current: p,
                })
            }
        }
    }

    pub fn pointer_move(&mut self, p: (f32, f32)) {
        match self.gesture {
            Some(Gesture::Stroke { .. }) => self.stroke_to(p),
            Some(Gesture::Select { start, .. }) => {
                self.gesture = Some(Gesture::Select { start, current: p })
            }
            None => {}
        }
    }

    /// Pointer released: ends a stroke or commits the selected rectangle.
    /// Returns whether the surface changed on release.
    pub fn pointer_up(&mut self, p: (f32, f32)) -> bool {
        match self.gesture.take() {
            Some(Gesture::Stroke { last }) => {
                draw_segment(&mut self.working, last, p, self.brush);
                true
            }
            Some(Gesture::Select { start, .. }) => {
                let rect = Rect::from_drag(start, p);
                match self.tool {
                    Tool::Crop => self.crop(rect),
                    Tool::Pixelate => self.pixelate(rect, self.pixel_size),
                    Tool::Draw => false,
                }
            }
            None => false,
        }
    }

    /// Rectangle currently being dragged, for the selection overlay.
    pub fn selection(&self) -> Option<Rect> {
        match self.gesture {
            Some(Gesture::Select { start, current }) => Some(Rect::from_drag(start, current)),
            _ => None,
        }
    }

    // ── export ──────────────────────────────────────────────────────────

    /// Encode the working surface. JPEG drops the alpha channel.
    pub fn export_snapshot(&self, format: ImageFormat) -> Result<Vec<u8>, FolioError> {
        if !self.is_loaded() {
            return Err(FolioError::Image("no image loaded".into()));
        }
        let image = match format {
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(self.working.clone()).to_rgb8()),
            _ => DynamicImage::ImageRgba8(self.working.clone()),
        };
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), format)?;
        Ok(bytes)
    }
}

// ============================================================================
// PIXEL OPERATIONS
// ============================================================================

/// Paint a filled disc of the brush diameter centred on `p`.
fn stamp(img: &mut RgbaImage, p: (f32, f32), brush: Brush) {
    let r = brush.size as f32 / 2.0;
    let (w, h) = img.dimensions();
    let x0 = (p.0 - r).floor().max(0.0) as u32;
    let y0 = (p.1 - r).floor().max(0.0) as u32;
    let x1 = ((p.0 + r).ceil().max(0.0) as u32).min(w);
    let y1 = ((p.1 + r).ceil().max(0.0) as u32).min(h);
    let color = Rgba(brush.color);
    for y in y0..y1 {
        for x in x0..x1 {
            let dx = x as f32 + 0.5 - p.0;
            let dy = y as f32 + 0.5 - p.1;
            if dx * dx + dy * dy <= r * r {
                img.put_pixel(x, y, color);
            }
        }
    }
}

/// Stamp along the segment `a`→`b` with spacing of a quarter brush.
fn draw_segment(img: &mut RgbaImage, a: (f32, f32), b: (f32, f32), brush: Brush) {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len = (dx * dx + dy * dy).sqrt();
    let spacing = (brush.size as f32 / 4.0).max(0.5);
    let steps = (len / spacing).ceil().max(1.0) as u32;
    for i in 1..=steps {
        let t = i as f32 / steps as f32;
        stamp(img, (a.0 + dx * t, a.1 + dy * t), brush);
    }
}

/// Replace `r` with `floor(max(2, extent / pixel_size))` blocks per axis.
///
/// Block `i` along an axis of length `n` with `b` blocks covers the pixels
/// `x` with `x * b / n == i`. Each block takes the colour of its centre
/// pixel (nearest-neighbour down-sample) and is filled with it
/// (nearest-neighbour up-sample). A block's centre lies inside the block,
/// so pixelating an already pixelated region changes nothing.
fn pixelate_region(img: &mut RgbaImage, r: Rect, pixel_size: u32) {
    let blocks = |extent: u32| (extent / pixel_size).max(2).min(extent);
    let (bw, bh) = (blocks(r.width), blocks(r.height));

    let start = |i: u32, extent: u32, b: u32| ((i as u64 * extent as u64).div_ceil(b as u64)) as u32;
    let centre = |i: u32, extent: u32, b: u32| (start(i, extent, b) + start(i + 1, extent, b) - 1) / 2;

    let mut small = Vec::with_capacity((bw * bh) as usize);
    for j in 0..bh {
        let sy = r.y + centre(j, r.height, bh);
        for i in 0..bw {
            let sx = r.x + centre(i, r.width, bw);
            small.push(*img.get_pixel(sx, sy));
        }
    }

    for y in 0..r.height {
        let j = (y as u64 * bh as u64 / r.height as u64) as u32;
        for x in 0..r.width {
            let i = (x as u64 * bw as u64 / r.width as u64) as u32;
            img.put_pixel(r.x + x, r.y + y, small[(j * bw + i) as usize]);
        }
    }
}

// ============================================================================
// HANDLE
// ============================================================================

/// Shared reference to an editor, handed to whoever needs the current
/// picture (the workflow on commit, the HTTP session store).
#[derive(Clone)]
pub struct EditorHandle {
    inner: Arc<Mutex<RasterEditor>>,
}

impl EditorHandle {
    pub fn new(editor: RasterEditor) -> Self {
        Self {
            inner: Arc::new(Mutex::new(editor)),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, RasterEditor> {
        self.inner.lock().await
    }

    /// Run `f` against the editor on the blocking pool. The lock is held
    /// until `f` returns.
    pub async fn run_blocking<T, F>(&self, f: F) -> Result<T, FolioError>
    where
        F: FnOnce(&mut RasterEditor) -> T + Send + 'static,
        T: Send + 'static,
    {
        let mut guard = self.inner.clone().lock_owned().await;
        tokio::task::spawn_blocking(move || f(&mut guard))
            .await
            .map_err(|e| FolioError::Io(std::io::Error::other(e)))
    }

    /// Encode the current working surface.
    pub async fn export_snapshot(&self, format: ImageFormat) -> Result<Vec<u8>, FolioError> {
        self.run_blocking(move |editor| editor.export_snapshot(format))
            .await?
    }
}

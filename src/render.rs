use ab_glyph::{FontRef, PxScale};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_line_segment_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::error::RenderError;
use crate::models::{MeanTrajectory, RasterField, Trajectory};
use crate::strike::{classify, CLASS_COUNT};

pub const BACKGROUND: [u8; 3] = [0x05, 0x06, 0x08];
pub const GOLD: [u8; 3] = [0xf4, 0xc5, 0x42];
const MEMBER_LINE: [u8; 3] = [0x21, 0x5c, 0x38];
const FRAME: [u8; 3] = [0x44, 0x44, 0x44];
const TEXT: [u8; 3] = [0xf2, 0xf2, 0xf2];
const MUTED: [u8; 3] = [0xa0, 0xa4, 0xab];

const FONT_BYTES: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

/// Ten-step strike probability palette, lowest class first.
pub const STRIKE_PALETTE: [[u8; 3]; CLASS_COUNT] = [
    [0x8d, 0xf5, 0x2c],
    [0x6a, 0xe2, 0x4c],
    [0x61, 0xbb, 0x30],
    [0x50, 0x8b, 0x15],
    [0x05, 0x79, 0x41],
    [0x23, 0x97, 0xd1],
    [0x55, 0x7f, 0xf3],
    [0x14, 0x3c, 0xdc],
    [0x39, 0x10, 0xb4],
    GOLD,
];

/// How a raster's values map to colours.
#[derive(Clone, Copy)]
pub enum ColorSpec {
    /// Fixed palette, one colour per class over the valid range.
    Classified(&'static [[u8; 3]; CLASS_COUNT]),
    /// Continuous gradient over the valid range.
    Gradient(colorous::Gradient),
}

/// The visualization collaborator: turns numeric products into encoded images.
pub trait Renderer {
    fn render_raster(
        &self,
        field: &RasterField,
        colors: ColorSpec,
        title: &str,
    ) -> Result<Vec<u8>, RenderError>;

    fn render_placeholder(&self, message: &str, subtitle: &str) -> Result<Vec<u8>, RenderError>;

    fn render_track_overview(
        &self,
        tracks: &[Trajectory],
        mean: &MeanTrajectory,
        title: &str,
    ) -> Result<Vec<u8>, RenderError>;
}

/// PNG renderer. Titles and messages are drawn on the image and also
/// carried as iTXt metadata.
#[derive(Debug, Clone)]
pub struct PngRenderer {
    pub cell_px: u32,
    pub canvas: (u32, u32),
    pub margin_deg: f64,
    /// Height of the title band above a raster.
    pub title_band_px: u32,
}

impl Default for PngRenderer {
    fn default() -> Self {
        PngRenderer {
            cell_px: 4,
            canvas: (650, 500),
            margin_deg: 2.0,
            title_band_px: 28,
        }
    }
}

fn bundled_font() -> Result<FontRef<'static>, RenderError> {
    FontRef::try_from_slice(FONT_BYTES).map_err(|_| RenderError::Font)
}

fn draw_label(
    img: &mut RgbaImage,
    font: &FontRef<'_>,
    size: f32,
    (x, y): (i32, i32),
    text: &str,
    color: [u8; 3],
) {
    draw_text_mut(img, rgba(color), x, y, PxScale::from(size), font, text);
}

/// Draws `text` horizontally centred with its top at `y`.
fn draw_centered(
    img: &mut RgbaImage,
    font: &FontRef<'_>,
    size: f32,
    y: i32,
    text: &str,
    color: [u8; 3],
) {
    let (w, _) = text_size(PxScale::from(size), font, text);
    let x = (img.width().saturating_sub(w) / 2) as i32;
    draw_label(img, font, size, (x, y), text, color);
}

fn rgba([r, g, b]: [u8; 3]) -> Rgba<u8> {
    Rgba([r, g, b, 255])
}

fn framed(width: u32, height: u32) -> RgbaImage {
    let mut img = RgbaImage::from_pixel(width, height, rgba(BACKGROUND));
    let (w, h) = (width as f32 - 1.0, height as f32 - 1.0);
    for (a, b) in [((0.0, 0.0), (w, 0.0)), ((w, 0.0), (w, h)), ((w, h), (0.0, h)), ((0.0, h), (0.0, 0.0))] {
        draw_line_segment_mut(&mut img, a, b, rgba(FRAME));
    }
    img
}

impl Renderer for PngRenderer {
    fn render_raster(
        &self,
        field: &RasterField,
        colors: ColorSpec,
        title: &str,
    ) -> Result<Vec<u8>, RenderError> {
        if field.rows == 0 || field.cols == 0 {
            return Err(RenderError::Empty("raster has no cells"));
        }
        let range = field
            .value_range()
            .ok_or(RenderError::Empty("raster has no data cells"))?;

        let font = bundled_font()?;
        let px = self.cell_px.max(1);
        let band = self.title_band_px;
        let mut img = framed(field.cols as u32 * px, field.rows as u32 * px + band);
        for row in 0..field.rows {
            for col in 0..field.cols {
                let Some(value) = field.cells[row * field.cols + col] else {
                    continue;
                };
                let Some(color) = cell_color(value, range, colors) else {
                    continue;
                };
                let rect = Rect::at((col as u32 * px) as i32, (row as u32 * px + band) as i32)
                    .of_size(px, px);
                draw_filled_rect_mut(&mut img, rect, rgba(color));
            }
        }
        if band > 0 {
            let size = (band as f32 * 0.6).max(8.0);
            let top = ((band as f32 - size) / 2.0) as i32;
            draw_label(&mut img, &font, size, (6, top), title, TEXT);
        }

        let bounds = format!(
            "{} {} {} {}",
            field.bounds.west, field.bounds.south, field.bounds.east, field.bounds.north
        );
        encode(&img, &[("Title", title), ("Bounds", &bounds)])
    }

    fn render_placeholder(&self, message: &str, subtitle: &str) -> Result<Vec<u8>, RenderError> {
        let font = bundled_font()?;
        let (width, height) = (600, 400);
        let mut img = RgbaImage::from_pixel(width, height, rgba(BACKGROUND));
        let rule_y = height as i32 / 2 + 30;
        let rule = Rect::at(width as i32 / 5, rule_y).of_size(width * 3 / 5, 3);
        draw_filled_rect_mut(&mut img, rule, rgba(GOLD));

        let lines: Vec<&str> = message.lines().collect();
        let line_height = 36;
        let mut y = rule_y - 20 - line_height * lines.len() as i32;
        for line in lines {
            draw_centered(&mut img, &font, 28.0, y, line, TEXT);
            y += line_height;
        }
        draw_centered(&mut img, &font, 18.0, rule_y + 20, subtitle, MUTED);
        encode(&img, &[("Title", message), ("Description", subtitle)])
    }

    fn render_track_overview(
        &self,
        tracks: &[Trajectory],
        mean: &MeanTrajectory,
        title: &str,
    ) -> Result<Vec<u8>, RenderError> {
        let all = tracks.iter().flat_map(|t| t.positions.iter());
        let (mut south, mut north, mut west, mut east) =
            (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY);
        for &(lat, lon) in all {
            south = south.min(lat);
            north = north.max(lat);
            west = west.min(lon);
            east = east.max(lon);
        }
        if !south.is_finite() {
            return Err(RenderError::Empty("no member positions"));
        }
        south -= self.margin_deg;
        north += self.margin_deg;
        west -= self.margin_deg;
        east += self.margin_deg;

        let font = bundled_font()?;
        let (width, height) = self.canvas;
        let mut img = framed(width, height);
        let project = |(lat, lon): (f64, f64)| -> (f32, f32) {
            (
                ((lon - west) / (east - west) * f64::from(width - 1)) as f32,
                ((north - lat) / (north - south) * f64::from(height - 1)) as f32,
            )
        };

        for track in tracks {
            stroke(&mut img, track.positions.iter().map(|&p| project(p)), rgba(MEMBER_LINE));
        }
        for offset in [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)] {
            let shifted = mean.positions.iter().map(|&p| {
                let (x, y) = project(p);
                (x + offset.0, y + offset.1)
            });
            stroke(&mut img, shifted, rgba(GOLD));
        }
        draw_label(&mut img, &font, 18.0, (10, 8), title, TEXT);

        encode(&img, &[("Title", title)])
    }
}

fn cell_color(value: f32, range: (f32, f32), colors: ColorSpec) -> Option<[u8; 3]> {
    match colors {
        ColorSpec::Classified(palette) => classify(value, range).map(|class| palette[class]),
        ColorSpec::Gradient(gradient) => {
            let (min, max) = range;
            let t = if max > min { (value - min) / (max - min) } else { 1.0 };
            let c = gradient.eval_continuous(f64::from(t.clamp(0.0, 1.0)));
            Some([c.r, c.g, c.b])
        }
    }
}

fn stroke(img: &mut RgbaImage, points: impl Iterator<Item = (f32, f32)>, color: Rgba<u8>) {
    let points: Vec<(f32, f32)> = points.collect();
    match points.as_slice() {
        [] => {}
        [(x, y)] => {
            draw_filled_rect_mut(img, Rect::at(*x as i32, *y as i32).of_size(2, 2), color);
        }
        many => {
            for pair in many.windows(2) {
                draw_line_segment_mut(img, pair[0], pair[1], color);
            }
        }
    }
}

fn encode(img: &RgbaImage, text: &[(&str, &str)]) -> Result<Vec<u8>, RenderError> {
    let mut bytes = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut bytes, img.width(), img.height());
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        for (keyword, value) in text {
            encoder.add_itxt_chunk((*keyword).to_string(), (*value).to_string())?;
        }
        let mut writer = encoder.write_header()?;
        writer.write_image_data(img.as_raw())?;
        writer.finish()?;
    }
    Ok(bytes)
}

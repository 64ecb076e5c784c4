use std::io::Write;

use tiny_skia::{
    BlendMode, FillRule as SkFillRule, FilterQuality, GradientStop, LineCap as SkLineCap,
    LineJoin as SkLineJoin, LinearGradient, Mask, Paint, Path, PathBuilder, Pixmap, PixmapPaint,
    Point, RadialGradient, Rect, Shader, SpreadMode, Stroke, StrokeDash, Transform,
};
use ttf_parser::{GlyphId, OutlineBuilder};

use crate::canvas::{Command, FontSpec, Page};
use crate::error::ConvertError;
use crate::font::{self, FontDb};
use crate::types::{Color, FillRule, LineCap, LineJoin, Pt, RasterImage, Shading, ShadingStop};

#[derive(Clone)]
struct RasterState {
    transform: Transform,
    fill_color: Color,
    stroke_color: Color,
    line_width: Pt,
    line_cap: LineCap,
    line_join: LineJoin,
    miter_limit: Pt,
    dash_pattern: Vec<Pt>,
    dash_phase: Pt,
    fill_opacity: f32,
    stroke_opacity: f32,
    clip_mask: Option<Mask>,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            transform: Transform::identity(),
            fill_color: Color::BLACK,
            stroke_color: Color::BLACK,
            line_width: Pt::from_f32(1.0),
            line_cap: LineCap::Butt,
            line_join: LineJoin::Miter,
            miter_limit: Pt::from_f32(10.0),
            dash_pattern: Vec::new(),
            dash_phase: Pt::ZERO,
            fill_opacity: 1.0,
            stroke_opacity: 1.0,
            clip_mask: None,
        }
    }
}

/// Offscreen target of a `BeginLayer`, composited back on `EndLayer`.
struct Layer {
    pixmap: Pixmap,
    opacity: f32,
    saved: RasterState,
}

/// Rasterizes one page and writes it to `writer` as PNG. The page size is
/// taken as whole pixels.
pub(crate) fn write_png<W: Write>(page: &Page, mut writer: W) -> Result<W, ConvertError> {
    let pixmap = rasterize(page)?;
    let png = pixmap
        .encode_png()
        .map_err(|e| ConvertError::Backend(format!("png encode failed: {e}")))?;
    writer.write_all(&png)?;
    writer.flush()?;
    Ok(writer)
}

pub(crate) fn rasterize(page: &Page) -> Result<Pixmap, ConvertError> {
    let width = page.size.width.ceil().max(1.0) as u32;
    let height = page.size.height.ceil().max(1.0) as u32;
    let base = Pixmap::new(width, height).ok_or_else(|| {
        ConvertError::Config(format!("invalid raster size {width}x{height}"))
    })?;
    let mut painter = Painter {
        fonts: &page.fonts,
        width,
        height,
        base,
        layers: Vec::new(),
        state: RasterState::default(),
        stack: Vec::new(),
        path: PathBuilder::new(),
        has_path: false,
    };
    for cmd in &page.commands {
        painter.execute(cmd);
    }
    while !painter.layers.is_empty() {
        painter.end_layer();
    }
    Ok(painter.base)
}

struct Painter<'p> {
    fonts: &'p FontDb,
    width: u32,
    height: u32,
    base: Pixmap,
    layers: Vec<Layer>,
    state: RasterState,
    stack: Vec<RasterState>,
    path: PathBuilder,
    has_path: bool,
}

fn target<'a>(base: &'a mut Pixmap, layers: &'a mut [Layer]) -> &'a mut Pixmap {
    match layers.last_mut() {
        Some(layer) => &mut layer.pixmap,
        None => base,
    }
}

impl Painter<'_> {
    fn execute(&mut self, cmd: &Command) {
        match cmd {
            Command::SaveState => self.stack.push(self.state.clone()),
            Command::RestoreState => {
                if let Some(restored) = self.stack.pop() {
                    self.state = restored;
                }
            }
            Command::ConcatMatrix { a, b, c, d, e, f } => {
                self.state.transform = self.state.transform.pre_concat(Transform::from_row(
                    *a,
                    *b,
                    *c,
                    *d,
                    e.to_f32(),
                    f.to_f32(),
                ));
            }
            Command::SetFillColor(color) => self.state.fill_color = *color,
            Command::SetStrokeColor(color) => self.state.stroke_color = *color,
            Command::SetOpacity { fill, stroke } => {
                self.state.fill_opacity = fill.clamp(0.0, 1.0);
                self.state.stroke_opacity = stroke.clamp(0.0, 1.0);
            }
            Command::SetLineWidth(width) => {
                self.state.line_width = if *width < Pt::ZERO { Pt::ZERO } else { *width };
            }
            Command::SetLineCap(cap) => self.state.line_cap = *cap,
            Command::SetLineJoin(join) => self.state.line_join = *join,
            Command::SetMiterLimit(limit) => self.state.miter_limit = *limit,
            Command::SetDash { pattern, phase } => {
                self.state.dash_pattern = pattern.clone();
                self.state.dash_phase = *phase;
            }
            Command::MoveTo { x, y } => {
                self.path.move_to(x.to_f32(), y.to_f32());
                self.has_path = true;
            }
            Command::LineTo { x, y } => {
                self.path.line_to(x.to_f32(), y.to_f32());
                self.has_path = true;
            }
            Command::CurveTo {
                x1,
                y1,
                x2,
                y2,
                x,
                y,
            } => {
                self.path.cubic_to(
                    x1.to_f32(),
                    y1.to_f32(),
                    x2.to_f32(),
                    y2.to_f32(),
                    x.to_f32(),
                    y.to_f32(),
                );
                self.has_path = true;
            }
            Command::ClosePath => {
                if self.has_path {
                    self.path.close();
                }
            }
            Command::Fill(rule) => {
                if let Some(path) = self.take_path() {
                    self.fill(&path, *rule);
                }
            }
            Command::Stroke => {
                if let Some(path) = self.take_path() {
                    self.stroke(&path);
                }
            }
            Command::FillStroke(rule) => {
                if let Some(path) = self.take_path() {
                    self.fill(&path, *rule);
                    self.stroke(&path);
                }
            }
            Command::ClipPath(rule) => {
                // An empty or degenerate path clips everything away.
                let path = self.take_path();
                self.apply_clip_path(path.as_ref(), *rule);
            }
            Command::ShadingFill(shading) => self.draw_shading_fill(shading),
            Command::BeginLayer { opacity } => self.begin_layer(*opacity),
            Command::EndLayer => self.end_layer(),
            Command::DrawText {
                x,
                y,
                text,
                font,
                size,
            } => self.draw_text(x.to_f32(), y.to_f32(), text, font, size.to_f32()),
            Command::DrawImage {
                x,
                y,
                width,
                height,
                image,
            } => self.draw_image(
                x.to_f32(),
                y.to_f32(),
                width.to_f32(),
                height.to_f32(),
                image,
            ),
        }
    }

    fn take_path(&mut self) -> Option<Path> {
        if !self.has_path {
            return None;
        }
        self.has_path = false;
        let builder = std::mem::replace(&mut self.path, PathBuilder::new());
        builder.finish()
    }

    fn fill(&mut self, path: &Path, rule: FillRule) {
        if self.state.fill_opacity <= 0.0 {
            return;
        }
        let paint = fill_paint(self.state.fill_color, self.state.fill_opacity);
        let transform = self.state.transform;
        target(&mut self.base, &mut self.layers)
            .fill_path(path, &paint, sk_fill_rule(rule), transform, self.state.clip_mask.as_ref());
    }

    fn stroke(&mut self, path: &Path) {
        if self.state.stroke_opacity <= 0.0 || self.state.line_width <= Pt::ZERO {
            return;
        }
        let paint = fill_paint(self.state.stroke_color, self.state.stroke_opacity);
        let stroke = build_stroke(&self.state);
        let transform = self.state.transform;
        target(&mut self.base, &mut self.layers)
            .stroke_path(path, &paint, &stroke, transform, self.state.clip_mask.as_ref());
    }

    fn apply_clip_path(&mut self, path: Option<&Path>, rule: FillRule) {
        let fill_rule = sk_fill_rule(rule);
        let transform = self.state.transform;
        match (self.state.clip_mask.as_mut(), path) {
            (Some(mask), Some(path)) => mask.intersect_path(path, fill_rule, true, transform),
            (Some(mask), None) => mask.data_mut().fill(0),
            (None, path) => {
                let Some(mut mask) = Mask::new(self.width, self.height) else {
                    return;
                };
                if let Some(path) = path {
                    mask.fill_path(path, fill_rule, true, transform);
                }
                self.state.clip_mask = Some(mask);
            }
        }
    }

    fn draw_shading_fill(&mut self, shading: &Shading) {
        let Some(rect) = Rect::from_xywh(0.0, 0.0, self.width as f32, self.height as f32) else {
            return;
        };
        let device_path = PathBuilder::from_rect(rect);
        let Some(shader) = build_shader(shading, self.state.fill_opacity, self.state.transform)
        else {
            return;
        };
        let paint = Paint {
            shader,
            anti_alias: true,
            ..Paint::default()
        };
        target(&mut self.base, &mut self.layers).fill_path(
            &device_path,
            &paint,
            SkFillRule::Winding,
            Transform::identity(),
            self.state.clip_mask.as_ref(),
        );
    }

    fn begin_layer(&mut self, opacity: f32) {
        let Some(pixmap) = Pixmap::new(self.width, self.height) else {
            return;
        };
        self.layers.push(Layer {
            pixmap,
            opacity: opacity.clamp(0.0, 1.0),
            saved: self.state.clone(),
        });
    }

    fn end_layer(&mut self) {
        let Some(layer) = self.layers.pop() else {
            return;
        };
        self.state = layer.saved;
        let paint = PixmapPaint {
            opacity: layer.opacity,
            blend_mode: BlendMode::SourceOver,
            quality: FilterQuality::Nearest,
        };
        target(&mut self.base, &mut self.layers).draw_pixmap(
            0,
            0,
            layer.pixmap.as_ref(),
            &paint,
            Transform::identity(),
            None,
        );
    }

    fn draw_text(&mut self, x: f32, y: f32, text: &str, spec: &FontSpec, size: f32) {
        if size <= 0.0 || self.state.fill_opacity <= 0.0 || text.is_empty() {
            return;
        }
        let Some(font_data) = self.fonts.resolve(spec) else {
            log::debug!("no font available for {:?}; text skipped in raster output", spec.family);
            return;
        };
        let Ok(face) = ttf_parser::Face::parse(font_data.as_slice(), 0) else {
            return;
        };
        let paint = fill_paint(self.state.fill_color, self.state.fill_opacity);
        let transform = self.state.transform;
        for glyph in font::layout_glyphs(font_data.as_slice(), text, size) {
            let mut builder =
                GlyphPathBuilder::new(x + glyph.origin_x, y + glyph.origin_y, glyph.scale);
            if face.outline_glyph(GlyphId(glyph.glyph_id), &mut builder).is_none() {
                continue;
            }
            if let Some(path) = builder.finish() {
                target(&mut self.base, &mut self.layers).fill_path(
                    &path,
                    &paint,
                    SkFillRule::Winding,
                    transform,
                    self.state.clip_mask.as_ref(),
                );
            }
        }
    }

    fn draw_image(&mut self, x: f32, y: f32, width: f32, height: f32, image: &RasterImage) {
        if image.width == 0 || image.height == 0 || width <= 0.0 || height <= 0.0 {
            return;
        }
        let Some(source) = image_to_pixmap(image) else {
            return;
        };
        let placement = Transform::from_row(
            width / image.width as f32,
            0.0,
            0.0,
            height / image.height as f32,
            x,
            y,
        );
        let paint = PixmapPaint {
            opacity: self.state.fill_opacity,
            blend_mode: BlendMode::SourceOver,
            quality: FilterQuality::Bilinear,
        };
        let transform = self.state.transform.pre_concat(placement);
        target(&mut self.base, &mut self.layers)
            .draw_pixmap(0, 0, source.as_ref(), &paint, transform, self.state.clip_mask.as_ref());
    }
}

fn sk_fill_rule(rule: FillRule) -> SkFillRule {
    match rule {
        FillRule::NonZero => SkFillRule::Winding,
        FillRule::EvenOdd => SkFillRule::EvenOdd,
    }
}

fn build_shader(shading: &Shading, opacity: f32, transform: Transform) -> Option<Shader<'static>> {
    let stops = shading.stops();
    let last = stops.last()?;
    let fallback = Shader::SolidColor(to_sk_color(last.color, last.opacity * opacity));
    let gradient = match shading {
        Shading::Axial { x0, y0, x1, y1, .. } => LinearGradient::new(
            Point::from_xy(*x0, *y0),
            Point::from_xy(*x1, *y1),
            shading_stops(stops, opacity),
            SpreadMode::Pad,
            transform,
        ),
        Shading::Radial {
            x0, y0, x1, y1, r1, ..
        } => RadialGradient::new(
            Point::from_xy(*x0, *y0),
            Point::from_xy(*x1, *y1),
            r1.max(0.0001),
            shading_stops(stops, opacity),
            SpreadMode::Pad,
            transform,
        ),
    };
    Some(gradient.unwrap_or(fallback))
}

fn shading_stops(stops: &[ShadingStop], opacity: f32) -> Vec<GradientStop> {
    stops
        .iter()
        .map(|stop| {
            GradientStop::new(
                stop.offset.clamp(0.0, 1.0),
                to_sk_color(stop.color, stop.opacity * opacity),
            )
        })
        .collect()
}

struct GlyphPathBuilder {
    builder: PathBuilder,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
}

impl GlyphPathBuilder {
    fn new(origin_x: f32, origin_y: f32, scale: f32) -> Self {
        Self {
            builder: PathBuilder::new(),
            origin_x,
            origin_y,
            scale,
        }
    }

    // Font units grow upwards; user space grows downwards.
    fn map(&self, x: f32, y: f32) -> (f32, f32) {
        (self.origin_x + x * self.scale, self.origin_y - y * self.scale)
    }

    fn finish(self) -> Option<Path> {
        self.builder.finish()
    }
}

impl OutlineBuilder for GlyphPathBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x, y) = self.map(x, y);
        self.builder.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x2, y2) = self.map(x2, y2);
        let (x, y) = self.map(x, y);
        self.builder.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

fn build_stroke(state: &RasterState) -> Stroke {
    let mut stroke = Stroke {
        width: state.line_width.to_f32().max(0.0),
        miter_limit: state.miter_limit.to_f32().max(1.0),
        line_cap: match state.line_cap {
            LineCap::Butt => SkLineCap::Butt,
            LineCap::Round => SkLineCap::Round,
            LineCap::Square => SkLineCap::Square,
        },
        line_join: match state.line_join {
            LineJoin::Miter => SkLineJoin::Miter,
            LineJoin::Round => SkLineJoin::Round,
            LineJoin::Bevel => SkLineJoin::Bevel,
        },
        ..Stroke::default()
    };

    if !state.dash_pattern.is_empty() {
        let mut pattern: Vec<f32> = state
            .dash_pattern
            .iter()
            .map(|p| p.to_f32().max(0.0))
            .collect();
        if pattern.len() % 2 == 1 {
            let copy = pattern.clone();
            pattern.extend(copy);
        }
        stroke.dash = StrokeDash::new(pattern, state.dash_phase.to_f32());
    }

    stroke
}

fn fill_paint(color: Color, opacity: f32) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color(to_sk_color(color, opacity));
    paint.anti_alias = true;
    paint
}

fn to_sk_color(color: Color, opacity: f32) -> tiny_skia::Color {
    let r = color.r.clamp(0.0, 1.0);
    let g = color.g.clamp(0.0, 1.0);
    let b = color.b.clamp(0.0, 1.0);
    let a = opacity.clamp(0.0, 1.0);
    tiny_skia::Color::from_rgba(r, g, b, a).unwrap_or(tiny_skia::Color::BLACK)
}

fn image_to_pixmap(image: &RasterImage) -> Option<Pixmap> {
    let mut pixmap = Pixmap::new(image.width, image.height)?;
    for (src, dst) in image
        .rgba
        .chunks_exact(4)
        .zip(pixmap.data_mut().chunks_exact_mut(4))
    {
        let a = src[3];
        dst[0] = premul_u8(src[0], a);
        dst[1] = premul_u8(src[1], a);
        dst[2] = premul_u8(src[2], a);
        dst[3] = a;
    }
    Some(pixmap)
}

fn premul_u8(channel: u8, alpha: u8) -> u8 {
    let prod = (channel as u16) * (alpha as u16) + 127;
    ((prod + (prod >> 8)) >> 8) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Canvas;
    use crate::geometry::Matrix;
    use crate::types::Size;
    use std::sync::Arc;

    fn rect(canvas: &mut Canvas, x: f32, y: f32, w: f32, h: f32) {
        canvas.move_to(Pt::from_f32(x), Pt::from_f32(y));
        canvas.line_to(Pt::from_f32(x + w), Pt::from_f32(y));
        canvas.line_to(Pt::from_f32(x + w), Pt::from_f32(y + h));
        canvas.line_to(Pt::from_f32(x), Pt::from_f32(y + h));
        canvas.close_path();
    }

    fn rgba_at(pixmap: &Pixmap, x: u32, y: u32) -> [u8; 4] {
        let px = pixmap.pixel(x, y).expect("pixel in range").demultiply();
        [px.red(), px.green(), px.blue(), px.alpha()]
    }

    #[test]
    fn fills_rect_in_user_space() {
        let mut canvas = Canvas::new(Size::new(20.0, 20.0));
        canvas.concat_matrix(Matrix::scale(2.0, 2.0));
        canvas.set_fill_color(Color::rgb(1.0, 0.0, 0.0));
        rect(&mut canvas, 0.0, 0.0, 5.0, 5.0);
        canvas.fill(FillRule::NonZero);
        let pixmap = rasterize(&canvas.finish()).unwrap();
        assert_eq!(rgba_at(&pixmap, 1, 1), [255, 0, 0, 255]);
        assert_eq!(rgba_at(&pixmap, 9, 9), [255, 0, 0, 255]);
        assert_eq!(rgba_at(&pixmap, 11, 11)[3], 0);
    }

    #[test]
    fn layer_opacity_applies_to_group_once() {
        let mut canvas = Canvas::new(Size::new(10.0, 10.0));
        canvas.begin_layer(0.5);
        canvas.set_fill_color(Color::rgb(0.0, 0.0, 1.0));
        rect(&mut canvas, 0.0, 0.0, 10.0, 10.0);
        canvas.fill(FillRule::NonZero);
        rect(&mut canvas, 0.0, 0.0, 10.0, 10.0);
        canvas.fill(FillRule::NonZero);
        canvas.end_layer();
        let pixmap = rasterize(&canvas.finish()).unwrap();
        let alpha = rgba_at(&pixmap, 5, 5)[3];
        assert!((126..=129).contains(&alpha), "alpha {alpha}");
    }

    #[test]
    fn clip_restricts_painting_until_restore() {
        let mut canvas = Canvas::new(Size::new(10.0, 10.0));
        canvas.save_state();
        rect(&mut canvas, 0.0, 0.0, 5.0, 10.0);
        canvas.clip_path(FillRule::NonZero);
        rect(&mut canvas, 0.0, 0.0, 10.0, 10.0);
        canvas.fill(FillRule::NonZero);
        canvas.restore_state();
        canvas.set_fill_color(Color::rgb(0.0, 1.0, 0.0));
        rect(&mut canvas, 0.0, 8.0, 10.0, 2.0);
        canvas.fill(FillRule::NonZero);
        let pixmap = rasterize(&canvas.finish()).unwrap();
        assert_eq!(rgba_at(&pixmap, 2, 2), [0, 0, 0, 255]);
        assert_eq!(rgba_at(&pixmap, 7, 2)[3], 0);
        assert_eq!(rgba_at(&pixmap, 7, 9), [0, 255, 0, 255]);
    }

    #[test]
    fn empty_clip_hides_everything() {
        let mut canvas = Canvas::new(Size::new(4.0, 4.0));
        canvas.move_to(Pt::ZERO, Pt::ZERO);
        canvas.close_path();
        canvas.clip_path(FillRule::NonZero);
        rect(&mut canvas, 0.0, 0.0, 4.0, 4.0);
        canvas.fill(FillRule::NonZero);
        let pixmap = rasterize(&canvas.finish()).unwrap();
        assert!(pixmap.pixels().iter().all(|p| p.alpha() == 0));
    }

    #[test]
    fn axial_shading_blends_between_stops() {
        let mut canvas = Canvas::new(Size::new(100.0, 4.0));
        canvas.shading_fill(Shading::Axial {
            x0: 0.0,
            y0: 0.0,
            x1: 100.0,
            y1: 0.0,
            stops: vec![
                ShadingStop { offset: 0.0, color: Color::rgb(1.0, 0.0, 0.0), opacity: 1.0 },
                ShadingStop { offset: 1.0, color: Color::rgb(0.0, 0.0, 1.0), opacity: 1.0 },
            ],
        });
        let pixmap = rasterize(&canvas.finish()).unwrap();
        let left = rgba_at(&pixmap, 1, 2);
        let right = rgba_at(&pixmap, 98, 2);
        assert!(left[0] > 240 && left[2] < 15);
        assert!(right[2] > 240 && right[0] < 15);
    }

    #[test]
    fn image_rows_start_at_top() {
        let mut rgba = vec![255, 0, 0, 255, 255, 0, 0, 255];
        rgba.extend([0, 0, 255, 255, 0, 0, 255, 255]);
        let image = Arc::new(RasterImage { width: 2, height: 2, rgba });
        let mut canvas = Canvas::new(Size::new(8.0, 8.0));
        canvas.draw_image(Pt::ZERO, Pt::ZERO, Pt::from_f32(8.0), Pt::from_f32(8.0), image);
        let pixmap = rasterize(&canvas.finish()).unwrap();
        assert_eq!(rgba_at(&pixmap, 4, 1), [255, 0, 0, 255]);
        assert_eq!(rgba_at(&pixmap, 4, 6), [0, 0, 255, 255]);
    }

    #[test]
    fn writes_png_signature() {
        let canvas = Canvas::new(Size::new(3.0, 2.0));
        let out = write_png(&canvas.finish(), Vec::new()).unwrap();
        assert_eq!(&out[..8], b"\x89PNG\r\n\x1a\n");
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (3, 2));
    }

    #[test]
    fn odd_dash_patterns_repeat() {
        let state = RasterState {
            dash_pattern: vec![Pt::from_f32(2.0), Pt::from_f32(1.0), Pt::from_f32(3.0)],
            ..RasterState::default()
        };
        assert!(build_stroke(&state).dash.is_some());
    }
}

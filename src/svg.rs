use std::io::Write;

use base64::Engine;
use image::ImageEncoder;

use crate::canvas::{Command, FontSpec, Page};
use crate::error::ConvertError;
use crate::geometry::Matrix;
use crate::pdf::{fmt, fmt_pt, fmt_unit};
use crate::types::{Color, FillRule, LineCap, LineJoin, Pt, RasterImage, Shading};

const HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

#[derive(Clone)]
struct SvgState {
    ctm: Matrix,
    fill: Color,
    stroke: Color,
    fill_alpha: f32,
    stroke_alpha: f32,
    line_width: Pt,
    line_cap: LineCap,
    line_join: LineJoin,
    miter_limit: Pt,
    dash: Vec<Pt>,
    dash_phase: Pt,
    clip: Option<usize>,
}

impl Default for SvgState {
    fn default() -> Self {
        Self {
            ctm: Matrix::identity(),
            fill: Color::BLACK,
            stroke: Color::BLACK,
            fill_alpha: 1.0,
            stroke_alpha: 1.0,
            line_width: Pt::from_f32(1.0),
            line_cap: LineCap::Butt,
            line_join: LineJoin::Miter,
            miter_limit: Pt::from_f32(10.0),
            dash: Vec::new(),
            dash_phase: Pt::ZERO,
            clip: None,
        }
    }
}

/// Serializes one page as a standalone SVG document in points. Every painted
/// element carries the full transform in effect when it was drawn, and clips
/// become `clipPath` definitions chained with `clip-path` for intersection.
pub(crate) fn write_svg<W: Write>(page: &Page, mut writer: W) -> Result<W, ConvertError> {
    let width = page.size.width.max(0.0);
    let height = page.size.height.max(0.0);
    let mut emitter = Emitter {
        width,
        height,
        ..Emitter::default()
    };
    for cmd in &page.commands {
        emitter.execute(cmd)?;
    }

    let mut out = String::from(HEADER);
    out.push_str(&format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" xmlns:xlink=\"http://www.w3.org/1999/xlink\" width=\"{w}pt\" height=\"{h}pt\" viewBox=\"0 0 {w} {h}\">\n",
        w = fmt(width),
        h = fmt(height),
    ));
    if !emitter.defs.is_empty() {
        out.push_str("<defs>\n");
        out.push_str(&emitter.defs);
        out.push_str("</defs>\n");
    }
    out.push_str(&emitter.body);
    out.push_str("</svg>\n");
    writer.write_all(out.as_bytes())?;
    writer.flush()?;
    Ok(writer)
}

#[derive(Default)]
struct Emitter {
    width: f32,
    height: f32,
    defs: String,
    body: String,
    state: SvgState,
    stack: Vec<SvgState>,
    path: String,
    clips: usize,
    gradients: usize,
}

impl Emitter {
    fn execute(&mut self, cmd: &Command) -> Result<(), ConvertError> {
        match cmd {
            Command::SaveState => self.stack.push(self.state.clone()),
            Command::RestoreState => {
                if let Some(state) = self.stack.pop() {
                    self.state = state;
                }
            }
            Command::BeginLayer { opacity } => {
                self.stack.push(self.state.clone());
                self.body
                    .push_str(&format!("<g opacity=\"{}\">\n", fmt_unit(*opacity)));
            }
            Command::EndLayer => {
                if let Some(state) = self.stack.pop() {
                    self.state = state;
                    self.body.push_str("</g>\n");
                }
            }
            Command::ConcatMatrix { a, b, c, d, e, f } => {
                let m = Matrix::new(*a, *b, *c, *d, e.to_f32(), f.to_f32());
                self.state.ctm = self.state.ctm.mul(m);
            }
            Command::SetFillColor(color) => self.state.fill = *color,
            Command::SetStrokeColor(color) => self.state.stroke = *color,
            Command::SetOpacity { fill, stroke } => {
                self.state.fill_alpha = fill.clamp(0.0, 1.0);
                self.state.stroke_alpha = stroke.clamp(0.0, 1.0);
            }
            Command::SetLineWidth(width) => self.state.line_width = *width,
            Command::SetLineCap(cap) => self.state.line_cap = *cap,
            Command::SetLineJoin(join) => self.state.line_join = *join,
            Command::SetMiterLimit(limit) => self.state.miter_limit = *limit,
            Command::SetDash { pattern, phase } => {
                self.state.dash = pattern.clone();
                self.state.dash_phase = *phase;
            }
            Command::MoveTo { x, y } => {
                self.path.push_str(&format!("M{} {} ", fmt_pt(*x), fmt_pt(*y)));
            }
            Command::LineTo { x, y } => {
                self.path.push_str(&format!("L{} {} ", fmt_pt(*x), fmt_pt(*y)));
            }
            Command::CurveTo {
                x1,
                y1,
                x2,
                y2,
                x,
                y,
            } => {
                self.path.push_str(&format!(
                    "C{} {} {} {} {} {} ",
                    fmt_pt(*x1),
                    fmt_pt(*y1),
                    fmt_pt(*x2),
                    fmt_pt(*y2),
                    fmt_pt(*x),
                    fmt_pt(*y)
                ));
            }
            Command::ClosePath => self.path.push_str("Z "),
            Command::Fill(rule) => self.paint_path(Some(*rule), false),
            Command::Stroke => self.paint_path(None, true),
            Command::FillStroke(rule) => self.paint_path(Some(*rule), true),
            Command::ClipPath(rule) => self.clip(*rule),
            Command::ShadingFill(shading) => self.shading_fill(shading),
            Command::DrawText {
                x,
                y,
                text,
                font,
                size,
            } => self.text(*x, *y, text, font, *size),
            Command::DrawImage {
                x,
                y,
                width,
                height,
                image,
            } => self.image(*x, *y, *width, *height, image)?,
        }
        Ok(())
    }

    fn take_path(&mut self) -> String {
        let path = std::mem::take(&mut self.path);
        path.trim_end().to_string()
    }

    fn paint_path(&mut self, fill: Option<FillRule>, stroke: bool) {
        let d = self.take_path();
        if d.is_empty() {
            return;
        }
        let fill = fill.filter(|_| self.state.fill_alpha > 0.0);
        let stroke = stroke && self.state.stroke_alpha > 0.0;
        if fill.is_none() && !stroke {
            return;
        }
        let mut attrs = String::new();
        match fill {
            Some(rule) => {
                attrs.push_str(&format!(" fill=\"{}\"", hex(self.state.fill)));
                if self.state.fill_alpha < 1.0 {
                    attrs.push_str(&format!(" fill-opacity=\"{}\"", fmt_unit(self.state.fill_alpha)));
                }
                if rule == FillRule::EvenOdd {
                    attrs.push_str(" fill-rule=\"evenodd\"");
                }
            }
            None => attrs.push_str(" fill=\"none\""),
        }
        if stroke {
            attrs.push_str(&self.stroke_attributes());
        }
        let element = format!(
            "<path d=\"{d}\"{}{attrs}/>",
            transform_attr(self.state.ctm)
        );
        self.push_clipped(&element);
    }

    fn stroke_attributes(&self) -> String {
        let s = &self.state;
        let mut attrs = format!(
            " stroke=\"{}\" stroke-width=\"{}\"",
            hex(s.stroke),
            fmt_pt(s.line_width)
        );
        if s.stroke_alpha < 1.0 {
            attrs.push_str(&format!(" stroke-opacity=\"{}\"", fmt_unit(s.stroke_alpha)));
        }
        match s.line_cap {
            LineCap::Butt => {}
            LineCap::Round => attrs.push_str(" stroke-linecap=\"round\""),
            LineCap::Square => attrs.push_str(" stroke-linecap=\"square\""),
        }
        match s.line_join {
            LineJoin::Miter => {}
            LineJoin::Round => attrs.push_str(" stroke-linejoin=\"round\""),
            LineJoin::Bevel => attrs.push_str(" stroke-linejoin=\"bevel\""),
        }
        attrs.push_str(&format!(" stroke-miterlimit=\"{}\"", fmt_pt(s.miter_limit)));
        if !s.dash.is_empty() {
            let items = s.dash.iter().map(|p| fmt_pt(*p)).collect::<Vec<_>>();
            attrs.push_str(&format!(" stroke-dasharray=\"{}\"", items.join(" ")));
            if s.dash_phase != Pt::ZERO {
                attrs.push_str(&format!(" stroke-dashoffset=\"{}\"", fmt_pt(s.dash_phase)));
            }
        }
        attrs
    }

    // An empty clipPath clips everything, which is what an empty path means.
    fn clip(&mut self, rule: FillRule) {
        let d = self.take_path();
        self.clips += 1;
        let id = self.clips;
        let parent = self
            .state
            .clip
            .map(|prev| format!(" clip-path=\"url(#clip{prev})\""))
            .unwrap_or_default();
        self.defs.push_str(&format!("<clipPath id=\"clip{id}\"{parent}>"));
        if !d.is_empty() {
            let rule = match rule {
                FillRule::NonZero => "",
                FillRule::EvenOdd => " clip-rule=\"evenodd\"",
            };
            self.defs.push_str(&format!(
                "<path d=\"{d}\"{}{rule}/>",
                transform_attr(self.state.ctm)
            ));
        }
        self.defs.push_str("</clipPath>\n");
        self.state.clip = Some(id);
    }

    fn shading_fill(&mut self, shading: &Shading) {
        if shading.stops().is_empty() || self.state.fill_alpha <= 0.0 {
            return;
        }
        self.gradients += 1;
        let id = self.gradients;
        let transform = if self.state.ctm.is_identity() {
            String::new()
        } else {
            format!(" gradientTransform=\"{}\"", matrix_value(self.state.ctm))
        };
        let open = match shading {
            Shading::Axial { x0, y0, x1, y1, .. } => format!(
                "<linearGradient id=\"grad{id}\" gradientUnits=\"userSpaceOnUse\" x1=\"{}\" y1=\"{}\" x2=\"{}\" y2=\"{}\"{transform}>",
                fmt(*x0),
                fmt(*y0),
                fmt(*x1),
                fmt(*y1)
            ),
            Shading::Radial {
                x0,
                y0,
                r0,
                x1,
                y1,
                r1,
                ..
            } => {
                let focal_radius = if *r0 > 0.0 {
                    format!(" fr=\"{}\"", fmt(*r0))
                } else {
                    String::new()
                };
                format!(
                    "<radialGradient id=\"grad{id}\" gradientUnits=\"userSpaceOnUse\" cx=\"{}\" cy=\"{}\" r=\"{}\" fx=\"{}\" fy=\"{}\"{focal_radius}{transform}>",
                    fmt(*x1),
                    fmt(*y1),
                    fmt(*r1),
                    fmt(*x0),
                    fmt(*y0)
                )
            }
        };
        self.defs.push_str(&open);
        for stop in shading.stops() {
            self.defs.push_str(&format!(
                "<stop offset=\"{}\" stop-color=\"{}\"",
                fmt_unit(stop.offset),
                hex(stop.color)
            ));
            if stop.opacity < 1.0 {
                self.defs
                    .push_str(&format!(" stop-opacity=\"{}\"", fmt_unit(stop.opacity)));
            }
            self.defs.push_str("/>");
        }
        self.defs.push_str(match shading {
            Shading::Axial { .. } => "</linearGradient>\n",
            Shading::Radial { .. } => "</radialGradient>\n",
        });

        let mut element = format!(
            "<rect x=\"0\" y=\"0\" width=\"{}\" height=\"{}\" fill=\"url(#grad{id})\"",
            fmt(self.width),
            fmt(self.height)
        );
        if self.state.fill_alpha < 1.0 {
            element.push_str(&format!(" fill-opacity=\"{}\"", fmt_unit(self.state.fill_alpha)));
        }
        element.push_str("/>");
        self.push_clipped(&element);
    }

    fn text(&mut self, x: Pt, y: Pt, text: &str, font: &FontSpec, size: Pt) {
        if text.is_empty() || self.state.fill_alpha <= 0.0 {
            return;
        }
        let mut attrs = format!(
            " font-family=\"{}\" font-size=\"{}\"",
            escape_xml(&font.family),
            fmt_pt(size)
        );
        if font.weight != 400 {
            attrs.push_str(&format!(" font-weight=\"{}\"", font.weight));
        }
        if font.italic {
            attrs.push_str(" font-style=\"italic\"");
        }
        attrs.push_str(&format!(" fill=\"{}\"", hex(self.state.fill)));
        if self.state.fill_alpha < 1.0 {
            attrs.push_str(&format!(" fill-opacity=\"{}\"", fmt_unit(self.state.fill_alpha)));
        }
        let element = format!(
            "<text x=\"{}\" y=\"{}\"{}{attrs} xml:space=\"preserve\">{}</text>",
            fmt_pt(x),
            fmt_pt(y),
            transform_attr(self.state.ctm),
            escape_xml(text)
        );
        self.push_clipped(&element);
    }

    fn image(
        &mut self,
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
        image: &RasterImage,
    ) -> Result<(), ConvertError> {
        if image.width == 0 || image.height == 0 || self.state.fill_alpha <= 0.0 {
            return Ok(());
        }
        let mut png = Vec::new();
        image::codecs::png::PngEncoder::new(&mut png)
            .write_image(
                &image.rgba,
                image.width,
                image.height,
                image::ExtendedColorType::Rgba8,
            )
            .map_err(|e| ConvertError::Backend(format!("png encode failed: {e}")))?;
        let mut element = format!(
            "<image x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" preserveAspectRatio=\"none\"{}",
            fmt_pt(x),
            fmt_pt(y),
            fmt_pt(width),
            fmt_pt(height),
            transform_attr(self.state.ctm)
        );
        if self.state.fill_alpha < 1.0 {
            element.push_str(&format!(" opacity=\"{}\"", fmt_unit(self.state.fill_alpha)));
        }
        element.push_str(&format!(
            " xlink:href=\"data:image/png;base64,{}\"/>",
            base64::engine::general_purpose::STANDARD.encode(&png)
        ));
        self.push_clipped(&element);
        Ok(())
    }

    fn push_clipped(&mut self, element: &str) {
        match self.state.clip {
            Some(id) => self
                .body
                .push_str(&format!("<g clip-path=\"url(#clip{id})\">{element}</g>\n")),
            None => {
                self.body.push_str(element);
                self.body.push('\n');
            }
        }
    }
}

fn matrix_value(m: Matrix) -> String {
    format!(
        "matrix({} {} {} {} {} {})",
        fmt(m.a),
        fmt(m.b),
        fmt(m.c),
        fmt(m.d),
        fmt(m.e),
        fmt(m.f)
    )
}

fn transform_attr(m: Matrix) -> String {
    if m.is_identity() {
        String::new()
    } else {
        format!(" transform=\"{}\"", matrix_value(m))
    }
}

fn hex(color: Color) -> String {
    let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    format!(
        "#{:02x}{:02x}{:02x}",
        channel(color.r),
        channel(color.g),
        channel(color.b)
    )
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Canvas;
    use crate::types::{ShadingStop, Size};
    use std::sync::Arc;

    fn render(canvas: Canvas) -> String {
        let bytes = write_svg(&canvas.finish(), Vec::new()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        roxmltree::Document::parse(&text).expect("output is well-formed XML");
        text
    }

    fn square(canvas: &mut Canvas, size: f32) {
        canvas.move_to(Pt::ZERO, Pt::ZERO);
        canvas.line_to(Pt::from_f32(size), Pt::ZERO);
        canvas.line_to(Pt::from_f32(size), Pt::from_f32(size));
        canvas.close_path();
    }

    #[test]
    fn header_declares_point_size() {
        let svg = render(Canvas::new(Size::new(74.5, 30.0)));
        assert!(svg.starts_with("<?xml"));
        assert!(svg.contains("width=\"74.5pt\" height=\"30pt\" viewBox=\"0 0 74.5 30\""));
        assert!(svg.ends_with("</svg>\n"));
        assert!(!svg.contains("<defs>"));
    }

    #[test]
    fn paths_carry_paint_and_transform() {
        let mut canvas = Canvas::new(Size::new(20.0, 20.0));
        canvas.concat_matrix(Matrix::scale(0.75, 0.75));
        canvas.set_fill_color(Color::rgb(1.0, 0.0, 0.0));
        canvas.set_stroke_color(Color::rgb(0.0, 0.0, 1.0));
        canvas.set_opacity(0.5, 1.0);
        canvas.set_line_width(Pt::from_f32(2.0));
        canvas.set_dash(vec![Pt::from_f32(3.0), Pt::from_f32(1.0)], Pt::ZERO);
        square(&mut canvas, 10.0);
        canvas.fill_stroke(FillRule::EvenOdd);
        let svg = render(canvas);
        assert!(svg.contains(
            "<path d=\"M0 0 L10 0 L10 10 Z\" transform=\"matrix(0.75 0 0 0.75 0 0)\" fill=\"#ff0000\" fill-opacity=\"0.5\" fill-rule=\"evenodd\" stroke=\"#0000ff\" stroke-width=\"2\""
        ));
        assert!(svg.contains("stroke-dasharray=\"3 1\""));
    }

    #[test]
    fn invisible_paint_emits_nothing() {
        let mut canvas = Canvas::new(Size::new(10.0, 10.0));
        canvas.set_opacity(0.0, 0.0);
        square(&mut canvas, 5.0);
        canvas.fill_stroke(FillRule::NonZero);
        let svg = render(canvas);
        assert!(!svg.contains("<path"));
    }

    #[test]
    fn nested_clips_chain_and_layers_group() {
        let mut canvas = Canvas::new(Size::new(10.0, 10.0));
        square(&mut canvas, 8.0);
        canvas.clip_path(FillRule::NonZero);
        canvas.begin_layer(0.5);
        square(&mut canvas, 4.0);
        canvas.clip_path(FillRule::EvenOdd);
        square(&mut canvas, 10.0);
        canvas.fill(FillRule::NonZero);
        canvas.end_layer();
        square(&mut canvas, 2.0);
        canvas.fill(FillRule::NonZero);
        let svg = render(canvas);
        assert!(svg.contains("<clipPath id=\"clip1\"><path d=\"M0 0 L8 0 L8 8 Z\"/></clipPath>"));
        assert!(svg.contains("<clipPath id=\"clip2\" clip-path=\"url(#clip1)\"><path d=\"M0 0 L4 0 L4 4 Z\" clip-rule=\"evenodd\"/></clipPath>"));
        assert!(svg.contains("<g opacity=\"0.5\">\n<g clip-path=\"url(#clip2)\"><path d=\"M0 0 L10 0 L10 10 Z\" fill=\"#000000\"/></g>\n</g>\n"));
        // After the layer the outer clip is back in effect.
        assert!(svg.contains("<g clip-path=\"url(#clip1)\"><path d=\"M0 0 L2 0 L2 2 Z\" fill=\"#000000\"/></g>"));
    }

    #[test]
    fn shading_text_and_image() {
        let mut canvas = Canvas::new(Size::new(40.0, 20.0));
        canvas.shading_fill(Shading::Axial {
            x0: 0.0,
            y0: 0.0,
            x1: 1.0,
            y1: 0.0,
            stops: vec![
                ShadingStop {
                    offset: 0.0,
                    color: Color::rgb(1.0, 0.0, 0.0),
                    opacity: 1.0,
                },
                ShadingStop {
                    offset: 1.0,
                    color: Color::rgb(0.0, 0.0, 1.0),
                    opacity: 0.25,
                },
            ],
        });
        canvas.draw_text(
            Pt::from_f32(2.0),
            Pt::from_f32(12.0),
            "a < b & \"c\"",
            FontSpec {
                family: "'Open Sans', serif".into(),
                weight: 700,
                italic: true,
            },
            Pt::from_f32(9.0),
        );
        let image = Arc::new(RasterImage {
            width: 1,
            height: 1,
            rgba: vec![255, 128, 0, 255],
        });
        canvas.draw_image(Pt::ZERO, Pt::ZERO, Pt::from_f32(4.0), Pt::from_f32(4.0), image);
        let svg = render(canvas);
        assert!(svg.contains("<linearGradient id=\"grad1\" gradientUnits=\"userSpaceOnUse\" x1=\"0\" y1=\"0\" x2=\"1\" y2=\"0\">"));
        assert!(svg.contains("<stop offset=\"1\" stop-color=\"#0000ff\" stop-opacity=\"0.25\"/>"));
        assert!(svg.contains("<rect x=\"0\" y=\"0\" width=\"40\" height=\"20\" fill=\"url(#grad1)\"/>"));
        assert!(svg.contains("font-family=\"&apos;Open Sans&apos;, serif\" font-size=\"9\" font-weight=\"700\" font-style=\"italic\""));
        assert!(svg.contains(">a &lt; b &amp; &quot;c&quot;</text>"));
        assert!(svg.contains("preserveAspectRatio=\"none\" xlink:href=\"data:image/png;base64,iVBORw0KGgo"));
    }
}

use std::io::Write;

use crate::canvas::{Command, FontSpec, Page};
use crate::error::ConvertError;
use crate::font;
use crate::pdf::{
    ascii_hex_encode, color_operands, escape_pdf_bytes, fmt, fmt_pt, interpolation_function,
    normalize_stops, stitching_function,
};
use crate::types::{Color, FillRule, Pt, RasterImage, Shading};

// Reencodes a base font to ISO Latin-1. Stack: size /FontName.
const PROLOG: &str = "/SvgFont {
  findfont dup length dict begin
  { 1 index /FID ne { def } { pop pop } ifelse } forall
  /Encoding ISOLatin1Encoding def
  currentdict end
  /SvgTmpFont exch definefont exch scalefont setfont
} bind def
";

#[derive(Clone, Copy)]
struct PsState {
    fill: Color,
    stroke: Color,
    fill_alpha: f32,
    stroke_alpha: f32,
}

impl Default for PsState {
    fn default() -> Self {
        Self {
            fill: Color::BLACK,
            stroke: Color::BLACK,
            fill_alpha: 1.0,
            stroke_alpha: 1.0,
        }
    }
}

/// Serializes one page as a DSC-conforming PostScript level 3 program.
/// PostScript has no constant alpha: translucent paint is drawn opaque and
/// fully transparent paint is dropped.
pub(crate) fn write_ps<W: Write>(page: &Page, mut writer: W) -> Result<W, ConvertError> {
    let width = page.size.width.max(0.0);
    let height = page.size.height.max(0.0);
    let mut out = String::new();
    out.push_str(&format!(
        "%!PS-Adobe-3.0\n%%BoundingBox: 0 0 {} {}\n%%HiResBoundingBox: 0 0 {} {}\n%%Creator: svgconvert\n%%LanguageLevel: 3\n%%Pages: 1\n%%EndComments\n%%BeginProlog\n{PROLOG}%%EndProlog\n%%Page: 1 1\n",
        width.ceil() as i64,
        height.ceil() as i64,
        fmt(width),
        fmt(height),
    ));
    out.push_str(&format!("<< /PageSize [{} {}] >> setpagedevice\n", fmt(width), fmt(height)));
    out.push_str(&format!("[1 0 0 -1 0 {}] concat\n", fmt(height)));

    let mut emitter = Emitter {
        out,
        state: PsState::default(),
        stack: Vec::new(),
    };
    for cmd in &page.commands {
        emitter.execute(cmd);
    }
    let mut out = emitter.out;
    out.push_str("showpage\n%%Trailer\n%%EOF\n");
    writer.write_all(out.as_bytes())?;
    writer.flush()?;
    Ok(writer)
}

struct Emitter {
    out: String,
    state: PsState,
    stack: Vec<PsState>,
}

impl Emitter {
    fn line(&mut self, text: &str) {
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn execute(&mut self, cmd: &Command) {
        match cmd {
            Command::SaveState | Command::BeginLayer { .. } => {
                self.stack.push(self.state);
                self.line("gsave");
            }
            Command::RestoreState | Command::EndLayer => {
                if let Some(state) = self.stack.pop() {
                    self.state = state;
                    self.line("grestore");
                }
            }
            Command::ConcatMatrix { a, b, c, d, e, f } => {
                let text = format!(
                    "[{} {} {} {} {} {}] concat",
                    fmt(*a),
                    fmt(*b),
                    fmt(*c),
                    fmt(*d),
                    fmt_pt(*e),
                    fmt_pt(*f)
                );
                self.line(&text);
            }
            Command::SetFillColor(color) => self.state.fill = *color,
            Command::SetStrokeColor(color) => self.state.stroke = *color,
            Command::SetOpacity { fill, stroke } => {
                self.state.fill_alpha = *fill;
                self.state.stroke_alpha = *stroke;
            }
            Command::SetLineWidth(width) => self.line(&format!("{} setlinewidth", fmt_pt(*width))),
            Command::SetLineCap(cap) => self.line(&format!("{} setlinecap", cap.code())),
            Command::SetLineJoin(join) => self.line(&format!("{} setlinejoin", join.code())),
            Command::SetMiterLimit(limit) => {
                self.line(&format!("{} setmiterlimit", fmt_pt(*limit)))
            }
            Command::SetDash { pattern, phase } => {
                let items = pattern.iter().map(|p| fmt_pt(*p)).collect::<Vec<_>>();
                self.line(&format!("[{}] {} setdash", items.join(" "), fmt_pt(*phase)));
            }
            Command::MoveTo { x, y } => self.line(&format!("{} {} moveto", fmt_pt(*x), fmt_pt(*y))),
            Command::LineTo { x, y } => self.line(&format!("{} {} lineto", fmt_pt(*x), fmt_pt(*y))),
            Command::CurveTo {
                x1,
                y1,
                x2,
                y2,
                x,
                y,
            } => {
                let text = format!(
                    "{} {} {} {} {} {} curveto",
                    fmt_pt(*x1),
                    fmt_pt(*y1),
                    fmt_pt(*x2),
                    fmt_pt(*y2),
                    fmt_pt(*x),
                    fmt_pt(*y)
                );
                self.line(&text);
            }
            Command::ClosePath => self.line("closepath"),
            Command::Fill(rule) => {
                if self.state.fill_alpha <= 0.0 {
                    self.line("newpath");
                    return;
                }
                let text = format!("{} setrgbcolor {}", color_operands(self.state.fill), fill_op(*rule));
                self.line(&text);
            }
            Command::Stroke => {
                if self.state.stroke_alpha <= 0.0 {
                    self.line("newpath");
                    return;
                }
                let text = format!("{} setrgbcolor stroke", color_operands(self.state.stroke));
                self.line(&text);
            }
            Command::FillStroke(rule) => {
                match (self.state.fill_alpha > 0.0, self.state.stroke_alpha > 0.0) {
                    (true, true) => {
                        let text = format!(
                            "gsave {} setrgbcolor {} grestore {} setrgbcolor stroke",
                            color_operands(self.state.fill),
                            fill_op(*rule),
                            color_operands(self.state.stroke)
                        );
                        self.line(&text);
                    }
                    (true, false) => self.execute(&Command::Fill(*rule)),
                    (false, true) => self.execute(&Command::Stroke),
                    (false, false) => self.line("newpath"),
                }
            }
            Command::ClipPath(rule) => self.line(match rule {
                FillRule::NonZero => "clip newpath",
                FillRule::EvenOdd => "eoclip newpath",
            }),
            Command::ShadingFill(shading) => {
                if shading.stops().is_empty() || self.state.fill_alpha <= 0.0 {
                    return;
                }
                let text = format!("{} shfill", shading_dict(shading));
                self.line(&text);
            }
            Command::DrawText {
                x,
                y,
                text,
                font,
                size,
            } => {
                if text.is_empty() || self.state.fill_alpha <= 0.0 {
                    return;
                }
                let body = text_show(*x, *y, text, font, *size, self.state.fill);
                self.line(&body);
            }
            Command::DrawImage {
                x,
                y,
                width,
                height,
                image,
            } => {
                if image.width == 0 || image.height == 0 || self.state.fill_alpha <= 0.0 {
                    return;
                }
                let body = image_program(*x, *y, *width, *height, image);
                self.out.push_str(&body);
            }
        }
    }
}

fn fill_op(rule: FillRule) -> &'static str {
    match rule {
        FillRule::NonZero => "fill",
        FillRule::EvenOdd => "eofill",
    }
}

fn shading_dict(shading: &Shading) -> String {
    let stops = normalize_stops(shading.stops());
    let function = if stops.len() == 2 {
        interpolation_function(stops[0].color, stops[1].color)
    } else {
        let parts = stops
            .windows(2)
            .map(|pair| interpolation_function(pair[0].color, pair[1].color))
            .collect::<Vec<_>>();
        stitching_function(&stops, &parts.join(" "))
    };
    match shading {
        Shading::Axial { x0, y0, x1, y1, .. } => format!(
            "<< /ShadingType 2 /ColorSpace /DeviceRGB /Coords [{} {} {} {}] /Function {function} /Extend [true true] >>",
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
        } => format!(
            "<< /ShadingType 3 /ColorSpace /DeviceRGB /Coords [{} {} {} {} {} {}] /Function {function} /Extend [true true] >>",
            fmt(*x0),
            fmt(*y0),
            fmt(*r0),
            fmt(*x1),
            fmt(*y1),
            fmt(*r1)
        ),
    }
}

fn text_show(x: Pt, y: Pt, text: &str, spec: &FontSpec, size: Pt, color: Color) -> String {
    format!(
        "gsave {} setrgbcolor {} {} translate 1 -1 scale 0 0 moveto {} /{} SvgFont ({}) show grestore",
        color_operands(color),
        fmt_pt(x),
        fmt_pt(y),
        fmt_pt(size),
        font::base14_name(spec),
        escape_pdf_bytes(&encode_latin1(text))
    )
}

fn encode_latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|ch| u8::try_from(u32::from(ch)).unwrap_or(b'?'))
        .collect()
}

fn image_program(x: Pt, y: Pt, width: Pt, height: Pt, image: &RasterImage) -> String {
    let rgb: Vec<u8> = image
        .rgba
        .chunks_exact(4)
        .flat_map(|px| [px[0], px[1], px[2]])
        .collect();
    format!(
        "gsave {} {} translate {} {} scale\n{w} {h} 8 [{w} 0 0 {h} 0 0] currentfile /ASCIIHexDecode filter false 3 colorimage\n{}>\ngrestore\n",
        fmt_pt(x),
        fmt_pt(y),
        fmt_pt(width),
        fmt_pt(height),
        ascii_hex_encode(&rgb),
        w = image.width,
        h = image.height,
    )
}

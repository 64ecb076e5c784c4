use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::Arc;

use crate::canvas::{Command, Page};
use crate::error::ConvertError;
use crate::font;
use crate::geometry::Matrix;
use crate::types::{Color, FillRule, Pt, RasterImage, Rect, Shading, ShadingStop};

const PDF_CATALOG_ID: usize = 1;
const PDF_PAGES_ID: usize = 2;
const PDF_PAGE_ID: usize = 3;
const PDF_CONTENT_ID: usize = 4;
const PDF_RESOURCES_ID: usize = 5;
const PDF_INFO_ID: usize = 6;
const PDF_FIRST_DYNAMIC_ID: usize = 7;

/// Serializes one page as a single-page PDF 1.4 file. Output depends only
/// on the command list, so identical pages give identical bytes.
pub(crate) fn write_pdf<W: Write>(page: &Page, mut writer: W) -> Result<W, ConvertError> {
    let body = PdfBody::build(page);
    body.write(&mut writer)?;
    writer.flush()?;
    Ok(writer)
}

#[derive(Clone, Copy)]
struct WriterState {
    ctm: Matrix,
    // Alpha pair in thousandths, as last set with `gs`.
    alpha: (u16, u16),
}

struct ContentFrame {
    content: String,
    opacity: f32,
    bbox: Rect,
}

struct FormRecord {
    content: String,
    bbox: Rect,
}

/// Named resources collected while translating the command list. Names are
/// handed out in first-use order.
#[derive(Default)]
struct ResourceTable {
    alphas: BTreeMap<(u16, u16), String>,
    shadings: Vec<(Shading, String)>,
    fonts: Vec<(&'static str, String)>,
    images: Vec<(Arc<RasterImage>, String)>,
    forms: Vec<(FormRecord, String)>,
}

impl ResourceTable {
    fn alpha_name(&mut self, alpha: (u16, u16)) -> String {
        let next = self.alphas.len() + 1;
        self.alphas
            .entry(alpha)
            .or_insert_with(|| format!("GS{next}"))
            .clone()
    }

    fn shading_name(&mut self, shading: &Shading) -> String {
        if let Some((_, name)) = self.shadings.iter().find(|(s, _)| s == shading) {
            return name.clone();
        }
        let name = format!("Sh{}", self.shadings.len() + 1);
        self.shadings.push((shading.clone(), name.clone()));
        name
    }

    fn font_name(&mut self, base: &'static str) -> String {
        if let Some((_, name)) = self.fonts.iter().find(|(b, _)| *b == base) {
            return name.clone();
        }
        let name = format!("F{}", self.fonts.len() + 1);
        self.fonts.push((base, name.clone()));
        name
    }

    fn image_name(&mut self, image: &Arc<RasterImage>) -> String {
        if let Some((_, name)) = self
            .images
            .iter()
            .find(|(i, _)| Arc::ptr_eq(i, image) || i.as_ref() == image.as_ref())
        {
            return name.clone();
        }
        let name = format!("Im{}", self.images.len() + 1);
        self.images.push((image.clone(), name.clone()));
        name
    }

    fn form_name(&mut self, form: FormRecord) -> String {
        let name = format!("Fm{}", self.forms.len() + 1);
        self.forms.push((form, name.clone()));
        name
    }
}

struct PdfBody {
    width: f32,
    height: f32,
    content: String,
    resources: ResourceTable,
}

impl PdfBody {
    fn build(page: &Page) -> Self {
        let width = page.size.width.max(0.0);
        let height = page.size.height.max(0.0);
        // Canvas coordinates grow downwards from the top-left corner.
        let flip = Matrix::new(1.0, 0.0, 0.0, -1.0, 0.0, height);
        let mut translator = Translator {
            frames: vec![ContentFrame {
                content: String::new(),
                opacity: 1.0,
                bbox: Rect::new(0.0, 0.0, width, height),
            }],
            state: WriterState {
                ctm: flip,
                alpha: (1000, 1000),
            },
            stack: Vec::new(),
            page_rect: Rect::new(0.0, 0.0, width, height),
            resources: ResourceTable::default(),
        };
        translator.op(&format!("1 0 0 -1 0 {} cm", fmt(height)));
        for cmd in &page.commands {
            translator.execute(cmd);
        }
        while translator.frames.len() > 1 {
            translator.end_layer();
        }
        let content = translator
            .frames
            .pop()
            .map(|frame| frame.content)
            .unwrap_or_default();
        Self {
            width,
            height,
            content,
            resources: translator.resources,
        }
    }

    fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut objects: Vec<String> = vec![
            format!("<< /Type /Catalog /Pages {PDF_PAGES_ID} 0 R >>"),
            format!("<< /Type /Pages /Kids [{PDF_PAGE_ID} 0 R] /Count 1 >>"),
            format!(
                "<< /Type /Page /Parent {PDF_PAGES_ID} 0 R /MediaBox [0 0 {} {}] /Resources {PDF_RESOURCES_ID} 0 R /Contents {PDF_CONTENT_ID} 0 R >>",
                fmt(self.width),
                fmt(self.height)
            ),
            stream_object(&self.content),
            String::new(),
            "<< /Producer (svgconvert) >>".to_string(),
        ];
        let mut next_id = PDF_FIRST_DYNAMIC_ID;
        let mut xobjects: Vec<(String, usize)> = Vec::new();
        let mut states: Vec<(String, usize)> = Vec::new();
        let mut shadings: Vec<(String, usize)> = Vec::new();
        let mut fonts: Vec<(String, usize)> = Vec::new();

        for (form, name) in &self.resources.forms {
            objects.push(form_object(form));
            xobjects.push((name.clone(), next_id));
            next_id += 1;
        }
        for ((fill, stroke), name) in &self.resources.alphas {
            objects.push(format!(
                "<< /Type /ExtGState /ca {} /CA {} >>",
                format_milli(*fill as i64),
                format_milli(*stroke as i64)
            ));
            states.push((name.clone(), next_id));
            next_id += 1;
        }
        for (shading, name) in &self.resources.shadings {
            let (mut sh_objs, sh_id, new_next) = shading_to_objects(shading, next_id);
            objects.append(&mut sh_objs);
            shadings.push((name.clone(), sh_id));
            next_id = new_next;
        }
        for (base, name) in &self.resources.fonts {
            objects.push(format!(
                "<< /Type /Font /Subtype /Type1 /BaseFont /{base} /Encoding /WinAnsiEncoding >>"
            ));
            fonts.push((name.clone(), next_id));
            next_id += 1;
        }
        for (image, name) in &self.resources.images {
            let smask_id = if image.is_opaque() {
                None
            } else {
                objects.push(image_smask_object(image));
                next_id += 1;
                Some(next_id - 1)
            };
            objects.push(image_object(image, smask_id));
            xobjects.push((name.clone(), next_id));
            next_id += 1;
        }

        let mut resources = String::from("<< /ProcSet [/PDF /Text /ImageB /ImageC]");
        for (key, entries) in [
            ("ExtGState", &states),
            ("Shading", &shadings),
            ("Font", &fonts),
            ("XObject", &xobjects),
        ] {
            if !entries.is_empty() {
                resources.push_str(&format!(" /{key} {}", resource_dict(entries)));
            }
        }
        resources.push_str(" >>");
        objects[PDF_RESOURCES_ID - 1] = resources;

        let mut offset = 0usize;
        let mut offsets = vec![0usize; objects.len() + 1];
        write_bytes(writer, b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n", &mut offset)?;
        for (index, body) in objects.iter().enumerate() {
            write_pdf_object(writer, &mut offset, &mut offsets, index + 1, body)?;
        }
        let xref_start = offset;
        let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
        for slot in offsets.iter().skip(1) {
            xref.push_str(&format!("{slot:010} 00000 n \n"));
        }
        xref.push_str(&format!(
            "trailer\n<< /Size {} /Root {PDF_CATALOG_ID} 0 R /Info {PDF_INFO_ID} 0 R >>\nstartxref\n{xref_start}\n%%EOF\n",
            objects.len() + 1
        ));
        write_str(writer, &xref, &mut offset)
    }
}

struct Translator {
    frames: Vec<ContentFrame>,
    state: WriterState,
    stack: Vec<WriterState>,
    page_rect: Rect,
    resources: ResourceTable,
}

impl Translator {
    fn op(&mut self, line: &str) {
        if let Some(frame) = self.frames.last_mut() {
            frame.content.push_str(line);
            frame.content.push('\n');
        }
    }

    fn execute(&mut self, cmd: &Command) {
        match cmd {
            Command::SaveState => {
                self.stack.push(self.state);
                self.op("q");
            }
            Command::RestoreState => {
                if let Some(state) = self.stack.pop() {
                    self.state = state;
                    self.op("Q");
                }
            }
            Command::ConcatMatrix { a, b, c, d, e, f } => {
                let m = Matrix::new(*a, *b, *c, *d, e.to_f32(), f.to_f32());
                self.state.ctm = self.state.ctm.mul(m);
                self.op(&format!(
                    "{} {} {} {} {} {} cm",
                    fmt(*a),
                    fmt(*b),
                    fmt(*c),
                    fmt(*d),
                    fmt_pt(*e),
                    fmt_pt(*f)
                ));
            }
            Command::SetFillColor(color) => {
                let line = format!("{} rg", color_operands(*color));
                self.op(&line);
            }
            Command::SetStrokeColor(color) => {
                let line = format!("{} RG", color_operands(*color));
                self.op(&line);
            }
            Command::SetOpacity { fill, stroke } => self.set_alpha((to_milli(*fill), to_milli(*stroke))),
            Command::SetLineWidth(width) => {
                let line = format!("{} w", fmt_pt(*width));
                self.op(&line);
            }
            Command::SetLineCap(cap) => {
                let line = format!("{} J", cap.code());
                self.op(&line);
            }
            Command::SetLineJoin(join) => {
                let line = format!("{} j", join.code());
                self.op(&line);
            }
            Command::SetMiterLimit(limit) => {
                let line = format!("{} M", fmt_pt(*limit));
                self.op(&line);
            }
            Command::SetDash { pattern, phase } => {
                let items = pattern.iter().map(|p| fmt_pt(*p)).collect::<Vec<_>>();
                let line = format!("[{}] {} d", items.join(" "), fmt_pt(*phase));
                self.op(&line);
            }
            Command::MoveTo { x, y } => {
                let line = format!("{} {} m", fmt_pt(*x), fmt_pt(*y));
                self.op(&line);
            }
            Command::LineTo { x, y } => {
                let line = format!("{} {} l", fmt_pt(*x), fmt_pt(*y));
                self.op(&line);
            }
            Command::CurveTo {
                x1,
                y1,
                x2,
                y2,
                x,
                y,
            } => {
                let line = format!(
                    "{} {} {} {} {} {} c",
                    fmt_pt(*x1),
                    fmt_pt(*y1),
                    fmt_pt(*x2),
                    fmt_pt(*y2),
                    fmt_pt(*x),
                    fmt_pt(*y)
                );
                self.op(&line);
            }
            Command::ClosePath => self.op("h"),
            Command::Fill(rule) => self.op(match rule {
                FillRule::NonZero => "f",
                FillRule::EvenOdd => "f*",
            }),
            Command::Stroke => self.op("S"),
            Command::FillStroke(rule) => self.op(match rule {
                FillRule::NonZero => "B",
                FillRule::EvenOdd => "B*",
            }),
            Command::ClipPath(rule) => self.op(match rule {
                FillRule::NonZero => "W n",
                FillRule::EvenOdd => "W* n",
            }),
            Command::ShadingFill(shading) => {
                if shading.stops().is_empty() {
                    return;
                }
                let name = self.resources.shading_name(shading);
                self.op(&format!("/{name} sh"));
            }
            Command::BeginLayer { opacity } => self.begin_layer(*opacity),
            Command::EndLayer => self.end_layer(),
            Command::DrawText {
                x,
                y,
                text,
                font: spec,
                size,
            } => {
                if text.is_empty() {
                    return;
                }
                let name = self.resources.font_name(font::base14_name(spec));
                let encoded = escape_pdf_bytes(&font::encode_win_ansi(text));
                let line = format!(
                    "BT /{name} {} Tf 1 0 0 -1 {} {} Tm ({encoded}) Tj ET",
                    fmt_pt(*size),
                    fmt_pt(*x),
                    fmt_pt(*y)
                );
                self.op(&line);
            }
            Command::DrawImage {
                x,
                y,
                width,
                height,
                image,
            } => {
                if image.width == 0 || image.height == 0 {
                    return;
                }
                let name = self.resources.image_name(image);
                let line = format!(
                    "q {} 0 0 {} {} {} cm /{name} Do Q",
                    fmt_pt(*width),
                    fmt_pt(Pt::ZERO - *height),
                    fmt_pt(*x),
                    fmt_pt(*y + *height)
                );
                self.op(&line);
            }
        }
    }

    fn set_alpha(&mut self, alpha: (u16, u16)) {
        let name = self.resources.alpha_name(alpha);
        self.state.alpha = alpha;
        self.op(&format!("/{name} gs"));
    }

    fn begin_layer(&mut self, opacity: f32) {
        // Form space is the current user space; its bounding box is the page
        // mapped back through the CTM.
        let bbox = match self.state.ctm.invert() {
            Ok(inverse) => inverse.map_rect(self.page_rect),
            Err(_) => Rect::new(0.0, 0.0, 0.0, 0.0),
        };
        self.stack.push(self.state);
        self.frames.push(ContentFrame {
            content: String::new(),
            opacity: opacity.clamp(0.0, 1.0),
            bbox,
        });
        // Transparency groups start with alpha reset to 1.
        if self.state.alpha != (1000, 1000) {
            let alpha = self.state.alpha;
            self.set_alpha(alpha);
        }
    }

    fn end_layer(&mut self) {
        if self.frames.len() < 2 {
            return;
        }
        let Some(frame) = self.frames.pop() else {
            return;
        };
        if let Some(state) = self.stack.pop() {
            self.state = state;
        }
        let group_alpha = to_milli(frame.opacity);
        let gs = self.resources.alpha_name((group_alpha, group_alpha));
        let form = self.resources.form_name(FormRecord {
            content: frame.content,
            bbox: frame.bbox,
        });
        self.op(&format!("q /{gs} gs /{form} Do Q"));
    }
}

fn to_milli(value: f32) -> u16 {
    if !value.is_finite() {
        return 1000;
    }
    ((value * 1000.0).round() as i32).clamp(0, 1000) as u16
}

fn form_object(form: &FormRecord) -> String {
    let b = form.bbox;
    format!(
        "<< /Type /XObject /Subtype /Form /BBox [{} {} {} {}] /Group << /S /Transparency /CS /DeviceRGB >> /Resources {PDF_RESOURCES_ID} 0 R /Length {} >>\nstream\n{}\nendstream",
        fmt(b.x),
        fmt(b.y),
        fmt(b.right()),
        fmt(b.bottom()),
        form.content.len(),
        form.content
    )
}

fn shading_to_objects(shading: &Shading, start_id: usize) -> (Vec<String>, usize, usize) {
    // Function objects first, then the shading dictionary.
    let mut objects: Vec<String> = Vec::new();
    let (fun_objects, fun_id, mut next_id) = build_gradient_function_objects(shading.stops(), start_id);
    objects.extend(fun_objects);
    let sh_obj_id = next_id;
    next_id += 1;

    let sh_dict = match shading {
        Shading::Axial { x0, y0, x1, y1, .. } => format!(
            "<< /ShadingType 2 /ColorSpace /DeviceRGB /Coords [{} {} {} {}] /Function {fun_id} 0 R /Extend [true true] >>",
            fmt(*x0),
            fmt(*y0),
            fmt(*x1),
            fmt(*y1),
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
            "<< /ShadingType 3 /ColorSpace /DeviceRGB /Coords [{} {} {} {} {} {}] /Function {fun_id} 0 R /Extend [true true] >>",
            fmt(*x0),
            fmt(*y0),
            fmt(*r0),
            fmt(*x1),
            fmt(*y1),
            fmt(*r1),
        ),
    };
    objects.push(sh_dict);
    (objects, sh_obj_id, next_id)
}

/// Maps t in [0,1] to RGB: one Type 2 function per stop pair, stitched with
/// a Type 3 function when there is more than one pair.
fn build_gradient_function_objects(stops: &[ShadingStop], start_id: usize) -> (Vec<String>, usize, usize) {
    let stops = normalize_stops(stops);
    let mut objects: Vec<String> = Vec::new();
    let mut next_id = start_id;
    let mut seg_fun_ids: Vec<usize> = Vec::new();
    for pair in stops.windows(2) {
        seg_fun_ids.push(next_id);
        next_id += 1;
        objects.push(interpolation_function(pair[0].color, pair[1].color));
    }

    if seg_fun_ids.len() == 1 {
        return (objects, seg_fun_ids[0], next_id);
    }

    let stitch_id = next_id;
    next_id += 1;
    let fun_refs = seg_fun_ids
        .iter()
        .map(|id| format!("{id} 0 R"))
        .collect::<Vec<_>>()
        .join(" ");
    objects.push(stitching_function(&stops, &fun_refs));
    (objects, stitch_id, next_id)
}

/// Sorted stops clamped to [0,1], padded so the first sits at 0 and the
/// last at 1. Always at least two entries.
pub(crate) fn normalize_stops(stops: &[ShadingStop]) -> Vec<ShadingStop> {
    let mut stops = stops.to_vec();
    if stops.is_empty() {
        stops.push(ShadingStop {
            offset: 0.0,
            color: Color::BLACK,
            opacity: 1.0,
        });
    }
    for s in &mut stops {
        s.offset = s.offset.clamp(0.0, 1.0);
    }
    stops.sort_by(|a, b| a.offset.partial_cmp(&b.offset).unwrap_or(std::cmp::Ordering::Equal));
    if stops[0].offset > 0.0 {
        let first = stops[0];
        stops.insert(0, ShadingStop { offset: 0.0, ..first });
    }
    let last = stops[stops.len() - 1];
    if stops.len() == 1 || last.offset < 1.0 {
        stops.push(ShadingStop { offset: 1.0, ..last });
    }
    stops
}

pub(crate) fn interpolation_function(from: Color, to: Color) -> String {
    format!(
        "<< /FunctionType 2 /Domain [0 1] /C0 [{}] /C1 [{}] /N 1 >>",
        color_operands(from),
        color_operands(to),
    )
}

/// Type 3 function over `stops` (already normalized); `functions` holds one
/// entry per stop pair.
pub(crate) fn stitching_function(stops: &[ShadingStop], functions: &str) -> String {
    let bounds = stops[1..stops.len() - 1]
        .iter()
        .map(|s| fmt(s.offset))
        .collect::<Vec<_>>()
        .join(" ");
    let encode = vec!["0 1"; stops.len() - 1].join(" ");
    format!(
        "<< /FunctionType 3 /Domain [0 1] /Functions [{functions}] /Bounds [{bounds}] /Encode [{encode}] >>"
    )
}

fn image_object(image: &RasterImage, smask_id: Option<usize>) -> String {
    let rgb: Vec<u8> = image
        .rgba
        .chunks_exact(4)
        .flat_map(|px| [px[0], px[1], px[2]])
        .collect();
    let stream_data = encode_stream_data(&rgb);
    let smask = smask_id
        .map(|id| format!(" /SMask {id} 0 R"))
        .unwrap_or_default();
    format!(
        "<< /Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace /DeviceRGB /BitsPerComponent 8 /Length {} /Filter /ASCIIHexDecode{smask} >>\nstream\n{stream_data}\nendstream",
        image.width,
        image.height,
        stream_data.len(),
    )
}

fn image_smask_object(image: &RasterImage) -> String {
    let alpha: Vec<u8> = image.rgba.chunks_exact(4).map(|px| px[3]).collect();
    let stream_data = encode_stream_data(&alpha);
    format!(
        "<< /Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace /DeviceGray /BitsPerComponent 8 /Length {} /Filter /ASCIIHexDecode >>\nstream\n{stream_data}\nendstream",
        image.width,
        image.height,
        stream_data.len(),
    )
}

fn encode_stream_data(data: &[u8]) -> String {
    let mut hex = ascii_hex_encode(data);
    hex.push('>');
    hex
}

pub(crate) fn ascii_hex_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2 + data.len() / 32);
    for (index, byte) in data.iter().enumerate() {
        use std::fmt::Write;
        let _ = write!(&mut out, "{byte:02X}");
        if index % 32 == 31 {
            out.push('\n');
        }
    }
    out
}

fn resource_dict(entries: &[(String, usize)]) -> String {
    let items = entries
        .iter()
        .map(|(name, id)| format!("/{name} {id} 0 R"))
        .collect::<Vec<_>>();
    format!("<< {} >>", items.join(" "))
}

fn stream_object(content: &str) -> String {
    format!("<< /Length {} >>\nstream\n{}\nendstream", content.len(), content)
}

fn write_pdf_object<W: Write>(
    writer: &mut W,
    offset: &mut usize,
    offsets: &mut [usize],
    obj_id: usize,
    body: &str,
) -> io::Result<()> {
    if let Some(slot) = offsets.get_mut(obj_id) {
        *slot = *offset;
    }
    write_str(writer, &format!("{obj_id} 0 obj\n"), offset)?;
    write_bytes(writer, body.as_bytes(), offset)?;
    write_bytes(writer, b"\nendobj\n", offset)
}

fn write_bytes<W: Write>(writer: &mut W, data: &[u8], offset: &mut usize) -> io::Result<()> {
    writer.write_all(data)?;
    *offset += data.len();
    Ok(())
}

fn write_str<W: Write>(writer: &mut W, data: &str, offset: &mut usize) -> io::Result<()> {
    write_bytes(writer, data.as_bytes(), offset)
}

/// Literal string body for already-encoded single-byte text. Bytes outside
/// printable ASCII become octal escapes.
pub(crate) fn escape_pdf_bytes(input: &[u8]) -> String {
    let mut out = String::with_capacity(input.len());
    for &byte in input {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'(' => out.push_str("\\("),
            b')' => out.push_str("\\)"),
            0x20..=0x7E => out.push(byte as char),
            _ => {
                out.push_str(&format!("\\{byte:03o}"));
            }
        }
    }
    out
}

pub(crate) fn color_operands(color: Color) -> String {
    format!(
        "{} {} {}",
        fmt_unit(color.r),
        fmt_unit(color.g),
        fmt_unit(color.b)
    )
}

pub(crate) fn fmt(value: f32) -> String {
    format_number(value as f64)
}

// At least seven significant digits and never fewer than three decimals, so
// coordinates under a large user-space scale keep their precision. No exponent
// notation, which content streams do not accept.
pub(crate) fn format_number(value: f64) -> String {
    if !value.is_finite() || value == 0.0 {
        return "0".to_string();
    }
    let magnitude = libm::floor(libm::log10(value.abs())) as i32;
    let decimals = (6 - magnitude).clamp(3, 12) as usize;
    let text = format!("{value:.decimals$}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    match text {
        "" | "-0" | "-" => "0".to_string(),
        other => other.to_string(),
    }
}

pub(crate) fn format_milli(milli: i64) -> String {
    if milli == 0 {
        return "0".to_string();
    }
    let sign = if milli < 0 { "-" } else { "" };
    let abs = milli.unsigned_abs();
    let int_part = abs / 1000;
    let frac_part = abs % 1000;
    if frac_part == 0 {
        return format!("{sign}{int_part}");
    }
    let frac = format!("{frac_part:03}");
    format!("{sign}{int_part}.{}", frac.trim_end_matches('0'))
}

pub(crate) fn fmt_pt(value: Pt) -> String {
    format_number(value.to_f64())
}

// Color channels and stop offsets: thousandths are plenty.
pub(crate) fn fmt_unit(value: f32) -> String {
    format_milli((clamp_unit(value) * 1000.0).round() as i64)
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{Canvas, FontSpec};
    use crate::types::Size;

    fn sample_page() -> Page {
        let mut canvas = Canvas::new(Size::new(75.0, 37.5));
        canvas.concat_matrix(Matrix::scale(0.75, 0.75));
        canvas.set_fill_color(Color::rgb(1.0, 0.0, 0.0));
        canvas.move_to(Pt::from_f32(10.0), Pt::from_f32(10.0));
        canvas.line_to(Pt::from_f32(50.0), Pt::from_f32(10.0));
        canvas.line_to(Pt::from_f32(50.0), Pt::from_f32(40.0));
        canvas.close_path();
        canvas.fill(FillRule::EvenOdd);
        canvas.begin_layer(0.5);
        canvas.draw_text(
            Pt::from_f32(5.0),
            Pt::from_f32(30.0),
            "caf\u{e9} (1)",
            FontSpec {
                family: "serif".into(),
                weight: 700,
                italic: false,
            },
            Pt::from_f32(12.0),
        );
        canvas.end_layer();
        canvas.finish()
    }

    fn to_bytes(page: &Page) -> Vec<u8> {
        write_pdf(page, Vec::new()).unwrap()
    }

    #[test]
    fn format_milli_trims_trailing_zeros() {
        assert_eq!(format_milli(0), "0");
        assert_eq!(format_milli(1500), "1.5");
        assert_eq!(format_milli(-250), "-0.25");
        assert_eq!(format_milli(12_001), "12.001");
        assert_eq!(fmt(f32::INFINITY), "0");
    }

    #[test]
    fn xref_entries_point_at_their_objects() {
        let bytes = to_bytes(&sample_page());
        let xref = bytes.windows(6).position(|w| w == b"\nxref\n").unwrap() + 1;
        let tail = std::str::from_utf8(&bytes[xref..]).unwrap();
        let startxref: usize = tail[tail.find("startxref\n").unwrap() + 10..]
            .lines()
            .next()
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(startxref, xref);
        let entries: Vec<&str> = tail[..tail.find("trailer").unwrap()].lines().skip(2).collect();
        assert!(!entries.is_empty());
        for (index, entry) in entries.iter().enumerate() {
            assert_eq!(entry.len() + 1, 20, "entry {entry:?}");
            let offset: usize = entry[..10].parse().unwrap();
            assert!(bytes[offset..].starts_with(format!("{} 0 obj", index + 1).as_bytes()));
        }
        assert_eq!(escape_pdf_bytes(&[0xE9, b'(']), "\\351\\(");
        assert_eq!(ascii_hex_encode(&[0x0A, 0xFF]), "0AFF");
    }

    #[test]
    fn numbers_keep_precision_for_small_user_units() {
        assert_eq!(fmt(0.0004), "0.0004");
        assert_eq!(fmt(-0.0004), "-0.0004");
        assert_eq!(fmt(100.0004), "100.0004");
        assert_eq!(fmt(0.75), "0.75");
        assert_eq!(fmt(1500.0), "1500");
        assert_eq!(fmt(1e-14), "0");
        assert_eq!(fmt(-1e-14), "0");
        assert_eq!(fmt_pt(Pt::from_f32(12.001)), "12.001");
        assert_eq!(fmt_unit(128.0 / 255.0), "0.502");
        assert_eq!(fmt_unit(1.5), "1");
    }

    #[test]
    fn escapes_delimiters_and_high_bytes() {
        assert_eq!(escape_pdf_bytes(b"a(b)\\"), "a\\(b\\)\\\\");
        assert_eq!(escape_pdf_bytes(&[0xE9, b'\n']), "\\351\\012");
    }

    #[test]
    fn output_is_parseable_and_sized_in_points() {
        let bytes = to_bytes(&sample_page());
        assert!(bytes.starts_with(b"%PDF-1.4"));
        assert!(bytes.ends_with(b"%%EOF\n"));
        let doc = lopdf::Document::load_mem(&bytes).expect("valid pdf");
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 1);
        let page_id = *pages.values().next().unwrap();
        let page = doc.get_object(page_id).unwrap().as_dict().unwrap();
        let media_box = page.get(b"MediaBox").unwrap().as_array().unwrap();
        let dims: Vec<f32> = media_box.iter().map(|v| v.as_float().unwrap()).collect();
        assert_eq!(dims, vec![0.0, 0.0, 75.0, 37.5]);
        let content = String::from_utf8(doc.get_page_content(page_id).unwrap()).unwrap();
        assert!(content.starts_with("1 0 0 -1 0 37.5 cm\n"));
        assert!(content.contains("1 0 0 rg"));
        assert!(content.contains("f*"));
        assert!(content.contains("/Fm1 Do"));
    }

    #[test]
    fn layers_become_transparency_groups() {
        let text = String::from_utf8_lossy(&to_bytes(&sample_page())).into_owned();
        assert!(text.contains("/Subtype /Form"));
        assert!(text.contains("/S /Transparency"));
        assert!(text.contains("/ca 0.5 /CA 0.5"));
        assert!(text.contains("/BaseFont /Times-Bold"));
        assert!(text.contains("(caf\\351 \\(1\\)) Tj"));
    }

    #[test]
    fn identical_pages_serialize_identically() {
        let page = sample_page();
        assert_eq!(to_bytes(&page), to_bytes(&page));
    }

    #[test]
    fn gradient_functions_are_padded_and_stitched() {
        let stops = vec![
            ShadingStop { offset: 0.25, color: Color::rgb(1.0, 0.0, 0.0), opacity: 1.0 },
            ShadingStop { offset: 0.5, color: Color::rgb(0.0, 1.0, 0.0), opacity: 1.0 },
        ];
        let (objects, root, next) = build_gradient_function_objects(&stops, 10);
        // [0, .25, .5, 1] gives three segments plus the stitching function.
        assert_eq!(objects.len(), 4);
        assert_eq!(root, 13);
        assert_eq!(next, 14);
        assert!(objects[3].contains("/Bounds [0.25 0.5]"));

        let solid = [ShadingStop { offset: 0.0, color: Color::WHITE, opacity: 1.0 }];
        let (single, root, _) = build_gradient_function_objects(&solid, 3);
        assert_eq!(single.len(), 1);
        assert_eq!(root, 3);
    }

    #[test]
    fn translucent_images_carry_a_soft_mask() {
        let image = Arc::new(RasterImage {
            width: 1,
            height: 1,
            rgba: vec![10, 20, 30, 128],
        });
        let mut canvas = Canvas::new(Size::new(10.0, 10.0));
        canvas.draw_image(Pt::ZERO, Pt::ZERO, Pt::from_f32(10.0), Pt::from_f32(10.0), image.clone());
        canvas.draw_image(Pt::ZERO, Pt::ZERO, Pt::from_f32(5.0), Pt::from_f32(5.0), image);
        let text = String::from_utf8_lossy(&to_bytes(&canvas.finish())).into_owned();
        assert_eq!(text.matches("/Subtype /Image").count(), 2);
        assert!(text.contains("/SMask"));
        assert!(text.contains("0A141E>"));
        assert!(text.contains("q 10 0 0 -10 0 10 cm /Im1 Do Q"));
    }
}

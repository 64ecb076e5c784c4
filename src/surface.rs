use std::io::Write;

use crate::canvas::Canvas;
use crate::error::ConvertError;
use crate::geometry::Matrix;
use crate::types::{Color, FillRule, Pt, Size};
use crate::{pdf, ps, raster, svg};

/// Points per CSS pixel.
pub const PT_PER_PX: f32 = 0.75;

/// Largest raster edge accepted, in pixels.
pub const MAX_RASTER_EDGE: u32 = 1 << 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Png,
    Pdf,
    Ps,
    Svg,
}

impl OutputFormat {
    /// Infers the format from a file extension (`.png`, `.pdf`, `.ps`, `.eps`, `.svg`).
    pub fn from_path(path: &std::path::Path) -> Option<OutputFormat> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "png" => Some(OutputFormat::Png),
            "pdf" => Some(OutputFormat::Pdf),
            "ps" | "eps" => Some(OutputFormat::Ps),
            "svg" => Some(OutputFormat::Svg),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Pdf => "pdf",
            OutputFormat::Ps => "ps",
            OutputFormat::Svg => "svg",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = ConvertError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(OutputFormat::Png),
            "pdf" => Ok(OutputFormat::Pdf),
            "ps" | "eps" | "postscript" => Ok(OutputFormat::Ps),
            "svg" => Ok(OutputFormat::Svg),
            other => Err(ConvertError::Config(format!(
                "unknown output format {other:?} (expected png, pdf, ps or svg)"
            ))),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Device parameters shared by every surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceOptions {
    /// Raster resolution; 96 maps one CSS pixel to one device pixel.
    pub dpi: f32,
    pub scale: f32,
    /// Painted under the drawing; `None` leaves it transparent.
    pub background: Option<(Color, f32)>,
}

impl Default for SurfaceOptions {
    fn default() -> Self {
        Self {
            dpi: 96.0,
            scale: 1.0,
            background: None,
        }
    }
}

impl SurfaceOptions {
    fn validate(&self) -> Result<(), ConvertError> {
        if !(self.dpi.is_finite() && self.dpi > 0.0) {
            return Err(ConvertError::Config(format!("dpi must be positive, got {}", self.dpi)));
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(ConvertError::Config(format!("scale must be positive, got {}", self.scale)));
        }
        Ok(())
    }
}

/// Drawing target of the renderer. A surface owns a canvas already mapped
/// from CSS pixels to device units and encodes it on `finish`.
pub trait Surface {
    type Target;

    /// Device width (pixels for raster output, points for vector output).
    fn width(&self) -> f32;
    fn height(&self) -> f32;
    /// The drawing handle every backend shares. Operations recorded here land
    /// in the output on top of (or, before `render`, under) the drawing.
    fn canvas_mut(&mut self) -> &mut Canvas;
    fn finish(self) -> Result<Self::Target, ConvertError>
    where
        Self: Sized;
}

/// Creates the canvas: background first, then the CSS pixel mapping.
fn prepare_canvas(device: Size, factor: f32, background: Option<(Color, f32)>) -> Canvas {
    let mut canvas = Canvas::new(device);
    if let Some((color, alpha)) = background.filter(|(_, alpha)| *alpha > 0.0) {
        canvas.set_fill_color(color);
        canvas.set_opacity(alpha, 1.0);
        canvas.move_to(Pt::ZERO, Pt::ZERO);
        canvas.line_to(Pt::from_f32(device.width), Pt::ZERO);
        canvas.line_to(Pt::from_f32(device.width), Pt::from_f32(device.height));
        canvas.line_to(Pt::ZERO, Pt::from_f32(device.height));
        canvas.close_path();
        canvas.fill(FillRule::NonZero);
        canvas.set_opacity(1.0, 1.0);
    }
    canvas.concat_matrix(Matrix::scale(factor, factor));
    canvas
}

pub struct PngSurface<W: Write> {
    canvas: Canvas,
    writer: W,
}

impl<W: Write> PngSurface<W> {
    /// `size` is the drawing size in CSS pixels.
    pub fn new(writer: W, size: Size, options: &SurfaceOptions) -> Result<Self, ConvertError> {
        options.validate()?;
        let factor = options.dpi / 96.0 * options.scale;
        let width = pixel_extent(size.width * factor)?;
        let height = pixel_extent(size.height * factor)?;
        Ok(Self {
            canvas: prepare_canvas(Size::new(width as f32, height as f32), factor, options.background),
            writer,
        })
    }
}

impl<W: Write> PngSurface<W> {
    /// Rasterizes the recording without encoding it, for callers that keep
    /// compositing with tiny-skia. The writer is dropped.
    pub fn into_pixmap(self) -> Result<tiny_skia::Pixmap, ConvertError> {
        raster::rasterize(&self.canvas.finish())
    }
}

fn pixel_extent(value: f32) -> Result<u32, ConvertError> {
    let px = value.ceil().max(1.0);
    if !px.is_finite() || px > MAX_RASTER_EDGE as f32 {
        return Err(ConvertError::Config(format!(
            "raster output of {value} pixels exceeds the {MAX_RASTER_EDGE} pixel limit"
        )));
    }
    Ok(px as u32)
}

impl<W: Write> Surface for PngSurface<W> {
    type Target = W;

    fn width(&self) -> f32 {
        self.canvas.size().width
    }

    fn height(&self) -> f32 {
        self.canvas.size().height
    }

    fn canvas_mut(&mut self) -> &mut Canvas {
        &mut self.canvas
    }

    fn finish(self) -> Result<W, ConvertError> {
        let page = self.canvas.finish();
        raster::write_png(&page, self.writer)
    }
}

pub struct PdfSurface<W: Write> {
    canvas: Canvas,
    writer: W,
}

impl<W: Write> PdfSurface<W> {
    pub fn new(writer: W, size: Size, options: &SurfaceOptions) -> Result<Self, ConvertError> {
        options.validate()?;
        let factor = PT_PER_PX * options.scale;
        let device = Size::new(size.width * factor, size.height * factor);
        Ok(Self {
            canvas: prepare_canvas(device, factor, options.background),
            writer,
        })
    }
}

impl<W: Write> Surface for PdfSurface<W> {
    type Target = W;

    fn width(&self) -> f32 {
        self.canvas.size().width
    }

    fn height(&self) -> f32 {
        self.canvas.size().height
    }

    fn canvas_mut(&mut self) -> &mut Canvas {
        &mut self.canvas
    }

    fn finish(self) -> Result<W, ConvertError> {
        let page = self.canvas.finish();
        pdf::write_pdf(&page, self.writer)
    }
}

pub struct PsSurface<W: Write> {
    canvas: Canvas,
    writer: W,
}

impl<W: Write> PsSurface<W> {
    pub fn new(writer: W, size: Size, options: &SurfaceOptions) -> Result<Self, ConvertError> {
        options.validate()?;
        let factor = PT_PER_PX * options.scale;
        let device = Size::new(size.width * factor, size.height * factor);
        Ok(Self {
            canvas: prepare_canvas(device, factor, options.background),
            writer,
        })
    }
}

impl<W: Write> Surface for PsSurface<W> {
    type Target = W;

    fn width(&self) -> f32 {
        self.canvas.size().width
    }

    fn height(&self) -> f32 {
        self.canvas.size().height
    }

    fn canvas_mut(&mut self) -> &mut Canvas {
        &mut self.canvas
    }

    fn finish(self) -> Result<W, ConvertError> {
        let page = self.canvas.finish();
        ps::write_ps(&page, self.writer)
    }
}

pub struct SvgSurface<W: Write> {
    canvas: Canvas,
    writer: W,
}

impl<W: Write> SvgSurface<W> {
    pub fn new(writer: W, size: Size, options: &SurfaceOptions) -> Result<Self, ConvertError> {
        options.validate()?;
        let factor = PT_PER_PX * options.scale;
        let device = Size::new(size.width * factor, size.height * factor);
        Ok(Self {
            canvas: prepare_canvas(device, factor, options.background),
            writer,
        })
    }
}

impl<W: Write> Surface for SvgSurface<W> {
    type Target = W;

    fn width(&self) -> f32 {
        self.canvas.size().width
    }

    fn height(&self) -> f32 {
        self.canvas.size().height
    }

    fn canvas_mut(&mut self) -> &mut Canvas {
        &mut self.canvas
    }

    fn finish(self) -> Result<W, ConvertError> {
        let page = self.canvas.finish();
        svg::write_svg(&page, self.writer)
    }
}

/// Surface chosen at run time from an [`OutputFormat`].
pub enum FormatSurface<W: Write> {
    Png(PngSurface<W>),
    Pdf(PdfSurface<W>),
    Ps(PsSurface<W>),
    Svg(SvgSurface<W>),
}

impl<W: Write> FormatSurface<W> {
    pub fn new(format: OutputFormat, writer: W, size: Size, options: &SurfaceOptions) -> Result<Self, ConvertError> {
        Ok(match format {
            OutputFormat::Png => FormatSurface::Png(PngSurface::new(writer, size, options)?),
            OutputFormat::Pdf => FormatSurface::Pdf(PdfSurface::new(writer, size, options)?),
            OutputFormat::Ps => FormatSurface::Ps(PsSurface::new(writer, size, options)?),
            OutputFormat::Svg => FormatSurface::Svg(SvgSurface::new(writer, size, options)?),
        })
    }
}

impl<W: Write> Surface for FormatSurface<W> {
    type Target = W;

    fn width(&self) -> f32 {
        match self {
            FormatSurface::Png(s) => s.width(),
            FormatSurface::Pdf(s) => s.width(),
            FormatSurface::Ps(s) => s.width(),
            FormatSurface::Svg(s) => s.width(),
        }
    }

    fn height(&self) -> f32 {
        match self {
            FormatSurface::Png(s) => s.height(),
            FormatSurface::Pdf(s) => s.height(),
            FormatSurface::Ps(s) => s.height(),
            FormatSurface::Svg(s) => s.height(),
        }
    }

    fn canvas_mut(&mut self) -> &mut Canvas {
        match self {
            FormatSurface::Png(s) => s.canvas_mut(),
            FormatSurface::Pdf(s) => s.canvas_mut(),
            FormatSurface::Ps(s) => s.canvas_mut(),
            FormatSurface::Svg(s) => s.canvas_mut(),
        }
    }

    fn finish(self) -> Result<W, ConvertError> {
        match self {
            FormatSurface::Png(s) => s.finish(),
            FormatSurface::Pdf(s) => s.finish(),
            FormatSurface::Ps(s) => s.finish(),
            FormatSurface::Svg(s) => s.finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parsing_and_inference() {
        assert_eq!("PDF".parse::<OutputFormat>().unwrap(), OutputFormat::Pdf);
        assert_eq!("eps".parse::<OutputFormat>().unwrap(), OutputFormat::Ps);
        assert!(matches!("gif".parse::<OutputFormat>(), Err(ConvertError::Config(_))));
        assert_eq!(
            OutputFormat::from_path(std::path::Path::new("out/Drawing.PNG")),
            Some(OutputFormat::Png)
        );
        assert_eq!(OutputFormat::from_path(std::path::Path::new("noext")), None);
        assert_eq!(
            OutputFormat::from_path(std::path::Path::new("icon.SVG")),
            Some(OutputFormat::Svg)
        );
        assert_eq!("Svg".parse::<OutputFormat>().unwrap(), OutputFormat::Svg);
        assert_eq!(OutputFormat::Svg.to_string(), "svg");
    }

    #[test]
    fn device_sizes_follow_dpi_and_scale() {
        let size = Size::new(100.0, 50.5);
        let png = PngSurface::new(Vec::new(), size, &SurfaceOptions { dpi: 192.0, ..Default::default() }).unwrap();
        assert_eq!((png.width(), png.height()), (200.0, 101.0));
        let pdf = PdfSurface::new(Vec::new(), size, &SurfaceOptions { scale: 2.0, ..Default::default() }).unwrap();
        assert_eq!((pdf.width(), pdf.height()), (150.0, 75.75));
        let ps = FormatSurface::new(OutputFormat::Ps, Vec::new(), size, &SurfaceOptions::default()).unwrap();
        assert_eq!(ps.width(), 75.0);
        let svg = FormatSurface::new(OutputFormat::Svg, Vec::new(), size, &SurfaceOptions::default()).unwrap();
        assert_eq!((svg.width(), svg.height()), (75.0, 37.875));
    }

    #[test]
    fn png_surface_hands_out_its_pixmap() {
        let mut surface = PngSurface::new(Vec::new(), Size::new(4.0, 3.0), &SurfaceOptions::default()).unwrap();
        let canvas = surface.canvas_mut();
        canvas.set_fill_color(Color::rgb(0.0, 1.0, 0.0));
        canvas.move_to(Pt::ZERO, Pt::ZERO);
        canvas.line_to(Pt::from_f32(4.0), Pt::ZERO);
        canvas.line_to(Pt::from_f32(4.0), Pt::from_f32(3.0));
        canvas.line_to(Pt::ZERO, Pt::from_f32(3.0));
        canvas.close_path();
        canvas.fill(FillRule::NonZero);
        let pixmap = surface.into_pixmap().unwrap();
        assert_eq!((pixmap.width(), pixmap.height()), (4, 3));
        let px = pixmap.pixel(1, 1).unwrap();
        assert_eq!((px.red(), px.green(), px.blue(), px.alpha()), (0, 255, 0, 255));
    }

    #[test]
    fn invalid_device_options_are_config_errors() {
        let size = Size::new(10.0, 10.0);
        let bad_dpi = SurfaceOptions { dpi: 0.0, ..Default::default() };
        assert!(matches!(PngSurface::new(Vec::new(), size, &bad_dpi), Err(ConvertError::Config(_))));
        let huge = SurfaceOptions { scale: 1.0e6, ..Default::default() };
        assert!(matches!(PngSurface::new(Vec::new(), size, &huge), Err(ConvertError::Config(_))));
        let nan = SurfaceOptions { scale: f32::NAN, ..Default::default() };
        assert!(matches!(PdfSurface::new(Vec::new(), size, &nan), Err(ConvertError::Config(_))));
    }
}

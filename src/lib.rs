mod canvas;
mod error;
mod font;
pub mod geometry;
mod pdf;
mod ps;
mod raster;
mod render;
mod resource;
pub mod style;
mod surface;
mod svg;
mod tree;
mod types;
pub mod units;

use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

pub use canvas::{Canvas, Command, FontSpec, Page};
pub use error::ConvertError;
pub use font::{FONT_DIR_ENV, FontDb};
pub use geometry::{GeometryError, Matrix, PathSeg};
pub use render::render;
pub use style::{Paint, StyleState};
pub use surface::{
    FormatSurface, OutputFormat, PdfSurface, PngSurface, PsSurface, Surface, SurfaceOptions,
    SvgSurface,
};
pub use tree::{BuildOptions, Node, NodeKind, Tree, build};
pub use types::{Color, FillRule, LineCap, LineJoin, Pt, RasterImage, Rect, Shading, Size};
pub use units::UnitError;

/// Where the source document comes from.
pub enum Input<'a> {
    /// A filesystem path, `file://` URL or `data:` URI.
    Location(String),
    Bytes(&'a [u8]),
    Reader(&'a mut dyn Read),
}

/// Where the converted document goes.
pub enum Output<'a> {
    /// Return the encoded bytes from [`convert`].
    Bytes,
    Writer(&'a mut dyn Write),
    /// Written through a temporary file in the same directory and renamed
    /// into place, so a failed conversion leaves nothing behind.
    Path(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub location: Option<PathBuf>,
    pub format: Option<OutputFormat>,
    pub dpi: f32,
    pub scale: f32,
    pub background: Option<(Color, f32)>,
    pub unsafe_resources: bool,
    pub max_reference_depth: usize,
    pub max_nodes: usize,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        let build = BuildOptions::default();
        let surface = SurfaceOptions::default();
        Self {
            location: None,
            format: None,
            dpi: surface.dpi,
            scale: surface.scale,
            background: surface.background,
            unsafe_resources: build.unsafe_resources,
            max_reference_depth: build.max_reference_depth,
            max_nodes: build.max_nodes,
        }
    }
}

impl ConvertOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Base used to resolve relative references in the document.
    pub fn location(mut self, location: impl Into<PathBuf>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Explicit format; wins over the output path extension.
    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn dpi(mut self, dpi: f32) -> Self {
        self.dpi = dpi;
        self
    }

    pub fn scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn background(mut self, color: Color, alpha: f32) -> Self {
        self.background = Some((color, alpha));
        self
    }

    pub fn unsafe_resources(mut self, enabled: bool) -> Self {
        self.unsafe_resources = enabled;
        self
    }

    pub fn max_reference_depth(mut self, depth: usize) -> Self {
        self.max_reference_depth = depth;
        self
    }

    pub fn max_nodes(mut self, nodes: usize) -> Self {
        self.max_nodes = nodes;
        self
    }

    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            base: self.location.clone(),
            unsafe_resources: self.unsafe_resources,
            max_reference_depth: self.max_reference_depth,
            max_nodes: self.max_nodes,
        }
    }

    pub fn surface_options(&self) -> SurfaceOptions {
        SurfaceOptions {
            dpi: self.dpi,
            scale: self.scale,
            background: self.background,
        }
    }

    /// Explicit format first, then the output path extension, then PDF.
    fn resolve_format(&self, output: &Output<'_>) -> Result<OutputFormat, ConvertError> {
        if let Some(format) = self.format {
            return Ok(format);
        }
        match output {
            Output::Path(path) => OutputFormat::from_path(path).ok_or_else(|| {
                ConvertError::Config(format!(
                    "cannot infer an output format from {}; pass one explicitly",
                    path.display()
                ))
            }),
            _ => Ok(OutputFormat::Pdf),
        }
    }
}

/// Converts one document. Returns the encoded bytes for [`Output::Bytes`]
/// and `None` otherwise.
pub fn convert(
    input: Input<'_>,
    output: Output<'_>,
    options: &ConvertOptions,
) -> Result<Option<Vec<u8>>, ConvertError> {
    let started = Instant::now();
    let format = options.resolve_format(&output)?;
    let mut build_options = options.build_options();
    let data = match input {
        Input::Location(location) => {
            let data = resource::load_location(&location, None)?;
            if build_options.base.is_none() && !location.trim_start().starts_with("data:") {
                build_options.base = resource::resolve_file_path(&location, None);
            }
            data
        }
        Input::Bytes(bytes) => bytes.to_vec(),
        Input::Reader(reader) => {
            let mut data = Vec::new();
            reader.read_to_end(&mut data)?;
            data
        }
    };
    let tree = tree::build(&data, &build_options)?;
    log::trace!(
        "parsed {} bytes in {:.2} ms",
        data.len(),
        started.elapsed().as_secs_f64() * 1000.0
    );
    let surface_options = options.surface_options();

    let result = match output {
        Output::Bytes => Some(draw(&tree, format, Vec::new(), &surface_options)?),
        Output::Writer(writer) => {
            draw(&tree, format, writer, &surface_options)?;
            None
        }
        Output::Path(path) => {
            write_atomically(&path, |file| draw(&tree, format, file, &surface_options).map(|_| ()))?;
            None
        }
    };
    log::trace!(
        "converted to {format} in {:.2} ms",
        started.elapsed().as_secs_f64() * 1000.0
    );
    Ok(result)
}

fn draw<W: Write>(
    tree: &Tree,
    format: OutputFormat,
    writer: W,
    options: &SurfaceOptions,
) -> Result<W, ConvertError> {
    let mut surface = FormatSurface::new(format, writer, tree.size(), options)?;
    render(tree, &mut surface)?;
    surface.finish()
}

fn write_atomically(
    path: &Path,
    write: impl FnOnce(&mut BufWriter<&mut std::fs::File>) -> Result<(), ConvertError>,
) -> Result<(), ConvertError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut buffered = BufWriter::new(temp.as_file_mut());
        write(&mut buffered)?;
        buffered.flush()?;
    }
    temp.persist(path).map_err(|e| ConvertError::Io(e.error))?;
    Ok(())
}

/// Converts an in-memory document with default options.
pub fn convert_bytes(svg: &[u8], format: OutputFormat) -> Result<Vec<u8>, ConvertError> {
    let options = ConvertOptions::new().format(format);
    convert(Input::Bytes(svg), Output::Bytes, &options)?
        .ok_or_else(|| ConvertError::Backend("conversion produced no bytes".to_string()))
}

/// Intrinsic size of a document in CSS pixels, without rendering it.
pub fn document_size(svg: &[u8]) -> Result<Size, ConvertError> {
    Ok(tree::build(svg, &BuildOptions::default())?.size())
}

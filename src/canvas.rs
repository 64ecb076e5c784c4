use std::sync::Arc;

use crate::font::FontDb;
use crate::geometry::{Matrix, PathSeg};
use crate::types::{Color, FillRule, LineCap, LineJoin, Pt, RasterImage, Shading, Size};

/// Font request carried by text commands. Backends pick the closest face
/// they can draw.
#[derive(Debug, Clone, PartialEq)]
pub struct FontSpec {
    pub family: String,
    pub weight: u16,
    pub italic: bool,
}

/// One recorded drawing operation. Coordinates are user units of the
/// current transformation matrix; the surface supplies the device mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SaveState,
    RestoreState,
    ConcatMatrix {
        a: f32,
        b: f32,
        c: f32,
        d: f32,
        e: Pt,
        f: Pt,
    },
    SetFillColor(Color),
    SetStrokeColor(Color),
    // Values outside 0..1 are clamped.
    SetOpacity {
        fill: f32,
        stroke: f32,
    },
    SetLineWidth(Pt),
    SetLineCap(LineCap),
    SetLineJoin(LineJoin),
    SetMiterLimit(Pt),
    SetDash {
        pattern: Vec<Pt>,
        phase: Pt,
    },
    MoveTo {
        x: Pt,
        y: Pt,
    },
    LineTo {
        x: Pt,
        y: Pt,
    },
    CurveTo {
        x1: Pt,
        y1: Pt,
        x2: Pt,
        y2: Pt,
        x: Pt,
        y: Pt,
    },
    ClosePath,
    Fill(FillRule),
    Stroke,
    FillStroke(FillRule),
    // Intersects the clip with the current path. The current path is consumed.
    ClipPath(FillRule),
    // Paints the shading over the whole clip region.
    ShadingFill(Shading),
    // Everything up to the matching EndLayer is composited as one unit.
    BeginLayer {
        opacity: f32,
    },
    EndLayer,
    // Baseline origin at (x, y).
    DrawText {
        x: Pt,
        y: Pt,
        text: String,
        font: FontSpec,
        size: Pt,
    },
    // Image row 0 is at the top of the rectangle.
    DrawImage {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
        image: Arc<RasterImage>,
    },
}

/// Finished drawing: page size in backend units plus the command list.
#[derive(Debug, Clone)]
pub struct Page {
    pub size: Size,
    pub commands: Vec<Command>,
    /// Fonts looked up while recording, reused by the backend.
    pub fonts: FontDb,
}

#[derive(Debug, Clone)]
struct GraphicsState {
    fill_color: Color,
    stroke_color: Color,
    opacity: (f32, f32),
    line_width: Pt,
    line_cap: LineCap,
    line_join: LineJoin,
    miter_limit: Pt,
    dash: (Vec<Pt>, Pt),
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            fill_color: Color::BLACK,
            stroke_color: Color::BLACK,
            opacity: (1.0, 1.0),
            line_width: Pt::from_f32(1.0),
            line_cap: LineCap::Butt,
            line_join: LineJoin::Miter,
            miter_limit: Pt::from_f32(10.0),
            dash: (Vec::new(), Pt::ZERO),
        }
    }
}

#[derive(Debug, Clone)]
enum Frame {
    Saved(GraphicsState),
    Layer(GraphicsState),
}

/// Records drawing operations. State setters drop commands that would not
/// change the current graphics state. A layer behaves like a saved state:
/// whatever is set inside it is gone after `end_layer`.
pub struct Canvas {
    size: Size,
    commands: Vec<Command>,
    stack: Vec<Frame>,
    current_state: GraphicsState,
    fonts: FontDb,
}

impl Canvas {
    pub fn new(size: Size) -> Self {
        Self::with_fonts(size, FontDb::new())
    }

    pub fn with_fonts(size: Size, fonts: FontDb) -> Self {
        Self {
            size,
            commands: Vec::new(),
            stack: Vec::new(),
            current_state: GraphicsState::default(),
            fonts,
        }
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn fonts(&self) -> &FontDb {
        &self.fonts
    }

    pub fn save_state(&mut self) {
        self.stack.push(Frame::Saved(self.current_state.clone()));
        self.commands.push(Command::SaveState);
    }

    pub fn restore_state(&mut self) {
        if let Some(Frame::Saved(_)) = self.stack.last() {
            if let Some(Frame::Saved(state)) = self.stack.pop() {
                self.current_state = state;
            }
            self.commands.push(Command::RestoreState);
        }
    }

    pub fn concat_matrix(&mut self, m: Matrix) {
        if m.is_identity() {
            return;
        }
        self.commands.push(Command::ConcatMatrix {
            a: m.a,
            b: m.b,
            c: m.c,
            d: m.d,
            e: Pt::from_f32(m.e),
            f: Pt::from_f32(m.f),
        });
    }

    pub fn set_fill_color(&mut self, color: Color) {
        if self.current_state.fill_color == color {
            return;
        }
        self.current_state.fill_color = color;
        self.commands.push(Command::SetFillColor(color));
    }

    pub fn set_stroke_color(&mut self, color: Color) {
        if self.current_state.stroke_color == color {
            return;
        }
        self.current_state.stroke_color = color;
        self.commands.push(Command::SetStrokeColor(color));
    }

    pub fn set_opacity(&mut self, fill: f32, stroke: f32) {
        let opacity = (fill.clamp(0.0, 1.0), stroke.clamp(0.0, 1.0));
        if self.current_state.opacity == opacity {
            return;
        }
        self.current_state.opacity = opacity;
        self.commands.push(Command::SetOpacity {
            fill: opacity.0,
            stroke: opacity.1,
        });
    }

    pub fn set_line_width(&mut self, width: Pt) {
        let width = if width < Pt::ZERO { Pt::ZERO } else { width };
        if self.current_state.line_width == width {
            return;
        }
        self.current_state.line_width = width;
        self.commands.push(Command::SetLineWidth(width));
    }

    pub fn set_line_cap(&mut self, cap: LineCap) {
        if self.current_state.line_cap == cap {
            return;
        }
        self.current_state.line_cap = cap;
        self.commands.push(Command::SetLineCap(cap));
    }

    pub fn set_line_join(&mut self, join: LineJoin) {
        if self.current_state.line_join == join {
            return;
        }
        self.current_state.line_join = join;
        self.commands.push(Command::SetLineJoin(join));
    }

    pub fn set_miter_limit(&mut self, limit: Pt) {
        let limit = if limit < Pt::from_f32(1.0) {
            Pt::from_f32(1.0)
        } else {
            limit
        };
        if self.current_state.miter_limit == limit {
            return;
        }
        self.current_state.miter_limit = limit;
        self.commands.push(Command::SetMiterLimit(limit));
    }

    pub fn set_dash(&mut self, pattern: Vec<Pt>, phase: Pt) {
        if self.current_state.dash.0 == pattern && self.current_state.dash.1 == phase {
            return;
        }
        self.current_state.dash = (pattern.clone(), phase);
        self.commands.push(Command::SetDash { pattern, phase });
    }

    pub fn move_to(&mut self, x: Pt, y: Pt) {
        self.commands.push(Command::MoveTo { x, y });
    }

    pub fn line_to(&mut self, x: Pt, y: Pt) {
        self.commands.push(Command::LineTo { x, y });
    }

    pub fn curve_to(&mut self, x1: Pt, y1: Pt, x2: Pt, y2: Pt, x: Pt, y: Pt) {
        self.commands.push(Command::CurveTo {
            x1,
            y1,
            x2,
            y2,
            x,
            y,
        });
    }

    pub fn close_path(&mut self) {
        self.commands.push(Command::ClosePath);
    }

    /// Appends canonical path segments as the current path.
    pub fn append_path(&mut self, segs: &[PathSeg]) {
        for seg in segs {
            match *seg {
                PathSeg::MoveTo(x, y) => self.move_to(x.into(), y.into()),
                PathSeg::LineTo(x, y) => self.line_to(x.into(), y.into()),
                PathSeg::CurveTo(x1, y1, x2, y2, x, y) => {
                    self.curve_to(x1.into(), y1.into(), x2.into(), y2.into(), x.into(), y.into())
                }
                PathSeg::Close => self.close_path(),
            }
        }
    }

    pub fn fill(&mut self, rule: FillRule) {
        self.commands.push(Command::Fill(rule));
    }

    pub fn stroke(&mut self) {
        self.commands.push(Command::Stroke);
    }

    pub fn fill_stroke(&mut self, rule: FillRule) {
        self.commands.push(Command::FillStroke(rule));
    }

    pub fn clip_path(&mut self, rule: FillRule) {
        self.commands.push(Command::ClipPath(rule));
    }

    pub fn shading_fill(&mut self, shading: Shading) {
        self.commands.push(Command::ShadingFill(shading));
    }

    pub fn begin_layer(&mut self, opacity: f32) {
        self.stack.push(Frame::Layer(self.current_state.clone()));
        self.commands.push(Command::BeginLayer {
            opacity: opacity.clamp(0.0, 1.0),
        });
    }

    pub fn end_layer(&mut self) {
        if let Some(Frame::Layer(_)) = self.stack.last() {
            if let Some(Frame::Layer(state)) = self.stack.pop() {
                self.current_state = state;
            }
            self.commands.push(Command::EndLayer);
        }
    }

    pub fn draw_text(&mut self, x: Pt, y: Pt, text: impl Into<String>, font: FontSpec, size: Pt) {
        self.commands.push(Command::DrawText {
            x,
            y,
            text: text.into(),
            font,
            size,
        });
    }

    pub fn draw_image(&mut self, x: Pt, y: Pt, width: Pt, height: Pt, image: Arc<RasterImage>) {
        self.commands.push(Command::DrawImage {
            x,
            y,
            width,
            height,
            image,
        });
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    /// Closes open layers and saved states, then hands out the recording.
    pub fn finish(mut self) -> Page {
        while let Some(frame) = self.stack.last() {
            match frame {
                Frame::Saved(_) => self.restore_state(),
                Frame::Layer(_) => self.end_layer(),
            }
        }
        Page {
            size: self.size,
            commands: self.commands,
            fonts: self.fonts,
        }
    }
}

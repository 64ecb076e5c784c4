use std::sync::Arc;

use crate::canvas::{Canvas, FontSpec};
use crate::error::ConvertError;
use crate::geometry::{self, Matrix, PathSeg};
use crate::style::{Paint, StyleState, TextAnchor};
use crate::surface::Surface;
use crate::tree::{GradientDef, GradientKind, ImageDef, Node, NodeKind, ReferenceGuard, Tree, Units};
use crate::types::{Color, FillRule, Pt, Rect, Shading, ShadingStop};
use crate::units::{Axis, Length, ReferenceBox};

/// Draws the whole tree onto the surface's canvas.
pub fn render<S: Surface + ?Sized>(tree: &Tree, surface: &mut S) -> Result<(), ConvertError> {
    render_to_canvas(tree, surface.canvas_mut())
}

pub(crate) fn render_to_canvas(tree: &Tree, canvas: &mut Canvas) -> Result<(), ConvertError> {
    let root_viewport = tree
        .root()
        .viewport()
        .unwrap_or_else(|| ReferenceBox::new(tree.size().width, tree.size().height));
    let mut renderer = Renderer {
        tree,
        canvas,
        guard: ReferenceGuard::new(tree.max_reference_depth()),
        transforms: vec![Matrix::identity()],
        styles: vec![Arc::new(StyleState::default())],
        viewports: vec![root_viewport],
        pen: (0.0, 0.0),
    };
    renderer.render_node(tree.root())
}

enum ResolvedPaint<'t> {
    Solid(Color, f32),
    Gradient(&'t GradientDef, f32),
}

struct TextRun {
    x: f32,
    y: f32,
    text: String,
    style: Arc<StyleState>,
}

struct Renderer<'t, 'c> {
    tree: &'t Tree,
    canvas: &'c mut Canvas,
    guard: ReferenceGuard,
    transforms: Vec<Matrix>,
    styles: Vec<Arc<StyleState>>,
    viewports: Vec<ReferenceBox>,
    pen: (f32, f32),
}

impl<'t> Renderer<'t, '_> {
    fn parent_style(&self) -> Arc<StyleState> {
        self.styles
            .last()
            .cloned()
            .unwrap_or_else(|| Arc::new(StyleState::default()))
    }

    fn viewport(&self) -> ReferenceBox {
        self.viewports
            .last()
            .copied()
            .unwrap_or_else(|| ReferenceBox::new(0.0, 0.0))
    }

    fn ctm(&self) -> Matrix {
        self.transforms.last().copied().unwrap_or_default()
    }

    fn render_node(&mut self, node: &'t Node) -> Result<(), ConvertError> {
        match node.kind() {
            NodeKind::Definitions | NodeKind::PaintServer(_) | NodeKind::ClipDef(_) => return Ok(()),
            NodeKind::Unknown(tag) => {
                log::debug!("skipping unsupported element <{tag}>");
                return Ok(());
            }
            _ => {}
        }

        let style = node.computed_style(&self.parent_style(), self.viewport())?;
        if !style.display {
            return Ok(());
        }
        let ctm = geometry::compose(self.ctm(), node.transform());
        if ctm.determinant().abs() < 1e-12 {
            log::debug!("skipping <{}> with a singular transform", node.tag());
            return Ok(());
        }

        self.transforms.push(ctm);
        self.styles.push(style.clone());
        if let Some(viewport) = node.viewport() {
            self.viewports.push(viewport);
        }
        self.canvas.save_state();
        self.canvas.concat_matrix(node.transform());

        let result = self.render_content(node, &style);

        self.canvas.restore_state();
        if node.viewport().is_some() {
            self.viewports.pop();
        }
        self.styles.pop();
        self.transforms.pop();
        result
    }

    fn render_content(&mut self, node: &'t Node, style: &Arc<StyleState>) -> Result<(), ConvertError> {
        if let Some(clip_id) = &style.clip_path {
            if !self.apply_clip(clip_id, node.bounding_box())? {
                return Ok(());
            }
        }

        match node.kind() {
            NodeKind::Group | NodeKind::Reference => {
                // Clipped groups are composited as a unit, like translucent ones.
                let layered = style.opacity < 1.0 || style.clip_path.is_some();
                if layered {
                    self.canvas.begin_layer(style.opacity);
                }
                let result = self.render_children(node);
                if layered {
                    self.canvas.end_layer();
                }
                result
            }
            NodeKind::Shape(_) => {
                if style.visible {
                    self.draw_shape(node, style)?;
                }
                Ok(())
            }
            NodeKind::Text(_) => self.draw_text(node, style),
            NodeKind::Image(def) => {
                if style.visible {
                    self.draw_image(def, style);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn render_children(&mut self, node: &'t Node) -> Result<(), ConvertError> {
        if node.tag() == "switch" {
            // Only the first renderable alternative is drawn.
            let first = node
                .children()
                .iter()
                .find(|child| !matches!(child.kind(), NodeKind::Unknown(_) | NodeKind::Definitions));
            return match first {
                Some(child) => self.render_node(child),
                None => Ok(()),
            };
        }
        for child in node.children() {
            self.render_node(child)?;
        }
        Ok(())
    }

    // ---- clipping ----

    /// Intersects the current clip with the referenced clipPath. Returns
    /// `false` when nothing can remain visible.
    fn apply_clip(&mut self, id: &str, bbox: Option<Rect>) -> Result<bool, ConvertError> {
        let tree = self.tree;
        let Some(clip) = tree.lookup(id) else {
            return Err(ConvertError::Reference(format!("clip-path references missing #{id}")));
        };
        let NodeKind::ClipDef(units) = clip.kind() else {
            return Err(ConvertError::Reference(format!("#{id} is not a clipPath")));
        };

        self.guard.enter_reference(id)?;
        let result = self.apply_clip_def(clip, *units, bbox);
        self.guard.leave();
        result
    }

    fn apply_clip_def(&mut self, clip: &'t Node, units: Units, bbox: Option<Rect>) -> Result<bool, ConvertError> {
        let clip_style = clip.computed_style(&StyleState::default(), self.viewport())?;
        if let Some(nested) = &clip_style.clip_path {
            if !self.apply_clip(nested, bbox)? {
                return Ok(false);
            }
        }

        let mut matrix = clip.transform();
        if units == Units::ObjectBoundingBox {
            let Some(bbox) = bbox.filter(|b| !b.is_empty()) else {
                return Ok(false);
            };
            matrix = matrix.mul(Matrix::new(bbox.width, 0.0, 0.0, bbox.height, bbox.x, bbox.y));
        }

        let mut segments = Vec::new();
        let mut rules = Vec::new();
        self.collect_clip_paths(clip, &clip_style, matrix, &mut segments, &mut rules)?;
        let rule = match rules.as_slice() {
            [single] => *single,
            _ => FillRule::NonZero,
        };
        if segments.is_empty() {
            // Degenerate path: clips everything away.
            segments.push(PathSeg::MoveTo(0.0, 0.0));
            segments.push(PathSeg::Close);
        }
        self.canvas.append_path(&segments);
        self.canvas.clip_path(rule);
        Ok(true)
    }

    fn collect_clip_paths(
        &mut self,
        node: &'t Node,
        parent: &StyleState,
        matrix: Matrix,
        segments: &mut Vec<PathSeg>,
        rules: &mut Vec<FillRule>,
    ) -> Result<(), ConvertError> {
        for child in node.children() {
            let style = child.computed_style(parent, self.viewport())?;
            if !style.display {
                continue;
            }
            let m = matrix.mul(child.transform());
            match child.kind() {
                NodeKind::Shape(_) if style.visible => {
                    segments.extend(geometry::transform_path(child.path(), m));
                    rules.push(style.clip_rule);
                }
                NodeKind::Reference | NodeKind::Group => {
                    self.collect_clip_paths(child, &style, m, segments, rules)?;
                }
                NodeKind::Text(_) => {
                    log::debug!("text inside clipPath is not used for clipping");
                }
                _ => {}
            }
        }
        Ok(())
    }

    // ---- shapes ----

    fn resolve_paint(&self, paint: &Paint, style: &StyleState, opacity: f32) -> Option<ResolvedPaint<'t>> {
        match paint {
            Paint::None => None,
            Paint::Color(color, alpha) => Some(ResolvedPaint::Solid(*color, alpha * opacity)),
            Paint::CurrentColor => Some(ResolvedPaint::Solid(style.color, opacity)),
            Paint::Server { id, fallback } => {
                let tree = self.tree;
                match tree.lookup(id).map(Node::kind) {
                    Some(NodeKind::PaintServer(def)) => match def.stops.as_slice() {
                        [] => None,
                        [stop] => Some(ResolvedPaint::Solid(stop.color, stop.opacity * opacity)),
                        _ => Some(ResolvedPaint::Gradient(def, opacity)),
                    },
                    _ => match fallback {
                        Some(fallback) => self.resolve_paint(fallback, style, opacity),
                        None => {
                            log::debug!("paint server #{id} is not a gradient; painting nothing");
                            None
                        }
                    },
                }
            }
        }
    }

    fn draw_shape(&mut self, node: &'t Node, style: &StyleState) -> Result<(), ConvertError> {
        let path = node.path();
        if path.is_empty() {
            return Ok(());
        }
        let opacity = style.opacity;
        let has_fill = style.has_fill();
        let has_stroke = style.has_stroke();
        let layered = opacity < 1.0 && has_fill && has_stroke;
        // Inside a layer the opacity is applied once, when it is composited.
        let paint_opacity = if layered { 1.0 } else { opacity };

        let fill = if has_fill {
            self.resolve_paint(&style.fill, style, style.fill_opacity * paint_opacity)
        } else {
            None
        };
        let stroke = if has_stroke {
            self.resolve_paint(&style.stroke, style, style.stroke_opacity * paint_opacity)
        } else {
            None
        };
        if fill.is_none() && stroke.is_none() {
            return Ok(());
        }

        if layered {
            self.canvas.begin_layer(opacity);
        }
        if stroke.is_some() {
            self.apply_stroke_style(style);
        }
        let bbox = node.bounding_box();
        match (fill, stroke) {
            (Some(ResolvedPaint::Solid(fc, fa)), Some(ResolvedPaint::Solid(sc, sa))) => {
                self.canvas.set_fill_color(fc);
                self.canvas.set_stroke_color(sc);
                self.canvas.set_opacity(fa, sa);
                self.canvas.append_path(path);
                self.canvas.fill_stroke(style.fill_rule);
            }
            (fill, stroke) => {
                if let Some(fill) = fill {
                    self.fill_path(path, style.fill_rule, fill, bbox);
                }
                if let Some(stroke) = stroke {
                    let (color, alpha) = match stroke {
                        ResolvedPaint::Solid(color, alpha) => (color, alpha),
                        ResolvedPaint::Gradient(def, alpha) => {
                            log::debug!("gradient strokes are drawn with their average color");
                            average_color(&def.stops, alpha)
                        }
                    };
                    self.canvas.set_stroke_color(color);
                    self.canvas.set_opacity(1.0, alpha);
                    self.canvas.append_path(path);
                    self.canvas.stroke();
                }
            }
        }
        if layered {
            self.canvas.end_layer();
        }
        Ok(())
    }

    fn fill_path(&mut self, path: &[PathSeg], rule: FillRule, paint: ResolvedPaint<'t>, bbox: Option<Rect>) {
        match paint {
            ResolvedPaint::Solid(color, alpha) => {
                self.canvas.set_fill_color(color);
                self.canvas.set_opacity(alpha, 1.0);
                self.canvas.append_path(path);
                self.canvas.fill(rule);
            }
            ResolvedPaint::Gradient(def, alpha) => {
                let font_size = self.parent_style().font_size;
                let Some((matrix, shading)) = gradient_shading(def, bbox, self.viewport(), font_size) else {
                    return;
                };
                self.canvas.save_state();
                self.canvas.append_path(path);
                self.canvas.clip_path(rule);
                self.canvas.concat_matrix(matrix);
                self.canvas.set_opacity(alpha, 1.0);
                self.canvas.shading_fill(shading);
                self.canvas.restore_state();
            }
        }
    }

    fn apply_stroke_style(&mut self, style: &StyleState) {
        self.canvas.set_line_width(Pt::from_f32(style.stroke_width));
        self.canvas.set_line_cap(style.line_cap);
        self.canvas.set_line_join(style.line_join);
        self.canvas.set_miter_limit(Pt::from_f32(style.miter_limit));
        let (pattern, phase) = dash_pattern(&style.dash_array, style.dash_offset);
        self.canvas.set_dash(pattern, phase);
    }

    // ---- text ----

    fn draw_text(&mut self, node: &'t Node, style: &Arc<StyleState>) -> Result<(), ConvertError> {
        // Nested spans are laid out by their enclosing text element.
        if node.tag() != "text" {
            return Ok(());
        }
        let mut chunks: Vec<Vec<TextRun>> = Vec::new();
        self.pen = (0.0, 0.0);
        self.layout_span(node, style.clone(), &mut chunks)?;

        for chunk in chunks {
            let Some(first) = chunk.first() else {
                continue;
            };
            let width: f32 = chunk
                .iter()
                .map(|run| self.canvas.fonts().measure_text(&run.text, &font_spec(&run.style), run.style.font_size))
                .sum();
            let shift = match first.style.text_anchor {
                TextAnchor::Start => 0.0,
                TextAnchor::Middle => -width / 2.0,
                TextAnchor::End => -width,
            };
            for run in &chunk {
                self.draw_run(run, shift);
            }
        }
        Ok(())
    }

    fn layout_span(
        &mut self,
        node: &'t Node,
        style: Arc<StyleState>,
        chunks: &mut Vec<Vec<TextRun>>,
    ) -> Result<(), ConvertError> {
        let NodeKind::Text(span) = node.kind() else {
            return Ok(());
        };
        let viewport = self.viewport();
        let resolve = |length: Option<Length>, axis: Axis| -> Result<Option<f32>, ConvertError> {
            Ok(length.map(|l| l.resolve(axis, Some(viewport), style.font_size)).transpose()?)
        };
        let x = resolve(span.x, Axis::Horizontal)?;
        let y = resolve(span.y, Axis::Vertical)?;
        let dx = resolve(span.dx, Axis::Horizontal)?.unwrap_or(0.0);
        let dy = resolve(span.dy, Axis::Vertical)?.unwrap_or(0.0);
        if x.is_some() || chunks.is_empty() {
            chunks.push(Vec::new());
        }
        if let Some(x) = x {
            self.pen.0 = x;
        }
        if let Some(y) = y {
            self.pen.1 = y;
        }
        self.pen.0 += dx;
        self.pen.1 += dy;

        if let Some(content) = &span.content {
            if !content.is_empty() {
                let advance = self.canvas.fonts().measure_text(content, &font_spec(&style), style.font_size);
                if let Some(chunk) = chunks.last_mut() {
                    chunk.push(TextRun {
                        x: self.pen.0,
                        y: self.pen.1,
                        text: content.clone(),
                        style: style.clone(),
                    });
                }
                self.pen.0 += advance;
            }
        }

        for child in node.children() {
            if !matches!(child.kind(), NodeKind::Text(_)) {
                continue;
            }
            let child_style = child.computed_style(&style, viewport)?;
            if !child_style.display {
                continue;
            }
            self.layout_span(child, child_style, chunks)?;
        }
        Ok(())
    }

    fn draw_run(&mut self, run: &TextRun, shift: f32) {
        let style = &run.style;
        if !style.visible || !style.has_fill() || style.font_size <= 0.0 {
            return;
        }
        let opacity = style.fill_opacity * style.opacity;
        let (color, alpha) = match self.resolve_paint(&style.fill, style, opacity) {
            Some(ResolvedPaint::Solid(color, alpha)) => (color, alpha),
            Some(ResolvedPaint::Gradient(def, alpha)) => average_color(&def.stops, alpha),
            None => return,
        };
        self.canvas.set_fill_color(color);
        self.canvas.set_opacity(alpha, 1.0);
        self.canvas.draw_text(
            Pt::from_f32(run.x + shift),
            Pt::from_f32(run.y),
            run.text.clone(),
            font_spec(style),
            Pt::from_f32(style.font_size),
        );
    }

    // ---- images ----

    fn draw_image(&mut self, def: &ImageDef, style: &StyleState) {
        let Some(image) = &def.image else {
            return;
        };
        let rect = def.rect;
        if rect.is_empty() {
            return;
        }
        let source = Rect::new(0.0, 0.0, image.width as f32, image.height as f32);
        let placement = Matrix::translate(rect.x, rect.y)
            .mul(geometry::view_box_transform(source, def.aspect, rect.width, rect.height));

        self.canvas.save_state();
        if def.aspect.slice {
            self.canvas.append_path(&geometry::rect_path(rect.x, rect.y, rect.width, rect.height, 0.0, 0.0));
            self.canvas.clip_path(FillRule::NonZero);
        }
        self.canvas.concat_matrix(placement);
        self.canvas.set_opacity(style.opacity, 1.0);
        self.canvas.draw_image(
            Pt::ZERO,
            Pt::ZERO,
            Pt::from_f32(source.width),
            Pt::from_f32(source.height),
            image.clone(),
        );
        self.canvas.restore_state();
    }
}

pub(crate) fn font_spec(style: &StyleState) -> FontSpec {
    FontSpec {
        family: style.font_family.clone(),
        weight: style.font_weight,
        italic: style.italic,
    }
}

/// Odd-length arrays repeat; all-zero or negative arrays disable dashing.
fn dash_pattern(array: &[f32], offset: f32) -> (Vec<Pt>, Pt) {
    if array.is_empty() || array.iter().any(|v| *v < 0.0) || array.iter().all(|v| *v == 0.0) {
        return (Vec::new(), Pt::ZERO);
    }
    let mut values = array.to_vec();
    if values.len() % 2 == 1 {
        values.extend_from_slice(array);
    }
    (values.into_iter().map(Pt::from_f32).collect(), Pt::from_f32(offset))
}

fn average_color(stops: &[ShadingStop], opacity: f32) -> (Color, f32) {
    if stops.is_empty() {
        return (Color::BLACK, opacity);
    }
    let n = stops.len() as f32;
    let sum = stops.iter().fold((0.0, 0.0, 0.0, 0.0), |acc, s| {
        (acc.0 + s.color.r, acc.1 + s.color.g, acc.2 + s.color.b, acc.3 + s.opacity)
    });
    (Color::rgb(sum.0 / n, sum.1 / n, sum.2 / n), opacity * sum.3 / n)
}

/// Shading in gradient space plus the matrix mapping gradient space to the
/// current user space. `None` when the gradient cannot paint anything.
pub(crate) fn gradient_shading(
    def: &GradientDef,
    bbox: Option<Rect>,
    viewport: ReferenceBox,
    font_size: f32,
) -> Option<(Matrix, Shading)> {
    let (base, reference) = match def.units {
        Units::ObjectBoundingBox => {
            let bbox = bbox.filter(|b| !b.is_empty())?;
            (
                Matrix::new(bbox.width, 0.0, 0.0, bbox.height, bbox.x, bbox.y),
                ReferenceBox::new(1.0, 1.0),
            )
        }
        Units::UserSpaceOnUse => (Matrix::identity(), viewport),
    };
    let matrix = base.mul(def.transform);
    if matrix.determinant().abs() < 1e-12 {
        return None;
    }
    let len = |l: Length, axis: Axis| l.resolve(axis, Some(reference), font_size).ok();
    let stops = def.stops.clone();
    let shading = match &def.kind {
        GradientKind::Linear { x1, y1, x2, y2 } => Shading::Axial {
            x0: len(*x1, Axis::Horizontal)?,
            y0: len(*y1, Axis::Vertical)?,
            x1: len(*x2, Axis::Horizontal)?,
            y1: len(*y2, Axis::Vertical)?,
            stops,
        },
        GradientKind::Radial { cx, cy, r, fx, fy } => {
            let (cx, cy) = (len(*cx, Axis::Horizontal)?, len(*cy, Axis::Vertical)?);
            let r = len(*r, Axis::Diagonal)?;
            if r <= 0.0 {
                return None;
            }
            let (mut fx, mut fy) = (len(*fx, Axis::Horizontal)?, len(*fy, Axis::Vertical)?);
            // A focal point outside the end circle is moved onto its edge.
            let (dx, dy) = (fx - cx, fy - cy);
            let dist = (dx * dx + dy * dy).sqrt();
            if dist > r * 0.999 {
                let k = r * 0.999 / dist;
                fx = cx + dx * k;
                fy = cy + dy * k;
            }
            Shading::Radial {
                x0: fx,
                y0: fy,
                r0: 0.0,
                x1: cx,
                y1: cy,
                r1: r,
                stops,
            }
        }
    };
    Some((matrix, shading))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{Command, Page};
    use crate::tree::BuildOptions;
    use crate::types::Size;

    fn record(svg: &str) -> Page {
        let tree = Tree::parse(svg, &BuildOptions::default()).unwrap();
        let mut canvas = Canvas::new(tree.size());
        render_to_canvas(&tree, &mut canvas).unwrap();
        canvas.finish()
    }

    fn count(page: &Page, pred: impl Fn(&Command) -> bool) -> usize {
        page.commands.iter().filter(|c| pred(c)).count()
    }

    #[test]
    fn solid_rect_records_fill() {
        let page = record(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="10" height="10"><rect width="10" height="10" fill="red"/></svg>"#,
        );
        assert!(page.commands.contains(&Command::SetFillColor(Color::from_rgb8(255, 0, 0))));
        assert_eq!(count(&page, |c| matches!(c, Command::Fill(FillRule::NonZero))), 1);
        assert_eq!(page.size, Size::new(10.0, 10.0));
    }

    #[test]
    fn hidden_and_undisplayed_elements_draw_nothing() {
        let page = record(
            r#"<svg xmlns="http://www.w3.org/2000/svg">
                <g display="none"><rect width="5" height="5"/></g>
                <rect width="5" height="5" visibility="hidden"/>
                <rect width="5" height="5" transform="scale(0)"/>
                <rect width="5" height="5" fill="none"/>
            </svg>"#,
        );
        assert_eq!(count(&page, |c| matches!(c, Command::Fill(_) | Command::Stroke | Command::FillStroke(_))), 0);
    }

    #[test]
    fn group_opacity_uses_a_layer_and_shape_opacity_folds() {
        let page = record(
            r#"<svg xmlns="http://www.w3.org/2000/svg">
                <g opacity="0.5"><rect width="5" height="5"/></g>
                <rect width="5" height="5" opacity="0.5"/>
                <rect width="5" height="5" opacity="0.5" stroke="blue"/>
            </svg>"#,
        );
        assert_eq!(count(&page, |c| matches!(c, Command::BeginLayer { .. })), 2);
        assert!(page.commands.contains(&Command::SetOpacity { fill: 0.5, stroke: 1.0 }));
    }

    #[test]
    fn clip_path_emits_clip_before_drawing() {
        let page = record(
            r##"<svg xmlns="http://www.w3.org/2000/svg">
                <clipPath id="c"><circle cx="5" cy="5" r="5"/></clipPath>
                <rect width="20" height="20" clip-path="url(#c)"/>
            </svg>"##,
        );
        let clip = page.commands.iter().position(|c| matches!(c, Command::ClipPath(_))).unwrap();
        let fill = page.commands.iter().position(|c| matches!(c, Command::Fill(_))).unwrap();
        assert!(clip < fill);
    }

    #[test]
    fn clipped_group_is_isolated_in_a_layer() {
        let page = record(
            r##"<svg xmlns="http://www.w3.org/2000/svg">
                <clipPath id="c"><rect width="5" height="5"/></clipPath>
                <g clip-path="url(#c)"><rect width="20" height="20"/><circle cx="5" cy="5" r="3"/></g>
            </svg>"##,
        );
        let clip = page.commands.iter().position(|c| matches!(c, Command::ClipPath(_))).unwrap();
        let layer = page
            .commands
            .iter()
            .position(|c| matches!(c, Command::BeginLayer { opacity } if *opacity == 1.0))
            .unwrap();
        let end = page.commands.iter().position(|c| matches!(c, Command::EndLayer)).unwrap();
        let fills: Vec<usize> = page
            .commands
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, Command::Fill(_)))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(fills.len(), 2);
        assert!(clip < layer);
        assert!(fills.iter().all(|&i| layer < i && i < end));
    }

    #[test]
    fn object_bounding_box_clip_scales_to_the_element() {
        let page = record(
            r##"<svg xmlns="http://www.w3.org/2000/svg">
                <clipPath id="c" clipPathUnits="objectBoundingBox"><rect width="0.5" height="0.25"/></clipPath>
                <rect x="10" y="20" width="40" height="80" clip-path="url(#c)"/>
            </svg>"##,
        );
        let clip = page.commands.iter().position(|c| matches!(c, Command::ClipPath(_))).unwrap();
        let corners: Vec<(f32, f32)> = page.commands[..clip]
            .iter()
            .filter_map(|c| match c {
                Command::MoveTo { x, y } | Command::LineTo { x, y } => Some((x.to_f32(), y.to_f32())),
                _ => None,
            })
            .collect();
        assert_eq!(corners, vec![(10.0, 20.0), (30.0, 20.0), (30.0, 40.0), (10.0, 40.0)]);

        // An empty group has no box, so the clip leaves nothing to draw.
        let empty = record(
            r##"<svg xmlns="http://www.w3.org/2000/svg">
                <clipPath id="c" clipPathUnits="objectBoundingBox"><rect width="1" height="1"/></clipPath>
                <g clip-path="url(#c)"/>
            </svg>"##,
        );
        assert_eq!(count(&empty, |c| matches!(c, Command::ClipPath(_) | Command::BeginLayer { .. })), 0);
    }

    #[test]
    fn gradient_nested_in_a_pattern_still_paints() {
        let page = record(
            r##"<svg xmlns="http://www.w3.org/2000/svg">
                <pattern id="p"><linearGradient id="g"><stop offset="0" stop-color="red"/><stop offset="1" stop-color="blue"/></linearGradient></pattern>
                <rect width="10" height="10" fill="url(#g)"/>
            </svg>"##,
        );
        assert_eq!(count(&page, |c| matches!(c, Command::ShadingFill(_))), 1);
    }

    #[test]
    fn object_bounding_box_gradient_maps_to_bbox() {
        let page = record(
            r##"<svg xmlns="http://www.w3.org/2000/svg">
                <linearGradient id="g"><stop offset="0" stop-color="red"/><stop offset="1" stop-color="blue"/></linearGradient>
                <rect x="10" y="20" width="30" height="40" fill="url(#g)"/>
            </svg>"##,
        );
        assert!(page.commands.contains(&Command::ConcatMatrix {
            a: 30.0,
            b: 0.0,
            c: 0.0,
            d: 40.0,
            e: Pt::from_f32(10.0),
            f: Pt::from_f32(20.0),
        }));
        let shading = page
            .commands
            .iter()
            .find_map(|c| match c {
                Command::ShadingFill(s) => Some(s.clone()),
                _ => None,
            })
            .unwrap();
        assert!(matches!(shading, Shading::Axial { x0, x1, .. } if x0 == 0.0 && x1 == 1.0));
    }

    #[test]
    fn text_anchor_shifts_runs() {
        let start = record(r#"<svg xmlns="http://www.w3.org/2000/svg"><text x="50" y="20">Hi</text></svg>"#);
        let end = record(r#"<svg xmlns="http://www.w3.org/2000/svg"><text x="50" y="20" text-anchor="end">Hi</text></svg>"#);
        let x_of = |page: &Page| {
            page.commands
                .iter()
                .find_map(|c| match c {
                    Command::DrawText { x, .. } => Some(x.to_f32()),
                    _ => None,
                })
                .unwrap()
        };
        assert_eq!(x_of(&start), 50.0);
        assert!(x_of(&end) < 50.0);
    }

    #[test]
    fn clip_cycle_through_nested_clip_is_reported() {
        let mut guard = ReferenceGuard::new(8);
        guard.enter_reference("c").unwrap();
        assert!(matches!(guard.enter_reference("c"), Err(ConvertError::Reference(_))));
    }

    #[test]
    fn dash_arrays_normalize() {
        let (pattern, _) = dash_pattern(&[1.0, 2.0, 3.0], 0.0);
        assert_eq!(pattern.len(), 6);
        assert!(dash_pattern(&[0.0, 0.0], 0.0).0.is_empty());
        assert!(dash_pattern(&[1.0, -1.0], 0.0).0.is_empty());
    }

    #[test]
    fn radial_focus_is_pulled_inside() {
        let def = GradientDef {
            kind: GradientKind::Radial {
                cx: Length::percent(50.0),
                cy: Length::percent(50.0),
                r: Length::percent(50.0),
                fx: Length::percent(200.0),
                fy: Length::percent(50.0),
            },
            units: Units::ObjectBoundingBox,
            transform: Matrix::identity(),
            stops: Vec::new(),
        };
        let bbox = Some(Rect::new(0.0, 0.0, 10.0, 10.0));
        let (_, shading) = gradient_shading(&def, bbox, ReferenceBox::new(1.0, 1.0), 16.0).unwrap();
        let Shading::Radial { x0, x1, r1, .. } = shading else {
            panic!("expected radial");
        };
        assert!(x0 - x1 < r1);
        assert!(gradient_shading(&def, None, ReferenceBox::new(1.0, 1.0), 16.0).is_none());
    }
}

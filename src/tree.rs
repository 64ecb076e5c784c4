use std::cell::OnceCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::ConvertError;
use crate::geometry::{self, AspectRatio, GeometryError, Matrix, PathSeg};
use crate::resource;
use crate::style::{self, Attributes, Paint, StyleState, Stylesheet};
use crate::types::{Color, RasterImage, Rect, ShadingStop, Size};
use crate::units::{self, Axis, Length, LengthUnit, ReferenceBox};

/// Size used when the root element gives neither a size nor a viewBox.
pub const DEFAULT_SIZE: f32 = 100.0;

#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Location of the document, used to resolve relative image references.
    pub base: Option<PathBuf>,
    /// Allow `<image>` to read files from disk.
    pub unsafe_resources: bool,
    /// Maximum nesting of `use` expansions (and clip-path references at render time).
    pub max_reference_depth: usize,
    /// Maximum number of nodes in the expanded tree.
    pub max_nodes: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            base: None,
            unsafe_resources: false,
            max_reference_depth: 64,
            max_nodes: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
    Path,
    Rect,
    Circle,
    Ellipse,
    Line,
    Polyline,
    Polygon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Units {
    UserSpaceOnUse,
    ObjectBoundingBox,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GradientKind {
    Linear {
        x1: Length,
        y1: Length,
        x2: Length,
        y2: Length,
    },
    Radial {
        cx: Length,
        cy: Length,
        r: Length,
        fx: Length,
        fy: Length,
    },
}

/// A gradient with its `href` chain already folded in.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientDef {
    pub kind: GradientKind,
    pub units: Units,
    pub transform: Matrix,
    pub stops: Vec<ShadingStop>,
}

/// Positioning of a `text`/`tspan` element or an anonymous run of
/// character data (`content` is set only for the latter).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextSpan {
    pub x: Option<Length>,
    pub y: Option<Length>,
    pub dx: Option<Length>,
    pub dy: Option<Length>,
    pub content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ImageDef {
    pub rect: Rect,
    pub aspect: AspectRatio,
    /// `None` when the reference could not (or may not) be loaded.
    pub image: Option<Arc<RasterImage>>,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Group,
    Shape(ShapeKind),
    Text(TextSpan),
    PaintServer(GradientDef),
    ClipDef(Units),
    /// Expanded `use`: its single child is a private copy of the target.
    Reference,
    Image(ImageDef),
    /// `defs` and uninstantiated `symbol`: kept for lookups, never drawn.
    Definitions,
    Unknown(String),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) tag: String,
    pub(crate) id: Option<String>,
    pub(crate) attributes: Attributes,
    pub(crate) children: Vec<Node>,
    pub(crate) transform: Matrix,
    pub(crate) viewport: Option<ReferenceBox>,
    pub(crate) path: Vec<PathSeg>,
    style: OnceCell<Arc<StyleState>>,
}

impl Node {
    fn new(tag: &str, id: Option<String>, attributes: Attributes) -> Self {
        Self {
            kind: NodeKind::Group,
            tag: tag.to_string(),
            id,
            attributes,
            children: Vec::new(),
            transform: Matrix::identity(),
            viewport: None,
            path: Vec::new(),
            style: OnceCell::new(),
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn transform(&self) -> Matrix {
        self.transform
    }

    /// Viewport established by this node (root and nested `svg`, instantiated `symbol`).
    pub fn viewport(&self) -> Option<ReferenceBox> {
        self.viewport
    }

    /// Canonical geometry of a shape node; empty for every other kind.
    pub fn path(&self) -> &[PathSeg] {
        &self.path
    }

    /// Cascades this node's attributes over `parent` once; later calls return
    /// the cached snapshot.
    pub fn computed_style(
        &self,
        parent: &StyleState,
        viewport: ReferenceBox,
    ) -> Result<Arc<StyleState>, ConvertError> {
        if let Some(style) = self.style.get() {
            return Ok(style.clone());
        }
        let style = Arc::new(style::cascade(parent, &self.attributes, viewport)?);
        Ok(self.style.get_or_init(|| style).clone())
    }

    /// Bounds in this node's user space (its own transform not applied).
    pub fn bounding_box(&self) -> Option<Rect> {
        match &self.kind {
            NodeKind::Shape(_) => geometry::path_bbox(&self.path),
            NodeKind::Image(def) => Some(def.rect),
            NodeKind::Group | NodeKind::Reference | NodeKind::ClipDef(_) => self
                .children
                .iter()
                .filter_map(|child| {
                    let bbox = child.bounding_box()?;
                    Some(child.transform.map_rect(bbox))
                })
                .reduce(|a, b| a.union(&b)),
            _ => None,
        }
    }
}

/// Fully expanded document: every `use` is replaced by a private copy and
/// every shape carries its canonical path.
#[derive(Debug, Clone)]
pub struct Tree {
    root: Node,
    size: Size,
    index: HashMap<String, Vec<usize>>,
    max_reference_depth: usize,
}

impl Tree {
    pub fn from_data(data: &[u8], options: &BuildOptions) -> Result<Tree, ConvertError> {
        build(data, options)
    }

    pub fn parse(text: &str, options: &BuildOptions) -> Result<Tree, ConvertError> {
        build(text.as_bytes(), options)
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Intrinsic size in CSS pixels.
    pub fn size(&self) -> Size {
        self.size
    }

    /// Node carrying `id` outside of any `use` copy.
    pub fn lookup(&self, id: &str) -> Option<&Node> {
        let path = self.index.get(id)?;
        let mut node = &self.root;
        for i in path {
            node = node.children.get(*i)?;
        }
        Some(node)
    }

    pub fn max_reference_depth(&self) -> usize {
        self.max_reference_depth
    }
}

/// Tracks the identifiers on the active resolution path. Shared by `use`
/// expansion and render-time clip resolution.
#[derive(Debug)]
pub(crate) struct ReferenceGuard {
    active: Vec<(String, bool)>,
    references: usize,
    max_depth: usize,
}

impl ReferenceGuard {
    pub fn new(max_depth: usize) -> Self {
        Self {
            active: Vec::new(),
            references: 0,
            max_depth,
        }
    }

    /// Records an element entered by plain nesting.
    pub fn push(&mut self, id: &str) {
        self.active.push((id.to_string(), false));
    }

    /// Enters the target of a reference, failing on a cycle or when the
    /// reference depth limit is reached.
    pub fn enter_reference(&mut self, id: &str) -> Result<(), ConvertError> {
        if self.active.iter().any(|(active, _)| active == id) {
            return Err(ConvertError::Reference(format!(
                "reference cycle through #{id}"
            )));
        }
        if self.references >= self.max_depth {
            return Err(ConvertError::Reference(format!(
                "reference to #{id} exceeds the maximum expansion depth of {}",
                self.max_depth
            )));
        }
        self.references += 1;
        self.active.push((id.to_string(), true));
        Ok(())
    }

    pub fn leave(&mut self) {
        if let Some((_, true)) = self.active.pop() {
            self.references -= 1;
        }
    }
}

pub fn build(data: &[u8], options: &BuildOptions) -> Result<Tree, ConvertError> {
    let text = std::str::from_utf8(data)
        .map_err(|err| ConvertError::Parse(format!("document is not valid UTF-8: {err}")))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let parse_options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..roxmltree::ParsingOptions::default()
    };
    let doc = roxmltree::Document::parse_with_options(text, parse_options)?;
    let root = doc.root_element();
    if root.tag_name().name() != "svg" {
        return Err(ConvertError::Parse(format!(
            "root element is <{}>, expected <svg>",
            root.tag_name().name()
        )));
    }

    let sheet = Stylesheet::from_document(&doc);
    let mut arena = Vec::new();
    collect_raw(root, &sheet, &mut arena);
    let ids = index_raw_ids(&arena);
    validate_references(&arena, &ids)?;

    let (size, root_transform, viewport) = root_geometry(&arena[0].attrs)?;
    let mut expander = Expander {
        arena: &arena,
        ids: &ids,
        options,
        guard: ReferenceGuard::new(options.max_reference_depth),
        nodes: 0,
        root_transform,
    };
    let ctx = Context {
        viewport,
        font_size: style::DEFAULT_FONT_SIZE,
    };
    let mut root_node = expander
        .expand(0, ctx)?
        .ok_or_else(|| ConvertError::Parse("empty document".into()))?;
    root_node.viewport = Some(viewport);

    let mut index = HashMap::new();
    index_resolved(&root_node, &mut Vec::new(), &mut index);
    log::trace!("built tree with {} nodes", expander.nodes);

    Ok(Tree {
        root: root_node,
        size,
        index,
        max_reference_depth: options.max_reference_depth,
    })
}

// ---- step 1: raw structure ----

#[derive(Debug)]
struct RawElement {
    tag: String,
    attrs: Attributes,
    children: Vec<RawChild>,
}

#[derive(Debug)]
enum RawChild {
    Element(usize),
    Text(String),
}

/// Flattens the XML into an arena. Style declarations are merged over the
/// presentation attributes in cascade order: sheet rules, inline style,
/// important sheet rules, important inline style.
fn collect_raw(node: roxmltree::Node<'_, '_>, sheet: &Stylesheet, arena: &mut Vec<RawElement>) -> usize {
    let mut attrs: Attributes = node
        .attributes()
        .map(|a| (a.name().to_string(), a.value().to_string()))
        .collect();

    let inline = node.attribute("style").map(style::parse_declarations).unwrap_or_default();
    let (sheet_normal, sheet_important) = if sheet.is_empty() {
        (Vec::new(), Vec::new())
    } else {
        sheet.matching(node)
    };
    let ordered = sheet_normal
        .into_iter()
        .chain(inline.iter().filter(|d| !d.important))
        .chain(sheet_important)
        .chain(inline.iter().filter(|d| d.important));
    for decl in ordered {
        if style::PRESENTATION_PROPERTIES.contains(&decl.name.as_str()) {
            attrs.insert(decl.name.clone(), decl.value.clone());
        }
    }

    let idx = arena.len();
    arena.push(RawElement {
        tag: node.tag_name().name().to_string(),
        attrs,
        children: Vec::new(),
    });

    let mut children = Vec::new();
    for child in node.children() {
        if child.is_element() {
            children.push(RawChild::Element(collect_raw(child, sheet, arena)));
        } else if child.is_text() {
            if let Some(text) = child.text() {
                children.push(RawChild::Text(text.to_string()));
            }
        }
    }
    arena[idx].children = children;
    idx
}

// ---- step 2: identifier index ----

fn index_raw_ids(arena: &[RawElement]) -> HashMap<String, usize> {
    let mut ids = HashMap::new();
    for (idx, el) in arena.iter().enumerate() {
        if let Some(id) = el.attrs.get("id") {
            if ids.contains_key(id) {
                log::debug!("duplicate id #{id}; keeping the first element");
                continue;
            }
            ids.insert(id.clone(), idx);
        }
    }
    ids
}

fn href_target(attrs: &Attributes) -> Option<Result<&str, ConvertError>> {
    let href = attrs.get("href")?.trim();
    Some(href.strip_prefix('#').ok_or_else(|| {
        ConvertError::Reference(format!("external reference {href:?} is not supported"))
    }))
}

fn is_gradient(tag: &str) -> bool {
    tag == "linearGradient" || tag == "radialGradient"
}

/// Rejects dangling clip-path and paint references, and clip-path cycles.
fn validate_references(arena: &[RawElement], ids: &HashMap<String, usize>) -> Result<(), ConvertError> {
    for el in arena {
        if let Some(id) = el.attrs.get("clip-path").and_then(|v| style::parse_url_ref(v)) {
            match ids.get(&id) {
                Some(target) if arena[*target].tag == "clipPath" => {}
                Some(_) => {
                    return Err(ConvertError::Reference(format!(
                        "clip-path references #{id}, which is not a clipPath"
                    )));
                }
                None => {
                    return Err(ConvertError::Reference(format!(
                        "clip-path references missing #{id}"
                    )));
                }
            }
        }
        for property in ["fill", "stroke"] {
            let paint = el.attrs.get(property).and_then(|v| style::parse_paint(v));
            if let Some(Paint::Server { id, fallback: None }) = paint {
                if !ids.contains_key(&id) {
                    return Err(ConvertError::Reference(format!(
                        "{property} references missing paint server #{id}"
                    )));
                }
            }
        }
    }

    // clipPath -> clipPath edges, from the clipPath itself and its contents.
    let mut state = vec![0u8; arena.len()];
    for (idx, el) in arena.iter().enumerate() {
        if el.tag == "clipPath" && state[idx] == 0 {
            visit_clip(arena, ids, idx, &mut state)?;
        }
    }
    Ok(())
}

fn visit_clip(
    arena: &[RawElement],
    ids: &HashMap<String, usize>,
    idx: usize,
    state: &mut [u8],
) -> Result<(), ConvertError> {
    state[idx] = 1;
    let mut stack = vec![idx];
    let mut targets = Vec::new();
    while let Some(current) = stack.pop() {
        if let Some(id) = arena[current].attrs.get("clip-path").and_then(|v| style::parse_url_ref(v)) {
            if let Some(target) = ids.get(&id) {
                targets.push((*target, id));
            }
        }
        for child in &arena[current].children {
            if let RawChild::Element(child) = child {
                stack.push(*child);
            }
        }
    }
    for (target, id) in targets {
        match state[target] {
            1 => {
                return Err(ConvertError::Reference(format!(
                    "clip-path cycle through #{id}"
                )));
            }
            0 => visit_clip(arena, ids, target, state)?,
            _ => {}
        }
    }
    state[idx] = 2;
    Ok(())
}

// ---- steps 3-5: expansion ----

#[derive(Debug, Clone, Copy)]
struct Context {
    viewport: ReferenceBox,
    font_size: f32,
}

struct Expander<'a> {
    arena: &'a [RawElement],
    ids: &'a HashMap<String, usize>,
    options: &'a BuildOptions,
    guard: ReferenceGuard,
    nodes: usize,
    root_transform: Matrix,
}

impl Expander<'_> {
    fn expand(&mut self, idx: usize, ctx: Context) -> Result<Option<Node>, ConvertError> {
        let arena = self.arena;
        let el = &arena[idx];
        if matches!(
            el.tag.as_str(),
            "style" | "title" | "desc" | "metadata" | "script" | "stop"
        ) {
            return Ok(None);
        }
        self.count_node()?;
        let id = el.attrs.get("id");
        if let Some(id) = id {
            self.guard.push(id);
        }
        let result = self.expand_element(idx, ctx);
        if id.is_some() {
            self.guard.leave();
        }
        result.map(Some)
    }

    fn count_node(&mut self) -> Result<(), ConvertError> {
        self.nodes += 1;
        if self.nodes > self.options.max_nodes {
            return Err(ConvertError::Reference(format!(
                "expanded document exceeds {} nodes",
                self.options.max_nodes
            )));
        }
        Ok(())
    }

    fn expand_element(&mut self, idx: usize, ctx: Context) -> Result<Node, ConvertError> {
        let arena = self.arena;
        let el = &arena[idx];
        let mut node = Node::new(&el.tag, el.attrs.get("id").cloned(), el.attrs.clone());
        if let Some(transform) = el.attrs.get("transform") {
            node.transform = geometry::parse_transform(transform)?;
        }
        let mut ctx = ctx;
        if let Some(size) = el.attrs.get("font-size") {
            ctx.font_size = font_size(size, ctx.font_size);
        }

        match el.tag.as_str() {
            "svg" if idx == 0 => {
                node.transform = self.root_transform;
                self.expand_children(idx, &mut node, ctx)?;
            }
            "svg" => {
                let x = self.length(el, "x", Axis::Horizontal, ctx, 0.0)?;
                let y = self.length(el, "y", Axis::Vertical, ctx, 0.0)?;
                let w = self.length(el, "width", Axis::Horizontal, ctx, ctx.viewport.width)?;
                let h = self.length(el, "height", Axis::Vertical, ctx, ctx.viewport.height)?;
                let (viewport, inner) = viewport_transform(&el.attrs, w, h);
                node.transform = node.transform.mul(Matrix::translate(x, y)).mul(inner);
                node.viewport = Some(viewport);
                ctx.viewport = viewport;
                self.expand_children(idx, &mut node, ctx)?;
            }
            "g" | "a" | "switch" => self.expand_children(idx, &mut node, ctx)?,
            "defs" | "symbol" => {
                node.kind = NodeKind::Definitions;
                self.expand_children(idx, &mut node, ctx)?;
            }
            "use" => self.expand_use(el, &mut node, ctx)?,
            "path" | "rect" | "circle" | "ellipse" | "line" | "polyline" | "polygon" => {
                let (kind, path) = self.shape(el, ctx)?;
                node.kind = NodeKind::Shape(kind);
                node.path = path;
            }
            "text" => {
                node.kind = NodeKind::Text(self.text_span(el)?);
                let mut last_was_space = true;
                self.expand_text_children(idx, &mut node, ctx, &mut last_was_space)?;
                trim_trailing_space(&mut node);
            }
            "linearGradient" | "radialGradient" => {
                node.kind = NodeKind::PaintServer(self.gradient(idx)?);
            }
            "clipPath" => {
                let units = match el.attrs.get("clipPathUnits").map(String::as_str) {
                    Some("objectBoundingBox") => Units::ObjectBoundingBox,
                    _ => Units::UserSpaceOnUse,
                };
                node.kind = NodeKind::ClipDef(units);
                self.expand_children(idx, &mut node, ctx)?;
            }
            "image" => node.kind = NodeKind::Image(self.image(el, ctx)?),
            other => {
                node.kind = NodeKind::Unknown(other.to_string());
                self.expand_definitions(idx, &mut node, ctx)?;
            }
        }
        Ok(node)
    }

    /// Unsupported containers such as `pattern` or `marker` are never drawn,
    /// but gradients and clip paths inside them stay addressable.
    fn expand_definitions(&mut self, idx: usize, node: &mut Node, ctx: Context) -> Result<(), ConvertError> {
        let arena = self.arena;
        for child in &arena[idx].children {
            let RawChild::Element(child) = child else {
                continue;
            };
            match arena[*child].tag.as_str() {
                "linearGradient" | "radialGradient" | "clipPath" => {
                    if let Some(expanded) = self.expand(*child, ctx)? {
                        node.children.push(expanded);
                    }
                }
                "use" | "path" | "rect" | "circle" | "ellipse" | "line" | "polyline" | "polygon" | "text"
                | "image" => {}
                _ => self.expand_definitions(*child, node, ctx)?,
            }
        }
        Ok(())
    }

    fn expand_children(&mut self, idx: usize, node: &mut Node, ctx: Context) -> Result<(), ConvertError> {
        let arena = self.arena;
        for child in &arena[idx].children {
            if let RawChild::Element(child) = child {
                if let Some(expanded) = self.expand(*child, ctx)? {
                    node.children.push(expanded);
                }
            }
        }
        Ok(())
    }

    fn expand_use(&mut self, el: &RawElement, node: &mut Node, ctx: Context) -> Result<(), ConvertError> {
        node.kind = NodeKind::Reference;
        let Some(target_id) = href_target(&el.attrs) else {
            return Ok(());
        };
        let target_id = target_id?;
        let target = *self.ids.get(target_id).ok_or_else(|| {
            ConvertError::Reference(format!("use references missing #{target_id}"))
        })?;
        let x = self.length(el, "x", Axis::Horizontal, ctx, 0.0)?;
        let y = self.length(el, "y", Axis::Vertical, ctx, 0.0)?;
        node.transform = node.transform.mul(Matrix::translate(x, y));

        self.guard.enter_reference(target_id)?;
        let expanded = if self.arena[target].tag == "symbol" {
            let w = self.length(el, "width", Axis::Horizontal, ctx, ctx.viewport.width)?;
            let h = self.length(el, "height", Axis::Vertical, ctx, ctx.viewport.height)?;
            self.instantiate_symbol(target, w, h, ctx).map(Some)
        } else {
            self.expand(target, ctx)
        };
        self.guard.leave();

        node.children.extend(expanded?);
        Ok(())
    }

    fn instantiate_symbol(&mut self, idx: usize, w: f32, h: f32, ctx: Context) -> Result<Node, ConvertError> {
        self.count_node()?;
        let arena = self.arena;
        let el = &arena[idx];
        let mut node = Node::new(&el.tag, el.attrs.get("id").cloned(), el.attrs.clone());
        let (viewport, inner) = viewport_transform(&el.attrs, w, h);
        node.transform = inner;
        node.viewport = Some(viewport);
        let ctx = Context { viewport, ..ctx };
        self.expand_children(idx, &mut node, ctx)?;
        Ok(node)
    }

    fn length(
        &self,
        el: &RawElement,
        name: &str,
        axis: Axis,
        ctx: Context,
        default: f32,
    ) -> Result<f32, ConvertError> {
        match el.attrs.get(name).map(|v| v.trim()) {
            None | Some("") | Some("auto") => Ok(default),
            Some(raw) => Ok(units::resolve(raw, axis, Some(ctx.viewport), ctx.font_size)?),
        }
    }

    fn shape(&self, el: &RawElement, ctx: Context) -> Result<(ShapeKind, Vec<PathSeg>), ConvertError> {
        let len = |name: &str, axis: Axis| self.length(el, name, axis, ctx, 0.0);
        let shape = match el.tag.as_str() {
            "rect" => {
                let w = len("width", Axis::Horizontal)?;
                let h = len("height", Axis::Vertical)?;
                let rx = el.attrs.get("rx").map(|_| len("rx", Axis::Horizontal)).transpose()?;
                let ry = el.attrs.get("ry").map(|_| len("ry", Axis::Vertical)).transpose()?;
                let (rx, ry) = match (rx, ry) {
                    (Some(rx), Some(ry)) => (rx, ry),
                    (Some(r), None) | (None, Some(r)) => (r, r),
                    (None, None) => (0.0, 0.0),
                };
                let path = geometry::rect_path(
                    len("x", Axis::Horizontal)?,
                    len("y", Axis::Vertical)?,
                    w,
                    h,
                    rx,
                    ry,
                );
                (ShapeKind::Rect, path)
            }
            "circle" => {
                let r = len("r", Axis::Diagonal)?;
                let path = geometry::ellipse_path(
                    len("cx", Axis::Horizontal)?,
                    len("cy", Axis::Vertical)?,
                    r,
                    r,
                );
                (ShapeKind::Circle, path)
            }
            "ellipse" => {
                let path = geometry::ellipse_path(
                    len("cx", Axis::Horizontal)?,
                    len("cy", Axis::Vertical)?,
                    len("rx", Axis::Horizontal)?,
                    len("ry", Axis::Vertical)?,
                );
                (ShapeKind::Ellipse, path)
            }
            "line" => {
                let path = geometry::line_path(
                    len("x1", Axis::Horizontal)?,
                    len("y1", Axis::Vertical)?,
                    len("x2", Axis::Horizontal)?,
                    len("y2", Axis::Vertical)?,
                );
                (ShapeKind::Line, path)
            }
            "polyline" | "polygon" => {
                let points = geometry::parse_points(el.attrs.get("points").map_or("", |v| v))?;
                let close = el.tag == "polygon";
                let kind = if close {
                    ShapeKind::Polygon
                } else {
                    ShapeKind::Polyline
                };
                (kind, geometry::poly_path(&points, close))
            }
            _ => {
                let d = el.attrs.get("d").map_or("", |v| v);
                let path = match geometry::parse_path(d) {
                    Ok(path) => path,
                    Err(GeometryError::MalformedPath {
                        offset,
                        message,
                        partial,
                    }) => {
                        log::warn!(
                            "path data error at byte {offset} ({message}); drawing the {} valid segments",
                            partial.len()
                        );
                        partial
                    }
                    Err(other) => return Err(other.into()),
                };
                (ShapeKind::Path, path)
            }
        };
        Ok(shape)
    }

    fn text_span(&self, el: &RawElement) -> Result<TextSpan, ConvertError> {
        let first = |name: &str| -> Result<Option<Length>, ConvertError> {
            match el.attrs.get(name) {
                Some(raw) => Ok(units::parse_length_list(raw)?.into_iter().next()),
                None => Ok(None),
            }
        };
        Ok(TextSpan {
            x: first("x")?,
            y: first("y")?,
            dx: first("dx")?,
            dy: first("dy")?,
            content: None,
        })
    }

    fn expand_text_children(
        &mut self,
        idx: usize,
        node: &mut Node,
        ctx: Context,
        last_was_space: &mut bool,
    ) -> Result<(), ConvertError> {
        let arena = self.arena;
        let preserve = arena[idx].attrs.get("space").map(String::as_str) == Some("preserve");
        for child in &arena[idx].children {
            match child {
                RawChild::Text(raw) => {
                    let content = normalize_whitespace(raw, preserve, last_was_space);
                    if content.is_empty() {
                        continue;
                    }
                    self.count_node()?;
                    let mut span = Node::new("#text", None, Attributes::new());
                    span.kind = NodeKind::Text(TextSpan {
                        content: Some(content),
                        ..TextSpan::default()
                    });
                    node.children.push(span);
                }
                RawChild::Element(child_idx) => {
                    let child = &arena[*child_idx];
                    if child.tag != "tspan" && child.tag != "a" {
                        if let Some(expanded) = self.expand(*child_idx, ctx)? {
                            node.children.push(expanded);
                        }
                        continue;
                    }
                    self.count_node()?;
                    let mut span = Node::new(&child.tag, child.attrs.get("id").cloned(), child.attrs.clone());
                    if let Some(transform) = child.attrs.get("transform") {
                        span.transform = geometry::parse_transform(transform)?;
                    }
                    span.kind = NodeKind::Text(self.text_span(child)?);
                    let mut child_ctx = ctx;
                    if let Some(size) = child.attrs.get("font-size") {
                        child_ctx.font_size = font_size(size, ctx.font_size);
                    }
                    self.expand_text_children(*child_idx, &mut span, child_ctx, last_was_space)?;
                    node.children.push(span);
                }
            }
        }
        Ok(())
    }

    fn gradient(&self, idx: usize) -> Result<GradientDef, ConvertError> {
        let mut chain = vec![idx];
        let mut current = idx;
        while let Some(target) = href_target(&self.arena[current].attrs) {
            let target_id = target?;
            let next = *self.ids.get(target_id).ok_or_else(|| {
                ConvertError::Reference(format!("gradient references missing #{target_id}"))
            })?;
            if !is_gradient(&self.arena[next].tag) {
                log::debug!("gradient href #{target_id} is not a gradient; ignoring it");
                break;
            }
            if chain.contains(&next) {
                return Err(ConvertError::Reference(format!(
                    "gradient href cycle through #{target_id}"
                )));
            }
            chain.push(next);
            current = next;
        }

        let own_tag = self.arena[idx].tag.as_str();
        let attr = |name: &str| -> Option<&str> {
            chain
                .iter()
                .find_map(|i| self.arena[*i].attrs.get(name).map(String::as_str))
        };
        // Geometry attributes only inherit from gradients of the same kind.
        let geometry_attr = |name: &str, default: &str| -> Result<Length, ConvertError> {
            let raw = chain
                .iter()
                .filter(|i| self.arena[**i].tag == own_tag)
                .find_map(|i| self.arena[*i].attrs.get(name).map(String::as_str));
            Ok(Length::parse(raw.unwrap_or(default))?)
        };

        let units = match attr("gradientUnits") {
            Some("userSpaceOnUse") => Units::UserSpaceOnUse,
            _ => Units::ObjectBoundingBox,
        };
        let transform = attr("gradientTransform")
            .map(geometry::parse_transform)
            .transpose()?
            .unwrap_or_default();
        if let Some(spread) = attr("spreadMethod").filter(|s| *s != "pad") {
            log::debug!("spreadMethod {spread} is drawn as pad");
        }
        let stops = chain
            .iter()
            .map(|i| self.stops(*i))
            .find(|stops| !stops.is_empty())
            .unwrap_or_default();

        let kind = if own_tag == "linearGradient" {
            GradientKind::Linear {
                x1: geometry_attr("x1", "0%")?,
                y1: geometry_attr("y1", "0%")?,
                x2: geometry_attr("x2", "100%")?,
                y2: geometry_attr("y2", "0%")?,
            }
        } else {
            let cx = geometry_attr("cx", "50%")?;
            let cy = geometry_attr("cy", "50%")?;
            let fx = match chain.iter().find_map(|i| self.arena[*i].attrs.get("fx")) {
                Some(raw) => Length::parse(raw)?,
                None => cx,
            };
            let fy = match chain.iter().find_map(|i| self.arena[*i].attrs.get("fy")) {
                Some(raw) => Length::parse(raw)?,
                None => cy,
            };
            GradientKind::Radial {
                cx,
                cy,
                r: geometry_attr("r", "50%")?,
                fx,
                fy,
            }
        };

        Ok(GradientDef {
            kind,
            units,
            transform,
            stops,
        })
    }

    fn stops(&self, idx: usize) -> Vec<ShadingStop> {
        let mut out: Vec<ShadingStop> = Vec::new();
        for child in &self.arena[idx].children {
            let RawChild::Element(child) = child else {
                continue;
            };
            let stop = &self.arena[*child];
            if stop.tag != "stop" {
                continue;
            }
            let offset = stop
                .attrs
                .get("offset")
                .and_then(|v| units::parse_number(v))
                .unwrap_or(0.0)
                .clamp(0.0, 1.0);
            // Offsets never decrease.
            let offset = out.last().map_or(offset, |prev| offset.max(prev.offset));
            let (color, alpha) = match stop.attrs.get("stop-color").map(|v| v.trim()) {
                Some(v) if v.eq_ignore_ascii_case("currentcolor") => stop
                    .attrs
                    .get("color")
                    .and_then(|c| style::parse_color(c))
                    .unwrap_or((Color::BLACK, 1.0)),
                Some(v) => style::parse_color(v).unwrap_or((Color::BLACK, 1.0)),
                None => (Color::BLACK, 1.0),
            };
            let opacity = stop
                .attrs
                .get("stop-opacity")
                .and_then(|v| units::parse_number(v))
                .unwrap_or(1.0)
                .clamp(0.0, 1.0);
            out.push(ShadingStop {
                offset,
                color,
                opacity: opacity * alpha,
            });
        }
        out
    }

    fn image(&self, el: &RawElement, ctx: Context) -> Result<ImageDef, ConvertError> {
        let aspect = el
            .attrs
            .get("preserveAspectRatio")
            .map(|v| AspectRatio::parse(v))
            .unwrap_or_default();
        let image = el
            .attrs
            .get("href")
            .and_then(|href| self.load_image(href))
            .map(Arc::new);
        let (iw, ih) = image
            .as_ref()
            .map_or((0.0, 0.0), |img| (img.width as f32, img.height as f32));
        let rect = Rect::new(
            self.length(el, "x", Axis::Horizontal, ctx, 0.0)?,
            self.length(el, "y", Axis::Vertical, ctx, 0.0)?,
            self.length(el, "width", Axis::Horizontal, ctx, iw)?,
            self.length(el, "height", Axis::Vertical, ctx, ih)?,
        );
        Ok(ImageDef {
            rect,
            aspect,
            image,
        })
    }

    fn load_image(&self, href: &str) -> Option<RasterImage> {
        let (mime, data) = if href.trim_start().starts_with("data:") {
            let Some((mime, data)) = resource::parse_data_uri(href) else {
                log::warn!("ignoring malformed image data URI");
                return None;
            };
            (Some(mime), data)
        } else if self.options.unsafe_resources {
            let path = resource::resolve_file_path(href, self.options.base.as_deref())?;
            match std::fs::read(&path) {
                Ok(data) => (None, data),
                Err(err) => {
                    log::warn!("cannot read image {}: {}", path.display(), err);
                    return None;
                }
            }
        } else {
            log::warn!("external image {href:?} skipped; enable unsafe resources to load it");
            return None;
        };
        if mime.as_deref().is_some_and(|m| m.contains("svg")) {
            log::warn!("nested SVG images are not drawn");
            return None;
        }
        let decoded = resource::decode_image(&data, mime.as_deref());
        if decoded.is_none() {
            log::warn!("image data could not be decoded");
        }
        decoded
    }
}

fn font_size(raw: &str, parent: f32) -> f32 {
    style::resolve_font_size(raw.trim(), parent).unwrap_or(parent)
}

/// viewBox/preserveAspectRatio mapping for an element establishing a
/// `w` x `h` viewport. Returns the reference box for percentages inside it.
fn viewport_transform(attrs: &Attributes, w: f32, h: f32) -> (ReferenceBox, Matrix) {
    let aspect = attrs
        .get("preserveAspectRatio")
        .map(|v| AspectRatio::parse(v))
        .unwrap_or_default();
    match attrs.get("viewBox").and_then(|v| geometry::parse_view_box(v)) {
        Some(vb) if w > 0.0 && h > 0.0 => (
            ReferenceBox::new(vb.width, vb.height),
            geometry::view_box_transform(vb, aspect, w, h),
        ),
        _ => (ReferenceBox::new(w, h), Matrix::identity()),
    }
}

/// Intrinsic size, root transform and root reference box.
fn root_geometry(attrs: &Attributes) -> Result<(Size, Matrix, ReferenceBox), ConvertError> {
    let view_box = attrs.get("viewBox").and_then(|v| geometry::parse_view_box(v));
    let absolute = |name: &str| -> Result<Option<f32>, ConvertError> {
        match attrs.get(name) {
            Some(raw) => {
                let length = Length::parse(raw)?;
                if length.unit == LengthUnit::Percent {
                    return Ok(None);
                }
                Ok(Some(length.resolve(Axis::Horizontal, None, style::DEFAULT_FONT_SIZE)?))
            }
            None => Ok(None),
        }
    };
    let (width, height) = match (absolute("width")?, absolute("height")?, view_box) {
        (Some(w), Some(h), _) => (w, h),
        (Some(w), None, Some(vb)) => (w, w * vb.height / vb.width),
        (None, Some(h), Some(vb)) => (h * vb.width / vb.height, h),
        (None, None, Some(vb)) => (vb.width, vb.height),
        (w, h, None) => (w.unwrap_or(DEFAULT_SIZE), h.unwrap_or(DEFAULT_SIZE)),
    };
    let size = Size::new(width.max(0.0), height.max(0.0));
    let (viewport, transform) = viewport_transform(attrs, size.width, size.height);
    Ok((size, transform, viewport))
}

/// Default `xml:space` handling: newlines vanish, tabs become spaces and runs
/// of spaces collapse, including across span boundaries.
fn normalize_whitespace(raw: &str, preserve: bool, last_was_space: &mut bool) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\n' | '\r' if !preserve => {}
            '\n' | '\r' | '\t' | ' ' => {
                if preserve || !*last_was_space {
                    out.push(' ');
                }
                *last_was_space = true;
            }
            other => {
                out.push(other);
                *last_was_space = false;
            }
        }
    }
    out
}

fn trim_trailing_space(node: &mut Node) -> bool {
    for child in node.children.iter_mut().rev() {
        if let NodeKind::Text(TextSpan {
            content: Some(content),
            ..
        }) = &mut child.kind
        {
            let trimmed = content.trim_end_matches(' ').len();
            content.truncate(trimmed);
            return true;
        }
        if matches!(child.kind, NodeKind::Text(_)) && trim_trailing_space(child) {
            return true;
        }
    }
    false
}

fn index_resolved(node: &Node, path: &mut Vec<usize>, index: &mut HashMap<String, Vec<usize>>) {
    if let Some(id) = &node.id {
        index.entry(id.clone()).or_insert_with(|| path.clone());
    }
    // Copies made by `use` are not addressable.
    if matches!(node.kind, NodeKind::Reference) {
        return;
    }
    for (i, child) in node.children.iter().enumerate() {
        path.push(i);
        index_resolved(child, path, index);
        path.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(svg: &str) -> Tree {
        Tree::parse(svg, &BuildOptions::default()).unwrap()
    }

    fn build_err(svg: &str) -> ConvertError {
        Tree::parse(svg, &BuildOptions::default()).unwrap_err()
    }

    #[test]
    fn malformed_markup_is_a_parse_error() {
        assert!(matches!(build_err("<svg><g></svg>"), ConvertError::Parse(_)));
        assert!(matches!(build_err("<html/>"), ConvertError::Parse(_)));
        assert!(matches!(
            Tree::from_data(&[0xff, 0xfe, 0x00], &BuildOptions::default()),
            Err(ConvertError::Parse(_))
        ));
    }

    #[test]
    fn root_size_from_attributes_and_view_box() {
        let t = tree(r#"<svg xmlns="http://www.w3.org/2000/svg" width="2in" height="30mm"/>"#);
        assert_eq!(t.size().width, 192.0);
        assert!((t.size().height - 113.385826).abs() < 1e-3);
        let t = tree(r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 40 20" width="80"/>"#);
        assert_eq!(t.size(), Size::new(80.0, 40.0));
        assert_eq!(t.root().transform().apply(40.0, 20.0), (80.0, 40.0));
        let t = tree(r#"<svg xmlns="http://www.w3.org/2000/svg" width="100%"/>"#);
        assert_eq!(t.size(), Size::new(DEFAULT_SIZE, DEFAULT_SIZE));
    }

    #[test]
    fn use_expands_to_independent_copies() {
        let t = tree(
            r##"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink">
                <defs><rect id="r" width="10" height="5"/></defs>
                <use href="#r" x="3" y="4"/>
                <use xlink:href="#r" transform="scale(2)"/>
            </svg>"##,
        );
        let uses: Vec<&Node> = t.root().children().iter().filter(|n| n.tag() == "use").collect();
        assert_eq!(uses.len(), 2);
        assert!(matches!(uses[0].kind(), NodeKind::Reference));
        assert_eq!(uses[0].transform(), Matrix::translate(3.0, 4.0));
        assert_eq!(uses[1].transform(), Matrix::scale(2.0, 2.0));
        let copy = &uses[0].children()[0];
        assert_eq!(copy.path(), uses[1].children()[0].path());
        assert!(!std::ptr::eq(copy, &uses[1].children()[0]));
        // The index points at the definition, not at a copy.
        assert_eq!(t.lookup("r").unwrap().tag(), "rect");
        assert!(std::ptr::eq(t.lookup("r").unwrap(), &t.root().children()[0].children()[0]));
    }

    #[test]
    fn mutual_use_references_are_rejected() {
        let err = build_err(
            r##"<svg xmlns="http://www.w3.org/2000/svg">
                <use id="a" href="#b"/><use id="b" href="#a"/></svg>"##,
        );
        assert!(matches!(err, ConvertError::Reference(ref m) if m.contains("cycle")));
        let err = build_err(r##"<svg xmlns="http://www.w3.org/2000/svg"><g id="g"><use href="#g"/></g></svg>"##);
        assert!(matches!(err, ConvertError::Reference(_)));
    }

    #[test]
    fn dangling_references_are_rejected() {
        let err = build_err(r##"<svg xmlns="http://www.w3.org/2000/svg"><use href="#nope"/></svg>"##);
        assert!(matches!(err, ConvertError::Reference(_)));
        let err = build_err(r##"<svg xmlns="http://www.w3.org/2000/svg"><rect clip-path="url(#c)"/></svg>"##);
        assert!(matches!(err, ConvertError::Reference(_)));
        let err = build_err(r##"<svg xmlns="http://www.w3.org/2000/svg"><rect fill="url(#g)"/></svg>"##);
        assert!(matches!(err, ConvertError::Reference(_)));
        // A fallback color makes a missing paint server acceptable.
        tree(r##"<svg xmlns="http://www.w3.org/2000/svg"><rect fill="url(#g) red"/></svg>"##);
    }

    #[test]
    fn clip_path_and_gradient_cycles_are_rejected() {
        let err = build_err(
            r##"<svg xmlns="http://www.w3.org/2000/svg">
                <clipPath id="a" clip-path="url(#b)"><rect width="1" height="1"/></clipPath>
                <clipPath id="b"><rect width="1" height="1" clip-path="url(#a)"/></clipPath>
            </svg>"##,
        );
        assert!(matches!(err, ConvertError::Reference(ref m) if m.contains("cycle")));
        let err = build_err(
            r##"<svg xmlns="http://www.w3.org/2000/svg">
                <linearGradient id="a" href="#b"/><linearGradient id="b" href="#a"/>
            </svg>"##,
        );
        assert!(matches!(err, ConvertError::Reference(ref m) if m.contains("cycle")));
    }

    #[test]
    fn expansion_depth_and_node_budget_are_bounded() {
        let mut svg = String::from(r#"<svg xmlns="http://www.w3.org/2000/svg"><rect id="l0" width="1" height="1"/>"#);
        for i in 1..10 {
            svg.push_str(&format!(
                r##"<g id="l{i}"><use href="#l{p}"/><use href="#l{p}"/><use href="#l{p}"/><use href="#l{p}"/></g>"##,
                p = i - 1
            ));
        }
        svg.push_str("</svg>");
        let options = BuildOptions {
            max_nodes: 10_000,
            ..BuildOptions::default()
        };
        assert!(matches!(
            Tree::parse(&svg, &options),
            Err(ConvertError::Reference(ref m)) if m.contains("nodes")
        ));
        let shallow = BuildOptions {
            max_reference_depth: 3,
            ..BuildOptions::default()
        };
        assert!(matches!(
            Tree::parse(&svg, &shallow),
            Err(ConvertError::Reference(ref m)) if m.contains("depth")
        ));
    }

    #[test]
    fn malformed_path_keeps_partial_geometry() {
        let t = tree(r#"<svg xmlns="http://www.w3.org/2000/svg"><path d="M0 0 L10 0 L10"/></svg>"#);
        assert_eq!(t.root().children()[0].path().len(), 2);
    }

    #[test]
    fn shapes_resolve_units_against_viewport() {
        let t = tree(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="100">
                <rect x="10%" width="50%" height="1in" font-size="10" rx="1em"/></svg>"#,
        );
        let rect = &t.root().children()[0];
        let bbox = rect.bounding_box().unwrap();
        assert_eq!(bbox, Rect::new(20.0, 0.0, 100.0, 96.0));
        assert!(matches!(rect.kind(), NodeKind::Shape(ShapeKind::Rect)));
        assert!(matches!(
            Tree::parse(
                r#"<svg xmlns="http://www.w3.org/2000/svg"><circle r="3parsecs"/></svg>"#,
                &BuildOptions::default()
            ),
            Err(ConvertError::Unit(_))
        ));
    }

    #[test]
    fn style_attribute_and_sheet_override_presentation_attributes() {
        let t = tree(
            r#"<svg xmlns="http://www.w3.org/2000/svg">
                <style>.c { stroke: blue } rect { fill: green }</style>
                <rect class="c" fill="red" stroke="red" style="fill: yellow" x="1" width="1" height="1"/>
            </svg>"#,
        );
        let rect = &t.root().children()[0];
        let style = rect
            .computed_style(&StyleState::default(), ReferenceBox::new(100.0, 100.0))
            .unwrap();
        assert_eq!(style.fill, Paint::Color(Color::from_rgb8(255, 255, 0), 1.0));
        assert_eq!(style.stroke, Paint::Color(Color::from_rgb8(0, 0, 255), 1.0));
        // x is not a presentation property and stays untouched.
        assert_eq!(rect.attribute("x"), Some("1"));
    }

    #[test]
    fn gradient_href_inherits_stops_and_units() {
        let t = tree(
            r##"<svg xmlns="http://www.w3.org/2000/svg">
                <linearGradient id="base" gradientUnits="userSpaceOnUse" x2="50">
                    <stop offset="0" stop-color="red"/>
                    <stop offset="150%" stop-color="blue" stop-opacity="0.5"/>
                </linearGradient>
                <linearGradient id="child" href="#base" y2="10"/>
            </svg>"##,
        );
        let NodeKind::PaintServer(def) = t.lookup("child").unwrap().kind() else {
            panic!("expected a gradient");
        };
        assert_eq!(def.units, Units::UserSpaceOnUse);
        assert_eq!(def.stops.len(), 2);
        assert_eq!(def.stops[1].offset, 1.0);
        assert_eq!(def.stops[1].opacity, 0.5);
        let GradientKind::Linear { x2, y2, .. } = &def.kind else {
            panic!("expected a linear gradient");
        };
        assert_eq!(*x2, Length::new(50.0, LengthUnit::None));
        assert_eq!(*y2, Length::new(10.0, LengthUnit::None));
    }

    #[test]
    fn unknown_elements_are_kept_as_unknown() {
        let t = tree(r#"<svg xmlns="http://www.w3.org/2000/svg"><filter id="f"><feBlend/></filter><title>x</title></svg>"#);
        assert_eq!(t.root().children().len(), 1);
        assert!(matches!(t.root().children()[0].kind(), NodeKind::Unknown(tag) if tag == "filter"));
        assert!(t.root().children()[0].children().is_empty());
    }

    #[test]
    fn text_whitespace_is_normalized_across_spans() {
        let t = tree(
            "<svg xmlns=\"http://www.w3.org/2000/svg\"><text x=\"5\" y=\"6\">\n  Hello\t <tspan dx=\"2\"> big </tspan>  world  \n</text></svg>",
        );
        let text = &t.root().children()[0];
        let NodeKind::Text(span) = text.kind() else {
            panic!("expected text");
        };
        assert_eq!(span.x, Some(Length::new(5.0, LengthUnit::None)));
        let mut runs = Vec::new();
        fn collect(node: &Node, runs: &mut Vec<String>) {
            if let NodeKind::Text(TextSpan {
                content: Some(c), ..
            }) = node.kind()
            {
                runs.push(c.clone());
            }
            for child in node.children() {
                collect(child, runs);
            }
        }
        collect(text, &mut runs);
        assert_eq!(runs, ["Hello ", "big ", "world"]);
    }

    #[test]
    fn symbols_are_instantiated_with_their_view_box() {
        let t = tree(
            r##"<svg xmlns="http://www.w3.org/2000/svg">
                <symbol id="s" viewBox="0 0 10 10"><rect width="10" height="10"/></symbol>
                <use href="#s" width="50" height="50"/>
            </svg>"##,
        );
        assert!(matches!(t.lookup("s").unwrap().kind(), NodeKind::Definitions));
        let instance = &t.root().children()[1].children()[0];
        assert!(matches!(instance.kind(), NodeKind::Group));
        assert_eq!(instance.transform().apply(10.0, 10.0), (50.0, 50.0));
    }

    #[test]
    fn external_images_need_unsafe_flag() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("dot.png");
        image::RgbaImage::from_pixel(3, 2, image::Rgba([0, 0, 255, 255]))
            .save(&png)
            .unwrap();
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg"><image href="dot.png"/></svg>"#;
        let mut options = BuildOptions {
            base: Some(dir.path().to_path_buf()),
            ..BuildOptions::default()
        };
        let t = Tree::parse(svg, &options).unwrap();
        let NodeKind::Image(def) = t.root().children()[0].kind() else {
            panic!("expected image");
        };
        assert!(def.image.is_none());
        options.unsafe_resources = true;
        let t = Tree::parse(svg, &options).unwrap();
        let NodeKind::Image(def) = t.root().children()[0].kind() else {
            panic!("expected image");
        };
        assert_eq!(def.rect, Rect::new(0.0, 0.0, 3.0, 2.0));
        assert!(def.image.is_some());
    }

    #[test]
    fn definitions_inside_unsupported_containers_are_indexed() {
        let t = tree(
            r##"<svg xmlns="http://www.w3.org/2000/svg">
                <pattern id="p" width="4" height="4">
                    <linearGradient id="g"><stop offset="0" stop-color="red"/></linearGradient>
                    <g><clipPath id="c"><rect width="2" height="2"/></clipPath><rect width="4" height="4"/></g>
                    <rect width="4" height="4"/>
                </pattern>
                <marker id="m"><radialGradient id="r"/></marker>
            </svg>"##,
        );
        assert!(matches!(t.lookup("g").unwrap().kind(), NodeKind::PaintServer(_)));
        assert!(matches!(t.lookup("c").unwrap().kind(), NodeKind::ClipDef(_)));
        assert!(matches!(t.lookup("r").unwrap().kind(), NodeKind::PaintServer(_)));
        let pattern = t.lookup("p").unwrap();
        assert!(matches!(pattern.kind(), NodeKind::Unknown(tag) if tag == "pattern"));
        assert_eq!(pattern.children().len(), 2);
        assert!(pattern.children().iter().all(|c| !matches!(c.kind(), NodeKind::Shape(_))));
    }

    #[test]
    fn reference_guard_tracks_depth() {
        let mut guard = ReferenceGuard::new(2);
        guard.push("root");
        guard.enter_reference("a").unwrap();
        assert!(guard.enter_reference("root").is_err());
        guard.enter_reference("b").unwrap();
        assert!(guard.enter_reference("c").is_err());
        guard.leave();
        guard.enter_reference("c").unwrap();
    }
}

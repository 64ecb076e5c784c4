use crate::types::Rect;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    /// Path data stopped parsing at `offset`; `partial` holds every segment
    /// produced by the commands before it.
    #[error("malformed path data at byte {offset}: {message}")]
    MalformedPath {
        offset: usize,
        message: String,
        partial: Vec<PathSeg>,
    },
    #[error("malformed transform list {0:?}")]
    MalformedTransform(String),
    #[error("malformed point list {0:?}")]
    MalformedPoints(String),
    #[error("transform is not invertible")]
    SingularMatrix,
}

/// Canonical path primitive. Every path and shape is reduced to these.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathSeg {
    MoveTo(f32, f32),
    LineTo(f32, f32),
    CurveTo(f32, f32, f32, f32, f32, f32),
    Close,
}

/// 2x3 affine matrix `[a c e; b d f]`, mapping `(x, y)` to
/// `(a*x + c*y + e, b*x + d*y + f)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Default for Matrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl Matrix {
    pub fn new(a: f32, b: f32, c: f32, d: f32, e: f32, f: f32) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, 0.0, 0.0)
    }

    pub fn translate(tx: f32, ty: f32) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    pub fn scale(sx: f32, sy: f32) -> Self {
        Self::new(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    pub fn rotate(deg: f32) -> Self {
        let rad = deg.to_radians();
        let s = libm::sinf(rad);
        let c = libm::cosf(rad);
        Self::new(c, s, -s, c, 0.0, 0.0)
    }

    pub fn skew_x(deg: f32) -> Self {
        Self::new(1.0, 0.0, libm::tanf(deg.to_radians()), 1.0, 0.0, 0.0)
    }

    pub fn skew_y(deg: f32) -> Self {
        Self::new(1.0, libm::tanf(deg.to_radians()), 0.0, 1.0, 0.0, 0.0)
    }

    /// `[self] * [other]`: `other` is applied first, then `self`.
    pub fn mul(self, other: Self) -> Self {
        Self {
            a: self.a * other.a + self.c * other.b,
            b: self.b * other.a + self.d * other.b,
            c: self.a * other.c + self.c * other.d,
            d: self.b * other.c + self.d * other.d,
            e: self.a * other.e + self.c * other.f + self.e,
            f: self.b * other.e + self.d * other.f + self.f,
        }
    }

    pub fn determinant(self) -> f32 {
        self.a * self.d - self.b * self.c
    }

    pub fn invert(self) -> Result<Matrix, GeometryError> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return Err(GeometryError::SingularMatrix);
        }
        let inv = 1.0 / det;
        Ok(Self {
            a: self.d * inv,
            b: -self.b * inv,
            c: -self.c * inv,
            d: self.a * inv,
            e: (self.c * self.f - self.d * self.e) * inv,
            f: (self.b * self.e - self.a * self.f) * inv,
        })
    }

    pub fn apply(self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    /// Uniform scale estimate, sqrt(|det|). Used to keep hairline widths visible.
    pub fn scale_factor(self) -> f32 {
        libm::sqrtf(self.determinant().abs()).max(0.0)
    }

    pub fn is_identity(self) -> bool {
        self == Self::identity()
    }

    /// Axis-aligned bounds of `rect` after mapping its four corners.
    pub fn map_rect(self, rect: Rect) -> Rect {
        let corners = [
            self.apply(rect.x, rect.y),
            self.apply(rect.right(), rect.y),
            self.apply(rect.x, rect.bottom()),
            self.apply(rect.right(), rect.bottom()),
        ];
        let mut out = Rect::from_ltrb(corners[0].0, corners[0].1, corners[0].0, corners[0].1);
        for (x, y) in &corners[1..] {
            out = out.union(&Rect::from_ltrb(*x, *y, *x, *y));
        }
        out
    }
}

/// Local coordinates expressed in the parent's frame: the local transform is
/// applied first, then the parent's.
pub fn compose(parent: Matrix, local: Matrix) -> Matrix {
    parent.mul(local)
}

pub fn invert(transform: Matrix) -> Result<Matrix, GeometryError> {
    transform.invert()
}

pub fn transform_path(segs: &[PathSeg], m: Matrix) -> Vec<PathSeg> {
    segs.iter()
        .map(|seg| match *seg {
            PathSeg::MoveTo(x, y) => {
                let (x, y) = m.apply(x, y);
                PathSeg::MoveTo(x, y)
            }
            PathSeg::LineTo(x, y) => {
                let (x, y) = m.apply(x, y);
                PathSeg::LineTo(x, y)
            }
            PathSeg::CurveTo(x1, y1, x2, y2, x, y) => {
                let (x1, y1) = m.apply(x1, y1);
                let (x2, y2) = m.apply(x2, y2);
                let (x, y) = m.apply(x, y);
                PathSeg::CurveTo(x1, y1, x2, y2, x, y)
            }
            PathSeg::Close => PathSeg::Close,
        })
        .collect()
}

/// Tight-enough bounds: line endpoints plus samples along each curve.
pub fn path_bbox(segs: &[PathSeg]) -> Option<Rect> {
    let mut min_x = f32::INFINITY;
    let mut min_y = f32::INFINITY;
    let mut max_x = f32::NEG_INFINITY;
    let mut max_y = f32::NEG_INFINITY;
    let mut add = |x: f32, y: f32| {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    };
    let mut current = (0.0f32, 0.0f32);
    for seg in segs {
        match *seg {
            PathSeg::MoveTo(x, y) | PathSeg::LineTo(x, y) => {
                add(x, y);
                current = (x, y);
            }
            PathSeg::CurveTo(x1, y1, x2, y2, x, y) => {
                for step in 1..=16 {
                    let t = step as f32 / 16.0;
                    let (px, py) = cubic_point(current, (x1, y1), (x2, y2), (x, y), t);
                    add(px, py);
                }
                current = (x, y);
            }
            PathSeg::Close => {}
        }
    }
    if min_x.is_finite() && min_y.is_finite() {
        Some(Rect::from_ltrb(min_x, min_y, max_x, max_y))
    } else {
        None
    }
}

pub(crate) fn cubic_point(
    p0: (f32, f32),
    p1: (f32, f32),
    p2: (f32, f32),
    p3: (f32, f32),
    t: f32,
) -> (f32, f32) {
    let mt = 1.0 - t;
    let a = mt * mt * mt;
    let b = 3.0 * mt * mt * t;
    let c = 3.0 * mt * t * t;
    let d = t * t * t;
    (
        a * p0.0 + b * p1.0 + c * p2.0 + d * p3.0,
        a * p0.1 + b * p1.1 + c * p2.1 + d * p3.1,
    )
}

// ---- viewports ----

pub fn parse_view_box(input: &str) -> Option<Rect> {
    let numbers = parse_number_list(input)?;
    let [min_x, min_y, w, h] = numbers.as_slice() else {
        return None;
    };
    if *w <= 0.0 || *h <= 0.0 {
        return None;
    }
    Some(Rect::new(*min_x, *min_y, *w, *h))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Min,
    Mid,
    Max,
}

impl Align {
    fn offset(self, free: f32) -> f32 {
        match self {
            Align::Min => 0.0,
            Align::Mid => free / 2.0,
            Align::Max => free,
        }
    }
}

/// `preserveAspectRatio`. `align == None` stretches non-uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AspectRatio {
    pub align: Option<(Align, Align)>,
    pub slice: bool,
}

impl Default for AspectRatio {
    fn default() -> Self {
        Self {
            align: Some((Align::Mid, Align::Mid)),
            slice: false,
        }
    }
}

impl AspectRatio {
    pub fn parse(input: &str) -> AspectRatio {
        let mut parts = input.split_whitespace();
        let mut first = parts.next().unwrap_or("xMidYMid");
        if first == "defer" {
            first = parts.next().unwrap_or("xMidYMid");
        }
        let align = if first == "none" {
            None
        } else {
            let axis = |s: &str| match s {
                "Min" => Some(Align::Min),
                "Mid" => Some(Align::Mid),
                "Max" => Some(Align::Max),
                _ => None,
            };
            match (first.get(1..4).and_then(axis), first.get(5..8).and_then(axis)) {
                (Some(x), Some(y)) if first.starts_with('x') && first.get(4..5) == Some("Y") => {
                    Some((x, y))
                }
                _ => Some((Align::Mid, Align::Mid)),
            }
        };
        let slice = parts.next() == Some("slice");
        AspectRatio { align, slice }
    }
}

/// Maps `view_box` into a `width` x `height` viewport at the origin.
pub fn view_box_transform(view_box: Rect, aspect: AspectRatio, width: f32, height: f32) -> Matrix {
    let sx = width / view_box.width;
    let sy = height / view_box.height;
    match aspect.align {
        None => Matrix::scale(sx, sy).mul(Matrix::translate(-view_box.x, -view_box.y)),
        Some((ax, ay)) => {
            let s = if aspect.slice { sx.max(sy) } else { sx.min(sy) };
            let tx = ax.offset(width - view_box.width * s) - view_box.x * s;
            let ty = ay.offset(height - view_box.height * s) - view_box.y * s;
            Matrix::translate(tx, ty).mul(Matrix::scale(s, s))
        }
    }
}

// ---- transform lists ----

pub fn parse_transform(input: &str) -> Result<Matrix, GeometryError> {
    let malformed = || GeometryError::MalformedTransform(input.to_string());
    let mut out = Matrix::identity();
    let mut s = input.trim();

    while !s.is_empty() {
        let open = s.find('(').ok_or_else(malformed)?;
        let name = s[..open].trim();
        let close = s[open + 1..].find(')').ok_or_else(malformed)?;
        let args = parse_number_list(&s[open + 1..open + 1 + close]).ok_or_else(malformed)?;

        let m = match (name, args.as_slice()) {
            ("translate", [tx]) => Matrix::translate(*tx, 0.0),
            ("translate", [tx, ty]) => Matrix::translate(*tx, *ty),
            ("scale", [s]) => Matrix::scale(*s, *s),
            ("scale", [sx, sy]) => Matrix::scale(*sx, *sy),
            ("rotate", [a]) => Matrix::rotate(*a),
            ("rotate", [a, cx, cy]) => Matrix::translate(*cx, *cy)
                .mul(Matrix::rotate(*a))
                .mul(Matrix::translate(-cx, -cy)),
            ("skewX", [a]) => Matrix::skew_x(*a),
            ("skewY", [a]) => Matrix::skew_y(*a),
            ("matrix", [a, b, c, d, e, f]) => Matrix::new(*a, *b, *c, *d, *e, *f),
            _ => return Err(malformed()),
        };

        out = out.mul(m);
        s = s[open + 1 + close + 1..].trim_start_matches(|c: char| c == ',' || c.is_whitespace());
    }

    Ok(out)
}

fn parse_number_list(input: &str) -> Option<Vec<f32>> {
    let mut parser = PathParser::new(input);
    let mut out = Vec::new();
    loop {
        parser.skip_ws();
        if parser.at_end() {
            return Some(out);
        }
        out.push(parser.next_number()?);
    }
}

/// `points` attribute of polyline/polygon. A trailing odd coordinate is
/// dropped, matching the "render up to the error" rule for shapes.
pub fn parse_points(input: &str) -> Result<Vec<(f32, f32)>, GeometryError> {
    let numbers =
        parse_number_list(input).ok_or_else(|| GeometryError::MalformedPoints(input.to_string()))?;
    if numbers.len() % 2 == 1 {
        log::warn!("odd coordinate count in points list; ignoring the last value");
    }
    Ok(numbers.chunks_exact(2).map(|p| (p[0], p[1])).collect())
}

// ---- shapes ----

/// Rectangle with optional rounded corners. Radii are clamped to half the
/// side lengths; a zero-area rect yields no geometry.
pub fn rect_path(x: f32, y: f32, w: f32, h: f32, rx: f32, ry: f32) -> Vec<PathSeg> {
    if w <= 0.0 || h <= 0.0 {
        return Vec::new();
    }
    let rx = rx.clamp(0.0, w / 2.0);
    let ry = ry.clamp(0.0, h / 2.0);
    if rx == 0.0 || ry == 0.0 {
        return vec![
            PathSeg::MoveTo(x, y),
            PathSeg::LineTo(x + w, y),
            PathSeg::LineTo(x + w, y + h),
            PathSeg::LineTo(x, y + h),
            PathSeg::Close,
        ];
    }
    let ox = rx * KAPPA;
    let oy = ry * KAPPA;
    let (r, b) = (x + w, y + h);
    vec![
        PathSeg::MoveTo(x + rx, y),
        PathSeg::LineTo(r - rx, y),
        PathSeg::CurveTo(r - rx + ox, y, r, y + ry - oy, r, y + ry),
        PathSeg::LineTo(r, b - ry),
        PathSeg::CurveTo(r, b - ry + oy, r - rx + ox, b, r - rx, b),
        PathSeg::LineTo(x + rx, b),
        PathSeg::CurveTo(x + rx - ox, b, x, b - ry + oy, x, b - ry),
        PathSeg::LineTo(x, y + ry),
        PathSeg::CurveTo(x, y + ry - oy, x + rx - ox, y, x + rx, y),
        PathSeg::Close,
    ]
}

const KAPPA: f32 = 0.552_284_75;

pub fn ellipse_path(cx: f32, cy: f32, rx: f32, ry: f32) -> Vec<PathSeg> {
    if rx <= 0.0 || ry <= 0.0 {
        return Vec::new();
    }
    let ox = rx * KAPPA;
    let oy = ry * KAPPA;
    vec![
        PathSeg::MoveTo(cx + rx, cy),
        PathSeg::CurveTo(cx + rx, cy + oy, cx + ox, cy + ry, cx, cy + ry),
        PathSeg::CurveTo(cx - ox, cy + ry, cx - rx, cy + oy, cx - rx, cy),
        PathSeg::CurveTo(cx - rx, cy - oy, cx - ox, cy - ry, cx, cy - ry),
        PathSeg::CurveTo(cx + ox, cy - ry, cx + rx, cy - oy, cx + rx, cy),
        PathSeg::Close,
    ]
}

pub fn line_path(x1: f32, y1: f32, x2: f32, y2: f32) -> Vec<PathSeg> {
    vec![PathSeg::MoveTo(x1, y1), PathSeg::LineTo(x2, y2)]
}

pub fn poly_path(points: &[(f32, f32)], close: bool) -> Vec<PathSeg> {
    let mut out = Vec::with_capacity(points.len() + 1);
    for (i, (x, y)) in points.iter().enumerate() {
        if i == 0 {
            out.push(PathSeg::MoveTo(*x, *y));
        } else {
            out.push(PathSeg::LineTo(*x, *y));
        }
    }
    if close && !out.is_empty() {
        out.push(PathSeg::Close);
    }
    out
}

// ---- path data ----

/// Parses SVG path data into canonical segments. On a grammar error the
/// segments parsed so far travel inside the error.
pub fn parse_path(d: &str) -> Result<Vec<PathSeg>, GeometryError> {
    let mut p = PathParser::new(d);
    let mut out: Vec<PathSeg> = Vec::new();
    let mut current = (0.0f32, 0.0f32);
    let mut subpath_start = (0.0f32, 0.0f32);
    let mut last_cubic_ctrl: Option<(f32, f32)> = None;
    let mut last_quad_ctrl: Option<(f32, f32)> = None;
    let mut prev: Option<u8> = None;

    loop {
        p.skip_ws();
        if p.at_end() {
            break;
        }
        let command_start = p.i;
        let segs_before = out.len();
        let cmd = match p.peek() {
            Some(b) if b.is_ascii_alphabetic() => {
                p.i += 1;
                b
            }
            _ => match prev {
                // Numbers after a moveto are implicit linetos.
                Some(b'M') => b'L',
                Some(b'm') => b'l',
                Some(b'Z') | Some(b'z') | None => {
                    return Err(p.error(command_start, "expected a command letter", out));
                }
                Some(c) => c,
            },
        };
        if prev.is_none() && !matches!(cmd, b'M' | b'm') {
            return Err(p.error(command_start, "path data must start with a moveto", out));
        }
        let relative = cmd.is_ascii_lowercase();
        let (ox, oy) = if relative { current } else { (0.0, 0.0) };

        let step: Option<()> = (|| {
            match cmd.to_ascii_uppercase() {
                b'M' => {
                    let (x, y) = p.next_pair()?;
                    current = (ox + x, oy + y);
                    subpath_start = current;
                    out.push(PathSeg::MoveTo(current.0, current.1));
                    last_cubic_ctrl = None;
                    last_quad_ctrl = None;
                }
                b'L' => {
                    let (x, y) = p.next_pair()?;
                    current = (ox + x, oy + y);
                    out.push(PathSeg::LineTo(current.0, current.1));
                    last_cubic_ctrl = None;
                    last_quad_ctrl = None;
                }
                b'H' => {
                    let x = p.next_number()?;
                    current.0 = ox + x;
                    out.push(PathSeg::LineTo(current.0, current.1));
                    last_cubic_ctrl = None;
                    last_quad_ctrl = None;
                }
                b'V' => {
                    let y = p.next_number()?;
                    current.1 = if relative { current.1 + y } else { y };
                    out.push(PathSeg::LineTo(current.0, current.1));
                    last_cubic_ctrl = None;
                    last_quad_ctrl = None;
                }
                b'C' => {
                    let (x1, y1) = p.next_pair()?;
                    let (x2, y2) = p.next_pair()?;
                    let (x, y) = p.next_pair()?;
                    let c1 = (ox + x1, oy + y1);
                    let c2 = (ox + x2, oy + y2);
                    current = (ox + x, oy + y);
                    out.push(PathSeg::CurveTo(c1.0, c1.1, c2.0, c2.1, current.0, current.1));
                    last_cubic_ctrl = Some(c2);
                    last_quad_ctrl = None;
                }
                b'S' => {
                    let (x2, y2) = p.next_pair()?;
                    let (x, y) = p.next_pair()?;
                    let c1 = reflect(last_cubic_ctrl, current);
                    let c2 = (ox + x2, oy + y2);
                    current = (ox + x, oy + y);
                    out.push(PathSeg::CurveTo(c1.0, c1.1, c2.0, c2.1, current.0, current.1));
                    last_cubic_ctrl = Some(c2);
                    last_quad_ctrl = None;
                }
                b'Q' => {
                    let (x1, y1) = p.next_pair()?;
                    let (x, y) = p.next_pair()?;
                    let q = (ox + x1, oy + y1);
                    let end = (ox + x, oy + y);
                    out.push(quad_to_cubic(current, q, end));
                    current = end;
                    last_quad_ctrl = Some(q);
                    last_cubic_ctrl = None;
                }
                b'T' => {
                    let (x, y) = p.next_pair()?;
                    let q = reflect(last_quad_ctrl, current);
                    let end = (ox + x, oy + y);
                    out.push(quad_to_cubic(current, q, end));
                    current = end;
                    last_quad_ctrl = Some(q);
                    last_cubic_ctrl = None;
                }
                b'A' => {
                    let rx = p.next_number()?;
                    let ry = p.next_number()?;
                    let rotation = p.next_number()?;
                    let large_arc = p.next_flag()?;
                    let sweep = p.next_flag()?;
                    let (x, y) = p.next_pair()?;
                    let end = (ox + x, oy + y);
                    out.extend(arc_to_cubics(current, rx, ry, rotation, large_arc, sweep, end));
                    current = end;
                    last_cubic_ctrl = None;
                    last_quad_ctrl = None;
                }
                b'Z' => {
                    out.push(PathSeg::Close);
                    current = subpath_start;
                    last_cubic_ctrl = None;
                    last_quad_ctrl = None;
                }
                _ => return None,
            }
            Some(())
        })();

        if step.is_none() {
            out.truncate(segs_before);
            let message = if cmd.is_ascii_alphabetic() && !b"MmLlHhVvCcSsQqTtAaZz".contains(&cmd) {
                format!("unknown command {:?}", cmd as char)
            } else {
                format!("incomplete arguments for {:?}", cmd as char)
            };
            return Err(p.error(command_start, &message, out));
        }
        prev = Some(cmd);
    }

    Ok(out)
}

fn reflect(ctrl: Option<(f32, f32)>, current: (f32, f32)) -> (f32, f32) {
    match ctrl {
        Some((cx, cy)) => (2.0 * current.0 - cx, 2.0 * current.1 - cy),
        None => current,
    }
}

fn quad_to_cubic(p0: (f32, f32), q: (f32, f32), p2: (f32, f32)) -> PathSeg {
    let c1x = p0.0 + (2.0 / 3.0) * (q.0 - p0.0);
    let c1y = p0.1 + (2.0 / 3.0) * (q.1 - p0.1);
    let c2x = p2.0 + (2.0 / 3.0) * (q.0 - p2.0);
    let c2y = p2.1 + (2.0 / 3.0) * (q.1 - p2.1);
    PathSeg::CurveTo(c1x, c1y, c2x, c2y, p2.0, p2.1)
}

/// Maximum radial deviation, in user units, of the cubic approximation from
/// the true arc.
pub const ARC_TOLERANCE: f32 = 0.01;

const MAX_ARC_SEGMENTS: u32 = 64;

/// Radial error of the standard cubic approximation of a circular arc of
/// radius `r` spanning `theta` radians.
fn arc_error(r: f32, theta: f32) -> f32 {
    let s = libm::sinf(theta / 4.0);
    let c = libm::cosf(theta / 4.0);
    r * 2.0 * s.powi(6) / (27.0 * c * c)
}

/// Elliptical arc in endpoint parameterization to cubic segments, following
/// the center-parameterization conversion from the SVG implementation notes.
pub fn arc_to_cubics(
    from: (f32, f32),
    rx: f32,
    ry: f32,
    x_axis_rotation_deg: f32,
    large_arc: bool,
    sweep: bool,
    to: (f32, f32),
) -> Vec<PathSeg> {
    use std::f32::consts::PI;

    let (x0, y0) = from;
    let (x1, y1) = to;
    let mut rx = rx.abs();
    let mut ry = ry.abs();
    if x0 == x1 && y0 == y1 {
        return Vec::new();
    }
    if rx == 0.0 || ry == 0.0 {
        return vec![PathSeg::LineTo(x1, y1)];
    }

    let phi = x_axis_rotation_deg.to_radians();
    let sin_phi = libm::sinf(phi);
    let cos_phi = libm::cosf(phi);

    let dx2 = (x0 - x1) / 2.0;
    let dy2 = (y0 - y1) / 2.0;
    let x1p = cos_phi * dx2 + sin_phi * dy2;
    let y1p = -sin_phi * dx2 + cos_phi * dy2;

    // Scale radii up when they cannot span the endpoints.
    let lambda = (x1p * x1p) / (rx * rx) + (y1p * y1p) / (ry * ry);
    if lambda > 1.0 {
        let s = libm::sqrtf(lambda);
        rx *= s;
        ry *= s;
    }

    let rx2 = rx * rx;
    let ry2 = ry * ry;
    let num = rx2 * ry2 - rx2 * y1p * y1p - ry2 * x1p * x1p;
    let den = rx2 * y1p * y1p + ry2 * x1p * x1p;
    let mut coef = 0.0;
    if den != 0.0 {
        let sign = if large_arc == sweep { -1.0 } else { 1.0 };
        coef = sign * libm::sqrtf((num / den).max(0.0));
    }
    let cxp = coef * (rx * y1p / ry);
    let cyp = coef * (-ry * x1p / rx);

    let cx = cos_phi * cxp - sin_phi * cyp + (x0 + x1) / 2.0;
    let cy = sin_phi * cxp + cos_phi * cyp + (y0 + y1) / 2.0;

    fn angle(ux: f32, uy: f32, vx: f32, vy: f32) -> f32 {
        libm::atan2f(ux * vy - uy * vx, ux * vx + uy * vy)
    }

    let ux = (x1p - cxp) / rx;
    let uy = (y1p - cyp) / ry;
    let vx = (-x1p - cxp) / rx;
    let vy = (-y1p - cyp) / ry;

    let mut theta = angle(1.0, 0.0, ux, uy);
    let mut dtheta = angle(ux, uy, vx, vy);
    if !sweep && dtheta > 0.0 {
        dtheta -= 2.0 * PI;
    } else if sweep && dtheta < 0.0 {
        dtheta += 2.0 * PI;
    }

    let radius = rx.max(ry);
    let mut count = (libm::ceilf(dtheta.abs() / (PI / 2.0)) as u32).max(1);
    while count < MAX_ARC_SEGMENTS && arc_error(radius, dtheta.abs() / count as f32) > ARC_TOLERANCE
    {
        count += 1;
    }
    let delta = dtheta / count as f32;

    let map = |x: f32, y: f32| -> (f32, f32) {
        let x = rx * x;
        let y = ry * y;
        (cx + cos_phi * x - sin_phi * y, cy + sin_phi * x + cos_phi * y)
    };

    let mut out = Vec::with_capacity(count as usize);
    for i in 0..count {
        let t1 = theta;
        let t2 = theta + delta;
        let k = (4.0 / 3.0) * libm::tanf(delta / 4.0);
        let (s1, c1) = (libm::sinf(t1), libm::cosf(t1));
        let (s2, c2) = (libm::sinf(t2), libm::cosf(t2));
        let (c1x, c1y) = map(c1 - k * s1, s1 + k * c1);
        let (c2x, c2y) = map(c2 + k * s2, s2 - k * c2);
        // Land exactly on the requested endpoint.
        let (ex, ey) = if i + 1 == count { to } else { map(c2, s2) };
        out.push(PathSeg::CurveTo(c1x, c1y, c2x, c2y, ex, ey));
        theta = t2;
    }
    out
}

struct PathParser<'a> {
    input: &'a str,
    bytes: &'a [u8],
    i: usize,
}

impl<'a> PathParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            i: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.i >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.i).copied()
    }

    fn skip_ws(&mut self) {
        while let Some(b) = self.peek() {
            if b == b' ' || b == b'\n' || b == b'\r' || b == b'\t' || b == b',' {
                self.i += 1;
            } else {
                break;
            }
        }
    }

    fn error(&self, offset: usize, message: &str, partial: Vec<PathSeg>) -> GeometryError {
        GeometryError::MalformedPath {
            offset,
            message: message.to_string(),
            partial,
        }
    }

    fn next_number(&mut self) -> Option<f32> {
        self.skip_ws();
        // The cursor only ever steps over ASCII, so this is a char boundary.
        let rest = self.input.get(self.i..)?;
        let (value, consumed) = crate::units::split_number(rest)?;
        self.i += consumed;
        Some(value)
    }

    /// Arc flags may be packed without separators (`a1 1 0 00 10 10`).
    fn next_flag(&mut self) -> Option<bool> {
        self.skip_ws();
        match self.peek()? {
            b'0' => {
                self.i += 1;
                Some(false)
            }
            b'1' => {
                self.i += 1;
                Some(true)
            }
            _ => None,
        }
    }

    fn next_pair(&mut self) -> Option<(f32, f32)> {
        let x = self.next_number()?;
        let y = self.next_number()?;
        Some((x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn absolute_relative_and_implicit_commands() {
        let segs = parse_path("M10 10 20 10 l 0 10 h -10 z m 5 5 v 2").unwrap();
        assert_eq!(
            segs,
            vec![
                PathSeg::MoveTo(10.0, 10.0),
                PathSeg::LineTo(20.0, 10.0),
                PathSeg::LineTo(20.0, 20.0),
                PathSeg::LineTo(10.0, 20.0),
                PathSeg::Close,
                PathSeg::MoveTo(15.0, 15.0),
                PathSeg::LineTo(15.0, 17.0),
            ]
        );
    }

    #[test]
    fn smooth_curves_reflect_previous_control() {
        let segs = parse_path("M0 0 C 0 10 10 10 10 0 S 20 -10 20 0").unwrap();
        match segs[2] {
            PathSeg::CurveTo(x1, y1, ..) => {
                assert!(close(x1, 10.0) && close(y1, -10.0));
            }
            other => panic!("unexpected segment {other:?}"),
        }
        let quads = parse_path("M0 0 Q 5 10 10 0 T 20 0").unwrap();
        assert_eq!(quads.len(), 3);
    }

    #[test]
    fn malformed_path_keeps_valid_prefix() {
        let err = parse_path("M0 0 L10 0 L 10").unwrap_err();
        match err {
            GeometryError::MalformedPath {
                partial, offset, ..
            } => {
                assert_eq!(
                    partial,
                    vec![PathSeg::MoveTo(0.0, 0.0), PathSeg::LineTo(10.0, 0.0)]
                );
                assert_eq!(offset, 11);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(matches!(
            parse_path("L 10 10"),
            Err(GeometryError::MalformedPath { ref partial, .. }) if partial.is_empty()
        ));
        assert!(parse_path("M0 0 X 5").is_err());
    }

    #[test]
    fn long_paths_and_point_lists_parse_completely() {
        let mut data = String::from("M0 0");
        for i in 0..20_000 {
            data.push_str(&format!(" L{} {}.5", i % 97, i % 13));
        }
        let segs = parse_path(&data).unwrap();
        assert_eq!(segs.len(), 20_001);
        assert_eq!(segs[20_000], PathSeg::LineTo((19_999 % 97) as f32, 5.5));

        let points: String = (0..30_000).map(|i| format!("{i},{i} ")).collect();
        assert_eq!(parse_points(&points).unwrap().len(), 30_000);

        assert!(parse_path("M0 0 L1 €").is_err());
        assert!(parse_points("1 2 ü").is_err());
    }

    #[test]
    fn arc_approximation_stays_within_tolerance() {
        let segs = parse_path("M 10 0 A 10 10 0 0 1 -10 0").unwrap();
        assert!(segs.len() >= 3);
        let mut current = (10.0f32, 0.0f32);
        for seg in &segs[1..] {
            let PathSeg::CurveTo(x1, y1, x2, y2, x, y) = *seg else {
                panic!("arc produced {seg:?}");
            };
            for step in 0..=10 {
                let t = step as f32 / 10.0;
                let (px, py) = cubic_point(current, (x1, y1), (x2, y2), (x, y), t);
                let r = (px * px + py * py).sqrt();
                assert!((r - 10.0).abs() < ARC_TOLERANCE, "radius {r} at t={t}");
            }
            current = (x, y);
        }
        assert!(close(current.0, -10.0) && close(current.1, 0.0));
    }

    #[test]
    fn packed_arc_flags() {
        let segs = parse_path("M0 0a5 5 0 1010 0").unwrap();
        assert!(matches!(segs.last(), Some(PathSeg::CurveTo(.., x, y)) if close(*x, 10.0) && close(*y, 0.0)));
    }

    #[test]
    fn translate_then_scale_composes_parent_first() {
        let parent = parse_transform("translate(10, 20)").unwrap();
        let local = parse_transform("scale(2)").unwrap();
        let m = compose(parent, local);
        assert_eq!(m.apply(1.0, 1.0), (12.0, 22.0));
        let reversed = compose(local, parent);
        assert_eq!(reversed.apply(1.0, 1.0), (22.0, 42.0));
        assert_eq!(parse_transform("translate(10,20) scale(2)").unwrap(), m);
    }

    #[test]
    fn transform_list_variants() {
        let m = parse_transform("rotate(90 10 10)").unwrap();
        let (x, y) = m.apply(20.0, 10.0);
        assert!(close(x, 10.0) && close(y, 20.0));
        let skew = parse_transform("skewX(45)").unwrap();
        let (x, _) = skew.apply(0.0, 10.0);
        assert!(close(x, 10.0));
        assert!(parse_transform("translate(1,2,3)").is_err());
        assert!(parse_transform("wobble(3)").is_err());
    }

    #[test]
    fn inversion_round_trips_and_rejects_singular() {
        let m = Matrix::new(2.0, 1.0, 0.5, 3.0, 7.0, -4.0);
        let inv = invert(m).unwrap();
        let (x, y) = inv.apply(m.apply(3.0, 5.0).0, m.apply(3.0, 5.0).1);
        assert!(close(x, 3.0) && close(y, 5.0));
        assert_eq!(
            invert(Matrix::scale(0.0, 1.0)),
            Err(GeometryError::SingularMatrix)
        );
    }

    #[test]
    fn view_box_meet_slice_and_none() {
        let vb = parse_view_box("0 0 10 20").unwrap();
        let meet = view_box_transform(vb, AspectRatio::default(), 100.0, 100.0);
        assert_eq!(meet.apply(0.0, 0.0), (25.0, 0.0));
        assert_eq!(meet.apply(10.0, 20.0), (75.0, 100.0));
        let slice = view_box_transform(vb, AspectRatio::parse("xMinYMin slice"), 100.0, 100.0);
        assert_eq!(slice.apply(10.0, 0.0), (100.0, 0.0));
        let none = view_box_transform(vb, AspectRatio::parse("none"), 100.0, 100.0);
        assert_eq!(none.apply(10.0, 20.0), (100.0, 100.0));
        assert!(parse_view_box("0 0 -1 5").is_none());
        assert_eq!(
            AspectRatio::parse("xMaxYMin").align,
            Some((Align::Max, Align::Min))
        );
    }

    #[test]
    fn shapes_and_bounds() {
        let rect = rect_path(1.0, 2.0, 10.0, 5.0, 0.0, 0.0);
        assert_eq!(path_bbox(&rect), Some(Rect::new(1.0, 2.0, 10.0, 5.0)));
        assert!(rect_path(0.0, 0.0, 0.0, 5.0, 0.0, 0.0).is_empty());
        let rounded = rect_path(0.0, 0.0, 10.0, 10.0, 20.0, 2.0);
        assert_eq!(rounded.len(), 10);
        let bbox = path_bbox(&ellipse_path(5.0, 5.0, 5.0, 2.0)).unwrap();
        assert!(close(bbox.x, 0.0) && close(bbox.width, 10.0) && close(bbox.height, 4.0));
        assert_eq!(parse_points("0,0 10,0 10").unwrap().len(), 2);
        assert_eq!(poly_path(&[(0.0, 0.0), (1.0, 1.0)], true).len(), 3);
    }
}

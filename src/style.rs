use std::collections::HashMap;

use lightningcss::printer::PrinterOptions;
use lightningcss::properties::Property;
use lightningcss::rules::CssRule;
use lightningcss::stylesheet::{ParserOptions, StyleAttribute, StyleSheet};
use lightningcss::traits::ToCss;

use crate::types::{Color, FillRule, LineCap, LineJoin};
use crate::units::{self, Axis, Length, LengthUnit, ReferenceBox, UnitError};

/// Raw attribute mapping of one element, after style declarations have been
/// merged over the presentation attributes.
pub type Attributes = HashMap<String, String>;

/// Presentation properties understood by the cascade. Declarations from
/// `style=""` and `<style>` only override these.
pub(crate) const PRESENTATION_PROPERTIES: &[&str] = &[
    "fill",
    "fill-opacity",
    "fill-rule",
    "stroke",
    "stroke-opacity",
    "stroke-width",
    "stroke-linecap",
    "stroke-linejoin",
    "stroke-miterlimit",
    "stroke-dasharray",
    "stroke-dashoffset",
    "opacity",
    "clip-path",
    "clip-rule",
    "color",
    "display",
    "visibility",
    "font-family",
    "font-size",
    "font-weight",
    "font-style",
    "text-anchor",
    "stop-color",
    "stop-opacity",
];

pub const DEFAULT_FONT_SIZE: f32 = 16.0;

#[derive(Debug, Clone, PartialEq)]
pub enum Paint {
    None,
    /// Solid color with its own alpha, multiplied into the paint opacity.
    Color(Color, f32),
    CurrentColor,
    /// `url(#id)` with an optional fallback used when the id is missing.
    Server {
        id: String,
        fallback: Option<Box<Paint>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAnchor {
    Start,
    Middle,
    End,
}

/// Computed presentation state of one node. Each cascade step yields a new
/// snapshot; existing snapshots are never changed.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleState {
    pub fill: Paint,
    pub fill_opacity: f32,
    pub fill_rule: FillRule,
    pub stroke: Paint,
    pub stroke_opacity: f32,
    pub stroke_width: f32,
    pub line_cap: LineCap,
    pub line_join: LineJoin,
    pub miter_limit: f32,
    pub dash_array: Vec<f32>,
    pub dash_offset: f32,
    pub clip_rule: FillRule,
    pub color: Color,
    pub visible: bool,
    pub font_family: String,
    pub font_size: f32,
    pub font_weight: u16,
    pub italic: bool,
    pub text_anchor: TextAnchor,
    // Not inherited.
    pub opacity: f32,
    pub clip_path: Option<String>,
    pub display: bool,
}

impl Default for StyleState {
    fn default() -> Self {
        Self {
            fill: Paint::Color(Color::BLACK, 1.0),
            fill_opacity: 1.0,
            fill_rule: FillRule::NonZero,
            stroke: Paint::None,
            stroke_opacity: 1.0,
            stroke_width: 1.0,
            line_cap: LineCap::Butt,
            line_join: LineJoin::Miter,
            miter_limit: 4.0,
            dash_array: Vec::new(),
            dash_offset: 0.0,
            clip_rule: FillRule::NonZero,
            color: Color::BLACK,
            visible: true,
            font_family: "sans-serif".to_string(),
            font_size: DEFAULT_FONT_SIZE,
            font_weight: 400,
            italic: false,
            text_anchor: TextAnchor::Start,
            opacity: 1.0,
            clip_path: None,
            display: true,
        }
    }
}

impl StyleState {
    pub fn has_fill(&self) -> bool {
        !matches!(self.fill, Paint::None) && self.fill_opacity > 0.0
    }

    pub fn has_stroke(&self) -> bool {
        !matches!(self.stroke, Paint::None) && self.stroke_opacity > 0.0 && self.stroke_width > 0.0
    }
}

enum Specified<'a> {
    Unset,
    Inherit,
    Value(&'a str),
}

fn specified<'a>(attrs: &'a Attributes, name: &str) -> Specified<'a> {
    match attrs.get(name).map(|v| v.trim()) {
        None | Some("") => Specified::Unset,
        Some(v) if v.eq_ignore_ascii_case("inherit") => Specified::Inherit,
        Some(v) => Specified::Value(v),
    }
}

/// Explicit local value, else the parent's value, else the initial value.
/// Non-inherited properties start from their initial value instead of the
/// parent's. Lengths resolve against `viewport` and the node's font size.
pub fn cascade(
    parent: &StyleState,
    attrs: &Attributes,
    viewport: ReferenceBox,
) -> Result<StyleState, UnitError> {
    let initial = StyleState::default();
    let mut s = StyleState {
        opacity: initial.opacity,
        clip_path: initial.clip_path,
        display: initial.display,
        ..parent.clone()
    };

    if let Specified::Value(v) = specified(attrs, "font-size") {
        s.font_size = resolve_font_size(v, parent.font_size)?;
    }
    if let Specified::Value(v) = specified(attrs, "color") {
        if let Some((color, _)) = parse_color(v) {
            s.color = color;
        }
    }
    if let Specified::Value(v) = specified(attrs, "fill") {
        if let Some(paint) = parse_paint(v) {
            s.fill = paint;
        }
    }
    if let Specified::Value(v) = specified(attrs, "stroke") {
        if let Some(paint) = parse_paint(v) {
            s.stroke = paint;
        }
    }
    if let Specified::Value(v) = specified(attrs, "fill-opacity") {
        if let Some(o) = units::parse_number(v) {
            s.fill_opacity = o.clamp(0.0, 1.0);
        }
    }
    if let Specified::Value(v) = specified(attrs, "stroke-opacity") {
        if let Some(o) = units::parse_number(v) {
            s.stroke_opacity = o.clamp(0.0, 1.0);
        }
    }
    if let Specified::Value(v) = specified(attrs, "fill-rule") {
        if let Some(rule) = parse_fill_rule(v) {
            s.fill_rule = rule;
        }
    }
    if let Specified::Value(v) = specified(attrs, "clip-rule") {
        if let Some(rule) = parse_fill_rule(v) {
            s.clip_rule = rule;
        }
    }
    if let Specified::Value(v) = specified(attrs, "stroke-width") {
        let width = Length::parse(v)?.resolve(Axis::Diagonal, Some(viewport), s.font_size)?;
        if width >= 0.0 {
            s.stroke_width = width;
        }
    }
    if let Specified::Value(v) = specified(attrs, "stroke-linecap") {
        match v {
            "butt" => s.line_cap = LineCap::Butt,
            "round" => s.line_cap = LineCap::Round,
            "square" => s.line_cap = LineCap::Square,
            _ => {}
        }
    }
    if let Specified::Value(v) = specified(attrs, "stroke-linejoin") {
        match v {
            "miter" | "miter-clip" | "arcs" => s.line_join = LineJoin::Miter,
            "round" => s.line_join = LineJoin::Round,
            "bevel" => s.line_join = LineJoin::Bevel,
            _ => {}
        }
    }
    if let Specified::Value(v) = specified(attrs, "stroke-miterlimit") {
        if let Some(m) = units::parse_number(v).filter(|m| *m >= 1.0) {
            s.miter_limit = m;
        }
    }
    if let Specified::Value(v) = specified(attrs, "stroke-dasharray") {
        s.dash_array = parse_dash_array(v, viewport, s.font_size)?;
    }
    if let Specified::Value(v) = specified(attrs, "stroke-dashoffset") {
        s.dash_offset = Length::parse(v)?.resolve(Axis::Diagonal, Some(viewport), s.font_size)?;
    }
    if let Specified::Value(v) = specified(attrs, "visibility") {
        s.visible = !matches!(v, "hidden" | "collapse");
    }
    if let Specified::Value(v) = specified(attrs, "font-family") {
        s.font_family = v.to_string();
    }
    if let Specified::Value(v) = specified(attrs, "font-weight") {
        s.font_weight = parse_font_weight(v, parent.font_weight).unwrap_or(s.font_weight);
    }
    if let Specified::Value(v) = specified(attrs, "font-style") {
        s.italic = matches!(v, "italic" | "oblique") || v.starts_with("oblique ");
    }
    if let Specified::Value(v) = specified(attrs, "text-anchor") {
        match v {
            "start" => s.text_anchor = TextAnchor::Start,
            "middle" => s.text_anchor = TextAnchor::Middle,
            "end" => s.text_anchor = TextAnchor::End,
            _ => {}
        }
    }

    match specified(attrs, "opacity") {
        Specified::Value(v) => {
            if let Some(o) = units::parse_number(v) {
                s.opacity = o.clamp(0.0, 1.0);
            }
        }
        Specified::Inherit => s.opacity = parent.opacity,
        Specified::Unset => {}
    }
    match specified(attrs, "clip-path") {
        Specified::Value(v) => s.clip_path = parse_url_ref(v),
        Specified::Inherit => s.clip_path = parent.clip_path.clone(),
        Specified::Unset => {}
    }
    match specified(attrs, "display") {
        Specified::Value(v) => s.display = v != "none",
        Specified::Inherit => s.display = parent.display,
        Specified::Unset => {}
    }

    Ok(s)
}

pub(crate) fn resolve_font_size(raw: &str, parent_size: f32) -> Result<f32, UnitError> {
    let keyword = match raw {
        "xx-small" => Some(9.0),
        "x-small" => Some(10.0),
        "small" => Some(13.0),
        "medium" => Some(16.0),
        "large" => Some(18.0),
        "x-large" => Some(24.0),
        "xx-large" => Some(32.0),
        "larger" => Some(parent_size * 1.2),
        "smaller" => Some(parent_size / 1.2),
        _ => None,
    };
    if let Some(size) = keyword {
        return Ok(size);
    }
    let length = Length::parse(raw)?;
    let size = match length.unit {
        LengthUnit::Percent => parent_size * length.value / 100.0,
        _ => length.resolve(Axis::Vertical, None, parent_size)?,
    };
    Ok(size.max(0.0))
}

fn parse_font_weight(raw: &str, parent: u16) -> Option<u16> {
    match raw {
        "normal" => Some(400),
        "bold" => Some(700),
        "bolder" => Some(if parent < 400 {
            400
        } else if parent < 600 {
            700
        } else {
            900
        }),
        "lighter" => Some(if parent < 600 {
            100
        } else if parent < 800 {
            400
        } else {
            700
        }),
        other => other.parse::<u16>().ok().filter(|w| (1..=1000).contains(w)),
    }
}

fn parse_fill_rule(raw: &str) -> Option<FillRule> {
    match raw {
        "nonzero" => Some(FillRule::NonZero),
        "evenodd" => Some(FillRule::EvenOdd),
        _ => None,
    }
}

fn parse_dash_array(
    raw: &str,
    viewport: ReferenceBox,
    font_size: f32,
) -> Result<Vec<f32>, UnitError> {
    if raw == "none" {
        return Ok(Vec::new());
    }
    let mut dashes = units::parse_length_list(raw)?
        .into_iter()
        .map(|len| len.resolve(Axis::Diagonal, Some(viewport), font_size))
        .collect::<Result<Vec<_>, _>>()?;
    // Negative entries or an all-zero pattern disable dashing.
    if dashes.iter().any(|d| *d < 0.0) || dashes.iter().all(|d| *d == 0.0) {
        return Ok(Vec::new());
    }
    if dashes.len() % 2 == 1 {
        let dup = dashes.clone();
        dashes.extend_from_slice(&dup);
    }
    Ok(dashes)
}

pub fn parse_paint(input: &str) -> Option<Paint> {
    let v = input.trim();
    if v.eq_ignore_ascii_case("none") {
        return Some(Paint::None);
    }
    if v.eq_ignore_ascii_case("currentcolor") {
        return Some(Paint::CurrentColor);
    }
    if has_url_prefix(v) {
        let close = v.find(')')?;
        let id = parse_url_ref(&v[..=close])?;
        let rest = v[close + 1..].trim();
        let fallback = if rest.is_empty() {
            None
        } else {
            Some(Box::new(parse_paint(rest)?))
        };
        return Some(Paint::Server { id, fallback });
    }
    parse_color(v).map(|(color, alpha)| Paint::Color(color, alpha))
}

fn has_url_prefix(value: &str) -> bool {
    value.get(..4).is_some_and(|prefix| prefix.eq_ignore_ascii_case("url("))
}

/// `url(#id)`, tolerating quotes around the target.
pub fn parse_url_ref(input: &str) -> Option<String> {
    let s = input.trim();
    if !has_url_prefix(s) {
        return None;
    }
    let open = s.find('(')?;
    let close = s.rfind(')')?;
    if close <= open + 1 {
        return None;
    }
    let inner = s[open + 1..close]
        .trim()
        .trim_matches('"')
        .trim_matches('\'');
    let id = inner.strip_prefix('#')?;
    if id.is_empty() {
        return None;
    }
    Some(id.to_string())
}

/// Parses a CSS color into the color and its alpha.
pub fn parse_color(input: &str) -> Option<(Color, f32)> {
    let v = input.trim();
    if let Some(hex) = v.strip_prefix('#') {
        return parse_hex_color(hex);
    }
    let lower = v.to_ascii_lowercase();
    if let Some(args) = lower
        .strip_prefix("rgba(")
        .or_else(|| lower.strip_prefix("rgb("))
        .and_then(|rest| rest.strip_suffix(')'))
    {
        return parse_rgb_function(args);
    }
    if lower == "transparent" {
        return Some((Color::BLACK, 0.0));
    }
    NAMED_COLORS
        .binary_search_by(|(name, _)| name.cmp(&lower.as_str()))
        .ok()
        .map(|i| {
            let rgb = NAMED_COLORS[i].1;
            (
                Color::from_rgb8((rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8),
                1.0,
            )
        })
}

fn parse_hex_color(hex: &str) -> Option<(Color, f32)> {
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let nibble = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok().map(|n| n * 17);
    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    let (r, g, b, a) = match hex.len() {
        3 => (nibble(0)?, nibble(1)?, nibble(2)?, 255),
        4 => (nibble(0)?, nibble(1)?, nibble(2)?, nibble(3)?),
        6 => (byte(0)?, byte(2)?, byte(4)?, 255),
        8 => (byte(0)?, byte(2)?, byte(4)?, byte(6)?),
        _ => return None,
    };
    Some((Color::from_rgb8(r, g, b), a as f32 / 255.0))
}

fn parse_rgb_function(args: &str) -> Option<(Color, f32)> {
    let parts: Vec<&str> = args
        .split(|c: char| c == ',' || c == '/' || c.is_ascii_whitespace())
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() != 3 && parts.len() != 4 {
        return None;
    }
    let channel = |raw: &str| -> Option<f32> {
        let value = match raw.strip_suffix('%') {
            Some(pct) => pct.parse::<f32>().ok()? / 100.0,
            None => raw.parse::<f32>().ok()? / 255.0,
        };
        Some(value.clamp(0.0, 1.0))
    };
    let alpha = match parts.get(3) {
        Some(raw) => units::parse_number(raw)?.clamp(0.0, 1.0),
        None => 1.0,
    };
    Some((
        Color::rgb(channel(parts[0])?, channel(parts[1])?, channel(parts[2])?),
        alpha,
    ))
}

// ---- declarations: style="" and <style> sheets ----

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Declaration {
    pub name: String,
    pub value: String,
    pub important: bool,
}

pub(crate) fn parse_declarations(input: &str) -> Vec<Declaration> {
    if let Ok(attr) = StyleAttribute::parse(input, ParserOptions::default()) {
        let mut out = Vec::new();
        push_properties(&attr.declarations.declarations, false, &mut out);
        push_properties(&attr.declarations.important_declarations, true, &mut out);
        if !out.is_empty() {
            return out;
        }
    }
    parse_declarations_legacy(input)
}

fn push_properties(props: &[Property<'_>], important: bool, out: &mut Vec<Declaration>) {
    for prop in props {
        let name = prop.property_id().name().to_ascii_lowercase();
        let Ok(value) = prop.value_to_css_string(PrinterOptions::default()) else {
            continue;
        };
        out.push(Declaration {
            name,
            value,
            important,
        });
    }
}

fn parse_declarations_legacy(input: &str) -> Vec<Declaration> {
    input
        .split(';')
        .filter_map(|decl| {
            let (k, v) = decl.split_once(':')?;
            let name = k.trim().to_ascii_lowercase();
            let mut value = v.trim();
            let mut important = false;
            if let Some(stripped) = value.strip_suffix("!important") {
                value = stripped.trim_end();
                important = true;
            }
            if name.is_empty() || value.is_empty() {
                return None;
            }
            Some(Declaration {
                name,
                value: value.to_string(),
                important,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Specificity(u16, u16, u16);

#[derive(Debug, Clone)]
struct SimpleSelector {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
}

#[derive(Debug, Clone)]
struct Selector {
    parts: Vec<SimpleSelector>,
    specificity: Specificity,
}

#[derive(Debug, Clone)]
struct SheetRule {
    selector: Selector,
    declarations: Vec<Declaration>,
    order: usize,
}

/// Rules collected from every `<style>` element of a document. Only simple
/// selectors (type, class, id, universal) joined by descendant combinators are
/// supported; other rules are ignored.
#[derive(Debug, Clone, Default)]
pub(crate) struct Stylesheet {
    rules: Vec<SheetRule>,
}

impl Stylesheet {
    pub fn from_document(doc: &roxmltree::Document<'_>) -> Stylesheet {
        let mut out = Stylesheet::default();
        let mut order = 0usize;
        for node in doc
            .descendants()
            .filter(|n| n.is_element() && n.tag_name().name() == "style")
        {
            let css: String = node
                .children()
                .filter_map(|child| child.text())
                .collect::<Vec<_>>()
                .concat();
            let css = css.trim();
            if css.is_empty() {
                continue;
            }
            match StyleSheet::parse(css, ParserOptions::default()) {
                Ok(sheet) => collect_rules(&sheet.rules.0, &mut out.rules, &mut order),
                Err(err) => log::warn!("ignoring unparsable <style> block: {}", err),
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Matching declarations split into normal and important, each ordered
    /// from lowest to highest precedence.
    pub fn matching(&self, node: roxmltree::Node<'_, '_>) -> (Vec<&Declaration>, Vec<&Declaration>) {
        let mut matched: Vec<&SheetRule> = self
            .rules
            .iter()
            .filter(|rule| selector_matches(node, &rule.selector))
            .collect();
        matched.sort_by(|a, b| {
            a.selector
                .specificity
                .cmp(&b.selector.specificity)
                .then(a.order.cmp(&b.order))
        });
        let mut normal = Vec::new();
        let mut important = Vec::new();
        for rule in matched {
            for decl in &rule.declarations {
                if decl.important {
                    important.push(decl);
                } else {
                    normal.push(decl);
                }
            }
        }
        (normal, important)
    }
}

fn collect_rules(rules: &[CssRule<'_>], out: &mut Vec<SheetRule>, order: &mut usize) {
    for rule in rules {
        match rule {
            CssRule::Style(style_rule) => {
                let Ok(selectors) = style_rule.selectors.to_css_string(PrinterOptions::default())
                else {
                    continue;
                };
                let mut declarations = Vec::new();
                push_properties(&style_rule.declarations.declarations, false, &mut declarations);
                push_properties(
                    &style_rule.declarations.important_declarations,
                    true,
                    &mut declarations,
                );
                if !declarations.is_empty() {
                    for raw in selectors.split(',') {
                        if let Some(selector) = parse_selector(raw) {
                            out.push(SheetRule {
                                selector,
                                declarations: declarations.clone(),
                                order: *order,
                            });
                        }
                    }
                }
                *order += 1;
            }
            CssRule::Media(media) => collect_rules(&media.rules.0, out, order),
            _ => {}
        }
    }
}

fn parse_selector(raw: &str) -> Option<Selector> {
    let mut parts = Vec::new();
    let mut specificity = Specificity(0, 0, 0);
    for token in raw.split_whitespace() {
        let part = parse_simple_selector(token)?;
        specificity.0 += part.id.is_some() as u16;
        specificity.1 += part.classes.len() as u16;
        specificity.2 += part.tag.is_some() as u16;
        parts.push(part);
    }
    if parts.is_empty() {
        return None;
    }
    Some(Selector { parts, specificity })
}

fn parse_simple_selector(token: &str) -> Option<SimpleSelector> {
    if token.contains([':', '[', ']', '>', '+', '~']) {
        return None;
    }
    let bytes = token.as_bytes();
    let mut i = 0usize;
    let mut tag = None;
    let mut id = None;
    let mut classes = Vec::new();
    let ident_end = |mut j: usize| {
        while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || matches!(bytes[j], b'_' | b'-')) {
            j += 1;
        }
        j
    };

    if bytes.first() == Some(&b'*') {
        i = 1;
    } else if bytes.first().is_some_and(|b| b.is_ascii_alphabetic() || *b == b'_') {
        i = ident_end(0);
        tag = Some(token[..i].to_string());
    }
    while i < bytes.len() {
        let marker = bytes[i];
        let start = i + 1;
        let end = ident_end(start);
        if end == start {
            return None;
        }
        match marker {
            b'.' => classes.push(token[start..end].to_string()),
            b'#' if id.is_none() => id = Some(token[start..end].to_string()),
            _ => return None,
        }
        i = end;
    }
    Some(SimpleSelector { tag, id, classes })
}

fn simple_selector_matches(node: roxmltree::Node<'_, '_>, selector: &SimpleSelector) -> bool {
    if let Some(tag) = &selector.tag {
        if node.tag_name().name() != tag {
            return false;
        }
    }
    if let Some(id) = &selector.id {
        if node.attribute("id") != Some(id.as_str()) {
            return false;
        }
    }
    let node_classes = node.attribute("class").unwrap_or_default();
    selector
        .classes
        .iter()
        .all(|class| node_classes.split_whitespace().any(|c| c == class))
}

fn selector_matches(node: roxmltree::Node<'_, '_>, selector: &Selector) -> bool {
    let Some((last, ancestors)) = selector.parts.split_last() else {
        return false;
    };
    if !simple_selector_matches(node, last) {
        return false;
    }
    let mut anchor = node.parent_element();
    for part in ancestors.iter().rev() {
        let mut cursor = anchor;
        loop {
            match cursor {
                Some(candidate) if simple_selector_matches(candidate, part) => {
                    anchor = candidate.parent_element();
                    break;
                }
                Some(candidate) => cursor = candidate.parent_element(),
                None => return false,
            }
        }
    }
    true
}

// Sorted for binary search.
const NAMED_COLORS: &[(&str, u32)] = &[
    ("aliceblue", 0xf0f8ff),
    ("antiquewhite", 0xfaebd7),
    ("aqua", 0x00ffff),
    ("aquamarine", 0x7fffd4),
    ("azure", 0xf0ffff),
    ("beige", 0xf5f5dc),
    ("bisque", 0xffe4c4),
    ("black", 0x000000),
    ("blanchedalmond", 0xffebcd),
    ("blue", 0x0000ff),
    ("blueviolet", 0x8a2be2),
    ("brown", 0xa52a2a),
    ("burlywood", 0xdeb887),
    ("cadetblue", 0x5f9ea0),
    ("chartreuse", 0x7fff00),
    ("chocolate", 0xd2691e),
    ("coral", 0xff7f50),
    ("cornflowerblue", 0x6495ed),
    ("cornsilk", 0xfff8dc),
    ("crimson", 0xdc143c),
    ("cyan", 0x00ffff),
    ("darkblue", 0x00008b),
    ("darkcyan", 0x008b8b),
    ("darkgoldenrod", 0xb8860b),
    ("darkgray", 0xa9a9a9),
    ("darkgreen", 0x006400),
    ("darkgrey", 0xa9a9a9),
    ("darkkhaki", 0xbdb76b),
    ("darkmagenta", 0x8b008b),
    ("darkolivegreen", 0x556b2f),
    ("darkorange", 0xff8c00),
    ("darkorchid", 0x9932cc),
    ("darkred", 0x8b0000),
    ("darksalmon", 0xe9967a),
    ("darkseagreen", 0x8fbc8f),
    ("darkslateblue", 0x483d8b),
    ("darkslategray", 0x2f4f4f),
    ("darkslategrey", 0x2f4f4f),
    ("darkturquoise", 0x00ced1),
    ("darkviolet", 0x9400d3),
    ("deeppink", 0xff1493),
    ("deepskyblue", 0x00bfff),
    ("dimgray", 0x696969),
    ("dimgrey", 0x696969),
    ("dodgerblue", 0x1e90ff),
    ("firebrick", 0xb22222),
    ("floralwhite", 0xfffaf0),
    ("forestgreen", 0x228b22),
    ("fuchsia", 0xff00ff),
    ("gainsboro", 0xdcdcdc),
    ("ghostwhite", 0xf8f8ff),
    ("gold", 0xffd700),
    ("goldenrod", 0xdaa520),
    ("gray", 0x808080),
    ("green", 0x008000),
    ("greenyellow", 0xadff2f),
    ("grey", 0x808080),
    ("honeydew", 0xf0fff0),
    ("hotpink", 0xff69b4),
    ("indianred", 0xcd5c5c),
    ("indigo", 0x4b0082),
    ("ivory", 0xfffff0),
    ("khaki", 0xf0e68c),
    ("lavender", 0xe6e6fa),
    ("lavenderblush", 0xfff0f5),
    ("lawngreen", 0x7cfc00),
    ("lemonchiffon", 0xfffacd),
    ("lightblue", 0xadd8e6),
    ("lightcoral", 0xf08080),
    ("lightcyan", 0xe0ffff),
    ("lightgoldenrodyellow", 0xfafad2),
    ("lightgray", 0xd3d3d3),
    ("lightgreen", 0x90ee90),
    ("lightgrey", 0xd3d3d3),
    ("lightpink", 0xffb6c1),
    ("lightsalmon", 0xffa07a),
    ("lightseagreen", 0x20b2aa),
    ("lightskyblue", 0x87cefa),
    ("lightslategray", 0x778899),
    ("lightslategrey", 0x778899),
    ("lightsteelblue", 0xb0c4de),
    ("lightyellow", 0xffffe0),
    ("lime", 0x00ff00),
    ("limegreen", 0x32cd32),
    ("linen", 0xfaf0e6),
    ("magenta", 0xff00ff),
    ("maroon", 0x800000),
    ("mediumaquamarine", 0x66cdaa),
    ("mediumblue", 0x0000cd),
    ("mediumorchid", 0xba55d3),
    ("mediumpurple", 0x9370db),
    ("mediumseagreen", 0x3cb371),
    ("mediumslateblue", 0x7b68ee),
    ("mediumspringgreen", 0x00fa9a),
    ("mediumturquoise", 0x48d1cc),
    ("mediumvioletred", 0xc71585),
    ("midnightblue", 0x191970),
    ("mintcream", 0xf5fffa),
    ("mistyrose", 0xffe4e1),
    ("moccasin", 0xffe4b5),
    ("navajowhite", 0xffdead),
    ("navy", 0x000080),
    ("oldlace", 0xfdf5e6),
    ("olive", 0x808000),
    ("olivedrab", 0x6b8e23),
    ("orange", 0xffa500),
    ("orangered", 0xff4500),
    ("orchid", 0xda70d6),
    ("palegoldenrod", 0xeee8aa),
    ("palegreen", 0x98fb98),
    ("paleturquoise", 0xafeeee),
    ("palevioletred", 0xdb7093),
    ("papayawhip", 0xffefd5),
    ("peachpuff", 0xffdab9),
    ("peru", 0xcd853f),
    ("pink", 0xffc0cb),
    ("plum", 0xdda0dd),
    ("powderblue", 0xb0e0e6),
    ("purple", 0x800080),
    ("rebeccapurple", 0x663399),
    ("red", 0xff0000),
    ("rosybrown", 0xbc8f8f),
    ("royalblue", 0x4169e1),
    ("saddlebrown", 0x8b4513),
    ("salmon", 0xfa8072),
    ("sandybrown", 0xf4a460),
    ("seagreen", 0x2e8b57),
    ("seashell", 0xfff5ee),
    ("sienna", 0xa0522d),
    ("silver", 0xc0c0c0),
    ("skyblue", 0x87ceeb),
    ("slateblue", 0x6a5acd),
    ("slategray", 0x708090),
    ("slategrey", 0x708090),
    ("snow", 0xfffafa),
    ("springgreen", 0x00ff7f),
    ("steelblue", 0x4682b4),
    ("tan", 0xd2b48c),
    ("teal", 0x008080),
    ("thistle", 0xd8bfd8),
    ("tomato", 0xff6347),
    ("turquoise", 0x40e0d0),
    ("violet", 0xee82ee),
    ("wheat", 0xf5deb3),
    ("white", 0xffffff),
    ("whitesmoke", 0xf5f5f5),
    ("yellow", 0xffff00),
    ("yellowgreen", 0x9acd32),
];

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn viewport() -> ReferenceBox {
        ReferenceBox::new(200.0, 100.0)
    }

    #[test]
    fn child_inherits_parent_fill_unless_overridden() {
        let root = StyleState::default();
        let parent = cascade(&root, &attrs(&[("fill", "#00ff00")]), viewport()).unwrap();
        let inherited = cascade(&parent, &attrs(&[]), viewport()).unwrap();
        assert_eq!(inherited.fill, Paint::Color(Color::from_rgb8(0, 255, 0), 1.0));
        let overridden = cascade(&parent, &attrs(&[("fill", "blue")]), viewport()).unwrap();
        assert_eq!(overridden.fill, Paint::Color(Color::from_rgb8(0, 0, 255), 1.0));
    }

    #[test]
    fn non_inherited_properties_reset_to_initial() {
        let root = StyleState::default();
        let parent = cascade(
            &root,
            &attrs(&[("opacity", "0.5"), ("clip-path", "url(#c)"), ("stroke-width", "3")]),
            viewport(),
        )
        .unwrap();
        assert_eq!(parent.opacity, 0.5);
        let child = cascade(&parent, &attrs(&[]), viewport()).unwrap();
        assert_eq!(child.opacity, 1.0);
        assert_eq!(child.clip_path, None);
        assert_eq!(child.stroke_width, 3.0);
        let explicit = cascade(&parent, &attrs(&[("opacity", "inherit")]), viewport()).unwrap();
        assert_eq!(explicit.opacity, 0.5);
    }

    #[test]
    fn lengths_resolve_against_font_and_viewport() {
        let root = StyleState::default();
        let s = cascade(
            &root,
            &attrs(&[("font-size", "20px"), ("stroke-width", "0.5em")]),
            viewport(),
        )
        .unwrap();
        assert_eq!(s.font_size, 20.0);
        assert_eq!(s.stroke_width, 10.0);
        let child = cascade(&s, &attrs(&[("font-size", "150%")]), viewport()).unwrap();
        assert_eq!(child.font_size, 30.0);
        assert!(cascade(&root, &attrs(&[("stroke-width", "2zz")]), viewport()).is_err());
    }

    #[test]
    fn paints_and_colors() {
        assert_eq!(
            parse_paint("url(#grad) red"),
            Some(Paint::Server {
                id: "grad".into(),
                fallback: Some(Box::new(Paint::Color(Color::from_rgb8(255, 0, 0), 1.0))),
            })
        );
        assert_eq!(
            parse_paint("url(\"#g\")"),
            Some(Paint::Server {
                id: "g".into(),
                fallback: None
            })
        );
        assert_eq!(parse_paint("currentColor"), Some(Paint::CurrentColor));
        let (c, a) = parse_color("rgba(255, 0, 0, 0.5)").unwrap();
        assert_eq!((c, a), (Color::from_rgb8(255, 0, 0), 0.5));
        let (c, a) = parse_color("#f008").unwrap();
        assert_eq!(c, Color::from_rgb8(255, 0, 0));
        assert!((a - 136.0 / 255.0).abs() < 1e-6);
        assert_eq!(parse_color("RebeccaPurple").unwrap().0, Color::from_rgb8(0x66, 0x33, 0x99));
        assert_eq!(parse_color("rgb(100%, 0%, 50%)").unwrap().0, Color::rgb(1.0, 0.0, 0.5));
        assert!(parse_color("notacolor").is_none());
    }

    #[test]
    fn non_ascii_values_are_rejected_not_sliced() {
        assert_eq!(parse_paint("ab€"), None);
        assert_eq!(parse_paint("ür(#x)"), None);
        assert_eq!(parse_url_ref("ab€d"), None);
        assert_eq!(parse_url_ref("url(#café)"), Some("café".to_string()));
        let root = StyleState::default();
        let s = cascade(&root, &attrs(&[("fill", "ab€"), ("clip-path", "€€")]), viewport()).unwrap();
        assert_eq!(s.fill, root.fill);
        assert_eq!(s.clip_path, None);
    }

    #[test]
    fn named_colors_are_sorted() {
        assert!(NAMED_COLORS.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn legacy_declarations_keep_important_flag() {
        let decls = parse_declarations_legacy("fill: red; stroke : blue !important;;");
        assert_eq!(decls.len(), 2);
        assert_eq!(decls[1].name, "stroke");
        assert_eq!(decls[1].value, "blue");
        assert!(decls[1].important);
    }

    #[test]
    fn stylesheet_orders_by_specificity_then_source() {
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg">
            <style>#a { fill: blue } rect { fill: red } g .c { stroke: green }</style>
            <g><rect id="a" class="c"/></g></svg>"#;
        let doc = roxmltree::Document::parse(svg).unwrap();
        let sheet = Stylesheet::from_document(&doc);
        let rect = doc
            .descendants()
            .find(|n| n.has_tag_name("rect"))
            .unwrap();
        let (normal, important) = sheet.matching(rect);
        assert!(important.is_empty());
        let names: Vec<&str> = normal.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["fill", "stroke", "fill"]);
        let last_fill = normal.iter().rev().find(|d| d.name == "fill").unwrap();
        assert_eq!(parse_paint(&last_fill.value).unwrap(), Paint::Color(Color::from_rgb8(0, 0, 255), 1.0));
    }
}

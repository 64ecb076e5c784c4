use std::cell::{OnceCell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustybuzz::{Direction as HbDirection, Face as HbFace, UnicodeBuffer};
use ttf_parser::GlyphId;

use crate::canvas::FontSpec;

/// Advance used per character when no font file can be found.
pub const FALLBACK_ADVANCE: f32 = 0.55;

/// Environment variable with extra font directories (path-list syntax).
pub const FONT_DIR_ENV: &str = "SVGCONVERT_FONT_DIR";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FontStyleVariant {
    Regular,
    Bold,
    Italic,
    BoldItalic,
}

impl FontStyleVariant {
    fn from_spec(spec: &FontSpec) -> Self {
        match (spec.weight >= 600, spec.italic) {
            (false, false) => Self::Regular,
            (true, false) => Self::Bold,
            (false, true) => Self::Italic,
            (true, true) => Self::BoldItalic,
        }
    }
}

/// One positioned glyph, in user units relative to the text origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct GlyphPlacement {
    pub glyph_id: u16,
    pub origin_x: f32,
    pub origin_y: f32,
    pub scale: f32,
}

/// Shapes `text` with the face in `font_data`. Falls back to per-character
/// advances when shaping yields nothing.
pub(crate) fn layout_glyphs(font_data: &[u8], text: &str, font_size: f32) -> Vec<GlyphPlacement> {
    let Some(face) = HbFace::from_slice(font_data, 0) else {
        return layout_glyphs_unshaped(font_data, text, font_size);
    };
    let units = face.units_per_em().max(1) as f32;
    let scale = font_size / units;
    let mut buffer = UnicodeBuffer::new();
    buffer.set_direction(detect_direction(text));
    buffer.push_str(text);
    let output = rustybuzz::shape(&face, &[], buffer);
    let infos = output.glyph_infos();
    let positions = output.glyph_positions();
    if infos.is_empty() || infos.len() != positions.len() {
        return layout_glyphs_unshaped(font_data, text, font_size);
    }

    let mut out = Vec::with_capacity(infos.len());
    let mut pen_x = 0.0f32;
    let mut pen_y = 0.0f32;
    for (info, pos) in infos.iter().zip(positions.iter()) {
        let gid = info.glyph_id as u16;
        if gid != 0 {
            out.push(GlyphPlacement {
                glyph_id: gid,
                origin_x: pen_x + pos.x_offset as f32 * scale,
                // Font units grow upwards, user space grows downwards.
                origin_y: pen_y - pos.y_offset as f32 * scale,
                scale,
            });
        }
        pen_x += pos.x_advance as f32 * scale;
        pen_y -= pos.y_advance as f32 * scale;
    }
    out
}

fn layout_glyphs_unshaped(font_data: &[u8], text: &str, font_size: f32) -> Vec<GlyphPlacement> {
    let Ok(face) = ttf_parser::Face::parse(font_data, 0) else {
        return Vec::new();
    };
    let units = face.units_per_em().max(1) as f32;
    let scale = font_size / units;
    let mut out = Vec::new();
    let mut pen_x = 0.0f32;
    for ch in text.chars() {
        let gid = face.glyph_index(ch).map(|id| id.0).unwrap_or(0);
        if gid == 0 {
            pen_x += font_size * FALLBACK_ADVANCE;
            continue;
        }
        out.push(GlyphPlacement {
            glyph_id: gid,
            origin_x: pen_x,
            origin_y: 0.0,
            scale,
        });
        let advance = face.glyph_hor_advance(GlyphId(gid)).unwrap_or(0) as f32 * scale;
        pen_x += if advance > 0.0 {
            advance
        } else {
            font_size * FALLBACK_ADVANCE
        };
    }
    out
}

pub(crate) fn fallback_width(text: &str, font_size: f32) -> f32 {
    text.chars().count() as f32 * font_size * FALLBACK_ADVANCE
}

fn shaped_width(font_data: &[u8], text: &str, font_size: f32) -> Option<f32> {
    let face = HbFace::from_slice(font_data, 0)?;
    let units = face.units_per_em().max(1) as f32;
    let mut buffer = UnicodeBuffer::new();
    buffer.set_direction(detect_direction(text));
    buffer.push_str(text);
    let output = rustybuzz::shape(&face, &[], buffer);
    let positions = output.glyph_positions();
    if positions.is_empty() {
        return None;
    }
    let total: i64 = positions.iter().map(|p| p.x_advance as i64).sum();
    Some(total.max(0) as f32 * font_size / units)
}

fn detect_direction(text: &str) -> HbDirection {
    for ch in text.chars() {
        let rtl = matches!(
            ch as u32,
            0x0590..=0x08FF | 0xFB1D..=0xFDFF | 0xFE70..=0xFEFF | 0x1EE00..=0x1EEFF
        );
        if rtl {
            return HbDirection::RightToLeft;
        }
    }
    HbDirection::LeftToRight
}

/// Installed font files, indexed on first use, plus the faces loaded so far.
/// Every canvas owns one, so a conversion never sees another conversion's
/// index or cache.
#[derive(Debug, Clone, Default)]
pub struct FontDb {
    // `None` means the system directories plus `SVGCONVERT_FONT_DIR`.
    dirs: Option<Vec<PathBuf>>,
    index: OnceCell<HashMap<String, PathBuf>>,
    loaded: RefCell<HashMap<String, Option<Arc<Vec<u8>>>>>,
}

impl FontDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks only in `dirs` instead of the system font directories.
    pub fn with_dirs(dirs: Vec<PathBuf>) -> Self {
        Self {
            dirs: Some(dirs),
            ..Self::default()
        }
    }

    /// Advance width of `text` in user units.
    pub fn measure_text(&self, text: &str, spec: &FontSpec, font_size: f32) -> f32 {
        if text.is_empty() || font_size <= 0.0 {
            return 0.0;
        }
        self.resolve(spec)
            .and_then(|data| shaped_width(&data, text, font_size))
            .unwrap_or_else(|| fallback_width(text, font_size))
    }

    /// Bytes of an installed font matching `spec`, trying each family of the
    /// list in order and ending with the generic sans-serif faces.
    pub(crate) fn resolve(&self, spec: &FontSpec) -> Option<Arc<Vec<u8>>> {
        let style = FontStyleVariant::from_spec(spec);
        let mut families = family_list(&spec.family);
        families.push("sans-serif".to_string());

        for family in families {
            let key = format!("{family}|{style:?}");
            if let Some(entry) = self.loaded.borrow().get(&key) {
                match entry {
                    Some(bytes) => return Some(bytes.clone()),
                    None => continue,
                }
            }
            let loaded = self.load_from_candidates(&font_file_candidates(&family, style));
            self.loaded.borrow_mut().insert(key, loaded.clone());
            if loaded.is_some() {
                return loaded;
            }
        }
        log::debug!("no installed font for family {:?}", spec.family);
        None
    }

    fn index(&self) -> &HashMap<String, PathBuf> {
        self.index.get_or_init(|| match &self.dirs {
            Some(dirs) => build_font_file_index(dirs),
            None => build_font_file_index(&system_font_dirs()),
        })
    }

    fn load_from_candidates(&self, candidates: &[String]) -> Option<Arc<Vec<u8>>> {
        let index = self.index();
        for name in candidates {
            let Some(path) = index.get(&name.to_ascii_lowercase()) else {
                continue;
            };
            let Ok(bytes) = std::fs::read(path) else {
                continue;
            };
            if ttf_parser::Face::parse(&bytes, 0).is_ok() {
                log::trace!("using font file {}", path.display());
                return Some(Arc::new(bytes));
            }
        }
        None
    }
}

fn family_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|f| f.trim().trim_matches('"').trim_matches('\'').trim().to_ascii_lowercase())
        .filter(|f| !f.is_empty())
        .collect()
}

/// Maps lower-cased file names to paths. Font directories are usually
/// nested a few levels deep (`truetype/dejavu/...`).
fn build_font_file_index(dirs: &[PathBuf]) -> HashMap<String, PathBuf> {
    fn walk(dir: &Path, depth: usize, out: &mut HashMap<String, PathBuf>) {
        if depth > 4 {
            return;
        }
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
        paths.sort();
        for path in paths {
            if path.is_dir() {
                walk(&path, depth + 1, out);
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let lower = name.to_ascii_lowercase();
            if lower.ends_with(".ttf") || lower.ends_with(".otf") {
                out.entry(lower).or_insert(path);
            }
        }
    }
    let mut out = HashMap::new();
    for dir in dirs {
        walk(dir, 0, &mut out);
    }
    out
}

fn system_font_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    if let Ok(extra) = std::env::var(FONT_DIR_ENV) {
        for path in std::env::split_paths(&extra) {
            if !path.as_os_str().is_empty() {
                dirs.push(path);
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        dirs.push(PathBuf::from(r"C:\Windows\Fonts"));
        if let Ok(windir) = std::env::var("WINDIR") {
            dirs.push(PathBuf::from(windir).join("Fonts"));
        }
    }

    #[cfg(target_os = "linux")]
    {
        dirs.push(PathBuf::from("/usr/share/fonts"));
        dirs.push(PathBuf::from("/usr/local/share/fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(&home).join(".fonts"));
            dirs.push(PathBuf::from(home).join(".local/share/fonts"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        dirs.push(PathBuf::from("/System/Library/Fonts"));
        dirs.push(PathBuf::from("/Library/Fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(home).join("Library/Fonts"));
        }
    }

    dirs
}

fn font_file_candidates(family: &str, style: FontStyleVariant) -> Vec<String> {
    let mut out = Vec::new();
    match family {
        "sans-serif" | "system-ui" | "ui-sans-serif" | "helvetica" | "arial" => {
            extend_style_candidates(
                &mut out,
                style,
                &["LiberationSans-Regular.ttf", "arial.ttf", "DejaVuSans.ttf", "NotoSans-Regular.ttf"],
                &["LiberationSans-Bold.ttf", "arialbd.ttf", "DejaVuSans-Bold.ttf", "NotoSans-Bold.ttf"],
                &[
                    "LiberationSans-Italic.ttf",
                    "ariali.ttf",
                    "DejaVuSans-Oblique.ttf",
                    "NotoSans-Italic.ttf",
                ],
                &[
                    "LiberationSans-BoldItalic.ttf",
                    "arialbi.ttf",
                    "DejaVuSans-BoldOblique.ttf",
                    "NotoSans-BoldItalic.ttf",
                ],
            );
        }
        "serif" | "times" | "times roman" | "times new roman" => {
            extend_style_candidates(
                &mut out,
                style,
                &["LiberationSerif-Regular.ttf", "times.ttf", "DejaVuSerif.ttf"],
                &["LiberationSerif-Bold.ttf", "timesbd.ttf", "DejaVuSerif-Bold.ttf"],
                &["LiberationSerif-Italic.ttf", "timesi.ttf", "DejaVuSerif-Italic.ttf"],
                &[
                    "LiberationSerif-BoldItalic.ttf",
                    "timesbi.ttf",
                    "DejaVuSerif-BoldItalic.ttf",
                ],
            );
        }
        "monospace" | "ui-monospace" | "courier" | "courier new" => {
            extend_style_candidates(
                &mut out,
                style,
                &["LiberationMono-Regular.ttf", "cour.ttf", "DejaVuSansMono.ttf"],
                &["LiberationMono-Bold.ttf", "courbd.ttf", "DejaVuSansMono-Bold.ttf"],
                &["LiberationMono-Italic.ttf", "couri.ttf", "DejaVuSansMono-Oblique.ttf"],
                &[
                    "LiberationMono-BoldItalic.ttf",
                    "courbi.ttf",
                    "DejaVuSansMono-BoldOblique.ttf",
                ],
            );
        }
        _ => {
            let normalized: String = family
                .split_whitespace()
                .map(|word| {
                    let mut chars = word.chars();
                    match chars.next() {
                        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                        None => String::new(),
                    }
                })
                .collect();
            if normalized.is_empty() {
                return out;
            }
            let suffixes: &[&str] = match style {
                FontStyleVariant::Regular => &["-Regular", ""],
                FontStyleVariant::Bold => &["-Bold", "Bold", ""],
                FontStyleVariant::Italic => &["-Italic", "-Oblique", "Italic", ""],
                FontStyleVariant::BoldItalic => &["-BoldItalic", "-BoldOblique", "BoldItalic", ""],
            };
            for suffix in suffixes {
                for ext in ["ttf", "otf"] {
                    out.push(format!("{normalized}{suffix}.{ext}"));
                }
            }
        }
    }
    out
}

fn extend_style_candidates(
    out: &mut Vec<String>,
    style: FontStyleVariant,
    regular: &[&str],
    bold: &[&str],
    italic: &[&str],
    bold_italic: &[&str],
) {
    let ordered: &[&[&str]] = match style {
        FontStyleVariant::Regular => &[regular],
        FontStyleVariant::Bold => &[bold, regular],
        FontStyleVariant::Italic => &[italic, regular],
        FontStyleVariant::BoldItalic => &[bold_italic, bold, italic, regular],
    };
    for group in ordered {
        out.extend(group.iter().map(|name| name.to_string()));
    }
}

/// Standard-14 face used by the vector backends for `spec`.
pub(crate) fn base14_name(spec: &FontSpec) -> &'static str {
    let style = FontStyleVariant::from_spec(spec);
    let family = family_list(&spec.family)
        .into_iter()
        .find(|f| !f.is_empty())
        .unwrap_or_default();
    let kind = if family.contains("mono") || family.contains("courier") {
        2
    } else if family == "serif" || family.contains("times") || family.contains("georgia") {
        1
    } else {
        0
    };
    const NAMES: [[&str; 4]; 3] = [
        ["Helvetica", "Helvetica-Bold", "Helvetica-Oblique", "Helvetica-BoldOblique"],
        ["Times-Roman", "Times-Bold", "Times-Italic", "Times-BoldItalic"],
        ["Courier", "Courier-Bold", "Courier-Oblique", "Courier-BoldOblique"],
    ];
    let column = match style {
        FontStyleVariant::Regular => 0,
        FontStyleVariant::Bold => 1,
        FontStyleVariant::Italic => 2,
        FontStyleVariant::BoldItalic => 3,
    };
    NAMES[kind][column]
}

/// Encodes `text` for a standard-14 font with WinAnsi encoding. Characters
/// outside the encoding become `?`.
pub(crate) fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|ch| match ch as u32 {
            0x20..=0x7E | 0xA0..=0xFF => ch as u8,
            0x20AC => 0x80,
            0x2026 => 0x85,
            0x2018 => 0x91,
            0x2019 => 0x92,
            0x201C => 0x93,
            0x201D => 0x94,
            0x2022 => 0x95,
            0x2013 => 0x96,
            0x2014 => 0x97,
            0x2122 => 0x99,
            _ => b'?',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(family: &str, weight: u16, italic: bool) -> FontSpec {
        FontSpec {
            family: family.to_string(),
            weight,
            italic,
        }
    }

    #[test]
    fn base14_follows_generic_family_and_style() {
        assert_eq!(base14_name(&spec("sans-serif", 400, false)), "Helvetica");
        assert_eq!(base14_name(&spec("'Times New Roman', serif", 700, false)), "Times-Bold");
        assert_eq!(base14_name(&spec("monospace", 700, true)), "Courier-BoldOblique");
        assert_eq!(base14_name(&spec("Fancy", 400, true)), "Helvetica-Oblique");
    }

    #[test]
    fn win_ansi_maps_latin1_and_punctuation() {
        assert_eq!(encode_win_ansi("Aé€—漢"), vec![b'A', 0xE9, 0x80, 0x97, b'?']);
    }

    #[test]
    fn candidates_prefer_requested_style() {
        let bold = font_file_candidates("sans-serif", FontStyleVariant::Bold);
        assert_eq!(bold[0], "LiberationSans-Bold.ttf");
        assert!(bold.contains(&"LiberationSans-Regular.ttf".to_string()));
        let named = font_file_candidates("open sans", FontStyleVariant::Italic);
        assert_eq!(named[0], "OpenSans-Italic.ttf");
    }

    #[test]
    fn measuring_is_positive_and_scales_with_size() {
        let s = spec("sans-serif", 400, false);
        let fonts = FontDb::new();
        let small = fonts.measure_text("Hello", &s, 10.0);
        let large = fonts.measure_text("Hello", &s, 20.0);
        assert!(small > 0.0);
        assert!((large - 2.0 * small).abs() < 0.01);
        assert_eq!(fonts.measure_text("", &s, 10.0), 0.0);
        assert_eq!(fallback_width("abcd", 10.0), 22.0);
    }

    #[test]
    fn font_index_walks_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("truetype/dejavu");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("Demo-Regular.TTF"), b"not a font").unwrap();
        std::fs::write(nested.join("readme.txt"), b"x").unwrap();
        let index = build_font_file_index(&[dir.path().to_path_buf()]);
        assert_eq!(index.len(), 1);
        assert!(index.contains_key("demo-regular.ttf"));
        let fonts = FontDb::with_dirs(vec![dir.path().to_path_buf()]);
        assert_eq!(fonts.load_from_candidates(&["demo-regular.ttf".to_string()]), None);
    }

    #[test]
    fn font_databases_do_not_share_state() {
        let empty = tempfile::tempdir().unwrap();
        let stocked = tempfile::tempdir().unwrap();
        std::fs::write(stocked.path().join("Demo-Regular.ttf"), b"not a font").unwrap();

        let first = FontDb::with_dirs(vec![empty.path().to_path_buf()]);
        let second = FontDb::with_dirs(vec![stocked.path().to_path_buf()]);
        assert_eq!(first.resolve(&spec("Demo", 400, false)), None);
        assert!(!first.loaded.borrow().is_empty());
        assert!(second.loaded.borrow().is_empty());
        assert!(first.index().is_empty());
        assert_eq!(second.index().len(), 1);
        // The first lookup left nothing behind for a fresh database.
        assert!(FontDb::with_dirs(vec![empty.path().to_path_buf()]).loaded.borrow().is_empty());
    }
}

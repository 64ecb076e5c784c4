use std::path::{Path, PathBuf};

use base64::Engine;

use crate::error::ConvertError;
use crate::types::RasterImage;

/// Splits a `data:` URI into its media type and decoded payload.
pub(crate) fn parse_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    let rest = uri.trim().strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header
        .split(';')
        .next()
        .filter(|v| !v.is_empty())
        .unwrap_or("text/plain")
        .to_ascii_lowercase();
    let data = if header.split(';').any(|p| p.eq_ignore_ascii_case("base64")) {
        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        base64::engine::general_purpose::STANDARD
            .decode(compact)
            .ok()?
    } else {
        percent_decode(payload)
    };
    Some((mime, data))
}

fn percent_decode(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = |b: u8| (b as char).to_digit(16);
            if let (Some(hi), Some(lo)) = (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

/// Resolves `href` against `base`, accepting plain paths and `file://` URLs.
pub(crate) fn resolve_file_path(href: &str, base: Option<&Path>) -> Option<PathBuf> {
    let raw = href.trim();
    let raw = match raw.strip_prefix("file://") {
        Some(stripped) => stripped,
        None if raw.contains("://") => return None,
        None => raw,
    };
    let path = PathBuf::from(String::from_utf8_lossy(&percent_decode(raw)).into_owned());
    if path.is_absolute() {
        return Some(path);
    }
    match base {
        Some(base) if base.is_dir() => Some(base.join(path)),
        Some(base) => Some(
            base.parent()
                .map(|dir| dir.join(&path))
                .unwrap_or(path),
        ),
        None => Some(path),
    }
}

/// Fetches the bytes behind a location: a `data:` URI, a `file://` URL or a
/// filesystem path.
pub(crate) fn load_location(location: &str, base: Option<&Path>) -> Result<Vec<u8>, ConvertError> {
    if location.trim_start().starts_with("data:") {
        return parse_data_uri(location)
            .map(|(_, data)| data)
            .ok_or_else(|| ConvertError::Config(format!("malformed data URI {:?}", truncate(location))));
    }
    let path = resolve_file_path(location, base).ok_or_else(|| {
        ConvertError::Config(format!("unsupported location scheme in {:?}", truncate(location)))
    })?;
    Ok(std::fs::read(path)?)
}

fn truncate(value: &str) -> &str {
    match value.char_indices().nth(64) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

/// Decodes PNG or JPEG bytes into straight RGBA.
pub(crate) fn decode_image(data: &[u8], mime: Option<&str>) -> Option<RasterImage> {
    let format = match mime {
        Some(m) if m.contains("png") => Some(image::ImageFormat::Png),
        Some(m) if m.contains("jpeg") || m.contains("jpg") => Some(image::ImageFormat::Jpeg),
        _ => image::guess_format(data).ok(),
    };
    let decoded = match format {
        Some(fmt) => image::load_from_memory_with_format(data, fmt).ok()?,
        None => image::load_from_memory(data).ok()?,
    };
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    if width == 0 || height == 0 {
        return None;
    }
    Some(RasterImage {
        width,
        height,
        rgba: rgba.into_raw(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_uri_base64_and_percent_payloads() {
        let (mime, data) = parse_data_uri("data:text/plain;base64,SGVs bG8=").unwrap();
        assert_eq!(mime, "text/plain");
        assert_eq!(data, b"Hello");
        let (mime, data) = parse_data_uri("data:image/svg+xml,%3Csvg%3E").unwrap();
        assert_eq!(mime, "image/svg+xml");
        assert_eq!(data, b"<svg>");
        assert!(parse_data_uri("http://example.com").is_none());
    }

    #[test]
    fn file_paths_resolve_against_base() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("drawing.svg");
        std::fs::write(&doc, b"x").unwrap();
        let resolved = resolve_file_path("img/a.png", Some(&doc)).unwrap();
        assert_eq!(resolved, dir.path().join("img/a.png"));
        let resolved = resolve_file_path("a.png", Some(dir.path())).unwrap();
        assert_eq!(resolved, dir.path().join("a.png"));
        assert!(resolve_file_path("https://example.com/a.png", None).is_none());
        assert_eq!(
            resolve_file_path("file:///tmp/a%20b.png", None).unwrap(),
            PathBuf::from("/tmp/a b.png")
        );
    }

    #[test]
    fn load_location_reads_files_and_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.svg");
        std::fs::write(&path, b"<svg/>").unwrap();
        let location = path.to_string_lossy().into_owned();
        assert_eq!(load_location(&location, None).unwrap(), b"<svg/>");
        assert_eq!(load_location("data:,abc", None).unwrap(), b"abc");
        assert!(matches!(
            load_location("ftp://host/x.svg", None),
            Err(ConvertError::Config(_))
        ));
    }

    #[test]
    fn decodes_png_payload() {
        let mut src = image::RgbaImage::new(2, 1);
        src.put_pixel(1, 0, image::Rgba([255, 0, 0, 128]));
        let mut bytes = Vec::new();
        src.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        let img = decode_image(&bytes, Some("image/png")).unwrap();
        assert_eq!((img.width, img.height), (2, 1));
        assert_eq!(&img.rgba[4..8], &[255, 0, 0, 128]);
        assert!(!img.is_opaque());
    }
}

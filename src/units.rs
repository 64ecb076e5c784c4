//! Length resolution. Every length in the document ends up in CSS pixels
//! (96 per inch), the user unit of the root viewport.

pub const PX_PER_INCH: f32 = 96.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UnitError {
    #[error("unrecognized unit {unit:?} in length {raw:?}")]
    UnknownUnit { raw: String, unit: String },
    #[error("malformed length {0:?}")]
    Malformed(String),
    #[error("percentage length {0:?} has no reference box")]
    NoReferenceBox(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthUnit {
    None,
    Px,
    Pt,
    Pc,
    Mm,
    Cm,
    In,
    Q,
    Percent,
    Em,
    Ex,
}

impl LengthUnit {
    fn from_suffix(suffix: &str) -> Option<LengthUnit> {
        let unit = match suffix.to_ascii_lowercase().as_str() {
            "" => LengthUnit::None,
            "px" => LengthUnit::Px,
            "pt" => LengthUnit::Pt,
            "pc" => LengthUnit::Pc,
            "mm" => LengthUnit::Mm,
            "cm" => LengthUnit::Cm,
            "in" => LengthUnit::In,
            "q" => LengthUnit::Q,
            "%" => LengthUnit::Percent,
            "em" => LengthUnit::Em,
            "ex" => LengthUnit::Ex,
            _ => return None,
        };
        Some(unit)
    }
}

/// Which dimension of the reference box a percentage refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Horizontal,
    Vertical,
    /// sqrt(w^2 + h^2) / sqrt(2), used by radii and stroke widths.
    Diagonal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceBox {
    pub width: f32,
    pub height: f32,
}

impl ReferenceBox {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    fn extent(&self, axis: Axis) -> f32 {
        match axis {
            Axis::Horizontal => self.width,
            Axis::Vertical => self.height,
            Axis::Diagonal => {
                libm::sqrtf(self.width * self.width + self.height * self.height)
                    / std::f32::consts::SQRT_2
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Length {
    pub value: f32,
    pub unit: LengthUnit,
}

impl Length {
    pub const ZERO: Length = Length {
        value: 0.0,
        unit: LengthUnit::None,
    };

    pub fn new(value: f32, unit: LengthUnit) -> Self {
        Self { value, unit }
    }

    pub fn percent(value: f32) -> Self {
        Self::new(value, LengthUnit::Percent)
    }

    pub fn parse(raw: &str) -> Result<Length, UnitError> {
        let trimmed = raw.trim();
        let (value, consumed) =
            split_number(trimmed).ok_or_else(|| UnitError::Malformed(raw.to_string()))?;
        let suffix = trimmed[consumed..].trim();
        let unit = LengthUnit::from_suffix(suffix).ok_or_else(|| UnitError::UnknownUnit {
            raw: raw.to_string(),
            unit: suffix.to_string(),
        })?;
        Ok(Length { value, unit })
    }

    /// Resolves to CSS pixels. `reference` is only consulted for percentages.
    pub fn resolve(
        self,
        axis: Axis,
        reference: Option<ReferenceBox>,
        font_size: f32,
    ) -> Result<f32, UnitError> {
        let px = match self.unit {
            LengthUnit::None | LengthUnit::Px => self.value,
            LengthUnit::Pt => self.value * PX_PER_INCH / 72.0,
            LengthUnit::Pc => self.value * PX_PER_INCH / 6.0,
            LengthUnit::Mm => self.value * PX_PER_INCH / 25.4,
            LengthUnit::Cm => self.value * PX_PER_INCH / 2.54,
            LengthUnit::Q => self.value * PX_PER_INCH / 101.6,
            LengthUnit::In => self.value * PX_PER_INCH,
            LengthUnit::Em => self.value * font_size,
            LengthUnit::Ex => self.value * font_size / 2.0,
            LengthUnit::Percent => {
                let reference = reference
                    .ok_or_else(|| UnitError::NoReferenceBox(format!("{}%", self.value)))?;
                reference.extent(axis) * self.value / 100.0
            }
        };
        Ok(px)
    }
}

/// Parses and resolves `raw` in one step.
pub fn resolve(
    raw: &str,
    axis: Axis,
    reference: Option<ReferenceBox>,
    font_size: f32,
) -> Result<f32, UnitError> {
    Length::parse(raw)?.resolve(axis, reference, font_size)
}

/// Splits the leading number off `input`, returning it with the byte count it
/// occupied. An exponent is only taken when digits follow, so `2em` and `3ex`
/// keep their font-relative suffix.
pub(crate) fn split_number(input: &str) -> Option<(f32, usize)> {
    let bytes = input.as_bytes();
    let mut i = 0usize;
    if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
        i += 1;
    }
    let mut digits = 0usize;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
        digits += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
            digits += 1;
        }
    }
    if digits == 0 {
        return None;
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            i = j;
        }
    }
    let value = input[..i].parse::<f32>().ok()?;
    value.is_finite().then_some((value, i))
}

/// Plain number such as an opacity or a miter limit. `50%` reads as 0.5.
pub(crate) fn parse_number(raw: &str) -> Option<f32> {
    let trimmed = raw.trim();
    let (value, consumed) = split_number(trimmed)?;
    match trimmed[consumed..].trim() {
        "" => Some(value),
        "%" => Some(value / 100.0),
        _ => None,
    }
}

/// Whitespace and/or comma separated list of lengths.
pub(crate) fn parse_length_list(raw: &str) -> Result<Vec<Length>, UnitError> {
    raw.split(|c: char| c == ',' || c.is_ascii_whitespace())
        .filter(|part| !part.is_empty())
        .map(Length::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_of_two_hundred() {
        let reference = Some(ReferenceBox::new(200.0, 80.0));
        assert_eq!(
            resolve("50%", Axis::Horizontal, reference, 16.0).unwrap(),
            100.0
        );
        assert_eq!(resolve("50%", Axis::Vertical, reference, 16.0).unwrap(), 40.0);
    }

    #[test]
    fn diagonal_percentage_uses_normalized_diagonal() {
        let reference = Some(ReferenceBox::new(300.0, 400.0));
        let px = resolve("10%", Axis::Diagonal, reference, 16.0).unwrap();
        let expected = 500.0 / std::f32::consts::SQRT_2 / 10.0;
        assert!((px - expected).abs() < 1e-3);
    }

    #[test]
    fn absolute_and_font_relative_units() {
        let cases = [
            ("1in", 96.0),
            ("72pt", 96.0),
            ("6pc", 96.0),
            ("25.4mm", 96.0),
            ("2.54cm", 96.0),
            ("12", 12.0),
            ("12px", 12.0),
            ("2em", 20.0),
            ("2ex", 10.0),
            ("1e1", 10.0),
            ("-.5px", -0.5),
        ];
        for (raw, expected) in cases {
            let px = resolve(raw, Axis::Horizontal, None, 10.0).unwrap();
            assert!((px - expected).abs() < 1e-3, "{raw} -> {px}");
        }
    }

    #[test]
    fn unknown_suffix_is_rejected() {
        let err = resolve("12furlongs", Axis::Horizontal, None, 16.0).unwrap_err();
        assert!(matches!(err, UnitError::UnknownUnit { ref unit, .. } if unit == "furlongs"));
        assert!(matches!(
            Length::parse("px"),
            Err(UnitError::Malformed(_))
        ));
    }

    #[test]
    fn percentage_without_reference_box_fails() {
        let err = resolve("10%", Axis::Vertical, None, 16.0).unwrap_err();
        assert!(matches!(err, UnitError::NoReferenceBox(_)));
    }

    #[test]
    fn plain_numbers_and_lists() {
        assert_eq!(parse_number("0.25"), Some(0.25));
        assert_eq!(parse_number("50%"), Some(0.5));
        assert_eq!(parse_number("abc"), None);
        let list = parse_length_list("5, 10 2mm").unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[2].unit, LengthUnit::Mm);
    }
}

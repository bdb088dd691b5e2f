use std::path::Path;

use chrono::NaiveDate;
use dicom::core::Tag;
use dicom::object::{open_file, DefaultDicomObject};

use crate::error::{DeidError, Result};
use crate::walker::Record;

/// Decode one file, reporting the path on failure.
pub fn open_record(path: &Path) -> Result<DefaultDicomObject> {
    open_file(path).map_err(|e| DeidError::Decode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Typed reads of top-level elements. Each accessor states its own fallback:
/// text falls back to a caller-supplied sentinel, typed values to `None`.
pub trait ElementAccess {
    fn element_str(&self, tag: Tag) -> Option<String>;

    fn has_element(&self, tag: Tag) -> bool;

    fn text_or(&self, tag: Tag, default: &str) -> String {
        self.element_str(tag)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    fn date(&self, tag: Tag) -> Option<NaiveDate> {
        self.element_str(tag).as_deref().and_then(parse_da)
    }

    fn float(&self, tag: Tag) -> Option<f64> {
        self.element_str(tag).as_deref().and_then(parse_float)
    }

    fn integer(&self, tag: Tag) -> Option<i64> {
        self.element_str(tag)
            .and_then(|s| s.parse::<i64>().ok())
    }
}

impl ElementAccess for Record {
    fn element_str(&self, tag: Tag) -> Option<String> {
        self.element(tag)
            .ok()
            .and_then(|e| e.to_str().ok())
            .map(|s| s.trim_matches(|c: char| c.is_whitespace() || c == '\0').to_string())
    }

    fn has_element(&self, tag: Tag) -> bool {
        self.element(tag).is_ok()
    }
}

/// Parse an 8-digit `YYYYMMDD` date; anything else is `None`.
pub fn parse_da(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.len() != 8 || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(text, "%Y%m%d").ok()
}

/// Render a date back to the 8-digit form used in directory names.
pub fn format_da(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format("%Y%m%d").to_string())
        .unwrap_or_default()
}

fn parse_float(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::{DataElement, PrimitiveValue, VR};

    #[test]
    fn dates_require_eight_digits() {
        assert_eq!(parse_da("20240115"), NaiveDate::from_ymd_opt(2024, 1, 15));
        assert_eq!(parse_da("20240115 "), NaiveDate::from_ymd_opt(2024, 1, 15));
        assert_eq!(parse_da("2024-01-15"), None);
        assert_eq!(parse_da("20241345"), None);
        assert_eq!(parse_da(""), None);
        assert_eq!(parse_da("UNKNOWN"), None);
    }

    #[test]
    fn formatted_date_is_empty_without_date() {
        assert_eq!(format_da(parse_da("20240115")), "20240115");
        assert_eq!(format_da(None), "");
    }

    #[test]
    fn typed_reads_fall_back() {
        let mut obj = Record::new_empty();
        obj.put(DataElement::new(
            Tag(0x0010, 0x1020),
            VR::DS,
            PrimitiveValue::from("1.75 "),
        )); // PatientSize
        obj.put(DataElement::new(
            Tag(0x0010, 0x1030),
            VR::DS,
            PrimitiveValue::from("heavy"),
        )); // PatientWeight
        obj.put(DataElement::new(
            Tag(0x0018, 0x1000),
            VR::LO,
            PrimitiveValue::from("42110"),
        )); // DeviceSerialNumber

        assert_eq!(obj.float(Tag(0x0010, 0x1020)), Some(1.75));
        assert_eq!(obj.float(Tag(0x0010, 0x1030)), None);
        assert_eq!(obj.integer(Tag(0x0018, 0x1000)), Some(42110));
        assert_eq!(obj.text_or(Tag(0x0010, 0x0040), "UNKNOWN"), "UNKNOWN");
        assert!(!obj.has_element(Tag(0x0010, 0x0040)));
    }
}

// Utility helpers for parsing and number formatting.
//
// All the "dirty" cell handling (numbers exported as text, dates in several
// layouts, Excel serial dates) lives here so the rest of the code can assume
// typed values.
use chrono::{Duration, NaiveDate, NaiveDateTime};
use num_format::{Locale, ToFormattedString};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

/// Parse a string-like value into `f64` while being forgiving about
/// formatting issues that are common in spreadsheet exports.
///
/// - Trims whitespace.
/// - Rejects values that contain alphabetic characters (except an exponent).
/// - Strips inner spaces and well-formed thousands separators (`1,234.5`).
/// - Rejects any other comma, so a decimal comma (`1,5`) is not read as `15`.
/// - Returns `None` for anything that cannot be safely parsed.
pub fn parse_f64_safe(s: Option<&str>) -> Option<f64> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    if s.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return None;
    }
    let s: String = s.chars().filter(|c| *c != ' ').collect();
    if s.contains(',') && !has_thousands_groups(&s) {
        return None;
    }
    let s = s.replace(',', "");
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// `1,234` or `-12,345,678.9`: a 1-3 digit lead group, then groups of three.
fn has_thousands_groups(s: &str) -> bool {
    let body = s.trim_start_matches(['-', '+']);
    let int_part = body.split('.').next().unwrap_or(body);
    let mut groups = int_part.split(',');
    let all_digits = |g: &str| g.chars().all(|c| c.is_ascii_digit());
    match groups.next() {
        Some(lead) if (1..=3).contains(&lead.len()) && all_digits(lead) => {}
        _ => return false,
    }
    groups.all(|g| g.len() == 3 && all_digits(g))
}

/// Numeric coercion used for amount columns: anything unparseable counts as zero.
pub fn parse_amount(s: Option<&str>) -> f64 {
    parse_f64_safe(s).unwrap_or(0.0)
}

/// Parse a date cell. Accepts plain dates, date-times (time part dropped) and
/// Excel serial numbers as produced by workbooks that store dates as floats.
pub fn parse_date_safe(s: Option<&str>) -> Option<NaiveDate> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    s.parse::<f64>().ok().and_then(excel_serial_to_date)
}

/// Excel counts days from 1899-12-30 (the 1900 leap-year bug included).
pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 || serial > 2_958_465.0 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::days(serial.trunc() as i64))
}

/// Trim a text cell, mapping blank values to `None`.
pub fn clean_text(s: Option<&str>) -> Option<String> {
    let s = s?.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

pub fn average(v: &[f64]) -> f64 {
    // Standard arithmetic mean; returns 0 for an empty slice to avoid NaNs.
    if v.is_empty() {
        return 0.0;
    }
    let sum: f64 = v.iter().copied().sum();
    sum / v.len() as f64
}

pub fn format_number(n: f64, decimals: usize) -> String {
    // Fixed number of decimal places plus locale-aware thousands separators
    // (e.g., `1,234,567.89`).
    let neg = n.is_sign_negative() && n != 0.0;
    let abs_n = n.abs();
    let s = format!("{:.*}", decimals, abs_n);
    let mut parts = s.split('.');
    let int_part = parts.next().unwrap_or("0");
    let frac_part = parts.next();
    let int_val: i64 = int_part.parse().unwrap_or(0);
    let mut res = int_val.to_formatted_string(&Locale::en);
    if let Some(frac) = frac_part {
        if decimals > 0 {
            res.push('.');
            res.push_str(frac);
        }
    }
    if neg {
        format!("-{}", res)
    } else {
        res
    }
}

pub fn format_int<T>(n: T) -> String
where
    T: ToFormattedString,
{
    // Counts in console messages (e.g., `9,855 rows loaded`).
    n.to_formatted_string(&Locale::en)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_f64_safe() {
        assert_eq!(parse_f64_safe(Some(" 1,234.5 ")), Some(1234.5));
        assert_eq!(parse_f64_safe(Some("12 000")), Some(12000.0));
        assert_eq!(parse_f64_safe(Some("1e3")), Some(1000.0));
        assert_eq!(parse_f64_safe(Some("abc")), None);
        assert_eq!(parse_f64_safe(Some("")), None);
        assert_eq!(parse_f64_safe(None), None);
    }

    #[test]
    fn test_parse_amount_defaults_to_zero() {
        assert_eq!(parse_amount(Some("n/a")), 0.0);
        assert_eq!(parse_amount(None), 0.0);
        assert_eq!(parse_amount(Some("42")), 42.0);
    }

    #[test]
    fn test_decimal_comma_is_not_a_thousands_separator() {
        assert_eq!(parse_amount(Some("1,5")), 0.0);
        assert_eq!(parse_amount(Some("12,34")), 0.0);
        assert_eq!(parse_amount(Some("1,2345")), 0.0);
        assert_eq!(parse_amount(Some(",500")), 0.0);
        assert_eq!(parse_amount(Some("1,500")), 1500.0);
        assert_eq!(parse_amount(Some("-12,345,678.25")), -12345678.25);
    }

    #[test]
    fn test_parse_date_layouts() {
        let jan5 = NaiveDate::from_ymd_opt(2024, 1, 5);
        assert_eq!(parse_date_safe(Some("2024-01-05")), jan5);
        assert_eq!(parse_date_safe(Some("05/01/2024")), jan5);
        assert_eq!(parse_date_safe(Some("2024-01-05 13:45:00")), jan5);
        assert_eq!(parse_date_safe(Some("2024-01-05T08:00:00")), jan5);
        assert_eq!(parse_date_safe(Some("45296")), jan5);
        assert_eq!(parse_date_safe(Some("not a date")), None);
        assert_eq!(parse_date_safe(Some("  ")), None);
    }

    #[test]
    fn test_excel_serial_bounds() {
        assert_eq!(excel_serial_to_date(0.0), None);
        assert_eq!(excel_serial_to_date(f64::NAN), None);
        assert_eq!(
            excel_serial_to_date(45296.75),
            NaiveDate::from_ymd_opt(2024, 1, 5)
        );
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1234567.891, 2), "1,234,567.89");
        assert_eq!(format_number(-1500.0, 0), "-1,500");
        assert_eq!(format_number(0.0, 2), "0.00");
        assert_eq!(format_int(9855usize), "9,855");
    }

    #[test]
    fn test_average() {
        assert_eq!(average(&[]), 0.0);
        assert_eq!(average(&[10.0, 20.0]), 15.0);
    }
}

//! Built-in template helpers.
//!
//! Helper names are resolved to a closed enum at compile time; invocation
//! never fails and yields an empty string for unusable input.

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use serde_json::Value;

const DEFAULT_DATE_PATTERN: &str = "yyyy/MM/dd";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Helper {
    /// `formatDate value [pattern]`
    FormatDate,
    /// `genderLabel value`
    GenderLabel,
    /// `calculateAge birthDate`
    CalculateAge,
    /// `formatCurrency amount`
    FormatCurrency,
}

impl Helper {
    pub fn from_name(name: &str) -> Option<Helper> {
        match name {
            "formatDate" => Some(Self::FormatDate),
            "genderLabel" => Some(Self::GenderLabel),
            "calculateAge" => Some(Self::CalculateAge),
            "formatCurrency" => Some(Self::FormatCurrency),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::FormatDate => "formatDate",
            Self::GenderLabel => "genderLabel",
            Self::CalculateAge => "calculateAge",
            Self::FormatCurrency => "formatCurrency",
        }
    }

    pub fn invoke(self, args: &[Value]) -> String {
        let first = args.first().unwrap_or(&Value::Null);
        match self {
            Self::FormatDate => {
                let pattern = args
                    .get(1)
                    .and_then(Value::as_str)
                    .unwrap_or(DEFAULT_DATE_PATTERN);
                parse_date_time(first)
                    .map(|value| format_date(&value, pattern))
                    .unwrap_or_default()
            }
            Self::GenderLabel => gender_label(first),
            Self::CalculateAge => parse_date_time(first)
                .and_then(|birth| age_on(birth.date(), Local::now().date_naive()))
                .map(|age| age.to_string())
                .unwrap_or_default(),
            Self::FormatCurrency => as_number(first).map(format_currency).unwrap_or_default(),
        }
    }
}

/// Substitutes `yyyy`, `MM`, `dd`, `HH` and `mm` in `pattern`.
pub fn format_date(value: &NaiveDateTime, pattern: &str) -> String {
    pattern
        .replace("yyyy", &format!("{:04}", value.year()))
        .replace("MM", &format!("{:02}", value.month()))
        .replace("dd", &format!("{:02}", value.day()))
        .replace("HH", &format!("{:02}", value.hour()))
        .replace("mm", &format!("{:02}", value.minute()))
}

/// Full years between `birth` and `today`; `None` when birth is in the future.
pub fn age_on(birth: NaiveDate, today: NaiveDate) -> Option<i32> {
    let mut age = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        age -= 1;
    }
    (age >= 0).then_some(age)
}

/// `¥` followed by the amount rounded to whole yen with `,` grouping.
pub fn format_currency(amount: f64) -> String {
    let rounded = amount.round() as i64;
    let digits = rounded.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    let sign = if rounded < 0 { "-" } else { "" };
    format!("¥{sign}{grouped}")
}

fn gender_label(value: &Value) -> String {
    let Some(raw) = value.as_str() else {
        return String::new();
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "male" | "m" => "男性".to_string(),
        "female" | "f" => "女性".to_string(),
        "other" => "その他".to_string(),
        "" => String::new(),
        _ => raw.to_string(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().replace(',', "").parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|number| number.is_finite())
}

/// Accepts RFC 3339, common date/time layouts, or epoch milliseconds.
pub fn parse_date_time(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::String(raw) => {
            let raw = raw.trim();
            if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
                return Some(parsed.naive_local());
            }
            for layout in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
                if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, layout) {
                    return Some(parsed);
                }
            }
            for layout in ["%Y-%m-%d", "%Y/%m/%d"] {
                if let Ok(parsed) = NaiveDate::parse_from_str(raw, layout) {
                    return parsed.and_hms_opt(0, 0, 0);
                }
            }
            None
        }
        Value::Number(number) => {
            let millis = number.as_i64()?;
            Local
                .timestamp_millis_opt(millis)
                .single()
                .map(|value| value.naive_local())
        }
        _ => None,
    }
}

//! Display formatting for money, percentages and dates.

use chrono::{Datelike, NaiveDate};

const MONTHS: [&str; 12] = [
    "January", "February", "March", "April", "May", "June", "July", "August", "September",
    "October", "November", "December",
];

const WEEKDAYS: [&str; 7] = [
    "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday",
];

/// `1234567.8` -> `"$1,234,568"`.
pub fn format_currency(value: f64) -> String {
    let rounded = value.round();
    let sign = if rounded < 0.0 { "-" } else { "" };
    format!("{}${}", sign, group_thousands(rounded.abs() as u64))
}

/// `40` -> `"40%"`.
pub fn format_percent(percent: u32) -> String {
    format!("{}%", percent)
}

/// `1` -> `"1 day"`, `3` -> `"3 days"`.
pub fn format_days_in_stage(days: u32) -> String {
    if days == 1 {
        "1 day".to_string()
    } else {
        format!("{} days", days)
    }
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Format a date with a date-fns style pattern such as `"dd MMM yyyy"`.
///
/// Supported tokens: `d dd M MM MMM MMMM yy yyyy EEE EEEE`. Anything else is
/// copied through; text in single quotes is literal.
pub fn format_date(date: NaiveDate, pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        if ch == '\'' {
            i += 1;
            while i < chars.len() && chars[i] != '\'' {
                out.push(chars[i]);
                i += 1;
            }
            i += 1;
            continue;
        }

        let mut run = 1;
        while i + run < chars.len() && chars[i + run] == ch {
            run += 1;
        }

        let month = date.month0() as usize;
        let weekday = date.weekday().num_days_from_monday() as usize;
        match (ch, run) {
            ('d', 1) => out.push_str(&date.day().to_string()),
            ('d', _) => out.push_str(&format!("{:02}", date.day())),
            ('M', 1) => out.push_str(&date.month().to_string()),
            ('M', 2) => out.push_str(&format!("{:02}", date.month())),
            ('M', 3) => out.push_str(&MONTHS[month][..3]),
            ('M', _) => out.push_str(MONTHS[month]),
            ('y', 2) => out.push_str(&format!("{:02}", date.year().rem_euclid(100))),
            ('y', _) => out.push_str(&date.year().to_string()),
            ('E', n) if n <= 3 => out.push_str(&WEEKDAYS[weekday][..3]),
            ('E', _) => out.push_str(WEEKDAYS[weekday]),
            _ => {
                for _ in 0..run {
                    out.push(ch);
                }
            }
        }
        i += run;
    }
    out
}

//! Formatting helpers for log output and file names

const MEM_SUFFIXES: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

/// Pretty-print a memory amount, e.g. `1536` -> `"1.5 KiB"`
pub fn mem_string(bytes: usize) -> String {
    let mut mem = bytes as f64;
    let mut idx = 0;
    while mem > 1024.0 && idx < MEM_SUFFIXES.len() - 1 {
        mem /= 1024.0;
        idx += 1;
    }
    let digits = if mem < 10.0 {
        3
    } else if mem < 100.0 {
        4
    } else {
        5
    };
    format!("{} {}", significant(mem, digits), MEM_SUFFIXES[idx])
}

/// Format `value` with at most `digits` significant digits, dropping trailing zeros
fn significant(value: f64, digits: i32) -> String {
    let int_digits = if value >= 1.0 {
        value.log10().floor() as i32 + 1
    } else {
        1
    };
    let decimals = (digits - int_digits).max(0) as usize;
    let formatted = format!("{:.*}", decimals, value);
    if formatted.contains('.') {
        formatted
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    } else {
        formatted
    }
}

/// Thousands separators, e.g. `-1234567` -> `"-1,234,567"`
pub fn add_separators(number: i64) -> String {
    let digits = number.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if number < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// `"<rank>.<nodes>"`, used to tag per-process output
pub fn rank_string(rank: usize, nodes: usize) -> String {
    format!("{}.{}", rank, nodes)
}

pub fn format_time(value: f64) -> String {
    format!("{value:.6}")
}

pub fn delay_ms(seconds: f64) -> u64 {
    (seconds * 1000.0).round().max(0.0) as u64
}

pub fn channel_layout(channels: u32) -> String {
    match channels {
        1 => "mono".to_string(),
        2 => "stereo".to_string(),
        n => format!("{n}c"),
    }
}

/// `between(t,a,b)` timeline expression, quoted for use inside a filter.
pub fn enable_between(start: f64, end: f64) -> String {
    format!(
        "enable='between(t,{start},{end})'",
        start = format_time(start),
        end = format_time(end)
    )
}

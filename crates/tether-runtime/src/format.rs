use std::time::Duration;

/// Human uptime: `Xd Yh Zm`, `Yh Zm`, `Zm Ss` or `Ss`.
pub fn format_uptime(uptime: Duration) -> String {
    let seconds = uptime.as_secs();
    let minutes = seconds / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("{days}d {}h {}m", hours % 24, minutes % 60)
    } else if hours > 0 {
        format!("{hours}h {}m", minutes % 60)
    } else if minutes > 0 {
        format!("{minutes}m {}s", seconds % 60)
    } else {
        format!("{seconds}s")
    }
}

/// Fit `text` into a Discord embed field, marking the cut with `...`.
pub fn truncate_field(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(4)).collect();
    format!("{kept}...")
}

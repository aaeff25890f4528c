//! Quality labels: video heights snap to the standard resolution ladder.

/// Standard video heights offered to users.
pub const STANDARD_HEIGHTS: [u32; 8] = [144, 240, 360, 480, 720, 1080, 1440, 2160];

/// Snaps `height` to the nearest standard rung when it is within
/// max(10% of the rung, 50 px); otherwise returns it unchanged.
///
/// Encoders often crop a few lines (e.g. 1072 for a 1080p upload), so the
/// nominal rung is what users expect to see.
pub fn snap_height(height: u32) -> u32 {
    STANDARD_HEIGHTS
        .iter()
        .copied()
        .filter(|&rung| {
            let tolerance = (rung as f64 * 0.1).max(50.0);
            (height as f64 - rung as f64).abs() <= tolerance
        })
        .min_by_key(|&rung| rung.abs_diff(height))
        .unwrap_or(height)
}

pub fn video_label(height: u32) -> String {
    format!("{}p", snap_height(height))
}

pub fn audio_label(kbps: u32) -> String {
    format!("{kbps}kbps")
}

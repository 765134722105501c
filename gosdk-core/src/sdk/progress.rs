//! Console progress indicator for archive downloads.

use std::io::Write;

use super::http::DownloadProgress;

/// Width of the bar in cells.
pub const PROGRESS_BAR_WIDTH: usize = 5;

const HIDE_CURSOR: &str = "\u{1b}[?25l";
const SHOW_CURSOR: &str = "\u{1b}[?25h";

/// Renders a one-line bar such as `\r[▒▒---] 12Kb/30Kb`.
///
/// The bar starts with a carriage return so consecutive renders overwrite
/// each other. A zero `max` renders an empty bar.
pub fn render_progress_bar(prefix: &str, postfix: &str, value: u64, max: u64, width: usize) -> String {
    let filled = if max == 0 {
        0
    } else {
        ((width as f64) * (value as f64 / max as f64)).round() as usize
    }
    .min(width);

    format!(
        "\r{}{}[{}{}]{}{}",
        HIDE_CURSOR,
        prefix,
        "▒".repeat(filled),
        "-".repeat(width - filled),
        postfix,
        SHOW_CURSOR
    )
}

/// Draws a download progress report on stderr.
///
/// Unknown totals fall back to a byte counter. The final report ends the line.
pub fn draw_download_progress(progress: &DownloadProgress) {
    let loaded = progress.bytes_downloaded / 1024;
    let line = match (progress.total_bytes, progress.percent) {
        (Some(total), Some(percent)) => render_progress_bar(
            "Loading GoSDK:",
            &format!(" {}Kb/{}Kb", loaded, total / 1024),
            u64::from(percent),
            100,
            PROGRESS_BAR_WIDTH,
        ),
        _ => format!("\rLoading GoSDK: {}Kb", loaded),
    };

    let mut stderr = std::io::stderr().lock();
    let _ = stderr.write_all(line.as_bytes());
    if progress.percent == Some(100) {
        let _ = stderr.write_all(b"\n");
    }
    let _ = stderr.flush();
}

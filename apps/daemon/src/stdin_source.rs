//! Line-oriented foreground event feed.
//!
//! Each line is `<package> [<window-class>]`. Blank lines and `#` comments
//! are skipped. Lets a platform helper (or a shell pipe) drive the engine.

use perfmode_engine::ChannelEventSource;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Window class used when a line names only the package.
pub const DEFAULT_CLASS: &str = "Normal";

/// Parse one feed line into `(package, class)`.
pub fn parse_line(line: &str) -> Option<(&str, &str)> {
    let line = line.split('#').next().unwrap_or_default().trim();
    if line.is_empty() {
        return None;
    }

    let mut parts = line.split_whitespace();
    let package = parts.next()?;
    let class = parts.next().unwrap_or(DEFAULT_CLASS);
    Some((package, class))
}

/// Forward lines from `reader` to `source` until EOF. Returns the number of
/// transitions delivered.
pub async fn pump<R>(reader: R, source: &ChannelEventSource) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut delivered = 0;

    while let Some(line) = lines.next_line().await? {
        let Some((package, class)) = parse_line(&line) else {
            continue;
        };
        if source.push(package, class) {
            delivered += 1;
        } else {
            tracing::debug!(package, "engine not subscribed, transition dropped");
        }
    }

    Ok(delivered)
}

//! Text editing for the deny-list artifact.
//!
//! ```text
//! geo $ban {
//!     default 0;
//!     203.0.113.5 1;
//! }
//! ```
//!
//! Entries are one per line. New entries go immediately before the closing
//! `}`; removal deletes lines that match the entry exactly.

/// Header line of the artifact.
pub const HEADER: &str = "geo $ban {";

/// Default mapping for unlisted addresses.
pub const DEFAULT_LINE: &str = "    default 0;";

/// Closing structural marker.
pub const CLOSING: &str = "}";

/// Result of an edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    /// Nothing to do.
    Unchanged,
    /// New artifact text.
    Changed(String),
    /// The closing marker is missing; the artifact must be rebuilt.
    Malformed,
}

/// The line that bans `ip`.
pub fn entry_line(ip: &str) -> String {
    format!("    {ip} 1;")
}

fn is_entry_for(line: &str, ip: &str) -> bool {
    line.trim() == format!("{ip} 1;")
}

/// Render a complete artifact for `ips`.
pub fn render<S: AsRef<str>>(ips: &[S]) -> String {
    let mut out = String::with_capacity(32 + ips.len() * 24);
    out.push_str(HEADER);
    out.push('\n');
    out.push_str(DEFAULT_LINE);
    out.push('\n');
    for ip in ips {
        out.push_str(&entry_line(ip.as_ref()));
        out.push('\n');
    }
    out.push_str(CLOSING);
    out.push('\n');
    out
}

/// Whether `text` already bans `ip`.
pub fn contains(text: &str, ip: &str) -> bool {
    text.lines().any(|line| is_entry_for(line, ip))
}

/// Add `ip` before the last closing marker.
pub fn insert(text: &str, ip: &str) -> Edit {
    if contains(text, ip) {
        return Edit::Unchanged;
    }

    let lines: Vec<&str> = text.lines().collect();
    let Some(close) = lines.iter().rposition(|line| line.trim() == CLOSING) else {
        return Edit::Malformed;
    };

    let entry = entry_line(ip);
    let mut out = String::with_capacity(text.len() + entry.len() + 1);
    for (idx, line) in lines.iter().enumerate() {
        if idx == close {
            out.push_str(&entry);
            out.push('\n');
        }
        out.push_str(line);
        out.push('\n');
    }
    Edit::Changed(out)
}

/// Drop every line that bans exactly `ip`.
pub fn remove(text: &str, ip: &str) -> Edit {
    if !contains(text, ip) {
        return Edit::Unchanged;
    }

    let mut out = String::with_capacity(text.len());
    for line in text.lines().filter(|line| !is_entry_for(line, ip)) {
        out.push_str(line);
        out.push('\n');
    }
    Edit::Changed(out)
}

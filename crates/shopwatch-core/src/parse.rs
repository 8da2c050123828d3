use regex::Regex;
use std::sync::OnceLock;

/// Severity tag of a log line. Lines without a recognizable tag default to
/// `Info`; a bracketed uppercase tag that is none of the three known levels
/// (the producer emits `WARN` on occasion) parses as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warning,
    Error,
    Unknown,
}

impl Level {
    fn from_tag(tag: &str) -> Self {
        match tag {
            "INFO" => Self::Info,
            "WARNING" => Self::Warning,
            "ERROR" => Self::Error,
            _ => Self::Unknown,
        }
    }
}

/// One structured log entry. The timestamp keeps its source formatting
/// (`YYYY-MM-DD HH:MM:SS`); it is never reparsed into a calendar type on the
/// hot path.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEntry {
    pub level: Level,
    pub timestamp: String,
    pub module: String,
    pub message: String,
}

fn timestamp_re() -> &'static Regex {
    static TIMESTAMP_RE: OnceLock<Regex> = OnceLock::new();
    TIMESTAMP_RE.get_or_init(|| {
        Regex::new(r"\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}").expect("valid timestamp regex")
    })
}

fn module_re() -> &'static Regex {
    static MODULE_RE: OnceLock<Regex> = OnceLock::new();
    MODULE_RE.get_or_init(|| Regex::new(r"\[module: (\w+)\]").expect("valid module regex"))
}

fn level_re() -> &'static Regex {
    static LEVEL_RE: OnceLock<Regex> = OnceLock::new();
    LEVEL_RE.get_or_init(|| Regex::new(r"\[([A-Z]+)\]").expect("valid level regex"))
}

/// Widens a match range to swallow a bracket pair directly around it, so a
/// `[2024-01-01 10:00:00]` tag leaves no empty `[]` behind in the message.
fn widen_brackets(line: &str, start: usize, end: usize) -> (usize, usize) {
    let bytes = line.as_bytes();
    if start > 0 && bytes[start - 1] == b'[' && end < bytes.len() && bytes[end] == b']' {
        (start - 1, end + 1)
    } else {
        (start, end)
    }
}

/// Parses one raw line into a `ParsedEntry`, or `None` when the line carries
/// no timestamp or no module tag.
///
/// Each field is located independently rather than through one rigid
/// whole-line pattern, so reordered tags and additive format drift still
/// parse. The message is whatever remains after the matched tags are removed.
pub fn parse_line(line: &str) -> Option<ParsedEntry> {
    let ts = timestamp_re().find(line)?;
    let module_caps = module_re().captures(line)?;
    let module_span = module_caps.get(0).expect("whole-match group");
    let level_caps = level_re().captures(line);

    let level = match &level_caps {
        Some(caps) => Level::from_tag(&caps[1]),
        None => Level::Info,
    };

    let mut cuts = vec![
        widen_brackets(line, ts.start(), ts.end()),
        (module_span.start(), module_span.end()),
    ];
    if let Some(caps) = &level_caps {
        let span = caps.get(0).expect("whole-match group");
        cuts.push((span.start(), span.end()));
    }
    cuts.sort_unstable();

    let mut rest = String::with_capacity(line.len());
    let mut pos = 0;
    for (start, end) in cuts {
        if start >= pos {
            rest.push_str(&line[pos..start]);
            pos = end;
        }
    }
    rest.push_str(&line[pos..]);

    let message = rest.split_whitespace().collect::<Vec<_>>().join(" ");

    Some(ParsedEntry {
        level,
        timestamp: ts.as_str().to_string(),
        module: module_caps[1].to_string(),
        message,
    })
}

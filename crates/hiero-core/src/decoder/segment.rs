/// One input sentence with its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub id: u64,
    pub words: Vec<String>,
}

impl Segment {
    /// Parse a line, honoring an optional `<seg id="N">…</seg>` wrapper.
    /// Lines without a usable id get `default_id`.
    pub fn parse(line: &str, default_id: u64) -> Self {
        let line = line.trim();
        let (id, body) = match strip_seg(line) {
            Some((id, body)) => (id.unwrap_or(default_id), body),
            None => (default_id, line),
        };
        Self {
            id,
            words: body.split_whitespace().map(str::to_string).collect(),
        }
    }
}

fn strip_seg(line: &str) -> Option<(Option<u64>, &str)> {
    let rest = line.strip_prefix("<seg")?;
    let close = rest.find('>')?;
    let attrs = &rest[..close];
    let body = rest[close + 1..].trim_end();
    let body = body.strip_suffix("</seg>").unwrap_or(body);
    let id = attrs.split_whitespace().find_map(|attr| {
        let value = attr.strip_prefix("id=")?;
        value.trim_matches(|c| c == '"' || c == '\'').parse().ok()
    });
    Some((id, body.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_line() {
        let s = Segment::parse("  a b  c ", 7);
        assert_eq!(s.id, 7);
        assert_eq!(s.words, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_seg_wrapper() {
        let s = Segment::parse("<seg id=\"42\"> a b </seg>", 0);
        assert_eq!(s.id, 42);
        assert_eq!(s.words, vec!["a", "b"]);
    }

    #[test]
    fn test_seg_without_id_uses_default() {
        let s = Segment::parse("<seg>x</seg>", 3);
        assert_eq!(s.id, 3);
        assert_eq!(s.words, vec!["x"]);
    }

    #[test]
    fn test_empty_line() {
        let s = Segment::parse("", 1);
        assert!(s.words.is_empty());
    }
}

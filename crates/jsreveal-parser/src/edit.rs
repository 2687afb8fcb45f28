use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Edit {
    range: Range<usize>,
    replacement: String,
}

/// A batch of byte-range replacements over one source string. Edits never overlap: an edit that
/// intersects one already queued is refused.
#[derive(Debug, Clone, Default)]
pub struct EditSet {
    edits: Vec<Edit>,
}

impl EditSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&mut self, range: Range<usize>, replacement: impl Into<String>) -> bool {
        if range.start > range.end {
            return false;
        }
        let overlaps = self.edits.iter().any(|e| {
            let empty = range.start == range.end || e.range.start == e.range.end;
            if empty {
                // Insertions conflict only when they land strictly inside another edit.
                (range.start > e.range.start && range.start < e.range.end)
                    || (e.range.start > range.start && e.range.start < range.end)
                    || (range.start == e.range.start && range.end == e.range.end)
            } else {
                range.start < e.range.end && e.range.start < range.end
            }
        });
        if overlaps {
            return false;
        }
        self.edits.push(Edit {
            range,
            replacement: replacement.into(),
        });
        true
    }

    pub fn remove(&mut self, range: Range<usize>) -> bool {
        self.replace(range, String::new())
    }

    pub fn insert(&mut self, at: usize, text: impl Into<String>) -> bool {
        self.replace(at..at, text)
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Applies every edit to `source`. Ranges past the end of `source` are ignored.
    pub fn apply(&self, source: &str) -> String {
        let mut edits: Vec<&Edit> = self
            .edits
            .iter()
            .filter(|e| {
                e.range.end <= source.len()
                    && source.is_char_boundary(e.range.start)
                    && source.is_char_boundary(e.range.end)
            })
            .collect();
        edits.sort_by_key(|e| (e.range.start, e.range.end));

        let mut out = String::with_capacity(source.len());
        let mut pos = 0;
        for edit in edits {
            if edit.range.start < pos {
                continue;
            }
            out.push_str(&source[pos..edit.range.start]);
            out.push_str(&edit.replacement);
            pos = edit.range.end;
        }
        out.push_str(&source[pos..]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_apply_edits_in_order() {
        let source = "var a = 1 + 2;";
        let mut edits = EditSet::new();
        assert!(edits.replace(8..13, "3"));
        assert!(edits.replace(4..5, "total"));
        assert_eq!(edits.apply(source), "var total = 3;");
    }

    #[test]
    fn test_overlapping_edit_rejected() {
        let mut edits = EditSet::new();
        assert!(edits.replace(0..5, "x"));
        assert!(!edits.replace(3..8, "y"));
        assert!(edits.insert(5, ";"));
        assert_eq!(edits.len(), 2);
        assert_eq!(edits.apply("abcdefgh"), "x;fgh");
    }

    #[test]
    fn test_remove() {
        let mut edits = EditSet::new();
        assert!(edits.remove(0..5));
        assert_eq!(edits.apply("dead code"), "code");
    }
}

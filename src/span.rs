//! Source locations as consumed from the parser collaborator and attached to
//! IR nodes as annotations.

use std::fmt::Display;

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Span {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub line_end: usize,
    pub column_end: usize,
}

impl Span {
    pub fn new(file: impl ToString, line: usize, column: usize) -> Span {
        Span {
            file: file.to_string(),
            line,
            column,
            line_end: line,
            column_end: column,
        }
    }

    /// Smallest span covering both `self` and `other`. Files are expected to
    /// match; the first file name wins.
    pub fn merge(&self, other: &Span) -> Span {
        let mut merged = self.clone();
        if (other.line_end, other.column_end) > (merged.line_end, merged.column_end) {
            merged.line_end = other.line_end;
            merged.column_end = other.column_end;
        }
        if (other.line, other.column) < (merged.line, merged.column) {
            merged.line = other.line;
            merged.column = other.column;
        }
        merged
    }
}

impl Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::Span;

    #[test]
    fn test_merge() {
        let mut a = Span::new("f.c", 3, 1);
        a.line_end = 3;
        a.column_end = 10;
        let mut b = Span::new("f.c", 4, 2);
        b.line_end = 5;
        b.column_end = 1;

        let merged = a.merge(&b);
        assert_eq!((merged.line, merged.column), (3, 1));
        assert_eq!((merged.line_end, merged.column_end), (5, 1));
    }

    #[test]
    fn test_display() {
        assert_eq!(Span::new("main.c", 12, 4).to_string(), "main.c:12:4");
    }
}

//! Aligned table printing for listings.

use std::io::{self, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Left,
    Right,
}

/// Collects rows of cells and prints them with per-column alignment.
#[derive(Debug)]
pub struct ConsoleTable {
    alignments: Vec<Alignment>,
    rows: Vec<Vec<String>>,
}

impl ConsoleTable {
    pub fn new(alignments: &[Alignment]) -> Self {
        Self {
            alignments: alignments.to_vec(),
            rows: Vec::new(),
        }
    }

    pub fn row<I, S>(&mut self, cells: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cells: Vec<String> = cells.into_iter().map(Into::into).collect();
        debug_assert_eq!(cells.len(), self.alignments.len());
        self.rows.push(cells);
    }

    pub fn print(&self, out: &mut impl Write) -> io::Result<()> {
        let mut widths = vec![0usize; self.alignments.len()];
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.len());
            }
        }

        for row in &self.rows {
            let mut line = String::new();
            for (i, cell) in row.iter().enumerate() {
                if i > 0 {
                    line.push_str("  ");
                }
                match self.alignments[i] {
                    Alignment::Right => {
                        for _ in cell.len()..widths[i] {
                            line.push(' ');
                        }
                        line.push_str(cell);
                    }
                    Alignment::Left => {
                        line.push_str(cell);
                        for _ in cell.len()..widths[i] {
                            line.push(' ');
                        }
                    }
                }
            }
            writeln!(out, "{}", line.trim_end())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{Alignment, ConsoleTable};

    #[test]
    fn columns_are_padded_per_alignment() {
        let mut table = ConsoleTable::new(&[Alignment::Right, Alignment::Left]);
        table.row(["Size", "Filename"]);
        table.row(["5", "a.txt"]);
        table.row(["12345", "longer/name.txt"]);

        let mut out = Vec::new();
        table.print(&mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            " Size  Filename\n\
             \u{20}   5  a.txt\n\
             12345  longer/name.txt\n"
        );
    }

    #[test]
    fn trailing_whitespace_is_trimmed() {
        let mut table = ConsoleTable::new(&[Alignment::Left]);
        table.row(["short"]);
        table.row(["a much longer cell"]);

        let mut out = Vec::new();
        table.print(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "short\na much longer cell\n"
        );
    }
}

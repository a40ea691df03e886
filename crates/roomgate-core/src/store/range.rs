// ============================================================================
// A1 range addressing
// ============================================================================

use super::StoreError;

/// A parsed A1 range. Rows and columns are zero-based and inclusive.
/// Open ends (`A1:A`, `E1:ZZ`, bare sheet names) leave the bound unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellRange {
    pub sheet: String,
    pub start_col: usize,
    pub start_row: usize,
    pub end_col: Option<usize>,
    pub end_row: Option<usize>,
}

impl CellRange {
    pub fn parse(range: &str) -> Result<Self, StoreError> {
        let invalid = || StoreError::InvalidRange(range.to_string());

        let (sheet, cells) = match range.rsplit_once('!') {
            Some((sheet, cells)) => (sheet, Some(cells)),
            None => (range, None),
        };
        let sheet = sheet.trim().trim_matches('\'');
        if sheet.is_empty() {
            return Err(invalid());
        }

        let Some(cells) = cells else {
            return Ok(Self {
                sheet: sheet.to_string(),
                start_col: 0,
                start_row: 0,
                end_col: None,
                end_row: None,
            });
        };

        let (start, end) = match cells.split_once(':') {
            Some((start, end)) => (start, Some(end)),
            None => (cells, None),
        };

        let (start_col, start_row) = parse_cell(start).ok_or_else(invalid)?;
        let start_col = start_col.ok_or_else(invalid)?;
        let start_row = start_row.unwrap_or(0);

        let (end_col, end_row) = match end {
            Some(end) => {
                let (col, row) = parse_cell(end).ok_or_else(invalid)?;
                (col, row)
            }
            // single cell reference
            None => (Some(start_col), Some(start_row)),
        };

        if end_col.is_some_and(|c| c < start_col) || end_row.is_some_and(|r| r < start_row) {
            return Err(invalid());
        }

        Ok(Self {
            sheet: sheet.to_string(),
            start_col,
            start_row,
            end_col,
            end_row,
        })
    }
}

/// Split `E12` into (column, row), either part may be missing (`E`, `12`)
fn parse_cell(cell: &str) -> Option<(Option<usize>, Option<usize>)> {
    let cell = cell.trim();
    let split = cell
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(cell.len());
    let (letters, digits) = cell.split_at(split);

    let col = if letters.is_empty() {
        None
    } else {
        Some(column_index(letters)?)
    };
    let row = if digits.is_empty() {
        None
    } else {
        let row: usize = digits.parse().ok()?;
        if row == 0 {
            return None;
        }
        Some(row - 1)
    };

    if col.is_none() && row.is_none() {
        return None;
    }
    Some((col, row))
}

/// Zero-based column index to letters: 0 -> A, 25 -> Z, 26 -> AA
pub fn column_letters(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Column letters to zero-based index, `None` if not purely alphabetic
pub fn column_index(letters: &str) -> Option<usize> {
    if letters.is_empty() {
        return None;
    }
    let mut n = 0usize;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        n = n * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
    }
    Some(n - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_letters() {
        assert_eq!(column_letters(0), "A");
        assert_eq!(column_letters(25), "Z");
        assert_eq!(column_letters(26), "AA");
        assert_eq!(column_letters(701), "ZZ");
        assert_eq!(column_index("ZZ"), Some(701));
        assert_eq!(column_index("e"), Some(4));
        assert_eq!(column_index("A1"), None);
    }

    #[test]
    fn test_parse_whole_sheet() {
        let r = CellRange::parse("Readers").unwrap();
        assert_eq!(r.sheet, "Readers");
        assert_eq!((r.start_col, r.start_row, r.end_col, r.end_row), (0, 0, None, None));
    }

    #[test]
    fn test_parse_open_ranges() {
        let r = CellRange::parse("Students!E1:ZZ").unwrap();
        assert_eq!((r.start_col, r.start_row, r.end_col, r.end_row), (4, 0, Some(701), None));

        let r = CellRange::parse("Staff!A1:A").unwrap();
        assert_eq!((r.start_col, r.end_col, r.end_row), (0, Some(0), None));
    }

    #[test]
    fn test_parse_bounded_and_single_cell() {
        let r = CellRange::parse("Readers!F3:H3").unwrap();
        assert_eq!((r.start_col, r.start_row, r.end_col, r.end_row), (5, 2, Some(7), Some(2)));

        let r = CellRange::parse("'Import Status'!A2").unwrap();
        assert_eq!(r.sheet, "Import Status");
        assert_eq!((r.end_col, r.end_row), (Some(0), Some(1)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(CellRange::parse("!A1").is_err());
        assert!(CellRange::parse("Sheet!A0").is_err());
        assert!(CellRange::parse("Sheet!C1:A1").is_err());
        assert!(CellRange::parse("Sheet!?").is_err());
    }
}

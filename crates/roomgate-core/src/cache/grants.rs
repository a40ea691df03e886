// ============================================================================
// Reader grants - one row of the Accesses sheet
// ============================================================================
// Columns: id | staff | <room>... | no_access
// Cells are empty or "RRGGBB, minutes" with the minutes optional.
// ============================================================================

use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

use crate::store::column_letters;
use crate::types::{Color, Grant};

/// Colors and alarm delays this reader shows
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReaderGrants {
    pub id: u32,
    pub staff: Option<Grant>,
    pub rooms: HashMap<String, Grant>,
    pub no_access: Option<Grant>,
}

impl ReaderGrants {
    /// Range holding this reader's row, wide enough for every room column
    pub fn range(reader_id: u32, rooms: &[String]) -> String {
        let row = reader_id + 1;
        // id + staff + rooms + no_access
        let last = column_letters(rooms.len() + 2);
        format!("Accesses!A{}:{}{}", row, last, row)
    }

    /// Decode a row against the room set it was fetched with
    pub fn decode(row: &[String], rooms: &[String]) -> Self {
        let cell = |i: usize| row.get(i).map(String::as_str).unwrap_or("");

        let id = cell(0).trim().parse().unwrap_or(0);
        let staff = parse_grant_cell(cell(1));
        let room_count = rooms.len();
        let rooms = rooms
            .iter()
            .enumerate()
            .filter_map(|(i, room)| parse_grant_cell(cell(i + 2)).map(|g| (room.clone(), g)))
            .collect();
        let no_access = parse_grant_cell(cell(room_count + 2));

        Self {
            id,
            staff,
            rooms,
            no_access,
        }
    }

    pub fn room(&self, room: &str) -> Option<Grant> {
        self.rooms.get(room).copied()
    }
}

/// Parse `"FF0000, 5"`. Empty cells and malformed colors yield `None`;
/// a missing or unparsable delay leaves the delay absent.
pub fn parse_grant_cell(cell: &str) -> Option<Grant> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }

    let (color, delay) = match cell.split_once(',') {
        Some((color, delay)) => (color.trim(), delay.trim()),
        None => (cell, ""),
    };

    let Some(color) = Color::from_hex(color) else {
        warn!("Ignoring grant with malformed color: '{}'", cell);
        return None;
    };

    let alarm_delay = if delay.is_empty() {
        None
    } else {
        match delay.parse::<u32>() {
            Ok(minutes) => Some(minutes),
            Err(_) => {
                warn!("Ignoring malformed alarm delay in grant '{}'", cell);
                None
            }
        }
    };

    Some(Grant::new(color, alarm_delay))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_parse_grant_cell() {
        let g = parse_grant_cell("FF0000, 5").unwrap();
        assert_eq!(g.color, Color::ALERT_RED);
        assert_eq!(g.alarm_delay, Some(5));

        assert_eq!(parse_grant_cell("00FF00, ").unwrap().alarm_delay, None);
        assert_eq!(parse_grant_cell("00FF00").unwrap().alarm_delay, None);
        assert!(parse_grant_cell("").is_none());
        assert!(parse_grant_cell("purple, 3").is_none());
    }

    #[test]
    fn test_decode_row() {
        let rooms = strings(&["Lab", "Shop"]);
        let row = strings(&["3", "0000FF, 10", "", "00FF00, 2", "FF0000"]);
        let grants = ReaderGrants::decode(&row, &rooms);

        assert_eq!(grants.id, 3);
        assert_eq!(grants.staff.unwrap().alarm_delay, Some(10));
        assert!(grants.room("Lab").is_none());
        assert_eq!(grants.room("Shop").unwrap().color.g, 255);
        assert_eq!(grants.no_access.unwrap().color, Color::ALERT_RED);
    }

    #[test]
    fn test_decode_short_row() {
        let rooms = strings(&["Lab"]);
        let grants = ReaderGrants::decode(&strings(&["2", "0000FF, 1"]), &rooms);
        assert!(grants.rooms.is_empty());
        assert!(grants.no_access.is_none());
    }

    #[test]
    fn test_range_covers_all_columns() {
        let rooms = strings(&["Lab", "Shop"]);
        assert_eq!(ReaderGrants::range(3, &rooms), "Accesses!A4:E4");
    }
}

// ============================================================================
// Access Resolver - card token to reader grant
// ============================================================================
// First match wins:
//   staff token   -> staff grant, else no_access grant
//   student token -> first room (sheet order) with access and a grant,
//                    else no_access grant
//   unknown token -> no_access grant
// ============================================================================

use serde::Serialize;

use crate::cache::{People, ReaderGrants};
use crate::types::{Grant, PersonKey};

/// Who the token belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Holder {
    Staff,
    Student,
    Unknown,
}

/// Which grant column matched
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum GrantLabel {
    Staff,
    Room(String),
    NoAccess,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Resolution {
    Granted { label: GrantLabel, grant: Grant },
    /// Known person, but this reader defines nothing to show
    NoGrant,
    /// Unknown token and no fallback grant
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolved {
    pub holder: Holder,
    pub resolution: Resolution,
}

impl Resolved {
    pub fn grant(&self) -> Option<Grant> {
        match &self.resolution {
            Resolution::Granted { grant, .. } => Some(*grant),
            _ => None,
        }
    }

    /// Access column text for the Log sheet
    pub fn audit_label(&self) -> String {
        match (&self.holder, &self.resolution) {
            (Holder::Unknown, _) => "Unknown".to_string(),
            (Holder::Staff, Resolution::Granted { .. }) => "Staff".to_string(),
            (Holder::Staff, _) => "Staff (Not Found)".to_string(),
            (Holder::Student, Resolution::Granted { label: GrantLabel::Room(room), .. }) => {
                room.clone()
            }
            (Holder::Student, Resolution::Granted { .. }) => "No Access".to_string(),
            (Holder::Student, _) => "Student (Not Found)".to_string(),
        }
    }
}

/// Resolve a scanned token against the snapshot. `grants` is `None` on the
/// control node, which then only ever reports `NoGrant`/`NotFound`.
pub fn resolve(people: &People, grants: Option<&ReaderGrants>, token: &str) -> Resolved {
    let key = PersonKey::Card(token);
    let no_access = grants.and_then(|g| g.no_access);
    let fallback = |holder: Holder, otherwise: Resolution| Resolved {
        holder,
        resolution: match no_access {
            Some(grant) => Resolution::Granted {
                label: GrantLabel::NoAccess,
                grant,
            },
            None => otherwise,
        },
    };

    if people.is_staff(key) {
        if let Some(grant) = grants.and_then(|g| g.staff) {
            return Resolved {
                holder: Holder::Staff,
                resolution: Resolution::Granted {
                    label: GrantLabel::Staff,
                    grant,
                },
            };
        }
        return fallback(Holder::Staff, Resolution::NoGrant);
    }

    if people.is_student(key) {
        for room in people.rooms() {
            if people.get_access(key, room) != Some(true) {
                continue;
            }
            if let Some(grant) = grants.and_then(|g| g.room(room)) {
                return Resolved {
                    holder: Holder::Student,
                    resolution: Resolution::Granted {
                        label: GrantLabel::Room(room.clone()),
                        grant,
                    },
                };
            }
        }
        return fallback(Holder::Student, Resolution::NoGrant);
    }

    fallback(Holder::Unknown, Resolution::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{parse_grant_cell, LoadMode};
    use crate::store::Rows;
    use crate::types::Color;
    use std::collections::HashMap;

    fn rows(data: &[&[&str]]) -> Rows {
        data.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    fn people() -> People {
        People::decode(
            LoadMode::Limited,
            rows(&[
                &["Card UID", "Lab", "Shop", "Kiln"],
                &["A1", "Access", "Override Access", ""],
                &["B2", "No Access", "Override No Access", "Access"],
                &["C3"],
            ]),
            rows(&[&["Card UID"], &["S9"]]),
        )
        .unwrap()
    }

    fn grants(staff: &str, rooms: &[(&str, &str)], no_access: &str) -> ReaderGrants {
        ReaderGrants {
            id: 1,
            staff: parse_grant_cell(staff),
            rooms: rooms
                .iter()
                .filter_map(|(room, cell)| parse_grant_cell(cell).map(|g| (room.to_string(), g)))
                .collect::<HashMap<_, _>>(),
            no_access: parse_grant_cell(no_access),
        }
    }

    #[test]
    fn test_staff_fallback_chain() {
        let people = people();

        let full = grants("0000FF, 10", &[], "FF0000, 1");
        let r = resolve(&people, Some(&full), "S9");
        assert_eq!(r.grant().unwrap().color, Color { r: 0, g: 0, b: 255 });
        assert_eq!(r.audit_label(), "Staff");

        let no_staff = grants("", &[], "FF0000, 1");
        let r = resolve(&people, Some(&no_staff), "S9");
        assert!(matches!(
            r.resolution,
            Resolution::Granted { label: GrantLabel::NoAccess, .. }
        ));
        assert_eq!(r.grant().unwrap().alarm_delay, Some(1));

        let nothing = grants("", &[], "");
        let r = resolve(&people, Some(&nothing), "S9");
        assert_eq!(r.resolution, Resolution::NoGrant);
        assert_eq!(r.audit_label(), "Staff (Not Found)");
    }

    #[test]
    fn test_student_first_room_in_order() {
        let people = people();
        let g = grants("", &[("Lab", "00FF00, 2"), ("Shop", "FFFF00, 3")], "FF0000");

        let r = resolve(&people, Some(&g), "A1");
        assert_eq!(r.audit_label(), "Lab");
        assert_eq!(r.grant().unwrap().alarm_delay, Some(2));

        // override access counts; rooms without a grant are skipped
        let shop_only = grants("", &[("Shop", "FFFF00, 3")], "");
        assert_eq!(resolve(&people, Some(&shop_only), "A1").audit_label(), "Shop");
    }

    #[test]
    fn test_student_without_matching_room() {
        let people = people();
        let g = grants("", &[("Lab", "00FF00"), ("Shop", "FFFF00")], "FF0000, 0");

        // B2 only has Kiln, which this reader does not grant
        let r = resolve(&people, Some(&g), "B2");
        assert_eq!(r.audit_label(), "No Access");
        assert_eq!(r.grant().unwrap().color, Color::ALERT_RED);

        let bare = grants("", &[("Lab", "00FF00")], "");
        let r = resolve(&people, Some(&bare), "C3");
        assert_eq!(r.resolution, Resolution::NoGrant);
        assert_eq!(r.audit_label(), "Student (Not Found)");
    }

    #[test]
    fn test_unknown_token() {
        let people = people();
        let g = grants("", &[], "FF0000");
        let r = resolve(&people, Some(&g), "ZZ");
        assert_eq!(r.holder, Holder::Unknown);
        assert!(r.grant().is_some());
        assert_eq!(r.audit_label(), "Unknown");

        let r = resolve(&people, None, "ZZ");
        assert_eq!(r.resolution, Resolution::NotFound);
        assert_eq!(resolve(&people, None, "").resolution, Resolution::NotFound);
    }
}

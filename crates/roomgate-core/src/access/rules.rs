// ============================================================================
// Module rules - Modules sheet rows applied to a student
// ============================================================================

use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

use super::expr::evaluate;
use crate::cache::People;
use crate::store::{pad_rows, Rows};
use crate::types::{Outcome, PersonKey, RoomgateError, RoomgateResult};

const ROOM_COLUMN: &str = "Access Levels";
const EXPRESSION_COLUMN: &str = "Modules";

/// Gating rule for one room
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleRule {
    pub room: String,
    pub expression: String,
}

impl ModuleRule {
    /// Decode the Modules sheet. Columns are located by header name.
    pub fn decode_sheet(values: Rows) -> RoomgateResult<Vec<Self>> {
        let Some(header) = values.first() else {
            return Ok(Vec::new());
        };
        let column = |name: &str| {
            header
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
        };
        let (Some(room_col), Some(expr_col)) = (column(ROOM_COLUMN), column(EXPRESSION_COLUMN))
        else {
            return Err(RoomgateError::NotFound(format!(
                "Modules sheet needs '{}' and '{}' columns",
                ROOM_COLUMN, EXPRESSION_COLUMN
            )));
        };

        let width = header.len();
        Ok(pad_rows(values.into_iter().skip(1).collect(), width)
            .into_iter()
            .filter(|row| !row[room_col].trim().is_empty())
            .map(|row| ModuleRule {
                room: row[room_col].trim().to_string(),
                expression: row[expr_col].clone(),
            })
            .collect())
    }
}

/// Apply every rule, in order, to one student's room access.
///
/// Each result goes through a non-override `set_access`, so pinned cells keep
/// their value. The first malformed rule or refused write stops the run; the
/// caller should retry the whole set. Returns the effective value per room.
pub fn evaluate_grants(
    people: &mut People,
    rules: &[ModuleRule],
    completed: &BTreeSet<u32>,
    key: PersonKey<'_>,
) -> RoomgateResult<Vec<(String, bool)>> {
    let mut applied = Vec::with_capacity(rules.len());

    for rule in rules {
        let granted = evaluate(&rule.expression, completed).map_err(|source| {
            RoomgateError::MalformedExpression {
                room: rule.room.clone(),
                source,
            }
        })?;

        match people.set_access(key, &rule.room, granted) {
            Outcome::Written(effective) => applied.push((rule.room.clone(), effective)),
            Outcome::NotFound => {
                return Err(RoomgateError::NotFound(format!(
                    "{} or room '{}'",
                    key, rule.room
                )))
            }
            Outcome::Disabled => {
                return Err(RoomgateError::DataConflict(
                    "access cannot be set by identity on a limited snapshot".into(),
                ))
            }
            Outcome::Conflict => {
                return Err(RoomgateError::DataConflict(format!(
                    "access write for {} in '{}' was refused",
                    key, rule.room
                )))
            }
        }
    }

    debug!("Evaluated {} rules for {}", applied.len(), key);
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LoadMode;
    use crate::types::AccessState;

    fn rows(data: &[&[&str]]) -> Rows {
        data.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    fn people() -> People {
        People::decode(
            LoadMode::Full,
            rows(&[
                &["First Name", "Last Name", "Login ID", "LMS ID", "Card UID", "Lab", "Shop"],
                &["Ada", "Lovelace", "alove", "101", "A1", "No Access", "Override No Access"],
                &["Cy", "Cyan", "ccyan", "103", "C3", "Access", "Override Access"],
            ]),
            rows(&[&["Card UID", "First Name", "Last Name", "Login ID"]]),
        )
        .unwrap()
    }

    fn rules() -> Vec<ModuleRule> {
        ModuleRule::decode_sheet(rows(&[
            &["Access Levels", "Modules"],
            &["Lab", "AND(1, OR(2, 3))"],
            &["", "ignored"],
            &["Shop", "4"],
        ]))
        .unwrap()
    }

    fn set(items: &[u32]) -> BTreeSet<u32> {
        items.iter().copied().collect()
    }

    #[test]
    fn test_decode_sheet() {
        let rules = rules();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].room, "Lab");
        assert_eq!(rules[1].expression, "4");

        let reordered = ModuleRule::decode_sheet(rows(&[
            &["Modules", "Notes", "Access Levels"],
            &["1", "", "Lab"],
        ]))
        .unwrap();
        assert_eq!(reordered[0].room, "Lab");
        assert_eq!(reordered[0].expression, "1");

        assert!(ModuleRule::decode_sheet(rows(&[&["Room", "Rule"]])).is_err());
        assert!(ModuleRule::decode_sheet(Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn test_grants_follow_completed_modules() {
        let mut people = people();
        let ada = PersonKey::Identity("alove");
        let applied = evaluate_grants(&mut people, &rules(), &set(&[1, 3, 4]), ada).unwrap();
        assert_eq!(
            applied,
            vec![("Lab".to_string(), true), ("Shop".to_string(), false)]
        );
        assert_eq!(people.access_state(ada, "Lab"), Some(AccessState::Access));
    }

    #[test]
    fn test_evaluation_is_idempotent_and_keeps_overrides() {
        let mut people = people();
        let cy = PersonKey::Card("C3");
        let completed = set(&[2]);

        evaluate_grants(&mut people, &rules(), &completed, cy).unwrap();
        let first = people.students().to_vec();
        evaluate_grants(&mut people, &rules(), &completed, cy).unwrap();
        assert_eq!(people.students(), first.as_slice());

        assert_eq!(people.access_state(cy, "Lab"), Some(AccessState::NoAccess));
        assert_eq!(people.access_state(cy, "Shop"), Some(AccessState::OverrideAccess));
    }

    #[test]
    fn test_unknown_room_aborts() {
        let mut people = people();
        let rules = vec![ModuleRule {
            room: "Roof".into(),
            expression: "1".into(),
        }];
        assert!(matches!(
            evaluate_grants(&mut people, &rules, &set(&[1]), PersonKey::Identity("alove")),
            Err(RoomgateError::NotFound(_))
        ));
    }

    #[test]
    fn test_unknown_person_aborts() {
        let mut people = people();
        assert!(matches!(
            evaluate_grants(&mut people, &rules(), &set(&[1]), PersonKey::Identity("ghost")),
            Err(RoomgateError::NotFound(_))
        ));
    }

    #[test]
    fn test_malformed_rule_aborts() {
        let mut people = people();
        let rules = vec![ModuleRule {
            room: "Lab".into(),
            expression: "AND(1, 2".into(),
        }];
        let err = evaluate_grants(&mut people, &rules, &set(&[1, 2]), PersonKey::Identity("alove"))
            .unwrap_err();
        assert!(matches!(err, RoomgateError::MalformedExpression { ref room, .. } if room == "Lab"));
    }
}

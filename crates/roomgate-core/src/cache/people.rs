// ============================================================================
// People - decoded Students and Staff sheets
// ============================================================================
// Students: First Name | Last Name | Login ID | LMS ID | Card UID | <room>...
// Staff:    Card UID | First Name | Last Name | Login ID
//
// In limited mode only the Card UID column (and the room columns for
// students) is fetched; anything needing names or identities is disabled.
// ============================================================================

use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, warn};

use super::LoadMode;
use crate::store::{pad_rows, Rows};
use crate::types::{AccessState, Outcome, PersonKey, Role, RoomgateError, RoomgateResult};

/// Fixed leading columns of the Students sheet
pub const STUDENT_COLUMNS: [&str; 5] = ["First Name", "Last Name", "Login ID", "LMS ID", "Card UID"];

/// Columns of the Staff sheet
pub const STAFF_COLUMNS: [&str; 4] = ["Card UID", "First Name", "Last Name", "Login ID"];

/// One person row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Person {
    pub identity_key: String,
    pub card_token: String,
    pub first_name: String,
    pub last_name: String,
    pub external_id: Option<String>,
    pub role: Role,
    /// One entry per room, empty for staff
    pub access: Vec<AccessState>,
}

/// Fields for inserting a person
#[derive(Debug, Clone, Default)]
pub struct NewPerson {
    pub first_name: String,
    pub last_name: String,
    pub identity_key: String,
    pub external_id: Option<String>,
    pub card_token: Option<String>,
    /// Initial room access for students, all denied when absent
    pub access: Option<Vec<bool>>,
}

/// Room names from the Students header: everything after the Card UID column
pub fn derive_rooms(header: &[String], mode: LoadMode) -> Vec<String> {
    header
        .iter()
        .skip(room_offset(mode))
        .map(|h| h.trim().to_string())
        .collect()
}

fn room_offset(mode: LoadMode) -> usize {
    match mode {
        LoadMode::Full => STUDENT_COLUMNS.len(),
        LoadMode::Limited => 1,
    }
}

fn same_token(a: &str, b: &str) -> bool {
    !a.is_empty() && a.eq_ignore_ascii_case(b)
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

#[derive(Debug, Clone, Default)]
struct Roster {
    header: Vec<String>,
    people: Vec<Person>,
    /// Rows (header included) present remotely at the last read or write
    read_len: usize,
}

impl Roster {
    fn position(&self, key: PersonKey<'_>, mode: LoadMode) -> Option<usize> {
        match key {
            PersonKey::Identity(id) => {
                if mode == LoadMode::Limited || id.trim().is_empty() {
                    return None;
                }
                self.people.iter().position(|p| p.identity_key == id.trim())
            }
            PersonKey::Card(token) => {
                let token = token.trim();
                self.people
                    .iter()
                    .position(|p| same_token(&p.card_token, token))
            }
        }
    }

    fn has_identity(&self, id: &str) -> bool {
        self.people.iter().any(|p| p.identity_key == id)
    }

    fn has_token(&self, token: &str) -> bool {
        self.people.iter().any(|p| same_token(&p.card_token, token))
    }
}

/// Decoded Students and Staff tables plus the room column space
#[derive(Debug, Clone)]
pub struct People {
    mode: LoadMode,
    rooms: Vec<String>,
    students: Roster,
    staff: Roster,
}

impl People {
    pub fn empty(mode: LoadMode) -> Self {
        Self {
            mode,
            rooms: Vec::new(),
            students: Roster::default(),
            staff: Roster::default(),
        }
    }

    /// Decode raw sheet reads. Ragged rows are padded to the header width.
    pub fn decode(mode: LoadMode, students: Rows, staff: Rows) -> RoomgateResult<Self> {
        let Some(header) = students.first().cloned() else {
            return Err(RoomgateError::NotFound(
                "Students sheet has no header row".into(),
            ));
        };
        let rooms = derive_rooms(&header, mode);
        let offset = room_offset(mode);
        let read_len = students.len();

        let mut people = Vec::new();
        let width = header.len().max(offset);
        for (i, row) in pad_rows(students.into_iter().skip(1).collect(), width)
            .into_iter()
            .enumerate()
        {
            if row.iter().all(|c| c.trim().is_empty()) {
                continue;
            }
            let access = (0..rooms.len())
                .map(|r| {
                    let cell = &row[offset + r];
                    AccessState::from_cell(cell).unwrap_or_else(|| {
                        warn!(
                            "Unrecognized access '{}' in Students row {} ({}), treating as no access",
                            cell,
                            i + 2,
                            rooms[r]
                        );
                        AccessState::NoAccess
                    })
                })
                .collect();
            let person = match mode {
                LoadMode::Full => Person {
                    first_name: row[0].trim().to_string(),
                    last_name: row[1].trim().to_string(),
                    identity_key: row[2].trim().to_string(),
                    external_id: non_empty(&row[3]),
                    card_token: row[4].trim().to_string(),
                    role: Role::Student,
                    access,
                },
                LoadMode::Limited => Person {
                    first_name: String::new(),
                    last_name: String::new(),
                    identity_key: String::new(),
                    external_id: None,
                    card_token: row[0].trim().to_string(),
                    role: Role::Student,
                    access,
                },
            };
            people.push(person);
        }

        let staff_roster = Self::decode_staff(mode, staff);

        debug!(
            "Decoded {} students, {} staff, {} rooms ({:?})",
            people.len(),
            staff_roster.people.len(),
            rooms.len(),
            mode
        );

        Ok(Self {
            mode,
            rooms,
            students: Roster {
                header,
                people,
                read_len,
            },
            staff: staff_roster,
        })
    }

    fn decode_staff(mode: LoadMode, staff: Rows) -> Roster {
        let read_len = staff.len();
        let header = staff.first().cloned().unwrap_or_else(|| match mode {
            LoadMode::Full => STAFF_COLUMNS.iter().map(|s| s.to_string()).collect(),
            LoadMode::Limited => vec![STAFF_COLUMNS[0].to_string()],
        });
        let width = header.len().max(match mode {
            LoadMode::Full => STAFF_COLUMNS.len(),
            LoadMode::Limited => 1,
        });

        let people = pad_rows(staff.into_iter().skip(1).collect(), width)
            .into_iter()
            .filter(|row| row.iter().any(|c| !c.trim().is_empty()))
            .map(|row| match mode {
                LoadMode::Full => Person {
                    card_token: row[0].trim().to_string(),
                    first_name: row[1].trim().to_string(),
                    last_name: row[2].trim().to_string(),
                    identity_key: row[3].trim().to_string(),
                    external_id: None,
                    role: Role::Staff,
                    access: Vec::new(),
                },
                LoadMode::Limited => Person {
                    card_token: row[0].trim().to_string(),
                    first_name: String::new(),
                    last_name: String::new(),
                    identity_key: String::new(),
                    external_id: None,
                    role: Role::Staff,
                    access: Vec::new(),
                },
            })
            .collect();

        Roster {
            header,
            people,
            read_len,
        }
    }

    pub fn mode(&self) -> LoadMode {
        self.mode
    }

    pub fn rooms(&self) -> &[String] {
        &self.rooms
    }

    pub fn students(&self) -> &[Person] {
        &self.students.people
    }

    pub fn staff(&self) -> &[Person] {
        &self.staff.people
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub fn lookup(&self, key: PersonKey<'_>) -> Option<&Person> {
        self.students
            .position(key, self.mode)
            .map(|i| &self.students.people[i])
            .or_else(|| {
                self.staff
                    .position(key, self.mode)
                    .map(|i| &self.staff.people[i])
            })
    }

    /// Role of the person holding `key`; staff wins if data is inconsistent
    pub fn role_of(&self, key: PersonKey<'_>) -> Option<Role> {
        if self.is_staff(key) {
            Some(Role::Staff)
        } else if self.is_student(key) {
            Some(Role::Student)
        } else {
            None
        }
    }

    pub fn exists(&self, key: PersonKey<'_>) -> bool {
        self.lookup(key).is_some()
    }

    pub fn is_staff(&self, key: PersonKey<'_>) -> bool {
        self.staff.position(key, self.mode).is_some()
    }

    pub fn is_student(&self, key: PersonKey<'_>) -> bool {
        self.students.position(key, self.mode).is_some()
    }

    pub fn card_token_of(&self, identity: &str) -> Option<&str> {
        self.lookup(PersonKey::Identity(identity))
            .map(|p| p.card_token.as_str())
            .filter(|t| !t.is_empty())
    }

    pub fn identity_of(&self, card_token: &str) -> Option<&str> {
        if self.mode == LoadMode::Limited {
            return None;
        }
        self.lookup(PersonKey::Card(card_token))
            .map(|p| p.identity_key.as_str())
            .filter(|id| !id.is_empty())
    }

    fn token_in_use(&self, token: &str) -> bool {
        self.students.has_token(token) || self.staff.has_token(token)
    }

    fn identity_in_use(&self, identity: &str) -> bool {
        self.students.has_identity(identity) || self.staff.has_identity(identity)
    }

    fn student_index(&self, key: PersonKey<'_>) -> Result<usize, Outcome<()>> {
        if matches!(key, PersonKey::Identity(_)) && self.mode == LoadMode::Limited {
            return Err(Outcome::Disabled);
        }
        self.students
            .position(key, self.mode)
            .ok_or(Outcome::NotFound)
    }

    // ========================================================================
    // Room access
    // ========================================================================

    /// Set a student's access to one room. Override cells are left alone and
    /// their pinned value is reported instead.
    pub fn set_access(&mut self, key: PersonKey<'_>, room: &str, granted: bool) -> Outcome<bool> {
        let Some(r) = self.rooms.iter().position(|name| name == room) else {
            return Outcome::NotFound;
        };
        let row = match self.student_index(key) {
            Ok(row) => row,
            Err(refused) => return retag(refused),
        };

        let state = &mut self.students.people[row].access[r];
        if state.is_override() {
            return Outcome::Written(state.is_granted());
        }
        *state = AccessState::from_granted(granted);
        Outcome::Written(granted)
    }

    pub fn get_access(&self, key: PersonKey<'_>, room: &str) -> Option<bool> {
        let r = self.rooms.iter().position(|name| name == room)?;
        let row = self.student_index(key).ok()?;
        Some(self.students.people[row].access[r].is_granted())
    }

    pub fn access_state(&self, key: PersonKey<'_>, room: &str) -> Option<AccessState> {
        let r = self.rooms.iter().position(|name| name == room)?;
        let row = self.student_index(key).ok()?;
        Some(self.students.people[row].access[r])
    }

    /// Set every room at once, in room order. Returns the effective values.
    pub fn set_all_accesses(&mut self, key: PersonKey<'_>, granted: &[bool]) -> Outcome<Vec<bool>> {
        if granted.len() != self.rooms.len() {
            return Outcome::Conflict;
        }
        let row = match self.student_index(key) {
            Ok(row) => row,
            Err(refused) => return retag(refused),
        };

        let effective = self.students.people[row]
            .access
            .iter_mut()
            .zip(granted)
            .map(|(state, &want)| {
                if !state.is_override() {
                    *state = AccessState::from_granted(want);
                }
                state.is_granted()
            })
            .collect();
        Outcome::Written(effective)
    }

    pub fn get_all_accesses(&self, key: PersonKey<'_>) -> Option<Vec<bool>> {
        let row = self.student_index(key).ok()?;
        Some(
            self.students.people[row]
                .access
                .iter()
                .map(AccessState::is_granted)
                .collect(),
        )
    }

    // ========================================================================
    // Membership
    // ========================================================================

    fn check_new(&self, person: &NewPerson) -> Result<(), Outcome<()>> {
        if self.mode == LoadMode::Limited {
            return Err(Outcome::Disabled);
        }
        let identity = person.identity_key.trim();
        if identity.is_empty() || self.identity_in_use(identity) {
            return Err(Outcome::Conflict);
        }
        if let Some(token) = person.card_token.as_deref().and_then(non_empty) {
            if self.token_in_use(&token) {
                return Err(Outcome::Conflict);
            }
        }
        Ok(())
    }

    pub fn insert_student(&mut self, person: NewPerson) -> Outcome {
        if let Err(refused) = self.check_new(&person) {
            return refused;
        }
        let external_id = person.external_id.as_deref().and_then(non_empty);
        if let Some(ext) = &external_id {
            if self
                .students
                .people
                .iter()
                .any(|p| p.external_id.as_ref() == Some(ext))
            {
                return Outcome::Conflict;
            }
        }
        let access = match person.access {
            Some(granted) if granted.len() != self.rooms.len() => return Outcome::Conflict,
            Some(granted) => granted.into_iter().map(AccessState::from_granted).collect(),
            None => vec![AccessState::NoAccess; self.rooms.len()],
        };

        debug!("Inserting student {}", person.identity_key.trim());
        self.students.people.push(Person {
            identity_key: person.identity_key.trim().to_string(),
            card_token: person.card_token.as_deref().and_then(non_empty).unwrap_or_default(),
            first_name: person.first_name.trim().to_string(),
            last_name: person.last_name.trim().to_string(),
            external_id,
            role: Role::Student,
            access,
        });
        Outcome::Written(())
    }

    pub fn insert_staff(&mut self, person: NewPerson) -> Outcome {
        if let Err(refused) = self.check_new(&person) {
            return refused;
        }

        debug!("Inserting staff {}", person.identity_key.trim());
        self.staff.people.push(Person {
            identity_key: person.identity_key.trim().to_string(),
            card_token: person.card_token.as_deref().and_then(non_empty).unwrap_or_default(),
            first_name: person.first_name.trim().to_string(),
            last_name: person.last_name.trim().to_string(),
            external_id: None,
            role: Role::Staff,
            access: Vec::new(),
        });
        Outcome::Written(())
    }

    pub fn remove_student(&mut self, identity: &str) -> Outcome {
        match self.student_index(PersonKey::Identity(identity)) {
            Ok(row) => {
                self.students.people.remove(row);
                Outcome::Written(())
            }
            Err(refused) => refused,
        }
    }

    pub fn remove_staff(&mut self, identity: &str) -> Outcome {
        if self.mode == LoadMode::Limited {
            return Outcome::Disabled;
        }
        match self.staff.position(PersonKey::Identity(identity), self.mode) {
            Some(row) => {
                self.staff.people.remove(row);
                Outcome::Written(())
            }
            None => Outcome::NotFound,
        }
    }

    /// Drop students whose identity is not in `keep`; returns how many went
    pub fn retain_students(&mut self, keep: &HashSet<String>) -> Outcome<usize> {
        if self.mode == LoadMode::Limited {
            return Outcome::Disabled;
        }
        let before = self.students.people.len();
        self.students
            .people
            .retain(|p| keep.contains(&p.identity_key));
        Outcome::Written(before - self.students.people.len())
    }

    pub fn retain_staff(&mut self, keep: &HashSet<String>) -> Outcome<usize> {
        if self.mode == LoadMode::Limited {
            return Outcome::Disabled;
        }
        let before = self.staff.people.len();
        self.staff.people.retain(|p| keep.contains(&p.identity_key));
        Outcome::Written(before - self.staff.people.len())
    }

    /// Assign a card token to a student or staff member.
    ///
    /// With `overwrite`, the token is first cleared from whoever holds it and
    /// any token the person already had is replaced. Without it, a token held
    /// elsewhere or an already-assigned person is a conflict.
    pub fn set_card_token(&mut self, identity: &str, token: &str, overwrite: bool) -> Outcome<String> {
        if self.mode == LoadMode::Limited {
            return Outcome::Disabled;
        }
        let identity = identity.trim();
        let token = token.trim();
        if identity.is_empty() || token.is_empty() {
            return Outcome::Conflict;
        }

        let key = PersonKey::Identity(identity);
        let (role, row) = match (
            self.staff.position(key, self.mode),
            self.students.position(key, self.mode),
        ) {
            (Some(row), _) => (Role::Staff, row),
            (None, Some(row)) => (Role::Student, row),
            (None, None) => return Outcome::NotFound,
        };

        let current = match role {
            Role::Staff => &self.staff.people[row].card_token,
            Role::Student => &self.students.people[row].card_token,
        };
        if same_token(current, token) {
            return Outcome::Written(current.clone());
        }

        if !overwrite && (!current.is_empty() || self.token_in_use(token)) {
            return Outcome::Conflict;
        }

        if overwrite {
            for person in self
                .students
                .people
                .iter_mut()
                .chain(self.staff.people.iter_mut())
            {
                if same_token(&person.card_token, token) {
                    debug!("Clearing card {} from {}", token, person.identity_key);
                    person.card_token.clear();
                }
            }
        }

        let person = match role {
            Role::Staff => &mut self.staff.people[row],
            Role::Student => &mut self.students.people[row],
        };
        person.card_token = token.to_string();
        Outcome::Written(person.card_token.clone())
    }

    // ========================================================================
    // Flush support
    // ========================================================================

    /// Sort a roster by last name and encode it (header first) for writing.
    /// Returns the rows and the row count last seen remotely.
    pub(crate) fn prepare_flush(&mut self, role: Role) -> Option<(Rows, usize)> {
        if self.mode == LoadMode::Limited {
            return None;
        }
        let rooms = self.rooms.clone();
        let roster = match role {
            Role::Student => &mut self.students,
            Role::Staff => &mut self.staff,
        };
        roster.people.sort_by(|a, b| a.last_name.cmp(&b.last_name));

        let width = roster.header.len();
        let mut rows = vec![roster.header.clone()];
        for p in &roster.people {
            let mut row = match role {
                Role::Student => {
                    let mut row = vec![
                        p.first_name.clone(),
                        p.last_name.clone(),
                        p.identity_key.clone(),
                        p.external_id.clone().unwrap_or_default(),
                        p.card_token.clone(),
                    ];
                    row.extend(p.access.iter().map(|a| a.as_cell().to_string()));
                    debug_assert_eq!(p.access.len(), rooms.len());
                    row
                }
                Role::Staff => vec![
                    p.card_token.clone(),
                    p.first_name.clone(),
                    p.last_name.clone(),
                    p.identity_key.clone(),
                ],
            };
            if row.len() < width {
                row.resize(width, String::new());
            }
            rows.push(row);
        }
        Some((rows, roster.read_len))
    }

    pub(crate) fn mark_flushed(&mut self, role: Role, written_len: usize) {
        match role {
            Role::Student => self.students.read_len = written_len,
            Role::Staff => self.staff.read_len = written_len,
        }
    }
}

/// Re-type a refusal from a unit outcome
fn retag<T>(refused: Outcome<()>) -> Outcome<T> {
    match refused {
        Outcome::Written(()) | Outcome::Conflict => Outcome::Conflict,
        Outcome::NotFound => Outcome::NotFound,
        Outcome::Disabled => Outcome::Disabled,
    }
}

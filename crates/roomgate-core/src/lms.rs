//! ============================================================================
//! LMS Import - roster and module progress into room access
//! ============================================================================
//! The bulk import runs on the control node:
//! 1. flag the import as UPDATING and load every table in full
//! 2. insert roster students that are missing from the Students sheet
//! 3. fetch each student's completed modules and evaluate the Modules rules
//! 4. write the Students sheet back, log the run and flag it DONE
//!
//! `CanvasClient` talks to the Canvas REST API; anything else that can list a
//! course roster and per-student module progress can implement `LmsClient`.
//! ============================================================================

use async_trait::async_trait;
use chrono::Local;
use reqwest::header::{HeaderMap, LINK};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::access::evaluate_grants;
use crate::cache::{LoadMode, NewPerson, TableCache, SHEET_TIME_FORMAT};
use crate::store::KeyedTableStore;
use crate::types::{Outcome, PersonKey, RoomgateError, RoomgateResult};

/// Connection settings for the LMS
#[derive(Debug, Clone)]
pub struct LmsSettings {
    pub api_base: String,
    pub token: String,
    pub course_id: String,
    /// Only logins in this domain are imported, with the domain stripped
    pub login_domain: Option<String>,
    pub timeout: Duration,
}

/// One roster entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LmsStudent {
    pub id: u64,
    #[serde(default)]
    pub login_id: Option<String>,
    /// "Last, First"
    #[serde(default)]
    pub sortable_name: String,
}

#[derive(Debug, Deserialize)]
struct LmsModule {
    position: u32,
    #[serde(default)]
    state: Option<String>,
}

#[async_trait]
pub trait LmsClient: Send + Sync {
    async fn roster(&self) -> RoomgateResult<Vec<LmsStudent>>;

    /// Positions of the modules the student has completed
    async fn completed_modules(&self, student_id: u64) -> RoomgateResult<BTreeSet<u32>>;
}

/// Canvas REST API client
pub struct CanvasClient {
    client: reqwest::Client,
    settings: LmsSettings,
}

impl CanvasClient {
    pub fn new(settings: LmsSettings) -> RoomgateResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| RoomgateError::Config(format!("LMS client: {}", e)))?;
        Ok(Self { client, settings })
    }

    fn course_url(&self, endpoint: &str) -> String {
        format!(
            "{}/api/v1/courses/{}/{}",
            self.settings.api_base.trim_end_matches('/'),
            self.settings.course_id,
            endpoint
        )
    }

    /// GET a list endpoint, following `Link: rel="next"` pages
    async fn get_all<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        query: &[(&str, String)],
    ) -> RoomgateResult<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(url);
        let mut first = true;

        while let Some(url) = next.take() {
            let mut request = self.client.get(&url).bearer_auth(&self.settings.token);
            if first {
                request = request.query(query).query(&[("per_page", "100")]);
                first = false;
            }
            let response = request
                .send()
                .await
                .map_err(|e| RoomgateError::RemoteUnavailable(format!("LMS: {}", e)))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(RoomgateError::RemoteUnavailable(format!(
                    "LMS returned {}: {}",
                    status, body
                )));
            }

            next = next_link(response.headers());
            let page: Vec<T> = response
                .json()
                .await
                .map_err(|e| RoomgateError::RemoteUnavailable(format!("LMS decode: {}", e)))?;
            items.extend(page);
        }
        Ok(items)
    }
}

/// Target of the `rel="next"` entry of a Link header
fn next_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        params
            .split(';')
            .any(|p| p.trim() == "rel=\"next\"")
            .then(|| {
                target
                    .trim()
                    .trim_start_matches('<')
                    .trim_end_matches('>')
                    .to_string()
            })
    })
}

#[async_trait]
impl LmsClient for CanvasClient {
    async fn roster(&self) -> RoomgateResult<Vec<LmsStudent>> {
        let students = self.get_all(self.course_url("students"), &[]).await?;
        debug!("LMS roster has {} entries", students.len());
        Ok(students)
    }

    async fn completed_modules(&self, student_id: u64) -> RoomgateResult<BTreeSet<u32>> {
        let modules: Vec<LmsModule> = self
            .get_all(
                self.course_url("modules"),
                &[("student_id", student_id.to_string())],
            )
            .await?;
        Ok(modules
            .into_iter()
            .filter(|m| m.state.as_deref() == Some("completed"))
            .map(|m| m.position)
            .collect())
    }
}

/// What a bulk import did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub roster: usize,
    pub inserted: usize,
    pub skipped_staff: usize,
    pub evaluated: usize,
    /// Identities whose progress could not be applied
    pub failed: Vec<String>,
}

/// Identity key for a roster login, `None` when outside the login domain
fn identity_for(login: &str, domain: Option<&str>) -> Option<String> {
    let login = login.trim();
    let identity = match domain {
        Some(domain) => login.strip_suffix(&format!("@{}", domain))?,
        None => login.split('@').next().unwrap_or(login),
    };
    (!identity.is_empty()).then(|| identity.to_string())
}

/// Split "Last, First"; a name without a comma is all last name
fn split_sortable_name(name: &str) -> (String, String) {
    match name.split_once(',') {
        Some((last, first)) => (first.trim().to_string(), last.trim().to_string()),
        None => (String::new(), name.trim().to_string()),
    }
}

/// Run a full roster import and module evaluation
pub async fn run_bulk_import<S: KeyedTableStore, L: LmsClient + ?Sized>(
    cache: &mut TableCache<S>,
    lms: &L,
    login_domain: Option<&str>,
) -> RoomgateResult<ImportReport> {
    // remembers the previous completion time for the UPDATING write
    cache.import_status().await?;
    cache.set_import_status(true, None).await?;
    info!("LMS import started");

    match import(cache, lms, login_domain).await {
        Ok(report) => {
            cache
                .set_import_status(false, Some(Local::now().naive_local()))
                .await?;
            info!(
                "LMS import done: {} roster, {} inserted, {} evaluated, {} failed",
                report.roster,
                report.inserted,
                report.evaluated,
                report.failed.len()
            );
            Ok(report)
        }
        Err(e) => {
            error!("LMS import failed: {}", e);
            if let Err(flag) = cache.set_import_status(false, None).await {
                warn!("Could not clear import flag: {}", flag);
            }
            Err(e)
        }
    }
}

async fn import<S: KeyedTableStore, L: LmsClient + ?Sized>(
    cache: &mut TableCache<S>,
    lms: &L,
    login_domain: Option<&str>,
) -> RoomgateResult<ImportReport> {
    cache.load(LoadMode::Full).await?;
    let roster = lms.roster().await?;

    let mut report = ImportReport {
        roster: roster.len(),
        ..Default::default()
    };
    let mut seen = HashSet::new();
    let mut enrolled = Vec::new();

    for student in &roster {
        let Some(identity) = student
            .login_id
            .as_deref()
            .and_then(|login| identity_for(login, login_domain))
        else {
            continue;
        };
        if !seen.insert(identity.clone()) {
            continue;
        }

        let people = cache.people_mut();
        if people.is_staff(PersonKey::Identity(&identity)) {
            report.skipped_staff += 1;
            continue;
        }
        if !people.exists(PersonKey::Identity(&identity)) {
            let (first_name, last_name) = split_sortable_name(&student.sortable_name);
            let outcome = people.insert_student(NewPerson {
                first_name,
                last_name,
                identity_key: identity.clone(),
                external_id: Some(student.id.to_string()),
                ..Default::default()
            });
            match outcome {
                Outcome::Written(()) => report.inserted += 1,
                refused => {
                    warn!("Could not add {} from roster: {:?}", identity, refused);
                    report.failed.push(identity);
                    continue;
                }
            }
        }
        enrolled.push((identity, student.id));
    }

    let rules = cache.rules().to_vec();
    for (identity, lms_id) in enrolled {
        let completed = match lms.completed_modules(lms_id).await {
            Ok(completed) => completed,
            Err(e) => {
                warn!("No module progress for {}: {}", identity, e);
                report.failed.push(identity);
                continue;
            }
        };

        match evaluate_grants(
            cache.people_mut(),
            &rules,
            &completed,
            PersonKey::Identity(&identity),
        ) {
            Ok(_) => report.evaluated += 1,
            Err(e @ RoomgateError::MalformedExpression { .. }) => return Err(e),
            Err(e) => {
                warn!("Could not evaluate {}: {}", identity, e);
                report.failed.push(identity);
            }
        }
    }

    cache.flush_students().await?;
    cache
        .append_log(vec![
            Local::now().format(SHEET_TIME_FORMAT).to_string(),
            "LMS Import".to_string(),
            cache.settings().reader_id.to_string(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            "Not Triggered".to_string(),
            "0".to_string(),
        ])
        .await?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::{cache_with, seeded_store};
    use crate::cache::ImportState;
    use reqwest::header::HeaderValue;
    use std::collections::HashMap;
    use std::sync::Arc;

    struct FakeLms {
        roster: Vec<LmsStudent>,
        progress: HashMap<u64, Vec<u32>>,
    }

    #[async_trait]
    impl LmsClient for FakeLms {
        async fn roster(&self) -> RoomgateResult<Vec<LmsStudent>> {
            Ok(self.roster.clone())
        }

        async fn completed_modules(&self, student_id: u64) -> RoomgateResult<BTreeSet<u32>> {
            self.progress
                .get(&student_id)
                .map(|m| m.iter().copied().collect())
                .ok_or_else(|| RoomgateError::RemoteUnavailable("no such student".into()))
        }
    }

    fn entry(id: u64, login: &str, name: &str) -> LmsStudent {
        LmsStudent {
            id,
            login_id: Some(login.to_string()),
            sortable_name: name.to_string(),
        }
    }

    fn lms() -> FakeLms {
        FakeLms {
            roster: vec![
                entry(101, "alove@school.edu", "Lovelace, Ada"),
                entry(200, "inewton@school.edu", "Newton, Isaac"),
                entry(200, "inewton@school.edu", "Newton, Isaac"),
                entry(300, "sstaff@school.edu", "Staff, Sam"),
                entry(400, "guest@elsewhere.org", "Guest, Gail"),
                LmsStudent {
                    id: 500,
                    login_id: None,
                    sortable_name: "Hidden, Hal".into(),
                },
                entry(103, "ccyan@school.edu", "Cyan, Cy"),
            ],
            progress: HashMap::from([(101, vec![1, 3, 4]), (200, vec![1, 2])]),
        }
    }

    #[test]
    fn test_identity_for() {
        assert_eq!(identity_for("a@school.edu", Some("school.edu")), Some("a".into()));
        assert_eq!(identity_for("a@other.edu", Some("school.edu")), None);
        assert_eq!(identity_for("a@other.edu", None), Some("a".into()));
        assert_eq!(identity_for("plain", None), Some("plain".into()));
        assert_eq!(identity_for("@school.edu", Some("school.edu")), None);
    }

    #[test]
    fn test_split_sortable_name() {
        assert_eq!(
            split_sortable_name("Newton, Isaac"),
            ("Isaac".to_string(), "Newton".to_string())
        );
        assert_eq!(split_sortable_name("Plato"), (String::new(), "Plato".to_string()));
    }

    #[test]
    fn test_next_link() {
        let mut headers = HeaderMap::new();
        headers.insert(
            LINK,
            HeaderValue::from_static(
                "<https://lms.test/api/v1/x?page=1>; rel=\"current\", <https://lms.test/api/v1/x?page=2>; rel=\"next\"",
            ),
        );
        assert_eq!(
            next_link(&headers).as_deref(),
            Some("https://lms.test/api/v1/x?page=2")
        );
        assert!(next_link(&HeaderMap::new()).is_none());
    }

    #[tokio::test]
    async fn test_bulk_import() {
        let store = Arc::new(seeded_store());
        let mut cache = cache_with(store.clone(), 0);

        let report = run_bulk_import(&mut cache, &lms(), Some("school.edu"))
            .await
            .unwrap();

        assert_eq!(report.roster, 7);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.skipped_staff, 1);
        assert_eq!(report.evaluated, 2);
        // ccyan has no module progress in the LMS
        assert_eq!(report.failed, vec!["ccyan".to_string()]);

        let people = cache.people();
        let isaac = PersonKey::Identity("inewton");
        assert_eq!(people.lookup(isaac).unwrap().first_name, "Isaac");
        assert_eq!(people.lookup(isaac).unwrap().external_id.as_deref(), Some("200"));
        assert_eq!(people.get_all_accesses(isaac), Some(vec![true, false]));
        // Shop is pinned for Ada
        assert_eq!(
            people.get_all_accesses(PersonKey::Identity("alove")),
            Some(vec![true, false])
        );

        // written back sorted by last name: Babbage, Cyan, Lovelace, Newton
        assert_eq!(store.cell("Students", 4, 1), "Newton");
        assert_eq!(store.cell("Students", 4, 5), "Access");
        assert_eq!(store.cell("Log", 1, 1), "LMS Import");
        assert_eq!(store.cell("Import Status", 1, 0), "DONE");
        assert_ne!(store.cell("Import Status", 1, 1), "2024-01-01 04:00:00");
        assert_eq!(cache.import_status().await.unwrap().state, ImportState::Done);
    }

    #[tokio::test]
    async fn test_malformed_rule_fails_import() {
        let store = Arc::new(seeded_store());
        store.set_sheet(
            "Modules",
            vec![vec!["Access Levels", "Modules"], vec!["Lab", "AND(1,"]],
        );
        let mut cache = cache_with(store.clone(), 0);

        let result = run_bulk_import(&mut cache, &lms(), Some("school.edu")).await;
        assert!(matches!(result, Err(RoomgateError::MalformedExpression { .. })));
        assert_eq!(store.cell("Import Status", 1, 0), "DONE");
        assert_eq!(store.cell("Import Status", 1, 1), "2024-01-01 04:00:00");
        // nothing written back
        assert_eq!(store.cell("Students", 4, 1), "");
    }
}

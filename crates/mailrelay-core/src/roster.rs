//! Subscriber roster backed by a CSV file.
//!
//! The file is re-read only when its modification time changes. Readers get
//! a cheap shared snapshot that stays valid for as long as they hold it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use mailrelay_mime::charset::decode_text;
use tracing::{debug, error, info};

use crate::error::{Error, Result};

const STATUS: &str = "status";
const MEMBERSHIP: &str = "membership";
const CHILD: &str = "child";
const HOME_EMAIL: &str = "home email";

/// Current subscriber list and the file state it was read from.
#[derive(Debug)]
pub struct RosterStore {
    path: PathBuf,
    snapshot: Arc<[String]>,
    modified: Option<SystemTime>,
}

impl RosterStore {
    /// Creates an empty store; the first [`refresh`](Self::refresh) loads it.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            snapshot: Arc::from(Vec::new()),
            modified: None,
        }
    }

    /// Creates a store and loads it, failing if the file is unusable.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let mut store = Self::new(path);
        let modified = std::fs::metadata(&store.path)?.modified()?;
        store.reload(modified)?;
        Ok(store)
    }

    /// Reloads the roster if the file changed.
    ///
    /// Returns `false` when the file is missing, unreadable or malformed; the
    /// previous snapshot stays in effect and the next call retries.
    pub fn refresh(&mut self) -> bool {
        let modified = match std::fs::metadata(&self.path).and_then(|meta| meta.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Roster file unavailable");
                return false;
            }
        };

        if self.modified == Some(modified) {
            debug!("Roster unchanged");
            return true;
        }

        match self.reload(modified) {
            Ok(()) => true,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Roster reload failed");
                false
            }
        }
    }

    fn reload(&mut self, modified: SystemTime) -> Result<()> {
        let bytes = std::fs::read(&self.path)?;
        let subscribers = parse_roster(&decode_text(&bytes, None))?;

        info!(subscribers = subscribers.len(), "Roster loaded");
        self.snapshot = Arc::from(subscribers);
        self.modified = Some(modified);
        Ok(())
    }

    /// Shared view of the current subscribers.
    #[must_use]
    pub fn snapshot(&self) -> Arc<[String]> {
        Arc::clone(&self.snapshot)
    }

    /// Number of current subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot.len()
    }

    /// Returns true if there are no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshot.is_empty()
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Parses roster CSV text into the list of active subscriber addresses.
///
/// # Errors
///
/// Returns [`Error::Roster`] when the header row lacks a required column.
pub fn parse_roster(text: &str) -> Result<Vec<String>> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut rows = parse_csv(text).into_iter();

    let header: Vec<String> = rows
        .next()
        .unwrap_or_default()
        .iter()
        .map(|name| name.trim().to_ascii_lowercase())
        .collect();

    let column = |name: &str| {
        header
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| Error::Roster(format!("missing column '{name}'")))
    };
    let status = column(STATUS)?;
    let membership = column(MEMBERSHIP)?;
    let child = column(CHILD)?;
    let email = column(HOME_EMAIL)?;

    let cell = |row: &[String], index: usize| -> String {
        row.get(index).map(|c| c.trim().to_string()).unwrap_or_default()
    };

    Ok(rows
        .filter(|row| {
            cell(row, status).eq_ignore_ascii_case("active")
                && cell(row, membership).eq_ignore_ascii_case("member")
                && cell(row, child).eq_ignore_ascii_case("false")
        })
        .map(|row| cell(&row, email))
        .filter(|address| !address.is_empty())
        .collect())
}

/// Splits CSV text into rows of fields.
///
/// Quoted fields may contain commas, line breaks and `""` escapes. Blank
/// lines produce no row.
fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => end_row(&mut rows, &mut row, &mut field),
            _ => field.push(c),
        }
    }
    end_row(&mut rows, &mut row, &mut field);

    rows
}

fn end_row(rows: &mut Vec<Vec<String>>, row: &mut Vec<String>, field: &mut String) {
    if row.is_empty() && field.is_empty() {
        return;
    }
    row.push(std::mem::take(field));
    rows.push(std::mem::take(row));
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;
    use std::time::Duration;

    const ROSTER: &str = "Name,Status,Membership,Child,Home Email\n\
Anna,active,member,false,a@x.org\n\
Bo,Active ,MEMBER, False , b@x.org \n\
Child,active,member,true,kid@x.org\n\
Former,inactive,member,false,old@x.org\n\
Guest,active,guest,false,guest@x.org\n\
NoMail,active,member,false,\n\
Short,active\n";

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content).unwrap();
        path
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(time).unwrap();
    }

    #[test]
    fn test_filter() {
        assert_eq!(parse_roster(ROSTER).unwrap(), vec!["a@x.org", "b@x.org"]);
    }

    #[test]
    fn test_columns_by_name_any_order() {
        let text = "Home Email;x,Child,Membership,Status\r\nz@x.org,false,member,active\r\n";
        assert!(parse_roster(text).is_err());

        let text = "Home Email,Child,Membership,Status\r\nz@x.org,false,member,active\r\n";
        assert_eq!(parse_roster(text).unwrap(), vec!["z@x.org"]);
    }

    #[test]
    fn test_missing_column() {
        let err = parse_roster("Status,Membership,Home Email\nactive,member,a@x.org\n").unwrap_err();
        assert!(matches!(err, Error::Roster(msg) if msg.contains("child")));
        assert!(parse_roster("").is_err());
    }

    #[test]
    fn test_quoted_fields_and_bom() {
        let text = "\u{feff}\"Name\",Status,Membership,Child,Home Email\n\
\"Lund, Eva \"\"E\"\"\",active,member,false,\"eva@x.org\"\n\
\"Multi\nLine\",active,member,false,m@x.org\n\
\n";
        assert_eq!(parse_roster(text).unwrap(), vec!["eva@x.org", "m@x.org"]);
    }

    #[test]
    fn test_parse_csv_fields() {
        let rows = parse_csv("a,\"b,c\",\"d\"\"e\"\r\n\r\n,\n");
        assert_eq!(
            rows,
            vec![
                vec!["a".to_string(), "b,c".to_string(), "d\"e".to_string()],
                vec![String::new(), String::new()],
            ]
        );
    }

    #[test]
    fn test_load_and_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "roster.csv", ROSTER.as_bytes());

        let store = RosterStore::load(&path).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(&*store.snapshot(), ["a@x.org", "b@x.org"]);
        assert_eq!(store.path(), path);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RosterStore::load(dir.path().join("absent.csv")).is_err());
    }

    #[test]
    fn test_latin1_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "roster.csv",
            b"Namn,Status,Membership,Child,Home Email\nG\xf6ran,active,member,false,g@x.org\n",
        );
        assert_eq!(&*RosterStore::load(&path).unwrap().snapshot(), ["g@x.org"]);
    }

    #[test]
    fn test_unchanged_refresh_keeps_same_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "roster.csv", ROSTER.as_bytes());
        let mut store = RosterStore::load(&path).unwrap();

        let before = store.snapshot();
        assert!(store.refresh());
        assert!(Arc::ptr_eq(&before, &store.snapshot()));
    }

    #[test]
    fn test_changed_file_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "roster.csv", ROSTER.as_bytes());
        let mut store = RosterStore::load(&path).unwrap();

        write_file(
            &dir,
            "roster.csv",
            b"Status,Membership,Child,Home Email\nactive,member,false,c@x.org\n",
        );
        set_mtime(&path, SystemTime::now() + Duration::from_secs(10));

        assert!(store.refresh());
        assert_eq!(&*store.snapshot(), ["c@x.org"]);
    }

    #[test]
    fn test_deleted_file_keeps_old_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "roster.csv", ROSTER.as_bytes());
        let mut store = RosterStore::load(&path).unwrap();

        std::fs::remove_file(&path).unwrap();
        assert!(!store.refresh());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_malformed_file_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "roster.csv", ROSTER.as_bytes());
        let mut store = RosterStore::load(&path).unwrap();

        let stamp = SystemTime::now() + Duration::from_secs(10);
        write_file(&dir, "roster.csv", b"no,useful,columns\n");
        set_mtime(&path, stamp);
        assert!(!store.refresh());
        assert_eq!(store.len(), 2);

        // The failed parse did not record `stamp`, so a fix carrying the
        // same mtime is still picked up.
        write_file(
            &dir,
            "roster.csv",
            b"Status,Membership,Child,Home Email\nactive,member,false,d@x.org\n",
        );
        set_mtime(&path, stamp);
        assert!(store.refresh());
        assert_eq!(&*store.snapshot(), ["d@x.org"]);
    }

    proptest! {
        #[test]
        fn row_included_iff_all_flags_match(
            status in "(active|Active|inactive| ACTIVE |)",
            membership in "(member|Member|guest|)",
            child in "(false|FALSE|true| false|)",
            email in "( |[a-z]{1,8}@x\\.org)",
        ) {
            let text = format!("Status,Membership,Child,Home Email\n{status},{membership},{child},{email}\n");
            let included = status.trim().eq_ignore_ascii_case("active")
                && membership.trim().eq_ignore_ascii_case("member")
                && child.trim().eq_ignore_ascii_case("false")
                && !email.trim().is_empty();

            let roster = parse_roster(&text).unwrap();
            prop_assert_eq!(roster.len(), usize::from(included));
            if included {
                prop_assert_eq!(&roster[0], email.trim());
            }
        }

        #[test]
        fn csv_parser_never_panics(text in "\\PC{0,200}") {
            let _ = parse_csv(&text);
            let _ = parse_roster(&text);
        }
    }
}

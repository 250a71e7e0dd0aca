use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Deserializer};
use tracing::info;

use crate::workflows::authorization::directory::{InMemoryDirectory, ScheduleError};
use crate::workflows::authorization::domain::{
    parse_local, AuthorizationWindow, DuesStatus, Match, MatchId, Member, MemberId,
};

#[derive(Debug)]
pub enum RosterError {
    Io(std::io::Error),
    Csv(csv::Error),
    InvalidDues { line: usize, value: String },
    Schedule(ScheduleError),
}

impl std::fmt::Display for RosterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RosterError::Io(err) => write!(f, "failed to read roster export: {}", err),
            RosterError::Csv(err) => write!(f, "invalid roster CSV data: {}", err),
            RosterError::InvalidDues { line, value } => write!(
                f,
                "unknown dues status '{}' on line {} (expected CURRENT, OVERDUE or INACTIVE)",
                value, line
            ),
            RosterError::Schedule(err) => write!(f, "could not apply roster: {}", err),
        }
    }
}

impl std::error::Error for RosterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RosterError::Io(err) => Some(err),
            RosterError::Csv(err) => Some(err),
            RosterError::InvalidDues { .. } => None,
            RosterError::Schedule(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for RosterError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for RosterError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

impl From<ScheduleError> for RosterError {
    fn from(err: ScheduleError) -> Self {
        Self::Schedule(err)
    }
}

/// Counts of roster entries applied to a directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RosterImport {
    pub matches: usize,
    pub members: usize,
}

pub fn load_matches(path: impl AsRef<Path>) -> Result<Vec<Match>, RosterError> {
    parse_matches(File::open(path)?)
}

pub fn load_members(path: impl AsRef<Path>) -> Result<Vec<Member>, RosterError> {
    parse_members(File::open(path)?)
}

/// Parse a match export. Window cells are kept verbatim so that malformed
/// entries surface as ineligible matches rather than import failures.
pub fn parse_matches<R: Read>(reader: R) -> Result<Vec<Match>, RosterError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut matches = Vec::new();
    for record in csv_reader.deserialize::<MatchRow>() {
        matches.push(record?.into_match());
    }
    Ok(matches)
}

pub fn parse_members<R: Read>(reader: R) -> Result<Vec<Member>, RosterError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut members = Vec::new();
    for (index, record) in csv_reader.deserialize::<MemberRow>().enumerate() {
        let row = record?;
        // Header is line 1.
        members.push(row.into_member(index + 2)?);
    }
    Ok(members)
}

/// Schedule every match and enroll every member, stopping at the first rejection.
pub fn import_into(
    directory: &mut InMemoryDirectory,
    matches: Vec<Match>,
    members: Vec<Member>,
) -> Result<RosterImport, RosterError> {
    let mut imported = RosterImport::default();
    for fixture in matches {
        directory.schedule(fixture)?;
        imported.matches += 1;
    }
    for member in members {
        directory.enroll(member)?;
        imported.members += 1;
    }

    info!(
        matches = imported.matches,
        members = imported.members,
        "roster imported"
    );
    Ok(imported)
}

#[derive(Debug, Deserialize)]
struct MatchRow {
    id: String,
    #[serde(default)]
    opponent: String,
    #[serde(default)]
    competition: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    kickoff_date: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    kickoff_time: Option<String>,
    #[serde(default)]
    venue: String,
    #[serde(default, deserialize_with = "flag")]
    is_home: bool,
    #[serde(default, deserialize_with = "flag")]
    is_neutral: bool,
    #[serde(default, deserialize_with = "flag")]
    is_suspended: bool,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    open_date: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    open_time: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    close_date: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    close_time: Option<String>,
}

impl MatchRow {
    fn into_match(self) -> Match {
        let kickoff = match (self.kickoff_date.as_deref(), self.kickoff_time.as_deref()) {
            (Some(date), Some(time)) => parse_local(date, time),
            _ => None,
        };

        Match {
            id: MatchId(self.id),
            opponent: self.opponent,
            competition: self.competition,
            kickoff,
            venue: self.venue,
            is_home: self.is_home,
            is_neutral: self.is_neutral,
            is_suspended: self.is_suspended,
            window: AuthorizationWindow {
                open_date: self.open_date,
                open_time: self.open_time,
                close_date: self.close_date,
                close_time: self.close_time,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct MemberRow {
    id: String,
    chapter: String,
    name: String,
    #[serde(default)]
    national_id: String,
    #[serde(default)]
    category: String,
    dues_status: String,
}

impl MemberRow {
    fn into_member(self, line: usize) -> Result<Member, RosterError> {
        let dues = parse_dues(&self.dues_status).ok_or(RosterError::InvalidDues {
            line,
            value: self.dues_status.clone(),
        })?;

        Ok(Member {
            id: MemberId(self.id),
            chapter: self.chapter,
            name: self.name,
            national_id: self.national_id,
            category: self.category,
            dues,
        })
    }
}

fn parse_dues(value: &str) -> Option<DuesStatus> {
    match value.trim().to_ascii_uppercase().as_str() {
        "CURRENT" => Some(DuesStatus::Current),
        "OVERDUE" => Some(DuesStatus::Overdue),
        "INACTIVE" => Some(DuesStatus::Inactive),
        _ => None,
    }
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "false" | "no" | "n" | "0" => Ok(false),
        "true" | "yes" | "y" | "1" => Ok(true),
        other => Err(serde::de::Error::custom(format!(
            "expected a boolean flag, found '{other}'"
        ))),
    }
}

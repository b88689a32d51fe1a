//! SEI case identifiers.
//!
//! A case ("processo") is written by users in two shapes:
//!
//! | Shape | Example | Rule |
//! |-------|---------|------|
//! | slashed | `123/2024`, `7/2023` | sequence left-padded to 3 digits, 4-digit year |
//! | compact | `1232024`, `72023` | left-padded to 7 digits, last 4 digits are the year |
//!
//! Both normalize to the folder name used in the archive: `SEI_<NNN>_<YYYY>`.
//! The folder name itself is accepted as input as well, so a name returned by
//! the locator can be handed back by an agent.

use std::fmt;
use std::str::FromStr;

const SEQUENCE_WIDTH: usize = 3;
const YEAR_WIDTH: usize = 4;
const COMPACT_WIDTH: usize = SEQUENCE_WIDTH + YEAR_WIDTH;
const FOLDER_PREFIX: &str = "SEI_";

/// A parsed case identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CaseId {
    sequence: u16,
    year: u16,
}

/// Why an identifier could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid process identifier '{input}': {reason}")]
pub struct CaseIdError {
    pub input: String,
    pub reason: &'static str,
}

impl CaseId {
    pub fn new(sequence: u16, year: u16) -> Option<Self> {
        (sequence <= 999 && year <= 9999).then_some(Self { sequence, year })
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn year(&self) -> u16 {
        self.year
    }

    /// Directory name of this case inside the archive root.
    pub fn folder_name(&self) -> String {
        format!(
            "{}{:0sw$}_{:0yw$}",
            FOLDER_PREFIX,
            self.sequence,
            self.year,
            sw = SEQUENCE_WIDTH,
            yw = YEAR_WIDTH
        )
    }

    fn parse_slashed(input: &str, sequence: &str, year: &str) -> Result<Self, CaseIdError> {
        let err = |reason| CaseIdError {
            input: input.to_string(),
            reason,
        };
        if sequence.is_empty() || !all_digits(sequence) {
            return Err(err("sequence must be numeric"));
        }
        if year.len() != YEAR_WIDTH || !all_digits(year) {
            return Err(err("year must have exactly 4 digits"));
        }
        let sequence: u16 = sequence
            .parse()
            .map_err(|_| err("sequence is out of range"))?;
        let year: u16 = year.parse().map_err(|_| err("year is out of range"))?;
        Self::new(sequence, year).ok_or_else(|| err("sequence must fit in 3 digits"))
    }

    fn parse_compact(input: &str, digits: &str) -> Result<Self, CaseIdError> {
        let err = |reason| CaseIdError {
            input: input.to_string(),
            reason,
        };
        if digits.len() > COMPACT_WIDTH {
            return Err(err("compact form has more than 7 digits"));
        }
        let padded = format!("{:0>width$}", digits, width = COMPACT_WIDTH);
        let (sequence, year) = padded.split_at(SEQUENCE_WIDTH);
        Self::parse_slashed(input, sequence, year)
    }
}

impl FromStr for CaseId {
    type Err = CaseIdError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let input = raw.trim();
        if input.is_empty() {
            return Err(CaseIdError {
                input: raw.to_string(),
                reason: "identifier is empty",
            });
        }

        if let Some(rest) = input.strip_prefix(FOLDER_PREFIX) {
            return match rest.split_once('_') {
                Some((sequence, year)) => Self::parse_slashed(input, sequence, year),
                None => Err(CaseIdError {
                    input: input.to_string(),
                    reason: "folder name must look like SEI_NNN_YYYY",
                }),
            };
        }

        match input.split_once('/') {
            Some((sequence, year)) => Self::parse_slashed(input, sequence.trim(), year.trim()),
            None if all_digits(input) => Self::parse_compact(input, input),
            None => Err(CaseIdError {
                input: input.to_string(),
                reason: "expected NNN/YYYY or NNNYYYY",
            }),
        }
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:0sw$}/{:0yw$}",
            self.sequence,
            self.year,
            sw = SEQUENCE_WIDTH,
            yw = YEAR_WIDTH
        )
    }
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

//! Output formats for host logs.
//!
//! The format name is accepted in any letter case wherever text is parsed,
//! so `--log-format JSON` and `LEAP_LOG_FORMAT=json` agree.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How the host renders its log lines on stderr.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event, fields flattened to the top level.
    Json,
    /// Terse single-line text for people watching a terminal.
    #[default]
    Compact,
}

impl LogFormat {
    /// Whether lines are machine-readable JSON.
    #[must_use]
    pub const fn is_json(self) -> bool {
        matches!(self, Self::Json)
    }
}

/// Error returned when text names no [`LogFormat`].
pub type LogFormatParseError = strum::ParseError;

use schemars::JsonSchema;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    For,
    Abstain,
    Against,
}

impl Position {
    pub const ALL: [Position; 3] = [Position::For, Position::Abstain, Position::Against];

    pub fn as_str(self) -> &'static str {
        match self {
            Position::For => "for",
            Position::Abstain => "abstain",
            Position::Against => "against",
        }
    }
}

// One proposal-vote record as found in the upstream dump. Field names follow
// the dump, not this codebase.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProposalRecord {
    pub title: String,
    #[serde(default)]
    pub report: Option<String>, // report reference, e.g. "A7-0001/2011"
    #[serde(default)]
    pub epref: Option<String>, // dossier procedure reference
    #[serde(default)]
    pub eptitle: Option<String>, // dossier title as published in the dump
    #[serde(default)]
    pub issue_type: Option<String>, // proposal kind
    pub ts: String, // ISO-8601 timestamp
    #[serde(default, rename = "For")]
    pub votes_for: Option<PositionBlock>,
    #[serde(default, rename = "Abstain")]
    pub votes_abstain: Option<PositionBlock>,
    #[serde(default, rename = "Against")]
    pub votes_against: Option<PositionBlock>,
}

impl ProposalRecord {
    pub fn block(&self, position: Position) -> Option<&PositionBlock> {
        match position {
            Position::For => self.votes_for.as_ref(),
            Position::Abstain => self.votes_abstain.as_ref(),
            Position::Against => self.votes_against.as_ref(),
        }
    }

    // Declared by the source, authoritative even when vote rows diverge.
    pub fn declared_total(&self, position: Position) -> i64 {
        self.block(position).map(|block| block.total).unwrap_or(0)
    }

    pub fn display(&self) -> String {
        format!("{} ({})", self.title, self.report.as_deref().unwrap_or(""))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PositionBlock {
    #[serde(default, deserialize_with = "lenient_total")]
    pub total: i64,
    #[serde(default)]
    pub groups: Vec<GroupBallot>,
}

// Per-political-group slice of a position's votes.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GroupBallot {
    pub group: String,
    #[serde(default)]
    pub votes: Vec<BallotEntry>,
}

// A single cast vote: the dump emits either a bare name string or an object
// carrying the original spelling under "orig" (later dumps use "name").
// Anything else is malformed and skips the record.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum BallotEntry {
    Name(String),
    Detailed(DetailedBallot),
    Malformed(Value),
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DetailedBallot {
    #[serde(default)]
    pub orig: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl BallotEntry {
    pub fn representative_name(&self) -> Option<&str> {
        match self {
            BallotEntry::Name(name) => Some(name),
            BallotEntry::Detailed(detail) => detail.orig.as_deref().or(detail.name.as_deref()),
            BallotEntry::Malformed(_) => None,
        }
    }
}

// Dump totals arrive as integers or as numeric strings.
fn lenient_total<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    struct TotalVisitor;

    impl Visitor<'_> for TotalVisitor {
        type Value = i64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an integer or a numeric string")
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<i64, E> {
            Ok(value)
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<i64, E> {
            i64::try_from(value).map_err(E::custom)
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<i64, E> {
            value.trim().parse().map_err(E::custom)
        }
    }

    deserializer.deserialize_any(TotalVisitor)
}

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Closed set of node kinds the scheduler distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Package,
    Procedure,
    Function,
    Trigger,
    Block,
    If,
    Case,
    Loop,
    Exception,
    Select,
    Insert,
    Update,
    Delete,
    Merge,
    Assignment,
    Call,
    Return,
    Raise,
    Declare,
    Cursor,
    Comment,
    Statement,
}

/// Static scheduling flags for a kind, looked up once per unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindBehavior {
    /// Enters a batch and is sent for analysis
    pub analyzable: bool,
    /// Reads or writes tables; eligible for structured-data extraction
    pub data_access: bool,
    /// Opens a new aggregate for its subtree
    pub aggregate_root: bool,
}

const fn flags(analyzable: bool, data_access: bool, aggregate_root: bool) -> KindBehavior {
    KindBehavior {
        analyzable,
        data_access,
        aggregate_root,
    }
}

const ROOT: KindBehavior = flags(true, false, true);
const PLAIN: KindBehavior = flags(true, false, false);
const DATA: KindBehavior = flags(true, true, false);
const PASSIVE: KindBehavior = flags(false, false, false);

impl UnitKind {
    pub const ALL: [UnitKind; 22] = [
        UnitKind::Package,
        UnitKind::Procedure,
        UnitKind::Function,
        UnitKind::Trigger,
        UnitKind::Block,
        UnitKind::If,
        UnitKind::Case,
        UnitKind::Loop,
        UnitKind::Exception,
        UnitKind::Select,
        UnitKind::Insert,
        UnitKind::Update,
        UnitKind::Delete,
        UnitKind::Merge,
        UnitKind::Assignment,
        UnitKind::Call,
        UnitKind::Return,
        UnitKind::Raise,
        UnitKind::Declare,
        UnitKind::Cursor,
        UnitKind::Comment,
        UnitKind::Statement,
    ];

    pub const fn behavior(self) -> KindBehavior {
        match self {
            UnitKind::Package | UnitKind::Procedure | UnitKind::Function | UnitKind::Trigger => {
                ROOT
            }
            UnitKind::Select
            | UnitKind::Insert
            | UnitKind::Update
            | UnitKind::Delete
            | UnitKind::Merge => DATA,
            UnitKind::Declare | UnitKind::Comment => PASSIVE,
            UnitKind::Block
            | UnitKind::If
            | UnitKind::Case
            | UnitKind::Loop
            | UnitKind::Exception
            | UnitKind::Assignment
            | UnitKind::Call
            | UnitKind::Return
            | UnitKind::Raise
            | UnitKind::Cursor
            | UnitKind::Statement => PLAIN,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            UnitKind::Package => "PACKAGE",
            UnitKind::Procedure => "PROCEDURE",
            UnitKind::Function => "FUNCTION",
            UnitKind::Trigger => "TRIGGER",
            UnitKind::Block => "BLOCK",
            UnitKind::If => "IF",
            UnitKind::Case => "CASE",
            UnitKind::Loop => "LOOP",
            UnitKind::Exception => "EXCEPTION",
            UnitKind::Select => "SELECT",
            UnitKind::Insert => "INSERT",
            UnitKind::Update => "UPDATE",
            UnitKind::Delete => "DELETE",
            UnitKind::Merge => "MERGE",
            UnitKind::Assignment => "ASSIGNMENT",
            UnitKind::Call => "CALL",
            UnitKind::Return => "RETURN",
            UnitKind::Raise => "RAISE",
            UnitKind::Declare => "DECLARE",
            UnitKind::Cursor => "CURSOR",
            UnitKind::Comment => "COMMENT",
            UnitKind::Statement => "STATEMENT",
        }
    }

    /// Maps a parser node label onto a kind. Unknown labels become `Statement`.
    pub fn parse(raw: &str) -> UnitKind {
        let normalized = raw.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        let mut label = normalized.as_str();
        label = label.strip_prefix("CREATE_").unwrap_or(label);
        for suffix in ["_STATEMENT", "_STMT", "_BODY", "_CLAUSE"] {
            label = label.strip_suffix(suffix).unwrap_or(label);
        }

        match label {
            "PACKAGE" | "PACKAGE_SPEC" => UnitKind::Package,
            "PROCEDURE" => UnitKind::Procedure,
            "FUNCTION" => UnitKind::Function,
            "TRIGGER" => UnitKind::Trigger,
            "BLOCK" | "BEGIN" | "ANONYMOUS_BLOCK" => UnitKind::Block,
            "IF" | "ELSIF" | "ELSE" => UnitKind::If,
            "CASE" | "WHEN" => UnitKind::Case,
            "LOOP" | "FOR" | "WHILE" | "FOR_LOOP" | "WHILE_LOOP" | "FORALL" => UnitKind::Loop,
            "EXCEPTION" | "EXCEPTION_HANDLER" => UnitKind::Exception,
            "SELECT" | "SELECT_INTO" | "FETCH" => UnitKind::Select,
            "INSERT" => UnitKind::Insert,
            "UPDATE" => UnitKind::Update,
            "DELETE" => UnitKind::Delete,
            "MERGE" => UnitKind::Merge,
            "ASSIGNMENT" => UnitKind::Assignment,
            "CALL" | "PROCEDURE_CALL" | "EXECUTE" | "EXECUTE_IMMEDIATE" => UnitKind::Call,
            "RETURN" => UnitKind::Return,
            "RAISE" => UnitKind::Raise,
            "DECLARE" | "DECLARATION" | "VARIABLE" | "SPEC" => UnitKind::Declare,
            "CURSOR" => UnitKind::Cursor,
            "COMMENT" => UnitKind::Comment,
            _ => UnitKind::Statement,
        }
    }
}

impl FromStr for UnitKind {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(UnitKind::parse(s))
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

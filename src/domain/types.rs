//! Shared domain enumerations for task records.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Unsolved,
    Resolved,
    Absolved,
    Dissolved,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Unsolved => "unsolved",
            Status::Resolved => "resolved",
            Status::Absolved => "absolved",
            Status::Dissolved => "dissolved",
        }
    }

    /// True once a task left the unsolved state.
    pub fn is_closed(self) -> bool {
        !matches!(self, Status::Unsolved)
    }
}

impl TryFrom<&str> for Status {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "unsolved" => Ok(Status::Unsolved),
            "resolved" => Ok(Status::Resolved),
            "absolved" => Ok(Status::Absolved),
            "dissolved" => Ok(Status::Dissolved),
            _ => Err(()),
        }
    }
}

/// Why a task exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Motive {
    Defect,
    Request,
    Idea,
    Question,
}

impl Motive {
    pub fn as_str(self) -> &'static str {
        match self {
            Motive::Defect => "defect",
            Motive::Request => "request",
            Motive::Idea => "idea",
            Motive::Question => "question",
        }
    }
}

impl TryFrom<&str> for Motive {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "defect" => Ok(Motive::Defect),
            "request" => Ok(Motive::Request),
            "idea" => Ok(Motive::Idea),
            "question" => Ok(Motive::Question),
            _ => Err(()),
        }
    }
}

/// What the outcome of a task is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Feature,
    Fix,
    Refactor,
    Documentation,
    Support,
}

impl Purpose {
    pub fn as_str(self) -> &'static str {
        match self {
            Purpose::Feature => "feature",
            Purpose::Fix => "fix",
            Purpose::Refactor => "refactor",
            Purpose::Documentation => "documentation",
            Purpose::Support => "support",
        }
    }
}

impl TryFrom<&str> for Purpose {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "feature" => Ok(Purpose::Feature),
            "fix" => Ok(Purpose::Fix),
            "refactor" => Ok(Purpose::Refactor),
            "documentation" => Ok(Purpose::Documentation),
            "support" => Ok(Purpose::Support),
            _ => Err(()),
        }
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Environment,
    Dependency,
    CodeQuality,
    Security,
    BreakingChange,
    OperationalRisk,
}

impl Category {
    pub const fn as_str(self) -> &'static str {
        match self {
            Category::Environment => "environment",
            Category::Dependency => "dependency",
            Category::CodeQuality => "code-quality",
            Category::Security => "security",
            Category::BreakingChange => "breaking-change",
            Category::OperationalRisk => "operational-risk",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

use std::collections::BTreeMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

pub type MemberId = u32;

/// What a batch operation does when a single item fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop at the first failing item and report it.
    #[default]
    Abort,
    /// Attempt every item and report the failures afterwards.
    Continue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberListing {
    pub id: MemberId,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub id: MemberId,
    pub name: String,
    pub eu_fraction: String,
    pub country: String,
    pub national_party: String,
    pub emails: Vec<String>,
    pub roles: BTreeMap<String, Vec<String>>,
}

impl Display for MemberRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "┌─ {} ({})", self.name, self.id)?;
        writeln!(f, "│  Group: {}", self.eu_fraction.trim())?;
        writeln!(f, "│  {} - {}", self.country, self.national_party)?;
        for email in &self.emails {
            writeln!(f, "│  Email: {}", email)?;
        }
        for (role, committees) in &self.roles {
            writeln!(f, "│  {}: {}", role, committees.join(", "))?;
        }
        write!(f, "└─")
    }
}

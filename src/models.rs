//! Typed records for the three collections and the inputs that mutate them
//!
//! Documents coming back from the store are decoded into these types; a
//! document that does not fit is reported as malformed instead of being
//! passed along half-read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Collection holding one profile per user
pub const USERS: &str = "users";

/// Collection holding every project
pub const PROJECTS: &str = "projects";

/// Longest accepted phone number, in digits
pub const MAX_PHONE_DIGITS: usize = 11;

/// Path of the item subcollection of a project
pub fn items_collection(project_id: &str) -> String {
    format!("{}/{}/items", PROJECTS, project_id)
}

/// Role stored on the profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Standard,
    Admin,
}

impl Role {
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// Profile of a user, keyed by the identity provider's user id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(skip_serializing)]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub school: String,

    #[serde(default)]
    pub email: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    #[serde(default)]
    pub role: Role,
}

impl UserProfile {
    /// Default record created on first sign-in
    pub fn new(id: &str, name: &str, email: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            school: String::new(),
            email: email.to_string(),
            phone: None,
            role: Role::Standard,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

/// A teacher's posted need
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub title: String,
    pub description: String,
    pub school: String,
    pub address: String,
    pub owner_id: String,
    #[serde(default)]
    pub owner_name: String,
    #[serde(default)]
    pub owner_email: String,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }
}

/// Caller-editable fields of a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectDraft {
    pub title: String,
    pub description: String,
    pub address: String,
}

impl ProjectDraft {
    pub fn new(title: &str, description: &str, address: &str) -> Self {
        Self {
            title: title.to_string(),
            description: description.to_string(),
            address: address.to_string(),
        }
    }

    /// Trimmed copy, rejected when a field is blank
    pub fn validated(&self) -> Result<Self> {
        Ok(Self {
            title: required("title", &self.title)?,
            description: required("description", &self.description)?,
            address: required("address", &self.address)?,
        })
    }
}

/// Fields written when a project is created
#[derive(Debug, Serialize)]
pub(crate) struct NewProject<'a> {
    #[serde(flatten)]
    pub draft: &'a ProjectDraft,
    pub school: &'a str,
    pub owner_id: &'a str,
    pub owner_name: &'a str,
    pub owner_email: &'a str,
}

/// One material line of a project's needs list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub name: String,
    pub needed: u32,
    #[serde(default)]
    pub received: u32,
    pub created_at: DateTime<Utc>,
}

impl Item {
    /// Units still missing
    pub fn remaining(&self) -> u32 {
        self.needed.saturating_sub(self.received)
    }

    pub fn is_fulfilled(&self) -> bool {
        self.received >= self.needed
    }

    /// Share received, rounded down, capped at 100
    pub fn progress_percent(&self) -> u8 {
        if self.needed == 0 {
            return 0;
        }
        let percent = u64::from(self.received) * 100 / u64::from(self.needed);
        percent.min(100) as u8
    }

    /// Check the stored quantities against the accounting invariant
    pub(crate) fn check_quantities(&self) -> std::result::Result<(), String> {
        if self.needed == 0 {
            return Err("needed must be at least 1".to_string());
        }
        if self.received > self.needed {
            return Err(format!(
                "received {} exceeds needed {}",
                self.received, self.needed
            ));
        }
        Ok(())
    }
}

/// Fields written when an item is created
#[derive(Debug, Serialize)]
pub(crate) struct NewItem<'a> {
    pub name: &'a str,
    pub needed: u32,
    pub received: u32,
}

/// Editable part of a profile
///
/// `phone` left as `None` keeps the stored number; an empty string clears it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProfileUpdate {
    pub name: String,
    pub school: String,
    pub phone: Option<String>,
}

impl ProfileUpdate {
    pub fn new(name: &str, school: &str) -> Self {
        Self {
            name: name.to_string(),
            school: school.to_string(),
            phone: None,
        }
    }

    pub fn with_phone(mut self, phone: &str) -> Self {
        self.phone = Some(phone.to_string());
        self
    }

    pub fn clear_phone(mut self) -> Self {
        self.phone = Some(String::new());
        self
    }

    /// Trimmed copy; a blank phone becomes the empty string that clears it
    pub fn validated(&self) -> Result<Self> {
        let name = required("name", &self.name)?;
        let school = self.school.trim().to_string();
        let phone = match self.phone.as_deref().map(str::trim) {
            None => None,
            Some("") => Some(String::new()),
            Some(phone) => {
                validate_phone(phone)?;
                Some(phone.to_string())
            }
        };
        Ok(Self {
            name,
            school,
            phone,
        })
    }

    /// How the stored phone changes: untouched, cleared or replaced
    pub(crate) fn phone_change(&self) -> Option<Option<&str>> {
        match self.phone.as_deref() {
            None => None,
            Some("") => Some(None),
            Some(phone) => Some(Some(phone)),
        }
    }
}

/// Fields merged into `users/{id}` by a profile save
#[derive(Debug, Serialize)]
pub(crate) struct ProfileFields<'a> {
    pub name: &'a str,
    pub school: &'a str,
    pub email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<Option<&'a str>>,
}

/// Denormalized owner fields rewritten on each owned project
#[derive(Debug, Serialize)]
pub(crate) struct OwnerFields<'a> {
    pub owner_name: &'a str,
    pub school: &'a str,
}

/// What a donor needs to arrange a delivery with the project owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactCard {
    pub project_title: String,
    pub owner_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub school: String,
    pub address: String,
}

impl ContactCard {
    /// Card built from the project's denormalized fields alone
    pub fn from_project(project: &Project) -> Self {
        Self {
            project_title: project.title.clone(),
            owner_name: project.owner_name.clone(),
            email: project.owner_email.clone(),
            phone: None,
            school: project.school.clone(),
            address: project.address.clone(),
        }
    }

    /// Card preferring the owner's live profile, falling back to the project
    /// for every blank profile field
    pub fn from_profile(project: &Project, profile: &UserProfile) -> Self {
        let pick = |live: &str, fallback: &str| {
            if live.trim().is_empty() {
                fallback.to_string()
            } else {
                live.to_string()
            }
        };
        Self {
            project_title: project.title.clone(),
            owner_name: pick(&profile.name, &project.owner_name),
            email: pick(&profile.email, &project.owner_email),
            phone: profile.phone.clone().filter(|p| !p.is_empty()),
            school: pick(&profile.school, &project.school),
            address: project.address.clone(),
        }
    }
}

/// Keep only the digits of a phone number as typed, truncated to the
/// accepted length
pub fn normalize_phone(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_digit())
        .take(MAX_PHONE_DIGITS)
        .collect()
}

fn validate_phone(phone: &str) -> Result<()> {
    if !phone.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::invalid_input("phone must contain digits only"));
    }
    if phone.len() > MAX_PHONE_DIGITS {
        return Err(Error::invalid_input(format!(
            "phone must have at most {} digits",
            MAX_PHONE_DIGITS
        )));
    }
    Ok(())
}

fn required(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::invalid_input(format!("{} cannot be empty", field)));
    }
    Ok(value.to_string())
}

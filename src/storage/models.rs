use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::error::StoreError;
use super::repository::Entity;

/// The four entity types, each stored as its own collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Request,
    Intervention,
    User,
    Photo,
}

impl EntityKind {
    pub const COUNT: usize = 4;

    pub const ALL: [EntityKind; Self::COUNT] = [
        EntityKind::Request,
        EntityKind::Intervention,
        EntityKind::User,
        EntityKind::Photo,
    ];

    /// Collection name, used for document and counter file names.
    pub fn collection(self) -> &'static str {
        match self {
            EntityKind::Request => "requests",
            EntityKind::Intervention => "interventions",
            EntityKind::User => "users",
            EntityKind::Photo => "photos",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            EntityKind::Request => 0,
            EntityKind::Intervention => 1,
            EntityKind::User => 2,
            EntityKind::Photo => 3,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Request => "Request",
            EntityKind::Intervention => "Intervention",
            EntityKind::User => "User",
            EntityKind::Photo => "Photo",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Request
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestState {
    Submitted,
    Pending,
    Planned,
}

impl RequestState {
    /// Whether a request in this state may still be planned.
    pub fn is_plannable(self) -> bool {
        matches!(self, RequestState::Submitted | RequestState::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// A citizen complaint or service request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Option<u64>,
    pub description: String,
    pub submitted_on: NaiveDate,
    pub state: RequestState,
    #[serde(default)]
    pub photo_refs: Vec<u64>,
    #[serde(default)]
    pub intervention_id: Option<u64>,
    #[serde(default)]
    pub citizen_id: Option<u64>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub address: Option<String>,
}

impl Request {
    /// A freshly submitted request dated today.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: None,
            description: description.into(),
            submitted_on: Utc::now().date_naive(),
            state: RequestState::Submitted,
            photo_refs: Vec::new(),
            intervention_id: None,
            citizen_id: None,
            location: None,
            address: None,
        }
    }
}

impl Entity for Request {
    const KIND: EntityKind = EntityKind::Request;

    fn id(&self) -> Option<u64> {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = Some(id);
    }

    fn validate(&self) -> Result<(), StoreError> {
        if self.description.trim().is_empty() {
            return Err(StoreError::validation("description is required"));
        }
        if let Some(location) = &self.location {
            if !(-90.0..=90.0).contains(&location.latitude)
                || !(-180.0..=180.0).contains(&location.longitude)
            {
                return Err(StoreError::validation("location is out of range"));
            }
        }
        if self.state == RequestState::Planned && self.intervention_id.is_none() {
            return Err(StoreError::validation(
                "a planned request must reference its intervention",
            ));
        }
        Ok(())
    }

    /// Only planning may mark a request planned or link an intervention.
    /// Photo references are checked by the intake, not here.
    fn validate_new(&self) -> Result<(), StoreError> {
        if !self.state.is_plannable() || self.intervention_id.is_some() {
            return Err(StoreError::validation(
                "a new request cannot start out planned",
            ));
        }
        Ok(())
    }

    fn check_update(&self, previous: &Self) -> Result<(), StoreError> {
        if previous.state == RequestState::Planned && self.state != RequestState::Planned {
            return Err(StoreError::invalid_state(format!(
                "request {:?} is planned and cannot go back to {:?}",
                self.id, self.state
            )));
        }
        if previous.intervention_id.is_some() && self.intervention_id != previous.intervention_id {
            return Err(StoreError::invalid_state(format!(
                "request {:?} is already linked to intervention {:?}",
                self.id, previous.intervention_id
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Intervention
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterventionStatus {
    Pending,
    InProgress,
    Completed,
}

/// Planned work created from exactly one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intervention {
    #[serde(default)]
    pub id: Option<u64>,
    pub request_id: u64,
    pub created_at: DateTime<Utc>,
    pub status: InterventionStatus,
    #[serde(default)]
    pub technician_id: Option<u64>,
}

impl Intervention {
    pub fn for_request(request_id: u64) -> Self {
        Self {
            id: None,
            request_id,
            created_at: Utc::now(),
            status: InterventionStatus::Pending,
            technician_id: None,
        }
    }
}

impl Entity for Intervention {
    const KIND: EntityKind = EntityKind::Intervention;

    fn id(&self) -> Option<u64> {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = Some(id);
    }

    fn validate(&self) -> Result<(), StoreError> {
        if self.request_id == 0 {
            return Err(StoreError::validation("request_id is required"));
        }
        Ok(())
    }

    fn check_update(&self, previous: &Self) -> Result<(), StoreError> {
        if self.request_id != previous.request_id {
            return Err(StoreError::validation(
                "an intervention's request cannot be reassigned",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// User
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Citizen,
    Technician,
    ServiceChief,
    Administrator,
}

/// Role-specific user data. The variant is the user's role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserProfile {
    Citizen {
        #[serde(default)]
        address: Option<String>,
        #[serde(default)]
        phone: Option<String>,
    },
    Technician {
        #[serde(default)]
        skills: Vec<String>,
        #[serde(default = "default_available")]
        available: bool,
    },
    ServiceChief {
        #[serde(default)]
        department: Option<String>,
    },
    Administrator,
}

fn default_available() -> bool {
    true
}

impl UserProfile {
    pub fn role(&self) -> Role {
        match self {
            UserProfile::Citizen { .. } => Role::Citizen,
            UserProfile::Technician { .. } => Role::Technician,
            UserProfile::ServiceChief { .. } => Role::ServiceChief,
            UserProfile::Administrator => Role::Administrator,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: Option<u64>,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    #[serde(flatten)]
    pub profile: UserProfile,
}

impl User {
    pub fn role(&self) -> Role {
        self.profile.role()
    }
}

impl Entity for User {
    const KIND: EntityKind = EntityKind::User;
    const UNIQUE_FIELDS: &'static [&'static str] = &["email"];

    fn id(&self) -> Option<u64> {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = Some(id);
    }

    fn validate(&self) -> Result<(), StoreError> {
        if self.name.trim().is_empty() {
            return Err(StoreError::validation("name is required"));
        }
        if !self.email.contains('@') {
            return Err(StoreError::validation("email is invalid"));
        }
        if self.password_hash.is_empty() {
            return Err(StoreError::validation("password is required"));
        }
        Ok(())
    }

    fn check_update(&self, previous: &Self) -> Result<(), StoreError> {
        if self.email != previous.email {
            return Err(StoreError::validation("email cannot be changed"));
        }
        Ok(())
    }
}

// ============================================================================
// Photo
// ============================================================================

/// Metadata for an uploaded photo; the bytes live in the asset store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    #[serde(default)]
    pub id: Option<u64>,
    pub stored_filename: String,
    pub original_filename: String,
    pub content_type: String,
    pub byte_size: u64,
    pub request_id: u64,
    pub uploaded_at: DateTime<Utc>,
}

impl Entity for Photo {
    const KIND: EntityKind = EntityKind::Photo;

    fn id(&self) -> Option<u64> {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = Some(id);
    }

    fn validate(&self) -> Result<(), StoreError> {
        if self.stored_filename.is_empty() {
            return Err(StoreError::validation("stored_filename is required"));
        }
        if self.request_id == 0 {
            return Err(StoreError::validation("request_id is required"));
        }
        Ok(())
    }
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::helpers::{AddAs, PersonDetails};
use crate::entity::persons;
use crate::entity::relationships::{self, RelationshipType};
use crate::layout::Direction;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePersonRequest {
    pub person: PersonDetails,
    #[serde(default)]
    pub relationship_type: AddAs,
    pub related_person_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct PersonResponse {
    pub success: bool,
    pub person: persons::Model,
}

#[derive(Debug, Deserialize)]
pub struct CreateRelationshipRequest {
    pub person1_id: Uuid,
    pub person2_id: Uuid,
    pub relationship_type: RelationshipType,
}

#[derive(Debug, Serialize)]
pub struct RelationshipResponse {
    pub relationship: relationships::Model,
    pub created: bool,
    pub mirrored: Vec<relationships::Model>,
}

#[derive(Debug, Deserialize)]
pub struct IdQuery {
    pub id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct TreeQuery {
    pub direction: Option<Direction>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub password: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub message: String,
    pub user: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePasswordRequest {
    pub new_password: Option<String>,
    pub admin_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    pub key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    pub success: bool,
    pub message: String,
    pub deleted_count: u64,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        MessageResponse {
            message: message.into(),
        }
    }
}

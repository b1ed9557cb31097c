use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// How `person1_id` relates to `person2_id`.
///
/// `Parent` reads "person1 is the parent of person2", `Child` reads
/// "person1 is the child of person2", `Spouse` has no direction.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum RelationshipType {
    #[sea_orm(string_value = "parent")]
    Parent,
    #[sea_orm(string_value = "child")]
    Child,
    #[sea_orm(string_value = "spouse")]
    Spouse,
}

impl RelationshipType {
    /// `(parent, child)` for a row `person1 -> person2` of this type.
    pub fn orient(self, person1: Uuid, person2: Uuid) -> Option<(Uuid, Uuid)> {
        match self {
            RelationshipType::Parent => Some((person1, person2)),
            RelationshipType::Child => Some((person2, person1)),
            RelationshipType::Spouse => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "relationships")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub person1_id: Uuid,
    pub person2_id: Uuid,
    pub relationship_type: RelationshipType,
    pub created_at: DateTimeUtc,
}

impl Model {
    /// `(parent, child)` for parent/child rows, `None` for spouses.
    pub fn parent_and_child(&self) -> Option<(Uuid, Uuid)> {
        self.relationship_type.orient(self.person1_id, self.person2_id)
    }

    /// The other side of a row that involves `person_id`.
    pub fn other(&self, person_id: Uuid) -> Uuid {
        if self.person1_id == person_id {
            self.person2_id
        } else {
            self.person1_id
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::persons::Entity",
        from = "Column::Person1Id",
        to = "super::persons::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Person1,

    #[sea_orm(
        belongs_to = "super::persons::Entity",
        from = "Column::Person2Id",
        to = "super::persons::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Person2,
}

impl ActiveModelBehavior for ActiveModel {}

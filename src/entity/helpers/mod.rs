pub mod sessions;

use std::collections::{BTreeMap, HashMap};

use chrono::{NaiveDate, Utc};
use log::{debug, warn};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::data::configuration::Family;
use crate::entity::relationships::RelationshipType;
use crate::entity::{persons, relationships};

#[derive(Debug, thiserror::Error)]
pub enum FamilyError {
    #[error("Name is required")]
    MissingName,
    #[error("A person cannot be related to themselves")]
    SelfLink,
    #[error("Person {0} already has two parents")]
    TooManyParents(Uuid),
    #[error("Person {0} not found")]
    PersonNotFound(Uuid),
    #[error("Relationship {0} not found")]
    RelationshipNotFound(Uuid),
    #[error("Relationship {0} already records this")]
    DuplicateRelationship(Uuid),
    #[error(transparent)]
    Database(#[from] DbErr),
}

pub type FamilyResult<T> = Result<T, FamilyError>;

/// Descriptive fields of a person as clients send them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonDetails {
    #[serde(default)]
    pub name: String,
    pub nickname: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub gender: Option<String>,
    pub date_of_death: Option<NaiveDate>,
    pub location: Option<String>,
    pub flagged_for_deletion: Option<bool>,
}

impl PersonDetails {
    fn validated_name(&self) -> FamilyResult<String> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(FamilyError::MissingName);
        }
        Ok(name.to_string())
    }
}

/// How a newly added person relates to an existing one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddAs {
    #[default]
    None,
    Spouse,
    Parent,
    Child,
}

/// Partial update of a relationship row.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelationshipChanges {
    pub person1_id: Option<Uuid>,
    pub person2_id: Option<Uuid>,
    pub relationship_type: Option<RelationshipType>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Linked {
    pub relationship: relationships::Model,
    /// false when an equivalent row already existed
    pub created: bool,
    /// the same link copied to the parent's spouse
    pub mirrored: Vec<relationships::Model>,
}

// Empty strings from forms mean "not set".
fn clean(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn touching(person_id: Uuid) -> Condition {
    Condition::any()
        .add(relationships::Column::Person1Id.eq(person_id))
        .add(relationships::Column::Person2Id.eq(person_id))
}

fn row(person1: Uuid, person2: Uuid, kind: RelationshipType) -> Condition {
    Condition::all()
        .add(relationships::Column::Person1Id.eq(person1))
        .add(relationships::Column::Person2Id.eq(person2))
        .add(relationships::Column::RelationshipType.eq(kind))
}

pub async fn all_persons<C: ConnectionTrait>(db: &C) -> FamilyResult<Vec<persons::Model>> {
    Ok(persons::Entity::find()
        .order_by_asc(persons::Column::CreatedAt)
        .order_by_asc(persons::Column::Name)
        .all(db)
        .await?)
}

pub async fn find_person<C: ConnectionTrait>(db: &C, id: Uuid) -> FamilyResult<persons::Model> {
    persons::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or(FamilyError::PersonNotFound(id))
}

pub async fn all_relationships<C: ConnectionTrait>(
    db: &C,
) -> FamilyResult<Vec<relationships::Model>> {
    Ok(relationships::Entity::find()
        .order_by_asc(relationships::Column::CreatedAt)
        .all(db)
        .await?)
}

pub async fn relationships_of<C: ConnectionTrait>(
    db: &C,
    person_id: Uuid,
) -> FamilyResult<Vec<relationships::Model>> {
    Ok(relationships::Entity::find()
        .filter(touching(person_id))
        .order_by_asc(relationships::Column::CreatedAt)
        .all(db)
        .await?)
}

async fn parent_ids<C: ConnectionTrait>(db: &C, child_id: Uuid) -> FamilyResult<Vec<Uuid>> {
    let links = relationships::Entity::find()
        .filter(
            Condition::any()
                .add(
                    Condition::all()
                        .add(relationships::Column::RelationshipType.eq(RelationshipType::Parent))
                        .add(relationships::Column::Person2Id.eq(child_id)),
                )
                .add(
                    Condition::all()
                        .add(relationships::Column::RelationshipType.eq(RelationshipType::Child))
                        .add(relationships::Column::Person1Id.eq(child_id)),
                ),
        )
        .order_by_asc(relationships::Column::CreatedAt)
        .all(db)
        .await?;

    let mut ids = Vec::new();
    for link in links {
        if let Some((parent, _)) = link.parent_and_child() {
            if !ids.contains(&parent) {
                ids.push(parent);
            }
        }
    }
    Ok(ids)
}

async fn spouse_ids<C: ConnectionTrait>(db: &C, person_id: Uuid) -> FamilyResult<Vec<Uuid>> {
    let links = relationships::Entity::find()
        .filter(relationships::Column::RelationshipType.eq(RelationshipType::Spouse))
        .filter(touching(person_id))
        .order_by_asc(relationships::Column::CreatedAt)
        .all(db)
        .await?;

    let mut ids = Vec::new();
    for link in links {
        let other = link.other(person_id);
        if other != person_id && !ids.contains(&other) {
            ids.push(other);
        }
    }
    Ok(ids)
}

// Rows stating the same fact, in either orientation.
fn equivalent(person1: Uuid, person2: Uuid, kind: RelationshipType) -> Condition {
    match kind.orient(person1, person2) {
        None => Condition::any()
            .add(row(person1, person2, RelationshipType::Spouse))
            .add(row(person2, person1, RelationshipType::Spouse)),
        Some((parent, child)) => Condition::any()
            .add(row(parent, child, RelationshipType::Parent))
            .add(row(child, parent, RelationshipType::Child)),
    }
}

/// An existing row stating the same fact, in either orientation.
pub async fn find_equivalent<C: ConnectionTrait>(
    db: &C,
    person1: Uuid,
    person2: Uuid,
    kind: RelationshipType,
) -> FamilyResult<Option<relationships::Model>> {
    Ok(relationships::Entity::find()
        .filter(equivalent(person1, person2, kind))
        .one(db)
        .await?)
}

async fn insert_person<C: ConnectionTrait>(
    db: &C,
    details: &PersonDetails,
) -> FamilyResult<persons::Model> {
    let name = details.validated_name()?;
    let now = Utc::now();
    let person = persons::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name),
        nickname: Set(clean(&details.nickname)),
        birthday: Set(details.birthday),
        gender: Set(clean(&details.gender)),
        date_of_death: Set(details.date_of_death),
        location: Set(clean(&details.location)),
        created_at: Set(now),
        updated_at: Set(now),
        flagged_for_deletion: Set(details.flagged_for_deletion.unwrap_or(false)),
    };
    Ok(person.insert(db).await?)
}

async fn insert_relationship<C: ConnectionTrait>(
    db: &C,
    person1: Uuid,
    person2: Uuid,
    kind: RelationshipType,
) -> FamilyResult<relationships::Model> {
    let link = relationships::ActiveModel {
        id: Set(Uuid::new_v4()),
        person1_id: Set(person1),
        person2_id: Set(person2),
        relationship_type: Set(kind),
        created_at: Set(Utc::now()),
    };
    Ok(link.insert(db).await?)
}

fn genders_differ(a: &persons::Model, b: &persons::Model) -> bool {
    match (clean(&a.gender), clean(&b.gender)) {
        (Some(a), Some(b)) => !a.eq_ignore_ascii_case(&b),
        _ => false,
    }
}

/// Inserts a person and, when `link` names a related person, the
/// relationships implied by adding them as that person's spouse, parent or
/// child. Everything happens in one transaction.
pub async fn add_person<C: ConnectionTrait + TransactionTrait>(
    db: &C,
    details: &PersonDetails,
    link: Option<(AddAs, Uuid)>,
) -> FamilyResult<(persons::Model, Vec<relationships::Model>)> {
    details.validated_name()?;
    let txn = db.begin().await?;

    let link = match link {
        Some((AddAs::None, _)) | None => None,
        Some((kind, related)) => Some((kind, find_person(&txn, related).await?)),
    };

    let mut existing_parents = Vec::new();
    if let Some((AddAs::Parent, related)) = &link {
        existing_parents = parent_ids(&txn, related.id).await?;
        if existing_parents.len() >= 2 {
            return Err(FamilyError::TooManyParents(related.id));
        }
    }

    let person = insert_person(&txn, details).await?;
    let mut planned = Vec::new();
    match link {
        Some((AddAs::Spouse, related)) => {
            planned.push((related.id, person.id, RelationshipType::Spouse));
        }
        Some((AddAs::Parent, related)) => {
            planned.push((person.id, related.id, RelationshipType::Parent));
            if let Some(&other) = existing_parents.first() {
                let other = find_person(&txn, other).await?;
                if genders_differ(&other, &person) {
                    debug!("Marrying {} to co-parent {}", person.name, other.name);
                    planned.push((other.id, person.id, RelationshipType::Spouse));
                }
            }
        }
        Some((AddAs::Child, related)) => {
            planned.push((related.id, person.id, RelationshipType::Parent));
            if let Some(&spouse) = spouse_ids(&txn, related.id).await?.first() {
                planned.push((spouse, person.id, RelationshipType::Parent));
            }
        }
        Some((AddAs::None, _)) | None => {}
    }

    let mut links = Vec::with_capacity(planned.len());
    for (person1, person2, kind) in planned {
        links.push(insert_relationship(&txn, person1, person2, kind).await?);
    }

    txn.commit().await?;
    Ok((person, links))
}

pub async fn update_person<C: ConnectionTrait>(
    db: &C,
    id: Uuid,
    details: &PersonDetails,
) -> FamilyResult<persons::Model> {
    let name = details.validated_name()?;
    let existing = find_person(db, id).await?;
    let flagged = details
        .flagged_for_deletion
        .unwrap_or(existing.flagged_for_deletion);

    let mut person: persons::ActiveModel = existing.into();
    person.name = Set(name);
    person.nickname = Set(clean(&details.nickname));
    person.birthday = Set(details.birthday);
    person.gender = Set(clean(&details.gender));
    person.date_of_death = Set(details.date_of_death);
    person.location = Set(clean(&details.location));
    person.flagged_for_deletion = Set(flagged);
    person.updated_at = Set(Utc::now());
    Ok(person.update(db).await?)
}

/// Removes a person and every relationship naming them. Returns how many
/// relationships went with them.
pub async fn delete_person<C: ConnectionTrait + TransactionTrait>(
    db: &C,
    id: Uuid,
) -> FamilyResult<u64> {
    let txn = db.begin().await?;
    find_person(&txn, id).await?;
    let removed = relationships::Entity::delete_many()
        .filter(touching(id))
        .exec(&txn)
        .await?
        .rows_affected;
    persons::Entity::delete_by_id(id).exec(&txn).await?;
    txn.commit().await?;
    Ok(removed)
}

async fn link_in<C: ConnectionTrait>(
    db: &C,
    person1: Uuid,
    person2: Uuid,
    kind: RelationshipType,
) -> FamilyResult<Linked> {
    if person1 == person2 {
        return Err(FamilyError::SelfLink);
    }
    find_person(db, person1).await?;
    find_person(db, person2).await?;

    if let Some(existing) = find_equivalent(db, person1, person2, kind).await? {
        return Ok(Linked {
            relationship: existing,
            created: false,
            mirrored: Vec::new(),
        });
    }

    let parent_child = kind.orient(person1, person2);
    if let Some((_, child)) = parent_child {
        if parent_ids(db, child).await?.len() >= 2 {
            return Err(FamilyError::TooManyParents(child));
        }
    }

    let relationship = insert_relationship(db, person1, person2, kind).await?;
    let mut mirrored = Vec::new();
    if let Some((parent, child)) = parent_child {
        let parents = parent_ids(db, child).await?;
        if parents.len() < 2 {
            let spouse = spouse_ids(db, parent)
                .await?
                .into_iter()
                .find(|s| *s != child && !parents.contains(s));
            if let Some(spouse) = spouse {
                let (p1, p2) = match kind {
                    RelationshipType::Child => (child, spouse),
                    _ => (spouse, child),
                };
                mirrored.push(insert_relationship(db, p1, p2, kind).await?);
            }
        }
    }

    Ok(Linked {
        relationship,
        created: true,
        mirrored,
    })
}

/// Records a relationship unless an equivalent one exists. A new parent link
/// is copied to the parent's spouse while the child has room for a second
/// parent.
pub async fn link<C: ConnectionTrait + TransactionTrait>(
    db: &C,
    person1: Uuid,
    person2: Uuid,
    kind: RelationshipType,
) -> FamilyResult<Linked> {
    let txn = db.begin().await?;
    let linked = link_in(&txn, person1, person2, kind).await?;
    txn.commit().await?;
    Ok(linked)
}

pub async fn update_relationship<C: ConnectionTrait + TransactionTrait>(
    db: &C,
    id: Uuid,
    changes: &RelationshipChanges,
) -> FamilyResult<relationships::Model> {
    let txn = db.begin().await?;
    let existing = relationships::Entity::find_by_id(id)
        .one(&txn)
        .await?
        .ok_or(FamilyError::RelationshipNotFound(id))?;

    let person1 = changes.person1_id.unwrap_or(existing.person1_id);
    let person2 = changes.person2_id.unwrap_or(existing.person2_id);
    let kind = changes
        .relationship_type
        .unwrap_or(existing.relationship_type);
    if person1 == person2 {
        return Err(FamilyError::SelfLink);
    }
    find_person(&txn, person1).await?;
    find_person(&txn, person2).await?;
    let duplicate = relationships::Entity::find()
        .filter(equivalent(person1, person2, kind))
        .filter(relationships::Column::Id.ne(id))
        .one(&txn)
        .await?;
    if let Some(other) = duplicate {
        return Err(FamilyError::DuplicateRelationship(other.id));
    }

    if let Some((parent, child)) = kind.orient(person1, person2) {
        let mut parents = parent_ids(&txn, child).await?;
        // The row being edited does not count against its own child.
        if let Some((old_parent, old_child)) = existing.parent_and_child() {
            if old_child == child {
                parents.retain(|p| *p != old_parent);
            }
        }
        if !parents.contains(&parent) && parents.len() >= 2 {
            return Err(FamilyError::TooManyParents(child));
        }
    }

    let mut link: relationships::ActiveModel = existing.into();
    link.person1_id = Set(person1);
    link.person2_id = Set(person2);
    link.relationship_type = Set(kind);
    let updated = link.update(&txn).await?;
    txn.commit().await?;
    Ok(updated)
}

pub async fn delete_relationship<C: ConnectionTrait>(db: &C, id: Uuid) -> FamilyResult<()> {
    let result = relationships::Entity::delete_by_id(id).exec(db).await?;
    if result.rows_affected == 0 {
        return Err(FamilyError::RelationshipNotFound(id));
    }
    Ok(())
}

/// Inserts the `[family.<key>]` members from the configuration and links
/// spouses and children by key. Returns the number of persons created.
pub async fn seed_family<C: ConnectionTrait + TransactionTrait>(
    db: &C,
    family: &BTreeMap<String, Family>,
) -> FamilyResult<usize> {
    let txn = db.begin().await?;
    let mut ids: HashMap<&str, Uuid> = HashMap::new();
    for (key, member) in family {
        let person = insert_person(&txn, &member.details()).await?;
        debug!("Seeded {} as {}", key, person.id);
        ids.insert(key.as_str(), person.id);
    }

    for (key, member) in family {
        let me = ids[key.as_str()];
        if let Some(spouse) = &member.spouse {
            match ids.get(spouse.as_str()) {
                Some(&other) => {
                    link_in(&txn, me, other, RelationshipType::Spouse).await?;
                }
                None => warn!("{key} names unknown spouse '{spouse}', skipping"),
            }
        }
    }
    for (key, member) in family {
        let me = ids[key.as_str()];
        for child in &member.children {
            match ids.get(child.as_str()) {
                Some(&child_id) => {
                    link_in(&txn, me, child_id, RelationshipType::Parent).await?;
                }
                None => warn!("{key} names unknown child '{child}', skipping"),
            }
        }
    }

    txn.commit().await?;
    Ok(ids.len())
}

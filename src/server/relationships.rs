use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use axum_extra::extract::WithRejection;
use log::{debug, info};
use uuid::Uuid;

use super::ServerState;
use super::error::ApiError;
use super::types::{
    CreateRelationshipRequest, IdQuery, MessageResponse, RelationshipResponse, TreeQuery,
};
use crate::auth::Claims;
use crate::entity::helpers::{self, RelationshipChanges};
use crate::entity::relationships;
use crate::layout::{self, FamilyDiagram};

pub(super) async fn list_relationships(
    State(state): State<ServerState>,
) -> Result<Json<Vec<relationships::Model>>, ApiError> {
    Ok(Json(helpers::all_relationships(state.db()?).await?))
}

pub(super) async fn relationships_of_person(
    State(state): State<ServerState>,
    WithRejection(Path(person_id), _): WithRejection<Path<Uuid>, ApiError>,
) -> Result<Json<Vec<relationships::Model>>, ApiError> {
    Ok(Json(
        helpers::relationships_of(state.db()?, person_id).await?,
    ))
}

pub(super) async fn create_relationship(
    State(state): State<ServerState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(payload), _): WithRejection<Json<CreateRelationshipRequest>, ApiError>,
) -> Result<(StatusCode, Json<RelationshipResponse>), ApiError> {
    let linked = helpers::link(
        state.db()?,
        payload.person1_id,
        payload.person2_id,
        payload.relationship_type,
    )
    .await?;

    let status = if linked.created {
        info!(
            "{} linked {} -> {} as {:?}",
            claims.sub, payload.person1_id, payload.person2_id, payload.relationship_type
        );
        StatusCode::CREATED
    } else {
        debug!("Relationship {} already recorded", linked.relationship.id);
        StatusCode::OK
    };
    Ok((
        status,
        Json(RelationshipResponse {
            relationship: linked.relationship,
            created: linked.created,
            mirrored: linked.mirrored,
        }),
    ))
}

pub(super) async fn update_relationship(
    State(state): State<ServerState>,
    WithRejection(Query(query), _): WithRejection<Query<IdQuery>, ApiError>,
    WithRejection(Json(changes), _): WithRejection<Json<RelationshipChanges>, ApiError>,
) -> Result<Json<relationships::Model>, ApiError> {
    let db = state.db()?;
    Ok(Json(helpers::update_relationship(db, query.id, &changes).await?))
}

pub(super) async fn delete_relationship(
    State(state): State<ServerState>,
    WithRejection(Query(query), _): WithRejection<Query<IdQuery>, ApiError>,
) -> Result<Json<MessageResponse>, ApiError> {
    helpers::delete_relationship(state.db()?, query.id).await?;
    Ok(Json(MessageResponse::new("Relationship deleted")))
}

pub(super) async fn family_tree(
    State(state): State<ServerState>,
    WithRejection(Query(query), _): WithRejection<Query<TreeQuery>, ApiError>,
) -> Result<Json<FamilyDiagram>, ApiError> {
    let db = state.db()?;
    let persons = helpers::all_persons(db).await?;
    let relationships = helpers::all_relationships(db).await?;

    let mut options = state.layout.as_ref().clone();
    if let Some(direction) = query.direction {
        options.direction = direction;
    }
    Ok(Json(layout::layout_family(&persons, &relationships, &options)))
}

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use axum_extra::extract::WithRejection;
use log::info;
use uuid::Uuid;

use super::ServerState;
use super::error::ApiError;
use super::types::{CreatePersonRequest, MessageResponse, PersonResponse};
use crate::auth::Claims;
use crate::entity::helpers::{self, AddAs, PersonDetails};
use crate::entity::persons;

pub(super) async fn list_persons(
    State(state): State<ServerState>,
) -> Result<Json<Vec<persons::Model>>, ApiError> {
    Ok(Json(helpers::all_persons(state.db()?).await?))
}

pub(super) async fn get_person(
    State(state): State<ServerState>,
    WithRejection(Path(id), _): WithRejection<Path<Uuid>, ApiError>,
) -> Result<Json<persons::Model>, ApiError> {
    Ok(Json(helpers::find_person(state.db()?, id).await?))
}

pub(super) async fn create_person(
    State(state): State<ServerState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(payload), _): WithRejection<Json<CreatePersonRequest>, ApiError>,
) -> Result<(StatusCode, Json<PersonResponse>), ApiError> {
    let link = match (payload.relationship_type, payload.related_person_id) {
        (AddAs::None, _) => None,
        (_, None) => {
            return Err(ApiError::bad_request(
                "relatedPersonId is required when relationshipType is set",
            ));
        }
        (kind, Some(related)) => Some((kind, related)),
    };

    let db = state.db()?;
    let (person, links) = helpers::add_person(db, &payload.person, link).await?;
    info!(
        "{} added {} ({}) with {} relationship(s)",
        claims.sub,
        person.name,
        person.id,
        links.len()
    );
    Ok((
        StatusCode::CREATED,
        Json(PersonResponse {
            success: true,
            person,
        }),
    ))
}

pub(super) async fn update_person(
    State(state): State<ServerState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Path(id), _): WithRejection<Path<Uuid>, ApiError>,
    WithRejection(Json(details), _): WithRejection<Json<PersonDetails>, ApiError>,
) -> Result<Json<PersonResponse>, ApiError> {
    let person = helpers::update_person(state.db()?, id, &details).await?;
    info!("{} updated {} ({})", claims.sub, person.name, person.id);
    Ok(Json(PersonResponse {
        success: true,
        person,
    }))
}

pub(super) async fn delete_person(
    State(state): State<ServerState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Path(id), _): WithRejection<Path<Uuid>, ApiError>,
) -> Result<Json<MessageResponse>, ApiError> {
    let removed = helpers::delete_person(state.db()?, id).await?;
    info!("{} deleted {id} and {removed} relationship(s)", claims.sub);
    Ok(Json(MessageResponse::new(
        "Person and related relationships deleted",
    )))
}

use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, Set,
};
use uuid::Uuid;

use crate::entity::{login_log, shared_password};

const PASSWORD_ROW: i32 = 1;

pub async fn shared_password<C: ConnectionTrait>(
    db: &C,
) -> Result<Option<shared_password::Model>, DbErr> {
    shared_password::Entity::find_by_id(PASSWORD_ROW)
        .one(db)
        .await
}

fn password_row(password_hash: String) -> shared_password::ActiveModel {
    shared_password::ActiveModel {
        id: Set(PASSWORD_ROW),
        password_hash: Set(password_hash),
        updated_at: Set(Utc::now()),
    }
}

async fn stored_password<C: ConnectionTrait>(db: &C) -> Result<shared_password::Model, DbErr> {
    shared_password(db)
        .await?
        .ok_or_else(|| DbErr::RecordNotFound("shared password row".into()))
}

/// Writes the first shared password hash unless a row already exists, and
/// returns whichever row is stored. Concurrent first logins all end up with
/// the same row.
pub async fn init_shared_password<C: ConnectionTrait>(
    db: &C,
    password_hash: String,
) -> Result<shared_password::Model, DbErr> {
    shared_password::Entity::insert(password_row(password_hash))
        .on_conflict(
            OnConflict::column(shared_password::Column::Id)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    stored_password(db).await
}

/// Replaces the shared password hash, creating the row on first use. The
/// new `updated_at` is what invalidates previously issued tokens.
pub async fn store_shared_password<C: ConnectionTrait>(
    db: &C,
    password_hash: String,
) -> Result<shared_password::Model, DbErr> {
    shared_password::Entity::insert(password_row(password_hash))
        .on_conflict(
            OnConflict::column(shared_password::Column::Id)
                .update_columns([
                    shared_password::Column::PasswordHash,
                    shared_password::Column::UpdatedAt,
                ])
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    stored_password(db).await
}

pub async fn record_login<C: ConnectionTrait>(
    db: &C,
    token_id: Uuid,
    user_info: &str,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<(), DbErr> {
    login_log::ActiveModel {
        id: Set(token_id),
        user_info: Set(user_info.to_string()),
        created_at: Set(created_at),
        expires_at: Set(expires_at),
    }
    .insert(db)
    .await?;
    Ok(())
}

pub async fn forget_login<C: ConnectionTrait>(db: &C, token_id: Uuid) -> Result<u64, DbErr> {
    Ok(login_log::Entity::delete_by_id(token_id)
        .exec(db)
        .await?
        .rows_affected)
}

pub async fn forget_all_logins<C: ConnectionTrait>(db: &C) -> Result<u64, DbErr> {
    Ok(login_log::Entity::delete_many()
        .exec(db)
        .await?
        .rows_affected)
}

pub async fn prune_expired_logins<C: ConnectionTrait>(
    db: &C,
    now: DateTime<Utc>,
) -> Result<u64, DbErr> {
    Ok(login_log::Entity::delete_many()
        .filter(login_log::Column::ExpiresAt.lt(now))
        .exec(db)
        .await?
        .rows_affected)
}

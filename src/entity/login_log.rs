use sea_orm::entity::prelude::*;

/// Audit trail of issued tokens. Never consulted to authorize a request.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "login_log")]
pub struct Model {
    /// The `jti` of the issued token
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_info: String,
    pub created_at: DateTimeUtc,
    pub expires_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

use anyhow::Context;
use log::{debug, info};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait, PaginatorTrait,
    Schema,
};

use crate::data::configuration::Configuration;
use crate::entity::{helpers, login_log, persons, relationships, shared_password};

pub(crate) trait KTDBConnection {
    async fn connect(&mut self) -> Result<(), anyhow::Error>;
    async fn check(&self) -> Result<(), anyhow::Error>;
    async fn close(&self) -> Result<(), anyhow::Error>;
    async fn is_initialized(&self) -> Result<bool, anyhow::Error>;
    async fn initialize(&self, config: &Configuration) -> Result<(), anyhow::Error>;
}

pub struct SQLConnector {
    url: String,
    database_connection: Option<DatabaseConnection>,
}

impl SQLConnector {
    pub fn new(url: &str) -> Self {
        SQLConnector {
            url: url.to_string(),
            database_connection: None,
        }
    }

    pub fn connection(&self) -> anyhow::Result<&DatabaseConnection> {
        self.database_connection
            .as_ref()
            .context("database is not connected")
    }

    // Credentials in a postgres url stay out of the logs.
    fn display_url(&self) -> &str {
        match self.url.rsplit_once('@') {
            Some((_, host)) => host,
            None => &self.url,
        }
    }
}

async fn create_schema(db: &DatabaseConnection) -> anyhow::Result<()> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);
    // Parents before the tables that reference them.
    let mut statements = [
        schema.create_table_from_entity(persons::Entity),
        schema.create_table_from_entity(relationships::Entity),
        schema.create_table_from_entity(shared_password::Entity),
        schema.create_table_from_entity(login_log::Entity),
    ];
    for statement in statements.iter_mut() {
        statement.if_not_exists();
        db.execute(backend.build(&*statement))
            .await
            .context("failed to create table")?;
    }
    Ok(())
}

impl KTDBConnection for SQLConnector {
    async fn connect(&mut self) -> Result<(), anyhow::Error> {
        let mut options = ConnectOptions::new(self.url.clone());
        options.sqlx_logging_level(log::LevelFilter::Debug);
        let db = Database::connect(options)
            .await
            .with_context(|| format!("failed to connect to {}", self.display_url()))?;
        debug!("Connected to {}", self.display_url());

        self.database_connection = Some(db);
        Ok(())
    }
    async fn check(&self) -> Result<(), anyhow::Error> {
        if let Some(ref db) = self.database_connection {
            db.ping().await?;
        }
        Ok(())
    }
    async fn close(&self) -> Result<(), anyhow::Error> {
        if let Some(ref db) = self.database_connection {
            let db = db.clone();
            db.close().await?;
        }
        Ok(())
    }
    async fn is_initialized(&self) -> Result<bool, anyhow::Error> {
        let db = self.connection()?;
        // A missing table makes the count fail.
        Ok(persons::Entity::find().count(db).await.is_ok())
    }
    async fn initialize(&self, config: &Configuration) -> Result<(), anyhow::Error> {
        let db = self.connection()?;
        create_schema(db).await?;
        info!("Database schema created");

        if !config.family.is_empty() {
            let seeded = helpers::seed_family(db, &config.family)
                .await
                .context("failed to seed family from configuration")?;
            info!("Seeded {seeded} family members from configuration");
        }
        Ok(())
    }
}

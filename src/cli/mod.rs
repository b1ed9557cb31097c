use crate::auth;
use crate::data::configuration::Configuration;
use crate::data::dbconnector::{KTDBConnection, SQLConnector};
use crate::entity::helpers;
use crate::layout::{self, Direction};
use crate::server;
use clap::{Parser, Subcommand};
use log::{debug, info};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value_t = String::from("configuration.toml"))]
    configuration_path: String,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the JSON API (the default)
    Serve {
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
    },
    /// Print the laid-out family tree as JSON
    Layout {
        #[arg(short, long)]
        direction: Option<Direction>,
    },
    /// Print a fresh JWT secret for the environment file
    GenerateSecret {
        #[arg(short, long, default_value_t = 64)]
        bytes: usize,
    },
}

pub async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    debug!("Configuration path: {}", args.configuration_path);

    match args.command.unwrap_or(Command::Serve { port: 8080 }) {
        Command::GenerateSecret { bytes } => {
            println!("JWT_SECRET={}", auth::generate_secret(bytes));
            Ok(())
        }
        Command::Serve { port } => {
            let (config, db_connector) = open(&args.configuration_path).await?;
            server::run(config, db_connector, port).await
        }
        Command::Layout { direction } => {
            let (config, db_connector) = open(&args.configuration_path).await?;
            let db = db_connector.connection()?;
            let persons = helpers::all_persons(db).await?;
            let relationships = helpers::all_relationships(db).await?;

            let mut options = config.layout.clone();
            if let Some(direction) = direction {
                options.direction = direction;
            }
            let diagram = layout::layout_family(&persons, &relationships, &options);
            println!("{}", serde_json::to_string_pretty(&diagram)?);
            db_connector.close().await
        }
    }
}

async fn open(configuration_path: &str) -> anyhow::Result<(Configuration, SQLConnector)> {
    let config = Configuration::load(configuration_path)?;
    debug!(
        "Loaded configuration with {} seed family member(s)",
        config.family.len()
    );
    // Check the database connection
    let mut db_connector = SQLConnector::new(&config.database.connection_url());
    db_connector.connect().await?;
    db_connector.check().await?;
    // Has database been initialised ?
    if db_connector.is_initialized().await? {
        info!("Database is initialized");
    } else {
        info!("Database is not initialized, performing initialization");
        db_connector.initialize(&config).await?;
    }
    Ok((config, db_connector))
}

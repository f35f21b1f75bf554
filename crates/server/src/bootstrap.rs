use std::sync::Arc;

use comanda_agent::llm::PromptClassifier;
use comanda_agent::{AgentRuntime, Collaborators, DialogueOrchestrator};
use comanda_core::audit::TracingAuditSink;
use comanda_core::config::{AppConfig, ConfigError, LoadOptions};
use comanda_core::errors::ApplicationError;
use comanda_core::ports::{
    CatalogSource, CheckoutGateway, FlatDeliveryFee, GeocodingProvider, InMemoryAddressBook,
    InMemoryCatalog, InMemoryCheckout, InMemoryGeocoder,
};
use comanda_db::{
    connect_with_settings, demo_catalog, demo_gazetteer, demo_synonyms, migrations, DbPool,
    SqlConversationRepository,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::adapters::{HttpCatalog, HttpCheckout, HttpGeocoder};
use crate::llm_client::HttpLlmClient;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("http client setup failed: {0}")]
    HttpClient(#[source] reqwest::Error),
    #[error("llm client setup failed: {0}")]
    Llm(String),
    #[error(transparent)]
    Application(#[from] ApplicationError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(mut config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    if config.catalog.base_url.is_none() {
        for (term, canonical) in demo_synonyms() {
            config.catalog.synonyms.entry(term).or_insert(canonical);
        }
    }
    let collaborators = collaborators(&config)?;
    let orchestrator =
        DialogueOrchestrator::build(&config, collaborators, Arc::new(TracingAuditSink))?;
    let store = Arc::new(SqlConversationRepository::new(db_pool.clone()));
    let runtime = Arc::new(AgentRuntime::new(Arc::new(orchestrator), store));

    Ok(Application { config, db_pool, runtime })
}

/// Wires every collaborator port: HTTP adapters where a base URL is
/// configured, the in-memory fakes over the demo data otherwise.
pub fn collaborators(config: &AppConfig) -> Result<Collaborators, BootstrapError> {
    let catalog: Arc<dyn CatalogSource> = match &config.catalog.base_url {
        Some(base_url) => Arc::new(
            HttpCatalog::new(base_url, config.catalog.timeout_secs)
                .map_err(BootstrapError::HttpClient)?,
        ),
        None => {
            warn_fake("catalog");
            Arc::new(InMemoryCatalog::new(demo_catalog()))
        }
    };

    let geocoder: Arc<dyn GeocodingProvider> = match &config.geocoding.base_url {
        Some(base_url) => Arc::new(
            HttpGeocoder::new(
                base_url,
                config.geocoding.api_key.clone(),
                config.geocoding.timeout_secs,
                config.geocoding.max_candidates,
            )
            .map_err(BootstrapError::HttpClient)?,
        ),
        None => {
            warn_fake("geocoding");
            Arc::new(InMemoryGeocoder::new(demo_gazetteer()))
        }
    };

    let checkout: Arc<dyn CheckoutGateway> = match &config.checkout.base_url {
        Some(base_url) => Arc::new(
            HttpCheckout::new(
                base_url,
                config.checkout.api_key.clone(),
                config.checkout.timeout_secs,
            )
            .map_err(BootstrapError::HttpClient)?,
        ),
        None => {
            warn_fake("checkout");
            Arc::new(InMemoryCheckout::new())
        }
    };

    let mut collaborators = Collaborators::new(
        catalog,
        geocoder,
        Arc::new(InMemoryAddressBook::new()),
        Arc::new(FlatDeliveryFee::new(config.dialogue.delivery_fee)),
        checkout,
    );

    if config.llm.enabled {
        let client = HttpLlmClient::from_config(&config.llm)
            .map_err(|error| BootstrapError::Llm(format!("{error:#}")))?;
        collaborators = collaborators.with_llm(Arc::new(PromptClassifier::new(client)));
        info!(
            event_name = "system.bootstrap.llm_enabled",
            correlation_id = "bootstrap",
            provider = config.llm.provider.as_str(),
            model = %config.llm.model,
            "llm fallback classifier enabled"
        );
    }

    Ok(collaborators)
}

fn warn_fake(collaborator: &str) {
    warn!(
        event_name = "system.bootstrap.fake_collaborator",
        correlation_id = "bootstrap",
        collaborator,
        "no base_url configured, using in-memory demo collaborator"
    );
}

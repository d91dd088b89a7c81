mod analysis;
mod auth;
mod config;
mod logstore;
mod routes;
mod vision;

use actix_web::{App, HttpServer, web};
use analysis::AnalysisService;
use auth::jwt::JwtService;
use auth::middleware::AuthMiddleware;
use config::{AppConfig, ClassifierConfig};
use logstore::LogBackend;
use logstore::dynamodb_backend::DynamoDbLogBackend;
use logstore::postgres_backend::PostgresLogBackend;
use logstore::store::VisionLogStore;
use routes::{UploadDir, configure_routes, cors};
use std::env;
use std::sync::Arc;
use vision::classifier::{Classifier, ProcessClassifier};

fn startup_error(message: String) -> std::io::Error {
    log::error!("{}", message);
    std::io::Error::other(message)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let config = AppConfig::from_env()
        .map_err(|e| startup_error(format!("Invalid configuration: {}", e)))?;
    let classifier_config = ClassifierConfig::load(&config.classifier_config)
        .map_err(|e| startup_error(format!("Invalid classifier configuration: {}", e)))?;

    tokio::fs::create_dir_all(&config.upload_dir).await?;

    let classifier: Arc<dyn Classifier> =
        Arc::new(ProcessClassifier::from_config(&classifier_config));

    let primary: Option<Arc<dyn LogBackend>> = if config.use_primary_log_backend {
        log::info!(
            "Primary log backend: DynamoDB table '{}'",
            config.vision_log_table
        );
        Some(Arc::new(DynamoDbLogBackend::new(
            config.vision_log_table.clone(),
        )))
    } else {
        log::info!("Primary log backend disabled");
        None
    };

    let secondary: Option<Arc<dyn LogBackend>> = match config.database_url.as_deref() {
        Some(url) => match PostgresLogBackend::connect_lazy(url) {
            Ok(backend) => {
                log::info!("Secondary log backend: Postgres");
                Some(Arc::new(backend))
            }
            Err(e) => {
                log::error!("Secondary log backend unavailable: {}", e);
                None
            }
        },
        None => {
            log::warn!("DATABASE_URL not set, secondary log backend disabled");
            None
        }
    };

    if primary.is_none() && secondary.is_none() {
        log::warn!("No vision log backend configured; analysis results will not be recorded");
    }

    let log_store = Arc::new(VisionLogStore::new(
        primary,
        secondary,
        config.backend_write_timeout,
    ));
    let analysis_service = web::Data::new(AnalysisService::new(
        classifier,
        log_store.clone(),
        config.log_write_window,
    ));
    let log_store = web::Data::from(log_store);

    let jwt_service = config.jwt_secret.as_deref().map(JwtService::new);
    if config.require_auth {
        log::info!("Authentication required for analysis requests");
    } else if jwt_service.is_some() {
        log::info!("Authentication optional; bearer tokens are used when present");
    } else {
        log::warn!("JWT_SECRET not set; all scans are recorded anonymously");
    }
    let auth_middleware = AuthMiddleware::new(jwt_service, config.require_auth);

    let upload_dir = config.upload_dir.clone();
    let bind_address = format!("0.0.0.0:{}", config.port);
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(auth_middleware.clone())
            .wrap(cors())
            .app_data(analysis_service.clone())
            .app_data(log_store.clone())
            .app_data(web::Data::new(UploadDir(upload_dir.clone())))
            .configure(|cfg| configure_routes(cfg, upload_dir.clone()))
    })
    .bind(&bind_address)?
    .run()
    .await
}

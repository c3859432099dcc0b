mod config;
mod models;
mod pipeline;
mod routes;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use config::ServiceConfig;
use routes::{UploadLimits, configure_routes};
use std::time::Duration;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = std::env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    }

    let config = ServiceConfig::load().map_err(|e| {
        log::error!("Failed to load service config: {}", e);
        std::io::Error::other(format!("Config loading failed: {}", e))
    })?;

    let pipeline = models::load_pipeline(&config).map_err(|e| {
        log::error!("Failed to load models at startup: {}", e);
        std::io::Error::other(format!("Model loading failed: {}", e))
    })?;
    let pipeline = web::Data::new(pipeline);

    let limits = UploadLimits {
        max_upload_bytes: config.server.max_upload_bytes,
        inference_timeout: Duration::from_millis(config.server.inference_timeout_ms),
    };

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(pipeline.clone())
            .configure(|cfg| configure_routes(cfg, limits))
    })
    .bind(&bind_address)?
    .run()
    .await
}

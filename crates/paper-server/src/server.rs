//! HTTP server assembly.

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};

use crate::handlers;
use crate::state::AppState;
use crate::ws;

pub fn configure_routes(config: &mut web::ServiceConfig) {
    config.service(
        web::scope("/api/chat")
            .route("/ws/{work_id}", web::get().to(ws::websocket_entry))
            .route(
                "/work/{work_id}/history",
                web::get().to(handlers::history::frontend),
            )
            .route(
                "/work/{work_id}/history/raw",
                web::get().to(handlers::history::raw),
            )
            .route(
                "/work/{work_id}/history/stats",
                web::get().to(handlers::history::statistics),
            )
            .route(
                "/work/{work_id}/task-status",
                web::get().to(handlers::tasks::status),
            )
            .route(
                "/work/{work_id}/generate-title",
                web::post().to(handlers::title::generate),
            ),
    );
}

pub async fn run(state: AppState, host: &str, port: u16) -> std::io::Result<()> {
    log::info!("服务启动: {host}:{port}");

    HttpServer::new(move || {
        let cors = Cors::permissive();
        App::new()
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(configure_routes)
    })
    .bind((host, port))?
    .run()
    .await
}

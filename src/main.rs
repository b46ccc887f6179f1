mod telemetry;
use actix_web::middleware::from_fn;
use actix_web::{get, web, App, HttpResponse, HttpServer, Responder};
use serde::Deserialize;
use std::{env, io};
use telemetry::{propagate_trace_id, redact_string, CorrelatedRootSpan, TelemetryContext};
use tracing::info;
use tracing_actix_web::TracingLogger;

#[derive(Deserialize)]
struct HelloQuery {
    user: Option<String>,
}

#[get("/")]
#[tracing::instrument(skip(query, telemetry), fields(user))]
async fn hello(
    query: web::Query<HelloQuery>,
    telemetry: web::Data<TelemetryContext>,
) -> impl Responder {
    let user = query.user.as_deref().unwrap_or("anonymous");
    let masked = redact_string(user);
    tracing::Span::current().record("user", masked.as_str());
    info!(user = %masked, backend = %telemetry.backend(), "Hello endpoint called");
    HttpResponse::Ok().body(format!("Hello, {}!", user))
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().body("ok")
}

#[tokio::main]
async fn main() -> io::Result<()> {
    let port: u16 = env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("PORT: {}", e)))?;

    // Backend from TELEMETRY_BACKEND, or auto-detected from GOOGLE_CLOUD_PROJECT
    let context = telemetry::init().await.map_err(io::Error::other)?;
    let context = web::Data::new(context);

    info!(backend = %context.backend(), "Starting server on port {}", port);

    let app_context = context.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(app_context.clone())
            .wrap(from_fn(propagate_trace_id))
            .wrap(TracingLogger::<CorrelatedRootSpan>::new())
            .service(hello)
            .service(health)
    })
    .bind(("0.0.0.0", port));

    let result = match server {
        Ok(server) => server.run().await,
        Err(e) => Err(e),
    };

    info!("Server stopped, flushing telemetry");
    context.shutdown().await;
    result
}

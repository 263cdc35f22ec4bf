use std::net::SocketAddr;

use axum::{
    http::{header, HeaderValue, Method},
    routing, Router,
};
use clinic::{app::AppState, config::Config};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "clinic=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;
    let cors = cors_layer(&config);

    let app_state = AppState::new(config).await.unwrap();

    let user = Router::new()
        .route(
            "/patient/register",
            routing::post(clinic::api::v1::auth::register),
        )
        .route("/login", routing::post(clinic::api::v1::auth::login))
        .route(
            "/patient/logout",
            routing::get(clinic::api::v1::auth::logout_patient),
        )
        .route(
            "/admin/logout",
            routing::get(clinic::api::v1::auth::logout_admin),
        )
        .route(
            "/patient/me",
            routing::get(clinic::api::v1::user::patient_profile),
        )
        .route(
            "/admin/me",
            routing::get(clinic::api::v1::user::admin_profile),
        )
        .route(
            "/doctors",
            routing::get(clinic::api::v1::user::get_all_doctors),
        )
        .route(
            "/admin/addnew",
            routing::post(clinic::api::v1::user::add_new_admin),
        )
        .route(
            "/doctor/addnew",
            routing::post(clinic::api::v1::user::add_new_doctor),
        )
        .route("/:id", routing::put(clinic::api::v1::user::update_account));

    let appointment = Router::new()
        .route(
            "/post",
            routing::post(clinic::api::v1::appointment::post_appointment),
        )
        .route(
            "/getall",
            routing::get(clinic::api::v1::appointment::get_all_appointments),
        )
        .route(
            "/update/:id",
            routing::put(clinic::api::v1::appointment::update_appointment_status),
        )
        .route(
            "/delete/:id",
            routing::delete(clinic::api::v1::appointment::delete_appointment),
        );

    let message = Router::new()
        .route(
            "/send",
            routing::post(clinic::api::v1::message::send_message),
        )
        .route(
            "/getall",
            routing::get(clinic::api::v1::message::get_all_messages),
        );

    let api = Router::new().nest(
        "/v1",
        Router::new()
            .nest("/user", user)
            .nest("/appointment", appointment)
            .nest("/message", message),
    );

    let app = Router::new()
        .nest("/api", api)
        .with_state(app_state)
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::debug!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .unwrap();
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        config.frontend_url.as_deref(),
        config.dashboard_url.as_deref(),
    ]
    .into_iter()
    .flatten()
    .filter_map(|it| it.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true)
}

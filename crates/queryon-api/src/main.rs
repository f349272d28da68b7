// Queryon API server

mod appointments;
mod calendars;
mod chat;
mod config_api;
mod error;
mod integrations;
mod orders;
mod rules_api;
mod services;
mod webhooks;

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

use queryon_storage::{Database, PgConversationStore};

use crate::services::OrchestratorService;
use crate::webhooks::ChannelConfig;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        chat::chat,
        chat::create_conversation,
        chat::list_conversations,
        chat::get_conversation_history,
        chat::close_conversation,
        appointments::list_appointments,
        appointments::get_appointment,
        appointments::update_appointment,
        appointments::update_status,
        appointments::delete_appointment,
        appointments::inbound_webhook,
        orders::list_orders,
        orders::get_order,
        orders::update_status,
        calendars::create_resource,
        calendars::list_resources,
        calendars::get_resource,
        calendars::update_resource,
        calendars::delete_resource,
        calendars::create_block,
        calendars::list_blocks,
        calendars::delete_block,
        calendars::get_slots,
        rules_api::create_rule,
        rules_api::list_rules,
        rules_api::get_rule,
        rules_api::update_rule,
        rules_api::delete_rule,
        config_api::get_config,
        config_api::put_config,
    ),
    components(
        schemas(
            chat::ChatRequest,
            chat::ChatResponse,
            chat::ConversationCreateRequest,
            chat::ConversationResponse,
            chat::ConversationListItem,
            chat::ConversationHistoryResponse,
            chat::MessageSchema,
            appointments::AppointmentResponse,
            appointments::AppointmentUpdateRequest,
            appointments::StatusUpdateRequest,
            appointments::InboundWebhookPayload,
            orders::OrderResponse,
            orders::OrderStatusUpdateRequest,
            calendars::CalendarResourceResponse,
            calendars::CreateResourceRequest,
            calendars::UpdateResourceRequest,
            calendars::CalendarBlockResponse,
            calendars::CreateBlockRequest,
            calendars::SlotsResponse,
            rules_api::RuleResponse,
            rules_api::CreateRuleRequest,
            rules_api::UpdateRuleRequest,
        )
    ),
    tags(
        (name = "chat", description = "Conversation and chat endpoints"),
        (name = "appointments", description = "Appointment lifecycle endpoints"),
        (name = "orders", description = "Order intake endpoints"),
        (name = "calendars", description = "Calendar resources, blocks, availability"),
        (name = "rules", description = "Deterministic rule management"),
        (name = "orchestrator-config", description = "Router configuration")
    ),
    info(
        title = "Queryon API",
        description = "Multi-channel conversational intake service",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

fn cors_layer() -> CorsLayer {
    match std::env::var("CORS_ORIGINS") {
        Ok(origins) if !origins.trim().is_empty() && origins.trim() != "*" => {
            let parsed: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(parsed)
                .allow_methods(Any)
                .allow_headers(Any)
        }
        _ => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let default_filter = std::env::var("LOG_LEVEL")
        .map(|level| format!("queryon_api={level},queryon_core={level},tower_http=info"))
        .unwrap_or_else(|_| "queryon_api=debug,queryon_core=debug,tower_http=debug".to_string());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("queryon-api starting...");

    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL environment variable required")?;
    let db = Database::from_url(&database_url)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.context("Failed to run migrations")?;
    tracing::info!("Connected to database");

    let orchestrator = OrchestratorService::build(db.clone())
        .await
        .context("Failed to build orchestrator")?;

    let channels = ChannelConfig::from_env();
    if channels.telegram_bot_token.is_some() {
        tracing::info!("Telegram channel configured");
    }
    if channels.whatsapp_access_token.is_some() {
        tracing::info!("WhatsApp channel configured");
    }

    let db = Arc::new(db);
    let chat_state = chat::AppState {
        db: db.clone(),
        orchestrator: orchestrator.clone(),
    };
    let webhooks_state = webhooks::AppState {
        store: Arc::new(PgConversationStore::new((*db).clone())),
        orchestrator: orchestrator.clone(),
        channels,
    };
    let appointments_state = appointments::AppState { db: db.clone() };
    let orders_state = orders::AppState { db: db.clone() };
    let calendars_state = calendars::AppState { db: db.clone() };
    let rules_state = rules_api::AppState {
        db: db.clone(),
        orchestrator: orchestrator.clone(),
    };
    let config_state = config_api::AppState {
        db: db.clone(),
        orchestrator: orchestrator.clone(),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/api-doc/openapi.json", get(openapi_json))
        .merge(chat::routes(chat_state))
        .merge(webhooks::routes(webhooks_state))
        .merge(appointments::routes(appointments_state))
        .merge(orders::routes(orders_state))
        .merge(calendars::routes(calendars_state))
        .merge(rules_api::routes(rules_state))
        .merge(config_api::routes(config_state))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http());

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:9000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

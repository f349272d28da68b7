// Database models (internal, may differ from public DTOs)

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================
// Conversation models
// ============================================

/// Conversation row from database
#[derive(Debug, Clone, FromRow)]
pub struct ConversationRow {
    pub id: Uuid,
    pub platform: String,
    pub channel_id: Option<String>,
    pub contact_name: Option<String>,
    pub contact_surname: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub contact_username: Option<String>,
    pub status: String,
    pub message_count: i32,
    pub last_message_at: Option<DateTime<Utc>>,
    pub flow_state: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a conversation
#[derive(Debug, Clone, Default)]
pub struct CreateConversation {
    pub platform: String,
    pub channel_id: Option<String>,
    pub contact_name: Option<String>,
    pub contact_surname: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub contact_username: Option<String>,
}

// ============================================
// Message models
// ============================================

/// Message row from database.
/// IDs are UUIDv7 and assigned app-side: together with created_at they give a
/// stable insertion-order tie-break for rows created in the same batch.
#[derive(Debug, Clone, FromRow)]
pub struct MessageRow {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: String,
    pub content: String,
    pub intent: Option<String>,
    pub confidence: Option<f64>,
    pub classifier_layer: Option<String>,
    pub rule_matched: Option<String>,
    pub fallback_used: bool,
    pub needs_clarification: bool,
    pub total_ms: Option<f64>,
    pub llm_calls_count: i32,
    pub sources: Option<serde_json::Value>,
    pub extra_metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating an assistant message with routing metadata
#[derive(Debug, Clone, Default)]
pub struct CreateAssistantMessage {
    pub content: String,
    pub intent: Option<String>,
    pub confidence: Option<f64>,
    pub classifier_layer: Option<String>,
    pub rule_matched: Option<String>,
    pub fallback_used: bool,
    pub needs_clarification: bool,
    pub total_ms: Option<f64>,
    pub llm_calls_count: i32,
    pub sources: Option<serde_json::Value>,
    pub extra_metadata: Option<serde_json::Value>,
}

/// Message event row
#[derive(Debug, Clone, FromRow)]
pub struct MessageEventRow {
    pub id: Uuid,
    pub message_id: Uuid,
    pub event_type: String,
    pub data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

// ============================================
// Rule models
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct RuleRow {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub trigger_patterns: Vec<String>,
    pub response_template: String,
    pub variables: serde_json::Value,
    pub priority: i32,
    pub is_active: bool,
    pub flow_id: Option<String>,
    pub step_key: Option<String>,
    pub required_step: Option<String>,
    pub next_steps: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateRule {
    pub name: String,
    pub description: String,
    pub trigger_patterns: Vec<String>,
    pub response_template: String,
    pub variables: serde_json::Value,
    pub priority: i32,
    pub is_active: bool,
    pub flow_id: Option<String>,
    pub step_key: Option<String>,
    pub required_step: Option<String>,
    pub next_steps: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateRule {
    pub name: Option<String>,
    pub description: Option<String>,
    pub trigger_patterns: Option<Vec<String>>,
    pub response_template: Option<String>,
    pub variables: Option<serde_json::Value>,
    pub priority: Option<i32>,
    pub is_active: Option<bool>,
    pub flow_id: Option<Option<String>>,
    pub step_key: Option<Option<String>>,
    pub required_step: Option<Option<String>>,
    pub next_steps: Option<Option<serde_json::Value>>,
}

// ============================================
// Appointment / order models
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct AppointmentRow {
    pub id: Uuid,
    pub conversation_id: Option<Uuid>,
    pub appt_number: Option<String>,
    pub status: String,
    pub contact_name: Option<String>,
    pub contact_surname: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub service: Option<String>,
    pub location: Option<String>,
    pub artist: Option<String>,
    pub event_date: Option<String>,
    pub event_time: Option<String>,
    pub notes: Option<String>,
    pub summary: Option<String>,
    pub extra_fields: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateAppointment {
    pub conversation_id: Option<Uuid>,
    pub contact_name: Option<String>,
    pub contact_surname: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub service: Option<String>,
    pub location: Option<String>,
    pub artist: Option<String>,
    pub event_date: Option<String>,
    pub event_time: Option<String>,
    pub notes: Option<String>,
    pub summary: Option<String>,
    pub extra_fields: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateAppointment {
    pub status: Option<String>,
    pub contact_name: Option<String>,
    pub contact_surname: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub service: Option<String>,
    pub location: Option<String>,
    pub artist: Option<String>,
    pub event_date: Option<String>,
    pub event_time: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct OrderRow {
    pub id: Uuid,
    pub conversation_id: Option<Uuid>,
    pub status: String,
    pub contact_name: Option<String>,
    pub contact_surname: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub product: Option<String>,
    pub quantity: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub summary: Option<String>,
    pub extra_fields: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateOrder {
    pub conversation_id: Option<Uuid>,
    pub contact_name: Option<String>,
    pub contact_surname: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub product: Option<String>,
    pub quantity: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub summary: Option<String>,
    pub extra_fields: serde_json::Value,
}

// ============================================
// Calendar models
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct CalendarResourceRow {
    pub id: Uuid,
    pub name: String,
    pub resource_type: String,
    pub resource_name: String,
    pub calendar_type: String,
    pub calendar_id: Option<String>,
    pub credentials: Option<String>,
    pub timezone: Option<String>,
    pub working_hours: serde_json::Value,
    pub service_durations: serde_json::Value,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateCalendarResource {
    pub name: String,
    pub resource_type: String,
    pub resource_name: String,
    pub calendar_type: String,
    pub calendar_id: Option<String>,
    pub credentials: Option<String>,
    pub timezone: Option<String>,
    pub working_hours: serde_json::Value,
    pub service_durations: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateCalendarResource {
    pub name: Option<String>,
    pub resource_type: Option<String>,
    pub resource_name: Option<String>,
    pub calendar_type: Option<String>,
    pub calendar_id: Option<String>,
    pub credentials: Option<String>,
    pub timezone: Option<String>,
    pub working_hours: Option<serde_json::Value>,
    pub service_durations: Option<serde_json::Value>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, FromRow)]
pub struct CalendarBlockRow {
    pub id: Uuid,
    pub calendar_resource_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub block_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateCalendarBlock {
    pub calendar_resource_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub block_type: String,
}

// ============================================
// Tool config models
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct ToolConfigRow {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub trigger_phrases: Vec<String>,
    pub credentials: Option<String>,
    pub enabled: bool,
    pub is_builtin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

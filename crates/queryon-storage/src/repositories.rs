// Repository layer for database operations

use anyhow::Result;
use chrono::{Datelike, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::*;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create database connection from URL
    pub async fn from_url(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // ============================================
    // Conversations
    // ============================================

    pub async fn create_conversation(&self, input: CreateConversation) -> Result<ConversationRow> {
        let row = sqlx::query_as::<_, ConversationRow>(
            r#"
            INSERT INTO conversations (platform, channel_id, contact_name, contact_surname, contact_phone, contact_email, contact_username)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, platform, channel_id, contact_name, contact_surname, contact_phone, contact_email, contact_username, status, message_count, last_message_at, flow_state, created_at, updated_at
            "#,
        )
        .bind(&input.platform)
        .bind(&input.channel_id)
        .bind(&input.contact_name)
        .bind(&input.contact_surname)
        .bind(&input.contact_phone)
        .bind(&input.contact_email)
        .bind(&input.contact_username)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_conversation(&self, id: Uuid) -> Result<Option<ConversationRow>> {
        let row = sqlx::query_as::<_, ConversationRow>(
            r#"
            SELECT id, platform, channel_id, contact_name, contact_surname, contact_phone, contact_email, contact_username, status, message_count, last_message_at, flow_state, created_at, updated_at
            FROM conversations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn close_conversation(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET status = 'closed', updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_active_conversation_by_channel(
        &self,
        platform: &str,
        channel_id: &str,
    ) -> Result<Option<ConversationRow>> {
        let row = sqlx::query_as::<_, ConversationRow>(
            r#"
            SELECT id, platform, channel_id, contact_name, contact_surname, contact_phone, contact_email, contact_username, status, message_count, last_message_at, flow_state, created_at, updated_at
            FROM conversations
            WHERE platform = $1 AND channel_id = $2 AND status = 'active'
            ORDER BY last_message_at DESC NULLS LAST
            LIMIT 1
            "#,
        )
        .bind(platform)
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// List conversations ordered by most-recently active
    pub async fn list_conversations(
        &self,
        status: Option<&str>,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<ConversationRow>> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, ConversationRow>(
                    r#"
                    SELECT id, platform, channel_id, contact_name, contact_surname, contact_phone, contact_email, contact_username, status, message_count, last_message_at, flow_state, created_at, updated_at
                    FROM conversations
                    WHERE status = $1
                    ORDER BY last_message_at DESC NULLS LAST
                    OFFSET $2 LIMIT $3
                    "#,
                )
                .bind(status)
                .bind(skip)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, ConversationRow>(
                    r#"
                    SELECT id, platform, channel_id, contact_name, contact_surname, contact_phone, contact_email, contact_username, status, message_count, last_message_at, flow_state, created_at, updated_at
                    FROM conversations
                    ORDER BY last_message_at DESC NULLS LAST
                    OFFSET $1 LIMIT $2
                    "#,
                )
                .bind(skip)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows)
    }

    pub async fn get_flow_state(&self, id: Uuid) -> Result<Option<serde_json::Value>> {
        let row: Option<(Option<serde_json::Value>,)> =
            sqlx::query_as("SELECT flow_state FROM conversations WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.and_then(|(state,)| state))
    }

    pub async fn update_flow_state(
        &self,
        id: Uuid,
        flow_state: Option<serde_json::Value>,
    ) -> Result<()> {
        sqlx::query("UPDATE conversations SET flow_state = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(flow_state)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ============================================
    // Messages
    // ============================================

    /// Record a user message; the message_count and last_message_at bumps
    /// happen in the same transaction as the insert so per-conversation
    /// ordering is serialised by the storage layer.
    pub async fn add_user_message(&self, conversation_id: Uuid, content: &str) -> Result<Uuid> {
        let mut tx = self.pool.begin().await?;

        let id = Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, role, content)
            VALUES ($1, $2, 'user', $3)
            "#,
        )
        .bind(id)
        .bind(conversation_id)
        .bind(content)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE conversations
            SET message_count = message_count + 1, last_message_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    /// Record an assistant message plus its structured events in one
    /// transaction
    pub async fn add_assistant_message(
        &self,
        conversation_id: Uuid,
        input: CreateAssistantMessage,
        events: Vec<(String, Option<serde_json::Value>)>,
    ) -> Result<Uuid> {
        let mut tx = self.pool.begin().await?;

        let id = Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, role, content, intent, confidence, classifier_layer, rule_matched, fallback_used, needs_clarification, total_ms, llm_calls_count, sources, extra_metadata)
            VALUES ($1, $2, 'assistant', $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(id)
        .bind(conversation_id)
        .bind(&input.content)
        .bind(&input.intent)
        .bind(input.confidence)
        .bind(&input.classifier_layer)
        .bind(&input.rule_matched)
        .bind(input.fallback_used)
        .bind(input.needs_clarification)
        .bind(input.total_ms)
        .bind(input.llm_calls_count)
        .bind(&input.sources)
        .bind(&input.extra_metadata)
        .execute(&mut *tx)
        .await?;

        for (event_type, data) in &events {
            sqlx::query(
                r#"
                INSERT INTO message_events (message_id, event_type, data)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(id)
            .bind(event_type)
            .bind(data)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            UPDATE conversations
            SET message_count = message_count + 1, last_message_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    /// Recent messages, oldest first. The id tie-break keeps same-batch rows
    /// in insertion order (ids are UUIDv7).
    pub async fn list_recent_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
    ) -> Result<Vec<MessageRow>> {
        let mut rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, conversation_id, role, content, intent, confidence, classifier_layer, rule_matched, fallback_used, needs_clarification, total_ms, llm_calls_count, sources, extra_metadata, created_at
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.reverse();
        Ok(rows)
    }

    pub async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<MessageRow>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, conversation_id, role, content, intent, confidence, classifier_layer, rule_matched, fallback_used, needs_clarification, total_ms, llm_calls_count, sources, extra_metadata, created_at
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn get_last_assistant_intent(&self, conversation_id: Uuid) -> Result<Option<String>> {
        let row: Option<(Option<String>,)> = sqlx::query_as(
            r#"
            SELECT intent
            FROM messages
            WHERE conversation_id = $1 AND role = 'assistant' AND intent IS NOT NULL
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|(intent,)| intent))
    }

    pub async fn list_message_events(&self, message_id: Uuid) -> Result<Vec<MessageEventRow>> {
        let rows = sqlx::query_as::<_, MessageEventRow>(
            r#"
            SELECT id, message_id, event_type, data, created_at
            FROM message_events
            WHERE message_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    // ============================================
    // Rules
    // ============================================

    pub async fn create_rule(&self, input: CreateRule) -> Result<RuleRow> {
        let row = sqlx::query_as::<_, RuleRow>(
            r#"
            INSERT INTO rules (name, description, trigger_patterns, response_template, variables, priority, is_active, flow_id, step_key, required_step, next_steps)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id, name, description, trigger_patterns, response_template, variables, priority, is_active, flow_id, step_key, required_step, next_steps, created_at, updated_at
            "#,
        )
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.trigger_patterns)
        .bind(&input.response_template)
        .bind(&input.variables)
        .bind(input.priority)
        .bind(input.is_active)
        .bind(&input.flow_id)
        .bind(&input.step_key)
        .bind(&input.required_step)
        .bind(&input.next_steps)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_rule(&self, id: Uuid) -> Result<Option<RuleRow>> {
        let row = sqlx::query_as::<_, RuleRow>(
            r#"
            SELECT id, name, description, trigger_patterns, response_template, variables, priority, is_active, flow_id, step_key, required_step, next_steps, created_at, updated_at
            FROM rules
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_rules(&self) -> Result<Vec<RuleRow>> {
        let rows = sqlx::query_as::<_, RuleRow>(
            r#"
            SELECT id, name, description, trigger_patterns, response_template, variables, priority, is_active, flow_id, step_key, required_step, next_steps, created_at, updated_at
            FROM rules
            ORDER BY priority DESC, created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn list_active_rules(&self) -> Result<Vec<RuleRow>> {
        let rows = sqlx::query_as::<_, RuleRow>(
            r#"
            SELECT id, name, description, trigger_patterns, response_template, variables, priority, is_active, flow_id, step_key, required_step, next_steps, created_at, updated_at
            FROM rules
            WHERE is_active = TRUE
            ORDER BY priority DESC, created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn update_rule(&self, id: Uuid, input: UpdateRule) -> Result<Option<RuleRow>> {
        // Two-level options distinguish "leave unchanged" from "set NULL" for
        // the nullable flow fields.
        let row = sqlx::query_as::<_, RuleRow>(
            r#"
            UPDATE rules
            SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                trigger_patterns = COALESCE($4, trigger_patterns),
                response_template = COALESCE($5, response_template),
                variables = COALESCE($6, variables),
                priority = COALESCE($7, priority),
                is_active = COALESCE($8, is_active),
                flow_id = CASE WHEN $9 THEN $10 ELSE flow_id END,
                step_key = CASE WHEN $11 THEN $12 ELSE step_key END,
                required_step = CASE WHEN $13 THEN $14 ELSE required_step END,
                next_steps = CASE WHEN $15 THEN $16 ELSE next_steps END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, description, trigger_patterns, response_template, variables, priority, is_active, flow_id, step_key, required_step, next_steps, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.trigger_patterns)
        .bind(&input.response_template)
        .bind(&input.variables)
        .bind(input.priority)
        .bind(input.is_active)
        .bind(input.flow_id.is_some())
        .bind(input.flow_id.clone().flatten())
        .bind(input.step_key.is_some())
        .bind(input.step_key.clone().flatten())
        .bind(input.required_step.is_some())
        .bind(input.required_step.clone().flatten())
        .bind(input.next_steps.is_some())
        .bind(input.next_steps.clone().flatten())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn delete_rule(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM rules WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ============================================
    // Orchestrator config (single row, id = 1)
    // ============================================

    pub async fn get_orchestrator_config(&self) -> Result<Option<serde_json::Value>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT data FROM orchestrator_config WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(data,)| data))
    }

    pub async fn put_orchestrator_config(&self, data: &serde_json::Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orchestrator_config (id, data, updated_at)
            VALUES (1, $1, NOW())
            ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data, updated_at = NOW()
            "#,
        )
        .bind(data)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ============================================
    // Appointments
    // ============================================

    /// Create an appointment, generating the next per-year reference number
    /// inside the insert transaction. The max() is read FOR UPDATE so two
    /// concurrent intakes cannot mint the same number; the unique index is
    /// the safety net.
    pub async fn create_appointment(&self, input: CreateAppointment) -> Result<AppointmentRow> {
        let mut tx = self.pool.begin().await?;

        let year = Utc::now().year();
        let pattern = format!("RND-{year}-%");
        // Lock the current year-max row so concurrent intakes serialise on
        // it; the unique index on appt_number is the safety net.
        let max_val: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT appt_number FROM appointments
            WHERE appt_number LIKE $1
            ORDER BY appt_number DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(&pattern)
        .fetch_optional(&mut *tx)
        .await?;

        let seq = max_val
            .and_then(|(v,)| v.rsplit('-').next().and_then(|s| s.parse::<u32>().ok()))
            .map(|n| n + 1)
            .unwrap_or(1);
        let appt_number = format!("RND-{year}-{seq:04}");

        let row = sqlx::query_as::<_, AppointmentRow>(
            r#"
            INSERT INTO appointments (conversation_id, appt_number, status, contact_name, contact_surname, contact_phone, contact_email, service, location, artist, event_date, event_time, notes, summary, extra_fields)
            VALUES ($1, $2, 'pending', $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING id, conversation_id, appt_number, status, contact_name, contact_surname, contact_phone, contact_email, service, location, artist, event_date, event_time, notes, summary, extra_fields, created_at, updated_at
            "#,
        )
        .bind(input.conversation_id)
        .bind(&appt_number)
        .bind(&input.contact_name)
        .bind(&input.contact_surname)
        .bind(&input.contact_phone)
        .bind(&input.contact_email)
        .bind(&input.service)
        .bind(&input.location)
        .bind(&input.artist)
        .bind(&input.event_date)
        .bind(&input.event_time)
        .bind(&input.notes)
        .bind(&input.summary)
        .bind(&input.extra_fields)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row)
    }

    pub async fn get_appointment(&self, id: Uuid) -> Result<Option<AppointmentRow>> {
        let row = sqlx::query_as::<_, AppointmentRow>(
            r#"
            SELECT id, conversation_id, appt_number, status, contact_name, contact_surname, contact_phone, contact_email, service, location, artist, event_date, event_time, notes, summary, extra_fields, created_at, updated_at
            FROM appointments
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_appointment_by_number(
        &self,
        appt_number: &str,
    ) -> Result<Option<AppointmentRow>> {
        let row = sqlx::query_as::<_, AppointmentRow>(
            r#"
            SELECT id, conversation_id, appt_number, status, contact_name, contact_surname, contact_phone, contact_email, service, location, artist, event_date, event_time, notes, summary, extra_fields, created_at, updated_at
            FROM appointments
            WHERE appt_number = $1
            "#,
        )
        .bind(appt_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_appointments(
        &self,
        status: Option<&str>,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<AppointmentRow>> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, AppointmentRow>(
                    r#"
                    SELECT id, conversation_id, appt_number, status, contact_name, contact_surname, contact_phone, contact_email, service, location, artist, event_date, event_time, notes, summary, extra_fields, created_at, updated_at
                    FROM appointments
                    WHERE status = $1
                    ORDER BY created_at DESC
                    OFFSET $2 LIMIT $3
                    "#,
                )
                .bind(status)
                .bind(skip)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, AppointmentRow>(
                    r#"
                    SELECT id, conversation_id, appt_number, status, contact_name, contact_surname, contact_phone, contact_email, service, location, artist, event_date, event_time, notes, summary, extra_fields, created_at, updated_at
                    FROM appointments
                    ORDER BY created_at DESC
                    OFFSET $1 LIMIT $2
                    "#,
                )
                .bind(skip)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows)
    }

    pub async fn update_appointment(
        &self,
        id: Uuid,
        input: UpdateAppointment,
    ) -> Result<Option<AppointmentRow>> {
        let row = sqlx::query_as::<_, AppointmentRow>(
            r#"
            UPDATE appointments
            SET
                status = COALESCE($2, status),
                contact_name = COALESCE($3, contact_name),
                contact_surname = COALESCE($4, contact_surname),
                contact_phone = COALESCE($5, contact_phone),
                contact_email = COALESCE($6, contact_email),
                service = COALESCE($7, service),
                location = COALESCE($8, location),
                artist = COALESCE($9, artist),
                event_date = COALESCE($10, event_date),
                event_time = COALESCE($11, event_time),
                notes = COALESCE($12, notes),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, conversation_id, appt_number, status, contact_name, contact_surname, contact_phone, contact_email, service, location, artist, event_date, event_time, notes, summary, extra_fields, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(&input.status)
        .bind(&input.contact_name)
        .bind(&input.contact_surname)
        .bind(&input.contact_phone)
        .bind(&input.contact_email)
        .bind(&input.service)
        .bind(&input.location)
        .bind(&input.artist)
        .bind(&input.event_date)
        .bind(&input.event_time)
        .bind(&input.notes)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn update_appointment_status(
        &self,
        id: Uuid,
        status: &str,
    ) -> Result<Option<AppointmentRow>> {
        let row = sqlx::query_as::<_, AppointmentRow>(
            r#"
            UPDATE appointments
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, conversation_id, appt_number, status, contact_name, contact_surname, contact_phone, contact_email, service, location, artist, event_date, event_time, notes, summary, extra_fields, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn delete_appointment(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM appointments WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ============================================
    // Orders
    // ============================================

    pub async fn create_order(&self, input: CreateOrder) -> Result<OrderRow> {
        let row = sqlx::query_as::<_, OrderRow>(
            r#"
            INSERT INTO orders (conversation_id, status, contact_name, contact_surname, contact_phone, contact_email, product, quantity, address, notes, summary, extra_fields)
            VALUES ($1, 'pending', $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id, conversation_id, status, contact_name, contact_surname, contact_phone, contact_email, product, quantity, address, notes, summary, extra_fields, created_at, updated_at
            "#,
        )
        .bind(input.conversation_id)
        .bind(&input.contact_name)
        .bind(&input.contact_surname)
        .bind(&input.contact_phone)
        .bind(&input.contact_email)
        .bind(&input.product)
        .bind(&input.quantity)
        .bind(&input.address)
        .bind(&input.notes)
        .bind(&input.summary)
        .bind(&input.extra_fields)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_order(&self, id: Uuid) -> Result<Option<OrderRow>> {
        let row = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT id, conversation_id, status, contact_name, contact_surname, contact_phone, contact_email, product, quantity, address, notes, summary, extra_fields, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_orders(
        &self,
        status: Option<&str>,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<OrderRow>> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, OrderRow>(
                    r#"
                    SELECT id, conversation_id, status, contact_name, contact_surname, contact_phone, contact_email, product, quantity, address, notes, summary, extra_fields, created_at, updated_at
                    FROM orders
                    WHERE status = $1
                    ORDER BY created_at DESC
                    OFFSET $2 LIMIT $3
                    "#,
                )
                .bind(status)
                .bind(skip)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, OrderRow>(
                    r#"
                    SELECT id, conversation_id, status, contact_name, contact_surname, contact_phone, contact_email, product, quantity, address, notes, summary, extra_fields, created_at, updated_at
                    FROM orders
                    ORDER BY created_at DESC
                    OFFSET $1 LIMIT $2
                    "#,
                )
                .bind(skip)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows)
    }

    pub async fn update_order_status(&self, id: Uuid, status: &str) -> Result<Option<OrderRow>> {
        let row = sqlx::query_as::<_, OrderRow>(
            r#"
            UPDATE orders
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, conversation_id, status, contact_name, contact_surname, contact_phone, contact_email, product, quantity, address, notes, summary, extra_fields, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    // ============================================
    // Calendar resources
    // ============================================

    pub async fn create_calendar_resource(
        &self,
        input: CreateCalendarResource,
    ) -> Result<CalendarResourceRow> {
        let row = sqlx::query_as::<_, CalendarResourceRow>(
            r#"
            INSERT INTO calendar_resources (name, resource_type, resource_name, calendar_type, calendar_id, credentials, timezone, working_hours, service_durations)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, name, resource_type, resource_name, calendar_type, calendar_id, credentials, timezone, working_hours, service_durations, is_active, created_at, updated_at
            "#,
        )
        .bind(&input.name)
        .bind(&input.resource_type)
        .bind(&input.resource_name)
        .bind(&input.calendar_type)
        .bind(&input.calendar_id)
        .bind(&input.credentials)
        .bind(&input.timezone)
        .bind(&input.working_hours)
        .bind(&input.service_durations)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_calendar_resource(&self, id: Uuid) -> Result<Option<CalendarResourceRow>> {
        let row = sqlx::query_as::<_, CalendarResourceRow>(
            r#"
            SELECT id, name, resource_type, resource_name, calendar_type, calendar_id, credentials, timezone, working_hours, service_durations, is_active, created_at, updated_at
            FROM calendar_resources
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_calendar_resources(&self) -> Result<Vec<CalendarResourceRow>> {
        let rows = sqlx::query_as::<_, CalendarResourceRow>(
            r#"
            SELECT id, name, resource_type, resource_name, calendar_type, calendar_id, credentials, timezone, working_hours, service_durations, is_active, created_at, updated_at
            FROM calendar_resources
            WHERE is_active = TRUE
            ORDER BY name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Active calendars for a free-text resource name (case-insensitive)
    pub async fn list_calendar_resources_by_name(
        &self,
        resource_name: &str,
    ) -> Result<Vec<CalendarResourceRow>> {
        let rows = sqlx::query_as::<_, CalendarResourceRow>(
            r#"
            SELECT id, name, resource_type, resource_name, calendar_type, calendar_id, credentials, timezone, working_hours, service_durations, is_active, created_at, updated_at
            FROM calendar_resources
            WHERE LOWER(resource_name) = LOWER($1) AND is_active = TRUE
            ORDER BY created_at ASC
            "#,
        )
        .bind(resource_name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn update_calendar_resource(
        &self,
        id: Uuid,
        input: UpdateCalendarResource,
    ) -> Result<Option<CalendarResourceRow>> {
        let row = sqlx::query_as::<_, CalendarResourceRow>(
            r#"
            UPDATE calendar_resources
            SET
                name = COALESCE($2, name),
                resource_type = COALESCE($3, resource_type),
                resource_name = COALESCE($4, resource_name),
                calendar_type = COALESCE($5, calendar_type),
                calendar_id = COALESCE($6, calendar_id),
                credentials = COALESCE($7, credentials),
                timezone = COALESCE($8, timezone),
                working_hours = COALESCE($9, working_hours),
                service_durations = COALESCE($10, service_durations),
                is_active = COALESCE($11, is_active),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, resource_type, resource_name, calendar_type, calendar_id, credentials, timezone, working_hours, service_durations, is_active, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(&input.name)
        .bind(&input.resource_type)
        .bind(&input.resource_name)
        .bind(&input.calendar_type)
        .bind(&input.calendar_id)
        .bind(&input.credentials)
        .bind(&input.timezone)
        .bind(&input.working_hours)
        .bind(&input.service_durations)
        .bind(input.is_active)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn delete_calendar_resource(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM calendar_resources WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ============================================
    // Calendar blocks
    // ============================================

    pub async fn create_calendar_block(
        &self,
        input: CreateCalendarBlock,
    ) -> Result<CalendarBlockRow> {
        let row = sqlx::query_as::<_, CalendarBlockRow>(
            r#"
            INSERT INTO calendar_blocks (calendar_resource_id, appointment_id, date, start_time, end_time, block_type)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, calendar_resource_id, appointment_id, date, start_time, end_time, block_type, created_at
            "#,
        )
        .bind(input.calendar_resource_id)
        .bind(input.appointment_id)
        .bind(input.date)
        .bind(input.start_time)
        .bind(input.end_time)
        .bind(&input.block_type)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_calendar_blocks_for_date(
        &self,
        calendar_resource_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<CalendarBlockRow>> {
        let rows = sqlx::query_as::<_, CalendarBlockRow>(
            r#"
            SELECT id, calendar_resource_id, appointment_id, date, start_time, end_time, block_type, created_at
            FROM calendar_blocks
            WHERE calendar_resource_id = $1 AND date = $2
            ORDER BY start_time ASC
            "#,
        )
        .bind(calendar_resource_id)
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn list_calendar_blocks_for_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Vec<CalendarBlockRow>> {
        let rows = sqlx::query_as::<_, CalendarBlockRow>(
            r#"
            SELECT id, calendar_resource_id, appointment_id, date, start_time, end_time, block_type, created_at
            FROM calendar_blocks
            WHERE appointment_id = $1
            ORDER BY date ASC, start_time ASC
            "#,
        )
        .bind(appointment_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn delete_calendar_blocks_for_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<u64> {
        let result = sqlx::query("DELETE FROM calendar_blocks WHERE appointment_id = $1")
            .bind(appointment_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn delete_calendar_block(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM calendar_blocks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ============================================
    // Tool configs
    // ============================================

    pub async fn list_enabled_tool_configs(&self) -> Result<Vec<ToolConfigRow>> {
        let rows = sqlx::query_as::<_, ToolConfigRow>(
            r#"
            SELECT id, name, description, parameters, trigger_phrases, credentials, enabled, is_builtin, created_at, updated_at
            FROM tool_configs
            WHERE enabled = TRUE
            ORDER BY name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

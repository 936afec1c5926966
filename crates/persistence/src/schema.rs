//! ScyllaDB schema creation

use scylla::Session;

use crate::error::PersistenceError;

/// Create the keyspace if it doesn't exist.
pub async fn create_keyspace(
    session: &Session,
    keyspace: &str,
    replication_factor: u8,
) -> Result<(), PersistenceError> {
    let query = format!(
        "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
        keyspace, replication_factor
    );

    session
        .query_unpaged(query, &[])
        .await
        .map_err(|e| PersistenceError::SchemaError(format!("Failed to create keyspace: {}", e)))?;

    Ok(())
}

/// Create all required tables.
pub async fn create_tables(session: &Session, keyspace: &str) -> Result<(), PersistenceError> {
    // One conversation row per contact
    let conversations_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.conversations (
            contact_id TEXT,
            id UUID,
            location_id TEXT,
            channel TEXT,
            status TEXT,
            is_human_active BOOLEAN,
            human_takeover_at TIMESTAMP,
            created_at TIMESTAMP,
            PRIMARY KEY (contact_id)
        )
    "#,
        keyspace
    );
    session.query_unpaged(conversations_table, &[]).await.map_err(|e| {
        PersistenceError::SchemaError(format!("Failed to create conversations table: {}", e))
    })?;

    // Turns, clustered chronologically per conversation
    let messages_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.messages (
            conversation_id UUID,
            message_id TIMEUUID,
            role TEXT,
            content TEXT,
            metadata_json TEXT,
            created_at TIMESTAMP,
            PRIMARY KEY ((conversation_id), message_id)
        ) WITH CLUSTERING ORDER BY (message_id ASC)
    "#,
        keyspace
    );
    session.query_unpaged(messages_table, &[]).await.map_err(|e| {
        PersistenceError::SchemaError(format!("Failed to create messages table: {}", e))
    })?;

    // Lead intake state, one row per contact
    let lead_states_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.lead_states (
            contact_id TEXT,
            location_id TEXT,
            campus TEXT,
            level TEXT,
            guardian_name TEXT,
            phone TEXT,
            email TEXT,
            current_step INT,
            is_complete BOOLEAN,
            booking_sent_at TIMESTAMP,
            post_booking_count INT,
            score INT,
            PRIMARY KEY (contact_id)
        )
    "#,
        keyspace
    );
    session.query_unpaged(lead_states_table, &[]).await.map_err(|e| {
        PersistenceError::SchemaError(format!("Failed to create lead_states table: {}", e))
    })?;

    // Advisor rotation records. Small table: location/crm-user lookups scan
    // with ALLOW FILTERING.
    let advisors_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.advisors (
            id UUID,
            location_id TEXT,
            name TEXT,
            booking_link TEXT,
            crm_user_id TEXT,
            assigned_count INT,
            is_active BOOLEAN,
            last_assigned_at TIMESTAMP,
            PRIMARY KEY (id)
        )
    "#,
        keyspace
    );
    session.query_unpaged(advisors_table, &[]).await.map_err(|e| {
        PersistenceError::SchemaError(format!("Failed to create advisors table: {}", e))
    })?;

    Ok(())
}

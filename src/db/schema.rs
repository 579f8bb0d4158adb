use anyhow::{Context, Result};
use sqlx::PgPool;

/// Create the saga tables if they do not exist yet
pub async fn init_schema(pool: &PgPool) -> Result<()> {
    tracing::info!("Initializing PostgreSQL schema...");

    for (name, ddl) in [
        ("custody_transfers_tb", CREATE_TRANSFERS_TABLE),
        ("idx_custody_transfers_status", CREATE_TRANSFERS_STATUS_INDEX),
        ("idx_custody_transfers_citizen", CREATE_TRANSFERS_CITIZEN_INDEX),
        ("custody_locks_tb", CREATE_LOCKS_TABLE),
        ("idempotency_keys_tb", CREATE_IDEMPOTENCY_TABLE),
        ("citizens_tb", CREATE_CITIZENS_TABLE),
        ("citizen_documents_tb", CREATE_DOCUMENTS_TABLE),
    ] {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to create {}", name))?;
    }

    tracing::info!("PostgreSQL schema initialized successfully");
    Ok(())
}

// status: 0 PENDING, 10 CONFIRMED, 20 PENDING_UNREGISTER, 30 SUCCESS, -10 FAILED
// direction: 1 OUTGOING, 2 INCOMING
const CREATE_TRANSFERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS custody_transfers_tb (
    transfer_id               VARCHAR(26) PRIMARY KEY,
    citizen_id                TEXT NOT NULL,
    citizen_name              TEXT NOT NULL,
    citizen_email             TEXT NOT NULL,
    direction                 SMALLINT NOT NULL,
    source_operator_id        TEXT NOT NULL,
    source_operator_name      TEXT NOT NULL,
    destination_operator_id   TEXT NOT NULL,
    destination_operator_name TEXT NOT NULL,
    idempotency_key           TEXT NOT NULL UNIQUE,
    destination_url           TEXT,
    confirm_url               TEXT,
    status                    SMALLINT NOT NULL,
    document_refs             TEXT[] NOT NULL DEFAULT '{}',
    document_urls             TEXT[] NOT NULL DEFAULT '{}',
    retry_count               INT NOT NULL DEFAULT 0,
    requested_at              TIMESTAMPTZ NOT NULL,
    confirmed_at              TIMESTAMPTZ,
    unregistered_at           TIMESTAMPTZ,
    completed_at              TIMESTAMPTZ,
    error_message             TEXT,
    updated_at                TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_TRANSFERS_STATUS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_custody_transfers_status
    ON custody_transfers_tb (status, updated_at)
"#;

const CREATE_TRANSFERS_CITIZEN_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_custody_transfers_citizen
    ON custody_transfers_tb (citizen_id)
"#;

const CREATE_LOCKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS custody_locks_tb (
    resource_key TEXT PRIMARY KEY,
    owner_token  TEXT NOT NULL,
    expires_at   TIMESTAMPTZ NOT NULL
)
"#;

const CREATE_IDEMPOTENCY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS idempotency_keys_tb (
    idem_key      TEXT PRIMARY KEY,
    cached_result TEXT,
    expires_at    TIMESTAMPTZ NOT NULL,
    created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_CITIZENS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS citizens_tb (
    citizen_id TEXT PRIMARY KEY,
    name       TEXT NOT NULL,
    email      TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_DOCUMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS citizen_documents_tb (
    document_id TEXT PRIMARY KEY,
    citizen_id  TEXT NOT NULL REFERENCES citizens_tb (citizen_id) ON DELETE CASCADE,
    source_url  TEXT,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

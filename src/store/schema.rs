use sqlx::PgPool;

use super::StoreError;

/// Create tables and indexes if they do not exist
pub async fn init_schema(pool: &PgPool) -> Result<(), StoreError> {
    tracing::info!("Initializing custody schema...");

    for (name, ddl) in [
        ("vaults_tb", CREATE_VAULTS_TABLE),
        ("transactions_tb", CREATE_TRANSACTIONS_TABLE),
        ("signature_requests_tb", CREATE_SIGNATURE_REQUESTS_TABLE),
    ] {
        sqlx::query(ddl).execute(pool).await.map_err(|e| {
            tracing::error!(table = name, error = %e, "Failed to create table");
            StoreError::Database(e)
        })?;
    }

    for ddl in INDEXES {
        sqlx::query(ddl).execute(pool).await?;
    }

    tracing::info!("Custody schema ready");
    Ok(())
}

/// Status and chain columns are SMALLINT ids (see the `id()` / `from_id()` pairs)
const CREATE_VAULTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS vaults_tb (
    id                  TEXT PRIMARY KEY,
    organization_id     TEXT NOT NULL,
    name                TEXT NOT NULL,
    blockchain_type     SMALLINT NOT NULL,
    address             TEXT NOT NULL,
    balance             NUMERIC NOT NULL DEFAULT 0,
    balance_updated_at  TIMESTAMPTZ,
    status              SMALLINT NOT NULL,
    version             BIGINT NOT NULL,
    created_at          TIMESTAMPTZ NOT NULL,
    updated_at          TIMESTAMPTZ NOT NULL
)
"#;

const CREATE_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transactions_tb (
    id                  TEXT PRIMARY KEY,
    vault_id            TEXT NOT NULL,
    blockchain_type     SMALLINT NOT NULL,
    from_address        TEXT NOT NULL,
    to_address          TEXT NOT NULL,
    amount              NUMERIC NOT NULL,
    fee                 NUMERIC,
    status              SMALLINT NOT NULL,
    chain_tx_hash       TEXT,
    confirmations       BIGINT NOT NULL DEFAULT 0,
    attempt_count       INTEGER NOT NULL DEFAULT 0,
    last_error          TEXT,
    status_reason       TEXT,
    signed_payload      BYTEA,
    next_attempt_at     TIMESTAMPTZ,
    submitted_at        TIMESTAMPTZ,
    version             BIGINT NOT NULL,
    created_at          TIMESTAMPTZ NOT NULL,
    updated_at          TIMESTAMPTZ NOT NULL
)
"#;

const CREATE_SIGNATURE_REQUESTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS signature_requests_tb (
    id                  TEXT PRIMARY KEY,
    vault_id            TEXT NOT NULL,
    data_to_sign        BYTEA NOT NULL,
    signature_type      SMALLINT NOT NULL,
    signature           BYTEA,
    key_id              TEXT,
    status              SMALLINT NOT NULL,
    error               TEXT,
    expires_at          TIMESTAMPTZ NOT NULL,
    version             BIGINT NOT NULL,
    created_at          TIMESTAMPTZ NOT NULL,
    updated_at          TIMESTAMPTZ NOT NULL
)
"#;

const INDEXES: [&str; 6] = [
    "CREATE INDEX IF NOT EXISTS idx_vaults_org ON vaults_tb (organization_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_tx_vault ON transactions_tb (vault_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_tx_status_scan ON transactions_tb (status, updated_at, id)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_tx_hash ON transactions_tb (chain_tx_hash) WHERE chain_tx_hash IS NOT NULL",
    "CREATE INDEX IF NOT EXISTS idx_sig_vault ON signature_requests_tb (vault_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_sig_status_scan ON signature_requests_tb (status, updated_at, id)",
];

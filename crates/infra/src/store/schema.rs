//! Postgres schema and migration runner.
//!
//! Migrations are applied in version order and recorded in `_migrations`;
//! re-running is a no-op. Domain tables (teachers, students, ...) belong to
//! their own modules and are expected to carry the soft-delete columns
//! `is_deleted`, `deleted_at`, `deleted_by`, `delete_reason`.

use sqlx::PgPool;
use tracing::info;

use super::postgres::map_sqlx_error;
use super::r#trait::StoreError;

const MIGRATION_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS _migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#;

struct Migration {
    version: i32,
    name: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "permissions",
        sql: SCHEMA_V1_PERMISSIONS,
    },
    Migration {
        version: 2,
        name: "menu",
        sql: SCHEMA_V2_MENU,
    },
    Migration {
        version: 3,
        name: "audit_logs",
        sql: SCHEMA_V3_AUDIT,
    },
];

const SCHEMA_V1_PERMISSIONS: &str = r#"
CREATE TABLE resources (
    id BIGINT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    parent_id BIGINT REFERENCES resources(id) ON DELETE SET NULL,
    level INTEGER NOT NULL DEFAULT 0,
    sort_order INTEGER,
    label TEXT NOT NULL,
    localized_label TEXT,
    icon TEXT,
    route TEXT,
    badge TEXT,
    css_class TEXT,
    is_displayed_in_menu BOOLEAN NOT NULL DEFAULT TRUE,
    menu_visibility TEXT NOT NULL DEFAULT 'visible'
        CHECK (menu_visibility IN ('visible', 'hidden', 'conditional')),
    menu_group TEXT
);

CREATE TABLE role_resource_grants (
    role TEXT NOT NULL,
    resource TEXT NOT NULL REFERENCES resources(name) ON UPDATE CASCADE ON DELETE CASCADE,
    allowed BOOLEAN NOT NULL,
    PRIMARY KEY (role, resource)
);

CREATE TABLE role_action_grants (
    role TEXT NOT NULL,
    resource TEXT NOT NULL REFERENCES resources(name) ON UPDATE CASCADE ON DELETE CASCADE,
    action TEXT NOT NULL,
    allowed BOOLEAN NOT NULL,
    PRIMARY KEY (role, resource, action)
);
"#;

const SCHEMA_V2_MENU: &str = r#"
CREATE TABLE resource_display_conditions (
    id BIGSERIAL PRIMARY KEY,
    resource_id BIGINT NOT NULL REFERENCES resources(id) ON DELETE CASCADE,
    condition_type TEXT NOT NULL,
    operator TEXT NOT NULL,
    value JSONB NOT NULL
);

CREATE INDEX idx_display_conditions_resource ON resource_display_conditions (resource_id);

CREATE TABLE user_menu_customizations (
    user_id UUID NOT NULL,
    resource_id BIGINT NOT NULL REFERENCES resources(id) ON DELETE CASCADE,
    is_hidden BOOLEAN NOT NULL DEFAULT FALSE,
    is_pinned BOOLEAN NOT NULL DEFAULT FALSE,
    custom_label TEXT,
    custom_order INTEGER,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (user_id, resource_id)
);
"#;

const SCHEMA_V3_AUDIT: &str = r#"
CREATE TABLE audit_logs (
    seq BIGSERIAL UNIQUE,
    id UUID PRIMARY KEY,
    actor_id UUID NOT NULL,
    actor_name TEXT NOT NULL,
    actor_role TEXT NOT NULL,
    action TEXT NOT NULL
        CHECK (action IN ('CREATE', 'UPDATE', 'DELETE', 'READ', 'RESTORE')),
    table_name TEXT NOT NULL,
    record_id TEXT,
    old_data JSONB,
    new_data JSONB,
    changes JSONB NOT NULL DEFAULT '[]'::jsonb,
    summary TEXT NOT NULL,
    ip_address TEXT,
    user_agent TEXT,
    is_soft_delete BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX idx_audit_logs_record ON audit_logs (table_name, record_id, created_at);
CREATE INDEX idx_audit_logs_actor ON audit_logs (actor_id, created_at);

-- Append-only: history is never rewritten.
CREATE OR REPLACE FUNCTION audit_logs_append_only() RETURNS trigger AS $$
BEGIN
    RAISE EXCEPTION 'audit_logs is append-only';
END;
$$ LANGUAGE plpgsql;

CREATE TRIGGER audit_logs_no_update
    BEFORE UPDATE OR DELETE ON audit_logs
    FOR EACH ROW EXECUTE FUNCTION audit_logs_append_only();
"#;

/// Apply all pending migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(MIGRATION_TABLE_DDL)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("migrations.bootstrap", e))?;

    let current_version: i32 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM _migrations")
        .fetch_one(pool)
        .await
        .map_err(|e| map_sqlx_error("migrations.current_version", e))?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }
        info!(version = migration.version, name = migration.name, "applying migration");

        let mut tx = pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("migrations.begin", e))?;
        sqlx::raw_sql(migration.sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(&format!("migration v{} '{}'", migration.version, migration.name), e))?;
        sqlx::query("INSERT INTO _migrations (version, name) VALUES ($1, $2)")
            .bind(migration.version)
            .bind(migration.name)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("migrations.record", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("migrations.commit", e))?;

        info!(version = migration.version, "migration applied");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_strictly_increasing() {
        let versions: Vec<i32> = MIGRATIONS.iter().map(|m| m.version).collect();
        assert!(versions.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(versions.first(), Some(&1));
    }
}

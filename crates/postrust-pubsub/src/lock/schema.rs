//! Idempotent creation of the lock table, the release-notify trigger, and
//! the deadlock-check routine.
//!
//! The constraint trigger is `DEFERRABLE INITIALLY DEFERRED`, so the
//! release notification only fires once the releasing transaction commits
//! — a rolled-back release never wakes up a waiter.

use postrust_sql::{escape_ident, quote_literal};

/// DDL that idempotently creates the lock schema: the `lock` table, the
/// `notify_lock()` trigger function, the deferred constraint trigger that
/// fires it, and the `deadlock_check()` routine used on insert conflict.
pub fn bootstrap_sql(schema: &str) -> String {
    let schema = escape_ident(schema);

    format!(
        r#"
CREATE SCHEMA IF NOT EXISTS {schema};

CREATE TABLE IF NOT EXISTS {schema}."lock" (
    channel text PRIMARY KEY,
    app text NOT NULL
);

CREATE OR REPLACE FUNCTION {schema}.notify_lock() RETURNS trigger AS $$
BEGIN
    PERFORM pg_notify(OLD.channel, '1');
    RETURN OLD;
END;
$$ LANGUAGE plpgsql;

DROP TRIGGER IF EXISTS notify_release_lock_trigger ON {schema}."lock";
CREATE CONSTRAINT TRIGGER notify_release_lock_trigger
    AFTER DELETE ON {schema}."lock"
    DEFERRABLE INITIALLY DEFERRED
    FOR EACH ROW
    EXECUTE FUNCTION {schema}.notify_lock();

CREATE OR REPLACE FUNCTION {schema}.deadlock_check(old_app text, new_app text) RETURNS text AS $$
BEGIN
    IF EXISTS (
        SELECT 1 FROM pg_stat_activity WHERE application_name = old_app
    ) THEN
        RAISE EXCEPTION 'lock % is held by a live connection', old_app
            USING ERRCODE = 'P0001', DETAIL = 'LOCKED';
    END IF;
    RETURN new_app;
END;
$$ LANGUAGE plpgsql;
"#,
        schema = schema,
    )
}

/// `INSERT ... ON CONFLICT (channel) DO UPDATE SET app = deadlock_check(...)`
/// for a single channel/app pair.
pub fn acquire_sql(schema: &str, mangled_channel: &str, app: &str) -> String {
    let schema = escape_ident(schema);
    let channel_lit = quote_literal(mangled_channel);
    let app_lit = quote_literal(app);

    format!(
        r#"INSERT INTO {schema}."lock" (channel, app)
VALUES ({channel_lit}, {app_lit})
ON CONFLICT (channel) DO UPDATE
SET app = {schema}.deadlock_check({schema}."lock".app, EXCLUDED.app);"#,
        schema = schema,
        channel_lit = channel_lit,
        app_lit = app_lit,
    )
}

/// `DELETE FROM lock WHERE channel = ...`.
pub fn release_sql(schema: &str, mangled_channel: &str) -> String {
    let schema = escape_ident(schema);
    let channel_lit = quote_literal(mangled_channel);

    format!(r#"DELETE FROM {schema}."lock" WHERE channel = {channel_lit};"#)
}

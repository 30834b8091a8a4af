//! # Eniri (Minimal Authentication Backend)
//!
//! `eniri` is a small HTTP service that lets a client register with an
//! email/password or a Google identity token, verifies credentials, and
//! returns a stable user identifier.
//!
//! ## Store
//!
//! User records live in a single `PostgreSQL` `users` table (see `db/sql/`).
//! A row is resolvable by email or by the identity provider subject id; a
//! CHECK constraint requires at least one of the two to be set. Passwords are
//! stored as Argon2id PHC digests, never in plain text.
//!
//! ## Identity provider boundary
//!
//! Google tokens are introspected with an HTTP GET against the tokeninfo
//! endpoint. The call sits behind the [`api::google::IdentityVerifier`] trait
//! so the google-auth flow can be exercised without the network.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[cfg(test)]
mod tests {
    use anyhow::{Context, Result, ensure};
    use std::fs;
    use std::path::{Path, PathBuf};

    // Normalize SQL to avoid brittle formatting checks in schema tests.
    fn canonicalize_sql(sql: &str) -> String {
        sql.chars()
            .filter(|ch| !ch.is_whitespace())
            .map(|ch| ch.to_ascii_lowercase())
            .collect()
    }

    fn canonical_sql(path: &Path) -> Result<String> {
        let sql = fs::read_to_string(path)
            .with_context(|| format!("Failed to read SQL file at {}", path.display()))?;
        Ok(canonicalize_sql(&sql))
    }

    fn assert_contains(path: &Path, canonical: &str, needle: &str) -> Result<()> {
        ensure!(
            canonical.contains(needle),
            "Expected {needle} is missing in {}",
            path.display()
        );
        Ok(())
    }

    fn assert_not_contains(path: &Path, canonical: &str, needle: &str) -> Result<()> {
        ensure!(
            !canonical.contains(needle),
            "Unexpected content {needle} found in {}",
            path.display()
        );
        Ok(())
    }

    #[test]
    fn users_sql_enforces_uniqueness() -> Result<()> {
        // Duplicate-email signups rely on these constraints as the store-side backstop.
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("db/sql/01_users.sql");
        let canonical = canonical_sql(&path)?;
        assert_contains(&path, &canonical, "emailtextunique")?;
        assert_contains(&path, &canonical, "google_idtextunique")
    }

    #[test]
    fn users_sql_requires_resolvable_identity() -> Result<()> {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("db/sql/01_users.sql");
        let canonical = canonical_sql(&path)?;
        assert_contains(&path, &canonical, "check(emailisnotnullorgoogle_idisnotnull)")
    }

    #[test]
    fn users_sql_keeps_optional_columns_nullable() -> Result<()> {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("db/sql/01_users.sql");
        let canonical = canonical_sql(&path)?;
        assert_contains(&path, &canonical, "password_digesttext,")?;
        assert_contains(&path, &canonical, "public_keytext,")
    }

    #[test]
    fn users_sql_has_no_seed_rows() -> Result<()> {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("db/sql/01_users.sql");
        let canonical = canonical_sql(&path)?;
        assert_not_contains(&path, &canonical, "insertinto")
    }

    #[test]
    fn init_sql_includes_users_schema() -> Result<()> {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("db/sql/00_init.sql");
        let canonical = canonical_sql(&path)?;
        assert_contains(&path, &canonical, r"\ir01_users.sql")
    }
}

//! Administrative commands against the shared database server.
//!
//! Every drop is `IF EXISTS` and every create is skipped when the object
//! already exists, so each command can be re-run after a partial failure.

use crate::docker::DockerClient;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;

#[async_trait]
pub trait DatabaseAdmin: Send + Sync {
    async fn create_database(&self, name: &str) -> Result<()>;

    async fn create_role(&self, name: &str, password: &str) -> Result<()>;

    async fn grant_all(&self, database: &str, role: &str) -> Result<()>;

    async fn drop_database(&self, name: &str) -> Result<()>;

    async fn drop_role(&self, name: &str) -> Result<()>;
}

/// Quote an SQL identifier.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote an SQL string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub(crate) fn create_database_sql(name: &str) -> String {
    // CREATE DATABASE has no IF NOT EXISTS; \gexec runs it only when the SELECT yields a row
    format!(
        "SELECT {} WHERE NOT EXISTS (SELECT FROM pg_database WHERE datname = {})\\gexec\n",
        quote_literal(&format!("CREATE DATABASE {}", quote_ident(name))),
        quote_literal(name)
    )
}

pub(crate) fn create_role_sql(name: &str, password: &str) -> String {
    format!(
        "DO $fleet$ BEGIN\n\
         IF NOT EXISTS (SELECT FROM pg_roles WHERE rolname = {}) THEN\n\
         CREATE ROLE {} LOGIN PASSWORD {};\n\
         END IF;\n\
         END $fleet$;\n",
        quote_literal(name),
        quote_ident(name),
        quote_literal(password)
    )
}

pub(crate) fn grant_all_sql(database: &str, role: &str) -> String {
    format!(
        "GRANT ALL PRIVILEGES ON DATABASE {db} TO {role};\n\
         ALTER DATABASE {db} OWNER TO {role};\n",
        db = quote_ident(database),
        role = quote_ident(role)
    )
}

pub(crate) fn drop_database_sql(name: &str) -> String {
    format!("DROP DATABASE IF EXISTS {};\n", quote_ident(name))
}

pub(crate) fn drop_role_sql(name: &str) -> String {
    format!("DROP ROLE IF EXISTS {};\n", quote_ident(name))
}

/// Runs SQL through `psql` inside the shared tier's database container.
///
/// Statements go in on stdin and the admin password through the exec
/// environment, so neither appears in a process listing.
pub struct PsqlAdmin {
    client: DockerClient,
    infra_project: String,
    service: String,
    admin_user: String,
    admin_password: Option<String>,
}

impl PsqlAdmin {
    pub fn new(client: DockerClient, infra_project: &str, service: &str, admin_user: &str) -> Self {
        Self {
            client,
            infra_project: infra_project.to_string(),
            service: service.to_string(),
            admin_user: admin_user.to_string(),
            admin_password: None,
        }
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.admin_password = Some(password.to_string());
        self
    }

    async fn execute(&self, step: &str, sql: &str) -> Result<()> {
        let fail = |reason: String| Error::AdministrativeCommand {
            step: step.to_string(),
            reason,
        };

        let container = self
            .client
            .compose_container_id(&self.infra_project, &self.service)
            .await
            .map_err(|e| fail(e.to_string()))?
            .ok_or_else(|| {
                fail(format!(
                    "no '{}' container in '{}'",
                    self.service, self.infra_project
                ))
            })?;

        let mut envs = BTreeMap::new();
        if let Some(password) = &self.admin_password {
            envs.insert("PGPASSWORD".to_string(), password.clone());
        }

        tracing::debug!("Running '{}' in {}", step, container);
        let output = self
            .client
            .exec_stdin(
                &container,
                &["-e", "PGPASSWORD"],
                &[
                    "psql",
                    "-v",
                    "ON_ERROR_STOP=1",
                    "-q",
                    "-U",
                    &self.admin_user,
                    "-d",
                    "postgres",
                    "-f",
                    "-",
                ],
                &envs,
                sql,
            )
            .await
            .map_err(|e| fail(e.to_string()))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(fail(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

#[async_trait]
impl DatabaseAdmin for PsqlAdmin {
    async fn create_database(&self, name: &str) -> Result<()> {
        self.execute("create database", &create_database_sql(name))
            .await
    }

    async fn create_role(&self, name: &str, password: &str) -> Result<()> {
        self.execute("create role", &create_role_sql(name, password))
            .await
    }

    async fn grant_all(&self, database: &str, role: &str) -> Result<()> {
        self.execute("grant privileges", &grant_all_sql(database, role))
            .await
    }

    async fn drop_database(&self, name: &str) -> Result<()> {
        self.execute("drop database", &drop_database_sql(name)).await
    }

    async fn drop_role(&self, name: &str) -> Result<()> {
        self.execute("drop role", &drop_role_sql(name)).await
    }
}

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls};

const SCHEMA_SQL: &str = include_str!("../migrations/0001_leads.sql");

#[derive(Clone)]
pub struct LeadsDb {
    client: Arc<Mutex<Client>>,
}

impl LeadsDb {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .context("connect to postgres")?;

        tokio::spawn(async move {
            if let Err(error) = connection.await {
                tracing::error!(reason = %error, "leads postgres connection error");
            }
        });

        Ok(Self {
            client: Arc::new(Mutex::new(client)),
        })
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        let client = self.client.lock().await;
        client
            .batch_execute(SCHEMA_SQL)
            .await
            .context("apply leads schema")?;
        Ok(())
    }

    pub fn client(&self) -> Arc<Mutex<Client>> {
        self.client.clone()
    }
}

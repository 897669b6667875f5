use anyhow::{Context, Result};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::{info, warn};

/// `sslmode` from a DSN query string, lowercased.
pub fn sslmode_from_dsn(url: &str) -> Option<String> {
    url.split_once('?').and_then(|(_, qs)| {
        qs.split('&').find_map(|kv| match kv.split_once('=') {
            Some((k, v)) if k.eq_ignore_ascii_case("sslmode") => Some(v.to_lowercase()),
            _ => None,
        })
    })
}

/// The DSN handed to tokio-postgres, which only knows `disable`, `prefer` and
/// `require`. Certificate checks for `verify-ca`/`verify-full` happen in the TLS
/// connector instead.
pub fn client_dsn(url: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(url) else {
        return url.to_string();
    };
    if parsed.query().is_none() {
        return url.to_string();
    }
    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| {
            let v = if k.eq_ignore_ascii_case("sslmode")
                && matches!(v.to_lowercase().as_str(), "verify-ca" | "verify-full")
            {
                "require".to_string()
            } else {
                v.into_owned()
            };
            (k.into_owned(), v)
        })
        .collect();
    parsed.query_pairs_mut().clear().extend_pairs(pairs);
    parsed.to_string()
}

/// Connect with TLS unless the DSN says `sslmode=disable`.
///
/// Only `verify-ca`/`verify-full` check the server certificate; other modes encrypt
/// without verification, matching how libpq treats `require`.
pub async fn connect_postgres_auto(url: &str) -> Result<Client> {
    let sslmode = sslmode_from_dsn(url).unwrap_or_default();
    let dsn = client_dsn(url);

    if sslmode == "disable" {
        let (client, connection) = tokio_postgres::connect(&dsn, NoTls)
            .await
            .context("postgres connect failed")?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                eprintln!("postgres connection error: {e}");
            }
        });
        return Ok(client);
    }

    let verify_server_cert = matches!(sslmode.as_str(), "verify-ca" | "verify-full");
    if !verify_server_cert {
        warn!(
            target = "db",
            sslmode = %sslmode,
            "sslmode does not require CA verification; using native-tls with relaxed verification"
        );
    }

    let mut builder = TlsConnector::builder();
    if !verify_server_cert {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    }
    let tls = MakeTlsConnector::new(builder.build()?);
    let (client, connection) = tokio_postgres::connect(&dsn, tls)
        .await
        .context("postgres connect failed")?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            eprintln!("postgres connection error: {e}");
        }
    });
    Ok(client)
}

/// Outcome of running one SQL file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlRun {
    pub statements: usize,
    pub rows_affected: u64,
    pub rows_returned: usize,
}

/// Send `sql` verbatim over the simple-query protocol; the server splits statements.
pub async fn run_sql(client: &Client, sql: &str) -> Result<SqlRun> {
    let messages = client.simple_query(sql).await.context("SQL execution failed")?;
    let mut run = SqlRun::default();
    for msg in &messages {
        match msg {
            SimpleQueryMessage::CommandComplete(n) => {
                run.statements += 1;
                run.rows_affected += n;
            }
            SimpleQueryMessage::Row(_) => run.rows_returned += 1,
            _ => {}
        }
    }
    info!(
        statements = run.statements,
        rows_affected = run.rows_affected,
        rows_returned = run.rows_returned,
        "SQL executed"
    );
    Ok(run)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::util::env::{database_url, ConfigResolver};

    #[test]
    fn reads_sslmode_from_query_string() {
        assert_eq!(
            sslmode_from_dsn("postgresql://u:p@h:5432/db?application_name=x&SSLMODE=Disable").as_deref(),
            Some("disable")
        );
        assert_eq!(sslmode_from_dsn("postgresql://u:p@h/db?sslmode=require").as_deref(), Some("require"));
        assert_eq!(sslmode_from_dsn("postgresql://u:p@h/db"), None);
    }

    #[test]
    fn composed_dsn_is_accepted_by_the_client() {
        let env: HashMap<&str, &str> = [
            ("DB_HOST", "db.internal"),
            ("DB_NAME", "clinic"),
            ("DB_USER", "ops"),
            ("DB_PASSWORD", "p@ss word"),
            ("DB_SSL", "true"),
        ]
        .into_iter()
        .collect();
        let env: HashMap<String, String> =
            env.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        let resolver = ConfigResolver::from_parts(move |k| env.get(k).cloned(), HashMap::new());
        let dsn = database_url(&resolver).unwrap();
        assert_eq!(sslmode_from_dsn(&dsn).as_deref(), Some("verify-full"));

        let config: tokio_postgres::Config = client_dsn(&dsn).parse().unwrap();
        assert_eq!(config.get_ssl_mode(), tokio_postgres::config::SslMode::Require);
        assert_eq!(config.get_dbname(), Some("clinic"));
        assert_eq!(config.get_password(), Some("p@ss word".as_bytes()));
    }

    #[test]
    fn client_dsn_leaves_supported_modes_alone() {
        let dsn = "postgresql://u:p@h:5432/db?sslmode=disable&application_name=upkeep";
        assert_eq!(client_dsn(dsn), dsn);
        assert_eq!(client_dsn("postgresql://u:p@h/db"), "postgresql://u:p@h/db");
    }
}

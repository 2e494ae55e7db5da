use log::{error, info};
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use postgres_openssl::MakeTlsConnector;
use tokio::time::{timeout, Duration};
use tokio_postgres::{Client, NoTls};
use url::Url;

use crate::error::StorageError;

const CONNECT_TIMEOUT_SECS: u64 = 10;

pub fn create_ssl_connector(sslrootcert_path: &str) -> Result<MakeTlsConnector, StorageError> {
    let mut builder = SslConnector::builder(SslMethod::tls()).map_err(|e| {
        StorageError::StorageUnavailable(format!("SSL builder error: {}", e))
    })?;

    builder.set_ca_file(sslrootcert_path).map_err(|e| {
        StorageError::StorageUnavailable(format!("Error loading CA cert: {}", e))
    })?;

    builder.set_verify(SslVerifyMode::PEER);

    Ok(MakeTlsConnector::new(builder.build()))
}

/// Connection string split into what libpq understands and our TLS option
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub url: String,
    pub sslrootcert: Option<String>,
}

/// Strip the `sslrootcert` query parameter, which tokio-postgres rejects
pub fn parse_database_url(database_url: &str) -> Result<ConnectionTarget, StorageError> {
    let url = Url::parse(database_url)
        .map_err(|e| StorageError::StorageUnavailable(format!("URL parse error: {}", e)))?;

    let mut sslrootcert = None;
    let mut clean_params = Vec::new();
    for (key, value) in url.query_pairs() {
        if key == "sslrootcert" {
            sslrootcert = Some(value.to_string());
        } else {
            clean_params.push((key.into_owned(), value.into_owned()));
        }
    }

    let mut clean_url = url.clone();
    clean_url.set_query(None);
    if !clean_params.is_empty() {
        let query = clean_params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        clean_url.set_query(Some(&query));
    }

    Ok(ConnectionTarget {
        url: clean_url.to_string(),
        sslrootcert,
    })
}

/// Open a client and spawn its connection driver
///
/// Gives up after `CONNECT_TIMEOUT_SECS`; the caller decides whether to try
/// again on the next operation.
pub async fn connect(database_url: &str) -> Result<Client, StorageError> {
    let target = parse_database_url(database_url)?;
    let limit = Duration::from_secs(CONNECT_TIMEOUT_SECS);
    let timed_out =
        |_| StorageError::StorageUnavailable("timed out connecting to database".to_string());

    let client = match &target.sslrootcert {
        Some(path) => {
            let connector = create_ssl_connector(path)?;
            let (client, connection) =
                timeout(limit, tokio_postgres::connect(&target.url, connector))
                    .await
                    .map_err(timed_out)?
                    .map_err(|e| StorageError::StorageUnavailable(e.to_string()))?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    error!("Connection error: {}", e);
                }
            });
            client
        }
        None => {
            let (client, connection) =
                timeout(limit, tokio_postgres::connect(&target.url, NoTls))
                    .await
                    .map_err(timed_out)?
                    .map_err(|e| StorageError::StorageUnavailable(e.to_string()))?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    error!("Connection error: {}", e);
                }
            });
            client
        }
    };

    info!("Connected to database");
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sslrootcert_is_split_from_other_params() {
        let target = parse_database_url(
            "postgres://bridge:pw@db.local:5432/telemetry?sslmode=require&sslrootcert=/etc/ca.pem",
        )
        .unwrap();
        assert_eq!(
            target.url,
            "postgres://bridge:pw@db.local:5432/telemetry?sslmode=require"
        );
        assert_eq!(target.sslrootcert.as_deref(), Some("/etc/ca.pem"));
    }

    #[test]
    fn plain_url_has_no_tls() {
        let target = parse_database_url("postgres://bridge@localhost/telemetry").unwrap();
        assert_eq!(target.url, "postgres://bridge@localhost/telemetry");
        assert_eq!(target.sslrootcert, None);
    }

    #[test]
    fn garbage_url_is_rejected() {
        assert!(matches!(
            parse_database_url("not a url"),
            Err(StorageError::StorageUnavailable(_))
        ));
    }
}

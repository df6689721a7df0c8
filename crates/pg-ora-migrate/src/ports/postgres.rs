//! PostgreSQL source adapter.
//!
//! Pools connections with deadpool-postgres and maps wire rows into the
//! engine's [`Record`]/[`SqlValue`] model.

use std::sync::Arc;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use rustls::ClientConfig;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::Config as PgConfig;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{info, warn};

use crate::config::SourceConfig;
use crate::core::{Record, SourceConnection, SqlValue};
use crate::error::{MigrateError, Result};

/// Pooled PostgreSQL source connection.
pub struct PgSourcePool {
    pool: Pool,
}

impl PgSourcePool {
    /// Create a pool from configuration and verify it with a probe query.
    pub async fn connect(config: &SourceConfig, max_conns: usize) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let pool = match config.ssl_mode.to_lowercase().as_str() {
            "disable" => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
                Pool::builder(mgr)
                    .max_size(max_conns)
                    .build()
                    .map_err(|e| MigrateError::pool(e, "creating PostgreSQL source pool"))?
            }
            ssl_mode => {
                let tls_config = build_tls_config(ssl_mode)?;
                let tls_connector = MakeRustlsConnect::new(tls_config);
                let mgr = Manager::from_config(pg_config, tls_connector, mgr_config);
                Pool::builder(mgr)
                    .max_size(max_conns)
                    .build()
                    .map_err(|e| MigrateError::pool(e, "creating PostgreSQL source pool"))?
            }
        };

        let client = pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "testing PostgreSQL source connection"))?;
        client.simple_query("SELECT 1").await?;

        info!(
            "Connected to PostgreSQL source: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self { pool })
    }
}

#[async_trait]
impl SourceConnection for PgSourcePool {
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Record>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "getting source connection"))?;
        let boxed = to_sql_params(params);
        let refs: Vec<&(dyn ToSql + Sync)> = boxed
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        let rows = client.query(sql, &refs).await?;
        rows.iter().map(row_to_record).collect()
    }

    fn db_type(&self) -> &str {
        "postgres"
    }
}

fn build_tls_config(ssl_mode: &str) -> Result<ClientConfig> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = match ssl_mode {
        "require" => {
            warn!("ssl_mode=require: TLS enabled but server certificate is not verified.");
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier))
                .with_no_client_auth()
        }
        "verify-ca" | "verify-full" => {
            info!("ssl_mode={}: certificate verification enabled", ssl_mode);
            ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth()
        }
        other => {
            return Err(MigrateError::Config(format!(
                "Invalid ssl_mode '{}'. Valid options: disable, require, verify-ca, verify-full",
                other
            )));
        }
    };

    Ok(config)
}

fn to_sql_params(params: &[SqlValue]) -> Vec<Box<dyn ToSql + Sync + Send>> {
    params
        .iter()
        .map(|value| -> Box<dyn ToSql + Sync + Send> {
            match value {
                SqlValue::Null => Box::new(Option::<String>::None),
                SqlValue::Bool(b) => Box::new(*b),
                SqlValue::Int(n) => Box::new(*n),
                SqlValue::Float(f) => Box::new(*f),
                SqlValue::Text(s) => Box::new(s.clone()),
                SqlValue::Uuid(u) => Box::new(*u),
                SqlValue::Timestamp(t) => Box::new(*t),
                SqlValue::Json(v) => Box::new(v.clone()),
            }
        })
        .collect()
}

fn row_to_record(row: &tokio_postgres::Row) -> Result<Record> {
    let mut record = Record::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = match *column.type_() {
            Type::BOOL => row
                .try_get::<_, Option<bool>>(index)?
                .map_or(SqlValue::Null, SqlValue::Bool),
            Type::INT2 => row
                .try_get::<_, Option<i16>>(index)?
                .map_or(SqlValue::Null, |n| SqlValue::Int(i64::from(n))),
            Type::INT4 => row
                .try_get::<_, Option<i32>>(index)?
                .map_or(SqlValue::Null, |n| SqlValue::Int(i64::from(n))),
            Type::INT8 => row
                .try_get::<_, Option<i64>>(index)?
                .map_or(SqlValue::Null, SqlValue::Int),
            Type::FLOAT4 => row
                .try_get::<_, Option<f32>>(index)?
                .map_or(SqlValue::Null, |f| SqlValue::Float(f64::from(f))),
            Type::FLOAT8 => row
                .try_get::<_, Option<f64>>(index)?
                .map_or(SqlValue::Null, SqlValue::Float),
            Type::UUID => row
                .try_get::<_, Option<uuid::Uuid>>(index)?
                .map_or(SqlValue::Null, SqlValue::Uuid),
            Type::TIMESTAMP => row
                .try_get::<_, Option<chrono::NaiveDateTime>>(index)?
                .map_or(SqlValue::Null, SqlValue::Timestamp),
            Type::TIMESTAMPTZ => row
                .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(index)?
                .map_or(SqlValue::Null, |t| SqlValue::Timestamp(t.naive_utc())),
            Type::DATE => row
                .try_get::<_, Option<chrono::NaiveDate>>(index)?
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map_or(SqlValue::Null, SqlValue::Timestamp),
            Type::JSON | Type::JSONB => row
                .try_get::<_, Option<serde_json::Value>>(index)?
                .map_or(SqlValue::Null, SqlValue::Json),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => row
                .try_get::<_, Option<String>>(index)?
                .map_or(SqlValue::Null, SqlValue::Text),
            ref other => {
                return Err(MigrateError::Source(format!(
                    "unsupported PostgreSQL type {} in column {}",
                    other,
                    column.name()
                )));
            }
        };
        record.set(column.name(), value);
    }
    Ok(record)
}

#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

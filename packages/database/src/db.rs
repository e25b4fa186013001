//! Database connection utilities.

use switchy_database::Database;
pub use switchy_database_connection::Credentials;

use crate::DbError;

/// Connection settings supplied as separate values rather than a URL.
///
/// Each part reaches the driver untouched, so passwords may contain any
/// character, including ones reserved in URLs (`?`, `/`, `@`, `#`).
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParts {
    /// Host name.
    pub host: String,
    /// Port.
    pub port: u16,
    /// User name.
    pub user: String,
    /// Password, if any.
    pub password: Option<String>,
    /// Database name.
    pub name: String,
}

impl ConnectionParts {
    /// Returns the `host:port` authority in the form [`Credentials`] carries
    /// it.
    #[must_use]
    pub fn host_and_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Builds driver credentials from the parts.
    #[must_use]
    pub fn credentials(&self) -> Credentials {
        Credentials::new(
            self.host_and_port(),
            self.name.clone(),
            self.user.clone(),
            self.password.clone(),
        )
    }

    /// Returns a description of the target with the password masked.
    #[must_use]
    pub fn redacted(&self) -> String {
        let secret = if self.password.is_some() { ":***" } else { "" };
        format!(
            "postgres://{}{secret}@{}/{}",
            self.user,
            self.host_and_port(),
            self.name
        )
    }
}

impl std::fmt::Debug for ConnectionParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// Removes a trailing query string (e.g., `?sslmode=require`) that the
/// credentials parser doesn't understand.
///
/// Only a `?` after the path separator counts, so a `?` inside the userinfo
/// is left alone.
#[must_use]
pub fn strip_query(url: &str) -> &str {
    let authority_start = url.find("://").map_or(0, |i| i + 3);
    let authority_end = url[authority_start..]
        .rfind('@')
        .map_or(authority_start, |i| authority_start + i + 1);

    url[authority_end..]
        .find('/')
        .map(|slash| authority_end + slash)
        .and_then(|path_start| url[path_start..].find('?').map(|q| path_start + q))
        .map_or(url, |query_start| &url[..query_start])
}

/// Parses a `postgres://` URL into driver credentials.
///
/// # Errors
///
/// Returns [`DbError::Connection`] if the URL cannot be parsed.
pub fn credentials_from_url(url: &str) -> Result<Credentials, DbError> {
    Credentials::from_url(strip_query(url)).map_err(|e| DbError::Connection {
        message: format!("Invalid database URL: {e}"),
    })
}

/// Opens a Postgres connection.
///
/// The returned connection is shared by the whole sync run. The underlying
/// client pipelines concurrent statements on one session, so callers may
/// issue overlapping writes through the same handle. TLS is negotiated by
/// the connector.
///
/// # Errors
///
/// Returns [`DbError::Connection`] if the connection fails.
pub async fn connect(creds: Credentials) -> Result<Box<dyn Database>, DbError> {
    let db = switchy_database_connection::init_postgres_raw_native_tls(creds)
        .await
        .map_err(|e| DbError::Connection {
            message: e.to_string(),
        })?;

    log::debug!("Connected to database");

    Ok(db)
}

//! Connection factory
//!
//! Turns the broker configuration into a connection URI plus a credentials/TLS
//! bundle, and opens connections from them. Certificate material is read once,
//! when the factory is built at startup.

use crate::config::{AmqpSection, BrokerConfig, TlsSection};
use crate::error::{BrokerError, BrokerResult};
use lapin::tcp::{HandshakeResult, TcpStream};
use lapin::uri::{AMQPUri, AMQPUserInfo};
use lapin::{Connection, ConnectionProperties};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Client identity presented during the TLS handshake
#[derive(Clone)]
pub enum ClientIdentity {
    /// PKCS#12 bundle and its passphrase
    Pkcs12 { der: Vec<u8>, passphrase: String },
    /// PEM certificate chain and PKCS#8 PEM private key
    Pem { cert: Vec<u8>, key: Vec<u8> },
}

/// TLS material resolved from configuration
#[derive(Clone)]
pub struct TlsOptions {
    /// PEM-encoded CA certificates added to the trust store
    pub ca_certs: Vec<Vec<u8>>,
    pub identity: Option<ClientIdentity>,
    /// When false, peer verification is disabled (explicit insecure mode)
    pub reject_unauthorized: bool,
}

/// Credentials and TLS options for one connection
#[derive(Clone)]
pub struct ConnectionOptions {
    pub username: String,
    pub password: String,
    pub connection_name: String,
    pub tls: Option<TlsOptions>,
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("username", &self.username)
            .field("password", &"***")
            .field("connection_name", &self.connection_name)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

/// `amqp[s]://host:port<vhost-path>`, without credentials
pub fn connection_uri(amqp: &AmqpSection) -> String {
    let scheme = if amqp.use_ssl { "amqps" } else { "amqp" };
    format!(
        "{scheme}://{}:{}{}",
        amqp.hostname,
        amqp.port,
        amqp.vhost_path()
    )
}

fn read_material(path: &Path) -> BrokerResult<Vec<u8>> {
    std::fs::read(path).map_err(|source| BrokerError::CertificateRead {
        path: path.to_path_buf(),
        source,
    })
}

/// Load CA and client identity files named by the TLS section
pub fn load_tls_options(tls: &TlsSection) -> BrokerResult<TlsOptions> {
    let ca_certs = tls
        .ca
        .iter()
        .map(|path| read_material(path))
        .collect::<BrokerResult<Vec<_>>>()?;

    let identity = match (&tls.pfx, &tls.cert, &tls.key) {
        (Some(pfx), _, _) => Some(ClientIdentity::Pkcs12 {
            der: read_material(pfx)?,
            passphrase: tls.passphrase.clone().unwrap_or_default(),
        }),
        (None, Some(cert), Some(key)) => Some(ClientIdentity::Pem {
            cert: read_material(cert)?,
            key: read_material(key)?,
        }),
        _ => None,
    };

    Ok(TlsOptions {
        ca_certs,
        identity,
        reject_unauthorized: tls.reject_unauthorized,
    })
}

/// Build the credentials/TLS bundle for the AMQP connection
pub fn connection_options(config: &BrokerConfig) -> BrokerResult<ConnectionOptions> {
    let tls = if config.amqp.use_ssl {
        Some(load_tls_options(&config.amqp.tls)?)
    } else {
        None
    };

    Ok(ConnectionOptions {
        username: config.amqp.username.clone(),
        password: config.amqp.password.clone(),
        connection_name: format!("{}connector-amqp", config.queues.prefix),
        tls,
    })
}

/// Build a native-tls connector from resolved TLS material
pub fn build_tls_connector(tls: &TlsOptions) -> BrokerResult<native_tls::TlsConnector> {
    let mut builder = native_tls::TlsConnector::builder();

    for pem in &tls.ca_certs {
        builder.add_root_certificate(native_tls::Certificate::from_pem(pem)?);
    }

    match &tls.identity {
        Some(ClientIdentity::Pkcs12 { der, passphrase }) => {
            builder.identity(native_tls::Identity::from_pkcs12(der, passphrase)?);
        }
        Some(ClientIdentity::Pem { cert, key }) => {
            builder.identity(native_tls::Identity::from_pkcs8(cert, key)?);
        }
        None => {}
    }

    if !tls.reject_unauthorized {
        // Operator opted out of verification; keep it that way but make it visible
        warn!("AMQP TLS peer verification is disabled (reject_unauthorized = false)");
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    }

    Ok(builder.build()?)
}

fn tls_handshake(uri: &AMQPUri, connector: &native_tls::TlsConnector) -> HandshakeResult {
    let stream = TcpStream::connect((uri.authority.host.as_str(), uri.authority.port))?;
    stream.into_native_tls(connector, &uri.authority.host)
}

/// Opens broker connections from an immutable configuration
#[derive(Clone)]
pub struct ConnectionFactory {
    config: Arc<BrokerConfig>,
    uri: String,
    options: ConnectionOptions,
    tls_connector: Option<native_tls::TlsConnector>,
}

impl fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("uri", &self.uri)
            .field("options", &self.options)
            .finish()
    }
}

impl ConnectionFactory {
    pub fn new(config: Arc<BrokerConfig>) -> BrokerResult<Self> {
        let uri = connection_uri(&config.amqp);
        let options = connection_options(&config)?;
        let tls_connector = options.tls.as_ref().map(build_tls_connector).transpose()?;

        Ok(Self {
            config,
            uri,
            options,
            tls_connector,
        })
    }

    pub fn config(&self) -> &Arc<BrokerConfig> {
        &self.config
    }

    /// Connection URI without credentials, safe to log
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Parsed URI carrying credentials and the exact vhost
    pub fn amqp_uri(&self) -> BrokerResult<AMQPUri> {
        let mut uri: AMQPUri = self.uri.parse().map_err(BrokerError::InvalidUri)?;
        uri.authority.userinfo = AMQPUserInfo {
            username: self.options.username.clone(),
            password: self.options.password.clone(),
        };
        uri.vhost = self.config.amqp.vhost.clone();
        Ok(uri)
    }

    fn connection_properties(&self) -> ConnectionProperties {
        ConnectionProperties::default()
            .with_connection_name(self.options.connection_name.clone().into())
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio)
    }

    /// Open a new connection to the broker
    pub async fn connect(&self) -> BrokerResult<Connection> {
        let uri = self.amqp_uri()?;
        let properties = self.connection_properties();
        debug!(uri = %self.uri, "Opening AMQP connection");

        let result = match self.tls_connector.clone() {
            Some(connector) => {
                Connection::connector(
                    uri,
                    Box::new(move |uri: &AMQPUri| tls_handshake(uri, &connector)),
                    properties,
                )
                .await
            }
            None => Connection::connect_uri(uri, properties).await,
        };

        result.map_err(BrokerError::Connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::path::PathBuf;

    fn amqp_section(use_ssl: bool, vhost: &str) -> AmqpSection {
        AmqpSection {
            hostname: "rabbit.local".to_string(),
            port: 5671,
            vhost: vhost.to_string(),
            use_ssl,
            ..Default::default()
        }
    }

    #[test]
    fn test_plain_uri_default_vhost() {
        assert_eq!(
            connection_uri(&amqp_section(false, "/")),
            "amqp://rabbit.local:5671"
        );
    }

    #[test]
    fn test_tls_uri_named_vhost() {
        assert_eq!(
            connection_uri(&amqp_section(true, "octi")),
            "amqps://rabbit.local:5671/octi"
        );
    }

    #[test]
    fn test_options_without_tls() {
        let config = BrokerConfig::test_config();
        let options = connection_options(&config).unwrap();
        assert_eq!(options.username, "guest");
        assert_eq!(options.password, "guest");
        assert_eq!(options.connection_name, "test_connector-amqp");
        assert!(options.tls.is_none());
    }

    #[test]
    fn test_options_debug_hides_password() {
        let mut config = BrokerConfig::test_config();
        config.amqp.password = "topsecret".to_string();
        let options = connection_options(&config).unwrap();
        let rendered = format!("{options:?}");
        assert!(!rendered.contains("topsecret"));
    }

    #[test]
    fn test_missing_ca_file_is_reported() {
        let mut config = BrokerConfig::test_config();
        config.amqp.use_ssl = true;
        config.amqp.tls.ca = vec![PathBuf::from("/nonexistent/ca.pem")];

        let error = connection_options(&config).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Configuration);
        assert!(error.to_string().contains("/nonexistent/ca.pem"));
    }

    #[test]
    fn test_tls_material_is_loaded_and_flag_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let ca = dir.path().join("ca.pem");
        let pfx = dir.path().join("client.p12");
        std::fs::write(&ca, b"ca-bytes").unwrap();
        std::fs::write(&pfx, b"pfx-bytes").unwrap();

        let tls = TlsSection {
            ca: vec![ca],
            pfx: Some(pfx),
            passphrase: Some("changeit".to_string()),
            reject_unauthorized: false,
            ..Default::default()
        };

        let options = load_tls_options(&tls).unwrap();
        assert_eq!(options.ca_certs, vec![b"ca-bytes".to_vec()]);
        assert!(!options.reject_unauthorized);
        match options.identity {
            Some(ClientIdentity::Pkcs12 { der, passphrase }) => {
                assert_eq!(der, b"pfx-bytes".to_vec());
                assert_eq!(passphrase, "changeit");
            }
            _ => panic!("expected PKCS#12 identity"),
        }
    }

    #[test]
    fn test_pem_identity_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("client.pem");
        let key = dir.path().join("client.key");
        std::fs::write(&cert, b"cert").unwrap();
        std::fs::write(&key, b"key").unwrap();

        let tls = TlsSection {
            cert: Some(cert),
            key: Some(key),
            ..Default::default()
        };

        let options = load_tls_options(&tls).unwrap();
        assert!(options.reject_unauthorized);
        assert!(matches!(options.identity, Some(ClientIdentity::Pem { .. })));
    }

    #[test]
    fn test_invalid_ca_pem_fails_factory() {
        let dir = tempfile::tempdir().unwrap();
        let ca = dir.path().join("ca.pem");
        std::fs::write(&ca, b"not a certificate").unwrap();

        let mut config = BrokerConfig::test_config();
        config.amqp.use_ssl = true;
        config.amqp.tls.ca = vec![ca];

        let error = ConnectionFactory::new(Arc::new(config)).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_amqp_uri_carries_credentials_and_vhost() {
        let mut config = BrokerConfig::test_config();
        config.amqp.vhost = "octi".to_string();
        config.amqp.username = "svc".to_string();
        config.amqp.password = "pw".to_string();

        let factory = ConnectionFactory::new(Arc::new(config)).unwrap();
        let uri = factory.amqp_uri().unwrap();

        assert_eq!(uri.authority.host, "localhost");
        assert_eq!(uri.authority.port, 5672);
        assert_eq!(uri.authority.userinfo.username, "svc");
        assert_eq!(uri.authority.userinfo.password, "pw");
        assert_eq!(uri.vhost, "octi");
        assert_eq!(factory.uri(), "amqp://localhost:5672/octi");
    }

    #[test]
    fn test_amqp_uri_default_vhost() {
        let factory = ConnectionFactory::new(Arc::new(BrokerConfig::test_config())).unwrap();
        let uri = factory.amqp_uri().unwrap();
        assert_eq!(uri.vhost, "/");
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_is_connection_error() {
        let mut config = BrokerConfig::test_config();
        config.amqp.hostname = "127.0.0.1".to_string();
        config.amqp.port = 1;

        let factory = ConnectionFactory::new(Arc::new(config)).unwrap();
        let error = factory.connect().await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Connection);
    }
}

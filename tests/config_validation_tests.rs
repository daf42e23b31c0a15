//! Property tests for transport configuration validation
//!
//! Construction must either fully succeed or fail with a configuration
//! error; there is no partially valid configuration.

use proptest::prelude::*;
use pubonce::{Credentials, TransportConfig, TrustMode};
use std::io::Write;

const TEST_PEM: &[u8] = b"-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";

fn pinned_bundle() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(TEST_PEM).unwrap();
    file.flush().unwrap();
    file
}

proptest! {
    #[test]
    fn valid_inputs_construct_fully(
        host in "[a-z][a-z0-9.-]{0,20}",
        port in 1u16..,
        client_id in "[a-z0-9-]{1,16}",
        username in "[a-z0-9]{1,12}",
        secret in "[a-z0-9]{1,12}",
    ) {
        let bundle = pinned_bundle();
        let config = TransportConfig::new(
            host.clone(),
            port,
            TrustMode::PinnedCertificateFile(bundle.path().to_path_buf()),
            Some(Credentials::new(username.clone(), secret)),
            client_id.clone(),
        )
        .expect("valid inputs must construct");

        // Fully constructed: every field reflects its input
        prop_assert_eq!(config.host(), host.as_str());
        prop_assert_eq!(config.port(), port);
        prop_assert_eq!(config.client_id(), client_id.as_str());
        prop_assert_eq!(
            config.credentials().map(|c| c.username.as_str()),
            Some(username.as_str())
        );
        prop_assert_eq!(config.ca_bundle(), Some(TEST_PEM));
    }

    #[test]
    fn zero_port_always_fails(host in "[a-z][a-z0-9]{0,10}") {
        let result = TransportConfig::new(
            host,
            0,
            TrustMode::SystemDefault,
            None,
            "test-publisher",
        );
        prop_assert!(result.is_err());
    }

    #[test]
    fn blank_credentials_always_fail(
        host in "[a-z][a-z0-9]{0,10}",
        port in 1u16..,
    ) {
        let bundle = pinned_bundle();
        let result = TransportConfig::new(
            host,
            port,
            TrustMode::PinnedCertificateFile(bundle.path().to_path_buf()),
            Some(Credentials::new("", "")),
            "test-publisher",
        );
        prop_assert!(result.is_err());
    }
}

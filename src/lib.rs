//! pubonce - a managed one-shot MQTT publish client
//!
//! Connects to a broker over TLS, authenticates, publishes a single payload
//! and disconnects, replacing sleep-and-hope publisher scripts with explicit
//! connection state tracking and timeout-bounded waits keyed to broker
//! acknowledgments.
//!
//! # Overview
//!
//! - [`TransportConfig`]: validated, immutable broker description (host,
//!   port, trust material, credentials); construction fails fast on any
//!   invalid field, including an unreadable pinned certificate bundle.
//! - [`SessionDriver`]: the boundary to the underlying pub/sub library,
//!   mockable in tests. [`RumqttSession`] is the rumqttc-backed driver.
//! - [`PublishCoordinator`]: drives one connect - publish - acknowledge -
//!   disconnect lifecycle and reports a typed [`Outcome`].
//!
//! # Quick Start
//!
//! ```no_run
//! use pubonce::{
//!     Credentials, PublishCoordinator, PublishOptions, QosLevel, TransportConfig, TrustMode,
//! };
//!
//! # async fn run() -> Result<(), pubonce::ConfigError> {
//! let config = TransportConfig::new(
//!     "broker.example.com",
//!     8883,
//!     TrustMode::SystemDefault,
//!     Some(Credentials::new("device1A", "secret")),
//!     "device1A-publisher",
//! )?;
//!
//! let coordinator = PublishCoordinator::over_mqtt(&config, PublishOptions::default());
//! let outcome = coordinator
//!     .publish_once(
//!         "device/device1A/firmware",
//!         serde_json::json!({"version": 3}).to_string(),
//!         QosLevel::AtLeastOnce,
//!     )
//!     .await;
//!
//! if !outcome.is_published() {
//!     eprintln!("publish failed: {}", outcome.detail);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod observability;
pub mod session;
pub mod state;
pub mod testing;

pub use config::{ConfigError, Credentials, TransportConfig, TrustMode};
pub use coordinator::{InFlightPublish, Outcome, OutcomeStatus, PublishCoordinator, PublishOptions};
pub use session::{QosLevel, RumqttSession, SessionDriver, SessionError};
pub use state::{ConnectionState, MessageId, SessionEvent};

pub mod api;
pub mod config;
pub mod domain;
pub mod publisher;
pub mod session;
pub mod telemetry;
pub mod vault;

pub use api::{ApiGateway, AuthApi, GatewayError, MockApi, TokenPair};
pub use config::{ClientConfig, PasswordPolicy, StorageKind};
pub use domain::{GamificationClient, LearningClient};
pub use publisher::{SessionPublisher, SubscriptionId};
pub use session::{SessionError, SessionManager, SessionPhase, SessionSnapshot, User};
pub use vault::{SecretVault, TokenStore};

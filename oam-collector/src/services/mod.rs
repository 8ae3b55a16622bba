pub mod checkpoint;
pub mod error;
pub mod groups;
pub mod jwt;
pub mod metrics;
pub mod notifier;
pub mod oam_client;
pub mod session;
pub mod token_store;
pub mod writer;

pub use checkpoint::CheckpointStore;
pub use error::{ApiError, AuthError, CheckpointError, CollectorError, NotifierError};
pub use groups::GroupDiscovery;
pub use notifier::{AlarmNotifier, NotifierConfig};
pub use oam_client::{ApiRequest, OamClient, PagedResponse};
pub use session::{AuthApi, SessionBackoff, SessionManager};
pub use token_store::{FileTokenStore, TokenStore};
pub use writer::{ResponseDocument, ResponseWriter};

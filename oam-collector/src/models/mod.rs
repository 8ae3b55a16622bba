pub mod api;
pub mod records;
pub mod session;
pub mod user;

pub use api::{ApiConfig, ApiKind, NHG_PLACEHOLDER};
pub use records::{
    ApiEnvelope, ApiStatus, AuthEnvelope, FederatedTokenEnvelope, FmRecord, NhgRecord, PmRecord,
};
pub use session::{Session, SessionPhase, SessionToken, REFRESH_LEAD};
pub use user::{AuthMode, GroupMembership, OrgAccount, Target, User};

//! Identity routing
//!
//! Classifies requests as Internal or External, detects HR-domain data, and
//! resolves the logical database and collection a request's data belongs to.

pub mod hr;
pub mod identity;
pub mod router;

pub use hr::HrClassifier;
pub use identity::{
    compute_id, detect, AccountId, Identity, RequestCredentials, Session, Username,
    EXTERNAL_PREFIX, INTERNAL_PREFIX,
};
pub use router::{IdentityRouter, RequestContext, RoutingDecision};

//! Authentication for Riskline
//!
//! Bearer JWTs issued by the account service. The only claim the
//! orchestrator relies on is the numeric `user_id`, which scopes every job
//! lookup to its owner.

pub mod jwt;

pub use jwt::{extract_token_from_header, Claims, JwtValidator};

pub mod debevec;
pub mod estimator;
pub mod mitsunaga;
pub mod persist;
pub mod robertson;
pub mod solver;
pub mod types;

pub use debevec::{DEFAULT_DEBEVEC_SAMPLES, DEFAULT_DEBEVEC_SMOOTHNESS};
pub use estimator::CrfEstimator;
pub use mitsunaga::{MitsunagaNayarParams, MitsunagaNayarReport, PairingStrategy};
pub use persist::{read_response, write_response};
pub use robertson::RobertsonReport;
pub use types::{CrfState, DEFAULT_GAMMA, InverseCrf, ResponseLut};

mod proximity;

pub use proximity::{Confirmation, Decision, OverlapSample, ProximityAnalyzer};

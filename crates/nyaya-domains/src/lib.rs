pub mod legal;

use nyaya_core::ResearchMode;

pub use legal::{ResearchProfile, Specialist};

/// Research profile for a mode.
pub fn get_profile(mode: ResearchMode) -> ResearchProfile {
    legal::profile(mode)
}

/// Profiles for every supported mode.
pub fn all_profiles() -> Vec<ResearchProfile> {
    ResearchMode::ALL.into_iter().map(legal::profile).collect()
}

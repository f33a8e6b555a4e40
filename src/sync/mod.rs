mod challenges;
mod ecosystem;
mod minters;
mod orchestrator;
mod positions;

pub use challenges::ChallengesService;
pub use ecosystem::EcosystemService;
pub use minters::MintersService;
pub use orchestrator::{HeightSource, Orchestrator, SyncTask};
pub use positions::PositionsService;

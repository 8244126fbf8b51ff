mod builders;
mod clock;

pub use builders::{NewCandidateBuilder, NewRunBuilder};
pub use clock::FakeClock;

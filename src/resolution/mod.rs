//! Reference resolution: normalization, scoring, and ambiguity
//! negotiation.

pub mod ambiguity;
pub mod normalize;
pub mod resolver;

pub use ambiguity::{
    AmbiguityNegotiator, Confirmation, PendingAmbiguity, PendingCandidate, SuspendedIntent,
};
pub use resolver::{Candidate, Resolution, Resolver, ResolverConfig};

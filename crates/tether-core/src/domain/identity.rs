//! Session id generation.
//!
//! Session ids double as resume tokens: whoever presents an id inside the
//! reconnect window takes over that session.  They must therefore be hard to
//! guess, which is why the default generator uses random (v4) UUIDs.

use uuid::Uuid;

/// Source of collision-resistant session ids.
pub trait IdGenerator: Send + Sync {
    /// Returns a new, never-before-issued id.
    fn generate(&self) -> String;

    /// Whether `id` has a shape this generator could have produced.
    ///
    /// Resume requests whose id fails this check are rejected before any
    /// registry lookup.
    fn is_well_formed(&self, id: &str) -> bool {
        !id.is_empty()
    }
}

/// Random UUID ids in their 32-character hex ("simple") form.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }

    fn is_well_formed(&self, id: &str) -> bool {
        id.len() == 32 && Uuid::try_parse(id).is_ok()
    }
}

/// Any `Fn() -> String` closure is a generator; handy for deterministic tests.
impl<F> IdGenerator for F
where
    F: Fn() -> String + Send + Sync,
{
    fn generate(&self) -> String {
        self()
    }
}

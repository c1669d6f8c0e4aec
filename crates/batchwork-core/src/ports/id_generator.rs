//! IdGenerator port - item id generation.
//!
//! Ids are ULIDs built from the injected [`Clock`], so a [`FixedClock`]
//! pins the timestamp part in tests while the random part keeps ids unique.
//!
//! [`FixedClock`]: crate::ports::FixedClock

use ulid::Ulid;

use crate::domain::ItemId;
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn generate_item_id(&self) -> ItemId;
}

/// ULID based generator.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_item_id(&self) -> ItemId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        ItemId::from(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}

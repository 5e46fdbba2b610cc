//! ObjectManager: list, delete, move and consolidate objects through any
//! `ObjectStoreClient`.
//!
//! Each operation lives in its own module as an `impl` block on this type.
//! Store calls are awaited one after another; nothing is spawned and nothing
//! is retried.

use crate::{client::ObjectStoreClient, config::TransferPolicy};
use std::sync::Arc;

pub struct ObjectManager<C: ObjectStoreClient + ?Sized> {
    /// Shared handle on the store.
    pub(crate) client: Arc<C>,

    /// Copy and listing thresholds.
    pub(crate) policy: TransferPolicy,
}

impl<C: ObjectStoreClient + ?Sized> Clone for ObjectManager<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            policy: self.policy,
        }
    }
}

impl<C: ObjectStoreClient + ?Sized> ObjectManager<C> {
    /// Manager using the default 1 GiB / 5 MiB / 100-key policy.
    pub fn new(client: Arc<C>) -> Self {
        Self::with_policy(client, TransferPolicy::default())
    }

    /// Any positive part size is accepted; a move whose plan exceeds
    /// `MAX_COPY_PARTS` parts fails before a session is opened.
    pub fn with_policy(client: Arc<C>, policy: TransferPolicy) -> Self {
        Self { client, policy }
    }
}

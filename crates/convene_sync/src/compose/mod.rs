//! Ready-made operation graphs behind the manager's entry points.
//!
//! A composition builds a fixed set of operations, wires them with links
//! and exposes the chain's first and last task so compositions can be
//! strung together: an edge into [`first`](SetupComposition::first) gates
//! the whole graph, an edge out of [`last`](SetupComposition::last) runs
//! after it. Operations whose data the manager feeds or reads are exposed
//! as typed handles.

mod discovery;
mod entity_sync;
mod notification;
mod setup;
mod user_sync;

pub use discovery::DiscoveryComposition;
pub use entity_sync::EntitySyncComposition;
pub use notification::NotificationComposition;
pub use setup::SetupComposition;
pub use user_sync::UserSyncComposition;

use std::sync::Arc;

use crate::link::link_transform;
use crate::ops::CollectChangesOperation;
use crate::pipeline::RecordSyncOperation;

/// Hands everything a collect stage gathered to a record pipeline once the
/// collect succeeds.
fn queue_collected(collect: &Arc<CollectChangesOperation>, pipeline: &Arc<RecordSyncOperation>) {
    link_transform(collect, pipeline, |collect, pipeline| {
        collect.with_pending(|gathered| {
            pipeline.with_pending(|pending| pending.extend_from(gathered));
        });
    });
}

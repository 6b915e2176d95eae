//! Adapts [`resolver_core::service::Resolver::subscribe`] completion events
//! into a `kube_runtime`-flavoured trigger stream, so a reconciler can fold
//! resolution completions into its existing watch-driven trigger stream
//! instead of polling the cache — directly satisfying the requirement that
//! waiters are nudged by completion events, not polling (SPEC_FULL.md §6).

use std::convert::Infallible;

use async_broadcast::Receiver;
use futures::{Stream, StreamExt};
use kube_client::Resource;
use kube_runtime::controller::{trigger_with, ReconcileReason, ReconcileRequest};
use kube_runtime::reflector::ObjectRef;
use resolver_core::notifier::CompletionEvent;

/// Turn a completion mailbox into a [`ReconcileRequest`] stream for `K`,
/// using `key_to_object` to recover which `K` a [`CompletionEvent`]'s cache
/// key corresponds to (the core has no notion of Kubernetes object
/// identity; the host that issued the original `Resolve` call is the one
/// that knows the mapping).
///
/// Events whose key does not map to a known object (e.g. a stale
/// subscription outliving its object) are dropped rather than failing the
/// stream.
pub fn into_reconcile_trigger<K>(
    mailbox: Receiver<CompletionEvent>,
    mut key_to_object: impl FnMut(&CompletionEvent) -> Option<ObjectRef<K>> + Send + 'static,
) -> impl Stream<Item = Result<ReconcileRequest<K>, Infallible>>
where
    K: Resource + 'static,
{
    trigger_with(mailbox.map(Ok::<_, Infallible>), move |event: CompletionEvent| {
        key_to_object(&event).map(|obj_ref| ReconcileRequest {
            obj_ref,
            reason: ReconcileReason::Custom {
                reason: format!("component-version resolution completed for {}", event.key),
            },
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use resolver_core::notifier::{CompletionNotifier, OutcomeKind};
    use resolver_core::types::CacheKey;

    #[tokio::test]
    async fn a_completion_event_maps_to_one_reconcile_request() {
        let notifier = CompletionNotifier::new();
        let (mailbox, _unsub) = notifier.subscribe("ns/my-resource");
        let key = CacheKey([5u8; 32]);

        let stream = into_reconcile_trigger::<ConfigMap>(mailbox, move |event| {
            if event.key == key {
                Some(ObjectRef::new("my-resource").within("ns"))
            } else {
                None
            }
        });
        futures::pin_mut!(stream);

        notifier.notify(key, ["ns/my-resource"], OutcomeKind::Success);

        let request = stream.next().await.unwrap().unwrap();
        assert_eq!(request.obj_ref.name, "my-resource");
    }
}

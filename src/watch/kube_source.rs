//! Event source backed by kube watchers

use std::collections::HashMap;
use std::fmt::Debug;

use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::adapters::labels::managed_selector;
use crate::crd::GreetingService;
use crate::store::ObjectKey;
use crate::watch::{generation, kind_name, ChangeEvent, ChangeType, Watched};

/// Merge watchers for GreetingServices and the objects they own into one
/// stream of change events.
///
/// Owned objects are filtered server-side by the managed-by label. Updates
/// to a GreetingService that leave its generation unchanged (status writes)
/// are dropped so the controller does not wake itself up.
pub fn kube_events(client: Client, namespace: Option<String>) -> BoxStream<'static, ChangeEvent> {
    let owned = watcher::Config::default().labels(&managed_selector());

    let mut generations = GenerationFilter::default();
    let greetings = watch_kind(
        api::<GreetingService>(&client, namespace.as_deref()),
        watcher::Config::default(),
        move |obj: &GreetingService, change| generations.admit(obj, change),
    );
    let deployments = watch_kind(
        api::<Deployment>(&client, namespace.as_deref()),
        owned.clone(),
        |_: &Deployment, _| true,
    );
    let services = watch_kind(
        api::<Service>(&client, namespace.as_deref()),
        owned,
        |_: &Service, _| true,
    );

    stream::select_all(vec![greetings.boxed(), deployments.boxed(), services.boxed()]).boxed()
}

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

fn watch_kind<K, F>(
    api: Api<K>,
    config: watcher::Config,
    mut admit: F,
) -> impl Stream<Item = ChangeEvent> + Send
where
    K: Watched + Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + 'static,
    F: FnMut(&K, ChangeType) -> bool + Send + 'static,
{
    watcher(api, config)
        .default_backoff()
        .flat_map(move |res| stream::iter(to_events(res, &mut admit)))
}

fn to_events<K, F>(res: Result<watcher::Event<K>, watcher::Error>, admit: &mut F) -> Vec<ChangeEvent>
where
    K: Watched,
    F: FnMut(&K, ChangeType) -> bool,
{
    let (obj, change) = match res {
        Ok(watcher::Event::Apply(obj)) | Ok(watcher::Event::InitApply(obj)) => {
            (obj, ChangeType::Applied)
        }
        Ok(watcher::Event::Delete(obj)) => (obj, ChangeType::Deleted),
        Ok(watcher::Event::Init) | Ok(watcher::Event::InitDone) => return Vec::new(),
        Err(e) => {
            warn!("{} watch error: {}", kind_name(K::WATCH_KIND), e);
            return Vec::new();
        }
    };

    if admit(&obj, change) {
        vec![ChangeEvent::for_object(&obj, change)]
    } else {
        Vec::new()
    }
}

/// Drops updates whose generation was already seen
#[derive(Debug, Default)]
pub(crate) struct GenerationFilter {
    seen: HashMap<ObjectKey, i64>,
}

impl GenerationFilter {
    pub(crate) fn admit<K: Resource>(&mut self, obj: &K, change: ChangeType) -> bool {
        let key = ObjectKey::from_resource(obj);
        if change == ChangeType::Deleted {
            self.seen.remove(&key);
            return true;
        }

        match generation(obj) {
            Some(gen) => self.seen.insert(key, gen) != Some(gen),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::GreetingServiceSpec;

    fn greeting(generation: i64) -> GreetingService {
        let mut gs = GreetingService::new("hello", GreetingServiceSpec::new("app:v1", 1));
        gs.metadata.namespace = Some("demo".to_string());
        gs.metadata.generation = Some(generation);
        gs
    }

    #[test]
    fn status_only_updates_are_filtered() {
        let mut filter = GenerationFilter::default();
        assert!(filter.admit(&greeting(1), ChangeType::Applied));
        assert!(!filter.admit(&greeting(1), ChangeType::Applied));
        assert!(filter.admit(&greeting(2), ChangeType::Applied));
    }

    #[test]
    fn delete_resets_generation() {
        let mut filter = GenerationFilter::default();
        assert!(filter.admit(&greeting(1), ChangeType::Applied));
        assert!(filter.admit(&greeting(1), ChangeType::Deleted));
        assert!(filter.admit(&greeting(1), ChangeType::Applied));
    }

    #[test]
    fn init_markers_produce_no_events() {
        let mut admit = |_: &GreetingService, _| true;
        assert!(to_events::<GreetingService, _>(Ok(watcher::Event::Init), &mut admit).is_empty());
        assert!(to_events::<GreetingService, _>(Ok(watcher::Event::InitDone), &mut admit).is_empty());

        let events = to_events(Ok(watcher::Event::Delete(greeting(3))), &mut admit);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].change, ChangeType::Deleted);
    }
}

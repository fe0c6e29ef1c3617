//! Resource store backed by a live API server

use async_trait::async_trait;
use kube::api::{
    Api, DeleteParams, DynamicObject, ListParams, PostParams, PropagationPolicy, TypeMeta,
};
use kube::{Client, ResourceExt};
use sriov_common::{Error, Result, StoreErrorKind};
use tracing::{debug, trace};

use super::{DeleteMode, ListScope, ResourceKind, ResourceRef, ResourceStore};

/// [`ResourceStore`] over kube-rs dynamic APIs
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// The underlying client, for facilities outside the store (pod exec)
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api(&self, kind: ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = kind.api_resource();
        match namespace {
            Some(ns) if kind.is_namespaced() => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }
}

/// Map a kube error onto the store taxonomy
///
/// A 404 on a list means the API server does not serve the kind at all; a
/// 404 on a named object means the object is gone.
fn classify(err: kube::Error, resource: &str, listing: bool) -> Error {
    let kind = match &err {
        kube::Error::Api(resp) => match resp.code {
            404 if listing => StoreErrorKind::KindNotRegistered,
            404 => StoreErrorKind::NotFound,
            409 => StoreErrorKind::AlreadyExists,
            408 | 429 | 500..=599 => StoreErrorKind::Transient,
            _ => StoreErrorKind::Terminal,
        },
        _ => StoreErrorKind::Transient,
    };
    Error::store(kind, resource, err.to_string())
}

fn fill_types(kind: ResourceKind, mut obj: DynamicObject) -> DynamicObject {
    if obj.types.is_none() {
        let ar = kind.api_resource();
        obj.types = Some(TypeMeta {
            api_version: ar.api_version,
            kind: ar.kind,
        });
    }
    obj
}

fn delete_params(mode: DeleteMode) -> DeleteParams {
    match mode {
        DeleteMode::Normal => DeleteParams::default(),
        DeleteMode::Force => DeleteParams {
            grace_period_seconds: Some(0),
            propagation_policy: Some(PropagationPolicy::Foreground),
            ..Default::default()
        },
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn list(&self, kind: ResourceKind, scope: &ListScope) -> Result<Vec<DynamicObject>> {
        let api = self.api(kind, scope.namespace.as_deref());
        let mut params = ListParams::default();
        if let Some(selector) = &scope.selector {
            params = params.labels(selector);
        }
        let list = api
            .list(&params)
            .await
            .map_err(|e| classify(e, kind.as_str(), true))?;
        trace!(kind = %kind, count = list.items.len(), "Listed objects");
        Ok(list.items.into_iter().map(|o| fill_types(kind, o)).collect())
    }

    async fn get(&self, reference: &ResourceRef) -> Result<DynamicObject> {
        let api = self.api(reference.kind, reference.namespace.as_deref());
        api.get(&reference.name)
            .await
            .map(|o| fill_types(reference.kind, o))
            .map_err(|e| classify(e, &reference.to_string(), false))
    }

    async fn create(&self, kind: ResourceKind, object: &DynamicObject) -> Result<DynamicObject> {
        let namespace = object.namespace();
        if kind.is_namespaced() && namespace.is_none() {
            return Err(Error::store(
                StoreErrorKind::Terminal,
                format!("{} {}", kind, object.name_any()),
                "namespaced object has no namespace",
            ));
        }
        let api = self.api(kind, namespace.as_deref());
        let created = api
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| classify(e, &format!("{} {}", kind, object.name_any()), false))?;
        debug!(kind = %kind, name = %created.name_any(), "Created object");
        Ok(fill_types(kind, created))
    }

    async fn update(&self, kind: ResourceKind, object: &DynamicObject) -> Result<DynamicObject> {
        let name = object.name_any();
        let api = self.api(kind, object.namespace().as_deref());
        api.replace(&name, &PostParams::default(), object)
            .await
            .map(|o| fill_types(kind, o))
            .map_err(|e| classify(e, &format!("{} {}", kind, name), false))
    }

    async fn delete(&self, reference: &ResourceRef, mode: DeleteMode) -> Result<()> {
        let api = self.api(reference.kind, reference.namespace.as_deref());
        api.delete(&reference.name, &delete_params(mode))
            .await
            .map_err(|e| classify(e, &reference.to_string(), false))?;
        debug!(resource = %reference, ?mode, "Delete accepted");
        Ok(())
    }
}

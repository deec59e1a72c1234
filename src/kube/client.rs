use anyhow::Result;
use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt as _};
use http::header::{HeaderValue, ACCEPT};
use kube::{
    api::{DeleteParams, DynamicObject, GetParams, Patch, PatchParams, PostParams, Request},
    core::ApiResource,
    runtime::{watcher, watcher::Event},
    Api, Client,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value as JsonValue;

use crate::logger;

pub const FIELD_MANAGER: &str = "monokle";

fn remove_slash(path: &str) -> &str {
    if let Some(path) = path.strip_prefix('/') {
        path
    } else {
        path
    }
}

fn collection_request(path: &str) -> Request {
    Request::new(format!("/{}", remove_slash(path)))
}

/// Raw list response. Items keep whatever fields the API server sent,
/// which usually means no `kind`/`apiVersion` per item.
#[derive(Default, Debug, Clone, PartialEq, Deserialize)]
pub struct ObjectList {
    #[serde(default)]
    pub items: Vec<JsonValue>,
}

impl From<Vec<JsonValue>> for ObjectList {
    fn from(items: Vec<JsonValue>) -> Self {
        Self { items }
    }
}

#[derive(Clone)]
pub struct KubeClient {
    client: Client,
    server_url: String,
}

impl std::fmt::Debug for KubeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KubeClient {{ client: _, server_url: {} }}", self.server_url)
    }
}

impl KubeClient {
    pub fn new(client: Client, server_url: impl Into<String>) -> Self {
        let url: String = server_url.into();
        let server_url = if let Some(url) = url.strip_suffix('/') {
            url.to_string()
        } else {
            url
        };
        Self { client, server_url }
    }

    pub fn to_client(&self) -> Client {
        self.client.clone()
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    async fn inner_request<T>(&self, path: &str, header: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let request = Request::new("");

        let mut request = request.get(remove_slash(path), &GetParams::default())?;

        request
            .headers_mut()
            .insert(ACCEPT, HeaderValue::from_str(header)?);

        logger!(debug, "HTTP request {:?}", request);

        let ret = self.client.request(request).await;

        ret.map_err(Into::into)
    }
}

#[async_trait]
pub trait KubeClientRequest: Send + Sync {
    async fn request<T: DeserializeOwned + 'static>(&self, path: &str) -> Result<T>;

    /// Server-side apply of `body` as `name` below the collection `path`.
    async fn apply(&self, path: &str, name: &str, body: &JsonValue) -> Result<JsonValue>;

    async fn replace(&self, path: &str, name: &str, body: &JsonValue) -> Result<JsonValue>;

    async fn delete(&self, path: &str, name: &str) -> Result<()>;

    /// Watch events of one kind. `namespace` `None` watches cluster wide.
    fn watch(&self, resource: &ApiResource, namespace: Option<String>) -> WatchStream;
}

pub type WatchStream = BoxStream<'static, Result<Event<DynamicObject>, watcher::Error>>;

#[async_trait]
impl KubeClientRequest for KubeClient {
    async fn request<T: DeserializeOwned + 'static>(&self, path: &str) -> Result<T> {
        self.inner_request(path, "application/json").await
    }

    async fn apply(&self, path: &str, name: &str, body: &JsonValue) -> Result<JsonValue> {
        let params = PatchParams::apply(FIELD_MANAGER).force();

        let request = collection_request(path).patch(name, &params, &Patch::Apply(body))?;

        logger!(debug, "HTTP request {:?}", request);

        let ret = self.client.request(request).await;

        ret.map_err(Into::into)
    }

    async fn replace(&self, path: &str, name: &str, body: &JsonValue) -> Result<JsonValue> {
        let request = collection_request(path).replace(
            name,
            &PostParams::default(),
            serde_json::to_vec(body)?,
        )?;

        logger!(debug, "HTTP request {:?}", request);

        let ret = self.client.request(request).await;

        ret.map_err(Into::into)
    }

    async fn delete(&self, path: &str, name: &str) -> Result<()> {
        let request = collection_request(path).delete(name, &DeleteParams::default())?;

        logger!(debug, "HTTP request {:?}", request);

        self.client.request::<JsonValue>(request).await?;

        Ok(())
    }

    fn watch(&self, resource: &ApiResource, namespace: Option<String>) -> WatchStream {
        let api: Api<DynamicObject> = match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), &ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        };

        watcher(api, watcher::Config::default()).boxed()
    }
}

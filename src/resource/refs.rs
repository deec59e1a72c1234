use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value as JsonValue;
use strum::Display;

use super::{K8sResource, ResourceMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Serialize)]
pub enum RefType {
    Owner,
    ConfigMap,
    Secret,
    ServiceAccount,
    PersistentVolumeClaim,
}

impl RefType {
    fn target_kind(&self, owner_kind: Option<&str>) -> String {
        match self {
            Self::Owner => owner_kind.unwrap_or_default().to_string(),
            other => other.to_string(),
        }
    }
}

/// Outgoing reference from one resource to another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub ref_type: RefType,
    pub target_kind: String,
    pub target_name: String,
    pub target_namespace: Option<String>,
    /// Set when the target is part of the same map.
    pub target_id: Option<String>,
}

fn pod_spec_pointer(kind: &str) -> Option<&'static str> {
    match kind {
        "Pod" => Some("/spec"),
        "Deployment" | "StatefulSet" | "DaemonSet" | "ReplicaSet" | "Job"
        | "ReplicationController" => Some("/spec/template/spec"),
        "CronJob" => Some("/spec/jobTemplate/spec/template/spec"),
        _ => None,
    }
}

fn as_array(value: Option<&JsonValue>) -> &[JsonValue] {
    value
        .and_then(JsonValue::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn str_at<'a>(value: &'a JsonValue, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(JsonValue::as_str)
}

fn pod_spec_refs(spec: &JsonValue) -> Vec<(RefType, String)> {
    let mut refs = Vec::new();

    if let Some(name) = str_at(spec, "/serviceAccountName") {
        refs.push((RefType::ServiceAccount, name.to_string()));
    }

    for secret in as_array(spec.get("imagePullSecrets")) {
        if let Some(name) = str_at(secret, "/name") {
            refs.push((RefType::Secret, name.to_string()));
        }
    }

    for volume in as_array(spec.get("volumes")) {
        let targets = [
            (RefType::ConfigMap, "/configMap/name"),
            (RefType::Secret, "/secret/secretName"),
            (RefType::PersistentVolumeClaim, "/persistentVolumeClaim/claimName"),
        ];

        for (ref_type, pointer) in targets {
            if let Some(name) = str_at(volume, pointer) {
                refs.push((ref_type, name.to_string()));
            }
        }
    }

    let containers = as_array(spec.get("containers"))
        .iter()
        .chain(as_array(spec.get("initContainers")));

    for container in containers {
        for source in as_array(container.get("envFrom")) {
            if let Some(name) = str_at(source, "/configMapRef/name") {
                refs.push((RefType::ConfigMap, name.to_string()));
            }
            if let Some(name) = str_at(source, "/secretRef/name") {
                refs.push((RefType::Secret, name.to_string()));
            }
        }

        for env in as_array(container.get("env")) {
            if let Some(name) = str_at(env, "/valueFrom/configMapKeyRef/name") {
                refs.push((RefType::ConfigMap, name.to_string()));
            }
            if let Some(name) = str_at(env, "/valueFrom/secretKeyRef/name") {
                refs.push((RefType::Secret, name.to_string()));
            }
        }
    }

    refs
}

/// References declared by `resource`, without target ids.
pub fn outgoing_refs(resource: &K8sResource) -> Vec<ResourceRef> {
    let namespace = resource.namespace.clone();

    let mut refs: Vec<ResourceRef> = as_array(resource.object.pointer("/metadata/ownerReferences"))
        .iter()
        .filter_map(|owner| {
            let kind = str_at(owner, "/kind")?;
            let name = str_at(owner, "/name")?;

            Some(ResourceRef {
                ref_type: RefType::Owner,
                target_kind: RefType::Owner.target_kind(Some(kind)),
                target_name: name.to_string(),
                target_namespace: namespace.clone(),
                target_id: None,
            })
        })
        .collect();

    if let Some(spec) = pod_spec_pointer(&resource.kind).and_then(|p| resource.object.pointer(p)) {
        refs.extend(
            pod_spec_refs(spec)
                .into_iter()
                .map(|(ref_type, name)| ResourceRef {
                    ref_type,
                    target_kind: ref_type.target_kind(None),
                    target_name: name,
                    target_namespace: namespace.clone(),
                    target_id: None,
                }),
        );
    }

    refs.sort();
    refs.dedup();
    refs
}

type RefKey = (String, Option<String>, String);

/// Computes outgoing refs of every resource and links targets found in
/// the same map. Cluster scoped targets match regardless of namespace.
pub fn process_refs(map: &mut ResourceMap) {
    let index: HashMap<RefKey, String> = map
        .values()
        .map(|r| ((r.kind.clone(), r.namespace.clone(), r.name.clone()), r.id.clone()))
        .collect();

    let lookup = |kind: &str, namespace: &Option<String>, name: &str| {
        index
            .get(&(kind.to_string(), namespace.clone(), name.to_string()))
            .or_else(|| index.get(&(kind.to_string(), None, name.to_string())))
            .cloned()
    };

    for resource in map.values_mut() {
        let refs: Vec<_> = outgoing_refs(resource)
            .into_iter()
            .map(|mut r| {
                r.target_id = lookup(&r.target_kind, &r.target_namespace, &r.target_name);
                r
            })
            .collect();

        resource.refs = (!refs.is_empty()).then_some(refs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{ResourceOrigin, ResourceStorage};
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    const MANIFESTS: &str = indoc! {"
        apiVersion: apps/v1
        kind: Deployment
        metadata:
          name: web
          namespace: prod
          uid: deploy-1
        spec:
          template:
            spec:
              serviceAccountName: web
              containers:
                - name: app
                  envFrom:
                    - configMapRef:
                        name: web-config
                  env:
                    - name: PASSWORD
                      valueFrom:
                        secretKeyRef:
                          name: web-secret
                          key: password
              volumes:
                - name: data
                  persistentVolumeClaim:
                    claimName: web-data
                - name: config
                  configMap:
                    name: web-config
        ---
        apiVersion: apps/v1
        kind: ReplicaSet
        metadata:
          name: web-7d9f
          namespace: prod
          uid: rs-1
          ownerReferences:
            - apiVersion: apps/v1
              kind: Deployment
              name: web
              uid: deploy-1
        ---
        apiVersion: v1
        kind: ConfigMap
        metadata:
          name: web-config
          namespace: prod
          uid: cm-1
    "};

    fn map() -> ResourceMap {
        ResourceMap::from_documents(
            MANIFESTS,
            ResourceStorage::Cluster,
            ResourceOrigin::Cluster {
                context: "dev".into(),
            },
        )
        .unwrap()
    }

    #[test]
    fn pod_template_refs_are_collected_once() {
        let map = map();

        let refs = outgoing_refs(&map["deploy-1"]);

        let targets: Vec<_> = refs
            .iter()
            .map(|r| (r.ref_type, r.target_name.as_str()))
            .collect();

        assert_eq!(
            targets,
            vec![
                (RefType::ConfigMap, "web-config"),
                (RefType::Secret, "web-secret"),
                (RefType::ServiceAccount, "web"),
                (RefType::PersistentVolumeClaim, "web-data"),
            ]
        );
    }

    #[test]
    fn process_refs_links_targets_in_the_same_map() {
        let mut map = map();

        process_refs(&mut map);

        let owner = &map["rs-1"].refs.as_ref().unwrap()[0];
        assert_eq!(owner.ref_type, RefType::Owner);
        assert_eq!(owner.target_kind, "Deployment");
        assert_eq!(owner.target_id.as_deref(), Some("deploy-1"));

        let deploy_refs = map["deploy-1"].refs.as_ref().unwrap();
        let config = deploy_refs
            .iter()
            .find(|r| r.ref_type == RefType::ConfigMap)
            .unwrap();
        let secret = deploy_refs
            .iter()
            .find(|r| r.ref_type == RefType::Secret)
            .unwrap();

        assert_eq!(config.target_id.as_deref(), Some("cm-1"));
        assert_eq!(secret.target_id, None);
        assert_eq!(map["cm-1"].refs, None);
    }
}

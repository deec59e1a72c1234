use crate::resource::K8sResource;

const DEFAULT_NAMESPACE: &str = "default";

/// Picks the local counterpart of `target` among `candidates`.
///
/// Candidates must share kind, name and apiVersion with the target. Among
/// those, the first match wins in this order:
///
/// 1. same namespace as the target
/// 2. for a target in `default` or without namespace, a local in `default`
/// 3. for such a target, a local without namespace
/// 4. the first candidate
pub fn find_matching_local<'a, I>(target: &K8sResource, candidates: I) -> Option<&'a K8sResource>
where
    I: IntoIterator<Item = &'a K8sResource>,
{
    let matching: Vec<&K8sResource> = candidates
        .into_iter()
        .filter(|r| {
            r.kind == target.kind && r.name == target.name && r.api_version == target.api_version
        })
        .collect();

    if let Some(found) = matching.iter().find(|r| r.namespace == target.namespace) {
        return Some(found);
    }

    let target_in_default = target
        .namespace
        .as_deref()
        .is_none_or(|ns| ns == DEFAULT_NAMESPACE);

    if target_in_default {
        let in_default = matching
            .iter()
            .find(|r| r.namespace.as_deref() == Some(DEFAULT_NAMESPACE));

        let without_namespace = || matching.iter().find(|r| r.namespace.is_none());

        if let Some(found) = in_default.or_else(without_namespace) {
            return Some(found);
        }
    }

    matching.first().copied()
}

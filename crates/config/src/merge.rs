#![forbid(unsafe_code)]

use crate::Error;
use crate::level::NotifyMap;
use figment::{Figment, providers::Serialized};
use serde::{Serialize, de::DeserializeOwned};

/// Deep-merge `child` over `parent`.
///
/// Nested tables are merged key by key, at every depth; a value present in
/// `child` replaces the one in `parent`, anything `child` leaves out is
/// inherited. Neither input is modified, so the result holds no link back to
/// its ancestors.
pub fn merge<T>(parent: &T, child: &T) -> Result<T, Error>
where
    T: Serialize + DeserializeOwned,
{
    Ok(Figment::from(Serialized::defaults(parent))
        .merge(Serialized::defaults(child))
        .extract()?)
}

/// Merge an optional child layer over an optional parent layer.
pub fn merge_opt<T>(parent: Option<&T>, child: Option<&T>) -> Result<Option<T>, Error>
where
    T: Serialize + DeserializeOwned + Clone,
{
    match (parent, child) {
        (Some(parent), Some(child)) => merge(parent, child).map(Some),
        (Some(only), None) | (None, Some(only)) => Ok(Some(only.clone())),
        (None, None) => Ok(None),
    }
}

/// Compute the contacts one level down the hierarchy.
///
/// `nonotify` drops inherited contacts, then `notify` adds or overrides, so a
/// contact both cleared and re-declared at the same level ends up with the
/// re-declared level.
pub fn inherit_notify(parent: &NotifyMap, notify: &NotifyMap, nonotify: &[String]) -> NotifyMap {
    let mut resolved = parent.clone();
    for contact in nonotify {
        resolved.remove(contact);
    }
    resolved.extend(notify.iter().map(|(k, v)| (k.clone(), *v)));
    resolved
}

//! Single-shot edits from the settings screens and the event panel. Each
//! builder returns a request for [`MutationPipeline`](crate::mutation::MutationPipeline).

use serde::Serialize;
use serde::de::DeserializeOwned;
use tally_shared::{
    CategoryDto, DeleteCategoryArgs, IdArg, LogIdsArg, SkippedAppDto, UpdateSkippedAppArgs,
};
use thiserror::Error;
use tracing::warn;

use crate::cache::{CachePartition, CachePatch, keys};
use crate::confirm::validate_pattern;
use crate::mutation::{MutationError, MutationRequest, ToastLabels};
use crate::rpc::{CommandError, encode_args};

pub const GET_CATEGORIES: &str = "get_categories";
pub const DELETE_CATEGORY_BY_ID: &str = "delete_category_by_id";
pub const GET_LOGS_FOR_TIME_BLOCK: &str = "get_logs_for_time_block";
pub const DELETE_LOGS_BY_IDS: &str = "delete_logs_by_ids";
pub const UPDATE_SKIPPED_APP_BY_ID: &str = "update_skipped_app_by_id";
pub const DELETE_SKIPPED_APP_BY_ID: &str = "delete_skipped_app_by_id";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    /// Rejected locally; shown inline, never toasted.
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Mutation(#[from] MutationError),
}

impl From<CommandError> for EditError {
    fn from(err: CommandError) -> Self {
        Self::Mutation(MutationError::Command(err))
    }
}

/// Deletes a category. With `cascade` the backend drops its regexes too.
pub fn delete_category(
    category: &CategoryDto,
    cascade: bool,
) -> Result<MutationRequest, CommandError> {
    let payload = encode_args(&DeleteCategoryArgs {
        id: category.id,
        cascade,
    })?;
    let id = category.id;
    let patch = CachePatch::new().edit(keys::CATEGORIES, move |partition| {
        edit_rows::<CategoryDto>(partition, |rows| rows.retain(|row| row.id != id));
    });

    Ok(MutationRequest::new(DELETE_CATEGORY_BY_ID, payload)
        .with_patch(patch)
        .invalidates(keys::CATEGORIES)
        .invalidates(keys::CAT_REGEX)
        .with_labels(ToastLabels::new(
            format!("Deleting category \"{}\"...", category.name),
            "Category deleted successfully",
            "Failed to delete category",
        )))
}

/// Deletes individual logs of a time block. The week is re-read afterwards;
/// nothing is patched because block boundaries are computed server-side.
pub fn delete_logs(ids: &[i64]) -> Result<MutationRequest, CommandError> {
    let payload = encode_args(&LogIdsArg { ids: ids.to_vec() })?;
    Ok(MutationRequest::new(DELETE_LOGS_BY_IDS, payload)
        .invalidates(keys::WEEK)
        .with_labels(ToastLabels::new(
            "Deleting log...",
            "Log deleted",
            "Failed to delete log",
        )))
}

pub fn update_skipped_app(app: &SkippedAppDto) -> Result<MutationRequest, EditError> {
    validate_pattern(&app.regex).map_err(EditError::Invalid)?;
    let payload = encode_args(&UpdateSkippedAppArgs { app: app.clone() })?;
    let edited = app.clone();
    let patch = CachePatch::new().edit(keys::SKIPPED_APPS, move |partition| {
        edit_rows::<SkippedAppDto>(partition, |rows| {
            for row in rows.iter_mut().filter(|row| row.id == edited.id) {
                row.regex = edited.regex.clone();
            }
            rows.sort_by(|a, b| a.regex.cmp(&b.regex));
        });
    });

    Ok(MutationRequest::new(UPDATE_SKIPPED_APP_BY_ID, payload)
        .with_patch(patch)
        .invalidates(keys::SKIPPED_APPS)
        .with_labels(ToastLabels::new(
            format!("Updating pattern \"{}\"...", app.regex),
            "Pattern updated",
            "Failed to update pattern",
        )))
}

pub fn delete_skipped_app(id: i64) -> Result<MutationRequest, CommandError> {
    let payload = encode_args(&IdArg { id })?;
    let patch = CachePatch::new().edit(keys::SKIPPED_APPS, move |partition| {
        edit_rows::<SkippedAppDto>(partition, |rows| rows.retain(|row| row.id != id));
    });

    Ok(MutationRequest::new(DELETE_SKIPPED_APP_BY_ID, payload)
        .with_patch(patch)
        .invalidates(keys::SKIPPED_APPS)
        .with_labels(ToastLabels::new(
            "Removing pattern...",
            "Pattern removed",
            "Failed to remove pattern",
        )))
}

/// Edits the rows cached under the "all" query. A missing or oddly shaped
/// entry is left alone.
fn edit_rows<D>(partition: &mut CachePartition, edit: impl FnOnce(&mut Vec<D>))
where
    D: Serialize + DeserializeOwned,
{
    partition.update(keys::ALL, |current| {
        let mut rows: Vec<D> = match serde_json::from_value(current.clone()) {
            Ok(rows) => rows,
            Err(err) => {
                warn!(error = %err, "cached rows have an unexpected shape");
                return;
            }
        };
        edit(&mut rows);
        match serde_json::to_value(rows) {
            Ok(value) => *current = value,
            Err(err) => warn!(error = %err, "failed to encode optimistic rows"),
        }
    });
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::cache::{CacheKey, QueryCache};

    fn cached(key: &str, rows: serde_json::Value) -> QueryCache {
        let mut cache = QueryCache::new();
        let key = CacheKey::from(key);
        let token = cache.begin_fetch(&key);
        cache.complete_fetch(&key, keys::ALL, rows, token);
        cache
    }

    fn rows(cache: &QueryCache, key: &str) -> serde_json::Value {
        cache
            .read(&CacheKey::from(key), keys::ALL)
            .expect("cached")
            .data
    }

    #[test]
    fn category_delete_drops_the_row_and_its_regexes() {
        let mut cache = cached(
            keys::CATEGORIES,
            json!([
                { "id": 1, "name": "Coding", "priority": 1, "color": null },
                { "id": 2, "name": "Gaming", "priority": 2, "color": "#ff0000" }
            ]),
        );
        let gaming = CategoryDto {
            id: 2,
            name: "Gaming".into(),
            priority: 2,
            color: Some("#ff0000".into()),
        };

        let request = delete_category(&gaming, true).expect("request");
        assert_eq!(request.payload, json!({ "id": 2, "cascade": true }));
        assert_eq!(
            request.cache_keys,
            vec![CacheKey::from(keys::CATEGORIES), CacheKey::from(keys::CAT_REGEX)]
        );
        assert_eq!(request.labels.pending, "Deleting category \"Gaming\"...");

        request.optimistic_patch.expect("patch").apply(&mut cache);
        assert_eq!(
            rows(&cache, keys::CATEGORIES),
            json!([{ "id": 1, "name": "Coding", "priority": 1, "color": null }])
        );
    }

    #[test]
    fn invalid_skipped_app_edit_is_rejected_locally() {
        let app = SkippedAppDto {
            id: 3,
            regex: "(steam".into(),
        };
        assert!(matches!(
            update_skipped_app(&app),
            Err(EditError::Invalid(reason)) if reason.starts_with("Invalid regex: ")
        ));
    }

    #[test]
    fn skipped_app_edit_rewrites_and_resorts() {
        let mut cache = cached(
            keys::SKIPPED_APPS,
            json!([{ "id": 1, "regex": "a" }, { "id": 2, "regex": "m" }]),
        );
        let app = SkippedAppDto {
            id: 1,
            regex: "z".into(),
        };

        let request = update_skipped_app(&app).expect("request");
        assert_eq!(request.payload, json!({ "app": { "id": 1, "regex": "z" } }));
        request.optimistic_patch.expect("patch").apply(&mut cache);
        assert_eq!(
            rows(&cache, keys::SKIPPED_APPS),
            json!([{ "id": 2, "regex": "m" }, { "id": 1, "regex": "z" }])
        );
    }

    #[test]
    fn skipped_app_delete_removes_by_id() {
        let mut cache = cached(
            keys::SKIPPED_APPS,
            json!([{ "id": 1, "regex": "a" }, { "id": 2, "regex": "m" }]),
        );
        let request = delete_skipped_app(2).expect("request");
        assert_eq!(request.payload, json!({ "id": 2 }));
        request.optimistic_patch.expect("patch").apply(&mut cache);
        assert_eq!(
            rows(&cache, keys::SKIPPED_APPS),
            json!([{ "id": 1, "regex": "a" }])
        );
    }

    #[test]
    fn log_delete_only_invalidates_the_week() {
        let request = delete_logs(&[4, 9]).expect("request");
        assert_eq!(request.payload, json!({ "ids": [4, 9] }));
        assert!(request.optimistic_patch.is_none());
        assert_eq!(request.cache_keys, vec![CacheKey::from(keys::WEEK)]);
    }
}

//! Encoding rows for the table store, and startup initialization of stores.

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;
use storage::Storage;
use tables::{Item, TableSchema, Tables};

use crate::error::{RegistryError, RegistryResult};

/// Log `cause` and replace it with the stable `error`.
pub(crate) fn failed<E: fmt::Display>(error: RegistryError) -> impl FnOnce(E) -> RegistryError {
    move |cause| {
        tracing::error!(%cause, "{error}");
        error
    }
}

/// Encode a row as a table item.
pub(crate) fn to_item<T: Serialize>(row: &T, what: &'static str) -> RegistryResult<Item> {
    match serde_json::to_value(row).map_err(failed(RegistryError::Marshal(what)))? {
        serde_json::Value::Object(item) => Ok(item),
        other => {
            tracing::error!(kind = ?other, "{what} did not encode as an object");
            Err(RegistryError::Marshal(what))
        }
    }
}

/// Decode a table item as a row.
pub(crate) fn from_item<T: DeserializeOwned>(item: Item, what: &'static str) -> RegistryResult<T> {
    serde_json::from_value(serde_json::Value::Object(item)).map_err(failed(RegistryError::Marshal(what)))
}

/// Create a table at startup unless it exists.
pub(crate) async fn ensure_table(tables: &Tables, schema: &TableSchema) -> RegistryResult<()> {
    tables
        .ensure_table(schema)
        .await
        .map(|_| ())
        .map_err(failed(RegistryError::TableInitialization(schema.name.clone())))
}

/// Create a bucket at startup unless it exists.
pub(crate) async fn ensure_bucket(storage: &Storage, bucket: &str) -> RegistryResult<()> {
    storage
        .ensure_bucket(bucket)
        .await
        .map(|_| ())
        .map_err(failed(RegistryError::BucketInitialization(bucket.to_owned())))
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        name: String,
        count: u32,
    }

    #[test]
    fn rows_encode_as_objects() {
        let row = Row {
            name: "acme/vpc/aws".into(),
            count: 2,
        };
        let item = to_item(&row, "row").unwrap();
        assert_eq!(item["count"], serde_json::json!(2));
        assert_eq!(from_item::<Row>(item, "row").unwrap(), row);

        assert_eq!(to_item(&3, "row"), Err(RegistryError::Marshal("row")));
    }

    #[test]
    fn malformed_items_fail_to_decode() {
        let mut item = Item::new();
        item.insert("name".into(), serde_json::json!(7));
        assert_eq!(
            from_item::<Row>(item, "row"),
            Err(RegistryError::Marshal("row"))
        );
    }
}

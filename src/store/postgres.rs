use async_trait::async_trait;
use chrono::Utc;
use diesel::{
    dsl::{count_star, sql},
    pg::upsert::excluded,
    pg::PgConnection,
    prelude::*,
    sql_types::Integer,
};
use serde_json::{Map, Value};
use tokio::task;

use crate::{db::PgPool, schema::records};

use super::{merge_into, DocumentStore, Query, SortDirection, StoreError, StoreResult};

const RFC3339_PATTERN: &str =
    r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})$";

/// ORDER BY terms matching `compare_values`: type rank first, then numbers,
/// RFC 3339 instants and finally raw text. `None` for names that cannot be
/// inlined as a jsonb key.
fn order_clause(field: &str, direction: SortDirection) -> Option<String> {
    if field.is_empty() || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    let dir = match direction {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    };
    let value = format!("data -> '{field}'");
    let text = format!("data ->> '{field}'");
    Some(format!(
        "COALESCE(CASE jsonb_typeof({value}) WHEN 'boolean' THEN 1 WHEN 'number' THEN 2 \
         WHEN 'string' THEN 3 WHEN 'array' THEN 4 WHEN 'object' THEN 5 END, 0) {dir}, \
         CASE WHEN jsonb_typeof({value}) = 'number' THEN ({text})::float8 END {dir}, \
         CASE WHEN jsonb_typeof({value}) = 'string' AND ({text}) ~ '{pattern}' \
         THEN ({text})::timestamptz END {dir}, \
         ({text}) COLLATE \"C\" {dir}, id ASC",
        pattern = RFC3339_PATTERN,
    ))
}

fn as_sql_count(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Documents live in the single `records` table, one jsonb payload per row.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn run<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut PgConnection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| StoreError::Pool(err.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|err| StoreError::Task(err.to_string()))?
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn put(&self, collection: &str, id: &str, doc: Value) -> StoreResult<()> {
        let collection = collection.to_string();
        let id = id.to_string();
        self.run(move |conn| {
            diesel::insert_into(records::table)
                .values((
                    records::collection.eq(&collection),
                    records::id.eq(&id),
                    records::data.eq(&doc),
                ))
                .on_conflict((records::collection, records::id))
                .do_update()
                .set((
                    records::data.eq(excluded(records::data)),
                    records::updated_at.eq(Utc::now()),
                ))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn create_if_absent(&self, collection: &str, id: &str, doc: Value) -> StoreResult<bool> {
        let collection = collection.to_string();
        let id = id.to_string();
        self.run(move |conn| {
            let inserted = diesel::insert_into(records::table)
                .values((
                    records::collection.eq(&collection),
                    records::id.eq(&id),
                    records::data.eq(&doc),
                ))
                .on_conflict((records::collection, records::id))
                .do_nothing()
                .execute(conn)?;
            Ok(inserted > 0)
        })
        .await
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        let collection = collection.to_string();
        let id = id.to_string();
        self.run(move |conn| {
            let doc = records::table
                .find((collection, id))
                .select(records::data)
                .first::<Value>(conn)
                .optional()?;
            Ok(doc)
        })
        .await
    }

    async fn list(&self, collection: &str, query: &Query) -> StoreResult<Vec<Value>> {
        let collection = collection.to_string();
        let query = query.clone();
        self.run(move |conn| {
            let mut statement = records::table
                .filter(records::collection.eq(&collection))
                .select(records::data)
                .into_boxed();
            if !query.filters.is_empty() {
                statement = statement.filter(records::data.contains(query.containment()));
            }
            match &query.order_by {
                None => statement = statement.order(records::id.asc()),
                Some((field, direction)) => match order_clause(field, *direction) {
                    Some(clause) => statement = statement.order(sql::<Integer>(&clause)),
                    None => {
                        let docs: Vec<Value> = statement.load(conn)?;
                        return Ok(query.finish(docs));
                    }
                },
            }
            if query.offset > 0 {
                statement = statement.offset(as_sql_count(query.offset));
            }
            if let Some(limit) = query.limit {
                statement = statement.limit(as_sql_count(limit));
            }
            Ok(statement.load(conn)?)
        })
        .await
    }

    async fn count(&self, collection: &str, query: &Query) -> StoreResult<usize> {
        let collection = collection.to_string();
        let containment = (!query.filters.is_empty()).then(|| query.containment());
        self.run(move |conn| {
            let mut statement = records::table
                .filter(records::collection.eq(&collection))
                .select(count_star())
                .into_boxed();
            if let Some(containment) = containment {
                statement = statement.filter(records::data.contains(containment));
            }
            let total: i64 = statement.first(conn)?;
            Ok(usize::try_from(total).unwrap_or(0))
        })
        .await
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        patch: Map<String, Value>,
    ) -> StoreResult<Option<Value>> {
        let collection = collection.to_string();
        let id = id.to_string();
        self.run(move |conn| {
            conn.transaction(|conn| {
                let existing = records::table
                    .find((collection.clone(), id.clone()))
                    .select(records::data)
                    .for_update()
                    .first::<Value>(conn)
                    .optional()?;
                let Some(mut doc) = existing else {
                    return Ok(None);
                };
                merge_into(&mut doc, patch);
                diesel::update(records::table.find((collection.clone(), id.clone())))
                    .set((
                        records::data.eq(&doc),
                        records::updated_at.eq(Utc::now()),
                    ))
                    .execute(conn)?;
                Ok::<Option<Value>, StoreError>(Some(doc))
            })
        })
        .await
    }

    async fn update_if(
        &self,
        collection: &str,
        id: &str,
        expected: &Query,
        patch: Map<String, Value>,
    ) -> StoreResult<Option<Value>> {
        let collection = collection.to_string();
        let id = id.to_string();
        let expected = expected.clone();
        self.run(move |conn| {
            conn.transaction(|conn| {
                let existing = records::table
                    .find((collection.clone(), id.clone()))
                    .select(records::data)
                    .for_update()
                    .first::<Value>(conn)
                    .optional()?;
                let Some(mut doc) = existing.filter(|doc| expected.matches(doc)) else {
                    return Ok(None);
                };
                merge_into(&mut doc, patch);
                diesel::update(records::table.find((collection.clone(), id.clone())))
                    .set((
                        records::data.eq(&doc),
                        records::updated_at.eq(Utc::now()),
                    ))
                    .execute(conn)?;
                Ok::<Option<Value>, StoreError>(Some(doc))
            })
        })
        .await
    }

    async fn merge(
        &self,
        collection: &str,
        id: &str,
        patch: Map<String, Value>,
    ) -> StoreResult<Value> {
        let collection = collection.to_string();
        let id = id.to_string();
        self.run(move |conn| {
            conn.transaction(|conn| {
                let existing = records::table
                    .find((collection.clone(), id.clone()))
                    .select(records::data)
                    .for_update()
                    .first::<Value>(conn)
                    .optional()?;
                let mut doc = existing.unwrap_or_else(|| Value::Object(Map::new()));
                merge_into(&mut doc, patch);
                diesel::insert_into(records::table)
                    .values((
                        records::collection.eq(&collection),
                        records::id.eq(&id),
                        records::data.eq(&doc),
                    ))
                    .on_conflict((records::collection, records::id))
                    .do_update()
                    .set((
                        records::data.eq(excluded(records::data)),
                        records::updated_at.eq(Utc::now()),
                    ))
                    .execute(conn)?;
                Ok::<Value, StoreError>(doc)
            })
        })
        .await
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
        let collection = collection.to_string();
        let id = id.to_string();
        self.run(move |conn| {
            let deleted = diesel::delete(records::table.find((collection, id))).execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }
}

//! Generic resource handler: one implementation of create / get / list /
//! update / delete, instantiated per resource type through the
//! [`CrudResource`] description trait. Filtering, sorting, field selection
//! and pagination come from query parameters; invalid values degrade to
//! defaults instead of failing.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use axum::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use sqlx::{postgres::PgRow, PgPool, Postgres, QueryBuilder};
use tracing::instrument;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

/// How a filterable column binds its value. Text columns (including
/// enums and uuids) always compare through a `::text` cast; Number and
/// Bool bind natively when the value parses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Number,
    Bool,
}

pub type FilterColumn = (&'static str, ColumnKind);

/// Resource description: table name, queryable columns, typed write
/// payloads and an optional relation-expansion hook for single reads.
#[async_trait]
pub trait CrudResource:
    Serialize + for<'r> sqlx::FromRow<'r, PgRow> + Unpin + Send + Sync + 'static
{
    const TABLE: &'static str;
    /// Columns accepted as filter keys, with their bind kind; everything
    /// else is ignored.
    const FILTERABLE: &'static [FilterColumn];
    /// Columns accepted in `sort=`; everything else is ignored.
    const SORTABLE: &'static [&'static str];
    const DEFAULT_SORT: &'static str = "-created_at";
    /// WHERE fragment applied to every read (soft deletes, hidden rows).
    const READ_GUARD: Option<&'static str> = None;

    type Create: DeserializeOwned + Send + 'static;
    type Update: DeserializeOwned + Send + 'static;

    async fn insert(db: &PgPool, input: Self::Create) -> ApiResult<Self>;
    async fn apply_update(db: &PgPool, id: Uuid, input: Self::Update) -> ApiResult<Self>;

    /// Attach expanded relations when a single document is fetched.
    async fn expand(_db: &PgPool, _doc: &mut Value) -> ApiResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl FilterOp {
    fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: String,
    pub kind: ColumnKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub field: String,
    pub desc: bool,
}

/// Parsed list parameters. Construction never fails: unknown fields and
/// malformed numbers fall back to defaults.
#[derive(Debug, Clone)]
pub struct ListQuery {
    pub filters: Vec<Filter>,
    pub sort: Vec<SortKey>,
    pub fields: Vec<String>,
    pub page: i64,
    pub limit: i64,
}

lazy_static! {
    static ref FILTER_KEY_RE: Regex = Regex::new(r"^([a-z_]+)\[(gt|gte|lt|lte)\]$").unwrap();
}

fn parse_sort(spec: &str, sortable: &[&str]) -> Vec<SortKey> {
    spec.split(',')
        .filter_map(|part| {
            let part = part.trim();
            let (field, desc) = match part.strip_prefix('-') {
                Some(rest) => (rest, true),
                None => (part, false),
            };
            if sortable.contains(&field) {
                Some(SortKey {
                    field: field.to_string(),
                    desc,
                })
            } else {
                None
            }
        })
        .collect()
}

impl ListQuery {
    pub fn from_params(
        params: &HashMap<String, String>,
        filterable: &[FilterColumn],
        sortable: &[&str],
        default_sort: &str,
    ) -> Self {
        let kind_of = |field: &str| {
            filterable
                .iter()
                .find(|(name, _)| *name == field)
                .map(|(_, kind)| *kind)
        };
        let mut filters = Vec::new();
        for (key, value) in params {
            match key.as_str() {
                "page" | "limit" | "sort" | "fields" => continue,
                plain => {
                    if let Some(kind) = kind_of(plain) {
                        filters.push(Filter {
                            field: plain.to_string(),
                            op: FilterOp::Eq,
                            value: value.clone(),
                            kind,
                        });
                        continue;
                    }
                    if let Some(caps) = FILTER_KEY_RE.captures(plain) {
                        let field = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                        if let Some(kind) = kind_of(field) {
                            if let Some(op) = caps.get(2).and_then(|m| FilterOp::parse(m.as_str()))
                            {
                                filters.push(Filter {
                                    field: field.to_string(),
                                    op,
                                    value: value.clone(),
                                    kind,
                                });
                            }
                        }
                    }
                }
            }
        }
        filters.sort_by(|a, b| a.field.cmp(&b.field));

        let mut sort = params
            .get("sort")
            .map(|s| parse_sort(s, sortable))
            .unwrap_or_default();
        if sort.is_empty() {
            sort = parse_sort(default_sort, sortable);
        }

        let fields = params
            .get("fields")
            .map(|f| {
                f.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let page = params
            .get("page")
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|p| *p >= 1)
            .unwrap_or(1);
        let limit = params
            .get("limit")
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|l| *l >= 1)
            .unwrap_or(DEFAULT_LIMIT)
            .min(MAX_LIMIT);

        Self {
            filters,
            sort,
            fields,
            page,
            limit,
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }
}

/// Bind each filter per its declared column kind. A value that does not
/// parse as the declared kind degrades to the `::text` comparison, which
/// matches nothing but never errors. Whitelisting keeps field names safe
/// to splice.
fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filters: &[Filter]) {
    for f in filters {
        qb.push(" AND ");
        match f.kind {
            ColumnKind::Number => {
                if let Ok(n) = f.value.parse::<f64>() {
                    qb.push(f.field.as_str());
                    qb.push(" ");
                    qb.push(f.op.sql());
                    qb.push(" ");
                    qb.push_bind(n);
                } else {
                    push_text_filter(qb, f);
                }
            }
            ColumnKind::Bool => {
                if let Ok(b) = f.value.parse::<bool>() {
                    qb.push(f.field.as_str());
                    qb.push(" ");
                    qb.push(f.op.sql());
                    qb.push(" ");
                    qb.push_bind(b);
                } else {
                    push_text_filter(qb, f);
                }
            }
            ColumnKind::Text => push_text_filter(qb, f),
        }
    }
}

fn push_text_filter(qb: &mut QueryBuilder<'_, Postgres>, f: &Filter) {
    qb.push(f.field.as_str());
    qb.push("::text ");
    qb.push(f.op.sql());
    qb.push(" ");
    qb.push_bind(f.value.clone());
}

fn push_order(qb: &mut QueryBuilder<'_, Postgres>, sort: &[SortKey]) {
    if sort.is_empty() {
        return;
    }
    qb.push(" ORDER BY ");
    for (i, key) in sort.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push(key.field.as_str());
        qb.push(if key.desc { " DESC" } else { " ASC" });
    }
}

/// Keep only the selected fields (plus `id`) of a serialized document.
fn select_fields(doc: &mut Value, fields: &[String]) {
    if fields.is_empty() {
        return;
    }
    if let Value::Object(map) = doc {
        map.retain(|k, _| k == "id" || fields.iter().any(|f| f == k));
    }
}

pub async fn fetch_list<R: CrudResource>(db: &PgPool, q: &ListQuery) -> ApiResult<Vec<Value>> {
    let mut qb = QueryBuilder::new(format!("SELECT * FROM {} WHERE TRUE", R::TABLE));
    if let Some(guard) = R::READ_GUARD {
        qb.push(" AND ");
        qb.push(guard);
    }
    push_filters(&mut qb, &q.filters);
    push_order(&mut qb, &q.sort);
    qb.push(" LIMIT ");
    qb.push_bind(q.limit);
    qb.push(" OFFSET ");
    qb.push_bind(q.offset());

    let rows: Vec<R> = qb.build_query_as::<R>().fetch_all(db).await?;
    let mut docs = Vec::with_capacity(rows.len());
    for row in rows {
        let mut doc = serde_json::to_value(row).map_err(|e| ApiError::Internal(e.into()))?;
        select_fields(&mut doc, &q.fields);
        docs.push(doc);
    }
    Ok(docs)
}

pub async fn fetch_one<R: CrudResource>(db: &PgPool, id: Uuid) -> ApiResult<Value> {
    let mut qb = QueryBuilder::new(format!("SELECT * FROM {} WHERE id = ", R::TABLE));
    qb.push_bind(id);
    if let Some(guard) = R::READ_GUARD {
        qb.push(" AND ");
        qb.push(guard);
    }
    let row: Option<R> = qb.build_query_as::<R>().fetch_optional(db).await?;
    let row = row.ok_or_else(|| ApiError::not_found("No document found with that ID"))?;
    let mut doc = serde_json::to_value(row).map_err(|e| ApiError::Internal(e.into()))?;
    R::expand(db, &mut doc).await?;
    Ok(doc)
}

pub async fn delete_row<R: CrudResource>(db: &PgPool, id: Uuid) -> ApiResult<()> {
    let mut qb = QueryBuilder::new(format!("DELETE FROM {} WHERE id = ", R::TABLE));
    qb.push_bind(id);
    let result = qb.build().execute(db).await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("No document found with that ID"));
    }
    Ok(())
}

// --- generic axum handlers, one per CRUD operation ---

#[instrument(skip(state, params), fields(table = R::TABLE))]
pub async fn list<R: CrudResource>(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let q = ListQuery::from_params(&params, R::FILTERABLE, R::SORTABLE, R::DEFAULT_SORT);
    let docs = fetch_list::<R>(&state.db, &q).await?;
    Ok(Json(json!({
        "status": "success",
        "results": docs.len(),
        "data": docs,
    })))
}

#[instrument(skip(state), fields(table = R::TABLE))]
pub async fn get_by_id<R: CrudResource>(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let doc = fetch_one::<R>(&state.db, id).await?;
    Ok(Json(json!({ "status": "success", "data": doc })))
}

#[instrument(skip(state, input), fields(table = R::TABLE))]
pub async fn create<R: CrudResource>(
    State(state): State<AppState>,
    Json(input): Json<R::Create>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let row = R::insert(&state.db, input).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "success", "data": row })),
    ))
}

#[instrument(skip(state, input), fields(table = R::TABLE))]
pub async fn update<R: CrudResource>(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<R::Update>,
) -> ApiResult<Json<Value>> {
    let row = R::apply_update(&state.db, id, input).await?;
    Ok(Json(json!({ "status": "success", "data": row })))
}

#[instrument(skip(state), fields(table = R::TABLE))]
pub async fn delete<R: CrudResource>(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    delete_row::<R>(&state.db, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    const FILTERABLE: &[FilterColumn] = &[
        ("duration", ColumnKind::Number),
        ("difficulty", ColumnKind::Text),
        ("price", ColumnKind::Number),
        ("name", ColumnKind::Text),
        ("secret", ColumnKind::Bool),
    ];
    const SORTABLE: &[&str] = &["price", "ratings_average", "created_at", "name"];

    #[test]
    fn parses_operator_filters() {
        let q = ListQuery::from_params(
            &params(&[("duration[gte]", "5"), ("difficulty", "easy")]),
            FILTERABLE,
            SORTABLE,
            "-created_at",
        );
        assert_eq!(q.filters.len(), 2);
        assert_eq!(q.filters[0].field, "difficulty");
        assert_eq!(q.filters[0].op, FilterOp::Eq);
        assert_eq!(q.filters[0].kind, ColumnKind::Text);
        assert_eq!(q.filters[1].field, "duration");
        assert_eq!(q.filters[1].op, FilterOp::Gte);
        assert_eq!(q.filters[1].value, "5");
        assert_eq!(q.filters[1].kind, ColumnKind::Number);
    }

    fn filter_sql(filters: &[Filter]) -> String {
        let mut qb = QueryBuilder::new("SELECT * FROM t WHERE TRUE");
        push_filters(&mut qb, filters);
        qb.sql().to_string()
    }

    #[test]
    fn numeric_looking_value_on_text_column_binds_as_text() {
        let q = ListQuery::from_params(
            &params(&[("name", "123")]),
            FILTERABLE,
            SORTABLE,
            "-created_at",
        );
        assert_eq!(q.filters[0].kind, ColumnKind::Text);
        assert!(filter_sql(&q.filters).contains("name::text = "));
    }

    #[test]
    fn number_column_binds_natively_when_value_parses() {
        let q = ListQuery::from_params(
            &params(&[("price[gte]", "500")]),
            FILTERABLE,
            SORTABLE,
            "-created_at",
        );
        let sql = filter_sql(&q.filters);
        assert!(sql.contains("price >= "));
        assert!(!sql.contains("price::text"));
    }

    #[test]
    fn unparseable_value_degrades_to_text_comparison() {
        let q = ListQuery::from_params(
            &params(&[("duration", "abc"), ("secret", "maybe")]),
            FILTERABLE,
            SORTABLE,
            "-created_at",
        );
        let sql = filter_sql(&q.filters);
        assert!(sql.contains("duration::text = "));
        assert!(sql.contains("secret::text = "));
    }

    #[test]
    fn unknown_filter_fields_are_ignored() {
        let q = ListQuery::from_params(
            &params(&[("password_hash", "x"), ("nope[gt]", "1")]),
            FILTERABLE,
            SORTABLE,
            "-created_at",
        );
        assert!(q.filters.is_empty());
    }

    #[test]
    fn sort_respects_whitelist_and_direction() {
        let q = ListQuery::from_params(
            &params(&[("sort", "-ratings_average,price,bogus")]),
            FILTERABLE,
            SORTABLE,
            "-created_at",
        );
        assert_eq!(
            q.sort,
            vec![
                SortKey {
                    field: "ratings_average".into(),
                    desc: true
                },
                SortKey {
                    field: "price".into(),
                    desc: false
                },
            ]
        );
    }

    #[test]
    fn bad_pagination_degrades_to_defaults() {
        let q = ListQuery::from_params(
            &params(&[("page", "zero"), ("limit", "-3")]),
            FILTERABLE,
            SORTABLE,
            "-created_at",
        );
        assert_eq!(q.page, 1);
        assert_eq!(q.limit, DEFAULT_LIMIT);
        assert_eq!(q.offset(), 0);

        let q = ListQuery::from_params(
            &params(&[("page", "3"), ("limit", "10")]),
            FILTERABLE,
            SORTABLE,
            "-created_at",
        );
        assert_eq!(q.offset(), 20);
    }

    #[test]
    fn limit_is_capped() {
        let q = ListQuery::from_params(
            &params(&[("limit", "999999")]),
            FILTERABLE,
            SORTABLE,
            "-created_at",
        );
        assert_eq!(q.limit, MAX_LIMIT);
    }

    #[test]
    fn default_sort_applies_when_absent() {
        let q = ListQuery::from_params(&params(&[]), FILTERABLE, SORTABLE, "-created_at");
        assert_eq!(
            q.sort,
            vec![SortKey {
                field: "created_at".into(),
                desc: true
            }]
        );
    }

    #[test]
    fn field_selection_keeps_id() {
        let mut doc = serde_json::json!({
            "id": "abc", "name": "Tour", "price": 100.0, "summary": "hi"
        });
        select_fields(&mut doc, &["name".into(), "price".into()]);
        let obj = doc.as_object().unwrap();
        assert!(obj.contains_key("id"));
        assert!(obj.contains_key("name"));
        assert!(obj.contains_key("price"));
        assert!(!obj.contains_key("summary"));
    }
}

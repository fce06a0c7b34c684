use std::collections::HashMap;

use axum::{
    extract::{Multipart, Path, Query, State},
    Json,
};
use futures_util::future::try_join_all;
use serde_json::{json, Value};
use tracing::instrument;
use uuid::Uuid;

use crate::crud::{fetch_list, CrudResource, ListQuery};
use crate::error::{ApiError, ApiResult};
use crate::geo::{self, Unit};
use crate::state::AppState;
use crate::storage::ext_from_mime;
use crate::tours::repo::{self, Tour};

/// Canned listing: five highest-rated cheapest tours, trimmed fields.
#[instrument(skip(state, params))]
pub async fn top_five_cheap(
    State(state): State<AppState>,
    Query(mut params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    params.insert("limit".into(), "5".into());
    params.insert("sort".into(), "-ratings_average,price".into());
    params
        .entry("fields".into())
        .or_insert_with(|| "name,price,ratings_average,summary,difficulty".into());

    let q = ListQuery::from_params(
        &params,
        Tour::FILTERABLE,
        Tour::SORTABLE,
        Tour::DEFAULT_SORT,
    );
    let docs = fetch_list::<Tour>(&state.db, &q).await?;
    Ok(Json(json!({
        "status": "success",
        "results": docs.len(),
        "data": docs,
    })))
}

#[instrument(skip(state))]
pub async fn tour_stats(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let stats = repo::stats_by_difficulty(&state.db)
        .await
        .map_err(ApiError::Internal)?;
    Ok(Json(json!({ "status": "success", "data": { "stats": stats } })))
}

#[instrument(skip(state))]
pub async fn monthly_plan(
    State(state): State<AppState>,
    Path(year): Path<i32>,
) -> ApiResult<Json<Value>> {
    let plan = repo::monthly_plan(&state.db, year).await?;
    Ok(Json(json!({ "status": "success", "data": { "plan": plan } })))
}

/// Tours whose start point lies within `distance` of the center, in the
/// requested unit.
#[instrument(skip(state))]
pub async fn tours_within(
    State(state): State<AppState>,
    Path((distance, latlng, unit)): Path<(f64, String, String)>,
) -> ApiResult<Json<Value>> {
    let unit = Unit::parse(&unit)?;
    let (lat, lng) = geo::parse_latlng(&latlng)?;
    if distance < 0.0 {
        return Err(ApiError::validation("Distance must not be negative"));
    }

    let candidates = Tour::with_start_point(&state.db)
        .await
        .map_err(ApiError::Internal)?;
    let tours: Vec<Tour> = candidates
        .into_iter()
        .filter(|t| match (t.start_lat, t.start_lng) {
            (Some(t_lat), Some(t_lng)) => {
                geo::distance(lat, lng, t_lat, t_lng, unit) <= distance
            }
            _ => false,
        })
        .collect();

    Ok(Json(json!({
        "status": "success",
        "results": tours.len(),
        "data": { "data": tours },
    })))
}

/// Distance from the center to every tour start point, sorted nearest
/// first.
#[instrument(skip(state))]
pub async fn distances(
    State(state): State<AppState>,
    Path((latlng, unit)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let unit = Unit::parse(&unit)?;
    let (lat, lng) = geo::parse_latlng(&latlng)?;

    let candidates = Tour::with_start_point(&state.db)
        .await
        .map_err(ApiError::Internal)?;
    let mut distances: Vec<Value> = candidates
        .iter()
        .filter_map(|t| {
            let (t_lat, t_lng) = (t.start_lat?, t.start_lng?);
            let d = geo::distance(lat, lng, t_lat, t_lng, unit);
            Some(json!({
                "id": t.id,
                "name": t.name,
                "distance": (d * 1000.0).round() / 1000.0,
            }))
        })
        .collect();
    distances.sort_by(|a, b| {
        let da = a["distance"].as_f64().unwrap_or(f64::MAX);
        let db = b["distance"].as_f64().unwrap_or(f64::MAX);
        da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
    });

    Ok(Json(json!({
        "status": "success",
        "data": { "distances": distances },
    })))
}

const MAX_GALLERY_IMAGES: usize = 3;

/// Multipart upload of `imageCover` (one file) and `images` (up to three).
/// Objects are stored first; the row update happens only after every
/// upload succeeded.
#[instrument(skip(state, multipart))]
pub async fn upload_tour_images(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> ApiResult<Json<Value>> {
    Tour::find_by_id(&state.db, id)
        .await
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::not_found("No document found with that ID"))?;

    let mut cover: Option<(String, bytes::Bytes, String)> = None;
    let mut gallery: Vec<(String, bytes::Bytes, String)> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name != "imageCover" && name != "images" {
            continue;
        }
        let content_type = field
            .content_type()
            .map(|s| s.to_string())
            .unwrap_or_default();
        let ext = ext_from_mime(&content_type)
            .ok_or_else(|| ApiError::validation("Not an image! Please upload only images."))?;
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::validation(e.to_string()))?;

        if name == "imageCover" {
            let key = format!("tours/{id}/{}-cover.{ext}", Uuid::new_v4());
            cover = Some((key, data, content_type));
        } else {
            if gallery.len() == MAX_GALLERY_IMAGES {
                return Err(ApiError::validation("At most 3 gallery images are allowed"));
            }
            let key = format!("tours/{id}/{}-{}.{ext}", Uuid::new_v4(), gallery.len() + 1);
            gallery.push((key, data, content_type));
        }
    }

    if cover.is_none() && gallery.is_empty() {
        return Err(ApiError::validation(
            "Provide an imageCover or images field",
        ));
    }

    let uploads = cover.iter().chain(gallery.iter()).map(|(key, data, ct)| {
        let storage = state.storage.clone();
        let (key, data, ct) = (key.clone(), data.clone(), ct.clone());
        async move { storage.put_object(&key, data, &ct).await }
    });
    try_join_all(uploads).await.map_err(ApiError::Internal)?;

    let cover_key = cover.as_ref().map(|(k, _, _)| k.as_str());
    let gallery_keys: Vec<String> = gallery.iter().map(|(k, _, _)| k.clone()).collect();
    let gallery_ref = if gallery_keys.is_empty() {
        None
    } else {
        Some(gallery_keys.as_slice())
    };
    let tour = Tour::set_images(&state.db, id, cover_key, gallery_ref).await?;

    Ok(Json(json!({ "status": "success", "data": tour })))
}

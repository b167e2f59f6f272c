use axum::{debug_handler, extract::{Path, State}, Json};

use crate::{
    appresult::ChatError,
    db::{Group, Membership},
    store::Store,
    AppResult,
};

#[debug_handler(state = crate::AppState)]
pub(crate) async fn group(
    State(store): State<Store>,
    Path(group_id): Path<i64>,
) -> AppResult<Json<Group>> {
    let Some(group) = store.get_group(group_id).await? else {
        return Err(ChatError::NotFound(format!("group {group_id}")))?;
    };

    Ok(Json(group))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn members(
    State(store): State<Store>,
    Path(group_id): Path<i64>,
) -> AppResult<Json<Vec<Membership>>> {
    if store.get_group(group_id).await?.is_none() {
        return Err(ChatError::NotFound(format!("group {group_id}")))?;
    }

    Ok(Json(store.list_members(group_id).await?))
}

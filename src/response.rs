//! JSON envelopes returned by the admin API: `{"data": row}` for one row and
//! `{"data": [rows], "meta": {"count": n}}` for lists.

use axum::{http::StatusCode, Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct Row<T> {
    pub data: T,
}

#[derive(Serialize)]
pub struct Rows<T> {
    pub data: Vec<T>,
    pub meta: Count,
}

#[derive(Serialize)]
pub struct Count {
    pub count: u64,
}

pub type RowResponse<T> = (StatusCode, Json<Row<T>>);
pub type RowsResponse<T> = (StatusCode, Json<Rows<T>>);

/// 200 with one row (read, update, delete preview).
pub fn one<T: Serialize>(data: T) -> RowResponse<T> {
    (StatusCode::OK, Json(Row { data }))
}

/// 201 with the row as stored after insert.
pub fn created<T: Serialize>(data: T) -> RowResponse<T> {
    (StatusCode::CREATED, Json(Row { data }))
}

/// 200 with a list and its length.
pub fn listed<T: Serialize>(data: Vec<T>) -> RowsResponse<T> {
    rows(StatusCode::OK, data)
}

/// 201 for a bulk insert; rows keep the order they were sent in.
pub fn created_all<T: Serialize>(data: Vec<T>) -> RowsResponse<T> {
    rows(StatusCode::CREATED, data)
}

fn rows<T: Serialize>(status: StatusCode, data: Vec<T>) -> RowsResponse<T> {
    let count = data.len() as u64;
    (status, Json(Rows { data, meta: Count { count } }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn single_rows_carry_no_meta() {
        let (status, Json(body)) = created(json!({ "id": 1 }));
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(serde_json::to_value(body).unwrap(), json!({ "data": { "id": 1 } }));
        assert_eq!(one(json!(null)).0, StatusCode::OK);
    }

    #[test]
    fn lists_are_counted() {
        let (status, Json(body)) = created_all(vec![json!({ "id": 1 }), json!({ "id": 2 })]);
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(serde_json::to_value(body).unwrap()["meta"]["count"], 2);
        let (status, Json(body)) = listed(Vec::<serde_json::Value>::new());
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::to_value(body).unwrap(), json!({ "data": [], "meta": { "count": 0 } }));
    }
}
